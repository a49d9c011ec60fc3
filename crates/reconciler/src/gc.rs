//! Owner-reference garbage collection.
//!
//! Workloads and jobs point back at the record that owns them. When the
//! record is deleted, the runtime objects it owned are collected here.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use converge_core::{CallContext, ObjectKey, ObjectMeta, Result, ResultExt};
use converge_workload::model::Labels;
use converge_workload::{InMemoryCluster, Job, ObjectStore, Resource, Workload};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::record::{API_VERSION, LrpRecord, Record, TaskRecord};
use crate::store::RecordStore;

/// Deletes runtime objects whose owning record no longer exists.
pub struct OwnerGarbageCollector {
    cluster: Arc<InMemoryCluster>,
    lrps: Arc<dyn RecordStore<LrpRecord>>,
    tasks: Arc<dyn RecordStore<TaskRecord>>,
    interval: Duration,
}

impl OwnerGarbageCollector {
    pub fn new(
        cluster: Arc<InMemoryCluster>,
        lrps: Arc<dyn RecordStore<LrpRecord>>,
        tasks: Arc<dyn RecordStore<TaskRecord>>,
        interval: Duration,
    ) -> Self {
        Self {
            cluster,
            lrps,
            tasks,
            interval,
        }
    }

    /// Collect until `stop` flips to true.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let ctx = CallContext::from_signal(stop.clone());
                    if let Err(e) = self.collect(&ctx).await {
                        error!(error = %e, "Garbage collection failed");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("Garbage collector stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One collection pass. Returns how many objects were deleted.
    ///
    /// Runtime objects are listed before records. An object's owner record
    /// always exists before the object is desired, so any object seen here
    /// has its owner in the later record listing unless the owner is gone.
    ///
    /// # Errors
    ///
    /// Returns the first listing or deletion failure.
    pub async fn collect(&self, ctx: &CallContext) -> Result<usize> {
        let workloads = self.list::<Workload>(ctx).await?;
        let jobs = self.list::<Job>(ctx).await?;

        let lrp_uids = uids(&self.lrps.list(ctx).await.context("failed to list lrps")?);
        let task_uids = uids(&self.tasks.list(ctx).await.context("failed to list tasks")?);

        let mut deleted = 0usize;
        for key in orphans(&workloads, LrpRecord::KIND, &lrp_uids) {
            self.delete::<Workload>(ctx, &key).await?;
            deleted = deleted.saturating_add(1);
        }
        for key in orphans(&jobs, TaskRecord::KIND, &task_uids) {
            self.delete::<Job>(ctx, &key).await?;
            deleted = deleted.saturating_add(1);
        }

        if deleted > 0 {
            info!(deleted, "Collected orphaned workloads");
        }
        Ok(deleted)
    }

    async fn list<R>(&self, ctx: &CallContext) -> Result<Vec<R>>
    where
        R: Resource,
        InMemoryCluster: ObjectStore<R>,
    {
        ObjectStore::<R>::list(self.cluster.as_ref(), ctx, &Labels::new())
            .await
            .with_context(|| format!("failed to list {}", R::KIND))
    }

    async fn delete<R>(&self, ctx: &CallContext, key: &ObjectKey) -> Result<()>
    where
        R: Resource,
        InMemoryCluster: ObjectStore<R>,
    {
        ObjectStore::<R>::delete(self.cluster.as_ref(), ctx, key)
            .await
            .ignore_not_found()
            .with_context(|| format!("failed to collect {} {key}", R::KIND))?;
        debug!(kind = R::KIND, %key, "Collected orphan");
        Ok(())
    }
}

/// Keys of `objects` controlled by a record of `owner_kind` not in `live`.
fn orphans<R: Resource>(
    objects: &[R],
    owner_kind: &str,
    live: &HashSet<String>,
) -> Vec<ObjectKey> {
    objects
        .iter()
        .map(Resource::metadata)
        .filter(|meta| {
            meta.controller_ref().is_some_and(|owner| {
                owner.api_version == API_VERSION
                    && owner.kind == owner_kind
                    && !live.contains(&owner.uid)
            })
        })
        .map(ObjectMeta::key)
        .collect()
}

fn uids<R: Record>(records: &[R]) -> HashSet<String> {
    records.iter().map(|r| r.metadata().uid.clone()).collect()
}

//! Stand-in for the node agent: drives in-memory workloads and jobs the way
//! a real cluster would, so the controllers have live status to observe.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use converge_core::naming::instance_name;
use converge_core::{CallContext, ControllerReference, ObjectMeta, OwnerSetter, Result, ResultExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{Instance, Job, JobPhase, Labels, Workload};
use crate::store::{InMemoryCluster, ObjectStore};

/// Simulated run time and tick interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorConfig {
    pub tick: Duration,
    /// How long a job stays active before it succeeds.
    pub task_duration: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            task_duration: Duration::from_secs(3),
        }
    }
}

pub struct ClusterSimulator {
    cluster: Arc<InMemoryCluster>,
    config: SimulatorConfig,
}

impl ClusterSimulator {
    pub fn new(cluster: Arc<InMemoryCluster>, config: SimulatorConfig) -> Self {
        Self { cluster, config }
    }

    /// Tick until `stop` flips to true.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&CallContext::background()).await {
                        warn!(error = %e, "Simulator tick failed");
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!("Simulator stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Advance every workload and job by one step.
    ///
    /// # Errors
    ///
    /// Returns the first store failure; conflicts with concurrent writers
    /// are left for the next tick.
    pub async fn tick(&self, ctx: &CallContext) -> Result<()> {
        let workloads: Vec<Workload> = self.cluster.list(ctx, &Labels::new()).await?;
        for workload in workloads {
            self.converge_instances(ctx, workload).await?;
        }

        let jobs: Vec<Job> = self.cluster.list(ctx, &Labels::new()).await?;
        for job in jobs {
            self.advance_job(ctx, job).await?;
        }
        Ok(())
    }

    async fn converge_instances(&self, ctx: &CallContext, workload: Workload) -> Result<()> {
        let desired = u32::try_from(workload.spec.replicas).unwrap_or(0);
        let existing: Vec<Instance> = self.cluster.list(ctx, &workload.spec.selector).await?;
        let present: BTreeSet<u32> = existing
            .iter()
            .filter(|i| owned_by(&i.metadata, &workload.metadata.uid))
            .map(|i| i.index)
            .collect();

        let surplus = existing
            .iter()
            .filter(|i| owned_by(&i.metadata, &workload.metadata.uid) && i.index >= desired);
        for instance in surplus {
            ObjectStore::<Instance>::delete(self.cluster.as_ref(), ctx, &instance.metadata.key())
                .await
                .ignore_not_found()?;
        }

        let owner = ControllerReference::new("converge.io/v1", "Workload", &workload.metadata);
        for index in (0..desired).filter(|i| !present.contains(i)) {
            let mut instance = Instance {
                metadata: ObjectMeta::new(
                    workload.metadata.namespace.clone(),
                    instance_name(&workload.metadata.name, index),
                ),
                index,
                ready: true,
            };
            instance.metadata.labels = workload.spec.selector.clone();
            owner.set_owner(&mut instance.metadata)?;
            if let Err(e) = self.cluster.create(ctx, instance).await {
                if !e.is_already_exists() {
                    return Err(e);
                }
            }
        }

        // Every instance comes up ready on creation.
        let ready = workload.spec.replicas.max(0);
        if workload.status.ready_replicas != ready || workload.status.replicas != ready {
            let mut observed = workload;
            observed.status.replicas = ready;
            observed.status.ready_replicas = ready;
            if let Err(e) = self.cluster.update_status(ctx, observed).await {
                if !e.is_conflict() {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn advance_job(&self, ctx: &CallContext, mut job: Job) -> Result<()> {
        let now = Utc::now();
        match job.status.phase {
            JobPhase::Pending => {
                job.status.phase = JobPhase::Active;
                job.status.start_time = Some(now);
            }
            JobPhase::Active => {
                let started = job.status.start_time.unwrap_or(now);
                let elapsed = now.signed_duration_since(started).to_std().unwrap_or_default();
                if elapsed < self.config.task_duration {
                    return Ok(());
                }
                job.status.phase = JobPhase::Succeeded;
                job.status.completion_time = Some(now);
            }
            JobPhase::Succeeded | JobPhase::Failed => return Ok(()),
        }

        debug!(job = %job.metadata.key(), phase = ?job.status.phase, "Advanced job");
        match self.cluster.update_status(ctx, job).await {
            Err(e) if !e.is_conflict() => Err(e),
            _ => Ok(()),
        }
    }
}

fn owned_by(meta: &ObjectMeta, uid: &str) -> bool {
    meta.owner_references.iter().any(|r| r.uid == uid)
}

//! Cluster object storage.
//!
//! [`ObjectStore`] is the resource-version-checked CRUD surface the Updater,
//! Stopper and clients are written against. [`InMemoryCluster`] implements
//! it for every runtime kind and reproduces owner-reference cascade on
//! delete.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use converge_core::{CallContext, Error, ObjectKey, ObjectMeta, Result, WorkloadIdentifier};
use tokio::sync::RwLock;
use tracing::debug;
use ulid::Ulid;

use crate::model::{
    DisruptionBudget, Instance, Job, Labels, Workload, identifier_selector,
};

/// An object kept in a cluster store.
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Copy the status subresource from `other`. Kinds without a status
    /// keep the default no-op.
    fn copy_status_from(&mut self, _other: &Self) {}
}

impl Resource for Workload {
    const KIND: &'static str = "Workload";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status;
    }
}

impl Resource for Instance {
    const KIND: &'static str = "Instance";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.ready = other.ready;
    }
}

impl Resource for DisruptionBudget {
    const KIND: &'static str = "DisruptionBudget";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Job {
    const KIND: &'static str = "Job";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

/// Resource-version-checked storage for one kind of object.
#[async_trait]
pub trait ObjectStore<R: Resource>: Send + Sync {
    /// Fetch one object; `NotFound` when absent.
    async fn get(&self, ctx: &CallContext, key: &ObjectKey) -> Result<R>;

    /// Every object whose labels match `selector`, across namespaces.
    async fn list(&self, ctx: &CallContext, selector: &Labels) -> Result<Vec<R>>;

    /// Store a new object, assigning uid and resource version.
    async fn create(&self, ctx: &CallContext, object: R) -> Result<R>;

    /// Replace the spec of an existing object. `Conflict` when the
    /// caller's resource version is stale.
    async fn update(&self, ctx: &CallContext, object: R) -> Result<R>;

    /// Replace only the status of an existing object.
    async fn update_status(&self, ctx: &CallContext, object: R) -> Result<R>;

    /// Remove an object and everything it owns; `NotFound` when absent.
    async fn delete(&self, ctx: &CallContext, key: &ObjectKey) -> Result<()>;
}

/// Look up the single workload labelled with `id`.
///
/// # Errors
///
/// `NotFound` when nothing matches, `Transport` when more than one
/// workload carries the identifier.
pub async fn find_workload(
    store: &dyn ObjectStore<Workload>,
    ctx: &CallContext,
    id: &WorkloadIdentifier,
) -> Result<Workload> {
    let mut matches = store
        .list(ctx, &identifier_selector(&id.guid, &id.version))
        .await?;
    match matches.len() {
        0 => Err(Error::not_found(Workload::KIND, id.to_string())),
        1 => matches
            .pop()
            .ok_or_else(|| Error::not_found(Workload::KIND, id.to_string())),
        n => Err(Error::transport(format!(
            "{n} workloads found for identifier {id}"
        ))),
    }
}

struct Table<R> {
    objects: RwLock<BTreeMap<ObjectKey, R>>,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<R: Resource> Table<R> {
    /// Drop every object owned by `uid` and return the uids removed.
    async fn remove_owned_by(&self, uid: &str) -> Vec<String> {
        let mut objects = self.objects.write().await;
        let owned: Vec<ObjectKey> = objects
            .iter()
            .filter(|(_, o)| o.metadata().owner_references.iter().any(|r| r.uid == uid))
            .map(|(k, _)| k.clone())
            .collect();
        owned
            .iter()
            .filter_map(|key| objects.remove(key))
            .map(|o| o.metadata().uid.clone())
            .collect()
    }
}

/// Process-local cluster holding every runtime kind.
#[derive(Default)]
pub struct InMemoryCluster {
    workloads: Table<Workload>,
    instances: Table<Instance>,
    budgets: Table<DisruptionBudget>,
    jobs: Table<Job>,
    revision: AtomicU64,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Remove everything transitively owned by `uid`.
    pub async fn delete_dependents(&self, uid: &str) {
        let mut pending = vec![uid.to_string()];
        while let Some(owner) = pending.pop() {
            pending.extend(self.workloads.remove_owned_by(&owner).await);
            pending.extend(self.instances.remove_owned_by(&owner).await);
            pending.extend(self.budgets.remove_owned_by(&owner).await);
            pending.extend(self.jobs.remove_owned_by(&owner).await);
        }
    }
}

/// Maps a resource kind onto its table inside [`InMemoryCluster`].
trait ClusterResource: Resource {
    fn table(cluster: &InMemoryCluster) -> &Table<Self>;
}

impl ClusterResource for Workload {
    fn table(cluster: &InMemoryCluster) -> &Table<Self> {
        &cluster.workloads
    }
}

impl ClusterResource for Instance {
    fn table(cluster: &InMemoryCluster) -> &Table<Self> {
        &cluster.instances
    }
}

impl ClusterResource for DisruptionBudget {
    fn table(cluster: &InMemoryCluster) -> &Table<Self> {
        &cluster.budgets
    }
}

impl ClusterResource for Job {
    fn table(cluster: &InMemoryCluster) -> &Table<Self> {
        &cluster.jobs
    }
}

fn stale_write<R: Resource>(key: &ObjectKey, expected: u64, actual: u64) -> Error {
    Error::conflict(
        R::KIND,
        key.to_string(),
        format!("resource version {expected} is stale, current is {actual}"),
    )
}

#[async_trait]
#[allow(private_bounds)]
impl<R: ClusterResource> ObjectStore<R> for InMemoryCluster {
    async fn get(&self, ctx: &CallContext, key: &ObjectKey) -> Result<R> {
        ctx.check()?;
        R::table(self)
            .objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))
    }

    async fn list(&self, ctx: &CallContext, selector: &Labels) -> Result<Vec<R>> {
        ctx.check()?;
        Ok(R::table(self)
            .objects
            .read()
            .await
            .values()
            .filter(|o| o.metadata().matches_labels(selector))
            .cloned()
            .collect())
    }

    async fn create(&self, ctx: &CallContext, mut object: R) -> Result<R> {
        ctx.check()?;
        let key = object.metadata().key();
        let mut objects = R::table(self).objects.write().await;
        if objects.contains_key(&key) {
            return Err(Error::already_exists(R::KIND, key.to_string()));
        }

        let revision = self.next_revision();
        let meta = object.metadata_mut();
        meta.uid = Ulid::new().to_string();
        meta.resource_version = revision;
        meta.creation_timestamp = Some(Utc::now());

        debug!(kind = R::KIND, key = %key, revision, "Created object");
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update(&self, ctx: &CallContext, mut object: R) -> Result<R> {
        ctx.check()?;
        let key = object.metadata().key();
        let mut objects = R::table(self).objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))?;

        let (expected, actual) = (object.metadata().resource_version, stored.metadata().resource_version);
        if expected != actual {
            return Err(stale_write::<R>(&key, expected, actual));
        }

        object.copy_status_from(stored);
        let (uid, created) = (stored.metadata().uid.clone(), stored.metadata().creation_timestamp);
        let revision = self.next_revision();
        let meta = object.metadata_mut();
        meta.uid = uid;
        meta.creation_timestamp = created;
        meta.resource_version = revision;

        debug!(kind = R::KIND, key = %key, revision, "Updated object");
        objects.insert(key, object.clone());
        Ok(object)
    }

    async fn update_status(&self, ctx: &CallContext, object: R) -> Result<R> {
        ctx.check()?;
        let key = object.metadata().key();
        let mut objects = R::table(self).objects.write().await;
        let stored = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))?;

        let (expected, actual) = (object.metadata().resource_version, stored.metadata().resource_version);
        if expected != actual {
            return Err(stale_write::<R>(&key, expected, actual));
        }

        let mut updated = stored.clone();
        updated.copy_status_from(&object);
        updated.metadata_mut().resource_version = self.next_revision();
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, ctx: &CallContext, key: &ObjectKey) -> Result<()> {
        ctx.check()?;
        let removed = R::table(self)
            .objects
            .write()
            .await
            .remove(key)
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))?;

        debug!(kind = R::KIND, key = %key, "Deleted object");
        self.delete_dependents(&removed.metadata().uid).await;
        Ok(())
    }
}

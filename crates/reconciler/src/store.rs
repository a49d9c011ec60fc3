//! Declared-state store.
//!
//! [`RecordStore`] is the get/list/watch/patch contract the reconcilers and
//! controllers consume. [`InMemoryRecordStore`] backs it with a map and a
//! broadcast channel for watch events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use converge_core::{CallContext, Error, ObjectKey, Result};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use ulid::Ulid;

use crate::admission::{Admission, PassThrough};
use crate::patch::StatusPatch;
use crate::record::Record;

/// Capacity of the watch channel before slow subscribers lag.
const WATCH_CAPACITY: usize = 1024;

/// Change notification delivered to watchers.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<R> {
    Added(R),
    Modified(R),
    Deleted(R),
}

impl<R: Record> WatchEvent<R> {
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Added(r) | Self::Modified(r) | Self::Deleted(r) => r.metadata().key(),
        }
    }
}

/// Storage for one kind of declared record.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// Fetch one record; `NotFound` when absent.
    async fn get(&self, ctx: &CallContext, key: &ObjectKey) -> Result<R>;

    async fn list(&self, ctx: &CallContext) -> Result<Vec<R>>;

    /// Apply a merge patch to the status subresource only.
    async fn patch_status(&self, ctx: &CallContext, key: &ObjectKey, patch: &StatusPatch)
    -> Result<R>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>>;
}

/// Process-local record store.
pub struct InMemoryRecordStore<R> {
    records: RwLock<BTreeMap<ObjectKey, R>>,
    events: broadcast::Sender<WatchEvent<R>>,
    revision: AtomicU64,
    admission: Arc<dyn Admission<R>>,
}

impl<R: Record> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::with_admission(Arc::new(PassThrough))
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Run every author write through `admission` first.
    pub fn with_admission(admission: Arc<dyn Admission<R>>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            records: RwLock::new(BTreeMap::new()),
            events,
            revision: AtomicU64::new(0),
            admission,
        }
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    fn publish(&self, event: WatchEvent<R>) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Store a new record, assigning uid and resource version.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` for a duplicate key, or the admission rejection.
    pub async fn create(&self, ctx: &CallContext, mut record: R) -> Result<R> {
        ctx.check()?;
        self.admission.validate_create(&record)?;

        let key = record.metadata().key();
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(Error::already_exists(R::KIND, key.to_string()));
        }

        let revision = self.next_revision();
        let meta = record.metadata_mut();
        meta.uid = Ulid::new().to_string();
        meta.resource_version = revision;
        meta.creation_timestamp = Some(Utc::now());
        records.insert(key.clone(), record.clone());
        drop(records);

        debug!(kind = R::KIND, key = %key, revision, "Created record");
        self.publish(WatchEvent::Added(record.clone()));
        Ok(record)
    }

    /// Replace the spec of a record as its author would. Status is kept.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` on a stale resource version, or the admission
    /// rejection.
    pub async fn update(&self, ctx: &CallContext, mut record: R) -> Result<R> {
        ctx.check()?;
        let key = record.metadata().key();
        let mut records = self.records.write().await;
        let stored = records
            .get(&key)
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))?;
        self.admission.validate_update(stored, &record)?;

        let (expected, actual) = (
            record.metadata().resource_version,
            stored.metadata().resource_version,
        );
        if expected != actual {
            return Err(Error::conflict(
                R::KIND,
                key.to_string(),
                format!("resource version {expected} is stale, current is {actual}"),
            ));
        }

        record.copy_status_from(stored);
        let (uid, created) = (
            stored.metadata().uid.clone(),
            stored.metadata().creation_timestamp,
        );
        let revision = self.next_revision();
        let meta = record.metadata_mut();
        meta.uid = uid;
        meta.creation_timestamp = created;
        meta.resource_version = revision;
        records.insert(key.clone(), record.clone());
        drop(records);

        debug!(kind = R::KIND, key = %key, revision, "Updated record");
        self.publish(WatchEvent::Modified(record.clone()));
        Ok(record)
    }

    /// Remove a record.
    ///
    /// # Errors
    ///
    /// `NotFound` when absent, or the admission rejection.
    pub async fn delete(&self, ctx: &CallContext, key: &ObjectKey) -> Result<()> {
        ctx.check()?;
        let mut records = self.records.write().await;
        let stored = records
            .get(key)
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))?;
        self.admission.validate_delete(stored)?;
        let removed = records.remove(key);
        drop(records);

        if let Some(record) = removed {
            debug!(kind = R::KIND, key = %key, "Deleted record");
            self.publish(WatchEvent::Deleted(record));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    async fn get(&self, ctx: &CallContext, key: &ObjectKey) -> Result<R> {
        ctx.check()?;
        self.records
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))
    }

    async fn list(&self, ctx: &CallContext) -> Result<Vec<R>> {
        ctx.check()?;
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn patch_status(
        &self,
        ctx: &CallContext,
        key: &ObjectKey,
        patch: &StatusPatch,
    ) -> Result<R> {
        ctx.check()?;
        let mut records = self.records.write().await;
        let stored = records
            .get(key)
            .ok_or_else(|| Error::not_found(R::KIND, key.to_string()))?;

        if let Some(expected) = patch.precondition {
            let actual = stored.metadata().resource_version;
            if expected != actual {
                return Err(Error::conflict(
                    R::KIND,
                    key.to_string(),
                    format!("status patch expected version {expected}, current is {actual}"),
                ));
            }
        }

        let mut patched = patch.apply_to(stored)?;
        let revision = self.next_revision();
        patched.metadata_mut().resource_version = revision;
        records.insert(key.clone(), patched.clone());
        drop(records);

        debug!(kind = R::KIND, key = %key, revision, "Patched record status");
        self.publish(WatchEvent::Modified(patched.clone()));
        Ok(patched)
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<R>> {
        self.events.subscribe()
    }
}

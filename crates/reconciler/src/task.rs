//! Reconciler for run-to-completion tasks.
//!
//! A task is desired until it reaches a terminal status, then kept for the
//! configured TTL and garbage-collected. Record mutations stop once the task
//! is terminal, so the reconciler requeues itself for the expiry check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use converge_core::{
    CallContext, ControllerReference, ObjectKey, Result, ResultExt, TaskStatus,
    TaskWorkloadClient, ignore_already_exists,
};
use tracing::{debug, info, warn};

use crate::patch::StatusPatch;
use crate::record::{API_VERSION, Record, TaskRecord};
use crate::store::RecordStore;
use crate::types::{Clock, Reconcile, ReconcileResult, SystemClock};

pub struct TaskReconciler {
    records: Arc<dyn RecordStore<TaskRecord>>,
    client: Arc<dyn TaskWorkloadClient>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    workloads_namespace: Option<String>,
}

impl TaskReconciler {
    pub fn new(
        records: Arc<dyn RecordStore<TaskRecord>>,
        client: Arc<dyn TaskWorkloadClient>,
        ttl: Duration,
    ) -> Self {
        Self {
            records,
            client,
            clock: Arc::new(SystemClock),
            ttl,
            workloads_namespace: None,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_workloads_namespace(mut self, namespace: Option<String>) -> Self {
        self.workloads_namespace = namespace;
        self
    }

    /// Instant after which a task that ended at `end_time` is expired.
    fn expiry(&self, end_time: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| end_time.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left until `end_time + ttl`, zero once passed.
    fn until_expiry(&self, end_time: DateTime<Utc>) -> Duration {
        self.expiry(end_time)
            .signed_duration_since(self.clock.now())
            .to_std()
            .unwrap_or_default()
    }

    async fn collect_if_expired(
        &self,
        ctx: &CallContext,
        record: &TaskRecord,
        end_time: DateTime<Utc>,
    ) -> Result<ReconcileResult> {
        let guid = &record.spec.guid;
        if self.clock.now() <= self.expiry(end_time) {
            let remaining = self.until_expiry(end_time);
            debug!(task = %guid, remaining_ms = remaining.as_millis(), "Task not yet expired");
            return Ok(ReconcileResult::requeue_after(remaining.max(Duration::from_millis(1))));
        }

        let last = self
            .client
            .delete(ctx, guid)
            .await
            .ignore_not_found()
            .with_context(|| format!("failed to delete task {guid}"))?;
        match last {
            Some(status) => info!(task = %guid, last_status = %status, "Deleted expired task"),
            None => debug!(task = %guid, "Expired task already deleted"),
        }
        Ok(ReconcileResult::done())
    }

    async fn run(&self, ctx: &CallContext, record: &TaskRecord) -> Result<ReconcileResult> {
        let task = record.to_task().context("failed to translate task")?;
        let namespace = self
            .workloads_namespace
            .as_deref()
            .unwrap_or(&record.metadata.namespace);
        let owner = ControllerReference::new(API_VERSION, TaskRecord::KIND, &record.metadata);

        ignore_already_exists(self.client.desire(ctx, namespace, &task, &owner).await)
            .context("failed to desire task")?;

        let observed = self
            .client
            .get_status(ctx, &task.guid)
            .await
            .context("failed to get task status")?;
        let status = self.monotonic(&record.status, observed);

        let mut modified = record.clone();
        modified.status = status.clone();
        if let Some(patch) = StatusPatch::between(record, &modified)? {
            self.records
                .patch_status(ctx, &record.metadata.key(), &patch)
                .await
                .context("failed to update task status")?;
            debug!(task = %task.guid, status = %status.execution_status, "Patched task status");
        }

        match status.end_time {
            Some(end_time) if status.is_terminal() => {
                let delay = self.until_expiry(end_time);
                info!(
                    task = %task.guid,
                    status = %status.execution_status,
                    requeue_ms = delay.as_millis(),
                    "Task finished"
                );
                Ok(ReconcileResult::requeue_after(delay))
            }
            _ => Ok(ReconcileResult::done()),
        }
    }

    /// Refuse to move the recorded status backwards.
    fn monotonic(&self, recorded: &TaskStatus, observed: TaskStatus) -> TaskStatus {
        if recorded
            .execution_status
            .can_transition_to(observed.execution_status)
        {
            observed
        } else {
            warn!(
                recorded = %recorded.execution_status,
                observed = %observed.execution_status,
                "Ignoring backwards task status"
            );
            recorded.clone()
        }
    }
}

#[async_trait]
impl Reconcile for TaskReconciler {
    fn kind(&self) -> &'static str {
        TaskRecord::KIND
    }

    async fn reconcile(&self, ctx: &CallContext, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(record) = self
            .records
            .get(ctx, key)
            .await
            .ignore_not_found()
            .context("failed to get task")?
        else {
            debug!(%key, "Task no longer exists");
            return Ok(ReconcileResult::done());
        };

        match record.status.end_time {
            Some(end_time) if record.status.is_terminal() => {
                self.collect_if_expired(ctx, &record, end_time).await
            }
            _ => self.run(ctx, &record).await,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use converge_core::{Error, ExecutionStatus, ObjectMeta, OwnerSetter, Task};
    use tokio::sync::Mutex;

    use super::*;
    use crate::record::TaskSpec;
    use crate::store::InMemoryRecordStore;
    use crate::types::ManualClock;

    struct StubClient {
        desire_result: fn() -> Result<()>,
        status: TaskStatus,
        deletes: Mutex<Vec<String>>,
    }

    impl StubClient {
        fn new(status: TaskStatus) -> Self {
            Self {
                desire_result: || Ok(()),
                status,
                deletes: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskWorkloadClient for StubClient {
        async fn desire(
            &self,
            _ctx: &CallContext,
            _namespace: &str,
            _task: &Task,
            _owner: &dyn OwnerSetter,
        ) -> Result<()> {
            (self.desire_result)()
        }

        async fn get_status(&self, _ctx: &CallContext, _guid: &str) -> Result<TaskStatus> {
            Ok(self.status.clone())
        }

        async fn delete(&self, _ctx: &CallContext, guid: &str) -> Result<ExecutionStatus> {
            self.deletes.lock().await.push(guid.to_string());
            Ok(ExecutionStatus::Succeeded)
        }
    }

    async fn stored_task(store: &InMemoryRecordStore<TaskRecord>, status: TaskStatus) -> TaskRecord {
        let record = TaskRecord {
            metadata: ObjectMeta::new("apps", "t1"),
            spec: TaskSpec {
                guid: "t1".into(),
                image: "busybox".into(),
                ..Default::default()
            },
            status,
        };
        store.create(&CallContext::background(), record).await.unwrap()
    }

    #[tokio::test]
    async fn test_already_existing_workload_is_tolerated() {
        let store = InMemoryRecordStore::new_arc();
        let record = stored_task(&store, TaskStatus::default()).await;
        let started = Utc::now();
        let client = Arc::new(StubClient {
            desire_result: || Err(Error::already_exists("Job", "t1")),
            ..StubClient::new(TaskStatus::running(started))
        });
        let reconciler = TaskReconciler::new(store.clone(), client, Duration::from_secs(5));

        let result = reconciler
            .reconcile(&CallContext::background(), &record.metadata.key())
            .await
            .unwrap();

        assert_eq!(result, ReconcileResult::done());
        let stored = store
            .get(&CallContext::background(), &record.metadata.key())
            .await
            .unwrap();
        assert_eq!(stored.status, TaskStatus::running(started));
    }

    #[tokio::test]
    async fn test_desire_failure_is_surfaced() {
        let store = InMemoryRecordStore::new_arc();
        let record = stored_task(&store, TaskStatus::default()).await;
        let client = Arc::new(StubClient {
            desire_result: || Err(Error::transport("boom")),
            ..StubClient::new(TaskStatus::default())
        });
        let reconciler = TaskReconciler::new(store, client, Duration::from_secs(5));

        let err = reconciler
            .reconcile(&CallContext::background(), &record.metadata.key())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to desire task"));
    }

    #[tokio::test]
    async fn test_backwards_status_is_ignored() {
        let store = InMemoryRecordStore::new_arc();
        let started = Utc::now();
        let record = stored_task(&store, TaskStatus::running(started)).await;
        let client = Arc::new(StubClient::new(TaskStatus::default()));
        let reconciler = TaskReconciler::new(store.clone(), client, Duration::from_secs(5));

        reconciler
            .reconcile(&CallContext::background(), &record.metadata.key())
            .await
            .unwrap();

        let stored = store
            .get(&CallContext::background(), &record.metadata.key())
            .await
            .unwrap();
        assert_eq!(stored.status.execution_status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_unexpired_terminal_task_requeues_for_remaining_ttl() {
        let store = InMemoryRecordStore::new_arc();
        let now = Utc::now();
        let end = now - chrono::Duration::seconds(2);
        let record = stored_task(
            &store,
            TaskStatus::finished(ExecutionStatus::Failed, Some(end), end),
        )
        .await;
        let client = Arc::new(StubClient::new(TaskStatus::default()));
        let reconciler = TaskReconciler::new(store, client.clone(), Duration::from_secs(5))
            .with_clock(Arc::new(ManualClock::new(now)));

        let result = reconciler
            .reconcile(&CallContext::background(), &record.metadata.key())
            .await
            .unwrap();

        assert_eq!(result.requeue_after, Some(Duration::from_secs(3)));
        assert!(client.deletes.lock().await.is_empty());
    }
}

//! Behaviour tests for the task reconciler: desire, status mirroring and
//! TTL-driven deletion under a manual clock.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use converge_core::{
    CallContext, ControllerConfig, Error, ExecutionStatus, ObjectMeta, OwnerSetter, Result, Task,
    TaskStatus, TaskWorkloadClient,
};
use converge_reconciler::{
    InMemoryRecordStore, ManualClock, Reconcile, ReconcileResult, RecordStore, TaskReconciler,
    TaskRecord, TaskSpec,
};
use converge_workload::{ClusterSimulator, InMemoryCluster, SimulatorConfig, TaskClient};
use tokio::sync::Mutex;

const TTL: Duration = Duration::from_secs(5);

/// Task client that records calls and reports a scripted status.
#[derive(Default)]
struct RecordingClient {
    desired: Mutex<Vec<Task>>,
    deleted: Mutex<Vec<String>>,
    status: Mutex<TaskStatus>,
    exists: Mutex<bool>,
}

impl RecordingClient {
    async fn report(&self, status: TaskStatus) {
        *self.status.lock().await = status;
    }

    async fn desires(&self) -> usize {
        self.desired.lock().await.len()
    }

    async fn deletes(&self) -> usize {
        self.deleted.lock().await.len()
    }
}

#[async_trait]
impl TaskWorkloadClient for RecordingClient {
    async fn desire(
        &self,
        _ctx: &CallContext,
        _namespace: &str,
        task: &Task,
        _owner: &dyn OwnerSetter,
    ) -> Result<()> {
        self.desired.lock().await.push(task.clone());
        let mut exists = self.exists.lock().await;
        if *exists {
            return Err(Error::already_exists("Job", task.guid.clone()));
        }
        *exists = true;
        Ok(())
    }

    async fn get_status(&self, _ctx: &CallContext, _guid: &str) -> Result<TaskStatus> {
        Ok(self.status.lock().await.clone())
    }

    async fn delete(&self, _ctx: &CallContext, guid: &str) -> Result<ExecutionStatus> {
        self.deleted.lock().await.push(guid.to_string());
        let mut exists = self.exists.lock().await;
        if !*exists {
            return Err(Error::not_found("Job", guid));
        }
        *exists = false;
        Ok(self.status.lock().await.execution_status)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

fn task_record(status: TaskStatus) -> TaskRecord {
    TaskRecord {
        metadata: ObjectMeta::new("apps", "t1"),
        spec: TaskSpec {
            guid: "t1".into(),
            name: "migrate".into(),
            app_name: "dora".into(),
            space_name: "dev".into(),
            image: "busybox".into(),
            command: vec!["/bin/true".into()],
            ..Default::default()
        },
        status,
    }
}

struct Harness {
    store: Arc<InMemoryRecordStore<TaskRecord>>,
    client: Arc<RecordingClient>,
    clock: Arc<ManualClock>,
    reconciler: TaskReconciler,
    record: TaskRecord,
}

impl Harness {
    async fn new(status: TaskStatus) -> Self {
        let store = InMemoryRecordStore::new_arc();
        let record = store
            .create(&CallContext::background(), task_record(status))
            .await
            .unwrap();
        let client = Arc::new(RecordingClient::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let reconciler = TaskReconciler::new(store.clone(), client.clone(), TTL)
            .with_clock(clock.clone());
        Self {
            store,
            client,
            clock,
            reconciler,
            record,
        }
    }

    async fn reconcile(&self) -> ReconcileResult {
        self.reconciler
            .reconcile(&CallContext::background(), &self.record.metadata.key())
            .await
            .unwrap()
    }

    async fn stored(&self) -> TaskRecord {
        self.store
            .get(&CallContext::background(), &self.record.metadata.key())
            .await
            .unwrap()
    }
}

fn ttl() -> chrono::Duration {
    chrono::Duration::from_std(TTL).unwrap()
}

/// Given: task t1 declared at T0
/// When: it starts, runs and succeeds at T
/// Then: it is desired once, has no end time while running, requeues for
/// T + ttl and is deleted exactly once by the reconcile fired then
#[tokio::test]
async fn task_lifecycle_ends_in_single_delete() {
    let h = Harness::new(TaskStatus::default()).await;

    h.client.report(TaskStatus::default()).await;
    assert_eq!(h.reconcile().await, ReconcileResult::done());
    assert_eq!(h.client.desires().await, 1);
    assert!(h.client.desired.lock().await.iter().all(|t| t.guid == "t1" && t.image == "busybox"));

    let started = t0() + chrono::Duration::seconds(1);
    h.client.report(TaskStatus::running(started)).await;
    h.clock.set(started);
    assert_eq!(h.reconcile().await, ReconcileResult::done());
    let running = h.stored().await.status;
    assert_eq!(running.execution_status, ExecutionStatus::Running);
    assert_eq!(running.end_time, None);

    let finished = t0() + chrono::Duration::seconds(10);
    h.client
        .report(TaskStatus::finished(ExecutionStatus::Succeeded, Some(started), finished))
        .await;
    h.clock.set(finished);
    assert_eq!(h.reconcile().await, ReconcileResult::requeue_after(TTL));
    assert_eq!(h.stored().await.status.end_time, Some(finished));
    assert_eq!(h.client.deletes().await, 0);

    h.clock.set(finished + ttl() + chrono::Duration::milliseconds(1));
    assert_eq!(h.reconcile().await, ReconcileResult::done());
    assert_eq!(h.client.deletes().await, 1);
    // Only the first desire created the workload; later ones hit AlreadyExists.
    assert_eq!(h.client.desires().await, 3);
    assert!(!*h.client.exists.lock().await);
}

/// Given: a task that succeeded ttl + 1s ago
/// When: it is reconciled
/// Then: its workload is deleted
#[tokio::test]
async fn expired_task_is_deleted() {
    let end = t0() - ttl() - chrono::Duration::seconds(1);
    let h = Harness::new(TaskStatus::finished(ExecutionStatus::Succeeded, Some(end), end)).await;
    *h.client.exists.lock().await = true;

    assert_eq!(h.reconcile().await, ReconcileResult::done());
    assert_eq!(*h.client.deleted.lock().await, vec!["t1".to_string()]);
    assert_eq!(h.client.desires().await, 0);
}

/// Given: a task that succeeded ttl - 1s ago
/// When: it is reconciled
/// Then: nothing is deleted and it is requeued for the remaining second
#[tokio::test]
async fn unexpired_task_is_left_alone() {
    let end = t0() - ttl() + chrono::Duration::seconds(1);
    let h = Harness::new(TaskStatus::finished(ExecutionStatus::Succeeded, Some(end), end)).await;
    *h.client.exists.lock().await = true;

    let result = h.reconcile().await;

    assert_eq!(result.requeue_after, Some(Duration::from_secs(1)));
    assert_eq!(h.client.deletes().await, 0);
    assert_eq!(h.client.desires().await, 0);
}

#[tokio::test]
async fn already_deleted_workload_is_success() {
    let end = t0() - ttl() - chrono::Duration::seconds(1);
    let h = Harness::new(TaskStatus::finished(ExecutionStatus::Failed, None, end)).await;

    assert_eq!(h.reconcile().await, ReconcileResult::done());
    assert_eq!(h.client.deletes().await, 1);
}

/// Given: a running task whose status has not changed
/// When: it is reconciled twice
/// Then: the record is written only once
#[tokio::test]
async fn unchanged_task_is_idempotent() {
    let h = Harness::new(TaskStatus::default()).await;
    h.client.report(TaskStatus::running(t0())).await;

    h.reconcile().await;
    let first = h.stored().await;
    h.reconcile().await;
    let second = h.stored().await;

    assert_eq!(first, second);
    assert_eq!(h.client.desires().await, 2);
}

#[tokio::test]
async fn missing_task_record_is_success() {
    let h = Harness::new(TaskStatus::default()).await;
    h.store
        .delete(&CallContext::background(), &h.record.metadata.key())
        .await
        .unwrap();

    assert_eq!(h.reconcile().await, ReconcileResult::done());
    assert_eq!(h.client.desires().await, 0);
}

/// Given: the full in-memory stack
/// When: a task is reconciled while the simulator runs it to completion
/// Then: the record ends up succeeded and the job is gone after the TTL
#[tokio::test]
async fn task_runs_to_completion_on_the_cluster() {
    let ctx = CallContext::background();
    let cluster = InMemoryCluster::new_arc();
    let simulator = ClusterSimulator::new(
        cluster.clone(),
        SimulatorConfig {
            tick: Duration::from_millis(10),
            task_duration: Duration::ZERO,
        },
    );
    let store = InMemoryRecordStore::new_arc();
    let record = store
        .create(&ctx, task_record(TaskStatus::default()))
        .await
        .unwrap();
    let key = record.metadata.key();
    let client = Arc::new(TaskClient::in_memory(&cluster, &ControllerConfig::default()));
    let reconciler = TaskReconciler::new(store.clone(), client.clone(), Duration::ZERO);

    reconciler.reconcile(&ctx, &key).await.unwrap();
    simulator.tick(&ctx).await.unwrap();
    reconciler.reconcile(&ctx, &key).await.unwrap();
    assert_eq!(
        store.get(&ctx, &key).await.unwrap().status.execution_status,
        ExecutionStatus::Running
    );

    simulator.tick(&ctx).await.unwrap();
    reconciler.reconcile(&ctx, &key).await.unwrap();
    let finished = store.get(&ctx, &key).await.unwrap();
    assert_eq!(finished.status.execution_status, ExecutionStatus::Succeeded);
    assert!(finished.status.end_time.is_some());

    tokio::time::sleep(Duration::from_millis(5)).await;
    reconciler.reconcile(&ctx, &key).await.unwrap();
    assert!(client.get_status(&ctx, "t1").await.unwrap_err().is_not_found());
}

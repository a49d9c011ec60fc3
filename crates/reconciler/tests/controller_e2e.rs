//! End-to-end: controllers, simulator and garbage collector on the
//! in-memory cluster.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use converge_core::{CallContext, ControllerConfig, ExecutionStatus, ObjectMeta};
use converge_reconciler::{
    Controller, InMemoryRecordStore, LoopConfig, LrpReconciler, LrpRecord, LrpSpec,
    OwnerGarbageCollector, RecordStore, TaskReconciler, TaskRecord, TaskSpec,
};
use converge_workload::{
    ClusterSimulator, InMemoryCluster, Job, LrpClient, ObjectStore, SimulatorConfig, TaskClient,
    Workload,
};
use tokio::sync::watch;

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Given: the controller manager running on the in-memory cluster
/// When: an LRP and a task are declared and the LRP is later deleted
/// Then: the LRP becomes ready, the task succeeds and is collected after
/// its TTL, and the LRP's workload is garbage-collected
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lrp_and_task_converge_and_are_collected() {
    let ctx = CallContext::background();
    let config = ControllerConfig::default().task_ttl(Duration::from_millis(50));
    let loop_config = LoopConfig {
        resync_interval: Duration::from_millis(50),
        ..LoopConfig::from(&config)
    };

    let cluster = InMemoryCluster::new_arc();
    let lrps = InMemoryRecordStore::<LrpRecord>::new_arc();
    let tasks = InMemoryRecordStore::<TaskRecord>::new_arc();

    let lrp_controller = Arc::new(Controller::new(
        Arc::new(LrpReconciler::new(
            lrps.clone(),
            Arc::new(LrpClient::in_memory(&cluster, &config)),
        )),
        lrps.clone(),
        loop_config.clone(),
    ));
    let task_client = Arc::new(TaskClient::in_memory(&cluster, &config));
    let task_controller = Arc::new(Controller::new(
        Arc::new(TaskReconciler::new(tasks.clone(), task_client, config.task_ttl)),
        tasks.clone(),
        loop_config,
    ));
    let simulator = Arc::new(ClusterSimulator::new(
        cluster.clone(),
        SimulatorConfig {
            tick: Duration::from_millis(10),
            task_duration: Duration::from_millis(20),
        },
    ));
    let gc = Arc::new(OwnerGarbageCollector::new(
        cluster.clone(),
        lrps.clone(),
        tasks.clone(),
        Duration::from_millis(20),
    ));
    let (stop_tx, stop_rx) = watch::channel(false);

    let handles = vec![
        tokio::spawn({
            let c = lrp_controller.clone();
            async move { c.run().await.unwrap() }
        }),
        tokio::spawn({
            let c = task_controller.clone();
            async move { c.run().await.unwrap() }
        }),
        tokio::spawn({
            let (s, rx) = (simulator.clone(), stop_rx.clone());
            async move { s.run(rx).await }
        }),
        tokio::spawn({
            let (g, rx) = (gc.clone(), stop_rx.clone());
            async move { g.run(rx).await }
        }),
    ];

    let lrp = lrps
        .create(
            &ctx,
            LrpRecord {
                metadata: ObjectMeta::new("apps", "dora-web"),
                spec: LrpSpec {
                    guid: "g1".into(),
                    version: "v1".into(),
                    app_name: "dora".into(),
                    space_name: "dev".into(),
                    image: "img:1".into(),
                    instances: 2,
                    disk_mb: 64,
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let task = tasks
        .create(
            &ctx,
            TaskRecord {
                metadata: ObjectMeta::new("apps", "t1"),
                spec: TaskSpec {
                    guid: "t1".into(),
                    image: "busybox".into(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .unwrap();

    eventually("lrp ready", || {
        let (lrps, ctx, key) = (lrps.clone(), ctx.clone(), lrp.metadata.key());
        async move { lrps.get(&ctx, &key).await.unwrap().status.replicas == 2 }
    })
    .await;

    eventually("task succeeded and collected", || {
        let (tasks, cluster, ctx, key) =
            (tasks.clone(), cluster.clone(), ctx.clone(), task.metadata.key());
        async move {
            let record = tasks.get(&ctx, &key).await.unwrap();
            let jobs: Vec<Job> = cluster.list(&ctx, &Default::default()).await.unwrap();
            record.status.execution_status == ExecutionStatus::Succeeded && jobs.is_empty()
        }
    })
    .await;

    lrps.delete(&ctx, &lrp.metadata.key()).await.unwrap();
    eventually("workload collected", || {
        let (cluster, ctx) = (cluster.clone(), ctx.clone());
        async move {
            let workloads: Vec<Workload> = cluster.list(&ctx, &Default::default()).await.unwrap();
            workloads.is_empty()
        }
    })
    .await;

    lrp_controller.stop();
    task_controller.stop();
    stop_tx.send(true).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

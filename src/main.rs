//! # converge - controller manager
//!
//! Runs the LRP and Task controllers against an in-memory cluster.
//!
//! ## Startup Sequence
//!
//! 1. **Tracing** - `RUST_LOG`, falling back to `--log-level`
//! 2. **Config** - config file, then `CONVERGE_*` overrides, then validation
//! 3. **Stores** - in-memory record stores seeded from `--manifests`
//! 4. **Controllers** - LRP and Task controllers, owner GC and the cluster
//!    simulator, all sharing one stop signal
//!
//! ## Shutdown
//!
//! Ctrl-C flips the stop signal. Workers finish or abandon their current
//! reconcile and every task is awaited before exit.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

mod cli;
mod manifest;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use converge_core::ControllerConfig;
use converge_reconciler::{
    Controller, InMemoryRecordStore, LoopConfig, LrpReconciler, LrpRecord, OwnerGarbageCollector,
    TaskReconciler, TaskRecord,
};
use converge_workload::{ClusterSimulator, InMemoryCluster, LrpClient, SimulatorConfig, TaskClient};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

/// How often orphaned workloads are collected.
const GC_INTERVAL: Duration = Duration::from_secs(5);

/// Grace period for background tasks after the stop signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            manifests,
            log_level,
        } => {
            init_tracing(&log_level);
            let config = load_config(config.as_deref())?;
            run(config, manifests.as_deref()).await
        }
        Commands::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            let rendered =
                serde_json::to_string_pretty(&config).context("failed to render config")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let config = match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    config
        .with_env()
        .context("invalid CONVERGE_* environment override")
}

async fn run(config: ControllerConfig, manifests: Option<&Path>) -> Result<()> {
    info!(
        workers = config.workers,
        task_ttl_secs = config.task_ttl.as_secs(),
        namespace = config.workloads_namespace.as_deref().unwrap_or("<record>"),
        "converge starting"
    );

    let cluster = InMemoryCluster::new_arc();
    let lrps = InMemoryRecordStore::<LrpRecord>::new_arc();
    let tasks = InMemoryRecordStore::<TaskRecord>::new_arc();

    if let Some(path) = manifests {
        let loaded = manifest::load(path)?;
        manifest::seed(loaded, &lrps, &tasks).await?;
    }

    let loop_config = LoopConfig::from(&config);
    let lrp_controller = Arc::new(Controller::new(
        Arc::new(
            LrpReconciler::new(lrps.clone(), Arc::new(LrpClient::in_memory(&cluster, &config)))
                .with_workloads_namespace(config.workloads_namespace.clone()),
        ),
        lrps.clone(),
        loop_config.clone(),
    ));
    let task_controller = Arc::new(Controller::new(
        Arc::new(
            TaskReconciler::new(
                tasks.clone(),
                Arc::new(TaskClient::in_memory(&cluster, &config)),
                config.task_ttl,
            )
            .with_workloads_namespace(config.workloads_namespace.clone()),
        ),
        tasks.clone(),
        loop_config,
    ));
    let gc = Arc::new(OwnerGarbageCollector::new(
        cluster.clone(),
        lrps,
        tasks,
        GC_INTERVAL,
    ));
    let simulator = Arc::new(ClusterSimulator::new(cluster, SimulatorConfig::default()));
    let (stop_tx, stop_rx) = watch::channel(false);

    let handles: Vec<(&str, JoinHandle<()>)> = vec![
        ("lrp-controller", spawn_controller(lrp_controller.clone())),
        ("task-controller", spawn_controller(task_controller.clone())),
        ("gc", {
            let rx = stop_rx.clone();
            tokio::spawn(async move { gc.run(rx).await })
        }),
        ("simulator", {
            let rx = stop_rx;
            tokio::spawn(async move { simulator.run(rx).await })
        }),
    ];

    info!("converge is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    info!("Stopping controllers...");
    lrp_controller.stop();
    task_controller.stop();
    let _ = stop_tx.send(true);

    for (name, handle) in handles {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "Task panicked"),
            Err(_) => warn!(task = name, "Task did not stop within the grace period"),
        }
    }

    info!("converge stopped gracefully");
    Ok(())
}

fn spawn_controller<R>(controller: Arc<Controller<R>>) -> JoinHandle<()>
where
    R: converge_reconciler::Record,
{
    tokio::spawn(async move {
        if let Err(e) = controller.run().await {
            error!(error = %e, "Controller exited with error");
        }
    })
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }
}

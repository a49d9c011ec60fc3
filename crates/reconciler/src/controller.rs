//! Watch-driven controller loop.
//!
//! A [`Controller`] watches one kind of record, feeds changed keys into a
//! [`WorkQueue`] and runs a fixed pool of workers that call the kind's
//! [`Reconcile`] implementation. Failed keys are requeued with per-key
//! exponential backoff; a periodic resync relists every record.

use std::sync::Arc;
use std::time::Duration;

use converge_core::{CallContext, ControllerConfig, ObjectKey, RequeueBackoff, Result, ResultExt};
use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, info_span, warn};

use crate::queue::WorkQueue;
use crate::record::Record;
use crate::store::RecordStore;
use crate::types::Reconcile;

/// Floor for the relist period; a zero interval would never yield.
const MIN_RESYNC_INTERVAL: Duration = Duration::from_millis(10);

/// Knobs for one controller.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Concurrent reconciles.
    pub workers: usize,
    /// Interval between full relists.
    pub resync_interval: Duration,
    /// Deadline for a single reconcile.
    pub reconcile_timeout: Duration,
    /// Backoff for failed keys.
    pub backoff: RequeueBackoff,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for LoopConfig {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            resync_interval: config.resync_interval,
            reconcile_timeout: config.reconcile_timeout,
            backoff: config.requeue_backoff.clone(),
        }
    }
}

/// Drives one [`Reconcile`] implementation from a record store.
pub struct Controller<R: Record> {
    reconciler: Arc<dyn Reconcile>,
    records: Arc<dyn RecordStore<R>>,
    queue: WorkQueue<ObjectKey>,
    config: LoopConfig,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl<R: Record> Controller<R> {
    pub fn new(
        reconciler: Arc<dyn Reconcile>,
        records: Arc<dyn RecordStore<R>>,
        config: LoopConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            records,
            queue: WorkQueue::new(config.backoff.clone()),
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run until stopped.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial listing fails.
    pub async fn run(&self) -> Result<()> {
        let kind = self.reconciler.kind();
        info!(kind, workers = self.config.workers, "Starting controller");

        // Subscribe before listing so no change falls between the two.
        let events = self.records.watch();
        self.enqueue_all()
            .await
            .with_context(|| format!("failed to list {kind} records"))?;

        let workers = join_all((0..self.config.workers).map(|id| self.worker(id)));
        futures::join!(
            self.watch_records(events),
            self.resync(),
            self.shutdown_on_stop(),
            workers,
        );

        info!(kind, "Controller stopped");
        Ok(())
    }

    /// Queue `key` for reconciliation.
    pub async fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key).await;
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }

    async fn enqueue_all(&self) -> Result<usize> {
        let records = self.records.list(&CallContext::from_signal(self.stop_rx.clone())).await?;
        let count = records.len();
        for record in records {
            self.queue.add(record.metadata().key()).await;
        }
        debug!(kind = self.reconciler.kind(), count, "Enqueued all records");
        Ok(count)
    }

    async fn watch_records(&self, mut events: broadcast::Receiver<crate::store::WatchEvent<R>>) {
        let mut stop = self.stop_rx.clone();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.queue.add(event.key()).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(kind = self.reconciler.kind(), missed, "Watch lagged, relisting");
                        if let Err(e) = self.enqueue_all().await {
                            error!(kind = self.reconciler.kind(), error = %e, "Relist failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(kind = self.reconciler.kind(), "Watch closed");
                        return;
                    }
                },
                () = stopped(&mut stop) => return,
            }
        }
    }

    async fn resync(&self) {
        let mut stop = self.stop_rx.clone();
        let mut interval =
            tokio::time::interval(self.config.resync_interval.max(MIN_RESYNC_INTERVAL));
        // The initial listing already covered the first tick.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.enqueue_all().await {
                        error!(kind = self.reconciler.kind(), error = %e, "Resync failed");
                    }
                }
                () = stopped(&mut stop) => return,
            }
        }
    }

    async fn shutdown_on_stop(&self) {
        let mut stop = self.stop_rx.clone();
        stopped(&mut stop).await;
        self.queue.shutdown().await;
    }

    async fn worker(&self, id: usize) {
        debug!(kind = self.reconciler.kind(), worker = id, "Worker started");
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key).await;
        }
        debug!(kind = self.reconciler.kind(), worker = id, "Worker stopped");
    }

    async fn process(&self, key: &ObjectKey) {
        let kind = self.reconciler.kind();
        let span = info_span!("reconcile", kind, namespace = %key.namespace, name = %key.name);
        let ctx = CallContext::from_signal(self.stop_rx.clone())
            .with_timeout(self.config.reconcile_timeout)
            .with_span(span);

        let result = ctx.run(self.reconciler.reconcile(&ctx, key)).await;
        let stopping = *self.stop_rx.borrow();
        match result {
            Ok(result) => {
                self.queue.forget(key).await;
                if let Some(delay) = result.requeue_after {
                    debug!(kind, %key, delay_ms = delay.as_millis(), "Requeueing");
                    self.queue.add_after(key.clone(), delay);
                }
            }
            Err(e) if e.is_cancelled() && stopping => {
                debug!(kind, %key, "Reconcile interrupted by shutdown");
            }
            Err(e) => {
                let retries = self.queue.retries(key).await;
                let delay = self.queue.add_rate_limited(key.clone()).await;
                if e.is_permanent() {
                    error!(kind, %key, retries, delay_ms = delay.as_millis(), error = %e, "Reconcile failed");
                } else {
                    warn!(kind, %key, retries, delay_ms = delay.as_millis(), error = %e, "Reconcile failed, retrying");
                }
            }
        }
    }
}

/// Resolves once the stop flag is set.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Handle to stop a running controller.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

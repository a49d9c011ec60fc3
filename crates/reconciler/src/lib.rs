//! Reconciliation for declared LRP and Task records.
//!
//! Authors declare [`LrpRecord`]s and [`TaskRecord`]s in a [`RecordStore`].
//! A [`Controller`] per kind watches the store, queues changed keys and
//! drives the kind's reconciler, which converges runtime workloads through
//! the workload client contracts in `converge-core`.
//!
//! - [`LrpReconciler`]: desire a missing workload, otherwise update it and
//!   mirror its ready replica count into the record status
//! - [`TaskReconciler`]: desire the task, mirror its status, and delete the
//!   workload once the finished task outlives its TTL
//! - [`OwnerGarbageCollector`]: remove workloads whose record is gone
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use converge_core::ControllerConfig;
//! use converge_reconciler::{Controller, InMemoryRecordStore, LoopConfig, LrpReconciler};
//! use converge_workload::{InMemoryCluster, LrpClient};
//!
//! let config = ControllerConfig::default();
//! let cluster = InMemoryCluster::new_arc();
//! let records = InMemoryRecordStore::new_arc();
//! let client = Arc::new(LrpClient::in_memory(&cluster, &config));
//! let reconciler = Arc::new(LrpReconciler::new(records.clone(), client));
//! let controller = Controller::new(reconciler, records, LoopConfig::from(&config));
//! controller.run().await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod admission;
pub mod controller;
pub mod gc;
pub mod lrp;
pub mod patch;
pub mod queue;
pub mod record;
pub mod store;
pub mod task;
pub mod types;

pub use admission::{Admission, PassThrough};
pub use controller::{Controller, LoopConfig, LoopStopper};
pub use gc::OwnerGarbageCollector;
pub use lrp::LrpReconciler;
pub use patch::StatusPatch;
pub use queue::WorkQueue;
pub use record::{API_VERSION, LrpRecord, LrpSpec, Record, TaskRecord, TaskSpec};
pub use store::{InMemoryRecordStore, RecordStore, WatchEvent};
pub use task::TaskReconciler;
pub use types::{Clock, ManualClock, Reconcile, ReconcileResult, SystemClock};

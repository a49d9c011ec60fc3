//! Runtime workloads for converge.
//!
//! This crate owns everything on the cluster side of the workload client
//! contracts: the object model, resource-version-checked stores, the
//! translation from client models to runtime objects, the conflict-retrying
//! [`Updater`], the [`Stopper`], and the [`LrpClient`] / [`TaskClient`]
//! implementations the reconcilers drive.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod lrp_client;
pub mod model;
pub mod pdb;
pub mod simulator;
pub mod stopper;
pub mod store;
pub mod task_client;
pub mod translate;
pub mod updater;

pub use lrp_client::LrpClient;
pub use model::{DisruptionBudget, Instance, Job, JobPhase, JobStatus, Workload};
pub use pdb::DisruptionBudgets;
pub use simulator::{ClusterSimulator, SimulatorConfig};
pub use stopper::Stopper;
pub use store::{InMemoryCluster, ObjectStore, Resource, find_workload};
pub use task_client::TaskClient;
pub use translate::TranslateOptions;
pub use updater::Updater;

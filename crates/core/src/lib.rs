//! Core types, errors, and primitives shared by the converge controllers.
//!
//! - [`error`] / [`result`]: typed errors with phase context and the
//!   not-found / already-exists tolerance helpers
//! - [`retry`]: bounded retry combinators for optimistic concurrency
//! - [`context`]: per-call deadline, cancellation and tracing span
//! - [`config`]: controller configuration
//! - [`api`], [`meta`], [`client`]: workload models and the workload
//!   client contracts the reconcilers consume

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod api;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod meta;
pub mod naming;
pub mod result;
pub mod retry;

pub use api::{
    ExecutionStatus, Healthcheck, Lrp, LrpStatus, PrivateRegistry, Sidecar, Task, TaskStatus,
    VolumeMount, WorkloadIdentifier,
};
pub use client::{LrpWorkloadClient, TaskWorkloadClient};
pub use config::{ControllerConfig, RequeueBackoff};
pub use context::{CallContext, CancelHandle};
pub use error::Error;
pub use meta::{ControllerReference, NoOwner, ObjectKey, ObjectMeta, OwnerReference, OwnerSetter};
pub use result::{Result, ResultExt, ignore_already_exists};
pub use retry::{RetryConfig, retry_if, retry_on_conflict};

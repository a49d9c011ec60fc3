//! Workload client contracts consumed by the reconcilers.
//!
//! Any backend that can create, update, inspect and delete runtime
//! workloads implements these traits; tests substitute recording fakes.

use async_trait::async_trait;

use crate::api::{ExecutionStatus, Lrp, LrpStatus, Task, TaskStatus, WorkloadIdentifier};
use crate::context::CallContext;
use crate::meta::OwnerSetter;
use crate::result::Result;

/// Runtime operations for long-running processes.
#[async_trait]
pub trait LrpWorkloadClient: Send + Sync {
    /// Create the runtime workload for `lrp` in `namespace`, linking it to
    /// its declared record through `owner`.
    async fn desire(
        &self,
        ctx: &CallContext,
        namespace: &str,
        lrp: &Lrp,
        owner: &dyn OwnerSetter,
    ) -> Result<()>;

    /// Read back the workload as an [`Lrp`]; `NotFound` when absent.
    async fn get(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<Lrp>;

    /// Apply instance count, image and last-updated marker to the workload.
    async fn update(&self, ctx: &CallContext, lrp: &Lrp) -> Result<()>;

    /// Observed status; `NotFound` when absent.
    async fn get_status(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<LrpStatus>;

    /// Delete the whole workload; absence is success.
    async fn delete(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<()>;

    /// Delete one numbered instance; absence is success.
    async fn stop_instance(
        &self,
        ctx: &CallContext,
        id: &WorkloadIdentifier,
        index: u32,
    ) -> Result<()>;
}

/// Runtime operations for run-to-completion tasks.
#[async_trait]
pub trait TaskWorkloadClient: Send + Sync {
    /// Create the task workload; `AlreadyExists` when it is already there.
    async fn desire(
        &self,
        ctx: &CallContext,
        namespace: &str,
        task: &Task,
        owner: &dyn OwnerSetter,
    ) -> Result<()>;

    /// Observed status; `NotFound` when absent.
    async fn get_status(&self, ctx: &CallContext, guid: &str) -> Result<TaskStatus>;

    /// Delete the task workload and return its last known state.
    async fn delete(&self, ctx: &CallContext, guid: &str) -> Result<ExecutionStatus>;
}

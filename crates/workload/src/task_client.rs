//! [`TaskWorkloadClient`] backed by a job store.

use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{
    CallContext, ControllerConfig, Error, ExecutionStatus, OwnerSetter, Result, ResultExt, Task,
    TaskStatus, TaskWorkloadClient,
};
use tracing::info;

use crate::model::{Job, task_selector};
use crate::store::{InMemoryCluster, ObjectStore, Resource};
use crate::translate::{TranslateOptions, job_status_to_task_status, task_to_job};

pub struct TaskClient {
    jobs: Arc<dyn ObjectStore<Job>>,
    options: TranslateOptions,
}

impl TaskClient {
    pub fn new(jobs: Arc<dyn ObjectStore<Job>>, options: TranslateOptions) -> Self {
        Self { jobs, options }
    }

    pub fn in_memory(cluster: &Arc<InMemoryCluster>, config: &ControllerConfig) -> Self {
        Self::new(
            cluster.clone(),
            TranslateOptions {
                service_account: None,
                registry_secret_name: config.registry_secret_name.clone(),
            },
        )
    }

    async fn find_job(&self, ctx: &CallContext, guid: &str) -> Result<Job> {
        let mut jobs = self.jobs.list(ctx, &task_selector(guid)).await?;
        match jobs.len() {
            0 | 1 => jobs.pop().ok_or_else(|| Error::not_found(Job::KIND, guid)),
            n => Err(Error::transport(format!("{n} jobs found for task {guid}"))),
        }
    }
}

#[async_trait]
impl TaskWorkloadClient for TaskClient {
    async fn desire(
        &self,
        ctx: &CallContext,
        namespace: &str,
        task: &Task,
        owner: &dyn OwnerSetter,
    ) -> Result<()> {
        let mut job = task_to_job(namespace, task, &self.options)?;
        owner.set_owner(&mut job.metadata)?;

        let created = self.jobs.create(ctx, job).await?;
        info!(task = %task.guid, job = %created.metadata.key(), "Desired task");
        Ok(())
    }

    async fn get_status(&self, ctx: &CallContext, guid: &str) -> Result<TaskStatus> {
        let job = self.find_job(ctx, guid).await?;
        Ok(job_status_to_task_status(&job.status))
    }

    async fn delete(&self, ctx: &CallContext, guid: &str) -> Result<ExecutionStatus> {
        let job = self.find_job(ctx, guid).await?;
        let key = job.metadata.key();
        self.jobs
            .delete(ctx, &key)
            .await
            .with_context(|| format!("failed to delete job {key}"))?;

        let last = job_status_to_task_status(&job.status).execution_status;
        info!(task = %guid, job = %key, status = %last, "Deleted task");
        Ok(last)
    }
}

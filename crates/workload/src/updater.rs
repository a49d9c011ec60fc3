//! Conflict-retrying workload updates.
//!
//! The whole read-modify-write cycle is retried on a write conflict, so a
//! concurrent writer is never overwritten without a re-read.

use std::sync::Arc;

use converge_core::{CallContext, Lrp, Result, ResultExt, RetryConfig, retry_on_conflict};
use tracing::{debug, info};

use crate::model::{ANNOTATION_LAST_UPDATED, APPLICATION_CONTAINER_NAME, Workload};
use crate::pdb::DisruptionBudgets;
use crate::store::{ObjectStore, find_workload};

/// Applies instance count, image and last-updated marker to a live workload.
#[derive(Clone)]
pub struct Updater {
    workloads: Arc<dyn ObjectStore<Workload>>,
    budgets: DisruptionBudgets,
    retry: RetryConfig,
}

impl Updater {
    pub fn new(
        workloads: Arc<dyn ObjectStore<Workload>>,
        budgets: DisruptionBudgets,
        retry: RetryConfig,
    ) -> Self {
        Self {
            workloads,
            budgets,
            retry,
        }
    }

    /// Update the workload for `lrp`, then bring its disruption budget in
    /// line with the new instance count.
    ///
    /// # Errors
    ///
    /// `NotFound` when no workload carries the identifier. A conflict that
    /// outlasts the retry budget is returned as the last conflict seen.
    /// Budget failures are wrapped separately from spec-update failures.
    pub async fn update(&self, ctx: &CallContext, lrp: &Lrp) -> Result<()> {
        let id = lrp.identifier();
        let workload = retry_on_conflict(&self.retry, ctx, || self.update_once(ctx, lrp))
            .await
            .with_context(|| format!("failed to update workload for {id}"))?;

        self.budgets
            .sync(ctx, &workload, lrp.target_instances)
            .await
            .with_context(|| format!("failed to sync disruption budget for {id}"))
    }

    async fn update_once(&self, ctx: &CallContext, lrp: &Lrp) -> Result<Workload> {
        let mut workload = find_workload(self.workloads.as_ref(), ctx, &lrp.identifier()).await?;
        if !apply_update(&mut workload, lrp) {
            debug!(workload = %workload.metadata.key(), "Workload already up to date");
            return Ok(workload);
        }

        let updated = self.workloads.update(ctx, workload).await?;
        info!(
            workload = %updated.metadata.key(),
            replicas = updated.spec.replicas,
            "Updated workload"
        );
        Ok(updated)
    }
}

/// Copy the mutable fields of `lrp` onto `workload`; returns whether
/// anything changed. A missing application container or an empty image
/// leaves the image as is.
pub fn apply_update(workload: &mut Workload, lrp: &Lrp) -> bool {
    let mut changed = false;

    if workload.spec.replicas != lrp.target_instances {
        workload.spec.replicas = lrp.target_instances;
        changed = true;
    }

    let marker = workload.metadata.annotations.get(ANNOTATION_LAST_UPDATED);
    if marker != Some(&lrp.last_updated) {
        workload
            .metadata
            .annotations
            .insert(ANNOTATION_LAST_UPDATED.to_string(), lrp.last_updated.clone());
        changed = true;
    }

    if let Some(container) = workload
        .spec
        .template
        .containers
        .iter_mut()
        .find(|c| c.name == APPLICATION_CONTAINER_NAME)
    {
        if !lrp.image.is_empty() && container.image != lrp.image {
            container.image.clone_from(&lrp.image);
            changed = true;
        }
    }

    changed
}

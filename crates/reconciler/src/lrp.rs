//! Reconciler for long-running processes.

use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{
    CallContext, ControllerReference, Error, LrpWorkloadClient, ObjectKey, Result, ResultExt,
    WorkloadIdentifier,
};
use tracing::{debug, info};

use crate::patch::StatusPatch;
use crate::record::{API_VERSION, LrpRecord, Record};
use crate::store::RecordStore;
use crate::types::{Reconcile, ReconcileResult};

/// Desire-if-absent, else update the workload and sync status back.
pub struct LrpReconciler {
    records: Arc<dyn RecordStore<LrpRecord>>,
    client: Arc<dyn LrpWorkloadClient>,
    workloads_namespace: Option<String>,
}

impl LrpReconciler {
    pub fn new(records: Arc<dyn RecordStore<LrpRecord>>, client: Arc<dyn LrpWorkloadClient>) -> Self {
        Self {
            records,
            client,
            workloads_namespace: None,
        }
    }

    /// Create workloads in `namespace` instead of the record's own.
    #[must_use]
    pub fn with_workloads_namespace(mut self, namespace: Option<String>) -> Self {
        self.workloads_namespace = namespace;
        self
    }

    async fn create_workload(&self, ctx: &CallContext, record: &LrpRecord) -> Result<()> {
        let lrp = record.to_lrp().context("failed to translate lrp")?;
        let namespace = self
            .workloads_namespace
            .as_deref()
            .unwrap_or(&record.metadata.namespace);
        let owner = ControllerReference::new(API_VERSION, LrpRecord::KIND, &record.metadata);

        self.client
            .desire(ctx, namespace, &lrp, &owner)
            .await
            .context("failed to desire lrp")?;
        info!(id = %lrp.identifier(), namespace, "Created workload for lrp");
        Ok(())
    }

    async fn update_workload(&self, ctx: &CallContext, record: &LrpRecord) -> Result<()> {
        let lrp = record.to_lrp().context("failed to translate lrp")?;

        let status = self
            .sync_status(ctx, record, &lrp.identifier())
            .await
            .context("failed to update lrp status");
        let update = self
            .client
            .update(ctx, &lrp)
            .await
            .context("failed to update workload");

        Error::collect([status.err(), update.err()].into_iter().flatten().collect())
    }

    async fn sync_status(
        &self,
        ctx: &CallContext,
        record: &LrpRecord,
        id: &WorkloadIdentifier,
    ) -> Result<()> {
        let observed = self.client.get_status(ctx, id).await?;

        let mut modified = record.clone();
        modified.status = observed;
        let Some(patch) = StatusPatch::between(record, &modified)? else {
            debug!(%id, replicas = observed.replicas, "Lrp status unchanged");
            return Ok(());
        };

        self.records
            .patch_status(ctx, &record.metadata.key(), &patch)
            .await?;
        debug!(%id, replicas = observed.replicas, "Patched lrp status");
        Ok(())
    }
}

#[async_trait]
impl Reconcile for LrpReconciler {
    fn kind(&self) -> &'static str {
        LrpRecord::KIND
    }

    async fn reconcile(&self, ctx: &CallContext, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(record) = self
            .records
            .get(ctx, key)
            .await
            .ignore_not_found()
            .context("failed to get lrp")?
        else {
            debug!(%key, "Lrp no longer exists");
            return Ok(ReconcileResult::done());
        };

        let id = record.identifier();
        let existing = self
            .client
            .get(ctx, &id)
            .await
            .ignore_not_found()
            .with_context(|| format!("failed to get workload for {id}"))?;

        if existing.is_none() {
            self.create_workload(ctx, &record).await?;
        } else {
            self.update_workload(ctx, &record).await?;
        }
        Ok(ReconcileResult::done())
    }
}

//! [`LrpWorkloadClient`] backed by cluster object stores.

use std::sync::Arc;

use async_trait::async_trait;
use converge_core::{
    CallContext, ControllerConfig, Lrp, LrpStatus, LrpWorkloadClient, OwnerSetter, Result,
    ResultExt, WorkloadIdentifier,
};
use tracing::info;

use crate::model::Workload;
use crate::pdb::DisruptionBudgets;
use crate::stopper::Stopper;
use crate::store::{InMemoryCluster, ObjectStore, find_workload};
use crate::translate::{TranslateOptions, lrp_to_workload, workload_to_lrp};
use crate::updater::Updater;

pub struct LrpClient {
    workloads: Arc<dyn ObjectStore<Workload>>,
    budgets: DisruptionBudgets,
    updater: Updater,
    stopper: Stopper,
    options: TranslateOptions,
}

impl LrpClient {
    pub fn new(
        workloads: Arc<dyn ObjectStore<Workload>>,
        budgets: DisruptionBudgets,
        updater: Updater,
        stopper: Stopper,
        options: TranslateOptions,
    ) -> Self {
        Self {
            workloads,
            budgets,
            updater,
            stopper,
            options,
        }
    }

    /// Wire every collaborator to one in-memory cluster.
    pub fn in_memory(cluster: &Arc<InMemoryCluster>, config: &ControllerConfig) -> Self {
        let budgets = DisruptionBudgets::new(cluster.clone());
        Self::new(
            cluster.clone(),
            budgets.clone(),
            Updater::new(cluster.clone(), budgets, config.conflict_retry.clone()),
            Stopper::new(cluster.clone(), cluster.clone()),
            TranslateOptions {
                service_account: config.application_service_account.clone(),
                registry_secret_name: config.registry_secret_name.clone(),
            },
        )
    }
}

#[async_trait]
impl LrpWorkloadClient for LrpClient {
    async fn desire(
        &self,
        ctx: &CallContext,
        namespace: &str,
        lrp: &Lrp,
        owner: &dyn OwnerSetter,
    ) -> Result<()> {
        let mut workload = lrp_to_workload(namespace, lrp, &self.options)?;
        owner.set_owner(&mut workload.metadata)?;

        let created = self
            .workloads
            .create(ctx, workload)
            .await
            .context("failed to create workload")?;
        info!(
            id = %lrp.identifier(),
            workload = %created.metadata.key(),
            replicas = created.spec.replicas,
            "Desired workload"
        );

        self.budgets
            .sync(ctx, &created, lrp.target_instances)
            .await
            .context("failed to create disruption budget")
    }

    async fn get(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<Lrp> {
        let workload = find_workload(self.workloads.as_ref(), ctx, id).await?;
        workload_to_lrp(&workload)
    }

    async fn update(&self, ctx: &CallContext, lrp: &Lrp) -> Result<()> {
        self.updater.update(ctx, lrp).await
    }

    async fn get_status(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<LrpStatus> {
        let workload = find_workload(self.workloads.as_ref(), ctx, id).await?;
        Ok(LrpStatus {
            replicas: workload.status.ready_replicas,
        })
    }

    async fn delete(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<()> {
        self.stopper.stop(ctx, id).await
    }

    async fn stop_instance(
        &self,
        ctx: &CallContext,
        id: &WorkloadIdentifier,
        index: u32,
    ) -> Result<()> {
        self.stopper.stop_instance(ctx, id, index).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use converge_core::{ControllerReference, ObjectMeta};

    use super::*;
    use crate::model::{DisruptionBudget, Labels};

    fn lrp(instances: i32) -> Lrp {
        Lrp {
            guid: "g1".into(),
            version: "v1".into(),
            app_name: "dora".into(),
            space_name: "dev".into(),
            image: "img:1".into(),
            target_instances: instances,
            disk_mb: 256,
            ..Default::default()
        }
    }

    fn owner() -> ControllerReference {
        let meta = ObjectMeta {
            uid: "record-uid".into(),
            ..ObjectMeta::new("apps", "dora")
        };
        ControllerReference::new("converge.io/v1", "LRP", &meta)
    }

    #[tokio::test]
    async fn test_desire_then_get_round_trips() {
        let cluster = InMemoryCluster::new_arc();
        let client = LrpClient::in_memory(&cluster, &ControllerConfig::default());
        let ctx = CallContext::background();

        client.desire(&ctx, "apps", &lrp(3), &owner()).await.unwrap();
        let fetched = client.get(&ctx, &lrp(3).identifier()).await.unwrap();

        assert_eq!(fetched.target_instances, 3);
        assert_eq!(fetched.image, "img:1");
        let budgets: Vec<DisruptionBudget> = cluster.list(&ctx, &Labels::new()).await.unwrap();
        assert_eq!(budgets.len(), 1);
    }

    #[tokio::test]
    async fn test_desire_links_owner() {
        let cluster = InMemoryCluster::new_arc();
        let client = LrpClient::in_memory(&cluster, &ControllerConfig::default());
        let ctx = CallContext::background();

        client.desire(&ctx, "apps", &lrp(1), &owner()).await.unwrap();

        let workload = find_workload(cluster.as_ref(), &ctx, &lrp(1).identifier())
            .await
            .unwrap();
        assert_eq!(
            workload.metadata.controller_ref().map(|r| r.uid.as_str()),
            Some("record-uid")
        );
    }

    #[tokio::test]
    async fn test_status_reports_ready_replicas() {
        let cluster = InMemoryCluster::new_arc();
        let client = LrpClient::in_memory(&cluster, &ControllerConfig::default());
        let ctx = CallContext::background();
        client.desire(&ctx, "apps", &lrp(2), &owner()).await.unwrap();

        let mut workload = find_workload(cluster.as_ref(), &ctx, &lrp(2).identifier())
            .await
            .unwrap();
        workload.status.ready_replicas = 1;
        cluster.update_status(&ctx, workload).await.unwrap();

        let status = client.get_status(&ctx, &lrp(2).identifier()).await.unwrap();
        assert_eq!(status.replicas, 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let cluster = InMemoryCluster::new_arc();
        let client = LrpClient::in_memory(&cluster, &ControllerConfig::default());

        let err = client
            .get(&CallContext::background(), &WorkloadIdentifier::new("nope", "v1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}

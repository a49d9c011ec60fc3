//! Whole-workload and single-instance termination.
//!
//! A target that is already gone is success: the desired end state has been
//! reached.

use std::sync::Arc;

use converge_core::naming::instance_name;
use converge_core::{CallContext, Error, ObjectKey, Result, ResultExt, WorkloadIdentifier};
use tracing::{debug, info};

use crate::model::{Instance, Workload};
use crate::store::{ObjectStore, find_workload};

#[derive(Clone)]
pub struct Stopper {
    workloads: Arc<dyn ObjectStore<Workload>>,
    instances: Arc<dyn ObjectStore<Instance>>,
}

impl Stopper {
    pub fn new(
        workloads: Arc<dyn ObjectStore<Workload>>,
        instances: Arc<dyn ObjectStore<Instance>>,
    ) -> Self {
        Self {
            workloads,
            instances,
        }
    }

    /// Delete the workload for `id`.
    ///
    /// # Errors
    ///
    /// Lookup and delete failures other than not-found, wrapped with the
    /// identifier.
    pub async fn stop(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<()> {
        let Some(workload) = self.lookup(ctx, id).await? else {
            debug!(%id, "Workload already stopped");
            return Ok(());
        };

        let key = workload.metadata.key();
        self.workloads
            .delete(ctx, &key)
            .await
            .ignore_not_found()
            .with_context(|| format!("failed to delete workload {key}"))?;
        info!(%id, workload = %key, "Stopped workload");
        Ok(())
    }

    /// Delete instance `index` of the workload for `id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInstanceIndex`] when `index` is not below the
    /// workload's current replica count; otherwise lookup and delete
    /// failures other than not-found, wrapped with the identifier.
    pub async fn stop_instance(
        &self,
        ctx: &CallContext,
        id: &WorkloadIdentifier,
        index: u32,
    ) -> Result<()> {
        let Some(workload) = self.lookup(ctx, id).await? else {
            debug!(%id, index, "Workload already stopped");
            return Ok(());
        };

        let replicas = workload.spec.replicas;
        if i64::from(index) >= i64::from(replicas) {
            return Err(Error::InvalidInstanceIndex { index, replicas });
        }

        let key = ObjectKey::new(
            workload.metadata.namespace.clone(),
            instance_name(&workload.metadata.name, index),
        );
        let deleted = self
            .instances
            .delete(ctx, &key)
            .await
            .ignore_not_found()
            .with_context(|| format!("failed to delete instance {key}"))?;

        if deleted.is_some() {
            info!(%id, instance = %key, "Stopped instance");
        } else {
            debug!(%id, instance = %key, "Instance already gone");
        }
        Ok(())
    }

    async fn lookup(&self, ctx: &CallContext, id: &WorkloadIdentifier) -> Result<Option<Workload>> {
        find_workload(self.workloads.as_ref(), ctx, id)
            .await
            .ignore_not_found()
            .with_context(|| format!("failed to look up workload {id}"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use converge_core::{ControllerReference, ObjectMeta, OwnerSetter};

    use super::*;
    use crate::model::Labels;
    use crate::store::InMemoryCluster;
    use crate::translate::{TranslateOptions, lrp_to_workload};

    fn id() -> WorkloadIdentifier {
        WorkloadIdentifier::new("g1", "v1")
    }

    async fn running_workload(cluster: &Arc<InMemoryCluster>, replicas: u32) -> Workload {
        let ctx = CallContext::background();
        let lrp = converge_core::Lrp {
            guid: "g1".into(),
            version: "v1".into(),
            image: "img:1".into(),
            target_instances: i32::try_from(replicas).unwrap(),
            disk_mb: 1,
            ..Default::default()
        };
        let workload = lrp_to_workload("apps", &lrp, &TranslateOptions::default()).unwrap();
        let workload = cluster.create(&ctx, workload).await.unwrap();

        let owner = ControllerReference::new("converge.io/v1", "Workload", &workload.metadata);
        for index in 0..replicas {
            let mut instance = Instance {
                metadata: ObjectMeta::new("apps", instance_name(&workload.metadata.name, index)),
                index,
                ready: true,
            };
            owner.set_owner(&mut instance.metadata).unwrap();
            cluster.create(&ctx, instance).await.unwrap();
        }
        workload
    }

    async fn instance_names(cluster: &InMemoryCluster) -> Vec<String> {
        let instances: Vec<Instance> = cluster
            .list(&CallContext::background(), &Labels::new())
            .await
            .unwrap();
        instances.into_iter().map(|i| i.metadata.name).collect()
    }

    fn stopper(cluster: &Arc<InMemoryCluster>) -> Stopper {
        Stopper::new(cluster.clone(), cluster.clone())
    }

    #[tokio::test]
    async fn test_stop_deletes_workload_and_instances() {
        let cluster = InMemoryCluster::new_arc();
        running_workload(&cluster, 2).await;

        stopper(&cluster).stop(&CallContext::background(), &id()).await.unwrap();

        let ctx = CallContext::background();
        assert!(find_workload(cluster.as_ref(), &ctx, &id()).await.unwrap_err().is_not_found());
        assert!(instance_names(&cluster).await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_missing_workload_is_success() {
        let cluster = InMemoryCluster::new_arc();

        stopper(&cluster).stop(&CallContext::background(), &id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_instance_deletes_named_instance() {
        let cluster = InMemoryCluster::new_arc();
        let workload = running_workload(&cluster, 3).await;

        stopper(&cluster)
            .stop_instance(&CallContext::background(), &id(), 1)
            .await
            .unwrap();

        let names = instance_names(&cluster).await;
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&instance_name(&workload.metadata.name, 1)));
    }

    /// Given: a workload with 3 replicas
    /// When: instance 3 is stopped
    /// Then: the index is rejected and nothing is deleted
    #[tokio::test]
    async fn test_stop_instance_out_of_range() {
        let cluster = InMemoryCluster::new_arc();
        running_workload(&cluster, 3).await;

        let err = stopper(&cluster)
            .stop_instance(&CallContext::background(), &id(), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInstanceIndex { index: 3, replicas: 3 }));
        assert_eq!(instance_names(&cluster).await.len(), 3);
    }

    #[tokio::test]
    async fn test_stop_instance_of_missing_workload_is_success() {
        let cluster = InMemoryCluster::new_arc();

        stopper(&cluster)
            .stop_instance(&CallContext::background(), &id(), 7)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_instance_already_gone_is_success() {
        let cluster = InMemoryCluster::new_arc();
        let workload = running_workload(&cluster, 2).await;
        let ctx = CallContext::background();
        let key = ObjectKey::new("apps", instance_name(&workload.metadata.name, 0));
        ObjectStore::<Instance>::delete(cluster.as_ref(), &ctx, &key).await.unwrap();

        stopper(&cluster).stop_instance(&ctx, &id(), 0).await.unwrap();
    }
}

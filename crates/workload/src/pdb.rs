//! Disruption budget kept in step with a workload's replica count.

use std::sync::Arc;

use converge_core::{
    CallContext, ControllerReference, ObjectKey, ObjectMeta, OwnerSetter, Result, ResultExt,
    ignore_already_exists,
};
use tracing::debug;

use crate::model::{DisruptionBudget, Workload};
use crate::store::ObjectStore;

/// Fraction of instances that must stay up during voluntary disruption.
pub const MIN_AVAILABLE: &str = "50%";

/// Creates or removes the budget guarding a workload.
#[derive(Clone)]
pub struct DisruptionBudgets {
    store: Arc<dyn ObjectStore<DisruptionBudget>>,
}

impl DisruptionBudgets {
    pub fn new(store: Arc<dyn ObjectStore<DisruptionBudget>>) -> Self {
        Self { store }
    }

    /// A budget exists exactly when `instances > 1`.
    ///
    /// # Errors
    ///
    /// Returns store errors other than the tolerated already-exists on
    /// create and not-found on delete.
    pub async fn sync(&self, ctx: &CallContext, workload: &Workload, instances: i32) -> Result<()> {
        if instances > 1 {
            self.create(ctx, workload).await
        } else {
            self.delete(ctx, &workload.metadata.key()).await
        }
    }

    async fn create(&self, ctx: &CallContext, workload: &Workload) -> Result<()> {
        let mut budget = DisruptionBudget {
            metadata: ObjectMeta::new(
                workload.metadata.namespace.clone(),
                workload.metadata.name.clone(),
            ),
            min_available: MIN_AVAILABLE.to_string(),
            selector: workload.spec.selector.clone(),
        };
        budget.metadata.labels = workload.metadata.labels.clone();
        ControllerReference::new("converge.io/v1", "Workload", &workload.metadata)
            .set_owner(&mut budget.metadata)?;

        debug!(workload = %workload.metadata.key(), "Ensuring disruption budget");
        ignore_already_exists(self.store.create(ctx, budget).await.map(|_| ()))
    }

    async fn delete(&self, ctx: &CallContext, key: &ObjectKey) -> Result<()> {
        self.store.delete(ctx, key).await.ignore_not_found().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::model::Labels;
    use crate::store::InMemoryCluster;

    async fn stored_workload(cluster: &InMemoryCluster, ctx: &CallContext) -> Workload {
        let workload = Workload {
            metadata: ObjectMeta::new("apps", "dora"),
            ..Default::default()
        };
        cluster.create(ctx, workload).await.unwrap()
    }

    async fn budgets(cluster: &InMemoryCluster, ctx: &CallContext) -> Vec<DisruptionBudget> {
        cluster.list(ctx, &Labels::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_budget_follows_instance_count() {
        let cluster = InMemoryCluster::new_arc();
        let ctx = CallContext::background();
        let budgets_api = DisruptionBudgets::new(cluster.clone());
        let workload = stored_workload(&cluster, &ctx).await;

        budgets_api.sync(&ctx, &workload, 3).await.unwrap();
        budgets_api.sync(&ctx, &workload, 5).await.unwrap();
        let created = budgets(&cluster, &ctx).await;
        assert_eq!(created.len(), 1);
        assert_eq!(created.first().map(|b| b.min_available.as_str()), Some(MIN_AVAILABLE));

        budgets_api.sync(&ctx, &workload, 1).await.unwrap();
        budgets_api.sync(&ctx, &workload, 0).await.unwrap();
        assert!(budgets(&cluster, &ctx).await.is_empty());
    }
}

pub mod knative;
pub mod multimodelconfig;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodSpec;
use kube::{core::ObjectMeta, Resource};
use serve_api::component::{ComponentExtensionSpec, ComponentStatusSpec};

use crate::Result;

/// Desired state of a component workload, computed fresh on every pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComponentWorkload {
    pub metadata: ObjectMeta,
    pub extensions: ComponentExtensionSpec,
    pub pod_spec: PodSpec,
}

/// Persists component workloads on the orchestration platform.
#[async_trait]
pub trait WorkloadReconciler
where
    Self: Send + Sync,
{
    type Object: Resource + Send + Sync;

    /// Builds the managed object for `workload`, without touching the cluster.
    fn desired(&self, workload: ComponentWorkload) -> Self::Object;

    /// Drives the live object toward `object` and reports its observed state.
    ///
    /// Makes no write when the live object already matches.
    async fn reconcile(
        &self,
        object: Self::Object,
        prior: Option<&ComponentStatusSpec>,
    ) -> Result<ComponentStatusSpec>;
}

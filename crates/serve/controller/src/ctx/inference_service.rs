use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use kube::{
    api::{Patch, PatchParams},
    runtime::controller::Action,
    Api, Client, CustomResourceExt, Error, ResourceExt,
};
use serde_json::json;
use serve_api::{consts, inference_service::InferenceServiceCrd};
use serve_controller::{
    components::{predictor::PredictorReconciler, Component},
    config,
    reconcilers::knative::KsvcReconciler,
};
use serve_core_k8s::manager::{Manager, TryFromClient};
use tracing::{info, instrument, warn, Level};

pub struct Ctx {
    predictor: PredictorReconciler<KsvcReconciler>,
}

#[async_trait]
impl TryFromClient for Ctx {
    async fn try_from_client(kube: &Client) -> Result<Self> {
        let config = config::load(kube).await?;
        Ok(Self {
            predictor: PredictorReconciler::new(KsvcReconciler::new(kube.clone()), Arc::new(config)),
        })
    }
}

#[async_trait]
impl ::serve_core_k8s::manager::Ctx for Ctx {
    type Data = InferenceServiceCrd;

    const NAME: &'static str = consts::FIELD_MANAGER;
    const FALLBACK: Duration = Duration::from_secs(30); // 30 seconds

    #[instrument(level = Level::INFO, skip_all, fields(name = %data.name_any(), namespace = data.namespace()), err(Display))]
    async fn reconcile(
        manager: Arc<Manager<Self>>,
        data: Arc<<Self as ::serve_core_k8s::manager::Ctx>::Data>,
    ) -> Result<Action, Error>
    where
        Self: Sized,
    {
        // owned workloads are garbage collected with their owner
        if data.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        let name = data.name_any();
        let mut isvc = (*data).clone();
        match manager.ctx.predictor.reconcile(&mut isvc).await {
            Ok(()) => {
                if isvc.status != data.status {
                    Self::patch_status(&manager.kube, &isvc).await?;
                    info!("updated inference service status: {name}");
                }
                // workloads are not watched; poll them for status changes
                Ok(Action::requeue(
                    <Self as ::serve_core_k8s::manager::Ctx>::FALLBACK,
                ))
            }
            Err(e) => {
                warn!("failed to reconcile inference service {name:?}: {e}");
                Err(Error::Service(e.into()))
            }
        }
    }
}

impl Ctx {
    async fn patch_status(kube: &Client, isvc: &InferenceServiceCrd) -> Result<(), Error> {
        let namespace = isvc.namespace().unwrap_or_default();
        let api = Api::<<Self as ::serve_core_k8s::manager::Ctx>::Data>::namespaced(
            kube.clone(),
            &namespace,
        );
        let crd = <Self as ::serve_core_k8s::manager::Ctx>::Data::api_resource();

        let patch = Patch::Apply(json!({
            "apiVersion": crd.api_version,
            "kind": crd.kind,
            "status": isvc.status,
        }));
        let pp = PatchParams::apply(<Self as ::serve_core_k8s::manager::Ctx>::NAME).force();
        api.patch_status(&isvc.name_any(), &pp, &patch).await?;
        Ok(())
    }
}

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use kube::{runtime::controller::Action, Client, Error, ResourceExt};
use serve_api::{consts, trained_model::TrainedModelCrd};
use serve_controller::reconcilers::multimodelconfig::{desired_config_map, ConfigMapReconciler};
use serve_core_k8s::manager::{Manager, TryFromClient};
use tracing::{instrument, warn, Level};

pub struct Ctx {
    config_maps: ConfigMapReconciler<Client>,
}

#[async_trait]
impl TryFromClient for Ctx {
    async fn try_from_client(kube: &Client) -> Result<Self> {
        Ok(Self {
            config_maps: ConfigMapReconciler::new(kube.clone()),
        })
    }
}

#[async_trait]
impl ::serve_core_k8s::manager::Ctx for Ctx {
    type Data = TrainedModelCrd;

    const NAME: &'static str = consts::FIELD_MANAGER;
    const FALLBACK: Duration = Duration::from_secs(30); // 30 seconds
    const FINALIZER_NAME: &'static str = TrainedModelCrd::FINALIZER_NAME;

    #[instrument(level = Level::INFO, skip_all, fields(name = %data.name_any(), namespace = data.namespace()), err(Display))]
    async fn reconcile(
        manager: Arc<Manager<Self>>,
        data: Arc<<Self as ::serve_core_k8s::manager::Ctx>::Data>,
    ) -> Result<Action, Error>
    where
        Self: Sized,
    {
        let name = data.name_any();
        let deleting = data.metadata.deletion_timestamp.is_some();
        let has_finalizer = <Self as ::serve_core_k8s::manager::Ctx>::has_finalizer(&data);

        match (deleting, has_finalizer) {
            (false, false) => {
                return <Self as ::serve_core_k8s::manager::Ctx>::add_finalizer_or_requeue(
                    &manager.kube,
                    &data,
                )
                .await
            }
            (true, false) => return Ok(Action::await_change()),
            (_, true) => (),
        }

        let desired = desired_config_map(&data);
        match manager.ctx.config_maps.reconcile(desired, &data).await {
            Ok(()) if deleting => {
                <Self as ::serve_core_k8s::manager::Ctx>::remove_finalizer_or_requeue(
                    &manager.kube,
                    &data,
                )
                .await
            }
            Ok(()) => Ok(Action::await_change()),
            Err(e) => {
                warn!("failed to reconcile trained model {name:?}: {e}");
                Err(Error::Service(e.into()))
            }
        }
    }
}

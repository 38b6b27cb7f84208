use core::time::Duration;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    NamespaceResourceScope,
};
use kube::{
    api::{Patch, PatchParams, PostParams},
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, CustomResourceExt, Error, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use serve_core::tracer;
use tracing::{info, warn};

pub struct Manager<C> {
    pub kube: Client,
    pub ctx: Arc<C>,
}

#[async_trait]
pub trait Ctx
where
    Self: 'static + Send + Sync + TryFromClient,
    <Self as Ctx>::Data: Send
        + Sync
        + Clone
        + ::core::fmt::Debug
        + DeserializeOwned
        + CustomResourceExt
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    type Data;

    const NAME: &'static str;
    const FALLBACK: Duration = Duration::from_secs(30); // 30 seconds
    const FINALIZER_NAME: &'static str = "";

    fn get_subcrds() -> Vec<CustomResourceDefinition> {
        Default::default()
    }

    async fn spawn_crd()
    where
        Self: Sized,
    {
        <Self as Ctx>::try_spawn_crd()
            .await
            .expect("spawning a manager with CRD")
    }

    async fn try_spawn_crd() -> Result<()>
    where
        Self: Sized,
    {
        tracer::init_once();

        let client = Client::try_default().await?;
        <Self as Ctx>::init_crd(client.clone()).await?;

        let ctx = Arc::new(Self::try_from_client(&client).await?);
        let manager = Arc::new(Manager {
            kube: client.clone(),
            ctx,
        });

        // watch every namespace; the runtime serializes reconciles per object
        let api = Api::<<Self as Ctx>::Data>::all(client);

        Controller::new(api, Config::default())
            .run(
                |data, manager| Self::reconcile(manager, data),
                |data, error, manager| {
                    let kind = <<Self as Ctx>::Data>::kind(&());
                    let name = data.name_any();
                    warn!("failed to reconcile {kind} {name:?}: {error}");
                    Self::error_policy(manager, error)
                },
                manager,
            )
            .for_each(|_| ::futures::future::ready(()))
            .await;
        Ok(())
    }

    async fn init_crd(client: Client) -> Result<()> {
        let create_crd = |api: Api<CustomResourceDefinition>, crd: CustomResourceDefinition| async move {
            let name = crd.name_any();
            if api.get_opt(&name).await?.is_none() {
                let pp = PostParams {
                    dry_run: false,
                    field_manager: Some(<Self as Ctx>::NAME.into()),
                };
                api.create(&pp, &crd).await?;

                info!("Created CRD: {name}");
                Result::<_, Error>::Ok(())
            } else {
                let pp = PatchParams {
                    dry_run: false,
                    force: true,
                    field_manager: Some(<Self as Ctx>::NAME.into()),
                    ..Default::default()
                };
                api.patch(&name, &pp, &Patch::Apply(&crd)).await?;

                info!("Updated CRD: {name}");
                Result::<_, Error>::Ok(())
            }
        };

        // Ensure CRD is installed before loop-watching
        let api = Api::<CustomResourceDefinition>::all(client);

        for crd in <Self as Ctx>::get_subcrds() {
            create_crd(api.clone(), crd).await?;
        }
        create_crd(api, <Self as Ctx>::Data::crd()).await?;
        Ok(())
    }

    async fn reconcile(
        manager: Arc<Manager<Self>>,
        data: Arc<<Self as Ctx>::Data>,
    ) -> Result<Action, Error>
    where
        Self: Sized;

    fn has_finalizer(data: &<Self as Ctx>::Data) -> bool {
        data.finalizers()
            .iter()
            .any(|finalizer| finalizer == <Self as Ctx>::FINALIZER_NAME)
    }

    async fn patch_finalizers(
        kube: &Client,
        data: &<Self as Ctx>::Data,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let namespace = data.namespace().unwrap_or_default();
        let name = data.name_any();
        let api = Api::<<Self as Ctx>::Data>::namespaced(kube.clone(), &namespace);
        let crd = <<Self as Ctx>::Data as CustomResourceExt>::api_resource();

        let patch = Patch::Merge(json!({
            "apiVersion": crd.api_version,
            "kind": crd.kind,
            "metadata": {
                "finalizers": finalizers,
            },
        }));
        let pp = PatchParams::apply(<Self as Ctx>::NAME);
        api.patch(&name, &pp, &patch).await?;
        Ok(())
    }

    async fn add_finalizer_or_requeue(
        kube: &Client,
        data: &<Self as Ctx>::Data,
    ) -> Result<Action, Error> {
        let namespace = data.namespace().unwrap_or_default();
        let name = data.name_any();

        let mut finalizers = data.finalizers().to_vec();
        finalizers.push(<Self as Ctx>::FINALIZER_NAME.into());

        match <Self as Ctx>::patch_finalizers(kube, data, finalizers).await {
            Ok(()) => {
                info!("added finalizer tag ({namespace}/{name})");
                Ok(Action::await_change())
            }
            Err(e) => {
                warn!("failed to add finalize tag ({namespace}/{name}): {e}");
                Ok(Action::requeue(<Self as Ctx>::FALLBACK))
            }
        }
    }

    async fn remove_finalizer_or_requeue(
        kube: &Client,
        data: &<Self as Ctx>::Data,
    ) -> Result<Action, Error> {
        let namespace = data.namespace().unwrap_or_default();
        let name = data.name_any();

        let finalizers = data
            .finalizers()
            .iter()
            .filter(|finalizer| *finalizer != <Self as Ctx>::FINALIZER_NAME)
            .cloned()
            .collect();

        match <Self as Ctx>::patch_finalizers(kube, data, finalizers).await {
            Ok(()) => {
                info!("finalizing ({namespace}/{name})");
                Ok(Action::await_change())
            }
            Err(e) => {
                warn!("failed to finalize ({namespace}/{name}): {e}");
                Ok(Action::requeue(<Self as Ctx>::FALLBACK))
            }
        }
    }

    fn error_policy<E>(_manager: Arc<Manager<Self>>, _error: &E) -> Action
    where
        Self: Sized,
        E: ::std::fmt::Debug,
    {
        Action::requeue(<Self as Ctx>::FALLBACK)
    }
}

#[async_trait]
pub trait TryFromClient {
    async fn try_from_client(kube: &Client) -> Result<Self>
    where
        Self: Sized;
}

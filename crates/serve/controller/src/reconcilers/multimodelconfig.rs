use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::PostParams, core::ObjectMeta, Api, Client, ResourceExt};
use serde::{Deserialize, Serialize};
use serve_api::{
    consts,
    trained_model::{ModelSpec, TrainedModelCrd},
};
use tracing::{debug, info, instrument, Level};

use crate::{Error, Result};

/// Persistence of the shared multi-model config maps.
#[async_trait]
pub trait ConfigMapStore
where
    Self: Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn create(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    /// Fails on a conflict when `config_map` carries a stale resource version.
    async fn replace(&self, config_map: &ConfigMap) -> Result<ConfigMap>;
}

#[async_trait]
impl ConfigMapStore for Client {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api = Api::<ConfigMap>::namespaced(self.clone(), namespace);
        api.get_opt(name).await.map_err(Into::into)
    }

    async fn create(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let namespace = config_map.namespace().unwrap_or_default();
        let api = Api::<ConfigMap>::namespaced(self.clone(), &namespace);
        api.create(&post_params(), config_map)
            .await
            .map_err(Into::into)
    }

    async fn replace(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let namespace = config_map.namespace().unwrap_or_default();
        let api = Api::<ConfigMap>::namespaced(self.clone(), &namespace);
        api.replace(&config_map.name_any(), &post_params(), config_map)
            .await
            .map_err(Into::into)
    }
}

fn post_params() -> PostParams {
    PostParams {
        dry_run: false,
        field_manager: Some(consts::FIELD_MANAGER.into()),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelConfig {
    model_name: String,
    model_spec: ModelSpec,
}

/// Entries of a multi-model config map, keyed by model name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelConfigs(BTreeMap<String, ModelSpec>);

impl ModelConfigs {
    pub fn decode(config_map: &ConfigMap) -> Result<Self> {
        let raw = match config_map
            .data
            .as_ref()
            .and_then(|data| data.get(consts::MODEL_CONFIG_FILE_NAME))
        {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(Self::default()),
        };

        ::serde_json::from_str::<Vec<ModelConfig>>(raw)
            .map(|configs| {
                Self(
                    configs
                        .into_iter()
                        .map(|config| (config.model_name, config.model_spec))
                        .collect(),
                )
            })
            .map_err(|source| Error::ModelConfig {
                name: config_map.name_any(),
                source,
            })
    }

    /// Writes the entries into `config_map`, sorted by model name.
    pub fn encode(&self, config_map: &mut ConfigMap) -> Result<()> {
        let configs: Vec<_> = self
            .0
            .iter()
            .map(|(model_name, model_spec)| ModelConfig {
                model_name: model_name.clone(),
                model_spec: model_spec.clone(),
            })
            .collect();
        let raw = ::serde_json::to_string(&configs).map_err(|source| Error::ModelConfig {
            name: config_map.name_any(),
            source,
        })?;

        config_map
            .data
            .get_or_insert_with(Default::default)
            .insert(consts::MODEL_CONFIG_FILE_NAME.into(), raw);
        Ok(())
    }

    pub fn get(&self, model_name: &str) -> Option<&ModelSpec> {
        self.0.get(model_name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns whether the entry was added or changed.
    pub fn upsert(&mut self, model_name: &str, model_spec: &ModelSpec) -> bool {
        if self.0.get(model_name) == Some(model_spec) {
            return false;
        }
        self.0.insert(model_name.into(), model_spec.clone());
        true
    }

    /// Returns whether the entry existed.
    pub fn remove(&mut self, model_name: &str) -> bool {
        self.0.remove(model_name).is_some()
    }
}

/// Builds the shared config map `trained_model` belongs to, with no entries.
pub fn desired_config_map(trained_model: &TrainedModelCrd) -> ConfigMap {
    let inference_service = &trained_model.spec.inference_service;
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(consts::model_config_name(inference_service, 0)),
            namespace: trained_model.namespace(),
            labels: Some(
                [(
                    consts::LABEL_INFERENCE_SERVICE.to_string(),
                    inference_service.clone(),
                )]
                .into(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Keeps the entry of a trained model in its shared config map.
pub struct ConfigMapReconciler<S> {
    store: S,
}

impl<S> ConfigMapReconciler<S>
where
    S: ConfigMapStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Adds or updates the entry of `trained_model`, or removes it once the model is deleted.
    ///
    /// A deleted model never creates the config map.
    #[instrument(level = Level::INFO, skip_all, fields(name = %desired.name_any(), model = %trained_model.name_any()), err(Display))]
    pub async fn reconcile(&self, desired: ConfigMap, trained_model: &TrainedModelCrd) -> Result<()> {
        let namespace = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let model_name = trained_model.name_any();

        let live = self.store.get(&namespace, &name).await?;

        if trained_model.metadata.deletion_timestamp.is_some() {
            let Some(mut live) = live else {
                debug!("no multi-model config to remove the model from");
                return Ok(());
            };

            let mut configs = ModelConfigs::decode(&live)?;
            if configs.remove(&model_name) {
                info!("removing the model from the multi-model config");
                configs.encode(&mut live)?;
                self.store.replace(&live).await?;
            }
            return Ok(());
        }

        let model_spec = &trained_model.spec.model;
        match live {
            None => {
                info!("creating the multi-model config");
                let mut desired = desired;
                let mut configs = ModelConfigs::decode(&desired)?;
                configs.upsert(&model_name, model_spec);
                configs.encode(&mut desired)?;
                self.store.create(&desired).await?;
            }
            Some(mut live) => {
                let mut configs = ModelConfigs::decode(&live)?;
                if configs.upsert(&model_name, model_spec) {
                    info!("updating the model in the multi-model config");
                    configs.encode(&mut live)?;
                    self.store.replace(&live).await?;
                }
            }
        }
        Ok(())
    }
}

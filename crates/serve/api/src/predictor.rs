use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Container, EnvVar, PodTemplateSpec, ResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};
use kube::core::ObjectMeta;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::{
    component::ComponentExtensionSpec,
    config::{InferenceServicesConfig, PredictorConfig},
    consts,
    inference_service::PredictorSpec,
};

/// Settings shared by every builtin model server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PredictorExtensionSpec {
    /// Location of the model, provisioned by the storage initializer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
    /// Image tag of the model server; falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    EnumString,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PredictorFramework {
    SKLearn,
    XGBoost,
    TensorFlow,
    PyTorch,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PredictorError {
    #[error("no predictor implementation is specified")]
    Missing,
    #[error("only one builtin predictor may be specified, but found: {0:?}")]
    Ambiguous(Vec<PredictorFramework>),
    #[error("custom predictor has no containers")]
    EmptyCustom,
}

/// The predictor implementation that drives the runtime container.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PredictorImplementation<'a> {
    Builtin {
        framework: PredictorFramework,
        spec: &'a PredictorExtensionSpec,
    },
    Custom(&'a PodTemplateSpec),
}

impl PredictorSpec {
    /// Resolves the active implementation.
    ///
    /// A builtin runtime wins over `custom`, which is then only a pod template override.
    pub fn implementation(&self) -> Result<PredictorImplementation<'_>, PredictorError> {
        let builtins: Vec<_> = [
            (PredictorFramework::SKLearn, self.sklearn.as_ref()),
            (PredictorFramework::XGBoost, self.xgboost.as_ref()),
            (PredictorFramework::TensorFlow, self.tensorflow.as_ref()),
            (PredictorFramework::PyTorch, self.pytorch.as_ref()),
        ]
        .into_iter()
        .filter_map(|(framework, spec)| spec.map(|spec| (framework, spec)))
        .collect();

        match builtins.as_slice() {
            [(framework, spec)] => Ok(PredictorImplementation::Builtin {
                framework: *framework,
                spec: *spec,
            }),
            [] => self
                .custom
                .as_ref()
                .map(PredictorImplementation::Custom)
                .ok_or(PredictorError::Missing),
            _ => Err(PredictorError::Ambiguous(
                builtins.iter().map(|(framework, _)| *framework).collect(),
            )),
        }
    }
}

impl<'a> PredictorImplementation<'a> {
    pub fn name(&self) -> String {
        match self {
            Self::Builtin { framework, .. } => framework.to_string(),
            Self::Custom(_) => "custom".into(),
        }
    }

    pub fn storage_uri(&self) -> Option<&'a str> {
        match *self {
            Self::Builtin { spec, .. } => spec.storage_uri.as_deref(),
            Self::Custom(template) => template
                .spec
                .as_ref()
                .and_then(|spec| spec.containers.first())
                .and_then(|container| container.env.as_ref())
                .and_then(|env| env.iter().find(|var| var.name == consts::ENV_STORAGE_URI))
                .and_then(|var| var.value.as_deref()),
        }
    }

    /// Builds the container running the model server.
    pub fn container(
        &self,
        metadata: &ObjectMeta,
        extensions: &ComponentExtensionSpec,
        config: &InferenceServicesConfig,
    ) -> Result<Container, PredictorError> {
        match *self {
            Self::Builtin { framework, spec } => Ok(build_builtin_container(
                framework,
                spec,
                metadata,
                extensions,
                config.predictors.get(framework),
            )),
            Self::Custom(template) => template
                .spec
                .as_ref()
                .and_then(|spec| spec.containers.first())
                .cloned()
                .ok_or(PredictorError::EmptyCustom),
        }
    }
}

fn build_builtin_container(
    framework: PredictorFramework,
    spec: &PredictorExtensionSpec,
    metadata: &ObjectMeta,
    extensions: &ComponentExtensionSpec,
    config: &PredictorConfig,
) -> Container {
    let model_name = metadata.name.clone().unwrap_or_default();
    let http_port = consts::DEFAULT_HTTP_PORT;
    let model_dir = consts::DEFAULT_MODEL_LOCAL_MOUNT_PATH;

    let (command, mut args) = match framework {
        PredictorFramework::TensorFlow => (
            Some(vec!["/usr/bin/tensorflow_model_server".into()]),
            vec![
                "--port=9000".into(),
                format!("--rest_api_port={http_port}"),
                format!("--model_name={model_name}"),
                format!("--model_base_path={model_dir}"),
            ],
        ),
        PredictorFramework::SKLearn
        | PredictorFramework::XGBoost
        | PredictorFramework::PyTorch => (
            None,
            vec![
                format!("--model_name={model_name}"),
                format!("--model_dir={model_dir}"),
                format!("--http_port={http_port}"),
            ],
        ),
    };
    if framework != PredictorFramework::TensorFlow {
        if let Some(workers) = extensions.container_concurrency {
            args.push(format!("--workers={workers}"));
        }
    }
    args.extend(spec.args.iter().flatten().cloned());

    let version = spec
        .runtime_version
        .as_deref()
        .unwrap_or(&config.default_image_version);

    Container {
        name: consts::CONTAINER_NAME.into(),
        image: Some(format!("{image}:{version}", image = config.image)),
        command,
        args: Some(args),
        env: spec.env.clone(),
        resources: Some(with_default_resources(spec.resources.clone())),
        ..Default::default()
    }
}

/// Fills unset cpu/memory requests and limits with the defaults.
pub fn with_default_resources(resources: Option<ResourceRequirements>) -> ResourceRequirements {
    const DEFAULT_CPU: &str = "1";
    const DEFAULT_MEMORY: &str = "2Gi";

    fn fill(quantities: Option<BTreeMap<String, Quantity>>) -> BTreeMap<String, Quantity> {
        let mut quantities = quantities.unwrap_or_default();
        for (key, value) in [("cpu", DEFAULT_CPU), ("memory", DEFAULT_MEMORY)] {
            quantities
                .entry(key.into())
                .or_insert_with(|| Quantity(value.into()));
        }
        quantities
    }

    let resources = resources.unwrap_or_default();
    ResourceRequirements {
        limits: Some(fill(resources.limits)),
        requests: Some(fill(resources.requests)),
        ..resources
    }
}

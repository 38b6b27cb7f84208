use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{consts, predictor::PredictorFramework};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("logger and batcher sidecars cannot share port {0}")]
    ConflictingPorts(u16),
    #[error("failed to parse {key:?} of the inference service config: {source}")]
    Malformed {
        key: &'static str,
        #[source]
        source: ::serde_json::Error,
    },
}

/// Process-wide settings consumed while synthesizing workloads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InferenceServicesConfig {
    pub predictors: PredictorsConfig,
    pub ports: SidecarPorts,
}

impl InferenceServicesConfig {
    /// Reads the predictor images from the shared config map.
    ///
    /// Runtimes missing from the config map keep their defaults.
    pub fn from_config_map(config_map: &ConfigMap, ports: SidecarPorts) -> Result<Self, ConfigError> {
        let predictors = match config_map
            .data
            .as_ref()
            .and_then(|data| data.get(consts::CONFIG_MAP_KEY_PREDICTORS))
        {
            Some(predictors) => {
                let malformed = |source| ConfigError::Malformed {
                    key: consts::CONFIG_MAP_KEY_PREDICTORS,
                    source,
                };

                // derived struct deserializers also accept sequences
                let predictors: Map<String, Value> =
                    ::serde_json::from_str(predictors).map_err(malformed)?;
                ::serde_json::from_value(Value::Object(predictors)).map_err(malformed)?
            }
            None => PredictorsConfig::default(),
        };

        Ok(Self { predictors, ports })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictorsConfig {
    #[serde(default = "PredictorConfig::default_sklearn")]
    pub sklearn: PredictorConfig,
    #[serde(default = "PredictorConfig::default_xgboost")]
    pub xgboost: PredictorConfig,
    #[serde(default = "PredictorConfig::default_tensorflow")]
    pub tensorflow: PredictorConfig,
    #[serde(default = "PredictorConfig::default_pytorch")]
    pub pytorch: PredictorConfig,
}

impl Default for PredictorsConfig {
    fn default() -> Self {
        Self {
            sklearn: PredictorConfig::default_sklearn(),
            xgboost: PredictorConfig::default_xgboost(),
            tensorflow: PredictorConfig::default_tensorflow(),
            pytorch: PredictorConfig::default_pytorch(),
        }
    }
}

impl PredictorsConfig {
    pub fn get(&self, framework: PredictorFramework) -> &PredictorConfig {
        match framework {
            PredictorFramework::SKLearn => &self.sklearn,
            PredictorFramework::XGBoost => &self.xgboost,
            PredictorFramework::TensorFlow => &self.tensorflow,
            PredictorFramework::PyTorch => &self.pytorch,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictorConfig {
    pub image: String,
    pub default_image_version: String,
}

impl PredictorConfig {
    fn new(image: &str, default_image_version: &str) -> Self {
        Self {
            image: image.into(),
            default_image_version: default_image_version.into(),
        }
    }

    fn default_sklearn() -> Self {
        Self::new("kfserving/sklearnserver", "v0.5.0")
    }

    fn default_xgboost() -> Self {
        Self::new("kfserving/xgbserver", "v0.5.0")
    }

    fn default_tensorflow() -> Self {
        Self::new("tensorflow/serving", "1.14.0")
    }

    fn default_pytorch() -> Self {
        Self::new("kfserving/pytorchserver", "v0.5.0")
    }
}

/// Ports the logger and batcher sidecars listen on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SidecarPorts {
    logger: u16,
    batcher: u16,
}

impl Default for SidecarPorts {
    fn default() -> Self {
        Self {
            logger: consts::DEFAULT_LOGGER_PORT,
            batcher: consts::DEFAULT_BATCHER_PORT,
        }
    }
}

impl SidecarPorts {
    pub fn new(logger: u16, batcher: u16) -> Result<Self, ConfigError> {
        if logger == batcher {
            return Err(ConfigError::ConflictingPorts(logger));
        }
        Ok(Self { logger, batcher })
    }

    pub const fn logger(&self) -> u16 {
        self.logger
    }

    pub const fn batcher(&self) -> u16 {
        self.batcher
    }
}

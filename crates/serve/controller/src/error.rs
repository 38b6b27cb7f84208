use serve_api::{config::ConfigError, predictor::PredictorError};
use serve_core_k8s::owner::OwnershipError;
use thiserror::Error;

pub type Result<T, E = Error> = ::core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Predictor(#[from] PredictorError),
    #[error(transparent)]
    Ownership(#[from] OwnershipError),
    #[error(transparent)]
    Kube(#[from] ::kube::Error),
    #[error("failed to decode the status of workload {name:?}: {source}")]
    WorkloadStatus {
        name: String,
        #[source]
        source: ::serde_json::Error,
    },
    #[error("failed to handle the multi-model config {name:?}: {source}")]
    ModelConfig {
        name: String,
        #[source]
        source: ::serde_json::Error,
    },
}

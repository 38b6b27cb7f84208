use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serve_api::{
    config::{InferenceServicesConfig, SidecarPorts},
    consts,
};
use serve_core::env;
use tracing::{info, warn};

pub const ENV_CONTROLLER_NAMESPACE: &str = "SERVE_CONTROLLER_NAMESPACE";
pub const ENV_LOGGER_PORT: &str = "SERVE_LOGGER_PORT";
pub const ENV_BATCHER_PORT: &str = "SERVE_BATCHER_PORT";

pub fn infer_ports() -> Result<SidecarPorts> {
    let logger = env::infer_or(ENV_LOGGER_PORT, consts::DEFAULT_LOGGER_PORT)?;
    let batcher = env::infer_or(ENV_BATCHER_PORT, consts::DEFAULT_BATCHER_PORT)?;
    SidecarPorts::new(logger, batcher).map_err(Into::into)
}

/// Loads the controller configuration from the environment and the cluster.
///
/// A missing config map yields the builtin defaults.
pub async fn load(kube: &Client) -> Result<InferenceServicesConfig> {
    let ports = infer_ports()?;
    let namespace = env::infer_or(
        ENV_CONTROLLER_NAMESPACE,
        consts::DEFAULT_CONTROLLER_NAMESPACE.to_string(),
    )?;

    let api = Api::<ConfigMap>::namespaced(kube.clone(), &namespace);
    match api.get_opt(consts::CONFIG_MAP_NAME).await? {
        Some(config_map) => {
            info!(
                "loaded inference service config ({namespace}/{name})",
                name = consts::CONFIG_MAP_NAME,
            );
            InferenceServicesConfig::from_config_map(&config_map, ports).map_err(Into::into)
        }
        None => {
            warn!(
                "failed to find inference service config ({namespace}/{name}); using defaults",
                name = consts::CONFIG_MAP_NAME,
            );
            Ok(InferenceServicesConfig {
                ports,
                ..Default::default()
            })
        }
    }
}

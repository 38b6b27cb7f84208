pub mod component;
pub mod config;
pub mod inference_service;
pub mod predictor;
pub mod trained_model;

pub mod consts {
    pub const GROUP: &str = "serving.kubeflow.org";

    pub const FIELD_MANAGER: &str = "serve-controller";

    /// Annotations never copied from an inference service onto its workloads.
    pub const SERVICE_ANNOTATION_DISALLOWED_LIST: &[&str] = &[
        ANNOTATION_AUTOSCALING_MIN_SCALE,
        ANNOTATION_AUTOSCALING_MAX_SCALE,
        ANNOTATION_STORAGE_INITIALIZER_SOURCE_URI,
        "kubectl.kubernetes.io/last-applied-configuration",
    ];

    pub const ANNOTATION_AUTOSCALING_MIN_SCALE: &str = "autoscaling.knative.dev/minScale";
    pub const ANNOTATION_AUTOSCALING_MAX_SCALE: &str = "autoscaling.knative.dev/maxScale";

    // read by the admission mutator that injects the storage initializer and sidecars
    pub const ANNOTATION_STORAGE_INITIALIZER_SOURCE_URI: &str =
        "internal.serving.kubeflow.org/storage-initializer-sourceuri";
    pub const ANNOTATION_LOGGER: &str = "internal.serving.kubeflow.org/logger";
    pub const ANNOTATION_LOGGER_SINK_URL: &str = "internal.serving.kubeflow.org/logger-sink-url";
    pub const ANNOTATION_LOGGER_MODE: &str = "internal.serving.kubeflow.org/logger-mode";
    pub const ANNOTATION_BATCHER: &str = "internal.serving.kubeflow.org/batcher";
    pub const ANNOTATION_BATCHER_MAX_BATCH_SIZE: &str =
        "internal.serving.kubeflow.org/batcher-max-batchsize";
    pub const ANNOTATION_BATCHER_MAX_LATENCY: &str =
        "internal.serving.kubeflow.org/batcher-max-latency";
    pub const ANNOTATION_BATCHER_TIMEOUT: &str = "internal.serving.kubeflow.org/batcher-timeout";

    pub const LABEL_INFERENCE_SERVICE: &str = "serving.kubeflow.org/inferenceservice";
    pub const LABEL_COMPONENT: &str = "component";

    pub const CONTAINER_NAME: &str = "kfserving-container";
    pub const DEFAULT_MODEL_LOCAL_MOUNT_PATH: &str = "/mnt/models";
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
    pub const DEFAULT_LOGGER_PORT: u16 = 8081;
    pub const DEFAULT_BATCHER_PORT: u16 = 8082;

    /// Environment variable a custom predictor uses to name its model location.
    pub const ENV_STORAGE_URI: &str = "STORAGE_URI";

    pub const CONFIG_MAP_NAME: &str = "inferenceservice-config";
    pub const CONFIG_MAP_KEY_PREDICTORS: &str = "predictors";
    pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "kfserving-system";

    pub const MODEL_CONFIG_FILE_NAME: &str = "models.json";

    /// Name of the config map shared by every trained model of an inference service.
    pub fn model_config_name(inference_service: &str, shard: u32) -> String {
        format!("modelconfig-{inference_service}-{shard}")
    }
}

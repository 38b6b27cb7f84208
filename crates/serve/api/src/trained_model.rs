use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "serving.kubeflow.org",
    version = "v1alpha1",
    kind = "TrainedModel",
    root = "TrainedModelCrd",
    shortname = "tm",
    namespaced,
    printcolumn = r#"{
        "name": "inference-service",
        "type": "string",
        "description": "inference service serving the model",
        "jsonPath": ".spec.inferenceService"
    }"#,
    printcolumn = r#"{
        "name": "framework",
        "type": "string",
        "description": "framework of the model",
        "jsonPath": ".spec.model.framework"
    }"#,
    printcolumn = r#"{
        "name": "created-at",
        "type": "date",
        "description": "created time",
        "jsonPath": ".metadata.creationTimestamp"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct TrainedModelSpec {
    /// Name of the multi-model inference service loading this model.
    pub inference_service: String,
    pub model: ModelSpec,
}

impl TrainedModelCrd {
    pub const FINALIZER_NAME: &'static str = "serving.kubeflow.org/finalizer-trained-models";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub storage_uri: String,
    pub framework: String,
    /// Memory the model needs once loaded.
    pub memory: Quantity,
}

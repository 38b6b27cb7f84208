use std::{collections::BTreeMap, num::NonZeroU32};

use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    component::{
        ComponentExtensionSpec, ComponentStatusSpec, ComponentType, Condition, ConditionStatus,
    },
    predictor::PredictorExtensionSpec,
};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema, CustomResource)]
#[kube(
    group = "serving.kubeflow.org",
    version = "v1beta1",
    kind = "InferenceService",
    root = "InferenceServiceCrd",
    status = "InferenceServiceStatus",
    shortname = "isvc",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{
        "name": "url",
        "type": "string",
        "description": "address of the predictor",
        "jsonPath": ".status.url"
    }"#,
    printcolumn = r#"{
        "name": "ready",
        "type": "string",
        "description": "readiness of the inference service",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#,
    printcolumn = r#"{
        "name": "created-at",
        "type": "date",
        "description": "created time",
        "jsonPath": ".metadata.creationTimestamp"
    }"#,
    printcolumn = r#"{
        "name": "version",
        "type": "integer",
        "description": "inference service version",
        "jsonPath": ".metadata.generation"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceSpec {
    pub predictor: PredictorSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PredictorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sklearn: Option<PredictorExtensionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xgboost: Option<PredictorExtensionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensorflow: Option<PredictorExtensionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pytorch: Option<PredictorExtensionSpec>,
    /// Pod template of a user-defined predictor.
    ///
    /// Alongside a builtin runtime it overrides the generated pod template:
    /// its first container is replaced by the runtime container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<PodTemplateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<LoggerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batcher: Option<Batcher>,
    #[serde(flatten)]
    pub component_extension: ComponentExtensionSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoggerSpec {
    /// Sink receiving the logged payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub mode: LoggerType,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    Default,
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
pub enum LoggerType {
    #[default]
    All,
    Request,
    Response,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Batcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<NonZeroU32>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency: Option<u32>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub components: BTreeMap<ComponentType, ComponentStatusSpec>,
}

impl InferenceServiceStatus {
    const CONDITION_READY: &'static str = "Ready";

    pub fn component(&self, component: ComponentType) -> Option<&ComponentStatusSpec> {
        self.components.get(&component)
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|condition| condition.type_ == type_)
    }

    /// Replaces the observed state of `component` and refreshes the aggregate conditions.
    pub fn propagate_status(&mut self, component: ComponentType, status: ComponentStatusSpec) {
        self.set_condition(Condition {
            type_: component.ready_condition().into(),
            status: status.ready,
            reason: status.reason.clone(),
            message: status.message.clone(),
        });
        if component == ComponentType::Predictor {
            self.url.clone_from(&status.url);
        }
        self.components.insert(component, status);

        let ready = if self
            .components
            .keys()
            .filter_map(|component| self.condition(component.ready_condition()))
            .all(|condition| condition.status == ConditionStatus::True)
        {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        self.set_condition(Condition {
            type_: Self::CONDITION_READY.into(),
            status: ready,
            reason: None,
            message: None,
        });
    }

    fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|current| current.type_ == condition.type_)
        {
            Some(current) => *current = condition,
            None => self.conditions.push(condition),
        }
    }
}

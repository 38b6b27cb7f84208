use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams},
    core::ObjectMeta,
    Api, Client, ResourceExt,
};
use serde::Deserialize;
use serde_json::{json, Value};
use serve_api::{
    component::{ComponentStatusSpec, Condition, ConditionStatus, TrafficTarget},
    consts,
};
use tracing::{info, instrument, Level};

use crate::{
    reconcilers::{ComponentWorkload, WorkloadReconciler},
    Error, Result,
};

/// Access to the live knative services.
#[async_trait]
pub trait ServiceStore
where
    Self: Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>>;

    /// Server-side applies `object`, creating it when absent.
    ///
    /// Fields owned by other managers, such as the annotations the platform
    /// stamps on creation, are left untouched.
    async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject>;
}

pub struct KubeServiceStore {
    kube: Client,
    api_resource: ApiResource,
}

impl KubeServiceStore {
    pub fn new(kube: Client) -> Self {
        Self {
            kube,
            api_resource: <KsvcReconciler>::api_resource(),
        }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.kube.clone(), namespace, &self.api_resource)
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
        self.api(namespace).get_opt(name).await.map_err(Into::into)
    }

    async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject> {
        let namespace = object.namespace().unwrap_or_default();
        let pp = PatchParams::apply(consts::FIELD_MANAGER).force();
        self.api(&namespace)
            .patch(&object.name_any(), &pp, &Patch::Apply(object))
            .await
            .map_err(Into::into)
    }
}

/// Serves component workloads as Knative services.
pub struct KsvcReconciler<S = KubeServiceStore> {
    store: S,
    api_resource: ApiResource,
}

impl KsvcReconciler {
    pub const GROUP: &'static str = "serving.knative.dev";
    pub const VERSION: &'static str = "v1";
    pub const KIND: &'static str = "Service";
    pub const PLURAL: &'static str = "services";

    const CONDITION_READY: &'static str = "Ready";

    pub fn new(kube: Client) -> Self {
        Self::with_store(KubeServiceStore::new(kube))
    }

    pub fn api_resource() -> ApiResource {
        let gvk = GroupVersionKind::gvk(Self::GROUP, Self::VERSION, Self::KIND);
        ApiResource::from_gvk_with_plural(&gvk, Self::PLURAL)
    }
}

impl<S> KsvcReconciler<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            api_resource: <KsvcReconciler>::api_resource(),
        }
    }
}

#[async_trait]
impl<S> WorkloadReconciler for KsvcReconciler<S>
where
    S: ServiceStore,
{
    type Object = DynamicObject;

    fn desired(&self, workload: ComponentWorkload) -> Self::Object {
        desired_service(&self.api_resource, workload)
    }

    #[instrument(level = Level::INFO, skip_all, fields(name = %object.name_any(), namespace = object.namespace()), err(Display))]
    async fn reconcile(
        &self,
        object: Self::Object,
        prior: Option<&ComponentStatusSpec>,
    ) -> Result<ComponentStatusSpec> {
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_default();

        let live = match self.store.get(&namespace, &name).await? {
            None => {
                info!("creating knative service");
                self.store.apply(&object).await?
            }
            Some(live) if is_up_to_date(&object, &live) => live,
            Some(_) => {
                info!("updating knative service");
                self.store.apply(&object).await?
            }
        };

        component_status(&live, prior)
    }
}

/// Builds the knative service running `workload`.
///
/// Annotations only go to the revision template; the service itself carries the labels.
pub fn desired_service(api_resource: &ApiResource, workload: ComponentWorkload) -> DynamicObject {
    let ComponentWorkload {
        metadata,
        extensions,
        pod_spec,
    } = workload;

    let mut template_annotations = metadata.annotations.unwrap_or_default();
    template_annotations.insert(
        consts::ANNOTATION_AUTOSCALING_MIN_SCALE.into(),
        extensions.min_replicas.unwrap_or(1).to_string(),
    );
    if let Some(max_replicas) = extensions.max_replicas {
        template_annotations.insert(
            consts::ANNOTATION_AUTOSCALING_MAX_SCALE.into(),
            max_replicas.to_string(),
        );
    }

    let mut template_spec = json!(pod_spec);
    if let Some(spec) = template_spec.as_object_mut() {
        if let Some(container_concurrency) = extensions.container_concurrency {
            spec.insert("containerConcurrency".into(), container_concurrency.into());
        }
        if let Some(timeout) = extensions.timeout {
            spec.insert("timeoutSeconds".into(), timeout.into());
        }
    }

    let name = metadata.name.clone().unwrap_or_default();
    let mut object = DynamicObject::new(&name, api_resource);
    object.metadata = ObjectMeta {
        name: metadata.name,
        namespace: metadata.namespace,
        labels: metadata.labels.clone(),
        ..Default::default()
    };
    object.data = json!({
        "spec": {
            "template": {
                "metadata": {
                    "labels": metadata.labels.unwrap_or_default(),
                    "annotations": template_annotations,
                },
                "spec": template_spec,
            },
        },
    });
    object
}

/// Returns whether every field of `desired` is already set on `live`.
///
/// Fields defaulted by the server are tolerated, and resource quantities are
/// compared by value.
fn is_up_to_date(desired: &DynamicObject, live: &DynamicObject) -> bool {
    fn contains_all(desired: Option<&BTreeMap<String, String>>, live: &BTreeMap<String, String>) -> bool {
        desired
            .into_iter()
            .flatten()
            .all(|(key, value)| live.get(key) == Some(value))
    }

    contains_all(desired.metadata.labels.as_ref(), live.labels())
        && contains_all(desired.metadata.annotations.as_ref(), live.annotations())
        && desired
            .owner_references()
            .iter()
            .all(|reference| live.owner_references().contains(reference))
        && is_subset(&desired.data["spec"], &live.data["spec"], false)
}

fn is_subset(desired: &Value, live: &Value, quantities: bool) -> bool {
    match (desired, live) {
        (Value::Object(desired), Value::Object(live)) => desired.iter().all(|(key, value)| {
            let quantities = quantities || matches!(key.as_str(), "limits" | "requests");
            live.get(key)
                .map(|live| is_subset(value, live, quantities))
                .unwrap_or_else(|| value.is_null())
        }),
        (Value::Array(desired), Value::Array(live)) => {
            desired.len() == live.len()
                && desired
                    .iter()
                    .zip(live)
                    .all(|(desired, live)| is_subset(desired, live, false))
        }
        (Value::String(desired), Value::String(live)) if quantities => {
            desired == live
                || matches!(
                    (parse_quantity(desired), parse_quantity(live)),
                    (Some(desired), Some(live))
                        if (desired - live).abs() <= 1e-9 * desired.abs().max(live.abs()),
                )
        }
        (desired, live) => desired == live,
    }
}

/// Parses a resource quantity such as `500m`, `0.5` or `2Gi` into its value.
fn parse_quantity(quantity: &str) -> Option<f64> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let quantity = quantity.trim();
    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|&(suffix, scale)| {
            quantity
                .strip_suffix(suffix)
                .map(|number| (number, scale))
        })
        .unwrap_or((quantity, 1.0));

    number
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(|value| value * scale)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    latest_ready_revision_name: Option<String>,
    #[serde(default)]
    latest_created_revision_name: Option<String>,
    #[serde(default)]
    traffic: Vec<TrafficTarget>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Reads the observed state of a live knative service.
pub fn component_status(
    live: &DynamicObject,
    prior: Option<&ComponentStatusSpec>,
) -> Result<ComponentStatusSpec> {
    let status: ServiceStatus = match live.data.get("status") {
        Some(status) => {
            ServiceStatus::deserialize(status).map_err(|source| Error::WorkloadStatus {
                name: live.name_any(),
                source,
            })?
        }
        None => ServiceStatus::default(),
    };

    let ready = status
        .conditions
        .into_iter()
        .find(|condition| condition.type_ == <KsvcReconciler>::CONDITION_READY);

    // remember the last ready revision once a newer one takes over
    let previous_ready_revision = match prior {
        Some(prior)
            if prior.latest_ready_revision.is_some()
                && prior.latest_ready_revision != status.latest_ready_revision_name =>
        {
            prior.latest_ready_revision.clone()
        }
        Some(prior) => prior.previous_ready_revision.clone(),
        None => None,
    };

    Ok(ComponentStatusSpec {
        ready: ready
            .as_ref()
            .map(|condition| condition.status)
            .unwrap_or(ConditionStatus::Unknown),
        reason: ready.as_ref().and_then(|condition| condition.reason.clone()),
        message: ready.and_then(|condition| condition.message),
        latest_ready_revision: status.latest_ready_revision_name,
        latest_created_revision: status.latest_created_revision_name,
        previous_ready_revision,
        url: status.url,
        traffic: status.traffic,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use k8s_openapi::{
        api::core::v1::{Container, PodSpec, ResourceRequirements},
        apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::OwnerReference},
    };
    use maplit::btreemap;
    use serve_api::component::ComponentExtensionSpec;

    use super::*;

    const ANNOTATION_CREATOR: &str = "serving.knative.dev/creator";

    /// Keeps a single service, merging applied fields like the API server.
    #[derive(Default)]
    struct MemoryServices {
        live: Mutex<Option<DynamicObject>>,
        applied: Mutex<Vec<DynamicObject>>,
    }

    impl MemoryServices {
        fn with_live(live: DynamicObject) -> Self {
            Self {
                live: Mutex::new(Some(live)),
                ..Default::default()
            }
        }

        fn live(&self) -> DynamicObject {
            self.live.lock().unwrap().clone().unwrap()
        }

        fn applied(&self) -> Vec<DynamicObject> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<'a> ServiceStore for &'a MemoryServices {
        async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<DynamicObject>> {
            Ok(self.live.lock().unwrap().clone())
        }

        async fn apply(&self, object: &DynamicObject) -> Result<DynamicObject> {
            self.applied.lock().unwrap().push(object.clone());

            let mut live = self.live.lock().unwrap();
            let merged = match live.take() {
                None => object.clone(),
                Some(mut current) => {
                    current
                        .labels_mut()
                        .extend(object.labels().clone());
                    current
                        .annotations_mut()
                        .extend(object.annotations().clone());
                    current.data["spec"] = object.data["spec"].clone();
                    current
                }
            };
            *live = Some(merged.clone());
            Ok(merged)
        }
    }

    fn reconciler(store: &MemoryServices) -> KsvcReconciler<&MemoryServices> {
        KsvcReconciler::with_store(store)
    }

    fn platform_owned(mut object: DynamicObject) -> DynamicObject {
        object
            .annotations_mut()
            .insert(ANNOTATION_CREATOR.into(), "system:admin".into());
        object.metadata.resource_version = Some("7".into());
        object
    }

    fn workload() -> ComponentWorkload {
        ComponentWorkload {
            metadata: ObjectMeta {
                name: Some("iris-predictor".into()),
                namespace: Some("models".into()),
                labels: Some(btreemap! {
                    "component".into() => "predictor".into(),
                }),
                annotations: Some(btreemap! {
                    consts::ANNOTATION_LOGGER.into() => "true".into(),
                }),
                ..Default::default()
            },
            extensions: ComponentExtensionSpec {
                max_replicas: Some(3),
                container_concurrency: Some(4),
                timeout: Some(60),
                ..Default::default()
            },
            pod_spec: PodSpec {
                containers: vec![Container {
                    name: "kfserving-container".into(),
                    image: Some("kfserving/sklearnserver:v0.5.0".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        }
    }

    fn live(status: Value) -> DynamicObject {
        let mut object = desired_service(&<KsvcReconciler>::api_resource(), workload());
        object.data["status"] = status;
        object
    }

    #[test]
    fn build_knative_service() {
        let object = desired_service(&<KsvcReconciler>::api_resource(), workload());

        assert_eq!(object.name_any(), "iris-predictor");
        assert_eq!(object.namespace().as_deref(), Some("models"));
        assert_eq!(
            object.labels(),
            &btreemap! {
                "component".to_string() => "predictor".to_string(),
            },
        );
        assert!(object.metadata.annotations.is_none());
        assert_eq!(
            object.data["spec"]["template"],
            json!({
                "metadata": {
                    "labels": {
                        "component": "predictor",
                    },
                    "annotations": {
                        "autoscaling.knative.dev/maxScale": "3",
                        "autoscaling.knative.dev/minScale": "1",
                        "internal.serving.kubeflow.org/logger": "true",
                    },
                },
                "spec": {
                    "containers": [
                        {
                            "name": "kfserving-container",
                            "image": "kfserving/sklearnserver:v0.5.0",
                        },
                    ],
                    "containerConcurrency": 4,
                    "timeoutSeconds": 60,
                },
            }),
        );
    }

    #[test]
    fn tolerate_server_defaults() {
        let desired = desired_service(&<KsvcReconciler>::api_resource(), workload());

        let mut live = desired.clone();
        live.metadata.resource_version = Some("42".into());
        live.data["spec"]["template"]["spec"]["enableServiceLinks"] = json!(false);
        live.data["spec"]["traffic"] = json!([{ "latestRevision": true, "percent": 100 }]);
        assert!(is_up_to_date(&desired, &live));

        live.data["spec"]["template"]["spec"]["timeoutSeconds"] = json!(300);
        assert!(!is_up_to_date(&desired, &live));
    }

    #[test]
    fn compare_quantities_by_value() {
        assert!((parse_quantity("500m").unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(parse_quantity("2Gi"), Some(2_147_483_648.0));
        assert_eq!(parse_quantity("1.5k"), Some(1500.0));
        assert_eq!(parse_quantity("cpu"), None);

        let resources = |cpu: &str, memory: &str| ResourceRequirements {
            limits: Some(btreemap! {
                "cpu".into() => Quantity(cpu.into()),
                "memory".into() => Quantity(memory.into()),
            }),
            ..Default::default()
        };
        let with_resources = |resources| {
            let mut workload = workload();
            workload.pod_spec.containers[0].resources = Some(resources);
            desired_service(&<KsvcReconciler>::api_resource(), workload)
        };

        let desired = with_resources(resources("0.5", "1024Mi"));
        assert!(is_up_to_date(&desired, &with_resources(resources("500m", "1Gi"))));
        assert!(!is_up_to_date(&desired, &with_resources(resources("1", "1Gi"))));
    }

    #[test]
    fn quantities_only_inside_resources() {
        let mut desired = desired_service(&<KsvcReconciler>::api_resource(), workload());
        desired.data["spec"]["template"]["spec"]["containers"][0]["image"] = json!("1000m");

        let mut live = desired.clone();
        live.data["spec"]["template"]["spec"]["containers"][0]["image"] = json!("1");
        assert!(!is_up_to_date(&desired, &live));
    }

    #[tokio::test]
    async fn create_when_absent() {
        let store = MemoryServices::default();
        let reconciler = reconciler(&store);
        let object = reconciler.desired(workload());

        let status = reconciler.reconcile(object.clone(), None).await.unwrap();

        let applied = store.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name_any(), "iris-predictor");
        assert_eq!(applied[0].data, object.data);
        assert_eq!(status.ready, ConditionStatus::Unknown);
    }

    #[tokio::test]
    async fn update_keeps_platform_annotations() {
        let desired = desired_service(&<KsvcReconciler>::api_resource(), workload());
        let mut live = platform_owned(desired.clone());
        live.data["spec"]["template"]["spec"]["timeoutSeconds"] = json!(300);

        let store = MemoryServices::with_live(live);
        reconciler(&store)
            .reconcile(desired.clone(), None)
            .await
            .unwrap();

        // the applied body never touches fields owned by the platform
        let applied = store.applied();
        assert_eq!(applied.len(), 1);
        assert!(!applied[0].annotations().contains_key(ANNOTATION_CREATOR));
        assert!(applied[0].resource_version().is_none());

        let live = store.live();
        assert_eq!(
            live.annotations().get(ANNOTATION_CREATOR).map(String::as_str),
            Some("system:admin"),
        );
        assert_eq!(
            live.data["spec"]["template"]["spec"]["timeoutSeconds"],
            json!(60),
        );
    }

    #[tokio::test]
    async fn no_write_when_up_to_date() {
        let mut workload = workload();
        workload.pod_spec.containers[0].resources = Some(ResourceRequirements {
            limits: Some(btreemap! {
                "cpu".into() => Quantity("0.5".into()),
            }),
            ..Default::default()
        });
        let desired = desired_service(&<KsvcReconciler>::api_resource(), workload);

        let mut live = platform_owned(desired.clone());
        live.data["spec"]["template"]["spec"]["containers"][0]["resources"]["limits"]["cpu"] =
            json!("500m");
        live.data["status"] = json!({
            "latestReadyRevisionName": "iris-predictor-00001",
            "conditions": [
                {
                    "type": "Ready",
                    "status": "True",
                },
            ],
        });

        let store = MemoryServices::with_live(live);
        let status = reconciler(&store).reconcile(desired, None).await.unwrap();

        assert!(store.applied().is_empty());
        assert_eq!(status.ready, ConditionStatus::True);
        assert_eq!(
            status.latest_ready_revision.as_deref(),
            Some("iris-predictor-00001"),
        );
    }

    #[test]
    fn detect_missing_owner_reference() {
        let live = desired_service(&<KsvcReconciler>::api_resource(), workload());

        let mut desired = live.clone();
        desired.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "serving.kubeflow.org/v1beta1".into(),
            kind: "InferenceService".into(),
            name: "iris".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        assert!(!is_up_to_date(&desired, &live));
    }

    #[test]
    fn read_ready_status() {
        let live = live(json!({
            "url": "http://iris-predictor.models.example.com",
            "latestReadyRevisionName": "iris-predictor-00002",
            "latestCreatedRevisionName": "iris-predictor-00002",
            "traffic": [
                {
                    "revisionName": "iris-predictor-00002",
                    "percent": 100,
                    "latestRevision": true,
                },
            ],
            "conditions": [
                {
                    "type": "Ready",
                    "status": "True",
                    "lastTransitionTime": "2021-01-01T00:00:00Z",
                },
            ],
        }));
        let prior = ComponentStatusSpec {
            latest_ready_revision: Some("iris-predictor-00001".into()),
            ..Default::default()
        };

        let status = component_status(&live, Some(&prior)).unwrap();
        assert_eq!(status.ready, ConditionStatus::True);
        assert_eq!(
            status.url.as_deref(),
            Some("http://iris-predictor.models.example.com"),
        );
        assert_eq!(
            status.previous_ready_revision.as_deref(),
            Some("iris-predictor-00001"),
        );
        assert_eq!(status.traffic[0].percent, Some(100));
    }

    #[test]
    fn keep_previous_revision_while_unchanged() {
        let live = live(json!({
            "latestReadyRevisionName": "iris-predictor-00002",
        }));
        let prior = ComponentStatusSpec {
            latest_ready_revision: Some("iris-predictor-00002".into()),
            previous_ready_revision: Some("iris-predictor-00001".into()),
            ..Default::default()
        };

        let status = component_status(&live, Some(&prior)).unwrap();
        assert_eq!(status.ready, ConditionStatus::Unknown);
        assert_eq!(
            status.previous_ready_revision.as_deref(),
            Some("iris-predictor-00001"),
        );
    }

    #[test]
    fn reject_malformed_status() {
        let live = live(json!({
            "traffic": "everything",
        }));
        assert!(matches!(
            component_status(&live, None),
            Err(Error::WorkloadStatus { .. }),
        ));
    }
}

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

/// Installs the runtime container into a pod template.
///
/// An override replaces only its first container; every other container and
/// pod-level field is kept. Without an override a single-container template is made.
pub fn build_pod_template(custom: Option<&PodTemplateSpec>, container: Container) -> PodTemplateSpec {
    match custom {
        Some(custom) => {
            let mut template = custom.clone();
            let spec = template.spec.get_or_insert_with(Default::default);
            match spec.containers.first_mut() {
                Some(first) => *first = container,
                None => spec.containers.push(container),
            }
            template
        }
        None => PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![container],
                ..Default::default()
            }),
        },
    }
}

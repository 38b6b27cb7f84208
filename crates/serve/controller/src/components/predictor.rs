use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::{core::ObjectMeta, Resource, ResourceExt};
use serve_api::{
    component::ComponentType, config::InferenceServicesConfig, consts,
    inference_service::InferenceServiceCrd,
};
use serve_core_k8s::owner::set_controller_reference;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::{
    components::{
        annotations::{self, SynthesizedAnnotations},
        ports::ensure_port,
        workload::build_pod_template,
        Component,
    },
    reconcilers::{ComponentWorkload, WorkloadReconciler},
    Result,
};

const COMPONENT: ComponentType = ComponentType::Predictor;

/// The predictor workload of an inference service.
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredPredictor {
    pub workload: ComponentWorkload,
    /// Pod template to be recorded as the predictor's custom override.
    pub template: PodTemplateSpec,
}

pub struct PredictorReconciler<W> {
    workload: W,
    config: Arc<InferenceServicesConfig>,
    span: Span,
}

impl<W> PredictorReconciler<W> {
    pub fn new(workload: W, config: Arc<InferenceServicesConfig>) -> Self {
        Self::with_span(workload, config, info_span!("PredictorReconciler"))
    }

    pub fn with_span(workload: W, config: Arc<InferenceServicesConfig>, span: Span) -> Self {
        Self {
            workload,
            config,
            span,
        }
    }

    /// Computes the predictor workload of `isvc` without modifying it.
    pub fn desired(&self, isvc: &InferenceServiceCrd) -> Result<DesiredPredictor> {
        let predictor = &isvc.spec.predictor;
        let implementation = predictor.implementation()?;

        let isvc_name = isvc.name_any();
        let SynthesizedAnnotations {
            annotations,
            has_logger,
            has_batcher,
        } = annotations::synthesize(
            isvc.metadata.annotations.as_ref(),
            implementation.storage_uri(),
            predictor.logger.as_ref(),
            predictor.batcher.as_ref(),
        );

        let mut labels: BTreeMap<_, _> = isvc.labels().clone();
        labels.insert(consts::LABEL_INFERENCE_SERVICE.into(), isvc_name.clone());
        labels.insert(consts::LABEL_COMPONENT.into(), COMPONENT.to_string());

        let metadata = ObjectMeta {
            name: Some(format!("{isvc_name}-{COMPONENT}")),
            namespace: isvc.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        };

        let mut container = implementation.container(
            &isvc.metadata,
            &predictor.component_extension,
            &self.config,
        )?;
        if has_logger {
            ensure_port(&mut container, self.config.ports.logger());
        }
        if has_batcher {
            ensure_port(&mut container, self.config.ports.batcher());
        }

        let template = build_pod_template(predictor.custom.as_ref(), container);
        debug!(
            "built the {implementation} predictor of {isvc_name:?}",
            implementation = implementation.name(),
        );

        Ok(DesiredPredictor {
            workload: ComponentWorkload {
                metadata,
                extensions: predictor.component_extension.clone(),
                pod_spec: template.spec.clone().unwrap_or_default(),
            },
            template,
        })
    }
}

#[async_trait]
impl<W> Component for PredictorReconciler<W>
where
    W: WorkloadReconciler,
{
    async fn reconcile(&self, isvc: &mut InferenceServiceCrd) -> Result<()> {
        async {
            let DesiredPredictor { workload, template } = self.desired(isvc)?;
            isvc.spec.predictor.custom = Some(template);

            let mut object = self.workload.desired(workload);
            set_controller_reference(&*isvc, object.meta_mut())?;

            let prior = isvc
                .status
                .as_ref()
                .and_then(|status| status.component(COMPONENT));
            let status = self.workload.reconcile(object, prior).await?;

            info!(
                "reconciled the predictor of {name:?}: ready={ready}",
                name = isvc.name_any(),
                ready = status.ready,
            );
            isvc.status
                .get_or_insert_with(Default::default)
                .propagate_status(COMPONENT, status);
            Ok::<_, crate::Error>(())
        }
        .instrument(self.span.clone())
        .await
    }
}

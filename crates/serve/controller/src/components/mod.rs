pub mod annotations;
pub mod ports;
pub mod predictor;
pub mod workload;

use async_trait::async_trait;
use serve_api::inference_service::InferenceServiceCrd;

use crate::Result;

/// A sub-resource of an inference service driven toward its declared state.
#[async_trait]
pub trait Component {
    /// Reconciles the component and records its observed state on `isvc`.
    ///
    /// On failure `isvc` may be partially updated and must not be persisted.
    async fn reconcile(&self, isvc: &mut InferenceServiceCrd) -> Result<()>;
}

//! Gradient-weighted class activation maps

use crate::error::PipelineError;
use crate::models::classifier::{top_class, Classifier};
use crate::types::{ImageTensor, SaliencyMap};
use ndarray::{Array1, Axis};
use tracing::debug;

/// Saliency map together with the probabilities of the traced pass
#[derive(Debug, Clone)]
pub struct SaliencyOutput {
    pub map: SaliencyMap,
    pub probabilities: Array1<f32>,
    /// Class the map explains
    pub class_index: usize,
}

/// Compute a Grad-CAM map for `classifier` at `layer`.
///
/// Targets `class_index`, or the top-1 class when `None`. Errors are
/// `LayerNotFound` for an unknown layer and `SaliencyComputationFailed`
/// for everything else; neither should block prediction.
pub fn compute_saliency(
    image: &ImageTensor,
    classifier: &dyn Classifier,
    layer: &str,
    class_index: Option<usize>,
) -> Result<SaliencyOutput, PipelineError> {
    let trace = classifier.trace_layer(image, layer).map_err(|e| match e {
        PipelineError::LayerNotFound { .. } | PipelineError::SaliencyComputationFailed(_) => e,
        other => PipelineError::saliency(other.to_string()),
    })?;

    if trace.probabilities.iter().any(|p| !p.is_finite()) {
        return Err(PipelineError::saliency("non-finite probability in traced pass"));
    }

    let class_index = match class_index {
        Some(index) => index,
        None => top_class(&trace.probabilities)
            .ok_or_else(|| PipelineError::saliency("empty probability vector"))?,
    };

    let (classes, gh, gw, gc) = trace.class_gradients.dim();
    if class_index >= classes || class_index >= trace.probabilities.len() {
        return Err(PipelineError::saliency(format!(
            "class index {} out of range for {} classes",
            class_index, classes
        )));
    }
    if trace.features.dim() != (gh, gw, gc) {
        return Err(PipelineError::saliency(format!(
            "gradient shape {:?} does not match feature map {:?}",
            (gh, gw, gc),
            trace.features.dim()
        )));
    }
    if gh == 0 || gw == 0 || gc == 0 {
        return Err(PipelineError::saliency("empty feature map"));
    }

    // Global average pooling of gradients: one weight per channel
    let gradients = trace.class_gradients.index_axis(Axis(0), class_index);
    let channel_weights = gradients.sum_axis(Axis(0)).sum_axis(Axis(0)) / (gh * gw) as f32;

    let raw = trace
        .features
        .map_axis(Axis(2), |activations| activations.dot(&channel_weights));

    if raw.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::saliency("non-finite activation or gradient"));
    }

    let map = SaliencyMap::from_raw(raw);
    debug!(
        model = %classifier.name(),
        layer = %layer,
        class_index = class_index,
        dims = ?map.dims(),
        degenerate = map.is_degenerate(),
        "Saliency computed"
    );

    Ok(SaliencyOutput {
        map,
        probabilities: trace.probabilities,
        class_index,
    })
}

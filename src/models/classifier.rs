//! Classifier contract shared by every ensemble member

use crate::error::PipelineError;
use crate::types::{FeatureMap, ImageTensor, NormalizationFamily};
use ndarray::{Array1, Array4};

/// Everything a single traced forward pass yields for saliency.
#[derive(Debug, Clone)]
pub struct LayerTrace {
    /// Activations of the traced layer, (h, w, c)
    pub features: FeatureMap,
    /// Gradient of each class score w.r.t. `features`, (classes, h, w, c)
    pub class_gradients: Array4<f32>,
    /// Softmax output of the same pass
    pub probabilities: Array1<f32>,
}

/// A trained, read-only predictor over a fixed ordered class set.
///
/// Implementations are loaded once and shared across requests; nothing
/// here takes `&mut self`.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Normalization the model expects its input in
    fn family(&self) -> NormalizationFamily;

    /// Probability vector for one image.
    ///
    /// Values are widened to `f64` before combining and thresholding, so a
    /// member reporting exactly `0.9f32` is compared as 0.8999999761581421.
    fn forward(&self, image: &ImageTensor) -> Result<Array1<f32>, PipelineError>;

    /// Layer whose output supports spatial saliency, if any
    fn saliency_layer(&self) -> Option<&str> {
        None
    }

    /// Run one pass capturing `layer` activations and per-class gradients.
    fn trace_layer(&self, image: &ImageTensor, layer: &str) -> Result<LayerTrace, PipelineError> {
        let _ = image;
        Err(PipelineError::LayerNotFound {
            model: self.name().to_string(),
            layer: layer.to_string(),
        })
    }
}

/// Index of the largest probability; `None` for an empty or NaN-only vector
pub fn top_class(probabilities: &Array1<f32>) -> Option<usize> {
    probabilities
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
        .map(|(i, _)| i)
}

//! In-process reference classifier with analytic gradients
//!
//! Architecture: average-pool the image by `stride`, project every cell
//! through a 1x1 layer with ReLU (the traceable feature map), global
//! average pool, linear head, softmax. It mirrors the GAP + dense head the
//! convolutional members use, which makes it a cheap stand-in member and a
//! ground truth for saliency.

use crate::error::PipelineError;
use crate::models::classifier::{Classifier, LayerTrace};
use crate::types::{FeatureMap, ImageTensor, NormalizationFamily};
use ndarray::{s, Array1, Array2, Array3, Array4, Axis};

/// Default name of the traceable projection layer
pub const PROJECTION_LAYER: &str = "projection";

pub struct GapLinearClassifier {
    name: String,
    family: NormalizationFamily,
    layer: String,
    stride: usize,
    /// (in_channels, features)
    projection: Array2<f32>,
    projection_bias: Array1<f32>,
    /// (features, classes)
    head: Array2<f32>,
    head_bias: Array1<f32>,
}

impl GapLinearClassifier {
    pub fn new(
        name: &str,
        projection: Array2<f32>,
        projection_bias: Array1<f32>,
        head: Array2<f32>,
        head_bias: Array1<f32>,
    ) -> Result<Self, PipelineError> {
        let features = projection.ncols();
        if projection_bias.len() != features || head.nrows() != features {
            return Err(PipelineError::invalid(format!(
                "{}: projection produces {} features, bias has {}, head expects {}",
                name,
                features,
                projection_bias.len(),
                head.nrows()
            )));
        }
        if head.ncols() == 0 || head_bias.len() != head.ncols() {
            return Err(PipelineError::invalid(format!(
                "{}: head has {} classes, bias has {}",
                name,
                head.ncols(),
                head_bias.len()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            family: NormalizationFamily::default(),
            layer: PROJECTION_LAYER.to_string(),
            stride: 1,
            projection,
            projection_bias,
            head,
            head_bias,
        })
    }

    /// Spatial down-sampling factor applied before the projection
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn with_family(mut self, family: NormalizationFamily) -> Self {
        self.family = family;
        self
    }

    pub fn with_layer_name(mut self, layer: &str) -> Self {
        self.layer = layer.to_string();
        self
    }

    pub fn num_classes(&self) -> usize {
        self.head.ncols()
    }

    fn failure(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Inference {
            model: self.name.clone(),
            message: message.into(),
        }
    }

    fn pool(&self, image: &ImageTensor) -> Result<Array3<f32>, PipelineError> {
        if image.channels() != self.projection.nrows() {
            return Err(self.failure(format!(
                "expected {} input channels, got {}",
                self.projection.nrows(),
                image.channels()
            )));
        }

        if image.view().iter().any(|v| !v.is_finite()) {
            return Err(self.failure("non-finite input"));
        }

        let (h, w) = (image.height() / self.stride, image.width() / self.stride);
        if h == 0 || w == 0 {
            return Err(self.failure(format!(
                "image {}x{} smaller than stride {}",
                image.height(),
                image.width(),
                self.stride
            )));
        }

        let view = image.view();
        let channels = image.channels();
        let mut pooled = Array3::<f32>::zeros((h, w, channels));
        let area = (self.stride * self.stride) as f32;

        for i in 0..h {
            for j in 0..w {
                let block = view.slice(s![
                    0,
                    i * self.stride..(i + 1) * self.stride,
                    j * self.stride..(j + 1) * self.stride,
                    ..
                ]);
                let sums = block.sum_axis(Axis(0)).sum_axis(Axis(0));
                pooled.slice_mut(s![i, j, ..]).assign(&(sums / area));
            }
        }

        Ok(pooled)
    }

    fn features(&self, image: &ImageTensor) -> Result<FeatureMap, PipelineError> {
        let pooled = self.pool(image)?;
        let (h, w, c) = pooled.dim();

        let cells = pooled
            .into_shape_with_order((h * w, c))
            .map_err(|e| self.failure(e.to_string()))?;
        let projected = (cells.dot(&self.projection) + &self.projection_bias).mapv(|v| v.max(0.0));

        projected
            .into_shape_with_order((h, w, self.projection.ncols()))
            .map_err(|e| self.failure(e.to_string()))
    }

    fn head_probabilities(&self, features: &FeatureMap) -> Array1<f32> {
        let (h, w, k) = features.dim();
        let cells = (h * w) as f32;

        let mut gap = Array1::<f32>::zeros(k);
        for lane in features.lanes(Axis(2)) {
            gap += &lane;
        }
        gap /= cells;

        softmax(&(gap.dot(&self.head) + &self.head_bias))
    }
}

fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|z| (z - max).exp());
    let total = exp.sum();
    exp / total
}

impl Classifier for GapLinearClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> NormalizationFamily {
        self.family
    }

    fn forward(&self, image: &ImageTensor) -> Result<Array1<f32>, PipelineError> {
        let features = self.features(image)?;
        Ok(self.head_probabilities(&features))
    }

    fn saliency_layer(&self) -> Option<&str> {
        Some(&self.layer)
    }

    fn trace_layer(&self, image: &ImageTensor, layer: &str) -> Result<LayerTrace, PipelineError> {
        if layer != self.layer {
            return Err(PipelineError::LayerNotFound {
                model: self.name.clone(),
                layer: layer.to_string(),
            });
        }

        let features = self.features(image)?;
        let probabilities = self.head_probabilities(&features);
        let (h, w, k) = features.dim();
        let classes = probabilities.len();
        let cells = (h * w) as f32;

        // d p_t / d A[i,j,k] = p_t * sum_m (delta_tm - p_m) * head[k,m] / (h*w)
        let mut class_gradients = Array4::<f32>::zeros((classes, h, w, k));
        for t in 0..classes {
            let mut dlogits = probabilities.mapv(|p| -probabilities[t] * p);
            dlogits[t] += probabilities[t];
            let per_channel = self.head.dot(&dlogits) / cells;

            class_gradients
                .index_axis_mut(Axis(0), t)
                .lanes_mut(Axis(2))
                .into_iter()
                .for_each(|mut lane| lane.assign(&per_channel));
        }

        Ok(LayerTrace {
            features,
            class_gradients,
            probabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// One input channel feeds feature 0, which drives class 1.
    fn classifier() -> GapLinearClassifier {
        GapLinearClassifier::new(
            "reference",
            array![[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
            array![0.0, 0.0],
            array![[-1.0, 1.0], [0.5, -0.5]],
            array![0.0, 0.0],
        )
        .unwrap()
    }

    fn image(values: impl Fn(usize, usize, usize) -> f32) -> ImageTensor {
        let data = Array4::from_shape_fn((1, 4, 4, 3), |(_, i, j, c)| values(i, j, c));
        ImageTensor::new(data, NormalizationFamily::Caffe)
    }

    #[test]
    fn test_forward_is_distribution() {
        let probs = classifier()
            .forward(&image(|_, j, c| if c == 0 && j < 2 { 2.0 } else { 0.1 }))
            .unwrap();
        assert_eq!(probs.len(), 2);
        assert!((probs.sum() - 1.0).abs() < 1e-6);
        assert!(probs[1] > probs[0]);
    }

    #[test]
    fn test_stride_pools_spatially() {
        let model = classifier().with_stride(2);
        let trace = model
            .trace_layer(&image(|_, _, _| 1.0), PROJECTION_LAYER)
            .unwrap();
        assert_eq!(trace.features.dim(), (2, 2, 2));
        assert_eq!(trace.class_gradients.dim(), (2, 2, 2, 2));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let model = classifier();
        let img = image(|i, j, c| (i + 2 * j + c) as f32 * 0.1);
        let trace = model.trace_layer(&img, PROJECTION_LAYER).unwrap();

        // Perturb the pooled activation of feature 0 through the head directly
        let eps = 1e-3_f32;
        let mut bumped = trace.features.clone();
        bumped[[0, 0, 0]] += eps;
        let p_plus = model.head_probabilities(&bumped);
        let numeric = (p_plus[1] - trace.probabilities[1]) / eps;
        let analytic = trace.class_gradients[[1, 0, 0, 0]];
        assert!((numeric - analytic).abs() < 1e-3);
    }

    #[test]
    fn test_wrong_layer() {
        let err = classifier()
            .trace_layer(&image(|_, _, _| 0.0), "conv5_block3_out")
            .unwrap_err();
        assert!(matches!(err, PipelineError::LayerNotFound { .. }));
    }

    #[test]
    fn test_channel_mismatch_is_inference_error() {
        let data = Array4::zeros((1, 4, 4, 1));
        let err = classifier()
            .forward(&ImageTensor::new(data, NormalizationFamily::Caffe))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Inference { .. }));
    }

    #[test]
    fn test_rejects_inconsistent_shapes() {
        let result = GapLinearClassifier::new(
            "broken",
            array![[1.0, 0.0]],
            array![0.0],
            array![[1.0], [1.0]],
            array![0.0],
        );
        assert!(matches!(result, Err(PipelineError::ConfigurationInvalid(_))));
    }
}

//! Tensor and map types shared by inference and explanation

use ndarray::{Array2, Array3, Array4, ArrayView4};
use serde::{Deserialize, Serialize};

/// Pixel normalization a classifier family was trained with.
///
/// A tensor prepared for one family and fed to another still runs, it just
/// produces degraded probabilities and saliency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationFamily {
    /// RGB->BGR with ImageNet mean subtraction (ResNet50)
    #[default]
    Caffe,
    /// Raw 0-255 floats, rescaling happens inside the graph (EfficientNetV2)
    Passthrough,
    /// Scaled to [-1, 1] (ViT)
    SignedUnit,
}

/// Preprocessed image of shape (1, height, width, channels).
#[derive(Debug, Clone)]
pub struct ImageTensor {
    data: Array4<f32>,
    family: NormalizationFamily,
}

impl ImageTensor {
    pub fn new(data: Array4<f32>, family: NormalizationFamily) -> Self {
        Self { data, family }
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn family(&self) -> NormalizationFamily {
        self.family
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn channels(&self) -> usize {
        self.data.shape()[3]
    }

    /// Shape as the i64 dims ONNX Runtime expects
    pub fn onnx_shape(&self) -> Vec<i64> {
        self.data.shape().iter().map(|&d| d as i64).collect()
    }

    /// Row-major copy of the pixel data
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

/// Activations of one internal layer, (height, width, channels).
pub type FeatureMap = Array3<f32>;

/// Class-discriminative importance over the feature map's spatial grid.
///
/// Values are ReLU-clamped and max-normalized into [0, 1]. A map whose
/// raw maximum is zero is kept as all zeros and means "no discriminative
/// evidence".
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    values: Array2<f32>,
}

impl SaliencyMap {
    /// Build from a raw weighted activation sum.
    pub fn from_raw(raw: Array2<f32>) -> Self {
        let clamped = raw.mapv(|v| v.max(0.0));
        let max = clamped.iter().copied().fold(0.0_f32, f32::max);

        let values = if max > 0.0 {
            clamped.mapv(|v| (v / max).min(1.0))
        } else {
            Array2::zeros(clamped.raw_dim())
        };

        Self { values }
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// (height, width)
    pub fn dims(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// True when no position carries evidence for the class
    pub fn is_degenerate(&self) -> bool {
        self.max() == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_saliency_relu_and_normalize() {
        let map = SaliencyMap::from_raw(array![[-2.0, 1.0], [4.0, 2.0]]);
        assert_eq!(map.values(), &array![[0.0, 0.25], [1.0, 0.5]]);
        assert_eq!(map.max(), 1.0);
        assert!(!map.is_degenerate());
    }

    #[test]
    fn test_saliency_zero_max_is_zero_map() {
        let map = SaliencyMap::from_raw(array![[-1.0, -3.0], [0.0, -0.5]]);
        assert!(map.is_degenerate());
        assert!(map.values().iter().all(|&v| v == 0.0));
        assert_eq!(map.dims(), (2, 2));
    }

    #[test]
    fn test_image_tensor_dims() {
        let tensor = ImageTensor::new(Array4::zeros((1, 4, 6, 3)), NormalizationFamily::Caffe);
        assert_eq!(tensor.height(), 4);
        assert_eq!(tensor.width(), 6);
        assert_eq!(tensor.channels(), 3);
        assert_eq!(tensor.onnx_shape(), vec![1, 4, 6, 3]);
        assert_eq!(tensor.to_vec().len(), 72);
    }
}

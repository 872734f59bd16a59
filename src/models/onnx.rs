//! ONNX Runtime ensemble members and their loader

use crate::config::MemberConfig;
use crate::error::PipelineError;
use crate::models::classifier::{Classifier, LayerTrace};
use crate::types::{ImageTensor, NormalizationFamily};
use anyhow::{Context, Result};
use ndarray::{Array1, ArrayD, Dimension, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Extra graph outputs a saliency-capable export provides
#[derive(Debug, Clone)]
struct SaliencyOutputs {
    /// Output carrying the traced layer's activations, (1, h, w, c)
    layer: String,
    /// Output carrying d(class score)/d(activations), (1, classes, h, w, c)
    gradient: String,
}

/// Classifier backed by an ONNX Runtime session.
///
/// `Session::run` needs `&mut`, so the session sits behind a mutex; the
/// weights themselves are never modified.
pub struct OnnxClassifier {
    name: String,
    family: NormalizationFamily,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    saliency: Option<SaliencyOutputs>,
}

impl OnnxClassifier {
    fn failure(&self, message: impl Into<String>) -> PipelineError {
        PipelineError::Inference {
            model: self.name.clone(),
            message: message.into(),
        }
    }

    fn input_tensor(&self, image: &ImageTensor) -> Result<Tensor<f32>, PipelineError> {
        Tensor::from_array((image.onnx_shape(), image.to_vec()))
            .map_err(|e| self.failure(format!("Failed to create input tensor: {}", e)))
    }
}

/// Drop leading batch axes of size one until `rank` dims remain
fn squeeze_leading(shape: &[i64], rank: usize) -> Option<Vec<usize>> {
    let mut dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    while dims.len() > rank && dims[0] == 1 {
        dims.remove(0);
    }
    (dims.len() == rank).then_some(dims)
}

fn to_array<D: Dimension>(shape: &[i64], data: &[f32], rank: usize) -> Result<ndarray::Array<f32, D>, String> {
    let dims = squeeze_leading(shape, rank)
        .ok_or_else(|| format!("unexpected output shape {:?} for rank {}", shape, rank))?;
    ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
        .and_then(|a| a.into_dimensionality::<D>())
        .map_err(|e| e.to_string())
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn family(&self) -> NormalizationFamily {
        self.family
    }

    fn forward(&self, image: &ImageTensor) -> Result<Array1<f32>, PipelineError> {
        let input = self.input_tensor(image)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| self.failure(format!("Lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input])
            .map_err(|e| self.failure(e.to_string()))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| self.failure(format!("missing output '{}'", self.output_name)))?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| self.failure(e.to_string()))?;

        debug!(model = %self.name, classes = data.len(), "Forward pass complete");
        Ok(Array1::from(data.to_vec()))
    }

    fn saliency_layer(&self) -> Option<&str> {
        self.saliency.as_ref().map(|s| s.layer.as_str())
    }

    fn trace_layer(&self, image: &ImageTensor, layer: &str) -> Result<LayerTrace, PipelineError> {
        let saliency_outputs = self
            .saliency
            .as_ref()
            .filter(|s| s.layer == layer)
            .ok_or_else(|| PipelineError::LayerNotFound {
                model: self.name.clone(),
                layer: layer.to_string(),
            })?;

        let input = self.input_tensor(image)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| self.failure(format!("Lock error: {}", e)))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input])
            .map_err(|e| PipelineError::saliency(e.to_string()))?;

        let extract = |name: &str| -> Result<(Vec<i64>, Vec<f32>), PipelineError> {
            let value = outputs
                .get(name)
                .ok_or_else(|| PipelineError::saliency(format!("missing output '{}'", name)))?;
            let (shape, data) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| PipelineError::saliency(e.to_string()))?;
            Ok((shape.iter().copied().collect(), data.to_vec()))
        };

        let (_, probs) = extract(&self.output_name)?;
        let (feature_shape, feature_data) = extract(&saliency_outputs.layer)?;
        let (grad_shape, grad_data) = extract(&saliency_outputs.gradient)?;

        let features = to_array(&feature_shape, &feature_data, 3).map_err(PipelineError::saliency)?;
        let class_gradients = to_array(&grad_shape, &grad_data, 4).map_err(PipelineError::saliency)?;

        Ok(LayerTrace {
            features,
            class_gradients,
            probabilities: Array1::from(probs),
        })
    }
}

/// Loader for ONNX ensemble members
pub struct OnnxLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl OnnxLoader {
    /// Create a new loader with default settings (1 thread)
    pub fn new() -> Result<Self> {
        Self::with_threads(1)
    }

    /// Create a new loader with the given intra-op thread count
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        ort::init().commit()?;
        info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    /// Load one member described by `member` from `models_dir`
    pub fn load_member<P: AsRef<Path>>(
        &self,
        models_dir: P,
        member: &MemberConfig,
    ) -> Result<OnnxClassifier> {
        let path = models_dir.as_ref().join(&member.file);
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }

        info!(model = %member.name, path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(&path)
            .context(format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        let saliency = member.saliency_layer.as_ref().and_then(|layer| {
            let gradient = member
                .gradient_output
                .clone()
                .unwrap_or_else(|| format!("{}_grad", layer));
            if output_names.contains(layer) && output_names.contains(&gradient) {
                Some(SaliencyOutputs {
                    layer: layer.clone(),
                    gradient,
                })
            } else {
                warn!(
                    model = %member.name,
                    layer = %layer,
                    gradient = %gradient,
                    "Saliency outputs not exported by graph, member is not saliency-capable"
                );
                None
            }
        });

        let is_saliency_output = |name: &str| {
            saliency
                .as_ref()
                .map(|s| s.layer == name || s.gradient == name)
                .unwrap_or(false)
        };

        let output_name = output_names
            .iter()
            .filter(|name| !is_saliency_output(name))
            .find(|name| name.contains("prob") || name.contains("output"))
            .or_else(|| output_names.iter().find(|name| !is_saliency_output(name)))
            .cloned()
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            model = %member.name,
            input = %input_name,
            output = %output_name,
            saliency_capable = saliency.is_some(),
            "Model loaded successfully"
        );

        Ok(OnnxClassifier {
            name: member.name.clone(),
            family: member.family,
            session: Mutex::new(session),
            input_name,
            output_name,
            saliency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Ix3, Ix4};

    #[test]
    fn test_squeeze_leading() {
        assert_eq!(squeeze_leading(&[1, 7, 7, 2048], 3), Some(vec![7, 7, 2048]));
        assert_eq!(squeeze_leading(&[7, 7, 2048], 3), Some(vec![7, 7, 2048]));
        assert_eq!(squeeze_leading(&[2, 7, 7, 2048], 3), None);
        assert_eq!(squeeze_leading(&[1, 3, 7, 7, 8], 4), Some(vec![3, 7, 7, 8]));
    }

    #[test]
    fn test_to_array_shapes() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let features = to_array::<Ix3>(&[1, 2, 3, 2], &data, 3).unwrap();
        assert_eq!(features.dim(), (2, 3, 2));
        assert_eq!(features[[1, 2, 1]], 11.0);

        let grads = to_array::<Ix4>(&[1, 2, 1, 3, 2], &data, 4).unwrap();
        assert_eq!(grads.dim(), (2, 1, 3, 2));

        assert!(to_array::<Ix3>(&[1, 5, 3], &data, 3).is_err());
    }

    #[test]
    fn test_missing_model_file() {
        let loader = OnnxLoader { onnx_threads: 1 };
        let member = MemberConfig {
            name: "resnet50".to_string(),
            file: "does_not_exist.onnx".to_string(),
            weight: 0.4,
            family: NormalizationFamily::Caffe,
            saliency_layer: None,
            gradient_output: None,
        };
        let err = loader.load_member("/nonexistent", &member).err().unwrap();
        assert!(err.to_string().contains("Model file not found"));
    }
}

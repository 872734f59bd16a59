//! Error taxonomy for the risk pipeline

use thiserror::Error;

/// Errors raised by the inference, explanation and scoring components.
///
/// Saliency and rendering failures are recoverable: callers degrade to
/// "no visualization" and keep going. Ensemble and scoring failures are
/// fatal to the request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// The requested layer is not exposed by the classifier
    #[error("layer '{layer}' not found in model '{model}'")]
    LayerNotFound { model: String, layer: String },

    /// Forward/backward pass for saliency failed (shape mismatch, NaN, ...)
    #[error("saliency computation failed: {0}")]
    SaliencyComputationFailed(String),

    /// No ensemble member is available
    #[error("ensemble has no loaded members")]
    EmptyEnsemble,

    /// An image could not be decoded
    #[error("image decode failed: {0}")]
    ImageDecodeFailed(String),

    /// Weights, thresholds or class layout out of the expected ranges
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// A member's forward pass failed during ensemble prediction
    #[error("inference failed for model '{model}': {message}")]
    Inference { model: String, message: String },
}

impl PipelineError {
    /// Whether the error must abort the request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyEnsemble
                | PipelineError::ConfigurationInvalid(_)
                | PipelineError::Inference { .. }
        )
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PipelineError::ConfigurationInvalid(message.into())
    }

    pub(crate) fn saliency(message: impl Into<String>) -> Self {
        PipelineError::SaliencyComputationFailed(message.into())
    }
}

//! Pneumonia Risk Pipeline Library
//!
//! Weighted ensemble inference over chest X-rays, Grad-CAM saliency maps
//! with heatmap overlays, and a threshold-gated risk score that only
//! consults symptoms and history when the image is inconclusive.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod explain;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod scoring;
pub mod types;

pub use analyzer::{Analyzer, AssessmentOutcome, AssessmentRequest, Explanation};
pub use config::AppConfig;
pub use error::PipelineError;
pub use models::{Classifier, Ensemble, GapLinearClassifier};
pub use preprocess::Preprocessor;
pub use scoring::{HistoryInput, RiskScorer, SymptomCatalog};
pub use types::{RiskAssessment, SaliencyMap, ScoreResult};

//! Type definitions for the risk pipeline

pub mod assessment;
pub mod tensor;

pub use assessment::{Rationale, RiskAssessment, RiskBand, ScoreResult};
pub use tensor::{FeatureMap, ImageTensor, NormalizationFamily, SaliencyMap};

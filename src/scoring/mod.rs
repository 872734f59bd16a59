//! Symptom, history and final risk scoring

pub mod risk;
pub mod symptoms;

pub use risk::{RiskScorer, ScoringConfig};
pub use symptoms::{history_score, HistoryInput, HistoryPolicy, Symptom, SymptomCatalog};

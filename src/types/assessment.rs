//! Risk score results and the per-image assessment report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which branch of the threshold policy produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    /// Image evidence at or above the high-confidence threshold
    HighConfidenceImage,
    /// Image evidence at or below the low-confidence threshold
    LowRiskImage,
    /// Ambiguous image, blended with symptoms and history
    AdjustedWithAuxiliary,
}

impl Rationale {
    /// Human-readable explanation
    pub fn as_str(&self) -> &'static str {
        match self {
            Rationale::HighConfidenceImage => "high confidence from image alone",
            Rationale::LowRiskImage => {
                "low risk from image; auxiliary signals ignored unless critical"
            }
            Rationale::AdjustedWithAuxiliary => {
                "adjusted using symptoms and history due to unclear image evidence"
            }
        }
    }
}

impl std::fmt::Display for Rationale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final risk on a 0-100 scale with the rationale tag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub rationale: Rationale,
}

/// Reporting band for a final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskBand {
    /// Determine band from a 0-100 score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskBandThresholds) -> Self {
        if score >= thresholds.critical {
            RiskBand::Critical
        } else if score >= thresholds.high {
            RiskBand::High
        } else if score >= thresholds.moderate {
            RiskBand::Moderate
        } else {
            RiskBand::Low
        }
    }
}

/// Configurable band cut-offs on the 0-100 scale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBandThresholds {
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskBandThresholds {
    fn default() -> Self {
        Self {
            moderate: 25.0,
            high: 50.0,
            critical: 75.0,
        }
    }
}

/// Probability assigned to one class label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassProbability {
    pub label: String,
    pub probability: f64,
}

/// One ensemble member's own output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberOutput {
    pub name: String,
    pub weight: f64,
    pub probabilities: Vec<f64>,
    /// This member's mass on non-normal classes
    pub positive_probability: f64,
}

/// Whether a heatmap accompanies the assessment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaliencySummary {
    pub available: bool,
    pub member: Option<String>,
    pub diagnostic: Option<String>,
}

/// Report produced for every analyzed image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Unique assessment identifier
    pub assessment_id: String,

    /// Image identifier (path or upload name)
    pub source: String,

    /// Combined class probabilities in class order
    pub class_probabilities: Vec<ClassProbability>,

    /// Per-member probabilities
    pub member_outputs: Vec<MemberOutput>,

    /// Probability mass on all non-normal classes
    pub positive_probability: f64,

    /// Final 0-100 risk
    pub final_score: f64,

    pub rationale: Rationale,

    pub explanation: String,

    pub risk_band: RiskBand,

    pub saliency: SaliencySummary,

    pub timestamp: DateTime<Utc>,
}

impl RiskAssessment {
    /// Create a new assessment from a score
    pub fn new(
        source: String,
        positive_probability: f64,
        result: ScoreResult,
        thresholds: &RiskBandThresholds,
    ) -> Self {
        Self {
            assessment_id: uuid::Uuid::new_v4().to_string(),
            source,
            class_probabilities: Vec::new(),
            member_outputs: Vec::new(),
            positive_probability,
            final_score: result.score,
            rationale: result.rationale,
            explanation: result.rationale.as_str().to_string(),
            risk_band: RiskBand::from_score(result.score, thresholds),
            saliency: SaliencySummary::default(),
            timestamp: Utc::now(),
        }
    }

    /// Attach labelled class probabilities
    pub fn with_class_probabilities(mut self, labels: &[String], probabilities: &[f64]) -> Self {
        self.class_probabilities = probabilities
            .iter()
            .enumerate()
            .map(|(i, &probability)| ClassProbability {
                label: labels
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", i)),
                probability,
            })
            .collect();
        self
    }

    pub fn with_member_outputs(mut self, outputs: Vec<MemberOutput>) -> Self {
        self.member_outputs = outputs;
        self
    }

    pub fn with_saliency(mut self, saliency: SaliencySummary) -> Self {
        self.saliency = saliency;
        self
    }
}

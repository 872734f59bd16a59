//! Threshold-gated risk policy
//!
//! Clear image evidence (either extreme) is reported as-is; only an
//! ambiguous image is blended with symptom and history signals.

use crate::error::PipelineError;
use crate::models::combiner::positive_mass;
use crate::types::assessment::RiskBandThresholds;
use crate::types::{Rationale, ScoreResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Weights and thresholds of the risk policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub xray_weight: f64,
    pub symptom_weight: f64,
    pub past_weight: f64,
    /// Inclusive: positive probability >= this skips blending
    pub high_conf_threshold: f64,
    /// Inclusive: positive probability <= this skips blending
    pub low_conf_threshold: f64,
    /// Per reported prior episode
    pub history_per_event: f64,
    pub history_max_boost: f64,
    /// Reporting bands on the 0-100 scale
    pub bands: RiskBandThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            xray_weight: 0.6,
            symptom_weight: 0.3,
            past_weight: 0.1,
            high_conf_threshold: 0.9,
            low_conf_threshold: 0.1,
            history_per_event: 0.05,
            history_max_boost: 0.2,
            bands: RiskBandThresholds::default(),
        }
    }
}

impl ScoringConfig {
    /// Range checks. The three blend weights are not required to sum to 1;
    /// if they don't, blended scores may leave [0, 100].
    pub fn validate(&self) -> Result<(), PipelineError> {
        let unit = |name: &str, v: f64| {
            if v.is_finite() && (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(PipelineError::invalid(format!("{} = {} must lie in [0, 1]", name, v)))
            }
        };

        unit("xray_weight", self.xray_weight)?;
        unit("symptom_weight", self.symptom_weight)?;
        unit("past_weight", self.past_weight)?;
        unit("high_conf_threshold", self.high_conf_threshold)?;
        unit("low_conf_threshold", self.low_conf_threshold)?;
        unit("history_per_event", self.history_per_event)?;
        unit("history_max_boost", self.history_max_boost)?;

        if self.low_conf_threshold >= self.high_conf_threshold {
            return Err(PipelineError::invalid(format!(
                "low_conf_threshold {} must be below high_conf_threshold {}",
                self.low_conf_threshold, self.high_conf_threshold
            )));
        }

        let bands = &self.bands;
        if !(bands.moderate <= bands.high && bands.high <= bands.critical) {
            return Err(PipelineError::invalid("risk bands must be non-decreasing"));
        }

        Ok(())
    }

    pub fn blend_weight_sum(&self) -> f64 {
        self.xray_weight + self.symptom_weight + self.past_weight
    }
}

/// Maps image probabilities plus auxiliary signals to a 0-100 risk
#[derive(Debug, Clone)]
pub struct RiskScorer {
    config: ScoringConfig,
    normal_index: usize,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig, normal_index: usize) -> Result<Self, PipelineError> {
        config.validate()?;

        let sum = config.blend_weight_sum();
        if (sum - 1.0).abs() > 1e-6 {
            warn!(
                weight_sum = sum,
                "Blend weights do not sum to 1, blended scores may leave [0, 100]"
            );
        }

        Ok(Self {
            config,
            normal_index,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn normal_index(&self) -> usize {
        self.normal_index
    }

    /// Mass on all non-normal classes
    pub fn positive_probability(&self, probabilities: &[f64]) -> Result<f64, PipelineError> {
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(PipelineError::invalid(format!(
                "non-finite class probability in {:?}",
                probabilities
            )));
        }
        if self.normal_index >= probabilities.len() {
            return Err(PipelineError::invalid(format!(
                "normal class index {} out of range for {} classes",
                self.normal_index,
                probabilities.len()
            )));
        }
        Ok(positive_mass(probabilities, self.normal_index))
    }

    /// Apply the three-branch policy
    pub fn final_score(
        &self,
        probabilities: &[f64],
        symptom_score: f64,
        history_score: f64,
    ) -> Result<ScoreResult, PipelineError> {
        let positive = self.positive_probability(probabilities)?;
        if !symptom_score.is_finite() || !history_score.is_finite() {
            return Err(PipelineError::invalid(format!(
                "non-finite auxiliary score: symptoms {}, history {}",
                symptom_score, history_score
            )));
        }
        let cfg = &self.config;

        let result = if positive >= cfg.high_conf_threshold {
            ScoreResult {
                score: positive * 100.0,
                rationale: Rationale::HighConfidenceImage,
            }
        } else if positive <= cfg.low_conf_threshold {
            ScoreResult {
                score: positive * 100.0,
                rationale: Rationale::LowRiskImage,
            }
        } else {
            let blended = positive * cfg.xray_weight
                + symptom_score * cfg.symptom_weight
                + history_score * cfg.past_weight;
            ScoreResult {
                score: blended * 100.0,
                rationale: Rationale::AdjustedWithAuxiliary,
            }
        };

        debug!(
            positive_probability = positive,
            symptom_score = symptom_score,
            history_score = history_score,
            score = result.score,
            rationale = ?result.rationale,
            "Risk scored"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RiskScorer {
        RiskScorer::new(ScoringConfig::default(), 0).unwrap()
    }

    #[test]
    fn test_high_confidence_ignores_auxiliary() {
        let probs = [0.02, 0.01, 0.97];
        for (symptoms, history) in [(0.0, 0.0), (1.0, 0.2), (0.3, 0.1)] {
            let result = scorer().final_score(&probs, symptoms, history).unwrap();
            assert!((result.score - 98.0).abs() < 1e-9);
            assert_eq!(result.rationale, Rationale::HighConfidenceImage);
        }
    }

    #[test]
    fn test_low_risk() {
        let result = scorer().final_score(&[0.95, 0.03, 0.02], 1.0, 0.2).unwrap();
        assert!((result.score - 5.0).abs() < 1e-9);
        assert_eq!(result.rationale, Rationale::LowRiskImage);
    }

    #[test]
    fn test_ambiguous_blends() {
        let result = scorer().final_score(&[0.5, 0.3, 0.2], 0.8, 0.2).unwrap();
        assert!((result.score - 56.0).abs() < 1e-9);
        assert_eq!(result.rationale, Rationale::AdjustedWithAuxiliary);
    }

    #[test]
    fn test_threshold_boundaries_inclusive() {
        let s = scorer();

        let at_high = s.final_score(&[0.1, 0.9], 0.0, 0.0).unwrap();
        assert_eq!(at_high.rationale, Rationale::HighConfidenceImage);
        assert!((at_high.score - 90.0).abs() < 1e-9);

        let below_high = s.final_score(&[0.11, 0.89], 0.0, 0.0).unwrap();
        assert_eq!(below_high.rationale, Rationale::AdjustedWithAuxiliary);

        let at_low = s.final_score(&[0.9, 0.1], 1.0, 0.2).unwrap();
        assert_eq!(at_low.rationale, Rationale::LowRiskImage);
        assert!((at_low.score - 10.0).abs() < 1e-9);

        let above_low = s.final_score(&[0.89, 0.11], 0.0, 0.0).unwrap();
        assert_eq!(above_low.rationale, Rationale::AdjustedWithAuxiliary);
    }

    #[test]
    fn test_non_finite_probabilities_rejected() {
        let s = scorer();

        let err = s.final_score(&[0.5, f64::NAN, 0.2], 0.3, 0.1).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationInvalid(_)));
        assert!(err.is_fatal());

        assert!(s.final_score(&[0.5, f64::INFINITY, 0.2], 0.3, 0.1).is_err());
        assert!(s.positive_probability(&[f64::NAN, 0.5]).is_err());

        let err = s.final_score(&[0.5, 0.3, 0.2], f64::NAN, 0.1).unwrap_err();
        assert!(err.is_fatal());
        assert!(s.final_score(&[0.5, 0.3, 0.2], 0.3, f64::INFINITY).is_err());
    }

    #[test]
    fn test_widened_f32_member_output_below_threshold() {
        // 0.9f32 widens to 0.8999999761581421, just under the inclusive cut-off
        let widened = 0.9_f32 as f64;
        let result = scorer().final_score(&[1.0 - widened, widened], 0.0, 0.0).unwrap();
        assert_eq!(result.rationale, Rationale::AdjustedWithAuxiliary);
    }

    #[test]
    fn test_two_class_layout() {
        let result = scorer().final_score(&[0.4, 0.6], 0.0, 0.0).unwrap();
        assert!((result.score - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_normal_index_out_of_range() {
        let s = RiskScorer::new(ScoringConfig::default(), 3).unwrap();
        let err = s.final_score(&[0.5, 0.5], 0.0, 0.0).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validation() {
        let inverted = ScoringConfig {
            low_conf_threshold: 0.9,
            high_conf_threshold: 0.1,
            ..ScoringConfig::default()
        };
        assert!(RiskScorer::new(inverted, 0).is_err());

        let out_of_range = ScoringConfig {
            xray_weight: 1.5,
            ..ScoringConfig::default()
        };
        assert!(matches!(
            out_of_range.validate(),
            Err(PipelineError::ConfigurationInvalid(_))
        ));

        // Weights that don't sum to 1 are accepted
        let unbalanced = ScoringConfig {
            xray_weight: 0.9,
            symptom_weight: 0.9,
            past_weight: 0.9,
            ..ScoringConfig::default()
        };
        assert!(RiskScorer::new(unbalanced, 0).is_ok());
    }
}

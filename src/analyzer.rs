//! Predict, explain and score one chest X-ray

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::explain::{compute_saliency, render, RenderOptions};
use crate::models::combiner::positive_mass;
use crate::models::{Ensemble, SharedEnsemble};
use crate::scoring::{HistoryInput, HistoryPolicy, RiskScorer, SymptomCatalog};
use crate::types::assessment::{MemberOutput, SaliencySummary};
use crate::types::{ImageTensor, RiskAssessment, SaliencyMap, ScoreResult};
use image::RgbImage;
use ndarray::Array1;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Saliency map and rendered overlay; either may be missing
#[derive(Debug, Clone, Default)]
pub struct Explanation {
    pub saliency: Option<SaliencyMap>,
    pub rendered: Option<RgbImage>,
    /// Member the map was traced through
    pub member: Option<String>,
    /// Why the map or the overlay is missing
    pub diagnostic: Option<String>,
}

impl Explanation {
    fn unavailable(member: Option<String>, diagnostic: String) -> Self {
        Self {
            member,
            diagnostic: Some(diagnostic),
            ..Self::default()
        }
    }

    pub fn summary(&self) -> SaliencySummary {
        SaliencySummary {
            available: self.saliency.is_some(),
            member: self.member.clone(),
            diagnostic: self.diagnostic.clone(),
        }
    }
}

/// Inputs for one end-to-end assessment
#[derive(Debug, Clone)]
pub struct AssessmentRequest {
    /// Image identifier carried into the report
    pub source: String,
    pub image: ImageTensor,
    /// Original-resolution image for the overlay
    pub reference: Option<RgbImage>,
    /// Symptom identifiers reported for the patient
    pub symptoms: Vec<String>,
    pub history: HistoryInput,
}

/// Report plus the visual artifacts behind it
#[derive(Debug, Clone)]
pub struct AssessmentOutcome {
    pub assessment: RiskAssessment,
    pub explanation: Explanation,
}

/// Facade over ensemble, saliency engine, renderer and risk scorer
pub struct Analyzer {
    ensemble: SharedEnsemble,
    scorer: RiskScorer,
    catalog: Arc<SymptomCatalog>,
    history: HistoryPolicy,
    labels: Vec<String>,
    render_options: RenderOptions,
}

impl Analyzer {
    pub fn new(
        ensemble: Ensemble,
        scorer: RiskScorer,
        catalog: Arc<SymptomCatalog>,
        history: HistoryPolicy,
        labels: Vec<String>,
        render_options: RenderOptions,
    ) -> Self {
        Self {
            ensemble: SharedEnsemble::new(ensemble),
            scorer,
            catalog,
            history,
            labels,
            render_options,
        }
    }

    /// Build from validated configuration and a loaded ensemble
    pub fn from_config(config: &AppConfig, ensemble: Ensemble) -> Result<Self, PipelineError> {
        config.validate()?;
        let scorer = RiskScorer::new(config.scoring.clone(), config.classes.normal_index)?;
        let catalog = Arc::new(config.symptom_catalog()?);

        info!(
            members = ?ensemble.member_names(),
            symptoms = catalog.len(),
            classes = ?config.classes.labels,
            "Analyzer initialized"
        );

        Ok(Self::new(
            ensemble,
            scorer,
            catalog,
            config.history_policy(),
            config.classes.labels.clone(),
            config.rendering.clone(),
        ))
    }

    pub fn ensemble(&self) -> Arc<Ensemble> {
        self.ensemble.current()
    }

    pub fn catalog(&self) -> &SymptomCatalog {
        &self.catalog
    }

    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Swap in a freshly loaded ensemble; in-flight requests keep the old one
    pub fn reload(&self, ensemble: Ensemble) -> Arc<Ensemble> {
        self.ensemble.swap(ensemble)
    }

    /// Combined class probabilities
    pub fn predict(&self, image: &ImageTensor) -> Result<Array1<f64>, PipelineError> {
        self.ensemble.current().predict(image)
    }

    /// Saliency map and overlay. Never fails: problems end up in `diagnostic`.
    pub fn explain(&self, image: &ImageTensor, reference: Option<&RgbImage>) -> Explanation {
        let ensemble = self.ensemble.current();
        explain_with(&ensemble, image, reference, &self.render_options)
    }

    /// Final risk from probabilities and auxiliary signals
    pub fn score<S: AsRef<str>>(
        &self,
        probabilities: &[f64],
        symptoms: &[S],
        history: HistoryInput,
    ) -> Result<ScoreResult, PipelineError> {
        let symptom_score = self.catalog.score(symptoms.iter().map(|s| s.as_ref()));
        let history_score = self.history.score(history);
        self.scorer.final_score(probabilities, symptom_score, history_score)
    }

    /// Predict, explain and score with one ensemble snapshot
    pub fn assess(&self, request: &AssessmentRequest) -> Result<AssessmentOutcome, PipelineError> {
        let ensemble = self.ensemble.current();

        let prediction = ensemble.predict_detailed(&request.image)?;
        let probabilities = prediction.probabilities.to_vec();

        let explanation = explain_with(
            &ensemble,
            &request.image,
            request.reference.as_ref(),
            &self.render_options,
        );

        let result = self.score(&probabilities, &request.symptoms, request.history)?;
        let positive = self.scorer.positive_probability(&probabilities)?;
        let normal_index = self.scorer.normal_index();

        let member_outputs = prediction
            .member_probabilities
            .iter()
            .map(|(name, weight, probs)| {
                let probs: Vec<f64> = probs.iter().map(|&p| p as f64).collect();
                let positive_probability = if normal_index < probs.len() {
                    positive_mass(&probs, normal_index)
                } else {
                    0.0
                };
                MemberOutput {
                    name: name.clone(),
                    weight: *weight,
                    probabilities: probs,
                    positive_probability,
                }
            })
            .collect();

        let assessment = RiskAssessment::new(
            request.source.clone(),
            positive,
            result,
            &self.scorer.config().bands,
        )
        .with_class_probabilities(&self.labels, &probabilities)
        .with_member_outputs(member_outputs)
        .with_saliency(explanation.summary());

        info!(
            source = %assessment.source,
            score = assessment.final_score,
            rationale = ?assessment.rationale,
            band = ?assessment.risk_band,
            saliency = assessment.saliency.available,
            "Assessment complete"
        );

        Ok(AssessmentOutcome {
            assessment,
            explanation,
        })
    }
}

fn explain_with(
    ensemble: &Ensemble,
    image: &ImageTensor,
    reference: Option<&RgbImage>,
    options: &RenderOptions,
) -> Explanation {
    let member = match ensemble.saliency_member() {
        Some(member) => member,
        None => {
            debug!("No saliency-capable member loaded");
            return Explanation::unavailable(None, "no saliency-capable member".to_string());
        }
    };
    let name = member.classifier.name().to_string();
    let layer = match member.classifier.saliency_layer() {
        Some(layer) => layer,
        None => {
            return Explanation::unavailable(Some(name), "member exposes no saliency layer".to_string())
        }
    };

    let output = match compute_saliency(image, member.classifier.as_ref(), layer, None) {
        Ok(output) => output,
        Err(e) => {
            warn!(model = %name, layer = %layer, error = %e, "Saliency unavailable");
            return Explanation::unavailable(Some(name), e.to_string());
        }
    };

    let (rendered, diagnostic) = match reference {
        Some(reference) => match render(&output.map, reference, options) {
            Some(image) => (Some(image), None),
            None => (None, Some("overlay could not be rendered".to_string())),
        },
        None => (None, Some("no reference image for overlay".to_string())),
    };

    Explanation {
        saliency: Some(output.map),
        rendered,
        member: Some(name),
        diagnostic,
    }
}

//! Weighted soft-voting ensemble of independently trained classifiers

use crate::config::ModelsConfig;
use crate::error::PipelineError;
use crate::models::classifier::Classifier;
use crate::models::combiner::weighted_average;
use crate::models::onnx::OnnxLoader;
use crate::types::ImageTensor;
use ndarray::Array1;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// One loaded member with its trust weight
#[derive(Clone)]
pub struct Member {
    pub classifier: Arc<dyn Classifier>,
    pub weight: f64,
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.classifier.name())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Result of ensemble inference
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    /// Weighted average over members
    pub probabilities: Array1<f64>,
    /// Each member's own vector, in member order
    pub member_probabilities: Vec<(String, f64, Array1<f32>)>,
}

/// Immutable set of members; construct through [`EnsembleBuilder`].
#[derive(Debug, Clone)]
pub struct Ensemble {
    members: Vec<Member>,
    saliency_member: Option<usize>,
}

impl Ensemble {
    pub fn builder() -> EnsembleBuilder {
        EnsembleBuilder::default()
    }

    /// Load ONNX members from configuration, skipping the ones that fail
    pub fn load(config: &ModelsConfig) -> anyhow::Result<Self> {
        let loader = OnnxLoader::with_threads(config.onnx_threads)?;
        let mut builder = Ensemble::builder();
        if let Some(name) = &config.saliency_member {
            builder = builder.saliency_member(name);
        }

        for member in &config.members {
            builder = match loader.load_member(&config.models_dir, member) {
                Ok(classifier) => builder.member(Arc::new(classifier), member.weight),
                Err(e) => builder.unavailable(&member.name, &e.to_string()),
            };
        }

        let ensemble = builder.build()?;
        info!(
            count = ensemble.len(),
            members = ?ensemble.member_names(),
            "Loaded {} models from {}",
            ensemble.len(),
            config.models_dir
        );
        Ok(ensemble)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members
            .iter()
            .map(|m| m.classifier.name().to_string())
            .collect()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.weight).collect()
    }

    /// Member designated for saliency, if any member supports it
    pub fn saliency_member(&self) -> Option<&Member> {
        self.saliency_member.map(|i| &self.members[i])
    }

    /// Combined probability vector
    pub fn predict(&self, image: &ImageTensor) -> Result<Array1<f64>, PipelineError> {
        self.predict_detailed(image).map(|p| p.probabilities)
    }

    /// Combined vector plus each member's own output
    pub fn predict_detailed(&self, image: &ImageTensor) -> Result<EnsemblePrediction, PipelineError> {
        if self.members.is_empty() {
            return Err(PipelineError::EmptyEnsemble);
        }

        let mut member_probabilities = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let name = member.classifier.name();
            if member.classifier.family() != image.family() {
                warn!(
                    model = %name,
                    expected = ?member.classifier.family(),
                    got = ?image.family(),
                    "Input normalization does not match member family"
                );
            }

            let probabilities = member.classifier.forward(image)?;
            if probabilities.iter().any(|p| !p.is_finite()) {
                return Err(PipelineError::Inference {
                    model: name.to_string(),
                    message: "non-finite probability".to_string(),
                });
            }
            member_probabilities.push((name.to_string(), member.weight, probabilities));
        }

        let views: Vec<_> = member_probabilities
            .iter()
            .map(|(_, weight, p)| (p.view(), *weight))
            .collect();
        let probabilities = weighted_average(&views)?;

        debug!(
            members = self.members.len(),
            probabilities = ?probabilities.as_slice(),
            "Ensemble inference complete"
        );

        Ok(EnsemblePrediction {
            probabilities,
            member_probabilities,
        })
    }
}

/// Collects members and yields a consistent (handles, weights) ensemble.
#[derive(Default)]
pub struct EnsembleBuilder {
    members: Vec<Member>,
    skipped: Vec<String>,
    saliency_member: Option<String>,
}

impl EnsembleBuilder {
    pub fn member(mut self, classifier: Arc<dyn Classifier>, weight: f64) -> Self {
        self.members.push(Member { classifier, weight });
        self
    }

    /// Record a member that failed to load; its weight never enters the ensemble
    pub fn unavailable(mut self, name: &str, reason: &str) -> Self {
        warn!(model = %name, error = %reason, "Failed to load model, skipping");
        self.skipped.push(name.to_string());
        self
    }

    /// Prefer this member for saliency instead of the first capable one
    pub fn saliency_member(mut self, name: &str) -> Self {
        self.saliency_member = Some(name.to_string());
        self
    }

    pub fn build(self) -> Result<Ensemble, PipelineError> {
        if self.members.is_empty() {
            return Err(PipelineError::EmptyEnsemble);
        }

        for member in &self.members {
            if !member.weight.is_finite() || member.weight < 0.0 {
                return Err(PipelineError::invalid(format!(
                    "weight {} for '{}' must be finite and non-negative",
                    member.weight,
                    member.classifier.name()
                )));
            }
        }
        if self.members.iter().map(|m| m.weight).sum::<f64>() <= 0.0 {
            return Err(PipelineError::invalid("member weights sum to zero"));
        }

        let capable = |m: &Member| m.classifier.saliency_layer().is_some();
        let preferred = self.saliency_member.as_ref().and_then(|name| {
            let found = self
                .members
                .iter()
                .position(|m| m.classifier.name() == name && capable(m));
            if found.is_none() {
                warn!(model = %name, "Preferred saliency member unavailable, using first capable member");
            }
            found
        });
        let saliency_member = preferred.or_else(|| self.members.iter().position(capable));

        if !self.skipped.is_empty() {
            info!(skipped = ?self.skipped, remaining = self.members.len(), "Ensemble built without some members");
        }

        Ok(Ensemble {
            members: self.members,
            saliency_member,
        })
    }
}

/// Ensemble reference that can be swapped atomically while requests run.
///
/// Readers take a snapshot `Arc` and keep using it for the whole request;
/// a reload never mutates members in place.
pub struct SharedEnsemble {
    current: RwLock<Arc<Ensemble>>,
}

impl SharedEnsemble {
    pub fn new(ensemble: Ensemble) -> Self {
        Self {
            current: RwLock::new(Arc::new(ensemble)),
        }
    }

    pub fn current(&self) -> Arc<Ensemble> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the ensemble, returning the previous one
    pub fn swap(&self, ensemble: Ensemble) -> Arc<Ensemble> {
        let next = Arc::new(ensemble);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(members = next.len(), "Ensemble swapped");
        std::mem::replace(&mut *guard, next)
    }
}

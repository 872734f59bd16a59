//! Configuration management for the risk pipeline

use crate::error::PipelineError;
use crate::explain::render::RenderOptions;
use crate::scoring::risk::ScoringConfig;
use crate::scoring::symptoms::{HistoryPolicy, Symptom, SymptomCatalog};
use crate::types::NormalizationFamily;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub models: ModelsConfig,
    #[serde(default)]
    pub classes: ClassesConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Catalog override; the built-in table is used when absent
    #[serde(default)]
    pub symptoms: Option<Vec<Symptom>>,
    #[serde(default)]
    pub rendering: RenderOptions,
    #[serde(default)]
    pub preprocessing: PreprocessingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ensemble members configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing ONNX model files
    pub models_dir: String,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Member preferred for saliency; first capable member otherwise
    #[serde(default)]
    pub saliency_member: Option<String>,
    /// Members in load order
    pub members: Vec<MemberConfig>,
}

/// One ensemble member
#[derive(Debug, Clone, Deserialize)]
pub struct MemberConfig {
    pub name: String,
    /// File name relative to `models_dir`
    pub file: String,
    /// Trust weight
    pub weight: f64,
    #[serde(default)]
    pub family: NormalizationFamily,
    /// Layer exported for saliency, e.g. "conv5_block3_out"
    #[serde(default)]
    pub saliency_layer: Option<String>,
    /// Gradient output name (default: "<layer>_grad")
    #[serde(default)]
    pub gradient_output: Option<String>,
}

fn default_onnx_threads() -> usize {
    1
}

/// Ordered class layout shared by all members
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassesConfig {
    pub labels: Vec<String>,
    /// Index of the "normal" class; every other class counts as positive
    pub normal_index: usize,
}

impl Default for ClassesConfig {
    fn default() -> Self {
        Self {
            labels: vec![
                "normal".to_string(),
                "bacterial".to_string(),
                "viral".to_string(),
            ],
            normal_index: 0,
        }
    }
}

/// Preprocessing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Square input edge in pixels
    pub target_size: u32,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self { target_size: 224 }
    }
}

/// Batch driver configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Images processed in parallel
    pub workers: usize,
    /// Directory for rendered heatmaps
    pub output_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            output_dir: "output".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Range checks across sections
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.models.members.is_empty() {
            return Err(PipelineError::invalid("no ensemble members configured"));
        }
        for member in &self.models.members {
            if !member.weight.is_finite() || member.weight < 0.0 {
                return Err(PipelineError::invalid(format!(
                    "weight {} for '{}' must be finite and non-negative",
                    member.weight, member.name
                )));
            }
        }

        if self.classes.labels.is_empty() || self.classes.normal_index >= self.classes.labels.len() {
            return Err(PipelineError::invalid(format!(
                "normal_index {} out of range for {} labels",
                self.classes.normal_index,
                self.classes.labels.len()
            )));
        }

        self.scoring.validate()?;

        let alpha = self.rendering.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(PipelineError::invalid(format!("rendering alpha {} must lie in (0, 1)", alpha)));
        }

        if self.preprocessing.target_size == 0 || self.pipeline.workers == 0 {
            return Err(PipelineError::invalid("target_size and workers must be positive"));
        }

        Ok(())
    }

    /// Configured catalog or the built-in table
    pub fn symptom_catalog(&self) -> Result<SymptomCatalog, PipelineError> {
        match &self.symptoms {
            Some(entries) => SymptomCatalog::new(entries.clone()),
            None => Ok(SymptomCatalog::builtin()),
        }
    }

    pub fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy {
            per_event: self.scoring.history_per_event,
            max_boost: self.scoring.history_max_boost,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let member = |name: &str, weight: f64, layer: Option<&str>| MemberConfig {
            name: name.to_string(),
            file: format!("{}.onnx", name),
            weight,
            family: NormalizationFamily::Caffe,
            saliency_layer: layer.map(str::to_string),
            gradient_output: None,
        };

        Self {
            models: ModelsConfig {
                models_dir: "models".to_string(),
                onnx_threads: 1,
                saliency_member: Some("resnet50".to_string()),
                members: vec![
                    member("resnet50", 0.4, Some("conv5_block3_out")),
                    member("efficientnetv2s", 0.4, None),
                    member("vit_tiny", 0.2, None),
                ],
            },
            classes: ClassesConfig::default(),
            scoring: ScoringConfig::default(),
            symptoms: None,
            rendering: RenderOptions::default(),
            preprocessing: PreprocessingConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

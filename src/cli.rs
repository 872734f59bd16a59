//! Command-line arguments for the batch binary

use crate::scoring::HistoryInput;
use clap::{Parser, ValueHint};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Score chest X-rays for pneumonia risk and render saliency heatmaps"
)]
pub struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config/config.toml", value_hint = ValueHint::FilePath)]
    pub config: PathBuf,

    /// Images to assess
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    pub images: Vec<PathBuf>,

    /// Reported symptom identifier (repeatable)
    #[arg(long = "symptom", value_name = "ID")]
    pub symptoms: Vec<String>,

    /// Prior pneumonia: yes, no, or number of episodes
    #[arg(long, default_value = "no", value_name = "N|yes|no")]
    pub history: HistoryInput,

    /// Overrides `pipeline.output_dir`
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub output_dir: Option<PathBuf>,
}

/// Output paths for one input image: (overlay, raw map)
pub fn artifact_paths(output_dir: &Path, image: &Path) -> (PathBuf, PathBuf) {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    (
        output_dir.join(format!("{}_heatmap.png", stem)),
        output_dir.join(format!("{}_saliency.png", stem)),
    )
}

//! Pneumonia Risk Pipeline - Main Entry Point
//!
//! Assesses a batch of chest X-rays: ensemble inference, saliency heatmaps,
//! and a risk score per image printed as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use pneumonia_risk_pipeline::{
    cli::{artifact_paths, Cli},
    config::{AppConfig, LoggingConfig},
    explain::grayscale,
    metrics::PipelineMetrics,
    models::Ensemble,
    preprocess::{load_image, Preprocessor},
    types::NormalizationFamily,
    Analyzer, AssessmentRequest, HistoryInput,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("pneumonia_risk_pipeline={}", logging.level).parse()?);

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

struct Shared {
    analyzer: Analyzer,
    preprocessor: Preprocessor,
    family: NormalizationFamily,
    metrics: PipelineMetrics,
    output_dir: PathBuf,
    symptoms: Vec<String>,
    history: HistoryInput,
}

/// Assess one image and write its artifacts; returns the JSON report line
fn process_image(shared: &Shared, path: &Path) -> Result<String> {
    let start_time = Instant::now();

    let decoded = load_image(path)?;
    let reference = decoded.to_rgb8();
    let image = shared.preprocessor.prepare(&decoded, shared.family);

    let request = AssessmentRequest {
        source: path.display().to_string(),
        image,
        reference: Some(reference),
        symptoms: shared.symptoms.clone(),
        history: shared.history,
    };
    let outcome = shared.analyzer.assess(&request)?;
    let processing_time = start_time.elapsed();
    shared.metrics.record_assessment(processing_time, &outcome.assessment);

    let (heatmap_path, raw_path) = artifact_paths(&shared.output_dir, path);
    if let Some(overlay) = &outcome.explanation.rendered {
        match overlay.save(&heatmap_path) {
            Ok(()) => debug!(path = %heatmap_path.display(), "Heatmap written"),
            Err(e) => warn!(path = %heatmap_path.display(), error = %e, "Failed to write heatmap"),
        }
    }
    if let Some(map) = &outcome.explanation.saliency {
        if let Err(e) = grayscale(map).save(&raw_path) {
            warn!(path = %raw_path.display(), error = %e, "Failed to write saliency map");
        }
    }

    debug!(
        source = %outcome.assessment.source,
        processing_time_us = processing_time.as_micros(),
        "Image processed"
    );

    serde_json::to_string(&outcome.assessment).context("Failed to serialize assessment")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load_from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    // Initialize logging
    init_logging(&config.logging)?;
    info!("Starting Pneumonia Risk Pipeline");

    config.validate()?;
    info!("Configuration loaded successfully");
    info!(
        "Confidence thresholds: low<={:.2}, high>={:.2}, blend weights x-ray={:.2} symptoms={:.2} history={:.2}",
        config.scoring.low_conf_threshold,
        config.scoring.high_conf_threshold,
        config.scoring.xray_weight,
        config.scoring.symptom_weight,
        config.scoring.past_weight
    );

    // Load the ensemble; unavailable members are skipped
    let ensemble = Ensemble::load(&config.models)?;

    // Inputs are prepared for the saliency member, else the first member
    let family = ensemble
        .saliency_member()
        .or_else(|| ensemble.members().first())
        .map(|m| m.classifier.family())
        .unwrap_or_default();

    let analyzer = Analyzer::from_config(&config, ensemble)?;
    let unknown: Vec<&String> = cli
        .symptoms
        .iter()
        .filter(|id| analyzer.catalog().get(id).is_none())
        .collect();
    if !unknown.is_empty() {
        warn!(symptoms = ?unknown, "Unknown symptom identifiers are ignored");
    }

    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.pipeline.output_dir));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let shared = Arc::new(Shared {
        analyzer,
        preprocessor: Preprocessor::new(config.preprocessing.target_size),
        family,
        metrics: PipelineMetrics::new(),
        output_dir,
        symptoms: cli.symptoms.clone(),
        history: cli.history,
    });

    let num_workers = config.pipeline.workers;
    info!(
        "Assessing {} images with {} parallel workers",
        cli.images.len(),
        num_workers
    );

    // Semaphore to limit concurrent processing
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::with_capacity(cli.images.len());

    for path in cli.images {
        // Acquire permit (limits concurrent tasks)
        let permit = semaphore.clone().acquire_owned().await?;
        let shared = shared.clone();
        let processed_count = processed_count.clone();

        handles.push(tokio::task::spawn_blocking(move || {
            match process_image(&shared, &path) {
                Ok(line) => {
                    println!("{}", line);
                    let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if count % 100 == 0 {
                        let processing_stats = shared.metrics.get_processing_stats();
                        info!(
                            processed = count,
                            throughput = format!("{:.1} img/s", shared.metrics.get_throughput()),
                            avg_latency_us = processing_stats.mean_us,
                            "Processing milestone"
                        );
                    }
                }
                Err(e) => {
                    shared.metrics.record_failure();
                    error!(image = %path.display(), error = %e, "Assessment failed");
                }
            }

            // Release permit when done
            drop(permit);
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked");
        }
    }

    // Print final summary
    info!("Pipeline shutting down...");
    shared.metrics.print_summary();

    Ok(())
}

//! Processing statistics for batches of assessments.

use crate::types::{Rationale, RiskAssessment};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline runs
pub struct PipelineMetrics {
    /// Total images assessed
    pub assessments_processed: AtomicU64,
    /// Images that failed before a score was produced
    pub assessments_failed: AtomicU64,
    /// Assessments delivered without a heatmap
    pub saliency_unavailable: AtomicU64,
    /// Assessments per policy branch
    rationale_counts: RwLock<HashMap<Rationale, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Final-score distribution buckets (0-10, 10-20, ...)
    score_buckets: RwLock<[u64; 10]>,
    /// Start time for rate calculation
    start_time: Instant,
    /// Member agreement per assessment
    member_agreements: RwLock<Vec<f64>>,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            assessments_processed: AtomicU64::new(0),
            assessments_failed: AtomicU64::new(0),
            saliency_unavailable: AtomicU64::new(0),
            rationale_counts: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
            member_agreements: RwLock::new(Vec::with_capacity(1000)),
        }
    }

    /// Record a completed assessment
    pub fn record_assessment(&self, processing_time: Duration, assessment: &RiskAssessment) {
        self.assessments_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only last 10000 for memory efficiency
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = (assessment.final_score / 10.0).clamp(0.0, 9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }

        if let Ok(mut counts) = self.rationale_counts.write() {
            *counts.entry(assessment.rationale).or_insert(0) += 1;
        }

        if !assessment.saliency.available {
            self.saliency_unavailable.fetch_add(1, Ordering::Relaxed);
        }

        let positives: Vec<f64> = assessment
            .member_outputs
            .iter()
            .map(|m| m.positive_probability)
            .collect();
        self.record_member_agreement(&positives);
    }

    /// Record a request that failed fatally
    pub fn record_failure(&self) {
        self.assessments_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record member agreement (1 - std dev of member positive probabilities)
    pub fn record_member_agreement(&self, positives: &[f64]) {
        if positives.len() < 2 {
            return;
        }

        let mean = positives.iter().sum::<f64>() / positives.len() as f64;
        let variance =
            positives.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / positives.len() as f64;
        let agreement = 1.0 - variance.sqrt().min(1.0);

        if let Ok(mut agreements) = self.member_agreements.write() {
            agreements.push(agreement);
            if agreements.len() > 1000 {
                agreements.drain(0..500);
            }
        }
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let times = match self.processing_times.read() {
            Ok(times) => times,
            Err(_) => return ProcessingStats::default(),
        };
        if times.is_empty() {
            return ProcessingStats::default();
        }

        let mut sorted: Vec<u64> = times.clone();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: *sorted.last().unwrap_or(&0),
        }
    }

    /// Get average member agreement
    pub fn get_avg_agreement(&self) -> f64 {
        match self.member_agreements.read() {
            Ok(agreements) if !agreements.is_empty() => {
                agreements.iter().sum::<f64>() / agreements.len() as f64
            }
            _ => 0.0,
        }
    }

    /// Get current throughput (images per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.assessments_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Get assessments per rationale
    pub fn get_rationale_counts(&self) -> HashMap<Rationale, u64> {
        self.rationale_counts
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let processed = self.assessments_processed.load(Ordering::Relaxed);
        let failed = self.assessments_failed.load(Ordering::Relaxed);
        let no_map = self.saliency_unavailable.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();
        let agreement = self.get_avg_agreement();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            PNEUMONIA RISK PIPELINE - RUN SUMMARY             ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Images Assessed: {:>8}  │  Failed: {:>6}  │  No map: {:>5} ║",
            processed, failed, no_map
        );
        info!(
            "║ Throughput: {:>6.1} img/s  │  Member Agreement: {:>5.1}%       ║",
            self.get_throughput(),
            agreement * 100.0
        );
        info!(
            "║ Processing Time (μs): mean={:>7} p50={:>7} p95={:>7}       ║",
            processing.mean_us, processing.p50_us, processing.p95_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Assessments by Rationale:                                    ║");
        for (rationale, count) in &self.get_rationale_counts() {
            info!("║   {:?}: {}", rationale, count);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Final Score Distribution:                                    ║");
        let dist = self.get_score_distribution();
        let total: u64 = dist.iter().sum();
        for (i, &count) in dist.iter().enumerate() {
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:>3}-{:<3}: {:>6} ({:>5.1}%) {}",
                i * 10,
                (i + 1) * 10,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

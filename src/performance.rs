//! Timing of decryption runs and persisted benchmark reports.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
struct Sample {
    duration: Duration,
    success: bool,
    error: Option<String>,
    retries: u32,
}

/// Collects per-item timings for one run. Safe to share between workers.
#[derive(Debug)]
pub struct Benchmark {
    operation: String,
    strategy: String,
    threads: usize,
    batch_size: usize,
    started: Instant,
    started_at: DateTime<Utc>,
    samples: Mutex<Vec<Sample>>,
}

/// Summary of a finished [`Benchmark`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub operation: String,
    pub strategy: String,
    pub total_items: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_seconds: f64,
    pub avg_item_seconds: f64,
    pub min_item_seconds: f64,
    pub max_item_seconds: f64,
    pub median_item_seconds: f64,
    /// Successful items per second of wall time.
    pub throughput: f64,
    /// Failed items as a percentage of all items.
    pub error_rate: f64,
    pub total_retries: u64,
    pub thread_count: usize,
    pub batch_size: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Distinct error messages kept in a report.
const MAX_REPORTED_ERRORS: usize = 10;

impl Benchmark {
    pub fn start(
        operation: impl Into<String>,
        strategy: impl Into<String>,
        threads: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            operation: operation.into(),
            strategy: strategy.into(),
            threads,
            batch_size,
            started: Instant::now(),
            started_at: Utc::now(),
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, duration: Duration, success: bool, error: Option<&str>, retries: u32) {
        self.samples
            .lock()
            .expect("benchmark lock poisoned")
            .push(Sample {
                duration,
                success,
                error: error.map(str::to_string),
                retries,
            });
    }

    pub fn finish(&self) -> BenchmarkReport {
        self.report(self.started.elapsed())
    }

    fn report(&self, total: Duration) -> BenchmarkReport {
        let samples = self.samples.lock().expect("benchmark lock poisoned");

        let mut durations: Vec<f64> = samples.iter().map(|s| s.duration.as_secs_f64()).collect();
        durations.sort_by(|a, b| a.total_cmp(b));

        let total_items = samples.len();
        let successful = samples.iter().filter(|s| s.success).count();
        let failed = total_items - successful;
        let total_seconds = total.as_secs_f64();

        let mut errors: Vec<String> = Vec::new();
        for error in samples.iter().filter_map(|s| s.error.as_ref()) {
            if errors.len() >= MAX_REPORTED_ERRORS {
                break;
            }
            if !errors.contains(error) {
                errors.push(error.clone());
            }
        }

        BenchmarkReport {
            operation: self.operation.clone(),
            strategy: self.strategy.clone(),
            total_items,
            successful,
            failed,
            total_seconds,
            avg_item_seconds: mean(&durations),
            min_item_seconds: durations.first().copied().unwrap_or(0.0),
            max_item_seconds: durations.last().copied().unwrap_or(0.0),
            median_item_seconds: median(&durations),
            throughput: if total_seconds > 0.0 {
                successful as f64 / total_seconds
            } else {
                0.0
            },
            error_rate: if total_items > 0 {
                failed as f64 / total_items as f64 * 100.0
            } else {
                0.0
            },
            total_retries: samples.iter().map(|s| u64::from(s.retries)).sum(),
            thread_count: self.threads,
            batch_size: self.batch_size,
            timestamp: self.started_at,
            errors,
        }
    }
}

fn mean(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.iter().sum::<f64>() / sorted.len() as f64
}

fn median(sorted: &[f64]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2],
        n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// One row of the CSV export.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    strategy: &'a str,
    total_items: usize,
    successful: usize,
    failed: usize,
    total_seconds: f64,
    avg_item_seconds: f64,
    throughput: f64,
    error_rate: f64,
    thread_count: usize,
    batch_size: usize,
}

impl<'a> From<&'a BenchmarkReport> for CsvRow<'a> {
    fn from(report: &'a BenchmarkReport) -> Self {
        Self {
            timestamp: report.timestamp.to_rfc3339(),
            strategy: &report.strategy,
            total_items: report.total_items,
            successful: report.successful,
            failed: report.failed,
            total_seconds: report.total_seconds,
            avg_item_seconds: report.avg_item_seconds,
            throughput: report.throughput,
            error_rate: report.error_rate,
            thread_count: report.thread_count,
            batch_size: report.batch_size,
        }
    }
}

/// Reports included in a CSV export.
pub const CSV_REPORT_LIMIT: usize = 100;

/// Benchmark reports saved as JSON files in one directory.
pub struct BenchmarkStore {
    dir: PathBuf,
}

impl BenchmarkStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save as `<operation>_<strategy>_<timestamp>.json`.
    pub fn save(&self, report: &BenchmarkReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create benchmark dir: {:?}", self.dir))?;
        let file_name = format!(
            "{}_{}_{}.json",
            report.operation,
            report.strategy,
            report.timestamp.format("%Y%m%d_%H%M%S%3f")
        );
        let path = self.dir.join(file_name);
        let content =
            serde_json::to_string_pretty(report).context("Failed to serialize benchmark")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write benchmark report: {path:?}"))?;
        Ok(path)
    }

    /// The `limit` most recent reports, newest first. Unreadable files are
    /// skipped.
    pub fn load_recent(&self, limit: usize) -> Result<Vec<BenchmarkReport>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut reports = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read benchmark dir: {:?}", self.dir))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<BenchmarkReport>(&content) {
                Ok(report) => reports.push(report),
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping benchmark file"),
            }
        }
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        reports.truncate(limit);
        Ok(reports)
    }
}

impl BenchmarkStore {
    /// Write the most recent reports for `operation`, newest first, to
    /// `<operation>_report_<at>.csv` in the store directory.
    pub fn export_csv(&self, operation: &str, at: DateTime<Utc>) -> Result<PathBuf> {
        let mut reports = self.load_recent(usize::MAX)?;
        reports.retain(|r| r.operation == operation);
        reports.truncate(CSV_REPORT_LIMIT);
        if reports.is_empty() {
            anyhow::bail!("No benchmark results for {operation}");
        }

        let path = self.dir.join(format!(
            "{operation}_report_{}.csv",
            at.format("%Y%m%d_%H%M%S")
        ));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create CSV report: {path:?}"))?;
        for report in &reports {
            writer.serialize(CsvRow::from(report))?;
        }
        writer.flush()?;
        Ok(path)
    }
}

pub fn best_by_throughput(reports: &[BenchmarkReport]) -> Option<&BenchmarkReport> {
    reports
        .iter()
        .max_by(|a, b| a.throughput.total_cmp(&b.throughput))
}

/// Lowest error rate, ties broken by throughput.
pub fn best_by_reliability(reports: &[BenchmarkReport]) -> Option<&BenchmarkReport> {
    reports.iter().min_by(|a, b| {
        a.error_rate
            .total_cmp(&b.error_rate)
            .then_with(|| b.throughput.total_cmp(&a.throughput))
    })
}

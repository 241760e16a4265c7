use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::extract::{dedupe, load_pairs};
use super::types::BenchmarkOutput;
use super::{Connection, Target};
use crate::config::ResolvedConfig;
use crate::jenkins::{worker_count, BatchRequest, DecryptOptions, Strategy, DECRYPT_OPERATION};
use crate::performance::{best_by_reliability, best_by_throughput, Benchmark, BenchmarkStore};

pub struct BenchmarkRequest {
    pub target: Target,
    pub credentials_file: PathBuf,
    pub remote_path: String,
    pub fetch: bool,
    pub sample_size: usize,
    pub strategies: Vec<Strategy>,
    pub max_workers: Option<usize>,
}

/// Decrypt the same sample once per strategy and save a report for each.
pub async fn run_benchmark(
    config: &ResolvedConfig,
    connection: &Connection,
    request: &BenchmarkRequest,
) -> Result<BenchmarkOutput> {
    let pairs = load_pairs(
        &request.target,
        &request.credentials_file,
        &request.remote_path,
        request.fetch,
        None,
    )
    .await?;
    let (mut pairs, _) = dedupe(pairs);
    pairs.truncate(request.sample_size);
    let batch = BatchRequest::new(pairs)?;
    if batch.is_empty() {
        anyhow::bail!(
            "No encrypted credentials in {}",
            request.credentials_file.display()
        );
    }

    let store = BenchmarkStore::new(config.benchmarks_dir());
    let mut reports = Vec::new();
    let mut saved = Vec::new();
    for &strategy in &request.strategies {
        connection.context.reset();
        let threads = match strategy {
            Strategy::WorkerPool => request
                .max_workers
                .unwrap_or_else(|| worker_count(batch.len(), &config.decrypt)),
            Strategy::Sequential | Strategy::Consolidated => 1,
        };
        let benchmark = Arc::new(Benchmark::start(
            DECRYPT_OPERATION,
            strategy.as_str(),
            threads,
            batch.len(),
        ));
        let mut options = DecryptOptions::default()
            .with_strategy(strategy)
            .with_benchmark(benchmark.clone());
        if let Some(workers) = request.max_workers {
            options = options.with_max_workers(workers);
        }

        info!(%strategy, items = batch.len(), "benchmarking");
        connection.decryptor.decrypt_batch(&batch, &options).await?;
        let report = benchmark.finish();
        saved.push(store.save(&report)?.display().to_string());
        reports.push(report);
    }

    let csv_report = match store.export_csv(DECRYPT_OPERATION, chrono::Utc::now()) {
        Ok(path) => Some(path.display().to_string()),
        Err(e) => {
            warn!(error = %e, "failed to write CSV benchmark report");
            None
        }
    };

    let fastest = best_by_throughput(&reports).map(|r| r.strategy.clone());
    let most_reliable = best_by_reliability(&reports).map(|r| r.strategy.clone());
    Ok(BenchmarkOutput {
        server: request.target.url.clone(),
        sample_size: batch.len(),
        reports,
        saved,
        csv_report,
        fastest,
        most_reliable,
    })
}

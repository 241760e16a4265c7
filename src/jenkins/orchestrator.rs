//! Batch decryption: picks a strategy from the batch size and drives the
//! script console client.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::client::{ReauthBudget, ScriptConsoleClient};
use super::script::{consolidated_decrypt_script, parse_consolidated_output};
use crate::config::DecryptConfig;
use crate::credentials::CredentialPair;
use crate::error::JenkinsError;
use crate::performance::Benchmark;

/// Breaker and error-stat key for consolidated round trips.
pub const BATCH_OPERATION: &str = "batch_decryption";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One item at a time, in input order.
    Sequential,
    /// Items spread over a bounded pool of concurrent workers.
    WorkerPool,
    /// One generated script decrypts every item server side.
    Consolidated,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::Sequential,
        Strategy::WorkerPool,
        Strategy::Consolidated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::WorkerPool => "worker_pool",
            Strategy::Consolidated => "consolidated",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sequential" => Ok(Strategy::Sequential),
            "worker_pool" | "parallel" | "pool" => Ok(Strategy::WorkerPool),
            "consolidated" | "batch" | "optimized" => Ok(Strategy::Consolidated),
            other => Err(format!(
                "unknown strategy '{other}' (expected sequential, worker_pool or consolidated)"
            )),
        }
    }
}

/// Strategy for a batch of `count` items.
pub fn select_strategy(count: usize, config: &DecryptConfig) -> Strategy {
    if count <= config.sequential_max {
        Strategy::Sequential
    } else if count <= config.worker_pool_max {
        Strategy::WorkerPool
    } else {
        Strategy::Consolidated
    }
}

/// Workers for a batch of `count` items: never more than the items, never
/// fewer than one.
pub fn worker_count(count: usize, config: &DecryptConfig) -> usize {
    let cap = if count <= 10 {
        config.small_batch_workers
    } else if count <= 50 {
        config.medium_batch_workers
    } else {
        config.large_batch_workers
    };
    cap.min(count).max(1)
}

/// Receives `(completed, total)` as items finish.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, completed: usize, total: usize);
}

/// Ordered ciphertext pairs with unique identifiers.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    items: Vec<CredentialPair>,
}

impl BatchRequest {
    pub fn new(items: Vec<CredentialPair>) -> Result<Self, JenkinsError> {
        let mut seen = HashSet::new();
        for item in &items {
            if item.secret.expose_secret().is_empty() {
                return Err(JenkinsError::configuration(format!(
                    "Empty ciphertext for '{}'",
                    item.identifier
                )));
            }
            if !seen.insert(item.identifier.as_str()) {
                return Err(JenkinsError::configuration(format!(
                    "Duplicate identifier '{}'",
                    item.identifier
                )));
            }
        }
        Ok(Self { items })
    }

    pub fn items(&self) -> &[CredentialPair] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The strategy the size of this batch calls for.
    pub fn strategy_hint(&self, config: &DecryptConfig) -> Strategy {
        select_strategy(self.items.len(), config)
    }
}

#[derive(Default, Clone)]
pub struct DecryptOptions {
    /// Use this strategy regardless of batch size.
    pub strategy: Option<Strategy>,
    /// Override the computed worker count (clamped to `1..=items`).
    pub max_workers: Option<usize>,
    pub benchmark: Option<Arc<Benchmark>>,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl DecryptOptions {
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn with_benchmark(mut self, benchmark: Arc<Benchmark>) -> Self {
        self.benchmark = Some(benchmark);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Decrypted(SecretString),
    Failed(JenkinsError),
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub identifier: String,
    pub outcome: ItemOutcome,
}

/// One outcome per requested identifier, in request order.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
    pub strategy: Strategy,
    pub workers: usize,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn successes(&self) -> Vec<CredentialPair> {
        self.items
            .iter()
            .filter_map(|item| match &item.outcome {
                ItemOutcome::Decrypted(secret) => Some(CredentialPair {
                    identifier: item.identifier.clone(),
                    secret: secret.clone(),
                }),
                ItemOutcome::Failed(_) => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(&str, &JenkinsError)> {
        self.items
            .iter()
            .filter_map(|item| match &item.outcome {
                ItemOutcome::Failed(err) => Some((item.identifier.as_str(), err)),
                ItemOutcome::Decrypted(_) => None,
            })
            .collect()
    }

    pub fn get(&self, identifier: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|item| item.identifier == identifier)
            .map(|item| &item.outcome)
    }

    pub fn success_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Decrypted(_)))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.items.len() - self.success_count()
    }
}

/// Decrypts batches of ciphertexts through one Jenkins script console.
pub struct BatchDecryptor {
    client: Arc<ScriptConsoleClient>,
    config: DecryptConfig,
}

impl BatchDecryptor {
    pub fn new(client: Arc<ScriptConsoleClient>, config: DecryptConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Arc<ScriptConsoleClient> {
        &self.client
    }

    /// Decrypt every item in `request`.
    ///
    /// Fails only when no session can be established up front; per-item
    /// failures are reported in the result.
    pub async fn decrypt_batch(
        &self,
        request: &BatchRequest,
        options: &DecryptOptions,
    ) -> Result<BatchResult, JenkinsError> {
        let total = request.len();
        let strategy = options
            .strategy
            .unwrap_or_else(|| request.strategy_hint(&self.config));

        if request.is_empty() {
            return Ok(BatchResult {
                items: Vec::new(),
                strategy,
                workers: 0,
                elapsed: Duration::ZERO,
            });
        }

        self.client.auth().get_transport().await?;

        let workers = match strategy {
            Strategy::WorkerPool => options
                .max_workers
                .map(|w| w.clamp(1, total))
                .unwrap_or_else(|| worker_count(total, &self.config)),
            Strategy::Sequential | Strategy::Consolidated => 1,
        };
        info!(items = total, %strategy, workers, "starting batch decryption");

        let reauth = ReauthBudget::new();
        let started = Instant::now();
        let outcomes = match strategy {
            Strategy::Sequential => self.run_sequential(request, options, &reauth).await,
            Strategy::WorkerPool => self.run_pool(request, options, workers, &reauth).await,
            Strategy::Consolidated => self.run_consolidated(request, options, &reauth).await,
        };
        let elapsed = started.elapsed();

        let items: Vec<BatchItem> = request
            .items()
            .iter()
            .zip(outcomes)
            .map(|(pair, outcome)| BatchItem {
                identifier: pair.identifier.clone(),
                outcome,
            })
            .collect();
        let result = BatchResult {
            items,
            strategy,
            workers,
            elapsed,
        };
        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch decryption finished"
        );
        Ok(result)
    }

    /// Decrypt one item, returning its outcome and recording it on the
    /// benchmark.
    async fn decrypt_item(
        &self,
        pair: &CredentialPair,
        options: &DecryptOptions,
        reauth: &ReauthBudget,
    ) -> ItemOutcome {
        let started = Instant::now();
        let result = match self.client.auth().get_transport().await {
            Ok(session) => {
                self.client
                    .decrypt_shared(session, pair.secret.expose_secret(), reauth)
                    .await
            }
            Err(err) => Err(err),
        };

        let (outcome, retries) = match result {
            Ok((secret, retries)) => (ItemOutcome::Decrypted(secret), retries),
            Err(err) => {
                warn!(identifier = %pair.identifier, error = %err, "decryption failed");
                (ItemOutcome::Failed(err), 0)
            }
        };
        if let Some(benchmark) = &options.benchmark {
            let error = match &outcome {
                ItemOutcome::Failed(err) => Some(err.to_string()),
                ItemOutcome::Decrypted(_) => None,
            };
            benchmark.record(
                started.elapsed(),
                error.is_none(),
                error.as_deref(),
                retries,
            );
        }
        outcome
    }

    async fn run_sequential(
        &self,
        request: &BatchRequest,
        options: &DecryptOptions,
        reauth: &ReauthBudget,
    ) -> Vec<ItemOutcome> {
        let total = request.len();
        let mut outcomes = Vec::with_capacity(total);
        for (idx, pair) in request.items().iter().enumerate() {
            outcomes.push(self.decrypt_item(pair, options, reauth).await);
            report_progress(options, idx + 1, total);
        }
        outcomes
    }

    async fn run_pool(
        &self,
        request: &BatchRequest,
        options: &DecryptOptions,
        workers: usize,
        reauth: &ReauthBudget,
    ) -> Vec<ItemOutcome> {
        let total = request.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;

        let finished: Vec<(usize, ItemOutcome)> = stream::iter(request.items().iter().enumerate())
            .map(|(idx, pair)| async move {
                let outcome = self.decrypt_item(pair, options, reauth).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                report_progress(options, done, total);
                (idx, outcome)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
        for (idx, outcome) in finished {
            slots[idx] = Some(outcome);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    ItemOutcome::Failed(JenkinsError::script("Item was never processed"))
                })
            })
            .collect()
    }

    async fn run_consolidated(
        &self,
        request: &BatchRequest,
        options: &DecryptOptions,
        reauth: &ReauthBudget,
    ) -> Vec<ItemOutcome> {
        let total = request.len();
        let started = Instant::now();
        let script = consolidated_decrypt_script(
            request
                .items()
                .iter()
                .map(|pair| (pair.identifier.as_str(), pair.secret.expose_secret())),
        );
        debug!(items = total, bytes = script.len(), "built consolidated script");

        let client = &self.client;
        let script = script.as_str();
        let timeout = client.settings().batch_timeout;
        let identifiers: Vec<&str> = request
            .items()
            .iter()
            .map(|pair| pair.identifier.as_str())
            .collect();
        let identifiers = identifiers.as_slice();

        let round_trip = match client.auth().get_transport().await {
            Ok(session) => {
                client
                    .execute(BATCH_OPERATION, session, reauth, move |session| async move {
                        let output = client.run_script(&session, script, timeout).await?;
                        parse_consolidated_output(&output, identifiers.iter().copied())
                    })
                    .await
            }
            Err(err) => Err(err),
        };

        let (outcomes, retries): (Vec<ItemOutcome>, u32) = match round_trip {
            Ok((mut by_identifier, retries)) => (
                identifiers
                    .iter()
                    .map(|id| match by_identifier.remove(*id) {
                        Some(Ok(secret)) => ItemOutcome::Decrypted(secret),
                        Some(Err(err)) => ItemOutcome::Failed(err),
                        None => ItemOutcome::Failed(JenkinsError::script(format!(
                            "No result returned for '{id}'"
                        ))),
                    })
                    .collect(),
                retries,
            ),
            Err(err) => {
                warn!(error = %err, "consolidated decryption failed for the whole batch");
                (
                    (0..total).map(|_| ItemOutcome::Failed(err.clone())).collect(),
                    0,
                )
            }
        };

        if let Some(benchmark) = &options.benchmark {
            let per_item = started.elapsed() / total.max(1) as u32;
            for outcome in &outcomes {
                let error = match outcome {
                    ItemOutcome::Failed(err) => Some(err.to_string()),
                    ItemOutcome::Decrypted(_) => None,
                };
                benchmark.record(per_item, error.is_none(), error.as_deref(), retries);
            }
        }
        report_progress(options, total, total);
        outcomes
    }
}

fn report_progress(options: &DecryptOptions, completed: usize, total: usize) {
    debug!(completed, total, "decryption progress");
    if let Some(progress) = &options.progress {
        progress.progress(completed, total);
    }
}

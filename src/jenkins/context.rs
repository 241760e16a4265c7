//! Shared resilience state for one decryption run.
//!
//! Breakers, the rate limiter and error statistics live here and are passed
//! explicitly to the client and the orchestrator.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::circuit::CircuitBreakers;
use super::rate_limit::RateLimiter;
use crate::config::DecryptConfig;
use crate::error::JenkinsError;

/// Errors seen for a single operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationErrors {
    pub count: u64,
    pub last_kind: String,
    pub last_message: String,
    pub last_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ErrorStats {
    by_operation: Mutex<HashMap<String, OperationErrors>>,
}

impl ErrorStats {
    pub fn record(&self, operation: &str, error: &JenkinsError) {
        let mut stats = self.by_operation.lock().expect("error stats lock poisoned");
        let now = Utc::now();
        stats
            .entry(operation.to_string())
            .and_modify(|entry| {
                entry.count += 1;
                entry.last_kind = error.kind().to_string();
                entry.last_message = error.message().to_string();
                entry.last_at = now;
            })
            .or_insert_with(|| OperationErrors {
                count: 1,
                last_kind: error.kind().to_string(),
                last_message: error.message().to_string(),
                last_at: now,
            });
    }

    /// Sorted by operation name.
    pub fn snapshot(&self) -> Vec<(String, OperationErrors)> {
        let stats = self.by_operation.lock().expect("error stats lock poisoned");
        let mut out: Vec<_> = stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn total(&self) -> u64 {
        self.by_operation
            .lock()
            .expect("error stats lock poisoned")
            .values()
            .map(|e| e.count)
            .sum()
    }

    pub fn reset(&self) {
        self.by_operation
            .lock()
            .expect("error stats lock poisoned")
            .clear();
    }
}

#[derive(Debug)]
pub struct DecryptContext {
    pub breakers: CircuitBreakers,
    pub rate_limiter: RateLimiter,
    pub error_stats: ErrorStats,
}

impl DecryptContext {
    pub fn new(config: &DecryptConfig) -> Self {
        Self {
            breakers: CircuitBreakers::new(config.circuit_breaker.clone()),
            rate_limiter: RateLimiter::new(config.requests_per_second),
            error_stats: ErrorStats::default(),
        }
    }

    /// Clear breakers and error statistics.
    pub fn reset(&self) {
        self.breakers.reset();
        self.error_stats.reset();
    }
}

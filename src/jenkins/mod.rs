//! Talking to the Jenkins script console: the client, the generated
//! scripts, batch orchestration and the resilience pieces around them.

mod circuit;
mod client;
mod context;
mod orchestrator;
mod rate_limit;
mod retry;
mod script;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakers, CircuitState, Permit};
pub use client::{
    extract_crumb, extract_result, ClientSettings, ReauthBudget, ScriptConsoleClient,
    DECRYPT_OPERATION,
};
pub use context::{DecryptContext, ErrorStats, OperationErrors};
pub use orchestrator::{
    select_strategy, worker_count, BatchDecryptor, BatchItem, BatchRequest, BatchResult,
    DecryptOptions, ItemOutcome, ProgressSink, Strategy, BATCH_OPERATION,
};
pub use rate_limit::RateLimiter;
pub use retry::{calculate_delay, RetryBudget};
pub use script::{
    consolidated_decrypt_script, groovy_quote, parse_consolidated_output, parse_single_output,
    single_decrypt_script, ERROR_SENTINEL,
};

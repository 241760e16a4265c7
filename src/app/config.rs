use std::path::Path;

use crate::config::ResolvedConfig;
use crate::duration::format_duration;

pub fn config_output(config_path: &Path, config: &ResolvedConfig) -> serde_json::Value {
    let decrypt = &config.decrypt;
    serde_json::json!({
        "config_file": config_path.display().to_string(),
        "data_directory": config.data_dir.display().to_string(),
        "benchmarks_directory": config.benchmarks_dir().display().to_string(),
        "jenkins": {
            "url": config.jenkins.url,
            "host": config.jenkins.host,
            "remote_credentials_path": config.jenkins.remote_credentials_path,
        },
        "auth": {
            "cache_sessions": config.auth.cache_sessions,
            "session_ttl": format_duration(config.auth.session_ttl),
            "key_store": config.auth.key_store,
        },
        "decrypt": {
            "sequential_max": decrypt.sequential_max,
            "worker_pool_max": decrypt.worker_pool_max,
            "workers": [
                decrypt.small_batch_workers,
                decrypt.medium_batch_workers,
                decrypt.large_batch_workers
            ],
            "requests_per_second": decrypt.requests_per_second,
            "probe_timeout": format_duration(decrypt.probe_timeout),
            "script_timeout": format_duration(decrypt.script_timeout),
            "batch_timeout": format_duration(decrypt.batch_timeout),
            "retry": decrypt.retry,
            "circuit_breaker": decrypt.circuit_breaker,
        }
    })
}

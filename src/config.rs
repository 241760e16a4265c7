use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::jenkins::{CircuitBreakerConfig, RetryBudget};
use crate::secrets::SecretStoreConfig;

/// Default location of the credentials store on a Jenkins controller.
pub const DEFAULT_REMOTE_CREDENTIALS_PATH: &str = "/var/lib/jenkins/credentials.xml";

fn default_remote_credentials_path() -> String {
    DEFAULT_REMOTE_CREDENTIALS_PATH.to_string()
}

/// Jenkins server connection details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsConfig {
    /// Base URL of the Jenkins web UI, including any path prefix
    /// (e.g. `https://jenkins.example.org/releng`).
    pub url: Option<String>,

    /// SSH host used to fetch `credentials.xml` with scp.
    pub host: Option<String>,

    /// Path of the credentials store on the controller.
    #[serde(default = "default_remote_credentials_path")]
    pub remote_credentials_path: String,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            remote_credentials_path: default_remote_credentials_path(),
        }
    }
}

/// Default cached-session lifetime (24 hours).
fn default_session_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

/// Authentication and session-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Persist authenticated sessions (encrypted) between runs.
    pub cache_sessions: bool,

    /// How long a cached session stays usable.
    #[serde(
        default = "default_session_ttl",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub session_ttl: Duration,

    /// Where the session-cache encryption key lives.
    pub key_store: SecretStoreConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_sessions: true,
            session_ttl: default_session_ttl(),
            key_store: SecretStoreConfig::default(),
        }
    }
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Tuning for the batch decryption engine.
///
/// The thresholds and worker caps were tuned empirically; they are defaults,
/// not invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// Batches up to this size are decrypted one item at a time.
    pub sequential_max: usize,

    /// Batches up to this size use the worker pool; larger ones use a single
    /// consolidated script.
    pub worker_pool_max: usize,

    /// Worker cap for batches of at most 10 items.
    pub small_batch_workers: usize,

    /// Worker cap for batches of at most 50 items.
    pub medium_batch_workers: usize,

    /// Worker cap for anything larger.
    pub large_batch_workers: usize,

    /// Maximum script submissions per second.
    pub requests_per_second: f64,

    #[serde(
        default = "default_probe_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub probe_timeout: Duration,

    #[serde(
        default = "default_script_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub script_timeout: Duration,

    #[serde(
        default = "default_batch_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub batch_timeout: Duration,

    pub retry: RetryBudget,

    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            sequential_max: 5,
            worker_pool_max: 50,
            small_batch_workers: 3,
            medium_batch_workers: 10,
            large_batch_workers: 20,
            requests_per_second: 3.0,
            probe_timeout: default_probe_timeout(),
            script_timeout: default_script_timeout(),
            batch_timeout: default_batch_timeout(),
            retry: RetryBudget::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for benchmark reports. If relative, resolved from the config
    /// file location.
    pub data_dir: Option<PathBuf>,

    pub jenkins: JenkinsConfig,

    pub auth: AuthConfig,

    pub decrypt: DecryptConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject settings the decryption engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.decrypt;
        if d.sequential_max > d.worker_pool_max {
            anyhow::bail!(
                "decrypt.sequential_max ({}) must not exceed decrypt.worker_pool_max ({})",
                d.sequential_max,
                d.worker_pool_max
            );
        }
        if !(d.requests_per_second > 0.0) {
            anyhow::bail!("decrypt.requests_per_second must be positive");
        }
        if d.small_batch_workers == 0 || d.medium_batch_workers == 0 || d.large_batch_workers == 0
        {
            anyhow::bail!("decrypt worker caps must be at least 1");
        }
        let retry = &d.retry;
        if !(retry.backoff_factor.is_finite() && retry.backoff_factor > 0.0) {
            anyhow::bail!(
                "decrypt.retry.backoff_factor must be a positive number, got {}",
                retry.backoff_factor
            );
        }
        if !(retry.exponential_base.is_finite() && retry.exponential_base >= 1.0) {
            anyhow::bail!(
                "decrypt.retry.exponential_base must be at least 1, got {}",
                retry.exponential_base
            );
        }
        if retry.base_delay > retry.max_delay {
            anyhow::bail!("decrypt.retry.base_delay must not exceed decrypt.retry.max_delay");
        }
        if d.circuit_breaker.failure_threshold == 0 {
            anyhow::bail!("decrypt.circuit_breaker.failure_threshold must be at least 1");
        }
        Ok(())
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, the platform data directory is used.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => dirs::data_dir()
                .map(|d| d.join("jce"))
                .unwrap_or_else(|| config_dir.to_path_buf()),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The resolved data directory path.
    pub data_dir: PathBuf,

    pub jenkins: JenkinsConfig,

    pub auth: AuthConfig,

    pub decrypt: DecryptConfig,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./jce.toml` if it exists in current directory
/// 2. `~/.config/jce/jce.toml`
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("jce.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("jce").join("jce.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;

        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let config = Config::load(&config_path)?;
        Ok(Self::from_config(config, config_dir))
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let config_path = if config_path.is_relative() {
                std::env::current_dir()
                    .context("Failed to get current directory")?
                    .join(config_path)
            } else {
                config_path.to_path_buf()
            };

            let config_dir = config_path
                .parent()
                .context("Config path has no parent directory")?;

            Ok(Self::from_config(Config::default(), config_dir))
        }
    }

    fn from_config(config: Config, config_dir: &Path) -> Self {
        let data_dir = config.resolve_data_dir(config_dir);
        Self {
            data_dir,
            jenkins: config.jenkins,
            auth: config.auth,
            decrypt: config.decrypt,
        }
    }

    /// Directory holding benchmark reports.
    pub fn benchmarks_dir(&self) -> PathBuf {
        self.data_dir.join("benchmarks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_tuned_values() {
        let config = Config::default();
        assert_eq!(config.decrypt.sequential_max, 5);
        assert_eq!(config.decrypt.worker_pool_max, 50);
        assert_eq!(config.decrypt.small_batch_workers, 3);
        assert_eq!(config.decrypt.medium_batch_workers, 10);
        assert_eq!(config.decrypt.large_batch_workers, 20);
        assert_eq!(config.decrypt.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.decrypt.script_timeout, Duration::from_secs(30));
        assert_eq!(config.decrypt.batch_timeout, Duration::from_secs(120));
        assert_eq!(config.decrypt.retry.max_retries, 3);
        assert_eq!(config.decrypt.circuit_breaker.failure_threshold, 3);
        assert!(config.auth.cache_sessions);
        assert_eq!(config.auth.session_ttl, Duration::from_secs(86400));
        assert_eq!(
            config.jenkins.remote_credentials_path,
            DEFAULT_REMOTE_CREDENTIALS_PATH
        );
    }

    #[test]
    fn test_load_decrypt_section() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("jce.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[jenkins]")?;
        writeln!(file, "url = \"https://jenkins.example.org/releng\"")?;
        writeln!(file, "[decrypt]")?;
        writeln!(file, "sequential_max = 2")?;
        writeln!(file, "script_timeout = \"45s\"")?;
        writeln!(file, "[decrypt.retry]")?;
        writeln!(file, "max_retries = 5")?;
        writeln!(file, "base_delay = \"250ms\"")?;
        writeln!(file, "[decrypt.circuit_breaker]")?;
        writeln!(file, "timeout = \"1m\"")?;

        let config = Config::load(&config_path)?;
        assert_eq!(
            config.jenkins.url.as_deref(),
            Some("https://jenkins.example.org/releng")
        );
        assert_eq!(config.decrypt.sequential_max, 2);
        assert_eq!(config.decrypt.worker_pool_max, 50);
        assert_eq!(config.decrypt.script_timeout, Duration::from_secs(45));
        assert_eq!(config.decrypt.retry.max_retries, 5);
        assert_eq!(config.decrypt.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.decrypt.circuit_breaker.timeout, Duration::from_secs(60));
        assert_eq!(config.decrypt.circuit_breaker.failure_threshold, 3);

        Ok(())
    }

    #[test]
    fn test_load_empty_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("jce.toml");
        std::fs::File::create(&config_path)?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.data_dir, None);
        assert!(config.jenkins.url.is_none());

        Ok(())
    }

    #[test]
    fn test_inverted_thresholds_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("jce.toml");
        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[decrypt]")?;
        writeln!(file, "sequential_max = 60")?;

        let err = Config::load(&config_path).unwrap_err();
        assert!(err.to_string().contains("sequential_max"));

        Ok(())
    }

    #[test]
    fn test_unusable_retry_settings_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let cases = [
            ("backoff_factor = 1e30", None),
            ("backoff_factor = 0.0", Some("backoff_factor")),
            ("backoff_factor = -1.0", Some("backoff_factor")),
            ("exponential_base = 0.5", Some("exponential_base")),
            ("base_delay = \"2m\"\nmax_delay = \"1m\"", Some("base_delay")),
        ];
        for (line, rejected) in cases {
            let config_path = dir.path().join("jce.toml");
            std::fs::write(&config_path, format!("[decrypt.retry]\n{line}\n"))?;
            let loaded = ResolvedConfig::load_or_default(&config_path);
            match rejected {
                Some(field) => {
                    let err = loaded.unwrap_err();
                    assert!(format!("{err:#}").contains(field), "{line}: {err:#}");
                }
                None => {
                    let config = loaded?;
                    let delay = crate::jenkins::calculate_delay(0, &config.decrypt.retry);
                    assert!(delay <= config.decrypt.retry.max_delay * 2);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_relative_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("data")),
            ..Default::default()
        };
        assert_eq!(
            config.resolve_data_dir(Path::new("/home/user/jce")),
            PathBuf::from("/home/user/jce/data")
        );
    }

    #[test]
    fn test_resolved_config_resolves_relative_data_dir() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("jce.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "data_dir = \"./data\"")?;

        let resolved = ResolvedConfig::load(&config_path)?;
        assert_eq!(resolved.data_dir, dir.path().canonicalize()?.join("data"));
        assert_eq!(
            resolved.benchmarks_dir(),
            dir.path().canonicalize()?.join("data").join("benchmarks")
        );

        Ok(())
    }

    #[test]
    fn test_resolved_config_load_or_default_missing_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("missing.toml");

        let resolved = ResolvedConfig::load_or_default(&config_path)?;
        assert_eq!(resolved.decrypt.sequential_max, 5);

        Ok(())
    }
}

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::file::FileSecretStore;
use super::pass::{PassConfig, PassSecretStore};
use super::SecretStore;

/// Which backend holds the session-cache key.
///
/// ```toml
/// [auth.key_store]
/// backend = "pass"
/// prefix = "jce"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum SecretStoreConfig {
    /// Owner-only files, by default under `~/.config/jce/secrets/`.
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
    /// Password-store (pass) backend.
    Pass {
        #[serde(flatten)]
        config: PassConfig,
    },
}

impl Default for SecretStoreConfig {
    fn default() -> Self {
        SecretStoreConfig::File { path: None }
    }
}

impl SecretStoreConfig {
    pub fn build(&self) -> Result<Box<dyn SecretStore>> {
        Ok(match self {
            SecretStoreConfig::File { path: Some(path) } => {
                Box::new(FileSecretStore::with_path(path))
            }
            SecretStoreConfig::File { path: None } => Box::new(FileSecretStore::new()?),
            SecretStoreConfig::Pass { config } => Box::new(PassSecretStore::new(config.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        key_store: SecretStoreConfig,
    }

    #[test]
    fn test_parse_pass_backend() -> Result<()> {
        let parsed: Wrapper = toml::from_str(
            r#"
[key_store]
backend = "pass"
prefix = "work/jce"
"#,
        )?;

        match parsed.key_store {
            SecretStoreConfig::Pass { config } => {
                assert_eq!(config.prefix, "work/jce");
            }
            other => panic!("unexpected backend: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_pass_prefix_defaults_to_jce() -> Result<()> {
        let parsed: Wrapper = toml::from_str("[key_store]\nbackend = \"pass\"\n")?;
        assert_eq!(
            parsed.key_store,
            SecretStoreConfig::Pass {
                config: PassConfig::default()
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_file_backend_without_path() -> Result<()> {
        let parsed: Wrapper = toml::from_str("[key_store]\nbackend = \"file\"\n")?;
        assert_eq!(parsed.key_store, SecretStoreConfig::File { path: None });
        Ok(())
    }
}

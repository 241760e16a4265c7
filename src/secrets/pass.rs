//! Password-store (pass) secret backend.
//!
//! Each key is its own pass entry, `<prefix>/<key>`, holding the secret on
//! its first line.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::SecretStore;

fn default_prefix() -> String {
    "jce".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassConfig {
    /// Folder in the password store holding jce's entries.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

pub struct PassSecretStore {
    config: PassConfig,
}

impl PassSecretStore {
    pub fn new(config: PassConfig) -> Self {
        Self { config }
    }

    fn entry_path(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }
}

/// The secret is the first line; anything after it is pass metadata.
fn first_line(stdout: &[u8]) -> Result<Option<String>> {
    let text = std::str::from_utf8(stdout).context("pass printed non-UTF-8 output")?;
    Ok(text
        .lines()
        .next()
        .filter(|line| !line.is_empty())
        .map(str::to_string))
}

#[async_trait]
impl SecretStore for PassSecretStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        let entry = self.entry_path(key);
        let output = Command::new("pass")
            .args(["show", &entry])
            .output()
            .await
            .with_context(|| format!("Could not run `pass show {entry}`"))?;

        if output.status.success() {
            return Ok(first_line(&output.stdout)?.map(SecretString::from));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is not in the password store") {
            return Ok(None);
        }
        anyhow::bail!("`pass show {entry}` failed: {}", stderr.trim())
    }

    async fn set(&self, key: &str, value: SecretString) -> Result<()> {
        if value.expose_secret().contains('\n') {
            anyhow::bail!("pass entries hold a single-line secret; {key} spans several lines");
        }
        let entry = self.entry_path(key);
        let mut child = Command::new("pass")
            .args(["insert", "--multiline", "--force", &entry])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Could not run `pass insert {entry}`"))?;

        let mut stdin = child
            .stdin
            .take()
            .context("pass insert has no stdin")?;
        stdin.write_all(value.expose_secret().as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "`pass insert {entry}` failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_live_under_the_prefix() {
        let store = PassSecretStore::new(PassConfig::default());
        assert_eq!(
            store.entry_path("session-cache-identity"),
            "jce/session-cache-identity"
        );

        let store = PassSecretStore::new(PassConfig {
            prefix: "/work/jenkins/".into(),
        });
        assert_eq!(store.entry_path("k"), "work/jenkins/k");

        let store = PassSecretStore::new(PassConfig { prefix: "".into() });
        assert_eq!(store.entry_path("k"), "k");
    }

    #[test]
    fn secret_is_the_first_line() -> Result<()> {
        assert_eq!(
            first_line(b"AGE-SECRET-KEY-1ABC\ncreated: today\n")?.as_deref(),
            Some("AGE-SECRET-KEY-1ABC")
        );
        assert_eq!(first_line(b"")?, None);
        assert_eq!(first_line(b"\nleftover")?, None);
        assert!(first_line(&[0xff, 0xfe]).is_err());
        Ok(())
    }
}

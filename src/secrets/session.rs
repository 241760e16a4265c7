//! Encrypted on-disk cache of authenticated sessions, one file per server.
//!
//! Entries are JSON encrypted to an age X25519 identity. The identity is kept
//! in a [`SecretStore`], never next to the cache files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::file::open_private;
use super::SecretStore;
use crate::auth::AuthMethod;
use crate::clock::{Clock, SystemClock};

/// Key under which the cache identity is kept in the secret store.
pub const IDENTITY_KEY: &str = "session-cache-identity";

/// A cached, previously validated authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub auth: AuthMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedSession {
    pub fn new(auth: AuthMethod, created_at: DateTime<Utc>, ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            auth,
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cache file stem for a server URL: its host, plus the port when one is
/// given, with anything outside `[A-Za-z0-9.-]` replaced by `_`.
pub fn host_key(server_url: &str) -> String {
    let raw = match Url::parse(server_url) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}_{port}"),
            (Some(host), None) => host.to_string(),
            _ => server_url.to_string(),
        },
        Err(_) => server_url.to_string(),
    };
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct SessionCache {
    cache_dir: PathBuf,
    key_store: Box<dyn SecretStore>,
    clock: Arc<dyn Clock>,
}

impl SessionCache {
    /// Create a session cache under `~/.cache/jce/sessions/`.
    pub fn new(key_store: Box<dyn SecretStore>) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .context("Could not find cache directory")?
            .join("jce")
            .join("sessions");
        Ok(Self::with_path(cache_dir, key_store))
    }

    /// Create a session cache at a custom location.
    pub fn with_path(cache_dir: impl AsRef<Path>, key_store: Box<dyn SecretStore>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            key_store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn session_file(&self, server_url: &str) -> PathBuf {
        self.cache_dir
            .join(format!("session_{}.age", host_key(server_url)))
    }

    async fn load_identity(&self) -> Result<Option<age::x25519::Identity>> {
        let Some(secret) = self.key_store.get(IDENTITY_KEY).await? else {
            return Ok(None);
        };
        let identity = age::x25519::Identity::from_str(secret.expose_secret().trim())
            .map_err(|e| anyhow::anyhow!("Stored session cache key is invalid: {e}"))?;
        Ok(Some(identity))
    }

    async fn load_or_create_identity(&self) -> Result<age::x25519::Identity> {
        if let Some(identity) = self.load_identity().await? {
            return Ok(identity);
        }
        if !self.key_store.supports_write() {
            anyhow::bail!("Session cache key store is read-only and holds no key");
        }
        let identity = age::x25519::Identity::generate();
        let encoded = identity.to_string();
        self.key_store
            .set(
                IDENTITY_KEY,
                SecretString::from(encoded.expose_secret().to_string()),
            )
            .await
            .context("Failed to store session cache key")?;
        debug!("generated new session cache key");
        Ok(identity)
    }

    /// Load the cached session for a server.
    ///
    /// Missing, expired, undecryptable or unparsable entries read as `None`.
    pub async fn get(&self, server_url: &str) -> Result<Option<CachedSession>> {
        let path = self.session_file(server_url);
        if !path.exists() {
            return Ok(None);
        }

        let ciphertext = std::fs::read(&path)
            .with_context(|| format!("Failed to read session file: {path:?}"))?;

        let identity = match self.load_identity().await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                warn!(path = %path.display(), "session cache key missing; ignoring cached session");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "could not load session cache key");
                return Ok(None);
            }
        };

        let plaintext = match age::decrypt(&identity, &ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to decrypt cached session");
                return Ok(None);
            }
        };

        let session: CachedSession = match serde_json::from_slice(&plaintext) {
            Ok(session) => session,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse cached session");
                return Ok(None);
            }
        };

        if self.clock.has_passed(session.expires_at) {
            debug!(path = %path.display(), "cached session expired");
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Encrypt and save a session for a server.
    pub async fn set(&self, server_url: &str, session: &CachedSession) -> Result<()> {
        let identity = self.load_or_create_identity().await?;
        let plaintext = serde_json::to_vec(session).context("Failed to serialize session")?;
        let ciphertext = age::encrypt(&identity.to_public(), &plaintext)
            .map_err(|e| anyhow::anyhow!("Failed to encrypt session: {e}"))?;

        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("Failed to create session cache dir: {:?}", self.cache_dir))?;

        let path = self.session_file(server_url);
        let mut file = open_private(&path)
            .with_context(|| format!("Failed to open session file: {path:?}"))?;
        file.write_all(&ciphertext)
            .with_context(|| format!("Failed to write session file: {path:?}"))?;

        Ok(())
    }

    /// Delete the cached session for a server. Returns whether a file existed.
    pub fn delete(&self, server_url: &str) -> Result<bool> {
        let path = self.session_file(server_url);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete session file: {path:?}"))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_uses_host_and_port() {
        assert_eq!(host_key("https://jenkins.onap.org"), "jenkins.onap.org");
        assert_eq!(
            host_key("https://jenkins.opendaylight.org/releng"),
            "jenkins.opendaylight.org"
        );
        assert_eq!(host_key("http://127.0.0.1:8080/"), "127.0.0.1_8080");
        assert_eq!(host_key("weird host/x"), "weird_host_x");
    }

    #[test]
    fn cached_session_expiry() {
        let created = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let session = CachedSession::new(
            AuthMethod::bearer_token("t"),
            created,
            std::time::Duration::from_secs(3600),
        );
        assert!(!session.is_expired(created));
        assert!(session.is_expired(created + chrono::Duration::seconds(3600)));
    }
}

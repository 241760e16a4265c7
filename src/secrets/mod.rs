//! Secret storage for the session-cache key, and the encrypted session cache.
//!
//! The cache encryption key never sits next to the cache files. It lives in a
//! [`SecretStore`] configured under `[auth.key_store]`:
//!
//! ```toml
//! [auth.key_store]
//! backend = "pass"
//! prefix = "jce"
//! ```

mod config;
mod file;
mod pass;
mod session;

pub use config::SecretStoreConfig;
pub use file::FileSecretStore;
pub(crate) use file::open_private;
pub use pass::{PassConfig, PassSecretStore};
pub use session::{host_key, CachedSession, SessionCache};

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

/// A key-value store for secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;

    /// Store a secret, replacing any previous value.
    async fn set(&self, key: &str, value: SecretString) -> Result<()>;

    /// Check if this store supports writes.
    fn supports_write(&self) -> bool {
        true
    }
}

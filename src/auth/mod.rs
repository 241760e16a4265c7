//! Authentication against a Jenkins server.
//!
//! An [`Authenticator`] supplies candidate credentials; [`AuthSession`]
//! validates them, caches them and hands out the resulting [`Session`].

mod method;
mod prompt;
mod session;

pub use method::{AuthKind, AuthMethod, Transport};
#[cfg(feature = "prompt")]
pub use prompt::PromptAuthenticator;
pub use prompt::{ChainedAuthenticator, StaticAuthenticator};
pub use session::{AuthSession, Session};

use anyhow::Result;
use async_trait::async_trait;

/// Source of credentials for a server.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Produce credentials for `server_url`, or `None` if this source has
    /// nothing to offer.
    async fn authenticate(&self, server_url: &str) -> Result<Option<AuthMethod>>;
}

//! Hand decryption for servers whose script console refuses this client.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use crate::credentials::CredentialPair;
use crate::error::{ErrorKind, JenkinsError};
use crate::jenkins::single_decrypt_script;

/// What a person needs to decrypt one credential in the browser.
#[derive(Debug, Clone)]
pub struct ManualStep {
    pub console_url: String,
    pub identifier: String,
    pub script: String,
}

/// Produces a plaintext by some route other than the HTTP script console.
#[async_trait]
pub trait ManualDecrypt: Send + Sync {
    /// `None` skips the credential.
    async fn decrypt(&self, step: &ManualStep) -> Result<Option<SecretString>>;
}

/// Console refusal marks the whole server unusable; items the breaker cut
/// short after it failed for the same reason.
fn offered(err: &JenkinsError) -> bool {
    matches!(err.kind(), ErrorKind::AccessForbidden | ErrorKind::CircuitOpen)
}

/// True when the server refused script console access for at least one item.
pub(crate) fn console_refused<'a, I>(failures: I) -> bool
where
    I: IntoIterator<Item = &'a JenkinsError>,
{
    failures
        .into_iter()
        .any(|err| err.kind() == ErrorKind::AccessForbidden)
}

/// Ask `manual` for each failed pair the console refused. Answers that are
/// empty or `skip` leave the item failed.
pub(crate) async fn decrypt_by_hand(
    manual: &dyn ManualDecrypt,
    console_url: &str,
    failed: &[(&CredentialPair, &JenkinsError)],
) -> Result<Vec<CredentialPair>> {
    let mut recovered = Vec::new();
    for (pair, err) in failed {
        if !offered(err) {
            continue;
        }
        let step = ManualStep {
            console_url: console_url.to_string(),
            identifier: pair.identifier.clone(),
            script: single_decrypt_script(pair.secret.expose_secret()),
        };
        match manual.decrypt(&step).await? {
            Some(secret) if is_answer(&secret) => {
                info!(identifier = %pair.identifier, "decrypted by hand");
                recovered.push(CredentialPair {
                    identifier: pair.identifier.clone(),
                    secret,
                });
            }
            _ => warn!(identifier = %pair.identifier, "skipped manual decryption"),
        }
    }
    Ok(recovered)
}

fn is_answer(secret: &SecretString) -> bool {
    let value = secret.expose_secret().trim();
    !value.is_empty() && !value.eq_ignore_ascii_case("skip")
}

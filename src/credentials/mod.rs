//! Jenkins `credentials.xml`: parsing, fetching from the controller, and
//! writing decrypted results.

mod fetch;
mod output;
mod xml;

pub use fetch::fetch_credentials_file;
pub use output::write_credentials;
pub use xml::{CredentialRecord, CredentialsFile, SYSTEM_CREDENTIAL_IDS, SYSTEM_USERNAMES};

use secrecy::SecretString;

/// An identifier and its secret. The secret is ciphertext on the way in
/// and plaintext on the way out.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub identifier: String,
    pub secret: SecretString,
}

impl CredentialPair {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

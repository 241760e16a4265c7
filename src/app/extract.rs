use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::manual::{console_refused, decrypt_by_hand, ManualDecrypt};
use super::types::{ExtractOutput, FailureOutput};
use super::{Connection, Target};
use crate::credentials::{
    fetch_credentials_file, write_credentials, CredentialPair, CredentialsFile,
};
use crate::jenkins::{BatchRequest, DecryptOptions, ItemOutcome};

pub struct ExtractRequest {
    pub target: Target,
    pub credentials_file: PathBuf,
    pub remote_path: String,
    /// Copy the credentials file from the target host when missing locally.
    pub fetch: bool,
    pub pattern: Option<String>,
    pub output: PathBuf,
    pub options: DecryptOptions,
    /// Offered the items the script console refused.
    pub manual: Option<Arc<dyn ManualDecrypt>>,
}

/// Keep the first pair for each identifier; returns the dropped identifiers.
pub(crate) fn dedupe(pairs: Vec<CredentialPair>) -> (Vec<CredentialPair>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(pairs.len());
    let mut skipped = Vec::new();
    for pair in pairs {
        if seen.insert(pair.identifier.clone()) {
            kept.push(pair);
        } else {
            warn!(identifier = %pair.identifier, "skipping duplicate identifier");
            skipped.push(pair.identifier);
        }
    }
    (kept, skipped)
}

pub(crate) async fn load_pairs(
    target: &Target,
    credentials_file: &std::path::Path,
    remote_path: &str,
    fetch: bool,
    pattern: Option<&str>,
) -> Result<Vec<CredentialPair>> {
    if fetch && !credentials_file.exists() {
        let host = target
            .host
            .as_deref()
            .context("No host to fetch the credentials file from; pass --host")?;
        fetch_credentials_file(host, remote_path, credentials_file).await?;
    }
    let file = CredentialsFile::load(credentials_file)?;
    Ok(match pattern {
        Some(pattern) => file.by_description(pattern),
        None => file.repository_credentials(),
    })
}

/// Fetch, parse, decrypt and write the credentials of one server.
pub async fn extract(connection: &Connection, request: &ExtractRequest) -> Result<ExtractOutput> {
    let pairs = load_pairs(
        &request.target,
        &request.credentials_file,
        &request.remote_path,
        request.fetch,
        request.pattern.as_deref(),
    )
    .await?;
    let (pairs, skipped_duplicates) = dedupe(pairs);
    info!(
        count = pairs.len(),
        file = %request.credentials_file.display(),
        "loaded encrypted credentials"
    );

    let batch = BatchRequest::new(pairs)?;
    let result = connection
        .decryptor
        .decrypt_batch(&batch, &request.options)
        .await
        .with_context(|| format!("Failed to decrypt credentials on {}", request.target.url))?;

    let mut by_hand: HashMap<String, CredentialPair> = HashMap::new();
    if let Some(manual) = &request.manual {
        let failed: Vec<_> = batch
            .items()
            .iter()
            .zip(&result.items)
            .filter_map(|(pair, item)| match &item.outcome {
                ItemOutcome::Failed(err) => Some((pair, err)),
                ItemOutcome::Decrypted(_) => None,
            })
            .collect();
        if console_refused(failed.iter().map(|(_, err)| *err)) {
            warn!(
                server = %request.target.url,
                "script console refused; falling back to manual decryption"
            );
            let console_url = connection.client.console_url();
            by_hand = decrypt_by_hand(manual.as_ref(), &console_url, &failed)
                .await?
                .into_iter()
                .map(|pair| (pair.identifier.clone(), pair))
                .collect();
        }
    }

    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for item in &result.items {
        match &item.outcome {
            ItemOutcome::Decrypted(secret) => successes.push(CredentialPair {
                identifier: item.identifier.clone(),
                secret: secret.clone(),
            }),
            ItemOutcome::Failed(err) => match by_hand.remove(&item.identifier) {
                Some(pair) => successes.push(pair),
                None => failures.push(FailureOutput {
                    identifier: item.identifier.clone(),
                    kind: err.kind().as_str().to_string(),
                    error: err.message().to_string(),
                }),
            },
        }
    }
    let manual_count = successes.len() - result.success_count();

    let output_file = if successes.is_empty() {
        None
    } else {
        write_credentials(&request.output, &successes)?;
        info!(
            count = successes.len(),
            path = %request.output.display(),
            "wrote decrypted credentials"
        );
        Some(request.output.display().to_string())
    };

    Ok(ExtractOutput {
        server: request.target.url.clone(),
        credentials_file: request.credentials_file.display().to_string(),
        output_file,
        strategy: result.strategy.to_string(),
        workers: result.workers,
        requested: batch.len(),
        succeeded: successes.len(),
        decrypted_by_hand: manual_count,
        failed: failures.len(),
        skipped_duplicates,
        elapsed_seconds: result.elapsed.as_secs_f64(),
        failures,
    })
}

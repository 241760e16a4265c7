use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::info;

/// Copy `remote_path` from `host` to `local` with scp.
///
/// Does nothing if `local` already exists. Returns whether a copy was made.
pub async fn fetch_credentials_file(host: &str, remote_path: &str, local: &Path) -> Result<bool> {
    if local.exists() {
        info!(path = %local.display(), "using existing credentials file");
        return Ok(false);
    }
    if host.is_empty() || host.starts_with('-') {
        anyhow::bail!("Invalid scp host: {host:?}");
    }
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let source = format!("{host}:{remote_path}");
    info!(%source, "fetching credentials file");
    let output = Command::new("scp")
        .arg("-q")
        .arg("--")
        .arg(&source)
        .arg(local)
        .output()
        .await
        .context("Failed to run scp")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("scp {source} failed: {}", stderr.trim());
    }
    Ok(true)
}

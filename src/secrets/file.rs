//! Secrets kept as individual files readable only by the owner.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::SecretStore;

pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Store under `~/.config/jce/secrets/`.
    pub fn new() -> Result<Self> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("jce")
            .join("secrets");
        Ok(Self { dir })
    }

    pub fn with_path(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn secret_file(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            anyhow::bail!("Invalid secret key name: {key:?}");
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        let path = self.secret_file(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read secret file: {path:?}"))?;
        Ok(Some(SecretString::from(content.trim_end().to_string())))
    }

    async fn set(&self, key: &str, value: SecretString) -> Result<()> {
        let path = self.secret_file(key)?;
        create_private_dir(&self.dir)?;
        let mut file = open_private(&path)
            .with_context(|| format!("Failed to open secret file: {path:?}"))?;
        file.write_all(value.expose_secret().as_bytes())
            .with_context(|| format!("Failed to write secret file: {path:?}"))?;
        Ok(())
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create secrets dir: {dir:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to restrict secrets dir: {dir:?}"))?;
    }
    Ok(())
}

/// Open `path` for writing, truncating it, with mode 0600 on Unix.
pub(crate) fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    #[cfg(unix)]
    {
        // The mode above only applies to newly created files.
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;

use super::CredentialPair;
use crate::secrets::open_private;

/// Write decrypted pairs as `<password> <username>` lines, readable only
/// by the owner.
pub fn write_credentials(path: &Path, pairs: &[CredentialPair]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut file = open_private(path)
        .with_context(|| format!("Failed to open output file: {}", path.display()))?;
    let mut content = String::new();
    for pair in pairs {
        content.push_str(pair.secret.expose_secret());
        content.push(' ');
        content.push_str(&pair.identifier);
        content.push('\n');
    }
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write output file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_password_then_username() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("out/passwords.txt");
        write_credentials(
            &path,
            &[
                CredentialPair::new("svc-a", "plainA"),
                CredentialPair::new("svc-b", "plainB"),
            ],
        )?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "plainA svc-a\nplainB svc-b\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(std::fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        }
        Ok(())
    }
}

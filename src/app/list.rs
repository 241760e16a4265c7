use std::path::Path;

use anyhow::Result;

use super::types::{CredentialEntryOutput, ProjectOutput};
use crate::credentials::{CredentialRecord, CredentialsFile};
use crate::projects::PROJECTS;

const PREVIEW_CHARS: usize = 20;

pub fn list_projects() -> Vec<ProjectOutput> {
    PROJECTS
        .iter()
        .map(|p| ProjectOutput {
            key: p.key.to_string(),
            name: p.name.to_string(),
            full_name: p.full_name.to_string(),
            jenkins_url: p.jenkins_url.map(str::to_string),
            aliases: p.aliases.iter().map(|a| a.to_string()).collect(),
        })
        .collect()
}

fn preview(ciphertext: &str) -> String {
    match ciphertext.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &ciphertext[..idx]),
        None => ciphertext.to_string(),
    }
}

fn entry_output(record: &CredentialRecord) -> CredentialEntryOutput {
    CredentialEntryOutput {
        id: record.id.clone(),
        description: record.description.clone(),
        username: record.username.clone(),
        encrypted_preview: record.encrypted_password.as_deref().map(preview),
        system: record.is_system(),
    }
}

/// Entries of a local `credentials.xml`. System entries are listed only
/// when `include_system` is set; `pattern` filters on description.
pub fn parse_local(
    path: &Path,
    pattern: Option<&str>,
    include_system: bool,
) -> Result<Vec<CredentialEntryOutput>> {
    let file = CredentialsFile::load(path)?;
    let pattern = pattern.map(str::to_lowercase);
    Ok(file
        .records()
        .iter()
        .filter(|r| include_system || !r.is_system())
        .filter(|r| match &pattern {
            Some(p) => r.description.to_lowercase().contains(p),
            None => true,
        })
        .map(entry_output)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const XML: &str = r#"<list>
  <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
    <id>jenkins</id>
    <description>Jenkins itself</description>
    <username>jenkins</username>
    <password>{AAAAsystem}</password>
  </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
  <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
    <id>nexus-aai</id>
    <description>Nexus repo aai</description>
    <username>aai</username>
    <password>{AQAAABAAAAAQ0123456789abcdefghijklmnop}</password>
  </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
  <com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
    <id>gerrit</id>
    <description>Gerrit push</description>
    <username>gerrit-bot</username>
    <password>{short}</password>
  </com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl>
</list>"#;

    fn write_fixture() -> Result<(TempDir, std::path::PathBuf)> {
        let dir = TempDir::new()?;
        let path = dir.path().join("credentials.xml");
        std::fs::write(&path, XML)?;
        Ok((dir, path))
    }

    #[test]
    fn lists_repository_entries_with_truncated_ciphertext() -> Result<()> {
        let (_dir, path) = write_fixture()?;
        let entries = parse_local(&path, None, false)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].username, "aai");
        assert_eq!(
            entries[0].encrypted_preview.as_deref(),
            Some("AQAAABAAAAAQ01234567...")
        );
        assert_eq!(entries[1].encrypted_preview.as_deref(), Some("short"));
        Ok(())
    }

    #[test]
    fn pattern_and_system_flag() -> Result<()> {
        let (_dir, path) = write_fixture()?;
        let entries = parse_local(&path, Some("NEXUS"), false)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "nexus-aai");

        let all = parse_local(&path, None, true)?;
        assert_eq!(all.len(), 3);
        assert!(all[0].system);
        Ok(())
    }

    #[test]
    fn projects_table_is_complete() {
        let projects = list_projects();
        assert_eq!(projects.len(), PROJECTS.len());
        assert!(projects.iter().any(|p| p.key == "onap"));
    }
}

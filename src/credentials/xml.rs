use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

use super::CredentialPair;

/// Credential ids Jenkins itself uses; never extracted as repository
/// credentials.
pub const SYSTEM_CREDENTIAL_IDS: &[&str] = &[
    "jenkins-ssh",
    "jenkins",
    "jenkins-log-archives",
    "docker",
    "os-cloud",
    "lftoolsini-nexus",
    "nonrtric-onap-nexus",
];

pub const SYSTEM_USERNAMES: &[&str] = &["jenkins", "logs", "docker"];

const USERNAME_PASSWORD_TAG: &str =
    "com.cloudbees.plugins.credentials.impl.UsernamePasswordCredentialsImpl";

/// One `UsernamePasswordCredentialsImpl` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRecord {
    pub id: String,
    pub description: String,
    pub username: String,
    /// Ciphertext with the surrounding braces removed, if the stored
    /// password was brace-wrapped.
    pub encrypted_password: Option<String>,
}

impl CredentialRecord {
    pub fn is_system(&self) -> bool {
        SYSTEM_CREDENTIAL_IDS.contains(&self.id.as_str())
            || SYSTEM_USERNAMES.contains(&self.username.as_str())
    }

    fn to_pair(&self) -> Option<CredentialPair> {
        self.encrypted_password
            .as_ref()
            .map(|ciphertext| CredentialPair::new(&self.username, ciphertext))
    }
}

/// Parsed contents of a Jenkins `credentials.xml`.
#[derive(Debug, Clone, Default)]
pub struct CredentialsFile {
    records: Vec<CredentialRecord>,
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let tag = regex::escape(USERNAME_PASSWORD_TAG);
        Regex::new(&format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>")).expect("valid regex")
    })
}

fn field_pattern(field: Field) -> &'static Regex {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        ["id", "description", "username", "password"].map(|name| {
            Regex::new(&format!(r"(?s)<{name}(?:\s[^>]*)?>(.*?)</{name}>")).expect("valid regex")
        })
    });
    &patterns[field as usize]
}

#[derive(Clone, Copy)]
enum Field {
    Id = 0,
    Description = 1,
    Username = 2,
    Password = 3,
}

fn field(block: &str, field: Field) -> Option<String> {
    field_pattern(field)
        .captures(block)
        .map(|caps| unescape_xml(caps[1].trim()))
}

fn unescape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail.find(';').and_then(|end| {
            let entity = &tail[1..end];
            let c = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            }?;
            Some((c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

impl CredentialsFile {
    pub fn parse(content: &str) -> Result<Self> {
        let trimmed = content.trim_start();
        if !trimmed.starts_with('<') {
            anyhow::bail!("Not an XML document");
        }

        let records = entry_pattern()
            .captures_iter(content)
            .filter_map(|caps| {
                let block = caps.get(1)?.as_str();
                let id = field(block, Field::Id)?;
                let username = field(block, Field::Username)?;
                let password = field(block, Field::Password)?;
                let encrypted_password = password
                    .strip_prefix('{')
                    .and_then(|p| p.strip_suffix('}'))
                    .map(str::to_string);
                Some(CredentialRecord {
                    id,
                    description: field(block, Field::Description).unwrap_or_default(),
                    username,
                    encrypted_password,
                })
            })
            .collect();

        Ok(Self { records })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse credentials file: {}", path.display()))
    }

    /// Every username/password entry, in file order.
    pub fn records(&self) -> &[CredentialRecord] {
        &self.records
    }

    /// Encrypted repository credentials: system entries and entries without
    /// a brace-wrapped password are skipped. Pairs are keyed by username.
    pub fn repository_credentials(&self) -> Vec<CredentialPair> {
        self.records
            .iter()
            .filter(|r| !r.is_system())
            .filter_map(CredentialRecord::to_pair)
            .collect()
    }

    /// Repository credentials whose description contains `pattern`,
    /// case-insensitively.
    pub fn by_description(&self, pattern: &str) -> Vec<CredentialPair> {
        let pattern = pattern.to_lowercase();
        self.records
            .iter()
            .filter(|r| !r.is_system())
            .filter(|r| r.description.to_lowercase().contains(&pattern))
            .filter_map(CredentialRecord::to_pair)
            .collect()
    }

    /// Distinct non-empty descriptions, sorted.
    pub fn descriptions(&self) -> Vec<String> {
        let mut descriptions: Vec<String> = self
            .records
            .iter()
            .filter(|r| !r.description.is_empty())
            .map(|r| r.description.clone())
            .collect();
        descriptions.sort();
        descriptions.dedup();
        descriptions
    }

    /// Look up one entry by credential id, system entries included.
    pub fn find_by_id(&self, id: &str) -> Option<CredentialPair> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .and_then(CredentialRecord::to_pair)
    }
}

//! Terminal prompts used by the CLI.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::console::Term;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{FuzzySelect, Password};
use secrecy::SecretString;

use super::manual::{ManualDecrypt, ManualStep};
use crate::projects::{projects_with_jenkins, Project};

/// Let the user pick a project with a Jenkins server. Entries are numbered,
/// and typing filters on number, name, key or alias.
///
/// Returns `None` when stderr is not a terminal or the menu is dismissed.
pub fn select_project() -> Result<Option<&'static Project>> {
    let term = Term::stderr();
    if !term.features().is_attended() {
        return Ok(None);
    }

    let projects: Vec<&'static Project> = projects_with_jenkins().collect();
    let labels: Vec<String> = projects
        .iter()
        .enumerate()
        .map(|(idx, project)| format!("{:>2}. {}", idx + 1, project.menu_label()))
        .collect();

    let choice = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Project")
        .items(&labels)
        .default(0)
        .interact_on_opt(&term)
        .context("Failed to prompt for a project")?;
    Ok(choice.and_then(|idx| projects.get(idx).copied()))
}

/// Walks the user through running the decrypt script in a browser and asks
/// for the printed plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptManualDecrypt;

impl PromptManualDecrypt {
    fn ask(step: &ManualStep) -> Result<Option<SecretString>> {
        let term = Term::stderr();
        if !term.features().is_attended() {
            return Ok(None);
        }
        term.write_line(&format!(
            "\nManual decryption of {}:\n  1. Open {}\n  2. Paste and run:\n\n{}\n  3. Enter the printed password (empty or \"skip\" to skip)",
            step.identifier,
            step.console_url,
            step.script.trim_end()
        ))?;
        let answer = Password::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Password for {}", step.identifier))
            .allow_empty_password(true)
            .interact_on(&term)
            .context("Failed to read the decrypted password")?;
        Ok(Some(SecretString::from(answer)))
    }
}

#[async_trait]
impl ManualDecrypt for PromptManualDecrypt {
    async fn decrypt(&self, step: &ManualStep) -> Result<Option<SecretString>> {
        let step = step.clone();
        tokio::task::spawn_blocking(move || Self::ask(&step))
            .await
            .map_err(|e| anyhow::anyhow!("Prompt task failed: {e}"))?
    }
}

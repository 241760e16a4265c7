mod auth;
mod benchmark;
mod config;
mod extract;
mod health;
#[cfg(feature = "prompt")]
mod interactive;
mod list;
mod manual;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::{AuthSession, Authenticator};
use crate::config::ResolvedConfig;
use crate::jenkins::{BatchDecryptor, ClientSettings, DecryptContext, ScriptConsoleClient};
use crate::projects::find_project;
use crate::secrets::SessionCache;

pub use auth::{auth_status, clear_cache, setup_auth};
pub use benchmark::{run_benchmark, BenchmarkRequest};
pub use config::config_output;
pub use extract::{extract, ExtractRequest};
pub use health::health_check;
pub use list::{list_projects, parse_local};
#[cfg(feature = "prompt")]
pub use interactive::{select_project, PromptManualDecrypt};
pub use manual::{ManualDecrypt, ManualStep};
pub use types::{
    AuthStatusOutput, BenchmarkOutput, ClearCacheOutput, CredentialEntryOutput, ExtractOutput,
    FailureOutput, HealthOutput, ProjectOutput,
};

/// Where to reach a Jenkins server and its credentials file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: String,
    /// SSH host for fetching `credentials.xml`.
    pub host: Option<String>,
}

/// True when neither a project, a URL nor the config names a server, so
/// the user has to be asked for a project.
pub fn needs_project(config: &ResolvedConfig, project: Option<&str>, url: Option<&str>) -> bool {
    project.is_none() && url.is_none() && config.jenkins.url.is_none()
}

/// Resolve the server from an explicit URL, a project name, or the config.
pub fn resolve_target(
    config: &ResolvedConfig,
    project: Option<&str>,
    url: Option<&str>,
    host: Option<&str>,
) -> Result<Target> {
    let project = project
        .map(|name| find_project(name).with_context(|| format!("Unknown project: {name}")))
        .transpose()?;

    let url = url
        .map(str::to_string)
        .or_else(|| project.and_then(|p| p.jenkins_url).map(str::to_string))
        .or_else(|| config.jenkins.url.clone());
    let Some(url) = url else {
        match project {
            Some(p) => anyhow::bail!("Project {} has no Jenkins server", p.name),
            None => anyhow::bail!("No Jenkins URL given; pass --url, a project, or set jenkins.url"),
        }
    };

    let host = host
        .map(str::to_string)
        .or_else(|| project.and_then(|p| p.jenkins_host()).map(str::to_string))
        .or_else(|| config.jenkins.host.clone())
        .or_else(|| {
            reqwest::Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        });

    Ok(Target { url, host })
}

/// Everything needed to talk to one server.
pub struct Connection {
    pub auth: Arc<AuthSession>,
    pub context: Arc<DecryptContext>,
    pub client: Arc<ScriptConsoleClient>,
    pub decryptor: BatchDecryptor,
}

pub fn session_cache(config: &ResolvedConfig) -> Result<Option<SessionCache>> {
    if !config.auth.cache_sessions {
        return Ok(None);
    }
    let key_store = config.auth.key_store.build()?;
    Ok(Some(SessionCache::new(key_store)?))
}

pub fn connect(
    config: &ResolvedConfig,
    url: &str,
    authenticator: Box<dyn Authenticator>,
) -> Result<Connection> {
    let mut auth = AuthSession::new(url, authenticator)
        .with_ttl(config.auth.session_ttl)
        .with_probe_timeout(config.decrypt.probe_timeout);
    if let Some(cache) = session_cache(config)? {
        auth = auth.with_cache(cache);
    }
    Ok(connect_with(config, Arc::new(auth)))
}

pub fn connect_with(config: &ResolvedConfig, auth: Arc<AuthSession>) -> Connection {
    let context = Arc::new(DecryptContext::new(&config.decrypt));
    let client = Arc::new(ScriptConsoleClient::new(
        auth.clone(),
        context.clone(),
        ClientSettings::from(&config.decrypt),
    ));
    let decryptor = BatchDecryptor::new(client.clone(), config.decrypt.clone());
    Connection {
        auth,
        context,
        client,
        decryptor,
    }
}

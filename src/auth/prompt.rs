use anyhow::Result;
use async_trait::async_trait;

use super::{AuthMethod, Authenticator};

/// Environment variables read by [`StaticAuthenticator::from_env`].
pub const ENV_USER: &str = "JENKINS_USER";
pub const ENV_API_TOKEN: &str = "JENKINS_API_TOKEN";
pub const ENV_SESSION_COOKIE: &str = "JENKINS_SESSION_COOKIE";
pub const ENV_BEARER_TOKEN: &str = "JENKINS_BEARER_TOKEN";

/// Credentials fixed up front, from flags or the environment.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    method: Option<AuthMethod>,
}

impl StaticAuthenticator {
    pub fn new(method: AuthMethod) -> Self {
        Self {
            method: Some(method),
        }
    }

    pub fn empty() -> Self {
        Self { method: None }
    }

    /// Read credentials from `JENKINS_USER` + `JENKINS_API_TOKEN`, then
    /// `JENKINS_SESSION_COOKIE`, then `JENKINS_BEARER_TOKEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let method = if let (Some(user), Some(token)) = (get(ENV_USER), get(ENV_API_TOKEN)) {
            Some(AuthMethod::api_token(user, token))
        } else if let Some(cookie) = get(ENV_SESSION_COOKIE) {
            Some(AuthMethod::parse_cookie(&cookie))
        } else {
            get(ENV_BEARER_TOKEN).map(AuthMethod::bearer_token)
        };
        Self { method }
    }

    pub fn is_empty(&self) -> bool {
        self.method.is_none()
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, _server_url: &str) -> Result<Option<AuthMethod>> {
        Ok(self.method.clone())
    }
}

/// Tries each authenticator in order and returns the first credentials
/// offered.
#[derive(Default)]
pub struct ChainedAuthenticator {
    chain: Vec<Box<dyn Authenticator>>,
}

impl ChainedAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.chain.push(Box::new(authenticator));
        self
    }
}

#[async_trait]
impl Authenticator for ChainedAuthenticator {
    async fn authenticate(&self, server_url: &str) -> Result<Option<AuthMethod>> {
        for authenticator in &self.chain {
            if let Some(method) = authenticator.authenticate(server_url).await? {
                return Ok(Some(method));
            }
        }
        Ok(None)
    }
}

/// Asks on the terminal for an API token or a session cookie.
#[cfg(feature = "prompt")]
#[derive(Debug, Clone, Default)]
pub struct PromptAuthenticator {
    preferred: Option<super::AuthKind>,
}

#[cfg(feature = "prompt")]
impl PromptAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the method menu and ask for this kind directly.
    pub fn with_preferred(mut self, kind: super::AuthKind) -> Self {
        self.preferred = Some(kind);
        self
    }

    fn prompt(server_url: &str, preferred: Option<super::AuthKind>) -> Result<Option<AuthMethod>> {
        use super::AuthKind;
        use anyhow::Context;
        use dialoguer::console::Term;
        use dialoguer::{theme::ColorfulTheme, Input, Password, Select};

        let theme = ColorfulTheme::default();
        let term = Term::stderr();
        if !term.features().is_attended() {
            return Ok(None);
        }

        let kind = match preferred {
            Some(kind) => kind,
            None => {
                let options = [
                    "API token (username + token from /me/configure)",
                    "Session cookie (copied from a logged-in browser)",
                    "Bearer token",
                ];
                let selection = Select::with_theme(&theme)
                    .with_prompt(format!("Authenticate to {server_url} with"))
                    .items(&options)
                    .default(0)
                    .interact_on_opt(&term)
                    .context("Failed to prompt for authentication method")?;
                match selection {
                    Some(0) => AuthKind::ApiToken,
                    Some(1) => AuthKind::SessionCookie,
                    Some(_) => AuthKind::BearerToken,
                    None => return Ok(None),
                }
            }
        };

        let method = match kind {
            AuthKind::ApiToken => {
                let username: String = Input::with_theme(&theme)
                    .with_prompt("Jenkins username")
                    .interact_on(&term)
                    .context("Failed to read username")?;
                let token = Password::with_theme(&theme)
                    .with_prompt("API token")
                    .interact_on(&term)
                    .context("Failed to read API token")?;
                AuthMethod::api_token(username.trim(), token.trim())
            }
            AuthKind::SessionCookie | AuthKind::BrowserSession => {
                let cookie = Password::with_theme(&theme)
                    .with_prompt("Session cookie (name=value)")
                    .interact_on(&term)
                    .context("Failed to read session cookie")?;
                AuthMethod::parse_cookie(&cookie)
            }
            AuthKind::BearerToken => {
                let token = Password::with_theme(&theme)
                    .with_prompt("Bearer token")
                    .interact_on(&term)
                    .context("Failed to read bearer token")?;
                AuthMethod::bearer_token(token.trim())
            }
        };
        Ok(Some(method))
    }
}

#[cfg(feature = "prompt")]
#[async_trait]
impl Authenticator for PromptAuthenticator {
    async fn authenticate(&self, server_url: &str) -> Result<Option<AuthMethod>> {
        let server_url = server_url.to_string();
        let preferred = self.preferred;
        tokio::task::spawn_blocking(move || Self::prompt(&server_url, preferred))
            .await
            .map_err(|e| anyhow::anyhow!("Prompt task failed: {e}"))?
    }
}

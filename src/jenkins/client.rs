//! Client for the Jenkins script console (`/manage/script`).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use secrecy::SecretString;
use tracing::{debug, warn};

use super::context::DecryptContext;
use super::retry::{calculate_delay, RetryBudget};
use super::script::{parse_single_output, single_decrypt_script};
use crate::auth::{AuthSession, Session};
use crate::config::DecryptConfig;
use crate::error::{ErrorKind, JenkinsError};

const SCRIPT_PATH: &str = "/manage/script";
const API_PATH: &str = "/api/json";
const CRUMB_FIELD: &str = "Jenkins-Crumb";

/// Breaker and error-stat key for single-item decryption.
pub const DECRYPT_OPERATION: &str = "password_decryption";

fn crumb_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r#"name="Jenkins-Crumb"\s+value="([^"]+)""#).expect("valid regex"),
            Regex::new(r#""crumb"\s*:\s*"([^"]+)""#).expect("valid regex"),
        ]
    })
}

fn result_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?s)<h2>Result</h2>\s*<pre[^>]*>(.*?)</pre>").expect("valid regex"),
            Regex::new(r#"(?s)<div class="console-output"[^>]*>(.*?)</div>"#)
                .expect("valid regex"),
        ]
    })
}

/// Anti-forgery token embedded in the script console page, if any.
pub fn extract_crumb(html: &str) -> Option<String> {
    crumb_patterns()
        .iter()
        .find_map(|re| re.captures(html))
        .map(|caps| caps[1].to_string())
}

/// Script output from a console response page, trimmed and unescaped.
pub fn extract_result(html: &str) -> Option<String> {
    result_patterns()
        .iter()
        .find_map(|re| re.captures(html))
        .map(|caps| unescape_html(&caps[1]).trim().to_string())
}

pub(crate) fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn map_status(status: StatusCode, body: &str) -> JenkinsError {
    match status.as_u16() {
        404 => JenkinsError::not_found("Jenkins script console not found"),
        401 => JenkinsError::authentication("Authentication required"),
        403 => JenkinsError::access_forbidden("Access forbidden to the script console"),
        s if s >= 500 => JenkinsError::server(s),
        s => JenkinsError::http(s, body),
    }
}

/// Allows a single re-authentication across every request that shares it.
///
/// A batch hands the same budget to each of its items, so a server that keeps
/// rejecting credentials costs one extra login rather than one per item.
#[derive(Debug, Default)]
pub struct ReauthBudget {
    spent: AtomicBool,
}

impl ReauthBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the re-authentication. Only the first caller gets `true`.
    pub fn take(&self) -> bool {
        !self.spent.swap(true, Ordering::SeqCst)
    }

    pub fn is_spent(&self) -> bool {
        self.spent.load(Ordering::SeqCst)
    }
}

/// Timeouts and retry budget used by [`ScriptConsoleClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub probe_timeout: Duration,
    pub script_timeout: Duration,
    pub batch_timeout: Duration,
    pub retry: RetryBudget,
}

impl From<&DecryptConfig> for ClientSettings {
    fn from(config: &DecryptConfig) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            script_timeout: config.script_timeout,
            batch_timeout: config.batch_timeout,
            retry: config.retry.clone(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&DecryptConfig::default())
    }
}

pub struct ScriptConsoleClient {
    auth: Arc<AuthSession>,
    context: Arc<DecryptContext>,
    settings: ClientSettings,
}

impl ScriptConsoleClient {
    pub fn new(
        auth: Arc<AuthSession>,
        context: Arc<DecryptContext>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            auth,
            context,
            settings,
        }
    }

    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    pub fn context(&self) -> &Arc<DecryptContext> {
        &self.context
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The script console page a person would open in a browser.
    pub fn console_url(&self) -> String {
        format!(
            "{}{SCRIPT_PATH}",
            self.auth.base_url().trim_end_matches('/')
        )
    }

    /// Fetch the console page and pull the crumb out of it. Any failure
    /// means no crumb.
    async fn fetch_crumb(&self, session: &Session) -> Option<String> {
        let response = match session
            .transport()
            .get(SCRIPT_PATH, self.settings.probe_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(status = %response.status(), "no crumb: console page not available");
                return None;
            }
            Err(e) => {
                debug!(error = %e, "no crumb: console page request failed");
                return None;
            }
        };
        let body = response.text().await.ok()?;
        let crumb = extract_crumb(&body);
        if crumb.is_none() {
            debug!("no crumb found on console page");
        }
        crumb
    }

    /// Submit `script` to the console and return its printed output.
    pub async fn run_script(
        &self,
        session: &Session,
        script: &str,
        timeout: Duration,
    ) -> Result<String, JenkinsError> {
        let crumb = self.fetch_crumb(session).await;

        self.context.rate_limiter.wait().await;

        let mut form = vec![("script", script), ("Submit", "Run")];
        let mut request = session.transport().post(SCRIPT_PATH, timeout);
        if let Some(crumb) = crumb.as_deref() {
            form.push((CRUMB_FIELD, crumb));
            request = request.header(CRUMB_FIELD, crumb);
        }

        debug!(bytes = script.len(), "submitting script");
        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| JenkinsError::from_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| JenkinsError::from_transport(&e))?;
        if !status.is_success() {
            return Err(map_status(status, &body));
        }

        match extract_result(&body) {
            Some(output) if !output.is_empty() => Ok(output),
            _ => Err(JenkinsError::empty_result()),
        }
    }

    /// Decrypt one ciphertext. Returns the plaintext and the number of
    /// retries it took.
    pub async fn decrypt_one(
        &self,
        session: Arc<Session>,
        ciphertext: &str,
    ) -> Result<(SecretString, u32), JenkinsError> {
        self.decrypt_shared(session, ciphertext, &ReauthBudget::new())
            .await
    }

    /// [`decrypt_one`](Self::decrypt_one) drawing re-authentication from a
    /// budget shared with other requests.
    pub async fn decrypt_shared(
        &self,
        session: Arc<Session>,
        ciphertext: &str,
        reauth: &ReauthBudget,
    ) -> Result<(SecretString, u32), JenkinsError> {
        let script = single_decrypt_script(ciphertext);
        let script = script.as_str();
        let timeout = self.settings.script_timeout;
        self.execute(DECRYPT_OPERATION, session, reauth, move |session| async move {
            let output = self.run_script(&session, script, timeout).await?;
            parse_single_output(&output)
        })
        .await
    }

    /// Run `attempt` through the circuit breaker for `operation`, retrying
    /// errors flagged retryable. An authentication error re-authenticates if
    /// `reauth` still allows it; once it is spent, the request may switch
    /// once to a session someone else already renewed, and otherwise fails.
    /// Returns the value and the number of retries.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        session: Arc<Session>,
        reauth: &ReauthBudget,
        mut attempt: F,
    ) -> Result<(T, u32), JenkinsError>
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, JenkinsError>>,
    {
        let breaker = self.context.breakers.get(operation);
        let budget = &self.settings.retry;

        let mut session = session;
        let mut renewed = false;
        let mut retries = 0u32;

        loop {
            let err = match breaker.call(|| attempt(session.clone())).await {
                Ok(value) => return Ok((value, retries)),
                Err(err) => err,
            };
            if err.kind() != ErrorKind::CircuitOpen {
                self.context.error_stats.record(operation, &err);
            }

            if err.is_auth() {
                if renewed {
                    return Err(err);
                }
                renewed = true;
                if reauth.take() {
                    warn!(operation, "authentication rejected, re-authenticating once");
                    session = self.auth.reauthenticate(&session).await?;
                    continue;
                }
                match self.auth.current() {
                    Some(current) if current.generation() > session.generation() => {
                        debug!(
                            operation,
                            generation = current.generation(),
                            "retrying with the renewed session"
                        );
                        session = current;
                        continue;
                    }
                    _ => {
                        warn!(operation, "authentication rejected again, giving up");
                        return Err(err);
                    }
                }
            }

            if !err.is_retryable() || retries >= budget.max_retries {
                return Err(err);
            }

            let delay = calculate_delay(retries, budget);
            retries += 1;
            warn!(
                operation,
                attempt = retries,
                max_retries = budget.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// GET the script console; a 200 means it is usable with this session.
    pub async fn validate_access(&self) -> Result<bool, JenkinsError> {
        let session = self.auth.get_transport().await?;
        let response = session
            .transport()
            .get(SCRIPT_PATH, self.settings.probe_timeout)
            .send()
            .await
            .map_err(|e| JenkinsError::from_transport(&e))?;
        Ok(response.status() == StatusCode::OK)
    }

    /// `GET {base}/api/json`.
    pub async fn server_info(&self) -> Result<serde_json::Value, JenkinsError> {
        let session = self.auth.get_transport().await?;
        let response = session
            .transport()
            .get(API_PATH, self.settings.probe_timeout)
            .send()
            .await
            .map_err(|e| JenkinsError::from_transport(&e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| JenkinsError::from_transport(&e))?;
        if !status.is_success() {
            return Err(map_status(status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| JenkinsError::script(format!("Invalid server info JSON: {e}")))
    }
}

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jce::auth::{AuthMethod, AuthSession, StaticAuthenticator};
use jce::config::DecryptConfig;
use jce::jenkins::{
    BatchDecryptor, CircuitBreakerConfig, ClientSettings, DecryptContext, RetryBudget,
    ScriptConsoleClient,
};
use wiremock::matchers::{method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

pub const CRUMB: &str = "crumb-1234";

/// Config with no real waiting: tiny backoff, effectively no rate limit and
/// a breaker that only trips when a test asks for it.
pub fn fast_config() -> DecryptConfig {
    DecryptConfig {
        requests_per_second: 10_000.0,
        retry: RetryBudget::default()
            .with_delays(Duration::from_millis(1), Duration::from_millis(5))
            .with_jitter(false),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 100,
            timeout: Duration::from_secs(30),
        },
        ..DecryptConfig::default()
    }
}

pub fn auth_session(server: &MockServer) -> Arc<AuthSession> {
    auth_session_for(&server.uri())
}

pub fn auth_session_for(url: &str) -> Arc<AuthSession> {
    let authenticator = StaticAuthenticator::new(AuthMethod::api_token("alice", "11token"));
    Arc::new(
        AuthSession::new(url, Box::new(authenticator)).with_probe_timeout(Duration::from_secs(5)),
    )
}

pub struct Harness {
    pub auth: Arc<AuthSession>,
    pub context: Arc<DecryptContext>,
    pub client: Arc<ScriptConsoleClient>,
    pub decryptor: BatchDecryptor,
}

pub fn harness(server: &MockServer, config: DecryptConfig) -> Harness {
    harness_for(&server.uri(), config)
}

pub fn harness_for(url: &str, config: DecryptConfig) -> Harness {
    let auth = auth_session_for(url);
    let context = Arc::new(DecryptContext::new(&config));
    let client = Arc::new(ScriptConsoleClient::new(
        auth.clone(),
        context.clone(),
        ClientSettings::from(&config),
    ));
    let decryptor = BatchDecryptor::new(client.clone(), config);
    Harness {
        auth,
        context,
        client,
        decryptor,
    }
}

/// Script console response page carrying `output`.
pub fn result_page(output: &str) -> String {
    let escaped = output
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    format!(
        "<html><body><h2>Result</h2><pre class=\"result\">{escaped}</pre></body></html>"
    )
}

pub fn console_page(crumb: &str) -> String {
    format!(
        "<html><form><input type=\"hidden\" name=\"Jenkins-Crumb\" value=\"{crumb}\"/></form></html>"
    )
}

/// URL of a local port nothing listens on.
pub fn closed_port_url() -> std::io::Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(format!("http://127.0.0.1:{port}"))
}

pub fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html")
}

/// `GET /api/json` answers 200, so credential checks pass.
pub async fn mount_probe(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"mode":"NORMAL","numExecutors":2}"#, "application/json"),
        )
        .mount(server)
        .await;
}

/// `GET /manage/script` serves a page with [`CRUMB`].
pub async fn mount_console(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/manage/script"))
        .respond_with(html(console_page(CRUMB)))
        .mount(server)
        .await;
}

/// Matches requests that carry no `Jenkins-Crumb` header.
pub struct NoCrumbHeader;

impl Match for NoCrumbHeader {
    fn matches(&self, request: &Request) -> bool {
        !request.headers.contains_key("jenkins-crumb")
    }
}

/// Matches a script console submission whose decoded `script` field
/// contains the given text.
pub struct ScriptContains(pub String);

pub fn script_contains(text: impl Into<String>) -> ScriptContains {
    ScriptContains(text.into())
}

impl Match for ScriptContains {
    fn matches(&self, request: &Request) -> bool {
        let Ok(body) = std::str::from_utf8(&request.body) else {
            return false;
        };
        let Ok(url) = reqwest::Url::parse(&format!("http://form.invalid/?{body}")) else {
            return false;
        };
        url.query_pairs()
            .any(|(key, value)| key == "script" && value.contains(self.0.as_str()))
    }
}

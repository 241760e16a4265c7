//! Authentication variants and the HTTP transport built from them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::JenkinsError;

/// Credentials accepted by a Jenkins server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Username plus API token, sent as HTTP basic auth.
    ApiToken {
        username: String,
        #[serde(serialize_with = "expose", deserialize_with = "conceal")]
        token: SecretString,
    },
    /// A single session cookie (usually `JSESSIONID.<hash>`).
    SessionCookie {
        name: String,
        #[serde(serialize_with = "expose", deserialize_with = "conceal")]
        value: SecretString,
    },
    /// A full set of cookies captured from a logged-in browser.
    BrowserSession {
        #[serde(serialize_with = "expose_map", deserialize_with = "conceal_map")]
        cookies: BTreeMap<String, SecretString>,
    },
    /// A bearer token obtained out of band.
    BearerToken {
        #[serde(serialize_with = "expose", deserialize_with = "conceal")]
        token: SecretString,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthKind {
    ApiToken,
    SessionCookie,
    BrowserSession,
    BearerToken,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::ApiToken => "api_token",
            AuthKind::SessionCookie => "session_cookie",
            AuthKind::BrowserSession => "browser_session",
            AuthKind::BearerToken => "bearer_token",
        }
    }
}

impl std::fmt::Display for AuthKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthMethod {
    pub fn api_token(username: impl Into<String>, token: impl Into<String>) -> Self {
        AuthMethod::ApiToken {
            username: username.into(),
            token: SecretString::from(token.into()),
        }
    }

    pub fn session_cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        AuthMethod::SessionCookie {
            name: name.into(),
            value: SecretString::from(value.into()),
        }
    }

    pub fn bearer_token(token: impl Into<String>) -> Self {
        AuthMethod::BearerToken {
            token: SecretString::from(token.into()),
        }
    }

    /// Parse a `name=value` cookie. A bare value is taken as `JSESSIONID`.
    pub fn parse_cookie(raw: &str) -> Self {
        match raw.trim().split_once('=') {
            Some((name, value)) => Self::session_cookie(name.trim(), value.trim()),
            None => Self::session_cookie("JSESSIONID", raw.trim()),
        }
    }

    pub fn kind(&self) -> AuthKind {
        match self {
            AuthMethod::ApiToken { .. } => AuthKind::ApiToken,
            AuthMethod::SessionCookie { .. } => AuthKind::SessionCookie,
            AuthMethod::BrowserSession { .. } => AuthKind::BrowserSession,
            AuthMethod::BearerToken { .. } => AuthKind::BearerToken,
        }
    }

    /// Short, secret-free description for logs and status output.
    pub fn describe(&self) -> String {
        match self {
            AuthMethod::ApiToken { username, .. } => format!("API token for {username}"),
            AuthMethod::SessionCookie { name, .. } => format!("session cookie {name}"),
            AuthMethod::BrowserSession { cookies } => {
                format!("browser session ({} cookies)", cookies.len())
            }
            AuthMethod::BearerToken { .. } => "bearer token".to_string(),
        }
    }
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn conceal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

fn expose_map<S: Serializer>(
    secrets: &BTreeMap<String, SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(secrets.len()))?;
    for (name, value) in secrets {
        map.serialize_entry(name, value.expose_secret())?;
    }
    map.end()
}

fn conceal_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, SecretString>, D::Error> {
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k, SecretString::from(v)))
        .collect())
}

/// Authenticated HTTP access to one Jenkins server.
///
/// Cookies the server sets (for example the session the crumb is bound to)
/// are kept in the jar between requests.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    base_url: String,
    method: AuthMethod,
}

impl Transport {
    pub fn new(base_url: &str, method: AuthMethod) -> Result<Self, JenkinsError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let url = Url::parse(&base_url).map_err(|e| {
            JenkinsError::configuration(format!("Invalid Jenkins URL '{base_url}': {e}"))
        })?;

        let jar = Arc::new(Jar::default());
        match &method {
            AuthMethod::SessionCookie { name, value } => {
                jar.add_cookie_str(&format!("{name}={}", value.expose_secret()), &url);
            }
            AuthMethod::BrowserSession { cookies } => {
                for (name, value) in cookies {
                    jar.add_cookie_str(&format!("{name}={}", value.expose_secret()), &url);
                }
            }
            AuthMethod::ApiToken { .. } | AuthMethod::BearerToken { .. } => {}
        }

        let client = Client::builder()
            .user_agent(concat!("jce/", env!("CARGO_PKG_VERSION")))
            .cookie_provider(jar)
            .gzip(true)
            .build()
            .map_err(|e| {
                JenkinsError::configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            method,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn method(&self) -> &AuthMethod {
        &self.method
    }

    /// Join an absolute endpoint path onto the base URL, keeping any prefix.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str, timeout: Duration) -> RequestBuilder {
        self.apply(self.client.get(self.url(path)).timeout(timeout))
    }

    pub fn post(&self, path: &str, timeout: Duration) -> RequestBuilder {
        self.apply(self.client.post(self.url(path)).timeout(timeout))
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.method {
            AuthMethod::ApiToken { username, token } => {
                request.basic_auth(username, Some(token.expose_secret()))
            }
            AuthMethod::BearerToken { token } => request.bearer_auth(token.expose_secret()),
            AuthMethod::SessionCookie { .. } | AuthMethod::BrowserSession { .. } => request,
        }
    }

    /// `GET {base}/api/json`; any 2xx means the credentials work.
    pub async fn probe(&self, timeout: Duration) -> Result<bool, JenkinsError> {
        let response = self
            .get("/api/json", timeout)
            .send()
            .await
            .map_err(|e| JenkinsError::from_transport(&e))?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_auth_type_tag() {
        let method = AuthMethod::api_token("alice", "11abc");
        let json = serde_json::to_value(&method).unwrap();
        assert_eq!(json["auth_type"], "api_token");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["token"], "11abc");

        let back: AuthMethod = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), AuthKind::ApiToken);
    }

    #[test]
    fn browser_session_cookies_round_trip() {
        let json = r#"{"auth_type":"browser_session","cookies":{"JSESSIONID":"abc","remember-me":"x"}}"#;
        let method: AuthMethod = serde_json::from_str(json).unwrap();
        match &method {
            AuthMethod::BrowserSession { cookies } => {
                assert_eq!(cookies["JSESSIONID"].expose_secret(), "abc");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert_eq!(serde_json::to_string(&method).unwrap(), json);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let method = AuthMethod::bearer_token("very-secret");
        assert!(!format!("{method:?}").contains("very-secret"));
        assert!(!method.describe().contains("very-secret"));
    }

    #[test]
    fn parse_cookie_forms() {
        match AuthMethod::parse_cookie("JSESSIONID.abc=xyz") {
            AuthMethod::SessionCookie { name, value } => {
                assert_eq!(name, "JSESSIONID.abc");
                assert_eq!(value.expose_secret(), "xyz");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        match AuthMethod::parse_cookie("bare") {
            AuthMethod::SessionCookie { name, .. } => assert_eq!(name, "JSESSIONID"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn url_keeps_path_prefix() {
        let transport = Transport::new(
            "https://jenkins.example.org/releng/",
            AuthMethod::bearer_token("t"),
        )
        .unwrap();
        assert_eq!(
            transport.url("/manage/script"),
            "https://jenkins.example.org/releng/manage/script"
        );
        assert_eq!(
            transport.url("api/json"),
            "https://jenkins.example.org/releng/api/json"
        );
    }

    #[test]
    fn invalid_url_is_configuration_error() {
        let err = Transport::new("not a url", AuthMethod::bearer_token("t")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}

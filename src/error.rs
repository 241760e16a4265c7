//! Error taxonomy for talking to a Jenkins server.
//!
//! Every failure carries an [`ErrorKind`] and an explicit `retryable` flag.
//! Retry loops read the flag; they never inspect the message.

use std::fmt;

/// Classification of a [`JenkinsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected, session expired, or no session could be established.
    Authentication,
    /// The server answered 403. The caller lacks permission for the script console.
    AccessForbidden,
    /// The endpoint does not exist (404).
    NotFound,
    /// Connection failure or timeout.
    Network,
    /// The server answered with a 5xx status.
    Server,
    /// The endpoint was reachable but produced no usable result.
    ScriptExecution,
    /// Local setup is malformed.
    Configuration,
    /// A circuit breaker rejected the call without invoking it.
    CircuitOpen,
    /// Any other non-2xx status.
    Http { status: u16 },
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::AccessForbidden => "access_forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Network => "network",
            ErrorKind::Server => "server",
            ErrorKind::ScriptExecution => "script_execution",
            ErrorKind::Configuration => "configuration",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Http { .. } => "http",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Http { status } => write!(f, "http {status}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Error returned by the script console client, the auth session and the
/// batch orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct JenkinsError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
}

impl JenkinsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message, false)
    }

    pub fn access_forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessForbidden, message, false)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message, false)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message, true)
    }

    pub fn server(status: u16) -> Self {
        Self::new(
            ErrorKind::Server,
            format!("Jenkins server error: {status}"),
            true,
        )
    }

    /// The console answered but the result block was missing or empty.
    pub fn empty_result() -> Self {
        Self::new(
            ErrorKind::ScriptExecution,
            "No result found in Jenkins response",
            true,
        )
    }

    /// The script ran and reported a failure of its own.
    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScriptExecution, message, false)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message, false)
    }

    pub fn circuit_open(operation: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            format!("circuit breaker for '{operation}' is open - service unavailable"),
            false,
        )
    }

    pub fn http(status: u16, body: &str) -> Self {
        Self::new(
            ErrorKind::Http { status },
            format!("Request failed: {status} - {}", truncate(body, 500)),
            false,
        )
    }

    /// Classify a transport-level failure from reqwest.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network(format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else {
            Self::network(format!("HTTP request failed: {err}"))
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// True for failures that another authentication attempt might fix.
    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flag_follows_kind_constructors() {
        assert!(JenkinsError::network("down").is_retryable());
        assert!(JenkinsError::server(502).is_retryable());
        assert!(JenkinsError::empty_result().is_retryable());
        assert!(!JenkinsError::access_forbidden("no").is_retryable());
        assert!(!JenkinsError::authentication("no").is_retryable());
        assert!(!JenkinsError::circuit_open("op").is_retryable());
        assert!(!JenkinsError::http(418, "teapot").is_retryable());
    }

    #[test]
    fn http_error_truncates_body() {
        let body = "x".repeat(2000);
        let err = JenkinsError::http(400, &body);
        assert_eq!(err.kind(), ErrorKind::Http { status: 400 });
        assert!(err.message().len() < 600);
    }

    #[test]
    fn display_includes_kind() {
        let err = JenkinsError::not_found("Jenkins endpoint not found");
        assert_eq!(err.to_string(), "not_found: Jenkins endpoint not found");
        let err = JenkinsError::http(418, "teapot");
        assert!(err.to_string().starts_with("http 418"));
    }
}

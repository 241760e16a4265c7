use tracing::debug;

use super::types::{BreakerOutput, ErrorStatOutput, HealthOutput};
use super::Connection;
use crate::jenkins::CircuitState;

/// Check authentication and script console access, and report the
/// resilience state gathered so far.
pub async fn health_check(connection: &Connection, verbose: bool) -> HealthOutput {
    let mut problems = Vec::new();

    let (authenticated, auth_type) = match connection.auth.get_transport().await {
        Ok(session) => (true, Some(session.kind().to_string())),
        Err(e) => {
            problems.push(format!("authentication: {e}"));
            (false, None)
        }
    };

    let mut script_console = false;
    let mut server_info = None;
    if authenticated {
        match connection.client.validate_access().await {
            Ok(true) => script_console = true,
            Ok(false) => problems.push("script console is not accessible".to_string()),
            Err(e) => problems.push(format!("script console: {e}")),
        }
        if verbose {
            match connection.client.server_info().await {
                Ok(info) => server_info = Some(info),
                Err(e) => debug!(error = %e, "server info unavailable"),
            }
        }
    }

    let circuit_breakers: Vec<BreakerOutput> = connection
        .context
        .breakers
        .states()
        .into_iter()
        .map(|(operation, state, failures)| {
            if state != CircuitState::Closed {
                problems.push(format!("circuit breaker {operation} is {state}"));
            }
            BreakerOutput {
                operation,
                state: state.to_string(),
                failures,
            }
        })
        .collect();

    let errors = connection
        .context
        .error_stats
        .snapshot()
        .into_iter()
        .map(|(operation, errors)| ErrorStatOutput { operation, errors })
        .collect();

    HealthOutput {
        server: connection.auth.base_url().to_string(),
        authenticated,
        auth_type,
        script_console,
        server_info,
        circuit_breakers,
        errors,
        problems,
    }
}

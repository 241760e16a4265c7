use anyhow::Result;

use super::types::{AuthStatusOutput, ClearCacheOutput};
use super::{session_cache, Connection};
use crate::auth::AuthSession;
use crate::config::ResolvedConfig;

async fn status(auth: &AuthSession, authenticated: Result<(), String>) -> AuthStatusOutput {
    let mut output = AuthStatusOutput {
        server: auth.base_url().to_string(),
        cache_file: None,
        cached_auth_type: None,
        cached_description: None,
        cached_expires_at: None,
        authenticated: authenticated.is_ok(),
        error: authenticated.err(),
    };
    if let Some(cache) = auth.cache() {
        output.cache_file = Some(cache.session_file(auth.base_url()).display().to_string());
        if let Ok(Some(cached)) = cache.get(auth.base_url()).await {
            output.cached_auth_type = Some(cached.auth.kind().to_string());
            output.cached_description = Some(cached.auth.describe());
            output.cached_expires_at = Some(cached.expires_at.to_rfc3339());
        }
    }
    output
}

/// Establish a session (cached or from the authenticator) and report it.
pub async fn auth_status(connection: &Connection) -> AuthStatusOutput {
    let authenticated = connection
        .auth
        .get_transport()
        .await
        .map(|_| ())
        .map_err(|e| e.to_string());
    status(&connection.auth, authenticated).await
}

/// Authenticate from scratch and cache the result.
pub async fn setup_auth(connection: &Connection) -> Result<AuthStatusOutput> {
    connection.auth.login().await?;
    Ok(status(&connection.auth, Ok(())).await)
}

pub fn clear_cache(config: &ResolvedConfig, url: &str) -> Result<ClearCacheOutput> {
    let deleted = match session_cache(config)? {
        Some(cache) => cache.delete(url)?,
        None => false,
    };
    Ok(ClearCacheOutput {
        server: url.to_string(),
        deleted,
    })
}

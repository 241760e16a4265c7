use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::method::{AuthKind, Transport};
use super::Authenticator;
use crate::clock::{Clock, SystemClock};
use crate::error::JenkinsError;
use crate::secrets::{CachedSession, SessionCache};

/// An authenticated transport plus the bookkeeping needed to replace it.
#[derive(Debug)]
pub struct Session {
    transport: Transport,
    kind: AuthKind,
    expires_at: DateTime<Utc>,
    generation: u64,
}

impl Session {
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn kind(&self) -> AuthKind {
        self.kind
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Increments each time the owning [`AuthSession`] installs a new session.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the authenticated session for one Jenkins server.
///
/// Many workers share one `AuthSession`. When several of them see the same
/// session go stale, the first performs the re-authentication and the rest
/// pick up its result.
pub struct AuthSession {
    base_url: String,
    authenticator: Box<dyn Authenticator>,
    cache: Option<SessionCache>,
    ttl: Duration,
    probe_timeout: Duration,
    clock: Arc<dyn Clock>,
    current: RwLock<Option<Arc<Session>>>,
    generation: AtomicU64,
    reauth: tokio::sync::Mutex<()>,
}

impl AuthSession {
    pub fn new(base_url: impl Into<String>, authenticator: Box<dyn Authenticator>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            authenticator,
            cache: None,
            ttl: Duration::from_secs(24 * 60 * 60),
            probe_timeout: Duration::from_secs(10),
            clock: Arc::new(SystemClock),
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            reauth: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_cache(mut self, cache: SessionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache(&self) -> Option<&SessionCache> {
        self.cache.as_ref()
    }

    /// The in-memory session, if one is installed and not expired.
    pub fn current(&self) -> Option<Arc<Session>> {
        self.current_valid()
    }

    fn current_valid(&self) -> Option<Arc<Session>> {
        let current = self.current.read().expect("session lock poisoned");
        current
            .as_ref()
            .filter(|s| !self.clock.has_passed(s.expires_at))
            .cloned()
    }

    fn install(&self, transport: Transport, expires_at: DateTime<Utc>) -> Arc<Session> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session {
            kind: transport.method().kind(),
            transport,
            expires_at,
            generation,
        });
        *self.current.write().expect("session lock poisoned") = Some(session.clone());
        debug!(generation, kind = %session.kind, "installed session");
        session
    }

    /// Return a usable session, establishing one if needed.
    pub async fn get_transport(&self) -> Result<Arc<Session>, JenkinsError> {
        if let Some(session) = self.current_valid() {
            return Ok(session);
        }
        let _guard = self.reauth.lock().await;
        if let Some(session) = self.current_valid() {
            return Ok(session);
        }
        self.establish(true).await
    }

    /// Replace `stale` with a freshly authenticated session.
    ///
    /// If another caller already replaced it, that session is returned
    /// without authenticating again.
    pub async fn reauthenticate(&self, stale: &Session) -> Result<Arc<Session>, JenkinsError> {
        let _guard = self.reauth.lock().await;
        if let Some(current) = self.current_valid() {
            if current.generation != stale.generation {
                debug!(
                    stale = stale.generation,
                    current = current.generation,
                    "session already refreshed"
                );
                return Ok(current);
            }
        }

        info!(server = %self.base_url, "re-authenticating");
        self.establish_fresh().await
    }

    /// Ask the authenticator for new credentials, ignoring and replacing any
    /// cached session.
    pub async fn login(&self) -> Result<Arc<Session>, JenkinsError> {
        let _guard = self.reauth.lock().await;
        self.establish_fresh().await
    }

    async fn establish_fresh(&self) -> Result<Arc<Session>, JenkinsError> {
        self.invalidate();
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&self.base_url) {
                warn!(error = %e, "failed to remove stale cached session");
            }
        }
        self.establish(false).await
    }

    /// Probe the current session. Returns false when there is none.
    pub async fn is_valid(&self) -> bool {
        match self.current_valid() {
            Some(session) => session
                .transport
                .probe(self.probe_timeout)
                .await
                .unwrap_or(false),
            None => false,
        }
    }

    /// Drop the in-memory session. The next call to
    /// [`get_transport`](Self::get_transport) establishes a new one.
    pub fn invalidate(&self) {
        *self.current.write().expect("session lock poisoned") = None;
    }

    async fn establish(&self, use_cache: bool) -> Result<Arc<Session>, JenkinsError> {
        if use_cache {
            if let Some(session) = self.from_cache().await? {
                return Ok(session);
            }
        }

        let method = self
            .authenticator
            .authenticate(&self.base_url)
            .await
            .map_err(|e| JenkinsError::authentication(format!("Authentication failed: {e:#}")))?
            .ok_or_else(|| {
                JenkinsError::authentication(format!(
                    "No credentials available for {}",
                    self.base_url
                ))
            })?;

        let transport = Transport::new(&self.base_url, method.clone())?;
        if !self.verify(&transport).await? {
            return Err(JenkinsError::authentication(format!(
                "Jenkins rejected the {}",
                method.describe()
            )));
        }
        info!(server = %self.base_url, method = %method.describe(), "authenticated");

        let cached = CachedSession::new(method, self.clock.now(), self.ttl);
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&self.base_url, &cached).await {
                warn!(error = %e, "failed to cache session");
            }
        }
        Ok(self.install(transport, cached.expires_at))
    }

    /// Check credentials against the server. Not reaching the server at all
    /// also means no session can be established, so transport failures are
    /// reported as authentication errors carrying the cause.
    async fn verify(&self, transport: &Transport) -> Result<bool, JenkinsError> {
        transport.probe(self.probe_timeout).await.map_err(|e| {
            JenkinsError::authentication(format!(
                "Could not verify credentials with {}: {}",
                self.base_url,
                e.message()
            ))
        })
    }

    async fn from_cache(&self) -> Result<Option<Arc<Session>>, JenkinsError> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let cached = match cache.get(&self.base_url).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "failed to read session cache");
                return Ok(None);
            }
        };

        let transport = Transport::new(&self.base_url, cached.auth)?;
        if self.verify(&transport).await? {
            debug!(server = %self.base_url, "reusing cached session");
            return Ok(Some(self.install(transport, cached.expires_at)));
        }

        warn!(server = %self.base_url, "cached session rejected by server");
        if let Err(e) = cache.delete(&self.base_url) {
            warn!(error = %e, "failed to remove rejected cached session");
        }
        Ok(None)
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("base_url", &self.base_url)
            .field("cache", &self.cache.is_some())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish()
    }
}

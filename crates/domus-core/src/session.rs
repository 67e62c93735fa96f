// ── Session management ──
//
// Owns credentials and authentication state for one hub connection.
// Authentication is single-flighted: the first caller to observe a stale
// session performs the login while concurrent callers wait on the same
// attempt. Repeated credential rejections enter an exponential lockdown
// during which no portal request is issued at all -- hammering a portal
// with bad credentials gets accounts banned.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use domus_api::{LoginMethod, PortalClient};

use crate::error::CoreError;

/// Connection lifecycle observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct AuthState {
    authenticated: bool,
    lockout_until: Option<Instant>,
    consecutive_rejections: u32,
}

/// Authentication state machine shared by everything that talks to the
/// portal.
pub(crate) struct SessionManager {
    api: Arc<PortalClient>,
    login: LoginMethod,
    /// Held across the whole login call: that is the single-flight.
    auth: Mutex<AuthState>,
    state_tx: watch::Sender<ConnectionState>,
    lockdown_base: std::time::Duration,
}

impl SessionManager {
    pub(crate) fn new(
        api: Arc<PortalClient>,
        login: LoginMethod,
        lockdown_base: std::time::Duration,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            api,
            login,
            auth: Mutex::new(AuthState {
                authenticated: false,
                lockout_until: None,
                consecutive_rejections: 0,
            }),
            state_tx,
            lockdown_base,
        })
    }

    pub(crate) fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Direct portal access for best-effort teardown calls that must not
    /// trigger re-authentication.
    pub(crate) fn api(&self) -> Arc<PortalClient> {
        Arc::clone(&self.api)
    }

    /// Move the lifecycle watch, notifying only on actual transitions.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Return once a valid session exists.
    ///
    /// Concurrent callers share one in-flight login: whoever acquires the
    /// lock first performs it, the rest observe the authenticated flag on
    /// wake-up and return. During lockdown this fails immediately with
    /// [`CoreError::LockedOut`] without touching the transport.
    pub(crate) async fn ensure_authenticated(&self) -> Result<(), CoreError> {
        let mut auth = self.auth.lock().await;
        if auth.authenticated {
            return Ok(());
        }

        if let Some(until) = auth.lockout_until {
            let now = Instant::now();
            if now < until {
                return Err(CoreError::LockedOut {
                    retry_in: until - now,
                });
            }
        }

        debug!("authenticating with portal");
        match self.api.login(&self.login).await {
            Ok(()) => {
                auth.authenticated = true;
                auth.consecutive_rejections = 0;
                auth.lockout_until = None;
                self.set_state(ConnectionState::Connected);
                info!("authenticated with portal");
                Ok(())
            }
            Err(e) if e.is_auth_rejection() => {
                auth.consecutive_rejections += 1;
                let delay = self.lockdown_delay(auth.consecutive_rejections);
                auth.lockout_until = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Disconnected);
                warn!(
                    rejections = auth.consecutive_rejections,
                    ?delay,
                    "portal rejected credentials, entering lockdown"
                );
                Err(CoreError::AuthenticationFailed {
                    message: e.to_string(),
                })
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Mark the session stale; the next [`ensure_authenticated`] call
    /// performs a fresh login.
    ///
    /// [`ensure_authenticated`]: Self::ensure_authenticated
    pub(crate) async fn invalidate(&self) {
        self.auth.lock().await.authenticated = false;
    }

    /// Execute a portal call under a valid session.
    ///
    /// An auth-expired response triggers exactly one transparent
    /// re-authentication and retry. A second expiry surfaces the error,
    /// invalidates the session, and drives the lifecycle watch to
    /// `Disconnected`.
    pub(crate) async fn run<T, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: Fn(Arc<PortalClient>) -> Fut,
        Fut: Future<Output = Result<T, domus_api::Error>>,
    {
        self.ensure_authenticated().await?;
        match op(Arc::clone(&self.api)).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_auth_expired() => {
                debug!("session expired mid-request, re-authenticating once");
                self.invalidate().await;
                self.ensure_authenticated().await?;
                match op(Arc::clone(&self.api)).await {
                    Ok(value) => Ok(value),
                    Err(e2) if e2.is_auth_expired() => {
                        warn!("session rejected again after re-authentication");
                        self.invalidate().await;
                        self.set_state(ConnectionState::Disconnected);
                        Err(e2.into())
                    }
                    Err(e2) => Err(e2.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `base * 2^(n-1)` for the n-th consecutive rejection.
    fn lockdown_delay(&self, rejections: u32) -> std::time::Duration {
        let doublings = rejections.saturating_sub(1).min(16);
        self.lockdown_base * (1u32 << doublings)
    }
}

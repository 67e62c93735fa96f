// ── Runtime configuration ──
//
// Describes *how* to reach a portal and the tuning of the background
// machinery. Carries credential data but never touches disk; the consumer
// constructs a `HubConfig` and hands it in.

use std::time::Duration;

use tracing::warn;

use domus_api::{LoginMethod, Portal, TlsMode};

/// Full refreshes below this interval put needless load on the gateway.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Configuration for a single hub connection.
///
/// All tuning fields ship with working defaults; most deployments only
/// set `portal` and `login`.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Which vendor cloud the gateway is paired with.
    pub portal: Portal,
    /// Credentials and login flow.
    pub login: LoginMethod,
    /// TLS verification strategy.
    pub tls: TlsMode,
    /// Per-request transport timeout.
    pub timeout: Duration,

    /// Event poll cadence with no execution in flight.
    pub event_poll_idle: Duration,
    /// Event poll cadence while at least one execution is in flight.
    pub event_poll_active: Duration,
    /// Delay before the next fetch after a transient fetch error.
    pub fetch_retry: Duration,

    /// How often to ask the gateway for a full state refresh.
    pub refresh_interval: Duration,
    /// How long to wait for the refresh-completed event before
    /// reconciling manually.
    pub refresh_fallback: Duration,

    /// Gateway-side limit on simultaneously running executions.
    pub execution_capacity: usize,
    /// Delay between admission retries while at capacity.
    pub execution_retry: Duration,
    /// Window after which an execution with no terminal event is
    /// considered timed out and dropped from tracking.
    pub execution_timeout: Duration,

    /// Initial lockdown delay after a credential rejection; doubles on
    /// each consecutive rejection.
    pub lockdown_base: Duration,
}

impl HubConfig {
    /// A config with default tuning for the given portal and login.
    pub fn new(portal: Portal, login: LoginMethod) -> Self {
        Self {
            portal,
            login,
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            event_poll_idle: Duration::from_secs(60),
            event_poll_active: Duration::from_secs(5),
            fetch_retry: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(30 * 60),
            refresh_fallback: Duration::from_secs(30),
            execution_capacity: 10,
            execution_retry: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(2 * 60),
            lockdown_base: Duration::from_secs(60),
        }
    }

    /// Sanity-check tuning values. Called by `Hub::new`.
    pub(crate) fn validate(&self) -> Result<(), crate::error::CoreError> {
        if self.execution_capacity == 0 {
            return Err(crate::error::CoreError::Config {
                message: "execution_capacity must be at least 1".into(),
            });
        }
        if self.event_poll_idle.is_zero() || self.event_poll_active.is_zero() {
            return Err(crate::error::CoreError::Config {
                message: "poll intervals must be non-zero".into(),
            });
        }
        if self.refresh_interval < MIN_REFRESH_INTERVAL {
            warn!(
                configured = ?self.refresh_interval,
                minimum = ?MIN_REFRESH_INTERVAL,
                "refresh interval below the recommended minimum; \
                 frequent full refreshes strain the gateway"
            );
        }
        Ok(())
    }
}

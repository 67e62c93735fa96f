use thiserror::Error;

/// Vendor error code sent on credential rejection.
pub const CODE_AUTHENTICATION_ERROR: &str = "AUTHENTICATION_ERROR";
/// Vendor error code sent when the session cookie is missing or expired.
pub const CODE_RESOURCE_ACCESS_DENIED: &str = "RESOURCE_ACCESS_DENIED";
/// Vendor error code sent when polling with a listener id the portal no
/// longer knows (expired or registered by another session).
pub const CODE_NO_REGISTERED_EVENT_LISTENER: &str = "NO_REGISTERED_EVENT_LISTENER";
/// Vendor error code sent when the execution queue on the gateway is full.
pub const CODE_EXEC_QUEUE_FULL: &str = "EXEC_QUEUE_FULL";

/// Top-level error type for the `domus-api` crate.
///
/// Covers every failure mode of the portal API surface. `domus-core` maps
/// these into its own taxonomy; the predicate methods below exist so that
/// callers classify errors without matching on vendor code strings.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The portal rejected the login or the session (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
        /// Vendor error code, when the 401 carried an error envelope.
        code: Option<String>,
    },

    // ── Portal API ──────────────────────────────────────────────────
    /// Structured error parsed from the `{errorCode, error}` envelope.
    #[error("Portal API error (HTTP {status}): {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: u16,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Extract the vendor error code, if the portal sent one.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Authentication { code, .. } | Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if the portal rejected the credentials themselves.
    ///
    /// This is the ban-triggering class: callers must back off instead of
    /// retrying the same credentials.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            Self::Authentication { code, .. } if code.as_deref() == Some(CODE_AUTHENTICATION_ERROR)
        )
    }

    /// Returns `true` if a previously valid session has expired and a
    /// re-login with the same credentials might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::Authentication { code, .. } => {
                code.as_deref() != Some(CODE_AUTHENTICATION_ERROR)
            }
            Self::Api { code, .. } => code.as_deref() == Some(CODE_RESOURCE_ACCESS_DENIED),
            _ => false,
        }
    }

    /// Returns `true` if the portal no longer knows the event listener the
    /// request referenced. Recovery is a silent re-registration.
    pub fn is_listener_unknown(&self) -> bool {
        self.api_code() == Some(CODE_NO_REGISTERED_EVENT_LISTENER)
    }

    /// Returns `true` if the gateway-side execution queue is full.
    pub fn is_execution_queue_full(&self) -> bool {
        self.api_code() == Some(CODE_EXEC_QUEUE_FULL)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

// ── Core error types ──
//
// User-facing errors from domus-core. Consumers never see raw HTTP or
// JSON failures -- the `From<domus_api::Error>` impl translates
// transport-layer errors into domain-appropriate variants.

use std::time::Duration;

use thiserror::Error;

use domus_api::models::ExecutionState;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Authentication is suppressed after repeated credential rejections.
    /// No portal request was issued for this attempt.
    #[error("Authentication locked down, retry in {retry_in:?}")]
    LockedOut { retry_in: Duration },

    #[error("Not connected to the portal")]
    NotConnected,

    // ── Portal / transport ───────────────────────────────────────────
    /// A portal request failed. Carries the vendor error code and HTTP
    /// status when the portal sent an error envelope.
    #[error("Portal request failed: {message}")]
    Transport {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Executions ───────────────────────────────────────────────────
    /// A command batch reached a terminal failure state.
    #[error("Execution {exec_id} failed in state {state:?}: {message}")]
    Execution {
        exec_id: String,
        state: ExecutionState,
        message: String,
    },

    /// No terminal event was observed within the configured window.
    /// Synthesized locally; the portal never reports this.
    #[error("Execution {exec_id} timed out without a terminal event")]
    ExecutionTimedOut { exec_id: String },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Device not found: {device_url}")]
    DeviceNotFound { device_url: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The vendor error code, when the underlying failure carried one.
    pub fn vendor_code(&self) -> Option<&str> {
        match self {
            Self::Transport { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// The portal discarded the event listener this request referenced.
    pub(crate) fn is_listener_unknown(&self) -> bool {
        self.vendor_code() == Some(domus_api::error::CODE_NO_REGISTERED_EVENT_LISTENER)
    }

    /// The gateway-side execution queue is full.
    pub(crate) fn is_execution_queue_full(&self) -> bool {
        self.vendor_code() == Some(domus_api::error::CODE_EXEC_QUEUE_FULL)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<domus_api::Error> for CoreError {
    fn from(err: domus_api::Error) -> Self {
        match err {
            domus_api::Error::Authentication { message, .. } => {
                Self::AuthenticationFailed { message }
            }
            domus_api::Error::Api {
                message,
                code,
                status,
            } => Self::Transport {
                message,
                code,
                status: Some(status),
            },
            domus_api::Error::Transport(e) => Self::Transport {
                message: e.to_string(),
                code: None,
                status: e.status().map(|s| s.as_u16()),
            },
            other => Self::Transport {
                message: other.to_string(),
                code: None,
                status: None,
            },
        }
    }
}

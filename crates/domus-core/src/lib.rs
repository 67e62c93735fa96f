//! Stateful client layer between `domus-api` and application code.
//!
//! This crate owns the connection lifecycle and the synchronization logic
//! for an Overkiz-style home-automation hub:
//!
//! - **[`Hub`]** — Central facade. [`connect()`](Hub::connect)
//!   authenticates, assembles the device topology, and spawns the
//!   background loops; the accessors expose devices, states, and
//!   execution progress.
//!
//! - **Session management** ([`ConnectionState`]) — Single-flighted
//!   authentication with exponential lockdown after credential
//!   rejections, and one transparent re-login when a session expires
//!   mid-request.
//!
//! - **Device registry** ([`DeviceRegistry`], [`StatesChanged`]) —
//!   Concurrent device storage with per-device, debounced state-change
//!   notifications. Topology re-fetches reconcile into existing records,
//!   so subscriptions survive them.
//!
//! - **Execution tracking** ([`Action`], [`Command`],
//!   [`ExecutionUpdate`]) — Command batches tracked end-to-end: capacity
//!   admission against the gateway's queue limit, correlation of
//!   asynchronous completion/failure events (including partial batch
//!   failures), and a local timeout watchdog.
//!
//! - **Adaptive polling** — The event feed is polled slowly while idle
//!   and quickly while executions are in flight; a slow parallel loop
//!   requests full state refreshes.

pub mod config;
pub mod error;
mod executions;
mod hub;
pub mod model;
mod poller;
mod registry;
mod session;
mod topology;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::HubConfig;
pub use error::CoreError;
pub use executions::{
    Action, Command, ExecutionOutcome, ExecutionUpdate, PendingExecution,
};
pub use hub::Hub;
pub use model::{Device, DeviceUrl, StateValue};
pub use registry::{DeviceRegistry, StatesChanged};
pub use session::ConnectionState;

// Re-export the API-level types that appear in this crate's surface.
pub use domus_api::models::ExecutionState;
pub use domus_api::{LoginMethod, Portal, TlsMode};

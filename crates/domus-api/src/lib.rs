// domus-api: Async Rust client for the Overkiz enduser portal API
// (Somfy TaHoma, Cozytouch, Connexoon)

mod auth;
pub mod client;
pub mod error;
mod events;
mod exec;
pub mod models;
pub mod portal;
mod setup;
pub mod transport;

pub use client::PortalClient;
pub use error::Error;
pub use portal::{LoginMethod, Portal};
pub use transport::{TlsMode, TransportConfig};

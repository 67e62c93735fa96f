// ── Domain model ──

mod device;

pub use device::{Device, DeviceUrl, StateValue};

pub(crate) use device::state_deltas;

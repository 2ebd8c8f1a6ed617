//! Hardware interaction modules
//!
//! The device gateway seam and the snapshot manager built on it.

mod gateway;
pub mod snapshot;

pub use gateway::DeviceGateway;
#[cfg(test)]
pub use gateway::MockDeviceGateway;
pub use snapshot::{capture, restore, RestoreOutcome, Snapshot};

//! Device gateway seam
//!
//! Everything the calibration engine does to the physical room goes through
//! [`DeviceGateway`]. Implementations wrap a home-automation host; the
//! simulated room in [`crate::sim`] is the in-tree implementation.
//!
//! # Contract
//!
//! - `set_light_state` only reports whether the command was *accepted*.
//!   Callers confirm the effect with `read_light_state`.
//! - `read_light_state` fails with `DeviceUnavailable` when the light
//!   cannot be reached at all.
//! - `read_sensor` fails with `DeviceUnavailable` when the sensor is gone,
//!   and returns an invalid [`LuxReading`] for garbage samples.

use async_trait::async_trait;

use crate::data::{LightCommand, LightHandle, LightState, LuxReading};
use crate::error::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Command a light; acceptance only
    async fn set_light_state(&self, light: &str, desired: &LightCommand) -> Result<()>;

    /// Read the current state of a light
    async fn read_light_state(&self, light: &str) -> Result<LightState>;

    /// Take one sensor sample
    async fn read_sensor(&self, sensor: &str) -> Result<LuxReading>;

    /// Capabilities lookup; `None` for unknown lights
    fn light_handle(&self, light: &str) -> Option<LightHandle>;
}

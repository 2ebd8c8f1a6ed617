//! Min/max lux probe
//!
//! Measures the room with every light off and with every light at full
//! white. Lights that do not reach the commanded state are left out of
//! that one measurement and logged; they are not excluded from the session.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::calibration::context::ProbeContext;
use crate::error::{LuxcalError, Result};

/// Result of the min/max phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxResult {
    pub min_lux: f64,
    pub max_lux: f64,
    /// Lights still reporting on during the min measurement
    pub stuck_on: Vec<String>,
    /// Lights not reporting on during the max measurement
    pub stuck_off: Vec<String>,
}

impl MinMaxResult {
    pub fn range(&self) -> f64 {
        self.max_lux - self.min_lux
    }
}

/// Measure the floor and the all-on ceiling of the room
pub async fn measure_min_max(
    ctx: &ProbeContext,
    lights: &[String],
    settle: Duration,
) -> Result<MinMaxResult> {
    // Everything off
    for light in lights {
        ctx.turn_off_quietly(light).await;
    }
    ctx.pause(settle).await?;
    let stuck_on = noncompliant(ctx, lights, false).await;
    if !stuck_on.is_empty() {
        warn!(lights = ?stuck_on, "Lights did not turn off for the floor measurement");
    }
    let min_lux = ctx.read_lux().await?;
    info!(min_lux, "Measured floor with all lights off");

    // Everything on
    for light in lights {
        ctx.turn_on_quietly(light).await;
    }
    ctx.pause(settle).await?;
    let stuck_off = noncompliant(ctx, lights, true).await;
    if !stuck_off.is_empty() {
        warn!(lights = ?stuck_off, "Lights did not turn on for the ceiling measurement");
    }
    let max_lux = ctx.read_lux().await?;
    info!(max_lux, "Measured ceiling with all lights on");

    let required = ctx.settings().probe.min_detectable_lux;
    if max_lux - min_lux < required {
        return Err(LuxcalError::RangeViolation { min_lux, max_lux, required });
    }

    Ok(MinMaxResult { min_lux, max_lux, stuck_on, stuck_off })
}

async fn noncompliant(ctx: &ProbeContext, lights: &[String], want_on: bool) -> Vec<String> {
    let mut out = Vec::new();
    for light in lights {
        match ctx.light_state(light).await {
            Some(state) if state.on == want_on => {}
            _ => out.push(light.clone()),
        }
    }
    out
}

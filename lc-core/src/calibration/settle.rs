//! Settle-time estimation
//!
//! Measures how long the sensor takes to stabilise after a light switches
//! on. The first light that responds is used as the reference; the
//! response is measured over several trials and averaged. Every later
//! probe waits for the resulting duration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::calibration::context::ProbeContext;
use crate::error::Result;

/// Result of the timing phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleEstimate {
    pub settle: Duration,
    /// No light responded; `settle` is the conservative default
    pub degraded: bool,
    pub reference_light: Option<String>,
    pub trials: Vec<Duration>,
}

/// Estimate the settle duration used by every later probe
pub async fn estimate_settle_time(ctx: &ProbeContext, lights: &[String]) -> Result<SettleEstimate> {
    let timing = &ctx.settings().timing;

    for light in lights {
        ctx.turn_off_quietly(light).await;
    }
    ctx.pause(timing.settle_default()).await?;

    for light in lights {
        let Some(first) = measure_response(ctx, light).await? else {
            warn!(light = %light, "No sensor response within {:?}, trying next light", timing.settle_max_wait());
            continue;
        };

        let recovery = first.mul_f64(timing.settle_safety_factor).max(timing.settle_min());
        let mut trials = vec![first];
        for trial in 1..timing.settle_trials {
            ctx.turn_off_quietly(light).await;
            ctx.pause(recovery).await?;
            match measure_response(ctx, light).await? {
                Some(elapsed) => trials.push(elapsed),
                None => debug!(light = %light, trial, "Settle trial saw no response"),
            }
        }
        ctx.turn_off_quietly(light).await;

        let total: Duration = trials.iter().sum();
        let average = total / trials.len() as u32;
        let settle = average.mul_f64(timing.settle_safety_factor).max(timing.settle_min());

        info!(
            light = %light,
            trials = trials.len(),
            average_ms = average.as_millis() as u64,
            settle_ms = settle.as_millis() as u64,
            "Settle time measured"
        );
        return Ok(SettleEstimate {
            settle,
            degraded: false,
            reference_light: Some(light.clone()),
            trials,
        });
    }

    warn!(
        "No light produced a measurable response, using default settle time {:?}",
        timing.settle_default()
    );
    Ok(SettleEstimate {
        settle: timing.settle_default(),
        degraded: true,
        reference_light: None,
        trials: Vec::new(),
    })
}

/// Time from switching a light on until two consecutive readings agree
///
/// `None` when the reading never departs from baseline or never stabilises
/// within the maximum wait. The light is left on after a response.
async fn measure_response(ctx: &ProbeContext, light: &str) -> Result<Option<Duration>> {
    let timing = &ctx.settings().timing;
    let min_change = ctx.settings().probe.min_detectable_lux;

    let baseline = ctx.read_lux().await?;
    if !ctx.turn_on_quietly(light).await {
        return Ok(None);
    }

    let start = Instant::now();
    let mut previous: Option<f64> = None;
    loop {
        ctx.pause(timing.settle_poll()).await?;
        let elapsed = start.elapsed();

        match ctx.sample_lux().await {
            Some(lux) if (lux - baseline).abs() >= min_change => {
                if let Some(prev) = previous {
                    let scale = lux.abs().max(prev.abs()).max(1.0);
                    if (lux - prev).abs() <= timing.settle_stability_ratio * scale {
                        debug!(light = %light, elapsed_ms = elapsed.as_millis() as u64, lux, "Reading stable");
                        return Ok(Some(elapsed));
                    }
                }
                previous = Some(lux);
            }
            Some(_) => previous = None,
            None => {}
        }

        if elapsed >= timing.settle_max_wait() {
            ctx.turn_off_quietly(light).await;
            return Ok(None);
        }
    }
}

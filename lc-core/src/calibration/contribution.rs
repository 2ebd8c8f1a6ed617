//! Individual contribution probe
//!
//! Lights are measured strictly one at a time in session order. Per-light
//! failures are recorded as exclusions and never abort the batch; only
//! cancellation does. The light under test is always switched off again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::calibration::context::ProbeContext;
use crate::data::{ExclusionReason, LightContribution, Validation};
use crate::error::Result;

/// Result of the individual probe phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionBatch {
    /// Measured lights, including ones below the threshold
    pub contributions: BTreeMap<String, LightContribution>,
    /// Every light left out of the model and why
    pub excluded: BTreeMap<String, ExclusionReason>,
    /// Lights skipped because the session ceiling was reached
    pub untested: Vec<String>,
}

impl ContributionBatch {
    /// Usable lights in session order
    pub fn surviving(&self, order: &[String]) -> Vec<String> {
        order
            .iter()
            .filter(|id| self.contributions.get(*id).is_some_and(|c| c.is_usable()))
            .cloned()
            .collect()
    }
}

/// Measure each light's contribution above the floor
pub async fn measure_contributions(
    ctx: &mut ProbeContext,
    lights: &[String],
    base_lux: f64,
    settle: Duration,
) -> Result<ContributionBatch> {
    let mut batch = ContributionBatch::default();

    for (index, light) in lights.iter().enumerate() {
        ctx.check_cancelled()?;
        if ctx.ceiling_reached() {
            let remaining = &lights[index..];
            warn!(
                untested = remaining.len(),
                elapsed_s = ctx.elapsed().as_secs(),
                "Session duration ceiling reached, stopping individual probes"
            );
            for light in remaining {
                batch.excluded.insert(light.clone(), ExclusionReason::Untested);
            }
            batch.untested = remaining.to_vec();
            break;
        }

        for other in lights.iter().filter(|other| *other != light) {
            ctx.turn_off_quietly(other).await;
        }

        let floor = if ctx.settings().probe.remeasure_floor {
            ctx.pause(settle).await?;
            match ctx.read_lux().await {
                Ok(lux) => lux,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(light = %light, "Floor re-measurement failed, using {:.1} lux: {}", base_lux, e);
                    base_lux
                }
            }
        } else {
            base_lux
        };

        let outcome = probe_light(ctx, light, floor, settle).await;
        ctx.turn_off_quietly(light).await;

        match outcome? {
            Ok(contribution) => {
                if let Some(reason) = contribution.excluded_reason {
                    batch.excluded.insert(light.clone(), reason);
                }
                batch.contributions.insert(light.clone(), contribution);
            }
            Err(reason) => {
                batch.excluded.insert(light.clone(), reason);
            }
        }
    }

    info!(
        measured = batch.contributions.len(),
        excluded = batch.excluded.len(),
        surviving = batch.surviving(lights).len(),
        "Individual contribution probes finished"
    );
    Ok(batch)
}

/// Measure one light; the inner error is the exclusion reason
async fn probe_light(
    ctx: &mut ProbeContext,
    light: &str,
    floor: f64,
    settle: Duration,
) -> Result<std::result::Result<LightContribution, ExclusionReason>> {
    if !switch_on_confirmed(ctx, light).await? {
        warn!(light = %light, "Light did not confirm on, excluding");
        return Ok(Err(ExclusionReason::DidNotTurnOn));
    }

    let Some(with_light) = settled_reading(ctx, light, settle).await? else {
        warn!(light = %light, "No stable reading, excluding");
        return Ok(Err(ExclusionReason::UnstableReading));
    };

    let raw = with_light - floor;
    if raw < 0.0 {
        debug!(light = %light, raw, "Negative contribution clamped to zero");
    }
    let contribution = raw.max(0.0);
    let threshold = ctx.settings().probe.contribution_threshold_lux;
    let excluded_reason = (contribution < threshold).then_some(ExclusionReason::BelowThreshold);

    if excluded_reason.is_some() {
        info!(light = %light, contribution, threshold, "Light contribution below threshold");
    } else {
        info!(light = %light, contribution, floor, with_light, "Measured light contribution");
    }

    Ok(Ok(LightContribution {
        max_contribution: contribution,
        base_lux: floor,
        with_light_lux: with_light,
        validated: Validation::Unvalidated,
        excluded_reason,
    }))
}

/// Wait the settle time and sample; every retry waits the full settle again
async fn settled_reading(ctx: &ProbeContext, light: &str, settle: Duration) -> Result<Option<f64>> {
    let attempts = ctx.settings().probe.sensor_read_attempts.max(1);
    for attempt in 1..=attempts {
        ctx.pause(ctx.wait_for(light, settle)).await?;
        if let Some(lux) = ctx.sample_lux().await {
            return Ok(Some(lux));
        }
        debug!(light = %light, attempt, "Invalid reading with light on");
    }
    Ok(None)
}

/// Command full on and confirm; one extended retry for slow lights
async fn switch_on_confirmed(ctx: &mut ProbeContext, light: &str) -> Result<bool> {
    let command = ctx.full_on_command(light);
    if let Err(e) = ctx.command(light, &command).await {
        debug!(light = %light, "On command rejected: {}", e);
    }
    if ctx.confirm_power(light, true, ctx.confirm_timeout(light)).await? {
        return Ok(true);
    }

    ctx.mark_slow(light);
    if let Err(e) = ctx.command(light, &command).await {
        debug!(light = %light, "On command rejected on retry: {}", e);
    }
    ctx.confirm_power(light, true, ctx.confirm_timeout(light)).await
}

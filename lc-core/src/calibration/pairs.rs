//! Pair additivity validation
//!
//! Samples adjacent pairs of surviving lights and checks that turning both
//! on adds roughly the sum of their individual contributions. The verdict
//! only annotates lights; it never excludes them from the model.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::calibration::context::ProbeContext;
use crate::data::{LightContribution, PairResult, PairVerdict, Validation};
use crate::error::Result;

/// Adjacent pairs in session order, bounded by `max_pairs`
pub fn select_pairs(survivors: &[String], max_pairs: usize) -> Vec<[String; 2]> {
    survivors
        .windows(2)
        .take(max_pairs)
        .map(|w| [w[0].clone(), w[1].clone()])
        .collect()
}

/// Relative error of the measured pair contribution, in percent
pub fn additivity_error_percent(floor: f64, combined: f64, expected: f64) -> Option<f64> {
    if expected <= 0.0 {
        return None;
    }
    let actual = combined - floor;
    Some((actual - expected).abs() / expected * 100.0)
}

/// Run the sampled pair checks and annotate `contributions`
///
/// `lights` is the full candidate set, kept dark during each pair.
/// Returns an empty list when fewer than two lights survived.
pub async fn validate_pairs(
    ctx: &ProbeContext,
    lights: &[String],
    survivors: &[String],
    contributions: &mut BTreeMap<String, LightContribution>,
    settle: Duration,
) -> Result<Vec<PairResult>> {
    if survivors.len() < 2 {
        info!(surviving = survivors.len(), "Fewer than two surviving lights, skipping pair validation");
        return Ok(Vec::new());
    }

    let tolerance = ctx.settings().pairs.tolerance_percent;
    let mut results = Vec::new();
    for pair in select_pairs(survivors, ctx.settings().pairs.max_pairs) {
        ctx.check_cancelled()?;
        let expected: f64 = pair
            .iter()
            .filter_map(|id| contributions.get(id))
            .map(|c| c.max_contribution)
            .sum();
        let outcome = measure_pair(ctx, lights, &pair, settle).await;
        for light in &pair {
            ctx.turn_off_quietly(light).await;
        }

        let result = match outcome? {
            Some((floor, combined)) => {
                let error_percent = additivity_error_percent(floor, combined, expected);
                let verdict = match error_percent {
                    Some(error) if error <= tolerance => PairVerdict::Linear,
                    Some(_) => PairVerdict::Nonlinear,
                    None => PairVerdict::Inconclusive,
                };
                PairResult {
                    lights: pair,
                    floor_lux: Some(floor),
                    combined_lux: Some(combined),
                    expected_contribution: expected,
                    error_percent,
                    verdict,
                }
            }
            None => PairResult {
                lights: pair,
                floor_lux: None,
                combined_lux: None,
                expected_contribution: expected,
                error_percent: None,
                verdict: PairVerdict::Inconclusive,
            },
        };

        match result.verdict {
            PairVerdict::Linear => info!(
                a = %result.lights[0],
                b = %result.lights[1],
                error_percent = result.error_percent.unwrap_or_default(),
                "Pair is additive"
            ),
            PairVerdict::Nonlinear => warn!(
                a = %result.lights[0],
                b = %result.lights[1],
                error_percent = result.error_percent.unwrap_or_default(),
                tolerance,
                "Pair is not additive"
            ),
            PairVerdict::Inconclusive => warn!(
                a = %result.lights[0],
                b = %result.lights[1],
                "Pair check inconclusive"
            ),
        }
        results.push(result);
    }

    apply_verdicts(contributions, &results);
    Ok(results)
}

/// Floor and combined reading for one pair; `None` when inconclusive
async fn measure_pair(
    ctx: &ProbeContext,
    lights: &[String],
    pair: &[String; 2],
    settle: Duration,
) -> Result<Option<(f64, f64)>> {
    for light in lights {
        ctx.turn_off_quietly(light).await;
    }
    ctx.pause(settle).await?;
    let floor = match ctx.read_lux().await {
        Ok(lux) => lux,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(_) => return Ok(None),
    };

    let mut wait = settle;
    for light in pair {
        ctx.turn_on_quietly(light).await;
        wait = wait.max(ctx.wait_for(light, settle));
    }
    for light in pair {
        if !ctx.confirm_power(light, true, ctx.confirm_timeout(light)).await? {
            warn!(light = %light, "Light did not confirm on during pair check");
            return Ok(None);
        }
    }
    ctx.pause(wait).await?;

    match ctx.read_lux().await {
        Ok(combined) => Ok(Some((floor, combined))),
        Err(e) if e.is_cancelled() => Err(e),
        Err(_) => Ok(None),
    }
}

/// Rejected wins over validated; lights in no conclusive pair stay unvalidated
fn apply_verdicts(contributions: &mut BTreeMap<String, LightContribution>, results: &[PairResult]) {
    for result in results {
        let validation = match result.verdict {
            PairVerdict::Linear => Validation::ValidatedLinear,
            PairVerdict::Nonlinear => Validation::RejectedNonlinear,
            PairVerdict::Inconclusive => continue,
        };
        for light in &result.lights {
            if let Some(contribution) = contributions.get_mut(light) {
                if contribution.validated != Validation::RejectedNonlinear {
                    contribution.validated = validation;
                }
            }
        }
    }
}

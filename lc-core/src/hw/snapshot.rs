//! Pre-calibration state capture and restore
//!
//! Capture never fails: a light that cannot be read is recorded as
//! unavailable. Restore visits every captured light, polls the light's
//! reported power state after each command, and retries with a doubling
//! backoff between attempts.
//! Restore takes no cancellation token.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data::{LightCommand, LightState};
use crate::hw::gateway::DeviceGateway;
use crate::settings::RestoreSettings;

/// Captured light states keyed by light id
pub type Snapshot = BTreeMap<String, LightState>;

/// What happened to one light during restore
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RestoreOutcome {
    Restored,
    SkippedUnavailable,
    Failed { reason: String },
}

impl RestoreOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Record the current state of every light
pub async fn capture(gateway: &dyn DeviceGateway, lights: &[String]) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for light in lights {
        let state = match gateway.read_light_state(light).await {
            Ok(state) => state,
            Err(e) => {
                warn!(light = %light, "Could not read light state, recording as unavailable: {}", e);
                LightState::unavailable()
            }
        };
        debug!(light = %light, on = state.on, brightness = ?state.brightness, "Captured light state");
        snapshot.insert(light.clone(), state);
    }
    snapshot
}

/// Bring every light back to its captured state
pub async fn restore(
    gateway: &dyn DeviceGateway,
    snapshot: &Snapshot,
    settings: &RestoreSettings,
) -> BTreeMap<String, RestoreOutcome> {
    info!(lights = snapshot.len(), "Restoring original light states");
    let mut outcomes = BTreeMap::new();
    for (light, state) in snapshot {
        let outcome = if state.available {
            restore_one(gateway, light, state, settings).await
        } else {
            RestoreOutcome::SkippedUnavailable
        };
        if let RestoreOutcome::Failed { reason } = &outcome {
            warn!(light = %light, "Failed to restore light: {}", reason);
        }
        outcomes.insert(light.clone(), outcome);
    }
    outcomes
}

async fn restore_one(
    gateway: &dyn DeviceGateway,
    light: &str,
    state: &LightState,
    settings: &RestoreSettings,
) -> RestoreOutcome {
    let command = LightCommand::restoring(state);
    let attempts = settings.attempts.max(1);
    let mut backoff = settings.backoff();
    let mut last_reason = String::new();

    for attempt in 1..=attempts {
        match apply_and_confirm(gateway, light, &command, settings).await {
            Ok(()) => {
                debug!(light = %light, attempt, "Light restored");
                return RestoreOutcome::Restored;
            }
            Err(reason) => {
                debug!(light = %light, attempt, "Restore attempt failed: {}", reason);
                last_reason = reason;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    RestoreOutcome::Failed {
        reason: format!("{} after {} attempts", last_reason, attempts),
    }
}

/// Send the command, then poll until the light reports the wanted power
/// state or the confirmation window closes
async fn apply_and_confirm(
    gateway: &dyn DeviceGateway,
    light: &str,
    command: &LightCommand,
    settings: &RestoreSettings,
) -> std::result::Result<(), String> {
    gateway
        .set_light_state(light, command)
        .await
        .map_err(|e| format!("command rejected: {}", e))?;

    let want_on = command.is_on();
    let deadline = Instant::now() + settings.confirm_timeout();
    let poll = settings.confirm_poll();
    loop {
        let problem = match gateway.read_light_state(light).await {
            Ok(observed) if observed.on == want_on => return Ok(()),
            Ok(observed) => format!(
                "light reports {} after restore",
                if observed.on { "on" } else { "off" }
            ),
            Err(e) => format!("state read failed: {}", e),
        };
        let now = Instant::now();
        if now >= deadline {
            return Err(problem);
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

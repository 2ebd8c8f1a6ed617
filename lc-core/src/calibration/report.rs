//! Session phases and the terminal report published to observers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::data::{LightOutcome, PairResult};
use crate::hw::RestoreOutcome;

/// Orchestrator states, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    CapturingInitial,
    ValidatingSetup,
    CalibratingTiming,
    TestingMinMax,
    TestingIndividual,
    ValidatingPairs,
    SavingModel,
    RestoringInitial,
    Completed,
    CompletedWithErrors,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapturingInitial => "capturing-initial",
            Self::ValidatingSetup => "validating-setup",
            Self::CalibratingTiming => "calibrating-timing",
            Self::TestingMinMax => "testing-min-max",
            Self::TestingIndividual => "testing-individual",
            Self::ValidatingPairs => "validating-pairs",
            Self::SavingModel => "saving-model",
            Self::RestoringInitial => "restoring-initial",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed-with-errors",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithErrors)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Ok,
    Skipped,
    Failed,
}

/// One line per phase that ran (or was skipped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// Terminal state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionOutcome {
    Completed,
    CompletedWithErrors,
}

/// Hard failure that sent the session straight to restoration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub phase: Phase,
    /// Error class, e.g. `device-unavailable`
    pub class: String,
    pub message: String,
}

/// Everything an observer learns about a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub session_id: Uuid,
    pub room_id: String,
    pub outcome: SessionOutcome,
    pub failure: Option<SessionFailure>,
    pub phases: Vec<PhaseSummary>,
    pub lights: BTreeMap<String, LightOutcome>,
    pub pair_results: Vec<PairResult>,
    pub restoration: BTreeMap<String, RestoreOutcome>,
    pub settle_time_seconds: Option<f64>,
    pub degraded_timing: bool,
    pub min_lux: Option<f64>,
    pub max_lux: Option<f64>,
    pub model_saved: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CalibrationReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SessionOutcome::Completed
    }

    pub fn included_lights(&self) -> usize {
        self.lights
            .values()
            .filter(|o| matches!(o, LightOutcome::Included { .. }))
            .count()
    }

    pub fn restore_failures(&self) -> Vec<&str> {
        self.restoration
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(light, _)| light.as_str())
            .collect()
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseSummary> {
        self.phases.iter().find(|s| s.phase == phase)
    }

    /// Single human-readable line for notifications
    pub fn summary(&self) -> String {
        let duration = (self.finished_at - self.started_at).num_seconds();
        match (&self.outcome, &self.failure) {
            (SessionOutcome::Completed, _) => format!(
                "Calibration of {} complete: {}/{} lights included, {:.0}-{:.0} lux, settle {:.1}s ({}s)",
                self.room_id,
                self.included_lights(),
                self.lights.len(),
                self.min_lux.unwrap_or_default(),
                self.max_lux.unwrap_or_default(),
                self.settle_time_seconds.unwrap_or_default(),
                duration
            ),
            (SessionOutcome::CompletedWithErrors, Some(failure)) => format!(
                "Calibration of {} failed during {}: {} ({})",
                self.room_id, failure.phase, failure.message, failure.class
            ),
            (SessionOutcome::CompletedWithErrors, None) => format!(
                "Calibration of {} finished with errors: {} light(s) not restored",
                self.room_id,
                self.restore_failures().len()
            ),
        }
    }
}

//! Core data types for Luxcal
//!
//! Light handles and states as reported by the device gateway, sensor
//! readings, and the calibration model produced by a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::probe;

/// Attributes a light can be commanded with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "default_true")]
    pub power: bool,
    #[serde(default = "default_true")]
    pub brightness: bool,
    #[serde(default)]
    pub color_temp: bool,
    #[serde(default)]
    pub rgb: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            power: true,
            brightness: true,
            color_temp: false,
            rgb: false,
        }
    }
}

/// Identifier of a controllable light plus what it supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightHandle {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// Color representation of a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ColorState {
    #[default]
    None,
    Rgb {
        r: u8,
        g: u8,
        b: u8,
    },
    ColorTemp {
        kelvin: u16,
    },
}

/// Snapshot of one light at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub on: bool,
    /// 0-255, `None` when brightness is unsupported
    pub brightness: Option<u8>,
    #[serde(default)]
    pub color: ColorState,
    pub available: bool,
}

impl LightState {
    /// State recorded for a light that could not be reached
    pub fn unavailable() -> Self {
        Self {
            on: false,
            brightness: None,
            color: ColorState::None,
            available: false,
        }
    }

    pub fn off() -> Self {
        Self {
            on: false,
            brightness: None,
            color: ColorState::None,
            available: true,
        }
    }

    /// Output as a fraction of full brightness (0.0 when off)
    pub fn output_fraction(&self) -> f64 {
        if !self.on {
            return 0.0;
        }
        match self.brightness {
            Some(level) => level as f64 / probe::FULL_BRIGHTNESS as f64,
            None => 1.0,
        }
    }
}

/// Desired state sent to the device gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "power", rename_all = "kebab-case")]
pub enum LightCommand {
    Off,
    On {
        brightness: Option<u8>,
        #[serde(default)]
        color: ColorState,
    },
}

impl LightCommand {
    /// Full-brightness neutral white, limited to what the light supports
    pub fn full_white(handle: Option<&LightHandle>, kelvin: u16) -> Self {
        let caps = handle.map(|h| h.capabilities).unwrap_or_default();
        let brightness = caps.brightness.then_some(probe::FULL_BRIGHTNESS);
        let color = if caps.color_temp {
            ColorState::ColorTemp { kelvin }
        } else if caps.rgb {
            ColorState::Rgb { r: 255, g: 255, b: 255 }
        } else {
            ColorState::None
        };
        Self::On { brightness, color }
    }

    /// Command that brings a light back to a captured state
    ///
    /// An `on` state with brightness 0 is treated as off.
    pub fn restoring(state: &LightState) -> Self {
        if !state.on || state.brightness == Some(0) {
            return Self::Off;
        }
        Self::On {
            brightness: state.brightness,
            color: state.color,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Self::On { .. })
    }
}

/// A single sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LuxReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
}

impl LuxReading {
    /// Build a reading, marking non-finite or out-of-range values invalid
    pub fn new(value: f64) -> Self {
        let valid = value.is_finite() && (0.0..=probe::MAX_VALID_LUX).contains(&value);
        Self {
            value,
            timestamp: Utc::now(),
            valid,
        }
    }

    /// Reading for a sensor that reported itself unavailable
    pub fn invalid() -> Self {
        Self {
            value: f64::NAN,
            timestamp: Utc::now(),
            valid: false,
        }
    }

    pub fn lux(&self) -> Option<f64> {
        self.valid.then_some(self.value)
    }
}

/// Additivity verdict attached to a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Validation {
    #[default]
    Unvalidated,
    ValidatedLinear,
    RejectedNonlinear,
}

/// Why a light was left out of the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    DidNotTurnOn,
    UnstableReading,
    BelowThreshold,
    Unavailable,
    Untested,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DidNotTurnOn => "did-not-turn-on",
            Self::UnstableReading => "unstable-reading",
            Self::BelowThreshold => "below-threshold",
            Self::Unavailable => "unavailable",
            Self::Untested => "untested",
        }
    }
}

/// Measured contribution of one light
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightContribution {
    /// Lux added at full brightness above the floor
    pub max_contribution: f64,
    /// Floor measured alongside this light
    pub base_lux: f64,
    /// Raw reading with the light on
    pub with_light_lux: f64,
    #[serde(default)]
    pub validated: Validation,
    #[serde(default)]
    pub excluded_reason: Option<ExclusionReason>,
}

impl LightContribution {
    /// Whether the estimation engine may use this entry
    pub fn is_usable(&self) -> bool {
        self.excluded_reason.is_none()
    }
}

/// Outcome of a single pair additivity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairVerdict {
    Linear,
    Nonlinear,
    Inconclusive,
}

/// Result of testing two lights together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairResult {
    pub lights: [String; 2],
    pub floor_lux: Option<f64>,
    pub combined_lux: Option<f64>,
    /// Sum of the two individual contributions
    pub expected_contribution: f64,
    pub error_percent: Option<f64>,
    pub verdict: PairVerdict,
}

/// Per-light outcome surfaced in session reports
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum LightOutcome {
    Included { contribution: f64, validated: Validation },
    Excluded { reason: ExclusionReason },
}

/// Learned lux model for one room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub room_id: String,
    pub min_lux: f64,
    pub max_lux: f64,
    pub settle_time_seconds: f64,
    pub contributions: BTreeMap<String, LightContribution>,
    #[serde(default)]
    pub excluded: BTreeMap<String, ExclusionReason>,
    #[serde(default)]
    pub pair_results: Vec<PairResult>,
    #[serde(default)]
    pub degraded_timing: bool,
    pub created_at: DateTime<Utc>,
}

impl CalibrationModel {
    /// A model is usable only with a positive lux range
    pub fn is_usable(&self) -> bool {
        self.max_lux > self.min_lux
    }

    /// Number of lights the estimation engine will use
    pub fn contributing_light_count(&self) -> usize {
        self.contributions.values().filter(|c| c.is_usable()).count()
    }

    /// Sum of usable contributions at full brightness
    pub fn total_contribution_lux(&self) -> f64 {
        self.contributions
            .values()
            .filter(|c| c.is_usable())
            .map(|c| c.max_contribution)
            .sum()
    }

    /// Clamp every contribution into `0..=max_lux - min_lux`
    ///
    /// Returns the ids of lights whose value changed.
    pub fn clamp_contributions(&mut self) -> Vec<String> {
        let ceiling = (self.max_lux - self.min_lux).max(0.0);
        let mut clamped = Vec::new();
        for (id, contribution) in self.contributions.iter_mut() {
            let bounded = contribution.max_contribution.clamp(0.0, ceiling);
            if bounded != contribution.max_contribution {
                contribution.max_contribution = bounded;
                clamped.push(id.clone());
            }
        }
        clamped
    }

    pub fn outcome_for(&self, light_id: &str) -> Option<LightOutcome> {
        if let Some(contribution) = self.contributions.get(light_id) {
            return Some(match contribution.excluded_reason {
                Some(reason) => LightOutcome::Excluded { reason },
                None => LightOutcome::Included {
                    contribution: contribution.max_contribution,
                    validated: contribution.validated,
                },
            });
        }
        self.excluded
            .get(light_id)
            .map(|reason| LightOutcome::Excluded { reason: *reason })
    }
}

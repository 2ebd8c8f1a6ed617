//! Calibration Settings
//!
//! Persistent settings stored as JSON in ~/.config/luxcal/settings.json.
//! Every field has a default taken from `constants`, so partial files are fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::constants::{self, estimation, pairs, probe, restore, timing};
use crate::error::{LuxcalError, Result};

/// All tunables for a calibration session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CalibrationSettings {
    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub pairs: PairSettings,

    #[serde(default)]
    pub restore: RestoreSettings,

    #[serde(default)]
    pub estimation: EstimationSettings,
}

/// Settle estimation, confirmation and session limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingSettings {
    #[serde(default = "default_settle_trials")]
    pub settle_trials: u32,

    #[serde(default = "default_settle_poll_ms")]
    pub settle_poll_ms: u64,

    #[serde(default = "default_settle_max_wait_ms")]
    pub settle_max_wait_ms: u64,

    #[serde(default = "default_settle_min_ms")]
    pub settle_min_ms: u64,

    #[serde(default = "default_settle_default_ms")]
    pub settle_default_ms: u64,

    /// Multiplier applied to measured response time
    #[serde(default = "default_settle_safety_factor")]
    pub settle_safety_factor: f64,

    /// Relative difference under which two readings count as stable
    #[serde(default = "default_settle_stability_ratio")]
    pub settle_stability_ratio: f64,

    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    #[serde(default = "default_confirm_poll_ms")]
    pub confirm_poll_ms: u64,

    #[serde(default = "default_slow_light_multiplier")]
    pub slow_light_multiplier: f64,

    /// Stop probing new lights once a session has run this long
    #[serde(default = "default_session_ceiling_secs")]
    pub session_ceiling_secs: Option<u64>,
}

fn default_settle_trials() -> u32 {
    timing::SETTLE_TRIALS
}
fn default_settle_poll_ms() -> u64 {
    timing::SETTLE_POLL_MS
}
fn default_settle_max_wait_ms() -> u64 {
    timing::SETTLE_MAX_WAIT_MS
}
fn default_settle_min_ms() -> u64 {
    timing::SETTLE_MIN_MS
}
fn default_settle_default_ms() -> u64 {
    timing::SETTLE_DEFAULT_MS
}
fn default_settle_safety_factor() -> f64 {
    timing::SETTLE_SAFETY_FACTOR
}
fn default_settle_stability_ratio() -> f64 {
    timing::SETTLE_STABILITY_RATIO
}
fn default_confirm_timeout_ms() -> u64 {
    timing::CONFIRM_TIMEOUT_MS
}
fn default_confirm_poll_ms() -> u64 {
    timing::CONFIRM_POLL_MS
}
fn default_slow_light_multiplier() -> f64 {
    timing::SLOW_LIGHT_MULTIPLIER
}
fn default_session_ceiling_secs() -> Option<u64> {
    Some(timing::SESSION_CEILING_SECS)
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_trials: default_settle_trials(),
            settle_poll_ms: default_settle_poll_ms(),
            settle_max_wait_ms: default_settle_max_wait_ms(),
            settle_min_ms: default_settle_min_ms(),
            settle_default_ms: default_settle_default_ms(),
            settle_safety_factor: default_settle_safety_factor(),
            settle_stability_ratio: default_settle_stability_ratio(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            confirm_poll_ms: default_confirm_poll_ms(),
            slow_light_multiplier: default_slow_light_multiplier(),
            session_ceiling_secs: default_session_ceiling_secs(),
        }
    }
}

impl TimingSettings {
    pub fn settle_poll(&self) -> Duration {
        Duration::from_millis(self.settle_poll_ms)
    }

    pub fn settle_max_wait(&self) -> Duration {
        Duration::from_millis(self.settle_max_wait_ms)
    }

    pub fn settle_min(&self) -> Duration {
        Duration::from_millis(self.settle_min_ms)
    }

    pub fn settle_default(&self) -> Duration {
        Duration::from_millis(self.settle_default_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }

    pub fn session_ceiling(&self) -> Option<Duration> {
        self.session_ceiling_secs.map(Duration::from_secs)
    }
}

/// Measurement thresholds and sensor retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    #[serde(default = "default_min_detectable_lux")]
    pub min_detectable_lux: f64,

    #[serde(default = "default_contribution_threshold_lux")]
    pub contribution_threshold_lux: f64,

    #[serde(default = "default_sensor_read_attempts")]
    pub sensor_read_attempts: u32,

    #[serde(default = "default_sensor_retry_backoff_ms")]
    pub sensor_retry_backoff_ms: u64,

    /// Re-read the floor before each individual light
    #[serde(default = "default_remeasure_floor")]
    pub remeasure_floor: bool,

    #[serde(default = "default_white_kelvin")]
    pub white_kelvin: u16,
}

fn default_min_detectable_lux() -> f64 {
    probe::MIN_DETECTABLE_LUX
}
fn default_contribution_threshold_lux() -> f64 {
    probe::CONTRIBUTION_THRESHOLD_LUX
}
fn default_sensor_read_attempts() -> u32 {
    probe::SENSOR_READ_ATTEMPTS
}
fn default_sensor_retry_backoff_ms() -> u64 {
    probe::SENSOR_RETRY_BACKOFF_MS
}
fn default_remeasure_floor() -> bool {
    true
}
fn default_white_kelvin() -> u16 {
    probe::WHITE_KELVIN
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            min_detectable_lux: default_min_detectable_lux(),
            contribution_threshold_lux: default_contribution_threshold_lux(),
            sensor_read_attempts: default_sensor_read_attempts(),
            sensor_retry_backoff_ms: default_sensor_retry_backoff_ms(),
            remeasure_floor: default_remeasure_floor(),
            white_kelvin: default_white_kelvin(),
        }
    }
}

impl ProbeSettings {
    pub fn sensor_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.sensor_retry_backoff_ms)
    }
}

/// Pair additivity sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSettings {
    #[serde(default = "default_tolerance_percent")]
    pub tolerance_percent: f64,

    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
}

fn default_tolerance_percent() -> f64 {
    pairs::TOLERANCE_PERCENT
}
fn default_max_pairs() -> usize {
    pairs::MAX_PAIRS
}

impl Default for PairSettings {
    fn default() -> Self {
        Self {
            tolerance_percent: default_tolerance_percent(),
            max_pairs: default_max_pairs(),
        }
    }
}

/// Restoration retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreSettings {
    #[serde(default = "default_restore_attempts")]
    pub attempts: u32,

    #[serde(default = "default_restore_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-attempt wait for the light to report the restored power state
    #[serde(default = "default_restore_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,

    #[serde(default = "default_restore_confirm_poll_ms")]
    pub confirm_poll_ms: u64,
}

fn default_restore_attempts() -> u32 {
    restore::ATTEMPTS
}
fn default_restore_backoff_ms() -> u64 {
    restore::BACKOFF_MS
}
fn default_restore_confirm_timeout_ms() -> u64 {
    restore::CONFIRM_TIMEOUT_MS
}
fn default_restore_confirm_poll_ms() -> u64 {
    restore::CONFIRM_POLL_MS
}

impl Default for RestoreSettings {
    fn default() -> Self {
        Self {
            attempts: default_restore_attempts(),
            backoff_ms: default_restore_backoff_ms(),
            confirm_timeout_ms: default_restore_confirm_timeout_ms(),
            confirm_poll_ms: default_restore_confirm_poll_ms(),
        }
    }
}

impl RestoreSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn confirm_poll(&self) -> Duration {
        Duration::from_millis(self.confirm_poll_ms)
    }
}

/// Run-time estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    estimation::POLL_INTERVAL_SECS
}

impl Default for EstimationSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl EstimationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl CalibrationSettings {
    /// Reject values that would make a session meaningless or hang
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.settle_trials == 0 {
            return Err(LuxcalError::invalid_config("timing.settle_trials", "must be at least 1"));
        }
        if t.settle_poll_ms == 0 || t.confirm_poll_ms == 0 {
            return Err(LuxcalError::invalid_config("timing", "poll intervals must be positive"));
        }
        if t.settle_max_wait_ms < t.settle_poll_ms {
            return Err(LuxcalError::invalid_config(
                "timing.settle_max_wait_ms",
                "must be at least one poll interval",
            ));
        }
        if t.settle_min_ms > t.settle_default_ms {
            return Err(LuxcalError::invalid_config(
                "timing.settle_min_ms",
                "must not exceed settle_default_ms",
            ));
        }
        if !(t.settle_safety_factor >= 1.0) {
            return Err(LuxcalError::invalid_config("timing.settle_safety_factor", "must be >= 1.0"));
        }
        if !(t.settle_stability_ratio > 0.0 && t.settle_stability_ratio < 1.0) {
            return Err(LuxcalError::invalid_config(
                "timing.settle_stability_ratio",
                "must be between 0 and 1",
            ));
        }
        if !(t.slow_light_multiplier >= 1.0) {
            return Err(LuxcalError::invalid_config("timing.slow_light_multiplier", "must be >= 1.0"));
        }

        let p = &self.probe;
        if !(p.min_detectable_lux > 0.0) {
            return Err(LuxcalError::invalid_config("probe.min_detectable_lux", "must be positive"));
        }
        if !(p.contribution_threshold_lux >= 0.0) {
            return Err(LuxcalError::invalid_config(
                "probe.contribution_threshold_lux",
                "must not be negative",
            ));
        }
        if p.sensor_read_attempts == 0 {
            return Err(LuxcalError::invalid_config("probe.sensor_read_attempts", "must be at least 1"));
        }
        if !(1_000..=12_000).contains(&p.white_kelvin) {
            return Err(LuxcalError::invalid_config("probe.white_kelvin", "must be 1000-12000"));
        }

        if !(self.pairs.tolerance_percent > 0.0) {
            return Err(LuxcalError::invalid_config("pairs.tolerance_percent", "must be positive"));
        }
        if self.restore.attempts == 0 {
            return Err(LuxcalError::invalid_config("restore.attempts", "must be at least 1"));
        }
        if self.restore.confirm_poll_ms == 0 {
            return Err(LuxcalError::invalid_config("restore.confirm_poll_ms", "must be positive"));
        }
        if self.estimation.poll_interval_secs == 0 {
            return Err(LuxcalError::invalid_config(
                "estimation.poll_interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Get the default settings file path
pub fn get_settings_path() -> Result<PathBuf> {
    let dir = constants::paths::user_config_dir()
        .ok_or_else(|| LuxcalError::config("Could not determine config directory"))?;
    Ok(dir.join(constants::paths::SETTINGS_FILE))
}

/// Load and validate settings from a file; a missing file yields defaults
pub fn load_settings_from(path: &Path) -> Result<CalibrationSettings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(CalibrationSettings::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| LuxcalError::FileRead { path: path.to_path_buf(), source: e })?;
    let settings: CalibrationSettings = serde_json::from_str(&content)
        .map_err(|e| LuxcalError::config(format!("Failed to parse settings JSON: {}", e)))?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from the default location
pub fn load_settings() -> Result<CalibrationSettings> {
    load_settings_from(&get_settings_path()?)
}

/// Validate and atomically write settings to a file
pub fn save_settings_to(path: &Path, settings: &CalibrationSettings) -> Result<()> {
    settings.validate()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| LuxcalError::FileWrite { path: parent.to_path_buf(), source: e })?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path)
        .map_err(|e| LuxcalError::FileWrite { path: temp_path.clone(), source: e })?;
    file.write_all(json.as_bytes())
        .map_err(|e| LuxcalError::FileWrite { path: temp_path.clone(), source: e })?;
    file.sync_all()
        .map_err(|e| LuxcalError::FileWrite { path: temp_path.clone(), source: e })?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| LuxcalError::FileWrite { path: path.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CalibrationSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pairs.tolerance_percent, 30.0);
        assert_eq!(settings.pairs.max_pairs, 2);
        assert_eq!(settings.timing.settle_min(), Duration::from_secs(2));
        assert_eq!(settings.timing.settle_default(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "pairs": { "tolerance_percent": 15.0 }, "probe": { "remeasure_floor": false } }"#;
        let settings: CalibrationSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.pairs.tolerance_percent, 15.0);
        assert_eq!(settings.pairs.max_pairs, 2);
        assert!(!settings.probe.remeasure_floor);
        assert_eq!(settings.timing, TimingSettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = CalibrationSettings::default();
        settings.timing.settle_trials = 0;
        assert!(matches!(
            settings.validate(),
            Err(LuxcalError::InvalidConfig { ref field, .. }) if field == "timing.settle_trials"
        ));

        let mut settings = CalibrationSettings::default();
        settings.timing.settle_safety_factor = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = CalibrationSettings::default();
        settings.pairs.tolerance_percent = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = CalibrationSettings::default();
        settings.restore.confirm_poll_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(LuxcalError::InvalidConfig { ref field, .. }) if field == "restore.confirm_poll_ms"
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = CalibrationSettings::default();
        settings.timing.session_ceiling_secs = None;
        settings.restore.attempts = 5;
        save_settings_to(&path, &settings).unwrap();

        assert_eq!(load_settings_from(&path).unwrap(), settings);
    }

    #[test]
    #[serial]
    fn test_settings_path_honors_home_override() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(constants::paths::HOME_ENV, dir.path());
        let path = get_settings_path().unwrap();
        std::env::remove_var(constants::paths::HOME_ENV);

        assert_eq!(path, dir.path().join("settings.json"));
    }

    #[test]
    #[serial]
    fn test_load_settings_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        std::env::set_var(constants::paths::HOME_ENV, dir.path());
        let settings = load_settings();
        std::env::remove_var(constants::paths::HOME_ENV);

        assert_eq!(settings.unwrap(), CalibrationSettings::default());
    }
}

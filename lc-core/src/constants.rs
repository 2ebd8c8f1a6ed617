//! Constants and configuration values for Luxcal
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! Settings defaults point here; never hard-code a threshold elsewhere.

use std::time::Duration;

/// Filesystem locations
pub mod paths {
    use std::path::PathBuf;

    /// Application directory name under the user config directory
    pub const APP_DIR: &str = "luxcal";

    /// Subdirectory holding one model file per room
    pub const MODELS_DIR: &str = "models";

    /// Settings file name
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Environment variable overriding the config directory
    pub const HOME_ENV: &str = "LUXCAL_HOME";

    /// User configuration directory
    ///
    /// `LUXCAL_HOME` wins when set, then `$XDG_CONFIG_HOME/luxcal`,
    /// then the platform config directory.
    pub fn user_config_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.is_empty() {
                return Some(PathBuf::from(home));
            }
        }
        dirs::config_dir().map(|p| p.join(APP_DIR))
    }

    /// Directory where calibration models are persisted
    pub fn models_dir() -> PathBuf {
        user_config_dir()
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
            .join(MODELS_DIR)
    }
}

/// Timing for settle estimation, confirmation polling and session limits
pub mod timing {
    /// Number of settle measurements averaged together
    pub const SETTLE_TRIALS: u32 = 3;

    /// Sensor polling interval while measuring settle time
    pub const SETTLE_POLL_MS: u64 = 250;

    /// Give up on a settle trial after this long
    pub const SETTLE_MAX_WAIT_MS: u64 = 5_000;

    /// Settle time never drops below this
    pub const SETTLE_MIN_MS: u64 = 2_000;

    /// Used when no light responds during settle estimation
    pub const SETTLE_DEFAULT_MS: u64 = 5_000;

    /// Safety factor applied to the measured response time
    pub const SETTLE_SAFETY_FACTOR: f64 = 1.25;

    /// Two readings within this fraction of each other count as stable
    pub const SETTLE_STABILITY_RATIO: f64 = 0.02;

    /// Bounded wait for a light to report the commanded power state
    pub const CONFIRM_TIMEOUT_MS: u64 = 3_000;

    /// Light state polling interval during confirmation
    pub const CONFIRM_POLL_MS: u64 = 250;

    /// Waits for lights marked slow are stretched by this factor
    pub const SLOW_LIGHT_MULTIPLIER: f64 = 2.0;

    /// Session duration ceiling for the individual probe batch
    pub const SESSION_CEILING_SECS: u64 = 1_800;

    /// Rough per-light cost used for the up-front duration estimate
    pub const SECONDS_PER_LIGHT_ESTIMATE: u64 = 30;

    /// Fixed overhead added to the duration estimate
    pub const SESSION_OVERHEAD_SECS: u64 = 60;
}

/// Measurement thresholds
pub mod probe {
    /// Smallest lux difference the sensor is trusted to resolve
    pub const MIN_DETECTABLE_LUX: f64 = 10.0;

    /// Lights contributing less than this are marked below-threshold
    pub const CONTRIBUTION_THRESHOLD_LUX: f64 = 10.0;

    /// Sensor read attempts before giving up
    pub const SENSOR_READ_ATTEMPTS: u32 = 3;

    /// Base backoff between sensor read attempts (doubles per attempt)
    pub const SENSOR_RETRY_BACKOFF_MS: u64 = 500;

    /// Full output brightness
    pub const FULL_BRIGHTNESS: u8 = 255;

    /// Neutral white used for every probe
    pub const WHITE_KELVIN: u16 = 4_000;

    /// Readings above this are treated as sensor faults
    pub const MAX_VALID_LUX: f64 = 200_000.0;
}

/// Pair additivity validation
pub mod pairs {
    /// Allowed relative error between measured and expected pair contribution
    pub const TOLERANCE_PERCENT: f64 = 30.0;

    /// Number of adjacent pairs sampled
    pub const MAX_PAIRS: usize = 2;
}

/// Restoration of the pre-calibration state
pub mod restore {
    /// Attempts per light
    pub const ATTEMPTS: u32 = 3;

    /// Base backoff between attempts (doubles per attempt)
    pub const BACKOFF_MS: u64 = 500;

    /// Bounded wait for a restored light to report its power state
    pub const CONFIRM_TIMEOUT_MS: u64 = super::timing::CONFIRM_TIMEOUT_MS;

    /// Light state polling interval while confirming a restore
    pub const CONFIRM_POLL_MS: u64 = super::timing::CONFIRM_POLL_MS;
}

/// Run-time estimation
pub mod estimation {
    /// Periodic re-evaluation interval
    pub const POLL_INTERVAL_SECS: u64 = 10;
}

/// Persistence format
pub mod persistence {
    /// Current model envelope version
    pub const MODEL_FORMAT_VERSION: u32 = 1;

    /// Refuse to load model files larger than this
    pub const MAX_MODEL_FILE_SIZE: u64 = 1024 * 1024;
}

/// Input limits
pub mod limits {
    /// Maximum length of a room, light or sensor identifier
    pub const MAX_ID_LENGTH: usize = 128;

    /// Maximum number of lights in one session
    pub const MAX_LIGHTS: usize = 64;
}

/// Estimated wall-clock duration of a calibration run
pub fn estimated_session_duration(light_count: usize) -> Duration {
    Duration::from_secs(
        light_count as u64 * timing::SECONDS_PER_LIGHT_ESTIMATE + timing::SESSION_OVERHEAD_SECS,
    )
}

//! Unified error handling for Luxcal
//!
//! This crate provides a single error type used across all Luxcal components.
//! Every variant maps onto one of the calibration error classes via
//! [`LuxcalError::class`], which is what session reports carry.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias using LuxcalError
pub type Result<T> = std::result::Result<T, LuxcalError>;

/// Unified error type for all Luxcal operations
#[derive(thiserror::Error, Debug)]
pub enum LuxcalError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Invalid identifier {value:?}: {reason}")]
    InvalidId {
        value: String,
        reason: String,
    },

    // ============================================================================
    // Device Errors
    // ============================================================================
    #[error("Device {device} unavailable: {reason}")]
    DeviceUnavailable {
        device: String,
        reason: String,
    },

    #[error("Timed out after {waited_ms} ms: {operation}")]
    Timeout {
        operation: String,
        waited_ms: u64,
    },

    #[error("Lux range too small: min {min_lux:.1}, max {max_lux:.1} (need at least {required:.1} lux difference)")]
    RangeViolation {
        min_lux: f64,
        max_lux: f64,
        required: f64,
    },

    #[error("Invalid calibration setup: {0}")]
    InvalidSetup(String),

    #[error("No lights survived individual testing")]
    NoSurvivingLights,

    // ============================================================================
    // Session Errors
    // ============================================================================
    #[error("Calibration already running for room {room}")]
    SessionBusy {
        room: String,
    },

    #[error("No active calibration session {0}")]
    SessionNotFound(String),

    #[error("Calibration cancelled")]
    Cancelled,

    // ============================================================================
    // Persistence Errors
    // ============================================================================
    #[error("Failed to persist model for room {room}: {reason}")]
    PersistenceFailure {
        room: String,
        reason: String,
    },

    #[error("Checksum mismatch in {path}: stored {stored}, computed {computed}")]
    ChecksumMismatch {
        path: PathBuf,
        stored: String,
        computed: String,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

/// Coarse error classes surfaced in calibration reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    DeviceUnavailable,
    Timeout,
    RangeViolation,
    SessionBusy,
    PersistenceFailure,
    InvalidSetup,
    Cancelled,
    Internal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable => "device-unavailable",
            Self::Timeout => "timeout",
            Self::RangeViolation => "range-violation",
            Self::SessionBusy => "session-busy",
            Self::PersistenceFailure => "persistence-failure",
            Self::InvalidSetup => "invalid-setup",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LuxcalError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a device-unavailable error
    pub fn device_unavailable(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, waited_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            waited_ms,
        }
    }

    /// Create a persistence error for a room
    pub fn persistence(room: impl Into<String>, reason: impl ToString) -> Self {
        Self::PersistenceFailure {
            room: room.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Map this error onto the class reported to session observers
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::DeviceUnavailable { .. } => ErrorClass::DeviceUnavailable,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::RangeViolation { .. } => ErrorClass::RangeViolation,
            Self::SessionBusy { .. } => ErrorClass::SessionBusy,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::InvalidSetup(_) | Self::NoSurvivingLights | Self::InvalidId { .. } => {
                ErrorClass::InvalidSetup
            }
            Self::PersistenceFailure { .. }
            | Self::ChecksumMismatch { .. }
            | Self::FileRead { .. }
            | Self::FileWrite { .. }
            | Self::FileTooLarge { .. }
            | Self::Io(_)
            | Self::JsonParse(_) => ErrorClass::PersistenceFailure,
            Self::Config(_) | Self::InvalidConfig { .. } | Self::SessionNotFound(_) | Self::Generic(_) => {
                ErrorClass::Internal
            }
        }
    }
}

// Allow converting from String to LuxcalError
impl From<String> for LuxcalError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to LuxcalError
impl From<&str> for LuxcalError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

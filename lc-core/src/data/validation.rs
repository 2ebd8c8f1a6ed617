//! Input validation for Luxcal
//!
//! Room ids end up in file names, so they are restricted to a safe
//! character set. Light and sensor ids are only checked for length and
//! control characters.

use std::path::Path;

use crate::constants::{limits, persistence};
use crate::error::{LuxcalError, Result};

fn invalid(value: &str, reason: &str) -> LuxcalError {
    LuxcalError::InvalidId {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Validates a room id for use as a model file name
pub fn validate_room_id(room: &str) -> Result<&str> {
    if room.is_empty() {
        return Err(invalid(room, "must not be empty"));
    }
    if room.len() > limits::MAX_ID_LENGTH {
        return Err(invalid(room, "too long"));
    }
    if room.starts_with('.') {
        return Err(invalid(room, "must not start with '.'"));
    }
    if !room
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid(room, "only ASCII letters, digits, '_', '-' and '.' are allowed"));
    }
    Ok(room)
}

/// Validates a light or sensor entity id
pub fn validate_entity_id(id: &str) -> Result<&str> {
    if id.trim().is_empty() {
        return Err(invalid(id, "must not be empty"));
    }
    if id.len() > limits::MAX_ID_LENGTH {
        return Err(invalid(id, "too long"));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(invalid(id, "contains control characters"));
    }
    Ok(id)
}

/// Validates the candidate light list for a session
///
/// Rejects malformed ids, duplicates and lists above the session limit.
/// An empty list passes here; the session's setup phase reports it.
pub fn validate_light_list(lights: &[String]) -> Result<()> {
    if lights.len() > limits::MAX_LIGHTS {
        return Err(LuxcalError::InvalidSetup(format!(
            "{} lights selected, at most {} supported",
            lights.len(),
            limits::MAX_LIGHTS
        )));
    }
    for (index, light) in lights.iter().enumerate() {
        validate_entity_id(light)?;
        if lights[..index].contains(light) {
            return Err(LuxcalError::InvalidSetup(format!("light {} listed twice", light)));
        }
    }
    Ok(())
}

/// Validates that a model file isn't too large to load
pub fn validate_model_file_size(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| LuxcalError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    if metadata.len() > persistence::MAX_MODEL_FILE_SIZE {
        return Err(LuxcalError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size: persistence::MAX_MODEL_FILE_SIZE,
        });
    }
    Ok(())
}

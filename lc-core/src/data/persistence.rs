//! Model persistence
//!
//! One JSON file per room, wrapped in a versioned envelope carrying a
//! SHA-256 checksum of the model body. Writes are atomic so a crash
//! mid-save leaves the previous model authoritative.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::constants::{paths, persistence};
use crate::data::types::CalibrationModel;
use crate::data::validation::{validate_model_file_size, validate_room_id};
use crate::error::{LuxcalError, Result};

/// Storage collaborator for calibration models
pub trait ModelStore: Send + Sync {
    /// Load the model for a room; `None` when no model exists yet
    fn load_model(&self, room: &str) -> Result<Option<CalibrationModel>>;

    /// Replace the model for a room
    fn save_model(&self, room: &str, model: &CalibrationModel) -> Result<()>;
}

/// On-disk envelope
#[derive(Debug, Serialize, Deserialize)]
struct ModelEnvelope {
    version: u32,
    checksum: String,
    model: CalibrationModel,
}

/// Hex SHA-256 of the compact JSON encoding of a model
pub fn model_checksum(model: &CalibrationModel) -> Result<String> {
    let body = serde_json::to_vec(model)?;
    let mut hasher = Sha256::new();
    hasher.update(&body);
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// JSON file store, one file per room
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    dir: PathBuf,
}

impl JsonModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the user's config directory
    pub fn default_location() -> Self {
        Self::new(paths::models_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the model file for a room
    pub fn path_for(&self, room: &str) -> Result<PathBuf> {
        let room = validate_room_id(room)?;
        Ok(self.dir.join(format!("{}.json", room)))
    }

    /// Rooms that currently have a model file
    pub fn list_rooms(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| LuxcalError::FileRead {
            path: self.dir.clone(),
            source: e,
        })?;
        let mut rooms: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .filter(|room| validate_room_id(room).is_ok())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    /// Remove a room's model; returns whether a file existed
    pub fn delete_model(&self, room: &str) -> Result<bool> {
        let path = self.path_for(room)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| LuxcalError::FileWrite { path: path.clone(), source: e })?;
        info!(room = %room, "Deleted calibration model");
        Ok(true)
    }

    fn write_atomic(&self, path: &Path, json: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| LuxcalError::FileWrite {
            path: self.dir.clone(),
            source: e,
        })?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .map_err(|e| LuxcalError::FileWrite { path: temp_path.clone(), source: e })?;
        file.write_all(json.as_bytes())
            .map_err(|e| LuxcalError::FileWrite { path: temp_path.clone(), source: e })?;
        file.sync_all()
            .map_err(|e| LuxcalError::FileWrite { path: temp_path.clone(), source: e })?;
        drop(file);

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            LuxcalError::FileWrite { path: path.to_path_buf(), source: e }
        })
    }
}

impl ModelStore for JsonModelStore {
    fn load_model(&self, room: &str) -> Result<Option<CalibrationModel>> {
        let path = self.path_for(room)?;
        if !path.exists() {
            debug!(room = %room, "No model file at {:?}", path);
            return Ok(None);
        }
        validate_model_file_size(&path)?;

        let contents = fs::read_to_string(&path)
            .map_err(|e| LuxcalError::FileRead { path: path.clone(), source: e })?;
        let envelope: ModelEnvelope = serde_json::from_str(&contents)?;

        if envelope.version > persistence::MODEL_FORMAT_VERSION {
            return Err(LuxcalError::config(format!(
                "model {:?} has format version {}, newest supported is {}",
                path,
                envelope.version,
                persistence::MODEL_FORMAT_VERSION
            )));
        }

        let computed = model_checksum(&envelope.model)?;
        if computed != envelope.checksum {
            warn!(room = %room, "Model checksum mismatch, refusing to load");
            return Err(LuxcalError::ChecksumMismatch {
                path,
                stored: envelope.checksum,
                computed,
            });
        }

        debug!(room = %room, lights = envelope.model.contributions.len(), "Loaded calibration model");
        Ok(Some(envelope.model))
    }

    fn save_model(&self, room: &str, model: &CalibrationModel) -> Result<()> {
        let path = self.path_for(room).map_err(|e| LuxcalError::persistence(room, e))?;
        let envelope = ModelEnvelope {
            version: persistence::MODEL_FORMAT_VERSION,
            checksum: model_checksum(model).map_err(|e| LuxcalError::persistence(room, e))?,
            model: model.clone(),
        };
        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| LuxcalError::persistence(room, e))?;

        self.write_atomic(&path, &json)
            .map_err(|e| LuxcalError::persistence(room, e))?;

        info!(
            room = %room,
            lights = model.contributing_light_count(),
            "Saved calibration model to {:?}",
            path
        );
        Ok(())
    }
}

/// Process-local store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    models: RwLock<HashMap<String, CalibrationModel>>,
    fail_saves: AtomicBool,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail with a persistence error
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}

impl ModelStore for InMemoryModelStore {
    fn load_model(&self, room: &str) -> Result<Option<CalibrationModel>> {
        Ok(self.models.read().get(room).cloned())
    }

    fn save_model(&self, room: &str, model: &CalibrationModel) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(LuxcalError::persistence(room, "store is read-only"));
        }
        self.models.write().insert(room.to_string(), model.clone());
        Ok(())
    }
}

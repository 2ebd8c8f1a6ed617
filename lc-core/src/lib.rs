//! Luxcal Core Library
//!
//! Learns how much light each fixture adds to a room and estimates the
//! room's illuminance from live light states.
//!
//! # Features
//!
//! - **Calibration Sessions**: Snapshot, probe and restore a room's lights
//!   while measuring settle time, lux range and per-light contributions
//! - **Additivity Checks**: Sampled pair checks flag lights whose light does not add up
//! - **Estimation**: Continuous lux estimate from a stored model
//! - **Persistence**: One checksummed JSON model per room, written atomically
//! - **Simulation**: A simulated room for dry runs and tests
//!
//! # Module Structure
//!
//! - `hw/` - Device gateway seam, snapshot and restore
//! - `data/` - Data types, model persistence, validation
//! - `calibration/` - Probe phases, orchestrator, session guard, report
//! - `engine/` - Lux estimation engine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lc_core::{CalibrationSettings, Calibrator, InMemoryModelStore, RoomDescription, SimulatedRoom};
//!
//! # async fn run() -> lc_core::Result<()> {
//! let room = RoomDescription::load(std::path::Path::new("office.json"))?;
//! let lights = room.light_ids();
//! let sensor = room.sensor.clone();
//! let calibrator = Calibrator::new(
//!     Arc::new(SimulatedRoom::new(room)),
//!     Arc::new(InMemoryModelStore::new()),
//!     CalibrationSettings::default(),
//! )?;
//! let report = calibrator.start_calibration("office", &lights, &sensor)?.wait().await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

// Grouped modules
pub mod calibration;
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod error;
pub mod settings;
pub mod sim;

// Re-export primary types from data/
pub use data::{
    CalibrationModel, Capabilities, ColorState, ExclusionReason, LightCommand,
    LightContribution, LightHandle, LightOutcome, LightState, LuxReading, PairResult,
    PairVerdict, Validation,
};

// Re-export persistence from data/
pub use data::{model_checksum, InMemoryModelStore, JsonModelStore, ModelStore};

// Re-export validation functions from data/
pub use data::{validate_entity_id, validate_light_list, validate_room_id};

// Re-export error types
pub use error::{ErrorClass, LuxcalError, Result};

// Re-export calibration types
pub use calibration::{
    CalibrationReport, Calibrator, Phase, PhaseStatus, PhaseSummary, SessionFailure,
    SessionHandle, SessionOutcome,
};

// Re-export engine types
pub use engine::{estimate_lux, EstimationEngine, LuxEstimate};

// Re-export hardware seam
pub use hw::{capture, restore, DeviceGateway, RestoreOutcome, Snapshot};

// Re-export simulation
pub use sim::{Interaction, RoomDescription, SimFaults, SimLight, SimulatedRoom};

// Re-export settings
pub use settings::{
    get_settings_path, load_settings, load_settings_from, save_settings_to,
    CalibrationSettings, EstimationSettings, PairSettings, ProbeSettings, RestoreSettings,
    TimingSettings,
};

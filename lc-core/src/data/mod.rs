//! Data types, persistence, and validation modules

mod persistence;
mod types;
mod validation;

pub use persistence::{model_checksum, InMemoryModelStore, JsonModelStore, ModelStore};
pub use types::{
    CalibrationModel, Capabilities, ColorState, ExclusionReason, LightCommand,
    LightContribution, LightHandle, LightOutcome, LightState, LuxReading, PairResult,
    PairVerdict, Validation,
};
pub use validation::{
    validate_entity_id, validate_light_list, validate_model_file_size, validate_room_id,
};

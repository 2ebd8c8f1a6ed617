//! Estimation engine modules
//!
//! Turns a calibration model and live light states into a lux estimate.

mod estimation;

pub use estimation::{estimate_lux, EstimationEngine, LuxEstimate};

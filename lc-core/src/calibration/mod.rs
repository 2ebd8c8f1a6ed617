//! Calibration session modules
//!
//! Contains the probe phases, the session orchestrator and its report.

pub mod context;
mod contribution;
mod min_max;
mod orchestrator;
mod pairs;
mod report;
mod session;
mod settle;

pub use context::ProbeContext;
pub use contribution::{measure_contributions, ContributionBatch};
pub use min_max::{measure_min_max, MinMaxResult};
pub use orchestrator::Calibrator;
pub use pairs::{additivity_error_percent, select_pairs, validate_pairs};
pub use report::{
    CalibrationReport, Phase, PhaseStatus, PhaseSummary, SessionFailure, SessionOutcome,
};
pub use session::{RoomGuard, RoomRegistry, SessionHandle};
pub use settle::{estimate_settle_time, SettleEstimate};

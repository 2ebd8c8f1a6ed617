//! Error types for lc-core
//!
//! Re-exports the workspace error type from lc-error.

pub use lc_error::{ErrorClass, LuxcalError, Result};

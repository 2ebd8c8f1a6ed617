/*
 * This file is part of Luxcal.
 *
 * Copyright (C) 2025 Luxcal contributors
 *
 * Luxcal is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Luxcal is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Luxcal. If not, see <https://www.gnu.org/licenses/>.
 */

//! Logging setup
//!
//! Structured logs go to stderr so command output on stdout stays clean.

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "LUXCAL_LOG";

/// Resolve the log filter: `LUXCAL_LOG` wins, then the verbosity flag
pub fn log_filter(verbose: bool) -> String {
    match std::env::var(LOG_ENV) {
        Ok(filter) if !filter.trim().is_empty() => filter,
        _ if verbose => "debug".to_string(),
        _ => "info".to_string(),
    }
}

pub fn init_logging(verbose: bool) {
    let log_level = log_filter(verbose);
    // A subscriber may already be installed (tests)
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(&log_level)
        .try_init();
}

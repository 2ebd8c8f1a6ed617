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

//! Luxcal - room light calibration and lux estimation
//!
//! The binary front-end: argument parsing, command handlers and logging.
//! The calibration engine itself lives in `lc-core`.

pub mod cli;
pub mod commands;
pub mod logger;

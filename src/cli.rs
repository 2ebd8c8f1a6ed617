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

//! Command Line Interface
//!
//! Argument definitions for the `luxcal` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "luxcal")]
#[command(version)]
#[command(about = "Luxcal - learn how much light each fixture adds to a room")]
#[command(long_about = "Luxcal - learn how much light each fixture adds to a room

Runs calibration sessions that switch lights one at a time while watching a
lux sensor, stores the learned model per room, and estimates room lux from
light states.

EXAMPLES:
    luxcal calibrate demos/office.json          Calibrate a simulated room
    luxcal calibrate demos/office.json --json   Print the full report as JSON
    luxcal show                                 List rooms with stored models
    luxcal show office                          Show the office model
    luxcal estimate office light.desk light.ceiling=128
    luxcal settings show                        Show calibration settings

ENVIRONMENT VARIABLES:
    LUXCAL_LOG=debug       Log filter (default: info)
    LUXCAL_HOME=<dir>      Override the configuration directory

FILES:
    ~/.config/luxcal/settings.json        Calibration settings
    ~/.config/luxcal/models/<room>.json   One model per room")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding calibration models
    #[arg(long, global = true, value_name = "DIR")]
    pub models_dir: Option<PathBuf>,

    /// Settings file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Enable debug logging (LUXCAL_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a calibration session against a simulated room
    Calibrate(CalibrateArgs),

    /// Estimate room lux from light states using a stored model
    Estimate(EstimateArgs),

    /// Show a stored model, or list rooms when no room is given
    Show {
        /// Room id
        room: Option<String>,
    },

    /// Delete a stored model
    Delete {
        /// Room id
        room: String,
    },

    /// Settings management
    #[command(subcommand, about = "View and reset calibration settings")]
    Settings(SettingsCommands),
}

#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// Room description file (JSON)
    pub room_file: PathBuf,

    /// Calibrate only these lights (default: every light in the room)
    #[arg(long, value_delimiter = ',')]
    pub lights: Vec<String>,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Room id
    pub room: String,

    /// Lights that are on, as `id` (full brightness) or `id=0-255`
    pub on: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Show all current settings as JSON
    Show,
    /// Print the settings file path
    Path,
    /// Write default settings
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

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

//! Command handlers for the `luxcal` binary

use anyhow::{anyhow, bail, Context as _, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use lc_core::constants::{estimated_session_duration, paths};
use lc_core::{
    estimate_lux, get_settings_path, load_settings_from, save_settings_to, validate_entity_id,
    CalibrationModel, CalibrationReport, CalibrationSettings, Calibrator, ColorState,
    JsonModelStore, LightOutcome, LightState, ModelStore, RoomDescription, SimulatedRoom,
};

use crate::cli::{CalibrateArgs, Cli, Commands, EstimateArgs, SettingsCommands};

/// Paths resolved from global flags
#[derive(Debug, Clone)]
pub struct Context {
    pub models_dir: PathBuf,
    pub settings_path: PathBuf,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let models_dir = cli.models_dir.clone().unwrap_or_else(paths::models_dir);
        let settings_path = match &cli.settings {
            Some(path) => path.clone(),
            None => get_settings_path()?,
        };
        Ok(Self { models_dir, settings_path })
    }

    pub fn store(&self) -> JsonModelStore {
        JsonModelStore::new(&self.models_dir)
    }

    pub fn settings(&self) -> Result<CalibrationSettings> {
        load_settings_from(&self.settings_path)
            .with_context(|| format!("Failed to load settings from {}", self.settings_path.display()))
    }
}

pub async fn run_cli(cli: &Cli) -> Result<ExitCode> {
    let ctx = Context::from_cli(cli)?;
    debug!(models_dir = %ctx.models_dir.display(), settings = %ctx.settings_path.display(), "Resolved paths");

    match &cli.command {
        Commands::Calibrate(args) => cmd_calibrate(&ctx, args).await,
        Commands::Estimate(args) => cmd_estimate(&ctx, args).map(|_| ExitCode::SUCCESS),
        Commands::Show { room } => cmd_show(&ctx, room.as_deref()).map(|_| ExitCode::SUCCESS),
        Commands::Delete { room } => cmd_delete(&ctx, room).map(|_| ExitCode::SUCCESS),
        Commands::Settings(sub) => cmd_settings(&ctx, sub).map(|_| ExitCode::SUCCESS),
    }
}

// ============================================================================
// Calibrate
// ============================================================================

async fn cmd_calibrate(ctx: &Context, args: &CalibrateArgs) -> Result<ExitCode> {
    let description = RoomDescription::load(&args.room_file)?;
    let lights = if args.lights.is_empty() {
        description.light_ids()
    } else {
        args.lights.clone()
    };
    let room_id = description.room_id.clone();
    let sensor = description.sensor.clone();

    let calibrator = Calibrator::new(
        Arc::new(SimulatedRoom::new(description)),
        Arc::new(ctx.store()),
        ctx.settings()?,
    )?;

    let handle = calibrator.start_calibration(&room_id, &lights, &sensor)?;
    let id = handle.id();
    eprintln!(
        "Calibrating {} with {} lights (about {} min). Press Ctrl+C to cancel.",
        room_id,
        lights.len(),
        estimated_session_duration(lights.len()).as_secs().div_ceil(60)
    );

    let wait = handle.wait();
    tokio::pin!(wait);
    let report = loop {
        tokio::select! {
            report = &mut wait => break report?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                warn!(session = %id, "Interrupted, cancelling and restoring lights");
                if let Err(e) = calibrator.cancel_calibration(id) {
                    debug!("Cancel request ignored: {}", e);
                }
            }
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_report(report: &CalibrationReport) {
    println!("{}", report.summary());
    println!();
    for phase in &report.phases {
        println!(
            "  {:<20} {:<8} {:>7.1}s  {}",
            phase.phase.as_str(),
            format!("{:?}", phase.status).to_lowercase(),
            phase.elapsed_ms as f64 / 1000.0,
            phase.detail
        );
    }
    if !report.lights.is_empty() {
        println!();
        for (light, outcome) in &report.lights {
            match outcome {
                LightOutcome::Included { contribution, validated } => {
                    println!("  {:<32} {:>8.1} lux  {:?}", light, contribution, validated)
                }
                LightOutcome::Excluded { reason } => {
                    println!("  {:<32} excluded ({})", light, reason.as_str())
                }
            }
        }
    }
    let failed = report.restore_failures();
    if !failed.is_empty() {
        println!();
        println!("Not restored: {}", failed.join(", "));
    }
}

// ============================================================================
// Estimate
// ============================================================================

/// Parse `id` or `id=brightness`
pub fn parse_light_level(spec: &str) -> Result<(String, Option<u8>)> {
    let (id, brightness) = match spec.split_once('=') {
        None => (spec, None),
        Some((id, level)) => {
            let level: u8 = level
                .trim()
                .parse()
                .with_context(|| format!("Invalid brightness '{}' for {}, expected 0-255", level, id))?;
            (id, Some(level))
        }
    };
    validate_entity_id(id)?;
    Ok((id.to_string(), brightness))
}

/// Light states for the lights listed as on; everything else is off
pub fn states_from_specs(specs: &[String]) -> Result<HashMap<String, LightState>> {
    let mut states = HashMap::new();
    for spec in specs {
        let (id, brightness) = parse_light_level(spec)?;
        let state = LightState {
            on: brightness != Some(0),
            brightness,
            color: ColorState::None,
            available: true,
        };
        states.insert(id, state);
    }
    Ok(states)
}

fn cmd_estimate(ctx: &Context, args: &EstimateArgs) -> Result<()> {
    let model = load_model(ctx, &args.room)?;
    let states = states_from_specs(&args.on)?;
    for light in states.keys() {
        if model.outcome_for(light).is_none() {
            warn!(light = %light, room = %args.room, "Light is not part of the calibration model");
        }
    }

    let lux = estimate_lux(&model, &states)
        .ok_or_else(|| anyhow!("Model for {} has no usable lux range", args.room))?;
    info!(room = %args.room, lux, "Estimated");
    println!("{:.1} lux", lux);
    Ok(())
}

// ============================================================================
// Show / Delete
// ============================================================================

fn load_model(ctx: &Context, room: &str) -> Result<CalibrationModel> {
    ctx.store()
        .load_model(room)?
        .ok_or_else(|| anyhow!("No calibration model for room '{}'", room))
}

fn cmd_show(ctx: &Context, room: Option<&str>) -> Result<()> {
    let Some(room) = room else {
        let store = ctx.store();
        let rooms = store.list_rooms()?;
        if rooms.is_empty() {
            println!("No calibration models in {}", store.dir().display());
        }
        for room in rooms {
            println!("{}", room);
        }
        return Ok(());
    };

    let model = load_model(ctx, room)?;
    println!("Room:        {}", model.room_id);
    println!("Calibrated:  {}", model.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Lux range:   {:.1} - {:.1}", model.min_lux, model.max_lux);
    println!(
        "Settle time: {:.1}s{}",
        model.settle_time_seconds,
        if model.degraded_timing { " (default, no light responded)" } else { "" }
    );
    println!(
        "Lights:      {} contributing, {:.1} lux total",
        model.contributing_light_count(),
        model.total_contribution_lux()
    );
    println!();
    for (light, contribution) in &model.contributions {
        match contribution.excluded_reason {
            None => println!(
                "  {:<32} {:>8.1} lux  {:?}",
                light, contribution.max_contribution, contribution.validated
            ),
            Some(reason) => println!("  {:<32} excluded ({})", light, reason.as_str()),
        }
    }
    for (light, reason) in model.excluded.iter().filter(|(l, _)| !model.contributions.contains_key(*l)) {
        println!("  {:<32} excluded ({})", light, reason.as_str());
    }
    Ok(())
}

fn cmd_delete(ctx: &Context, room: &str) -> Result<()> {
    if ctx.store().delete_model(room)? {
        println!("Deleted model for {}", room);
    } else {
        println!("No model stored for {}", room);
    }
    Ok(())
}

// ============================================================================
// Settings
// ============================================================================

fn cmd_settings(ctx: &Context, cmd: &SettingsCommands) -> Result<()> {
    match cmd {
        SettingsCommands::Show => {
            let settings = ctx.settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommands::Path => {
            println!("{}", ctx.settings_path.display());
        }
        SettingsCommands::Reset { force } => {
            if !force {
                eprintln!("This will reset all settings to defaults. Use --force to confirm.");
                return Ok(());
            }
            save_settings_to(&ctx.settings_path, &CalibrationSettings::default())?;
            println!("Settings reset to defaults");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_light_level() {
        assert_eq!(parse_light_level("light.desk").unwrap(), ("light.desk".into(), None));
        assert_eq!(parse_light_level("light.desk=128").unwrap(), ("light.desk".into(), Some(128)));
        assert!(parse_light_level("light.desk=300").is_err());
        assert!(parse_light_level("=12").is_err());
    }

    #[test]
    fn test_zero_brightness_counts_as_off() {
        let states = states_from_specs(&["light.a=0".into(), "light.b".into()]).unwrap();
        assert!(!states["light.a"].on);
        assert!(states["light.b"].on);
        assert_eq!(states["light.b"].brightness, None);
    }
}

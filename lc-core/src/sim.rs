//! Simulated room
//!
//! A deterministic [`DeviceGateway`] driven by a JSON room description.
//! Each light adds a fixed lux amount at full brightness, ramping up
//! linearly after it switches on. Faults can be configured per light so
//! misbehaving hardware can be reproduced without a real room.
//!
//! Time is read from `tokio::time::Instant`, so tests running with a
//! paused clock see ramps and delays advance with the simulated time.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::data::{Capabilities, ColorState, LightCommand, LightHandle, LightState, LuxReading};
use crate::error::{LuxcalError, Result};
use crate::hw::DeviceGateway;

/// Room description as loaded from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDescription {
    pub room_id: String,
    pub sensor: String,
    /// Ambient lux with every light off
    #[serde(default)]
    pub floor_lux: f64,
    /// Time for a light to reach full output after switching on
    #[serde(default = "default_ramp_ms")]
    pub ramp_ms: u64,
    pub lights: Vec<SimLight>,
    /// Extra lux when both lights of a pair are on
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

fn default_ramp_ms() -> u64 {
    500
}

/// One simulated light
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimLight {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Lux added at full brightness
    pub full_lux: f64,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub initial_on: bool,
    #[serde(default)]
    pub initial_brightness: Option<u8>,
    #[serde(default)]
    pub faults: SimFaults,
}

/// Misbehaviour switches for a simulated light
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimFaults {
    /// Accepts on commands but never lights up
    #[serde(default)]
    pub never_turns_on: bool,
    /// Accepts off commands but stays lit
    #[serde(default)]
    pub ignores_off: bool,
    /// Every call fails with `DeviceUnavailable`
    #[serde(default)]
    pub unreachable: bool,
    /// Reported power state lags the real one by this long
    #[serde(default)]
    pub report_delay_ms: u64,
}

/// Non-additive coupling between two lights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub lights: [String; 2],
    pub extra_lux: f64,
}

impl RoomDescription {
    /// Load a room description from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| LuxcalError::FileRead { path: path.to_path_buf(), source: e })?;
        let room: RoomDescription = serde_json::from_str(&contents)?;
        if room.lights.is_empty() {
            return Err(LuxcalError::config(format!("room {} has no lights", room.room_id)));
        }
        Ok(room)
    }

    pub fn light_ids(&self) -> Vec<String> {
        self.lights.iter().map(|l| l.id.clone()).collect()
    }
}

#[derive(Debug)]
struct LightSim {
    spec: SimLight,
    on: bool,
    previous_on: bool,
    brightness: Option<u8>,
    color: ColorState,
    /// `None` until the first switch; the light is in steady state
    switched_at: Option<Instant>,
}

impl LightSim {
    fn reported_on(&self, now: Instant) -> bool {
        let delay = Duration::from_millis(self.spec.faults.report_delay_ms);
        let Some(switched_at) = self.switched_at else {
            return self.on;
        };
        if now.duration_since(switched_at) < delay {
            self.previous_on
        } else {
            self.on
        }
    }

    fn ramp(&self, now: Instant, ramp: Duration) -> f64 {
        if !self.on {
            return 0.0;
        }
        match self.switched_at {
            Some(switched_at) if !ramp.is_zero() => {
                (now.duration_since(switched_at).as_secs_f64() / ramp.as_secs_f64()).min(1.0)
            }
            _ => 1.0,
        }
    }

    fn output(&self, now: Instant, ramp: Duration) -> f64 {
        let fraction = match self.brightness {
            Some(level) => level as f64 / 255.0,
            None => 1.0,
        };
        self.spec.full_lux * fraction * self.ramp(now, ramp)
    }

    fn switch(&mut self, on: bool, now: Instant) {
        if self.on != on {
            self.previous_on = self.on;
            self.on = on;
            self.switched_at = Some(now);
        }
    }
}

#[derive(Debug)]
struct RoomState {
    lights: HashMap<String, LightSim>,
    sensor_available: bool,
    invalid_reads: u32,
}

/// Simulated room implementing [`DeviceGateway`]
#[derive(Debug)]
pub struct SimulatedRoom {
    description: RoomDescription,
    state: Mutex<RoomState>,
    commands: AtomicUsize,
    reads: AtomicUsize,
}

impl SimulatedRoom {
    pub fn new(description: RoomDescription) -> Self {
        let lights = description
            .lights
            .iter()
            .map(|spec| {
                let brightness = if spec.capabilities.brightness {
                    Some(spec.initial_brightness.unwrap_or(255))
                } else {
                    None
                };
                let sim = LightSim {
                    spec: spec.clone(),
                    on: spec.initial_on,
                    previous_on: spec.initial_on,
                    brightness,
                    color: ColorState::None,
                    switched_at: None,
                };
                (spec.id.clone(), sim)
            })
            .collect();
        Self {
            description,
            state: Mutex::new(RoomState {
                lights,
                sensor_available: true,
                invalid_reads: 0,
            }),
            commands: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn description(&self) -> &RoomDescription {
        &self.description
    }

    /// Number of `set_light_state` calls received
    pub fn command_count(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    /// Number of light state and sensor reads received
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_sensor_available(&self, available: bool) {
        self.state.lock().sensor_available = available;
    }

    /// Make the next `count` sensor reads return invalid samples
    pub fn inject_invalid_readings(&self, count: u32) {
        self.state.lock().invalid_reads = count;
    }

    pub fn set_faults(&self, light: &str, faults: SimFaults) {
        if let Some(sim) = self.state.lock().lights.get_mut(light) {
            sim.spec.faults = faults;
        }
    }

    /// Change a light outside of any calibration (a user at the switch)
    pub fn set_light_power(&self, light: &str, on: bool, brightness: Option<u8>) {
        let now = Instant::now();
        if let Some(sim) = self.state.lock().lights.get_mut(light) {
            sim.switch(on, now);
            if sim.spec.capabilities.brightness {
                sim.brightness = brightness.or(sim.brightness);
            }
        }
    }

    /// Current true state of a light, ignoring faults
    pub fn light_state(&self, light: &str) -> Option<LightState> {
        let state = self.state.lock();
        state.lights.get(light).map(|sim| LightState {
            on: sim.on,
            brightness: sim.brightness,
            color: sim.color,
            available: !sim.spec.faults.unreachable,
        })
    }

    /// Lux the sensor would report right now
    pub fn current_lux(&self) -> f64 {
        let now = Instant::now();
        let state = self.state.lock();
        self.lux_at(&state, now)
    }

    fn lux_at(&self, state: &RoomState, now: Instant) -> f64 {
        let ramp = Duration::from_millis(self.description.ramp_ms);
        let mut lux = self.description.floor_lux;
        for sim in state.lights.values() {
            lux += sim.output(now, ramp);
        }
        for interaction in &self.description.interactions {
            let [a, b] = &interaction.lights;
            if let (Some(a), Some(b)) = (state.lights.get(a), state.lights.get(b)) {
                lux += interaction.extra_lux * a.ramp(now, ramp).min(b.ramp(now, ramp));
            }
        }
        lux
    }
}

#[async_trait]
impl DeviceGateway for SimulatedRoom {
    async fn set_light_state(&self, light: &str, desired: &LightCommand) -> Result<()> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut state = self.state.lock();
        let sim = state
            .lights
            .get_mut(light)
            .ok_or_else(|| LuxcalError::device_unavailable(light, "unknown light"))?;
        if sim.spec.faults.unreachable {
            return Err(LuxcalError::device_unavailable(light, "not responding"));
        }

        match desired {
            LightCommand::Off => {
                if !sim.spec.faults.ignores_off {
                    sim.switch(false, now);
                }
            }
            LightCommand::On { brightness, color } => {
                if !sim.spec.faults.never_turns_on {
                    sim.switch(true, now);
                    if sim.spec.capabilities.brightness {
                        sim.brightness = brightness.or(Some(255));
                    }
                    sim.color = *color;
                }
            }
        }
        trace!(light = %light, command = ?desired, "Simulated command");
        Ok(())
    }

    async fn read_light_state(&self, light: &str) -> Result<LightState> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let state = self.state.lock();
        let sim = state
            .lights
            .get(light)
            .ok_or_else(|| LuxcalError::device_unavailable(light, "unknown light"))?;
        if sim.spec.faults.unreachable {
            return Err(LuxcalError::device_unavailable(light, "not responding"));
        }
        Ok(LightState {
            on: sim.reported_on(now),
            brightness: sim.brightness,
            color: sim.color,
            available: true,
        })
    }

    async fn read_sensor(&self, sensor: &str) -> Result<LuxReading> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut state = self.state.lock();
        if sensor != self.description.sensor || !state.sensor_available {
            return Err(LuxcalError::device_unavailable(sensor, "sensor unavailable"));
        }
        if state.invalid_reads > 0 {
            state.invalid_reads -= 1;
            return Ok(LuxReading::invalid());
        }
        Ok(LuxReading::new(self.lux_at(&state, now)))
    }

    fn light_handle(&self, light: &str) -> Option<LightHandle> {
        self.description
            .lights
            .iter()
            .find(|l| l.id == light)
            .map(|l| LightHandle {
                id: l.id.clone(),
                name: l.name.clone(),
                capabilities: l.capabilities,
            })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::uniform_room;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_lux_ramps_after_switch_on() {
        let room = SimulatedRoom::new(uniform_room(2, 10.0, 60.0));
        assert_eq!(room.current_lux(), 10.0);

        room.set_light_state("light.l1", &LightCommand::full_white(None, 4000))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!((room.current_lux() - 40.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!((room.current_lux() - 70.0).abs() < 1e-6);
        assert_eq!(room.command_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faults() {
        let room = SimulatedRoom::new(uniform_room(2, 10.0, 60.0));
        room.set_faults(
            "light.l1",
            SimFaults { never_turns_on: true, ..SimFaults::default() },
        );
        room.set_faults(
            "light.l2",
            SimFaults { unreachable: true, ..SimFaults::default() },
        );

        room.set_light_state("light.l1", &LightCommand::full_white(None, 4000))
            .await
            .unwrap();
        assert!(!room.read_light_state("light.l1").await.unwrap().on);
        assert!(room.read_light_state("light.l2").await.is_err());
        assert!(room
            .set_light_state("light.l2", &LightCommand::Off)
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_delay() {
        let room = SimulatedRoom::new(uniform_room(1, 0.0, 60.0));
        room.set_faults(
            "light.l1",
            SimFaults { report_delay_ms: 1_000, ..SimFaults::default() },
        );
        room.set_light_state("light.l1", &LightCommand::full_white(None, 4000))
            .await
            .unwrap();
        assert!(!room.read_light_state("light.l1").await.unwrap().on);
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(room.read_light_state("light.l1").await.unwrap().on);
    }

    #[tokio::test]
    async fn test_sensor_faults() {
        let room = SimulatedRoom::new(uniform_room(1, 12.0, 60.0));
        assert!(room.read_sensor("sensor.other").await.is_err());

        room.inject_invalid_readings(1);
        assert!(!room.read_sensor("sensor.office_lux").await.unwrap().valid);
        assert_eq!(
            room.read_sensor("sensor.office_lux").await.unwrap().lux(),
            Some(12.0)
        );

        room.set_sensor_available(false);
        assert!(room.read_sensor("sensor.office_lux").await.is_err());
    }

    #[test]
    fn test_room_description_parses_with_defaults() {
        let json = r#"{
            "room_id": "den",
            "sensor": "sensor.den",
            "floor_lux": 5.0,
            "lights": [ { "id": "light.a", "full_lux": 80.0 } ]
        }"#;
        let room: RoomDescription = serde_json::from_str(json).unwrap();
        assert_eq!(room.ramp_ms, 500);
        assert!(room.lights[0].capabilities.brightness);
        assert_eq!(room.lights[0].faults, SimFaults::default());
        assert_eq!(room.light_ids(), vec!["light.a"]);
    }
}

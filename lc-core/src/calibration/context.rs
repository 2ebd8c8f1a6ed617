//! Shared plumbing for the probe phases
//!
//! Every wait in a phase goes through [`ProbeContext::pause`] so that a
//! cancelled session stops at the next wait instead of finishing the phase.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::{LightCommand, LightState};
use crate::error::{LuxcalError, Result};
use crate::hw::DeviceGateway;
use crate::settings::CalibrationSettings;

/// Device access, settings and session-wide probe state
pub struct ProbeContext {
    gateway: Arc<dyn DeviceGateway>,
    sensor: String,
    settings: Arc<CalibrationSettings>,
    cancel: CancellationToken,
    slow_lights: HashSet<String>,
    started: Instant,
}

impl ProbeContext {
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        sensor: impl Into<String>,
        settings: Arc<CalibrationSettings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            sensor: sensor.into(),
            settings,
            cancel,
            slow_lights: HashSet::new(),
            started: Instant::now(),
        }
    }

    pub fn gateway(&self) -> &dyn DeviceGateway {
        self.gateway.as_ref()
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Fail with `Cancelled` if the session was cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(LuxcalError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep unless cancelled first
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(LuxcalError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Whether the configured session ceiling has been reached
    pub fn ceiling_reached(&self) -> bool {
        match self.settings.timing.session_ceiling() {
            Some(ceiling) => self.started.elapsed() >= ceiling,
            None => false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stretch future waits for a light that responded slowly
    pub fn mark_slow(&mut self, light: &str) {
        if self.slow_lights.insert(light.to_string()) {
            info!(light = %light, "Marking light as slow, extending its waits");
        }
    }

    pub fn is_slow(&self, light: &str) -> bool {
        self.slow_lights.contains(light)
    }

    /// Wait duration for one light, extended when it is marked slow
    pub fn wait_for(&self, light: &str, base: Duration) -> Duration {
        if self.is_slow(light) {
            base.mul_f64(self.settings.timing.slow_light_multiplier)
        } else {
            base
        }
    }

    /// Confirmation timeout for one light
    pub fn confirm_timeout(&self, light: &str) -> Duration {
        self.wait_for(light, self.settings.timing.confirm_timeout())
    }

    /// Full-brightness white command for a light
    pub fn full_on_command(&self, light: &str) -> LightCommand {
        let handle = self.gateway.light_handle(light);
        LightCommand::full_white(handle.as_ref(), self.settings.probe.white_kelvin)
    }

    /// Send a command; failures are returned to the caller
    pub async fn command(&self, light: &str, command: &LightCommand) -> Result<()> {
        self.gateway.set_light_state(light, command).await
    }

    /// Turn a light off, logging rather than failing
    pub async fn turn_off_quietly(&self, light: &str) {
        if let Err(e) = self.gateway.set_light_state(light, &LightCommand::Off).await {
            warn!(light = %light, "Failed to turn light off: {}", e);
        }
    }

    /// Turn a light to full white, logging rather than failing
    pub async fn turn_on_quietly(&self, light: &str) -> bool {
        let command = self.full_on_command(light);
        match self.gateway.set_light_state(light, &command).await {
            Ok(()) => true,
            Err(e) => {
                warn!(light = %light, "Failed to turn light on: {}", e);
                false
            }
        }
    }

    /// Read a light's state, `None` when unreachable
    pub async fn light_state(&self, light: &str) -> Option<LightState> {
        match self.gateway.read_light_state(light).await {
            Ok(state) => Some(state),
            Err(e) => {
                debug!(light = %light, "Light state read failed: {}", e);
                None
            }
        }
    }

    /// Poll until the light reports the wanted power state or the timeout expires
    pub async fn confirm_power(&self, light: &str, want_on: bool, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let poll = self.settings.timing.confirm_poll();
        loop {
            if let Some(state) = self.light_state(light).await {
                if state.on == want_on {
                    return Ok(true);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.pause(poll.min(deadline - now)).await?;
        }
    }

    /// Read a valid lux value, retrying with a doubling backoff
    ///
    /// Fails with `DeviceUnavailable` once all attempts are used up.
    pub async fn read_lux(&self) -> Result<f64> {
        let attempts = self.settings.probe.sensor_read_attempts.max(1);
        let mut backoff = self.settings.probe.sensor_retry_backoff();
        let mut last_problem = String::from("no reading");

        for attempt in 1..=attempts {
            self.check_cancelled()?;
            match self.gateway.read_sensor(&self.sensor).await {
                Ok(reading) => match reading.lux() {
                    Some(lux) => return Ok(lux),
                    None => last_problem = format!("invalid reading ({})", reading.value),
                },
                Err(e) => last_problem = e.to_string(),
            }
            debug!(sensor = %self.sensor, attempt, "Sensor read failed: {}", last_problem);
            if attempt < attempts {
                self.pause(backoff).await?;
                backoff *= 2;
            }
        }

        Err(LuxcalError::device_unavailable(
            self.sensor.clone(),
            format!("{} after {} attempts", last_problem, attempts),
        ))
    }

    /// Single sensor sample without retries; `None` for invalid or failed reads
    pub async fn sample_lux(&self) -> Option<f64> {
        match self.gateway.read_sensor(&self.sensor).await {
            Ok(reading) => reading.lux(),
            Err(_) => None,
        }
    }
}

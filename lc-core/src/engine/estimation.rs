//! Lux estimation from a calibration model
//!
//! Estimated lux is the calibrated floor plus each usable light's
//! contribution scaled by its current output, clamped to the measured range:
//!
//! ```text
//! lux = clamp(min_lux + Σ contribution × brightness / 255, min_lux, max_lux)
//! ```
//!
//! A light without brightness support counts as full output while on.
//! Excluded lights never contribute. The engine only reads the model.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data::{CalibrationModel, LightState, ModelStore};
use crate::error::Result;
use crate::hw::DeviceGateway;

/// Estimate lux for the given light states; `None` when the model is unusable
///
/// Lights missing from `states` are treated as off.
pub fn estimate_lux(model: &CalibrationModel, states: &HashMap<String, LightState>) -> Option<f64> {
    if !model.is_usable() {
        return None;
    }
    let added: f64 = model
        .contributions
        .iter()
        .filter(|(_, c)| c.is_usable())
        .filter_map(|(id, c)| states.get(id).map(|s| c.max_contribution * s.output_fraction()))
        .sum();
    Some((model.min_lux + added).clamp(model.min_lux, model.max_lux))
}

/// One published estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuxEstimate {
    pub room_id: String,
    pub lux: f64,
    /// Lights that were on and counted
    pub lights_on: usize,
    pub at: DateTime<Utc>,
}

/// Continuously re-evaluates the estimate for one room
pub struct EstimationEngine {
    gateway: Arc<dyn DeviceGateway>,
    model: RwLock<Option<Arc<CalibrationModel>>>,
    /// Wakes the loop on light changes and model swaps
    changed: Notify,
    output: watch::Sender<Option<LuxEstimate>>,
    poll_interval: Duration,
}

impl EstimationEngine {
    pub fn new(gateway: Arc<dyn DeviceGateway>, poll_interval: Duration) -> Self {
        let (output, _) = watch::channel(None);
        Self {
            gateway,
            model: RwLock::new(None),
            changed: Notify::new(),
            output,
            poll_interval,
        }
    }

    /// Replace the active model
    pub fn install_model(&self, model: CalibrationModel) {
        info!(
            room = %model.room_id,
            lights = model.contributing_light_count(),
            min_lux = model.min_lux,
            max_lux = model.max_lux,
            "Installing calibration model"
        );
        *self.model.write() = Some(Arc::new(model));
        self.changed.notify_one();
    }

    /// Install the stored model for `room`; returns false when none exists
    pub fn load_from(&self, store: &dyn ModelStore, room: &str) -> Result<bool> {
        match store.load_model(room)? {
            Some(model) => {
                self.install_model(model);
                Ok(true)
            }
            None => {
                debug!(room = %room, "No stored calibration model");
                Ok(false)
            }
        }
    }

    pub fn clear_model(&self) {
        *self.model.write() = None;
        self.output.send_replace(None);
    }

    pub fn model(&self) -> Option<Arc<CalibrationModel>> {
        self.model.read().clone()
    }

    /// A light changed state; re-evaluate without waiting for the next poll
    pub fn notify_state_change(&self) {
        self.changed.notify_one();
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LuxEstimate>> {
        self.output.subscribe()
    }

    pub fn latest(&self) -> Option<LuxEstimate> {
        self.output.borrow().clone()
    }

    /// Read current light states and publish a fresh estimate
    pub async fn evaluate_once(&self) -> Option<LuxEstimate> {
        let model = self.model()?;

        let mut states = HashMap::new();
        for (light, _) in model.contributions.iter().filter(|(_, c)| c.is_usable()) {
            match self.gateway.read_light_state(light).await {
                Ok(state) => {
                    states.insert(light.clone(), state);
                }
                Err(e) => debug!(light = %light, "Light state unreadable, counting as off: {}", e),
            }
        }

        let Some(lux) = estimate_lux(&model, &states) else {
            warn!(room = %model.room_id, "Calibration model has no usable range");
            return None;
        };
        let estimate = LuxEstimate {
            room_id: model.room_id.clone(),
            lux,
            lights_on: states.values().filter(|s| s.on).count(),
            at: Utc::now(),
        };
        debug!(room = %estimate.room_id, lux = estimate.lux, lights_on = estimate.lights_on, "Estimated lux");
        self.output.send_replace(Some(estimate.clone()));
        Some(estimate)
    }

    /// Poll until cancelled, waking early on state-change notifications
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(poll_s = self.poll_interval.as_secs(), "Estimation loop started");
        loop {
            self.evaluate_once().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.changed.notified() => {
                    debug!("Estimation woken by state change");
                }
            }
        }
        info!("Estimation loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{
        ColorState, ExclusionReason, InMemoryModelStore, LightContribution, Validation,
    };
    use crate::sim::fixtures::uniform_room;
    use crate::sim::SimulatedRoom;
    use std::collections::BTreeMap;

    fn contribution(lux: f64, excluded: Option<ExclusionReason>) -> LightContribution {
        LightContribution {
            max_contribution: lux,
            base_lux: 10.0,
            with_light_lux: 10.0 + lux,
            validated: Validation::ValidatedLinear,
            excluded_reason: excluded,
        }
    }

    fn model() -> CalibrationModel {
        let mut contributions = BTreeMap::new();
        for i in 1..=5 {
            contributions.insert(format!("light.l{}", i), contribution(60.0, None));
        }
        CalibrationModel {
            room_id: "office".into(),
            min_lux: 10.0,
            max_lux: 310.0,
            settle_time_seconds: 2.0,
            contributions,
            excluded: BTreeMap::new(),
            pair_results: Vec::new(),
            degraded_timing: false,
            created_at: Utc::now(),
        }
    }

    fn on(brightness: Option<u8>) -> LightState {
        LightState {
            on: true,
            brightness,
            color: ColorState::None,
            available: true,
        }
    }

    #[test]
    fn test_all_off_is_floor() {
        assert_eq!(estimate_lux(&model(), &HashMap::new()), Some(10.0));
    }

    #[test]
    fn test_scales_with_brightness() {
        let mut states = HashMap::new();
        states.insert("light.l1".to_string(), on(Some(255)));
        states.insert("light.l2".to_string(), on(Some(51)));
        states.insert("light.l3".to_string(), on(None));
        states.insert("light.l4".to_string(), LightState::off());

        let lux = estimate_lux(&model(), &states).unwrap();
        assert!((lux - (10.0 + 60.0 + 12.0 + 60.0)).abs() < 1e-9);
    }

    #[test]
    fn test_clamped_to_max() {
        let mut model = model();
        model.max_lux = 100.0;
        let states: HashMap<String, LightState> =
            (1..=5).map(|i| (format!("light.l{}", i), on(Some(255)))).collect();
        assert_eq!(estimate_lux(&model, &states), Some(100.0));
    }

    #[test]
    fn test_excluded_lights_ignored() {
        let mut model = model();
        model.contributions.insert(
            "light.l1".into(),
            contribution(60.0, Some(ExclusionReason::BelowThreshold)),
        );
        let mut states = HashMap::new();
        states.insert("light.l1".to_string(), on(Some(255)));
        assert_eq!(estimate_lux(&model, &states), Some(10.0));
    }

    #[test]
    fn test_unusable_model_has_no_estimate() {
        let mut model = model();
        model.max_lux = model.min_lux;
        assert_eq!(estimate_lux(&model, &HashMap::new()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_tracks_room() {
        let room = Arc::new(SimulatedRoom::new(uniform_room(5, 10.0, 60.0)));
        let engine = EstimationEngine::new(room.clone(), Duration::from_secs(10));
        assert!(engine.evaluate_once().await.is_none());

        engine.install_model(model());
        room.set_light_power("light.l1", true, Some(255));
        room.set_light_power("light.l2", true, Some(255));
        let estimate = engine.evaluate_once().await.unwrap();
        assert!((estimate.lux - 130.0).abs() < 1e-9);
        assert_eq!(estimate.lights_on, 2);
        assert_eq!(engine.latest(), Some(estimate));

        engine.clear_model();
        assert!(engine.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_wakes_on_notification() {
        let room = Arc::new(SimulatedRoom::new(uniform_room(2, 10.0, 60.0)));
        let engine = Arc::new(EstimationEngine::new(room.clone(), Duration::from_secs(3600)));
        engine.install_model(model());
        let mut rx = engine.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine.clone().run(cancel.clone()));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|e| e.lux), Some(10.0));

        room.set_light_power("light.l2", true, Some(255));
        engine.notify_state_change();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(|e| e.lux), Some(70.0));

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_load_from_store() {
        let store = InMemoryModelStore::new();
        let room = Arc::new(SimulatedRoom::new(uniform_room(1, 10.0, 60.0)));
        let engine = EstimationEngine::new(room, Duration::from_secs(10));
        assert!(!engine.load_from(&store, "office").unwrap());

        store.save_model("office", &model()).unwrap();
        assert!(engine.load_from(&store, "office").unwrap());
        assert_eq!(engine.model().unwrap().room_id, "office");
    }
}

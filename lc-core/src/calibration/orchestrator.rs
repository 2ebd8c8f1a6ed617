//! Calibration orchestrator
//!
//! Drives one session through its phases:
//!
//! ```text
//! CapturingInitial -> ValidatingSetup -> CalibratingTiming -> TestingMinMax
//!   -> TestingIndividual -> ValidatingPairs -> SavingModel
//!   -> RestoringInitial -> Completed | CompletedWithErrors
//! ```
//!
//! Any hard failure (including cancellation) jumps straight to
//! `RestoringInitial`. Restoration runs on every path and ignores
//! cancellation. Per-light problems never abort a session; the session
//! continues with the lights that survived.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::calibration::context::ProbeContext;
use crate::calibration::contribution::{measure_contributions, ContributionBatch};
use crate::calibration::min_max::{measure_min_max, MinMaxResult};
use crate::calibration::pairs::validate_pairs;
use crate::calibration::report::{
    CalibrationReport, Phase, PhaseStatus, PhaseSummary, SessionFailure, SessionOutcome,
};
use crate::calibration::session::{RoomRegistry, SessionHandle};
use crate::calibration::settle::{estimate_settle_time, SettleEstimate};
use crate::constants::estimated_session_duration;
use crate::data::{
    validate_entity_id, validate_light_list, validate_room_id, CalibrationModel, ExclusionReason,
    LightOutcome, ModelStore, PairResult, PairVerdict,
};
use crate::error::{LuxcalError, Result};
use crate::hw::{capture, restore, DeviceGateway, RestoreOutcome, Snapshot};
use crate::settings::CalibrationSettings;

/// Capacity of the report broadcast channel
const REPORT_CHANNEL_CAPACITY: usize = 16;

/// Session control surface
///
/// Cheap to share behind an `Arc`; sessions for different rooms run
/// concurrently, sessions for the same room are refused.
pub struct Calibrator {
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn ModelStore>,
    settings: Arc<CalibrationSettings>,
    registry: Arc<RoomRegistry>,
    reports: broadcast::Sender<CalibrationReport>,
}

impl Calibrator {
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        store: Arc<dyn ModelStore>,
        settings: CalibrationSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Ok(Self {
            gateway,
            store,
            settings: Arc::new(settings),
            registry: Arc::new(RoomRegistry::new()),
            reports,
        })
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    /// Receive the report of every session that finishes from now on
    pub fn subscribe_reports(&self) -> broadcast::Receiver<CalibrationReport> {
        self.reports.subscribe()
    }

    pub fn active_session(&self, room: &str) -> Option<Uuid> {
        self.registry.active_session(room)
    }

    /// Start a session in the background
    ///
    /// Malformed ids, duplicate lights and `SessionBusy` are returned here
    /// without touching any device. An empty light list starts a session
    /// that fails in setup and still produces a report. Must be called from
    /// within a tokio runtime.
    pub fn start_calibration(
        &self,
        room: &str,
        lights: &[String],
        sensor: &str,
    ) -> Result<SessionHandle> {
        validate_room_id(room)?;
        validate_entity_id(sensor)?;
        validate_light_list(lights)?;

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let guard = self.registry.try_acquire(room, id, cancel.clone())?;

        info!(
            room = %room,
            session = %id,
            lights = lights.len(),
            estimated_minutes = estimated_session_duration(lights.len()).as_secs() / 60,
            "Starting calibration"
        );

        let session = CalibrationSession::new(
            id,
            room.to_string(),
            sensor.to_string(),
            lights.to_vec(),
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            Arc::clone(&self.settings),
            cancel.clone(),
        );
        let reports = self.reports.clone();
        let task = tokio::spawn(async move {
            let report = session.run().await;
            drop(guard);
            // No subscribers is fine
            let _ = reports.send(report.clone());
            report
        });

        Ok(SessionHandle::new(id, room.to_string(), cancel, task))
    }

    /// Cancel a running session; it still restores the room before ending
    pub fn cancel_calibration(&self, session_id: Uuid) -> Result<()> {
        self.registry.cancel(session_id)
    }
}

/// Working state of one session
struct CalibrationSession {
    id: Uuid,
    room_id: String,
    sensor: String,
    lights: Vec<String>,
    gateway: Arc<dyn DeviceGateway>,
    store: Arc<dyn ModelStore>,
    settings: Arc<CalibrationSettings>,
    cancel: CancellationToken,

    phase: Phase,
    phase_started: Instant,
    phases: Vec<PhaseSummary>,
    snapshot: Snapshot,
    candidates: Vec<String>,
    excluded: BTreeMap<String, ExclusionReason>,
    settle: Option<SettleEstimate>,
    min_max: Option<MinMaxResult>,
    batch: Option<ContributionBatch>,
    pair_results: Vec<PairResult>,
    model_saved: bool,
    started_at: DateTime<Utc>,
}

impl CalibrationSession {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: Uuid,
        room_id: String,
        sensor: String,
        lights: Vec<String>,
        gateway: Arc<dyn DeviceGateway>,
        store: Arc<dyn ModelStore>,
        settings: Arc<CalibrationSettings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            room_id,
            sensor,
            lights,
            gateway,
            store,
            settings,
            cancel,
            phase: Phase::CapturingInitial,
            phase_started: Instant::now(),
            phases: Vec::new(),
            snapshot: Snapshot::new(),
            candidates: Vec::new(),
            excluded: BTreeMap::new(),
            settle: None,
            min_max: None,
            batch: None,
            pair_results: Vec::new(),
            model_saved: false,
            started_at: Utc::now(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!(room = %self.room_id, session = %self.id, phase = %phase, "Entering phase");
        self.phase = phase;
        self.phase_started = Instant::now();
    }

    fn record(&mut self, status: PhaseStatus, detail: impl Into<String>) {
        self.phases.push(PhaseSummary {
            phase: self.phase,
            status,
            detail: detail.into(),
            elapsed_ms: self.phase_started.elapsed().as_millis() as u64,
        });
    }

    async fn run(mut self) -> CalibrationReport {
        self.enter(Phase::CapturingInitial);
        self.snapshot = capture(self.gateway.as_ref(), &self.lights).await;
        let unavailable = self.snapshot.values().filter(|s| !s.available).count();
        self.record(
            PhaseStatus::Ok,
            format!("{} lights captured, {} unavailable", self.snapshot.len(), unavailable),
        );

        let mut ctx = ProbeContext::new(
            Arc::clone(&self.gateway),
            self.sensor.clone(),
            Arc::clone(&self.settings),
            self.cancel.clone(),
        );
        let failure = match self.run_phases(&mut ctx).await {
            Ok(()) => None,
            Err(e) => {
                if e.is_cancelled() {
                    warn!(room = %self.room_id, phase = %self.phase, "Calibration cancelled");
                } else {
                    error!(room = %self.room_id, phase = %self.phase, "Calibration failed: {}", e);
                }
                self.record(PhaseStatus::Failed, e.to_string());
                Some(SessionFailure {
                    phase: self.phase,
                    class: e.class().to_string(),
                    message: e.to_string(),
                })
            }
        };

        self.enter(Phase::RestoringInitial);
        let restoration = restore(self.gateway.as_ref(), &self.snapshot, &self.settings.restore).await;
        let failed_restores = restoration.values().filter(|o| o.is_failure()).count();
        self.record(
            if failed_restores == 0 { PhaseStatus::Ok } else { PhaseStatus::Failed },
            format!("{} of {} lights restored", restoration.len() - failed_restores, restoration.len()),
        );

        let outcome = if failure.is_none() && failed_restores == 0 {
            SessionOutcome::Completed
        } else {
            SessionOutcome::CompletedWithErrors
        };
        self.phase = match outcome {
            SessionOutcome::Completed => Phase::Completed,
            SessionOutcome::CompletedWithErrors => Phase::CompletedWithErrors,
        };

        let report = self.report(outcome, failure, restoration);
        info!(room = %self.room_id, session = %self.id, outcome = ?outcome, "{}", report.summary());
        report
    }

    async fn run_phases(&mut self, ctx: &mut ProbeContext) -> Result<()> {
        // Setup
        self.enter(Phase::ValidatingSetup);
        ctx.check_cancelled()?;
        if self.lights.is_empty() {
            return Err(LuxcalError::InvalidSetup("no lights selected".into()));
        }
        let ambient = ctx.read_lux().await?;
        for light in &self.lights {
            match self.snapshot.get(light) {
                Some(state) if state.available => self.candidates.push(light.clone()),
                _ => {
                    warn!(light = %light, "Light unavailable, excluding from calibration");
                    self.excluded.insert(light.clone(), ExclusionReason::Unavailable);
                }
            }
        }
        if self.candidates.is_empty() {
            return Err(LuxcalError::InvalidSetup(format!(
                "none of the {} selected lights is available",
                self.lights.len()
            )));
        }
        self.record(
            PhaseStatus::Ok,
            format!(
                "sensor reads {:.1} lux, {} of {} lights available",
                ambient,
                self.candidates.len(),
                self.lights.len()
            ),
        );

        // Timing
        self.enter(Phase::CalibratingTiming);
        let estimate = estimate_settle_time(ctx, &self.candidates).await?;
        let settle = estimate.settle;
        self.record(
            PhaseStatus::Ok,
            if estimate.degraded {
                format!("no light responded, using default {:.1}s (degraded)", settle.as_secs_f64())
            } else {
                format!("settle time {:.1}s from {} trials", settle.as_secs_f64(), estimate.trials.len())
            },
        );
        self.settle = Some(estimate);

        // Min/max
        self.enter(Phase::TestingMinMax);
        let min_max = measure_min_max(ctx, &self.candidates, settle).await?;
        self.record(
            PhaseStatus::Ok,
            format!("{:.1} - {:.1} lux", min_max.min_lux, min_max.max_lux),
        );
        let min_lux = min_max.min_lux;
        self.min_max = Some(min_max);

        // Individual lights
        self.enter(Phase::TestingIndividual);
        let mut batch = measure_contributions(ctx, &self.candidates, min_lux, settle).await?;
        self.excluded
            .extend(batch.excluded.iter().map(|(light, reason)| (light.clone(), *reason)));
        let survivors = batch.surviving(&self.candidates);
        if survivors.is_empty() {
            self.batch = Some(batch);
            return Err(LuxcalError::NoSurvivingLights);
        }
        self.record(
            PhaseStatus::Ok,
            format!(
                "{} of {} lights contribute, {} untested",
                survivors.len(),
                self.candidates.len(),
                batch.untested.len()
            ),
        );

        // Pairs
        self.enter(Phase::ValidatingPairs);
        if survivors.len() < 2 {
            self.record(PhaseStatus::Skipped, "fewer than two surviving lights");
        } else {
            self.pair_results =
                validate_pairs(ctx, &self.candidates, &survivors, &mut batch.contributions, settle)
                    .await?;
            let linear = self
                .pair_results
                .iter()
                .filter(|r| r.verdict == PairVerdict::Linear)
                .count();
            self.record(
                PhaseStatus::Ok,
                format!("{} of {} sampled pairs additive", linear, self.pair_results.len()),
            );
        }
        self.batch = Some(batch);

        // Save
        self.enter(Phase::SavingModel);
        ctx.check_cancelled()?;
        let model = self.build_model()?;
        self.save(model).await?;
        self.model_saved = true;
        self.record(PhaseStatus::Ok, "model saved");
        Ok(())
    }

    fn build_model(&self) -> Result<CalibrationModel> {
        let (Some(settle), Some(min_max), Some(batch)) = (&self.settle, &self.min_max, &self.batch)
        else {
            return Err(LuxcalError::generic("model built before all phases completed"));
        };
        let mut model = CalibrationModel {
            room_id: self.room_id.clone(),
            min_lux: min_max.min_lux,
            max_lux: min_max.max_lux,
            settle_time_seconds: settle.settle.as_secs_f64(),
            contributions: batch.contributions.clone(),
            excluded: self.excluded.clone(),
            pair_results: self.pair_results.clone(),
            degraded_timing: settle.degraded,
            created_at: Utc::now(),
        };
        for light in model.clamp_contributions() {
            warn!(light = %light, "Contribution exceeded the room's lux range, clamped");
        }
        Ok(model)
    }

    async fn save(&self, model: CalibrationModel) -> Result<()> {
        let store = Arc::clone(&self.store);
        let room = self.room_id.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_model(&room, &model))
            .await
            .map_err(|e| LuxcalError::persistence(&self.room_id, e))?;
        saved.map_err(|e| match e {
            e @ LuxcalError::PersistenceFailure { .. } => e,
            other => LuxcalError::persistence(&self.room_id, other),
        })
    }

    fn light_outcomes(&self) -> BTreeMap<String, LightOutcome> {
        let mut outcomes = BTreeMap::new();
        for light in &self.lights {
            let measured = self.batch.as_ref().and_then(|b| b.contributions.get(light));
            let outcome = match (measured, self.excluded.get(light)) {
                (_, Some(reason)) => LightOutcome::Excluded { reason: *reason },
                (Some(c), None) => LightOutcome::Included {
                    contribution: c.max_contribution,
                    validated: c.validated,
                },
                (None, None) => continue,
            };
            outcomes.insert(light.clone(), outcome);
        }
        outcomes
    }

    fn report(
        &self,
        outcome: SessionOutcome,
        failure: Option<SessionFailure>,
        restoration: BTreeMap<String, RestoreOutcome>,
    ) -> CalibrationReport {
        CalibrationReport {
            session_id: self.id,
            room_id: self.room_id.clone(),
            outcome,
            failure,
            phases: self.phases.clone(),
            lights: self.light_outcomes(),
            pair_results: self.pair_results.clone(),
            restoration,
            settle_time_seconds: self.settle.as_ref().map(|s| s.settle.as_secs_f64()),
            degraded_timing: self.settle.as_ref().is_some_and(|s| s.degraded),
            min_lux: self.min_max.as_ref().map(|m| m.min_lux),
            max_lux: self.min_max.as_ref().map(|m| m.max_lux),
            model_saved: self.model_saved,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryModelStore, Validation};
    use crate::hw::MockDeviceGateway;
    use crate::sim::fixtures::uniform_room;
    use crate::sim::{SimFaults, SimulatedRoom};
    use std::time::Duration;

    struct Rig {
        room: Arc<SimulatedRoom>,
        store: Arc<InMemoryModelStore>,
        calibrator: Calibrator,
        lights: Vec<String>,
    }

    fn rig(room: SimulatedRoom) -> Rig {
        let room = Arc::new(room);
        let store = Arc::new(InMemoryModelStore::new());
        let calibrator =
            Calibrator::new(room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
        let lights = room.description().light_ids();
        Rig { room, store, calibrator, lights }
    }

    async fn run(rig: &Rig) -> CalibrationReport {
        rig.calibrator
            .start_calibration("office", &rig.lights, "sensor.office_lux")
            .unwrap()
            .wait()
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_saves_model() {
        let rig = rig(SimulatedRoom::new(uniform_room(5, 10.0, 60.0)));
        let report = run(&rig).await;

        assert_eq!(report.outcome, SessionOutcome::Completed, "{:?}", report.failure);
        assert!(report.model_saved);
        assert_eq!(report.included_lights(), 5);
        assert_eq!(report.restoration.len(), 5);

        let model = rig.store.load_model("office").unwrap().unwrap();
        assert!(model.is_usable());
        assert_eq!(model.contributions.len(), 5);
        assert!((model.min_lux - 10.0).abs() < 1e-9);
        assert!((model.max_lux - 310.0).abs() < 1e-9);
        assert_eq!(model.contributions["light.l1"].validated, Validation::ValidatedLinear);
        assert_eq!(model.contributions["light.l5"].validated, Validation::Unvalidated);

        let order: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(
            order,
            vec![
                Phase::CapturingInitial,
                Phase::ValidatingSetup,
                Phase::CalibratingTiming,
                Phase::TestingMinMax,
                Phase::TestingIndividual,
                Phase::ValidatingPairs,
                Phase::SavingModel,
                Phase::RestoringInitial,
            ]
        );
        assert!(rig.calibrator.active_session("office").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_is_restored() {
        let mut description = uniform_room(3, 10.0, 60.0);
        description.lights[1].initial_on = true;
        description.lights[1].initial_brightness = Some(100);
        let rig = rig(SimulatedRoom::new(description));

        let report = run(&rig).await;
        assert!(report.is_success());
        assert!(!rig.room.light_state("light.l1").unwrap().on);
        let restored = rig.room.light_state("light.l2").unwrap();
        assert!(restored.on);
        assert_eq!(restored.brightness, Some(100));
        assert!(!rig.room.light_state("light.l3").unwrap().on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failed_light_keeps_the_rest() {
        let room = SimulatedRoom::new(uniform_room(5, 10.0, 60.0));
        room.set_faults("light.l3", SimFaults { never_turns_on: true, ..SimFaults::default() });
        let rig = rig(room);

        let report = run(&rig).await;
        assert!(report.is_success());
        assert_eq!(
            report.lights["light.l3"],
            LightOutcome::Excluded { reason: ExclusionReason::DidNotTurnOn }
        );
        let model = rig.store.load_model("office").unwrap().unwrap();
        assert!(model.contributions.len() >= 4);
        assert_eq!(model.excluded.get("light.l3"), Some(&ExclusionReason::DidNotTurnOn));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_busy_and_touches_nothing() {
        let rig = rig(SimulatedRoom::new(uniform_room(2, 10.0, 60.0)));
        let first = rig
            .calibrator
            .start_calibration("office", &rig.lights, "sensor.office_lux")
            .unwrap();

        let err = rig
            .calibrator
            .start_calibration("office", &rig.lights, "sensor.office_lux")
            .unwrap_err();
        assert!(matches!(err, LuxcalError::SessionBusy { .. }));
        assert_eq!(rig.room.command_count(), 0);
        assert_eq!(rig.room.read_count(), 0);
        assert_eq!(rig.calibrator.active_session("office"), Some(first.id()));

        assert!(first.wait().await.unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_check_with_strict_mock() {
        // The mock panics on any call, so a busy start must not reach it
        let gateway = Arc::new(MockDeviceGateway::new());
        let calibrator = Calibrator::new(
            gateway,
            Arc::new(InMemoryModelStore::new()),
            CalibrationSettings::default(),
        )
        .unwrap();
        let lights = vec!["light.a".to_string()];

        let registry_guard = calibrator
            .registry
            .try_acquire("office", Uuid::new_v4(), CancellationToken::new())
            .unwrap();
        let err = calibrator
            .start_calibration("office", &lights, "sensor.lux")
            .unwrap_err();
        assert!(matches!(err, LuxcalError::SessionBusy { .. }));
        drop(registry_guard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_restores_and_reports() {
        let rig = rig(SimulatedRoom::new(uniform_room(4, 10.0, 60.0)));
        let handle = rig
            .calibrator
            .start_calibration("office", &rig.lights, "sensor.office_lux")
            .unwrap();

        tokio::time::sleep(Duration::from_secs(12)).await;
        rig.calibrator.cancel_calibration(handle.id()).unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.outcome, SessionOutcome::CompletedWithErrors);
        assert_eq!(report.failure.as_ref().unwrap().class, "cancelled");
        assert!(!report.model_saved);
        assert!(rig.store.is_empty());
        assert_eq!(report.restoration.len(), 4);
        assert!(report.restoration.values().all(|o| *o == RestoreOutcome::Restored));
        for light in &rig.lights {
            assert!(!rig.room.light_state(light).unwrap().on);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_violation_is_hard_failure() {
        let rig = rig(SimulatedRoom::new(uniform_room(2, 10.0, 3.0)));
        let report = run(&rig).await;

        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.phase, Phase::TestingMinMax);
        assert_eq!(failure.class, "range-violation");
        assert!(!report.model_saved);
        assert_eq!(report.phase(Phase::TestingMinMax).unwrap().status, PhaseStatus::Failed);
        assert!(report.phase(Phase::TestingIndividual).is_none());
        assert_eq!(report.restoration.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_sensor_fails_setup() {
        let room = SimulatedRoom::new(uniform_room(2, 10.0, 60.0));
        room.set_sensor_available(false);
        let rig = rig(room);

        let report = run(&rig).await;
        let failure = report.failure.unwrap();
        assert_eq!(failure.phase, Phase::ValidatingSetup);
        assert_eq!(failure.class, "device-unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_lights_unavailable_fails_setup() {
        let room = SimulatedRoom::new(uniform_room(2, 10.0, 60.0));
        for light in ["light.l1", "light.l2"] {
            room.set_faults(light, SimFaults { unreachable: true, ..SimFaults::default() });
        }
        let rig = rig(room);

        let report = run(&rig).await;
        assert_eq!(report.failure.unwrap().class, "invalid-setup");
        assert!(report
            .restoration
            .values()
            .all(|o| *o == RestoreOutcome::SkippedUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_hard() {
        let rig = rig(SimulatedRoom::new(uniform_room(3, 10.0, 60.0)));
        rig.store.set_fail_saves(true);

        let report = run(&rig).await;
        let failure = report.failure.unwrap();
        assert_eq!(failure.phase, Phase::SavingModel);
        assert_eq!(failure.class, "persistence-failure");
        assert!(!report.model_saved);
        assert!(rig.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_failure_marks_completed_with_errors() {
        // Starts on, then refuses to come back on after being switched off
        let mut description = uniform_room(3, 10.0, 60.0);
        description.lights[0].initial_on = true;
        description.lights[0].faults.never_turns_on = true;
        let rig = rig(SimulatedRoom::new(description));
        let mut reports = rig.calibrator.subscribe_reports();

        let report = run(&rig).await;
        assert!(report.failure.is_none());
        assert!(report.model_saved);
        assert_eq!(report.outcome, SessionOutcome::CompletedWithErrors);
        assert_eq!(report.restore_failures(), vec!["light.l1"]);
        assert_eq!(
            report.lights["light.l1"],
            LightOutcome::Excluded { reason: ExclusionReason::DidNotTurnOn }
        );
        assert_eq!(reports.recv().await.unwrap().session_id, report.session_id);
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_synchronously() {
        let rig = rig(SimulatedRoom::new(uniform_room(1, 10.0, 60.0)));
        let twice = vec!["light.l1".to_string(), "light.l1".to_string()];
        assert!(rig
            .calibrator
            .start_calibration("office", &twice, "sensor.office_lux")
            .is_err());
        assert!(rig
            .calibrator
            .start_calibration("../office", &rig.lights, "sensor.office_lux")
            .is_err());
        assert_eq!(rig.room.command_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_light_list_fails_setup_with_report() {
        let rig = rig(SimulatedRoom::new(uniform_room(2, 10.0, 60.0)));
        let mut reports = rig.calibrator.subscribe_reports();

        let report = rig
            .calibrator
            .start_calibration("office", &[], "sensor.office_lux")
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.outcome, SessionOutcome::CompletedWithErrors);
        let failure = report.failure.clone().unwrap();
        assert_eq!(failure.phase, Phase::ValidatingSetup);
        assert_eq!(failure.class, "invalid-setup");
        assert!(report.restoration.is_empty());
        assert_eq!(rig.room.command_count(), 0);
        assert_eq!(reports.recv().await.unwrap().session_id, report.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagging_state_report_still_restores() {
        let mut description = uniform_room(3, 10.0, 60.0);
        description.lights[1].initial_on = true;
        description.lights[1].faults.report_delay_ms = 2_000;
        let rig = rig(SimulatedRoom::new(description));

        let report = run(&rig).await;
        assert_eq!(report.outcome, SessionOutcome::Completed, "{:?}", report.restoration);
        assert!(report.restoration.values().all(|o| *o == RestoreOutcome::Restored));
        assert!(matches!(report.lights["light.l2"], LightOutcome::Included { .. }));
        assert!(rig.room.light_state("light.l2").unwrap().on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_off_fails_restore() {
        let room = SimulatedRoom::new(uniform_room(3, 10.0, 60.0));
        room.set_faults("light.l1", SimFaults { ignores_off: true, ..SimFaults::default() });
        let rig = rig(room);

        let report = run(&rig).await;
        assert_eq!(report.outcome, SessionOutcome::CompletedWithErrors);
        assert!(report.failure.is_none(), "{:?}", report.failure);
        assert_eq!(report.restore_failures(), vec!["light.l1"]);
        assert!(rig.room.light_state("light.l1").unwrap().on);
        assert!(!rig.room.light_state("light.l2").unwrap().on);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut settings = CalibrationSettings::default();
        settings.restore.attempts = 0;
        let result = Calibrator::new(
            Arc::new(SimulatedRoom::new(uniform_room(1, 10.0, 60.0))),
            Arc::new(InMemoryModelStore::new()),
            settings,
        );
        assert!(result.is_err());
    }
}

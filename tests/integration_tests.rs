/*
 * Integration tests for Luxcal
 *
 * These tests drive whole calibration sessions against a simulated room
 * and check the stored model, the report and the room left behind.
 */

use clap::Parser;
use lc_core::{
    estimate_lux, Capabilities, CalibrationSettings, Calibrator, DeviceGateway,
    ExclusionReason, InMemoryModelStore, JsonModelStore, LightOutcome, LightState, LuxcalError,
    ModelStore, PairVerdict, Phase, RestoreOutcome, RoomDescription, SessionOutcome, SimFaults,
    SimLight, SimulatedRoom, Validation,
};
use luxcal::cli::Cli;
use luxcal::commands::{states_from_specs, Context};
use serial_test::serial;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ROOM: &str = "office";
const SENSOR: &str = "sensor.office_lux";

// Test utilities
fn office(count: usize) -> RoomDescription {
    RoomDescription {
        room_id: ROOM.to_string(),
        sensor: SENSOR.to_string(),
        floor_lux: 10.0,
        ramp_ms: 500,
        lights: (1..=count)
            .map(|i| SimLight {
                id: format!("light.l{}", i),
                name: format!("Light {}", i),
                full_lux: 60.0,
                capabilities: Capabilities {
                    power: true,
                    brightness: true,
                    color_temp: true,
                    rgb: false,
                },
                initial_on: false,
                initial_brightness: None,
                faults: SimFaults::default(),
            })
            .collect(),
        interactions: Vec::new(),
    }
}

fn single_pair_settings() -> CalibrationSettings {
    let mut settings = CalibrationSettings::default();
    settings.pairs.max_pairs = 1;
    settings
}

#[tokio::test(start_paused = true)]
async fn test_five_light_office_scenario() {
    let room = Arc::new(SimulatedRoom::new(office(5)));
    let store = Arc::new(InMemoryModelStore::new());
    let calibrator = Calibrator::new(room.clone(), store.clone(), single_pair_settings()).unwrap();
    let lights = room.description().light_ids();

    let report = calibrator
        .start_calibration(ROOM, &lights, SENSOR)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.outcome, SessionOutcome::Completed, "{}", report.summary());
    assert_eq!(report.included_lights(), 5);
    assert!((report.min_lux.unwrap() - 10.0).abs() < 1e-9);
    assert!((report.max_lux.unwrap() - 310.0).abs() < 1e-9);

    assert_eq!(report.pair_results.len(), 1);
    let pair = &report.pair_results[0];
    assert_eq!(pair.lights, ["light.l1".to_string(), "light.l2".to_string()]);
    assert!((pair.combined_lux.unwrap() - 130.0).abs() < 1e-9);
    assert_eq!(pair.verdict, PairVerdict::Linear);

    let model = store.load_model(ROOM).unwrap().unwrap();
    assert!(model.max_lux > model.min_lux);
    assert_eq!(model.contributions.len(), 5);
    assert!(model.excluded.is_empty());
    for contribution in model.contributions.values() {
        assert!((contribution.max_contribution - 60.0).abs() < 1e-9);
    }

    for light in &lights {
        assert_eq!(report.restoration[light], RestoreOutcome::Restored);
        let state = room.read_light_state(light).await.unwrap();
        assert!(!state.on, "{} left on", light);
    }
}

#[tokio::test(start_paused = true)]
async fn test_validated_pairs_reproduce_estimate() {
    let room = Arc::new(SimulatedRoom::new(office(4)));
    let store = Arc::new(InMemoryModelStore::new());
    let calibrator =
        Calibrator::new(room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
    let lights = room.description().light_ids();
    let report = calibrator
        .start_calibration(ROOM, &lights, SENSOR)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(report.is_success());

    let model = store.load_model(ROOM).unwrap().unwrap();
    let validated: Vec<&String> = model
        .contributions
        .iter()
        .filter(|(_, c)| c.validated == Validation::ValidatedLinear)
        .map(|(id, _)| id)
        .collect();
    assert!(validated.len() >= 2);

    let tolerance = calibrator.settings().pairs.tolerance_percent;
    for (i, a) in validated.iter().enumerate() {
        for b in &validated[i + 1..] {
            room.set_light_power(a, true, Some(255));
            room.set_light_power(b, true, Some(255));
            tokio::time::sleep(Duration::from_secs(2)).await;

            let measured = room.read_sensor(SENSOR).await.unwrap().lux().unwrap();
            let states: HashMap<String, LightState> = [*a, *b]
                .into_iter()
                .map(|id| (id.clone(), room.light_state(id).unwrap()))
                .collect();
            let estimated = estimate_lux(&model, &states).unwrap();
            let added = estimated - model.min_lux;
            let error = ((measured - model.min_lux) - added).abs() / added * 100.0;
            assert!(error <= tolerance, "{} + {}: {:.1}% off", a, b, error);

            room.set_light_power(a, false, None);
            room.set_light_power(b, false, None);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_busy_room_issues_no_commands() {
    let room = Arc::new(SimulatedRoom::new(office(3)));
    let calibrator = Calibrator::new(
        room.clone(),
        Arc::new(InMemoryModelStore::new()),
        CalibrationSettings::default(),
    )
    .unwrap();
    let lights = room.description().light_ids();

    let first = calibrator.start_calibration(ROOM, &lights, SENSOR).unwrap();
    let commands_before = room.command_count();
    let err = calibrator.start_calibration(ROOM, &lights, SENSOR).unwrap_err();
    assert!(matches!(err, LuxcalError::SessionBusy { .. }));
    assert_eq!(room.command_count(), commands_before);

    // Runs to completion and frees the room
    assert!(first.wait().await.unwrap().is_success());
    assert!(calibrator.active_session(ROOM).is_none());
    let second = calibrator.start_calibration(ROOM, &lights, SENSOR).unwrap();
    second.cancel();
    second.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failing_light_is_contained() {
    let mut description = office(5);
    description.lights[2].faults.never_turns_on = true;
    let room = Arc::new(SimulatedRoom::new(description));
    let store = Arc::new(InMemoryModelStore::new());
    let calibrator =
        Calibrator::new(room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
    let lights = room.description().light_ids();

    let report = calibrator
        .start_calibration(ROOM, &lights, SENSOR)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report.summary());

    let model = store.load_model(ROOM).unwrap().unwrap();
    let accounted = model
        .contributions
        .keys()
        .chain(model.excluded.keys())
        .collect::<std::collections::BTreeSet<_>>();
    assert_eq!(accounted.len(), 5);
    assert!(model.contributions.len() >= 4);
    assert_eq!(model.excluded["light.l3"], ExclusionReason::DidNotTurnOn);
    assert_eq!(
        report.lights["light.l3"],
        LightOutcome::Excluded { reason: ExclusionReason::DidNotTurnOn }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_session_restores_snapshot() {
    let mut description = office(4);
    description.lights[0].initial_on = true;
    description.lights[0].initial_brightness = Some(90);
    let room = Arc::new(SimulatedRoom::new(description));
    let store = Arc::new(InMemoryModelStore::new());
    let calibrator =
        Calibrator::new(room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
    let lights = room.description().light_ids();

    let handle = calibrator.start_calibration(ROOM, &lights, SENSOR).unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    calibrator.cancel_calibration(handle.id()).unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.outcome, SessionOutcome::CompletedWithErrors);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.class, "cancelled");
    assert!(!failure.phase.is_terminal());
    assert!(store.is_empty());

    assert_eq!(report.restoration.len(), lights.len());
    assert_eq!(report.phases.last().unwrap().phase, Phase::RestoringInitial);
    let first = room.light_state("light.l1").unwrap();
    assert!(first.on);
    assert_eq!(first.brightness, Some(90));
    for light in &lights[1..] {
        assert!(!room.light_state(light).unwrap().on);
    }
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_keeps_previous_model() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonModelStore::new(dir.path()));
    let room = Arc::new(SimulatedRoom::new(office(2)));
    let calibrator =
        Calibrator::new(room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
    let lights = room.description().light_ids();

    let first = calibrator
        .start_calibration(ROOM, &lights, SENSOR)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(first.model_saved);
    let saved = store.load_model(ROOM).unwrap().unwrap();

    // A directory where the temp file should go makes the write fail
    let blocker = store.path_for(ROOM).unwrap().with_extension("json.tmp");
    std::fs::create_dir_all(&blocker).unwrap();

    let second = calibrator
        .start_calibration(ROOM, &lights, SENSOR)
        .unwrap()
        .wait()
        .await
        .unwrap();
    let failure = second.failure.unwrap();
    assert_eq!(failure.phase, Phase::SavingModel);
    assert_eq!(failure.class, "persistence-failure");
    assert_eq!(store.load_model(ROOM).unwrap().unwrap(), saved);
}

#[tokio::test(start_paused = true)]
async fn test_json_store_save_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JsonModelStore::new(dir.path()));
    let room = Arc::new(SimulatedRoom::new(office(3)));
    let calibrator =
        Calibrator::new(room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
    let lights = room.description().light_ids();
    calibrator
        .start_calibration(ROOM, &lights, SENSOR)
        .unwrap()
        .wait()
        .await
        .unwrap();

    let model = store.load_model(ROOM).unwrap().unwrap();
    let path = store.path_for(ROOM).unwrap();
    store.save_model(ROOM, &model).unwrap();
    let first_bytes = std::fs::read(&path).unwrap();
    let first_load = store.load_model(ROOM).unwrap().unwrap();
    store.save_model(ROOM, &model).unwrap();
    let second_bytes = std::fs::read(&path).unwrap();
    let second_load = store.load_model(ROOM).unwrap().unwrap();

    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first_load, second_load);
    assert_eq!(first_load, model);
    assert_eq!(store.list_rooms().unwrap(), vec![ROOM.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_rooms_run_independently() {
    let office_room = Arc::new(SimulatedRoom::new(office(2)));
    let mut kitchen = office(2);
    kitchen.room_id = "kitchen".into();
    kitchen.sensor = "sensor.kitchen_lux".into();
    let kitchen_room = Arc::new(SimulatedRoom::new(kitchen));

    let store = Arc::new(InMemoryModelStore::new());
    let office_cal =
        Calibrator::new(office_room.clone(), store.clone(), CalibrationSettings::default()).unwrap();
    let kitchen_cal =
        Calibrator::new(kitchen_room.clone(), store.clone(), CalibrationSettings::default()).unwrap();

    let a = office_cal
        .start_calibration(ROOM, &office_room.description().light_ids(), SENSOR)
        .unwrap();
    let b = kitchen_cal
        .start_calibration("kitchen", &kitchen_room.description().light_ids(), "sensor.kitchen_lux")
        .unwrap();
    let (a, b) = tokio::join!(a.wait(), b.wait());
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    assert_eq!(store.len(), 2);
}

#[test]
fn test_cli_estimate_states() {
    let states = states_from_specs(&["light.l1".into(), "light.l2=51".into()]).unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states["light.l2"].output_fraction(), 0.2);
    assert!(states_from_specs(&["light.l1=bright".into()]).is_err());
}

#[test]
#[serial]
fn test_cli_paths_follow_luxcal_home() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("LUXCAL_HOME", dir.path());

    let cli = Cli::try_parse_from(["luxcal", "show"]).unwrap();
    let ctx = Context::from_cli(&cli).unwrap();
    assert_eq!(ctx.settings_path, dir.path().join("settings.json"));
    assert_eq!(ctx.models_dir, dir.path().join("models"));

    let cli = Cli::try_parse_from(["luxcal", "show", "--models-dir", "/srv/models"]).unwrap();
    let ctx = Context::from_cli(&cli).unwrap();
    assert_eq!(ctx.models_dir, std::path::PathBuf::from("/srv/models"));

    std::env::remove_var("LUXCAL_HOME");
}

#[test]
#[serial]
fn test_demo_room_loads() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/office.json");
    let room = RoomDescription::load(&path).unwrap();
    assert_eq!(room.room_id, "office");
    assert_eq!(room.lights.len(), 5);
    assert!(room.lights.iter().any(|l| l.faults.unreachable));
}

//! End-to-end run of the bundled baseline scenario.

use habitat_core::clock::DURATION_COMPLETE;
use habitat_core::unit::UnitState;
use habitat_data::load_scenario;
use std::path::PathBuf;

fn baseline_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scenarios/baseline.ron")
}

#[test]
fn baseline_scenario_completes() {
    let scenario = load_scenario(&baseline_path()).unwrap();
    assert_eq!(scenario.units.len(), 7);
    assert_eq!(scenario.events.len(), 7);

    let mut clock = scenario.build().unwrap();
    let report = clock.run_to_end().unwrap();
    let summary = &report.mission_summary;

    assert!(summary.mission_success);
    assert_eq!(summary.end_reason.as_deref(), Some(DURATION_COMPLETE));
    assert_eq!(summary.sols_completed, 30);
    assert_eq!(summary.crew_size, 6);
    assert_eq!(report.event_history.len(), 7);
    assert!(report.event_history.iter().all(|e| e.ended_at.is_some()));
    assert_eq!(report.sol_summaries.len(), 5);

    // The lab's repair countdown runs out, but restarting it is left to the caller.
    assert_eq!(
        clock.units.by_name("Science_Lab").unwrap().state(),
        UnitState::Offline
    );
    assert_eq!(
        clock.units.by_name("OGS").unwrap().state(),
        UnitState::Nominal
    );
}

#[test]
fn baseline_scenario_replays_identically() {
    let scenario = load_scenario(&baseline_path()).unwrap();
    let mut a = scenario.build().unwrap();
    let mut b = scenario.build().unwrap();

    let ra = a.run_to_end().unwrap();
    let rb = b.run_to_end().unwrap();

    assert_eq!(ra, rb);
    assert_eq!(a.state_hash(), b.state_hash());
}

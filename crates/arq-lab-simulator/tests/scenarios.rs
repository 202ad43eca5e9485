//! Runs every scenario shipped under `scenarios/` through the scenario
//! runner, which fails on the first unmet assertion.

use std::path::PathBuf;

use arq_lab_abstract::ArqEvent;
use arq_lab_simulator::RunOutcome;
use arq_lab_simulator::scenario_runner::run_scenario;

fn scenario(name: &str) -> String {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "..", "..", "scenarios", name]
        .iter()
        .collect();
    path.to_string_lossy().into_owned()
}

#[test]
fn clean_channel() {
    let report = run_scenario(&scenario("clean_channel.toml")).unwrap();
    assert_eq!(report.delivered_seqs(), (0..10).collect::<Vec<_>>());
}

#[test]
fn single_loss() {
    let report = run_scenario(&scenario("single_loss.toml")).unwrap();
    assert_eq!(report.summary.retransmissions, 1);
}

#[test]
fn reordered_arrival() {
    let report = run_scenario(&scenario("reordered_arrival.toml")).unwrap();

    let position = |wanted: ArqEvent| {
        report
            .events
            .iter()
            .position(|e| e.event == wanted)
            .unwrap_or_else(|| panic!("missing {wanted:?}"))
    };
    // Frame 3 was buffered before frame 2 showed up, and nothing past 1 was
    // delivered until it did.
    assert!(position(ArqEvent::FrameReceived { seq: 3 }) < position(ArqEvent::FrameReceived { seq: 2 }));
    assert!(position(ArqEvent::FrameReceived { seq: 2 }) < position(ArqEvent::Delivered { seq: 2 }));
    assert!(position(ArqEvent::Delivered { seq: 2 }) < position(ArqEvent::Delivered { seq: 3 }));
}

#[test]
fn lossy_link() {
    let report = run_scenario(&scenario("lossy_link.toml")).unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
}

#[test]
fn dead_link() {
    let report = run_scenario(&scenario("dead_link.toml")).unwrap();
    assert!(report.delivered.is_empty());
}

#[test]
fn report_serializes_to_json() {
    let report = run_scenario(&scenario("single_loss.toml")).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["outcome"]["status"], "completed");
    assert_eq!(json["summary"]["frames_sent"], 11);
    assert_eq!(json["events"][0]["type"], "frame_sent");
    assert_eq!(json["events"][0]["time_ms"], 0);
}

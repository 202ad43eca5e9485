use anyhow::{Context, anyhow};
use arq_lab_abstract::{ArqConfig, ArqEvent, TestAction, TestAssertion, TestScenario};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::engine::{Simulator, default_payload};
use crate::trace::{RunOutcome, SimulationReport};

/// Upper bound on simulated time when a scenario sets no `max_duration`.
pub const DEFAULT_MAX_DURATION_MS: u64 = 600_000;

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    parse_scenario(&content)
}

pub fn parse_scenario(content: &str) -> anyhow::Result<TestScenario> {
    toml::from_str(content).context("Failed to parse scenario")
}

/// Load, run and check the scenario at `scenario_path`.
pub fn run_scenario(scenario_path: &str) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(Path::new(scenario_path))?;
    run_loaded(&scenario, ArqConfig::default())
}

/// Run an already parsed scenario on top of `base`, then check its
/// assertions against the finished run.
pub fn run_loaded(scenario: &TestScenario, base: ArqConfig) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let mut config = base;
    scenario.config.apply_to(&mut config);
    let mut sim = Simulator::new(config).context("Scenario config rejected")?;

    // Configure actions (deterministic faults, aborts)
    let mut abort_at = None;
    for action in &scenario.actions {
        match action {
            TestAction::DropData { seq } => sim.add_drop_data_once(*seq),
            TestAction::DropAck { seq } => sim.add_drop_ack_once(*seq),
            TestAction::ReorderData { seq, extra_ms } => sim.add_reorder_data_once(*seq, *extra_ms),
            TestAction::ReorderAck { seq, extra_ms } => sim.add_reorder_ack_once(*seq, *extra_ms),
            TestAction::AbortAt { time } => abort_at = Some(*time),
        }
    }

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| {
            if let TestAssertion::MaxDuration { ms } = a {
                Some(*ms)
            } else {
                None
            }
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    sim.init();
    while let Some(next) = sim.peek_next_event_time() {
        if abort_at.is_some_and(|t| next > t) {
            sim.abort();
            break;
        }
        if next > max_duration {
            return Err(anyhow!("Test timed out after {} ms", max_duration));
        }
        if !sim.step() {
            break;
        }
    }

    let report = sim.export_report();
    check_assertions(scenario, &report)?;
    Ok(report)
}

pub fn check_assertions(scenario: &TestScenario, report: &SimulationReport) -> anyhow::Result<()> {
    let summary = &report.summary;
    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::DeliveredInOrder => {
                if !report.delivered_in_order() {
                    return Err(anyhow!(
                        "Assertion Failed: delivered {:?}, expected 0..{}",
                        report.delivered_seqs(),
                        report.config.total_frames
                    ));
                }
                if let Some(bad) = report
                    .delivered
                    .iter()
                    .find(|d| d.payload != default_payload(d.seq))
                {
                    return Err(anyhow!(
                        "Assertion Failed: frame {} carried {:?}",
                        bad.seq,
                        bad.payload
                    ));
                }
            }
            TestAssertion::SenderFrameCount { min, max } => {
                check_range("frames sent", summary.frames_sent, *min, *max)?;
            }
            TestAssertion::Retransmissions { min, max } => {
                check_range("retransmissions", summary.retransmissions, *min, *max)?;
            }
            TestAssertion::RetransmittedFrames { seqs } => {
                let expected: BTreeSet<_> = seqs.iter().copied().collect();
                let actual: BTreeSet<_> = report
                    .events
                    .iter()
                    .filter_map(|e| match e.event {
                        ArqEvent::Retransmitted { seq, .. } => Some(seq),
                        _ => None,
                    })
                    .collect();
                if actual != expected {
                    return Err(anyhow!(
                        "Assertion Failed: retransmitted frames {:?}, expected {:?}",
                        actual,
                        expected
                    ));
                }
            }
            TestAssertion::AcksReceived { count } => {
                if summary.sender.acks_received != *count {
                    return Err(anyhow!(
                        "Assertion Failed: sender consumed {} ACKs, expected {}",
                        summary.sender.acks_received,
                        count
                    ));
                }
            }
            TestAssertion::WindowRespected => {
                if summary.peak_outstanding > report.config.window_size as usize {
                    return Err(anyhow!(
                        "Assertion Failed: {} frames outstanding with window {}",
                        summary.peak_outstanding,
                        report.config.window_size
                    ));
                }
            }
            TestAssertion::Completed => {
                if report.outcome != RunOutcome::Completed {
                    return Err(anyhow!(
                        "Assertion Failed: run ended with {:?}",
                        report.outcome
                    ));
                }
            }
            TestAssertion::RetryBudgetExceeded { seq } => match report.outcome {
                RunOutcome::RetryBudgetExceeded { seq: failed, .. }
                    if seq.is_none_or(|expected| expected == failed) => {}
                other => {
                    return Err(anyhow!(
                        "Assertion Failed: expected retry budget failure{}, run ended with {:?}",
                        seq.map(|s| format!(" on frame {s}")).unwrap_or_default(),
                        other
                    ));
                }
            },
            TestAssertion::MaxDuration { ms } => {
                if summary.duration_ms > *ms {
                    return Err(anyhow!(
                        "Assertion Failed: run took {} ms, limit {} ms",
                        summary.duration_ms,
                        ms
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_range(what: &str, value: u32, min: u32, max: Option<u32>) -> anyhow::Result<()> {
    if value < min {
        return Err(anyhow!(
            "Assertion Failed: {} was {}, expected min {}",
            what,
            value,
            min
        ));
    }
    if let Some(max) = max
        && value > max
    {
        return Err(anyhow!(
            "Assertion Failed: {} was {}, expected max {}",
            what,
            value,
            max
        ));
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use arq_lab_abstract::{ArqConfig, ArqConfigOverride};
use arq_lab_simulator::{
    RealtimeSimulator, RunOutcome, SimulationReport, Simulator, scenario_runner,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Selective Repeat ARQ simulator")]
struct Args {
    /// Base configuration file (TOML). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a scenario and check its assertions.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Drive the run with wall-clock timers instead of simulated time.
    #[arg(long, default_value_t = false)]
    realtime: bool,

    /// Abort a simulated run that is still going at this time.
    #[arg(long)]
    max_duration_ms: Option<u64>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    #[arg(long)]
    total_frames: Option<u32>,
    #[arg(long)]
    window_size: Option<u32>,
    #[arg(long)]
    loss_probability: Option<f64>,
    #[arg(long)]
    reorder_probability: Option<f64>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    delay_min_ms: Option<u64>,
    #[arg(long)]
    delay_max_ms: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    /// Give up on a frame after this many retransmissions.
    #[arg(long)]
    max_retransmissions: Option<u32>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("arq-lab-sim starting…");

    if args.scenario.is_some() && args.realtime {
        anyhow::bail!("--scenario and --realtime cannot be used together");
    }

    let config = args.build_config()?;

    let report = if let Some(path) = &args.scenario {
        let scenario = scenario_runner::load_scenario(path)?;
        let report = scenario_runner::run_loaded(&scenario, config)
            .with_context(|| format!("Scenario '{}' failed", scenario.name))?;
        info!("Scenario '{}' passed", scenario.name);
        report
    } else if args.realtime {
        run_realtime(config)?
    } else {
        run_simulated(config, args.max_duration_ms)?
    };

    print_summary(&report);

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    if args.scenario.is_none() && report.outcome != RunOutcome::Completed {
        anyhow::bail!("run did not complete: {:?}", report.outcome);
    }
    Ok(())
}

impl Args {
    fn build_config(&self) -> Result<ArqConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ArqConfig::default(),
        };
        self.overrides().apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn overrides(&self) -> ArqConfigOverride {
        ArqConfigOverride {
            total_frames: self.total_frames,
            window_size: self.window_size,
            loss_probability: self.loss_probability,
            reorder_probability: self.reorder_probability,
            timeout_ms: self.timeout_ms,
            delay_min_ms: self.delay_min_ms,
            delay_max_ms: self.delay_max_ms,
            seed: self.seed,
            max_retransmissions: self.max_retransmissions,
            ..Default::default()
        }
    }
}

fn run_simulated(config: ArqConfig, max_duration_ms: Option<u64>) -> Result<SimulationReport> {
    info!("Starting headless simulation…");
    let mut sim = Simulator::new(config)?;
    let outcome = match max_duration_ms {
        Some(deadline) => sim.run_until(deadline),
        None => sim.run_until_complete(),
    };
    info!("Simulation finished: {:?}", outcome);
    Ok(sim.export_report())
}

fn run_realtime(config: ArqConfig) -> Result<SimulationReport> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let sim = RealtimeSimulator::new(config).context("Invalid configuration")?;
        let signal = sim.abort_signal();
        let run = tokio::spawn(sim.run());
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, aborting run");
                signal.abort();
            }
        });
        run.await.context("Real-time run panicked")
    })
}

fn print_summary(report: &SimulationReport) {
    let s = &report.summary;
    info!(
        "Outcome: {:?} | frames sent: {} | retransmissions: {} | delivered: {}/{} | duration: {} ms",
        report.outcome,
        s.frames_sent,
        s.retransmissions,
        s.delivered,
        report.config.total_frames,
        s.duration_ms
    );
}

fn load_config(path: &Path) -> Result<ArqConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ArqConfig = toml::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "arq-lab-sim",
            "--window-size",
            "8",
            "--loss-probability",
            "0",
            "--max-retransmissions",
            "5",
        ])
        .unwrap();
        let config = args.build_config().unwrap();
        assert_eq!(config.window_size, 8);
        assert_eq!(config.loss_probability, 0.0);
        assert_eq!(config.max_retransmissions, Some(5));
        assert_eq!(config.total_frames, ArqConfig::default().total_frames);
    }

    #[test]
    fn invalid_flags_are_rejected() {
        let args = Args::try_parse_from(["arq-lab-sim", "--reorder-probability", "2.0"]).unwrap();
        assert!(args.build_config().is_err());
    }
}

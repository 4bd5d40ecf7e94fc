//! Shared plumbing for the quorum command-line runner.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use quorum_core::{RunSummary, StepObserver, StepReport, Swarm, SwarmConfig};
use tracing::info;

pub mod sweep;

pub use sweep::{RunRecord, SweepGrid, run_sweep};

/// Load a configuration file, or the reference parameters when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<SwarmConfig> {
    let Some(path) = path else {
        return Ok(SwarmConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    SwarmConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

/// Logs a progress line every `interval` steps.
#[derive(Debug)]
pub struct ProgressLogger {
    interval: u64,
}

impl ProgressLogger {
    pub fn new(interval: u64) -> Self {
        Self { interval }
    }
}

impl StepObserver for ProgressLogger {
    fn on_step(&mut self, report: &StepReport<'_>) {
        let tick = report.events.tick.0;
        if report.events.done || (self.interval > 0 && tick.is_multiple_of(self.interval)) {
            info!(
                tick,
                done = report.done,
                dead = report.dead,
                tallies = ?report.tallies,
                finished = report.events.done,
                "progress"
            );
        }
    }
}

/// Step budget for a simulated duration, if one is set.
pub fn step_budget(config: &SwarmConfig, total_time: Option<f32>) -> Option<u64> {
    total_time.map(|time| (time / config.dt).ceil().max(0.0) as u64)
}

/// Run one configuration to completion or budget.
pub fn run_single(
    config: SwarmConfig,
    max_steps: Option<u64>,
    progress_interval: u64,
) -> Result<RunSummary> {
    let seed = config.rng_seed;
    let mut swarm = Swarm::with_observer(config, Box::new(ProgressLogger::new(progress_interval)))
        .with_context(|| format!("failed to initialise swarm for seed {seed}"))?;
    Ok(swarm.run_until_done(max_steps))
}

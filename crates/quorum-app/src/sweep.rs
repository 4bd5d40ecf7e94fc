//! Cartesian parameter sweeps, one independent swarm per point.

use std::io::Write;

use anyhow::{Context, Result};
use quorum_core::{HazardLayout, RunSummary, Swarm, SwarmConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Override lists. An empty list keeps the base configuration's value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepGrid {
    pub seeds: Vec<u64>,
    pub agents: Vec<usize>,
    pub targets: Vec<usize>,
    pub hazards: Vec<HazardLayout>,
    pub lifespans: Vec<f32>,
    pub fovs: Vec<f32>,
    pub ranges: Vec<f32>,
    pub speeds: Vec<f32>,
    pub high_quality_shares: Vec<f32>,
}

/// Parameters of one sweep point plus its outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub seed: u64,
    pub num_agents: usize,
    pub num_targets: usize,
    pub hazards: HazardLayout,
    pub lifespan: f32,
    pub fov: f32,
    pub visual_range: f32,
    pub max_speed: f32,
    pub high_quality_share: f32,
    pub summary: RunSummary,
}

/// Cross `configs` with every value of one axis. An empty axis leaves them untouched.
fn vary<T: Copy>(
    configs: Vec<SwarmConfig>,
    values: &[T],
    set: impl Fn(&mut SwarmConfig, T),
) -> Vec<SwarmConfig> {
    if values.is_empty() {
        return configs;
    }
    let set = &set;
    configs
        .into_iter()
        .flat_map(|config| {
            values.iter().map(move |&value| {
                let mut next = config.clone();
                set(&mut next, value);
                next
            })
        })
        .collect()
}

impl SweepGrid {
    /// Every configuration in the product, in a stable order with seeds varying fastest.
    pub fn expand(&self, base: &SwarmConfig) -> Vec<SwarmConfig> {
        let configs = vec![base.clone()];
        let configs = vary(configs, &self.high_quality_shares, |c, v| {
            c.layout.high_quality_share = v;
        });
        let configs = vary(configs, &self.speeds, |c, v| c.max_speed = v);
        let configs = vary(configs, &self.ranges, |c, v| c.visual_range = v);
        let configs = vary(configs, &self.fovs, |c, v| c.fov = v);
        let configs = vary(configs, &self.lifespans, |c, v| c.lifespan = v);
        let configs = vary(configs, &self.hazards, |c, v| c.layout.hazards = v);
        let configs = vary(configs, &self.targets, |c, v| c.layout.num_targets = v);
        let configs = vary(configs, &self.agents, |c, v| c.num_agents = v);
        vary(configs, &self.seeds, |c, v| c.rng_seed = v)
    }
}

fn run_point(config: SwarmConfig, max_steps: Option<u64>) -> Result<RunRecord> {
    let mut swarm = Swarm::new(config.clone())
        .with_context(|| format!("sweep point with seed {} is invalid", config.rng_seed))?;
    let summary = swarm.run_until_done(max_steps);
    debug!(
        seed = config.rng_seed,
        steps = summary.steps,
        finished = summary.finished,
        "sweep point finished"
    );
    Ok(RunRecord {
        seed: config.rng_seed,
        num_agents: config.num_agents,
        num_targets: config.layout.num_targets,
        hazards: config.layout.hazards,
        lifespan: config.lifespan,
        fov: config.fov,
        visual_range: config.visual_range,
        max_speed: config.max_speed,
        high_quality_share: config.layout.high_quality_share,
        summary,
    })
}

/// Run every point of `grid` in parallel and write one JSON line per run to `out`,
/// in grid order. Returns the number of runs written.
pub fn run_sweep<W: Write>(
    base: &SwarmConfig,
    grid: &SweepGrid,
    max_steps: Option<u64>,
    out: &mut W,
) -> Result<usize> {
    let configs = grid.expand(base);
    for config in &configs {
        config
            .validate()
            .with_context(|| format!("sweep point with seed {} is invalid", config.rng_seed))?;
    }
    info!(runs = configs.len(), "starting sweep");

    let records: Vec<RunRecord> = configs
        .into_par_iter()
        .map(|config| run_point(config, max_steps))
        .collect::<Result<_>>()?;
    for record in &records {
        serde_json::to_writer(&mut *out, record).context("failed to encode run record")?;
        writeln!(out).context("failed to write run record")?;
    }
    let finished = records.iter().filter(|r| r.summary.finished).count();
    info!(runs = records.len(), finished, "sweep complete");
    Ok(records.len())
}

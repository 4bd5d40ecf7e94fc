use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quorum_app::{ProgressLogger, SweepGrid, load_config, run_single, run_sweep, step_budget};
use quorum_core::{HazardLayout, Swarm};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "quorum",
    version,
    about = "Run quorum-sensing swarm decisions and parameter sweeps"
)]
struct Cli {
    /// JSON configuration file; missing fields take the reference defaults.
    #[arg(long, short, env = "QUORUM_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Stop after this much simulated time instead of waiting for every agent to finish.
    #[arg(long, global = true)]
    total_time: Option<f32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single swarm and print its summary as JSON.
    Run {
        /// Override the configured seed.
        #[arg(long)]
        seed: Option<u64>,
        /// Log progress every N steps (0 disables).
        #[arg(long, env = "QUORUM_PROGRESS", default_value_t = 1000)]
        progress: u64,
        /// Print the final agent snapshots alongside the summary.
        #[arg(long)]
        agents: bool,
    },
    /// Run the cartesian product of the given overrides, one JSON line per run.
    Sweep {
        #[arg(long, value_delimiter = ',')]
        seeds: Vec<u64>,
        #[arg(long, value_delimiter = ',')]
        agents: Vec<usize>,
        #[arg(long, value_delimiter = ',')]
        targets: Vec<usize>,
        /// Hazard layouts: none, partial or full.
        #[arg(long, value_delimiter = ',', value_parser = parse_hazards)]
        hazards: Vec<HazardLayout>,
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        lifespans: Vec<f32>,
        #[arg(long, value_delimiter = ',')]
        fovs: Vec<f32>,
        #[arg(long, value_delimiter = ',')]
        ranges: Vec<f32>,
        #[arg(long, value_delimiter = ',')]
        speeds: Vec<f32>,
        /// Share of high-quality targets.
        #[arg(long, value_delimiter = ',')]
        shares: Vec<f32>,
        /// Worker threads (defaults to one per core).
        #[arg(long, env = "QUORUM_THREADS")]
        threads: Option<usize>,
    },
}

fn parse_hazards(raw: &str) -> Result<HazardLayout, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" => Ok(HazardLayout::None),
        "partial" => Ok(HazardLayout::Partial),
        "full" => Ok(HazardLayout::Full),
        other => Err(format!(
            "unknown hazard layout `{other}` (expected none, partial or full)"
        )),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            seed,
            progress,
            agents,
        } => {
            if let Some(seed) = seed {
                config.rng_seed = seed;
            }
            let max_steps = step_budget(&config, cli.total_time);
            info!(seed = config.rng_seed, ?max_steps, "starting run");
            let summary = if agents {
                let mut swarm =
                    Swarm::with_observer(config, Box::new(ProgressLogger::new(progress)))
                        .context("failed to initialise swarm")?;
                let summary = swarm.run_until_done(max_steps);
                let snapshots = serde_json::json!({
                    "summary": summary,
                    "agents": swarm.agent_snapshots(),
                    "targets": swarm.target_snapshots(),
                    "hazards": swarm.hazard_snapshots(),
                });
                print_json(&snapshots)?;
                summary
            } else {
                let summary = run_single(config, max_steps, progress)?;
                print_json(&summary)?;
                summary
            };
            info!(
                steps = summary.steps,
                finished = summary.finished,
                done = summary.done,
                dead = summary.dead,
                tallies = ?summary.tallies,
                "run complete"
            );
        }
        Command::Sweep {
            seeds,
            agents,
            targets,
            hazards,
            lifespans,
            fovs,
            ranges,
            speeds,
            shares,
            threads,
        } => {
            if let Some(threads) = threads {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("failed to configure sweep thread pool")?;
            }
            let grid = SweepGrid {
                seeds,
                agents,
                targets,
                hazards,
                lifespans,
                fovs,
                ranges,
                speeds,
                high_quality_shares: shares,
            };
            let max_steps = step_budget(&config, cli.total_time);
            let stdout = io::stdout();
            let mut out = stdout.lock();
            run_sweep(&config, &grid, max_steps, &mut out)?;
            out.flush().context("failed to flush sweep output")?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to format output JSON")?;
    println!("{text}");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}

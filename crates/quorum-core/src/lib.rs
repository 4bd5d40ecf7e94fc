//! Core types for the quorum-sensing swarm.
//!
//! A [`Swarm`] owns agents, targets, hazards and one behavior tree per agent.
//! Each [`Swarm::step`] ticks every live agent's tree in index order, then
//! rolls mortality for it. All randomness flows through one seeded generator,
//! so identical configurations replay bit-identically.

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, new_key_type};
use thiserror::Error;

pub mod agent;
pub mod config;
pub mod decision;
pub mod geometry;
pub mod layout;
pub mod perception;
pub mod swarm;
pub mod tree;
pub mod waypoint;

pub use agent::{Agent, AgentState, BoundError, CensusEntry};
pub use config::{DwellTime, HazardLayout, LayoutConfig, SwarmConfig};
pub use geometry::Position;
pub use layout::{Environment, Hazard, Home, Target};
pub use perception::{Percepts, Viewpoint};
pub use swarm::{Swarm, init, step};
pub use tree::{Action, Transition, WalkMode};

new_key_type! {
    /// Stable handle for agents.
    pub struct AgentId;
    /// Stable handle for targets.
    pub struct TargetId;
    /// Stable handle for hazards.
    pub struct HazardId;
}

/// Side data keyed by agent.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Errors raised while constructing a swarm.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Configuration text could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Simulation clock (steps processed since start).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Counters gathered while processing one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Stochastic phase transitions that fired.
    pub transitions: usize,
    /// Peers whose `recruited_to` was set.
    pub recruitments: usize,
    /// Agents that reached a final verdict.
    pub verdicts: usize,
    /// Agents that rolled back to uncommitted.
    pub abandonments: usize,
    pub deaths: usize,
    /// Retry loops that hit their cap.
    pub exhausted_retries: usize,
    /// Corrections that met a zero-length vector.
    pub degenerate_geometry: usize,
    /// Whether every agent is Done or Dead after this step.
    pub done: bool,
}

/// Read-only per-agent view for renderers and exporters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub position: Position,
    pub heading: f32,
    pub state: AgentState,
    pub time_in_state: f32,
    pub at_target: bool,
    pub quality_of_committed: f32,
    pub census: usize,
    pub committed_target: Option<TargetId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSnapshot {
    pub id: TargetId,
    pub position: Position,
    pub radius: f32,
    pub quality: f32,
    pub num_agents_committed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HazardSnapshot {
    pub id: HazardId,
    pub position: Position,
    pub radius: f32,
}

/// Outcome of a run, consumed by sweep and export layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub seed: u64,
    pub steps: u64,
    pub finished: bool,
    pub agents: usize,
    pub done: usize,
    pub dead: usize,
    /// Final verdict count per target, in layout order.
    pub tallies: Vec<u32>,
    pub qualities: Vec<f32>,
}

/// Per-step digest handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport<'a> {
    pub events: &'a TickEvents,
    pub done: usize,
    pub dead: usize,
    pub tallies: &'a [u32],
}

/// Hook invoked after every step.
pub trait StepObserver: Send {
    fn on_step(&mut self, report: &StepReport<'_>);
}

/// Observer that ignores every step.
#[derive(Debug, Default)]
pub struct NullObserver;

impl StepObserver for NullObserver {
    fn on_step(&mut self, _report: &StepReport<'_>) {}
}

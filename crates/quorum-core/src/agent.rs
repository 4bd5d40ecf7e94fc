//! Per-agent decision state and commitment bookkeeping.

use crate::geometry::Position;
use crate::{AgentId, HazardId, TargetId};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Decision phase of an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum AgentState {
    #[default]
    Uncommitted,
    Exploring,
    Assessing,
    Recruiting,
    Surveying,
    Done,
    Dead,
}

impl AgentState {
    pub const ALL: [Self; 7] = [
        Self::Uncommitted,
        Self::Exploring,
        Self::Assessing,
        Self::Recruiting,
        Self::Surveying,
        Self::Done,
        Self::Dead,
    ];

    /// Done and Dead agents are never ticked again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Dead)
    }

    /// Phases that hold a committed target.
    #[must_use]
    pub const fn holds_commitment(self) -> bool {
        matches!(
            self,
            Self::Assessing | Self::Recruiting | Self::Surveying | Self::Done
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uncommitted => "uncommitted",
            Self::Exploring => "exploring",
            Self::Assessing => "assessing",
            Self::Recruiting => "recruiting",
            Self::Surveying => "surveying",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map edge violated by a queued waypoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BoundError {
    Left,
    Right,
    Top,
    Bottom,
}

impl BoundError {
    /// Unit normal pointing back into the map.
    #[must_use]
    pub const fn inward_normal(self) -> Position {
        match self {
            Self::Top => Position::new(0.0, 1.0),
            Self::Bottom => Position::new(0.0, -1.0),
            Self::Left => Position::new(1.0, 0.0),
            Self::Right => Position::new(-1.0, 0.0),
        }
    }
}

/// Census record for a peer seen at the target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CensusEntry {
    pub agent: AgentId,
    /// Seconds since co-presence was last confirmed.
    pub age: f32,
}

/// Full per-agent state. Cross references are weak handles into the swarm tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub position: Position,
    /// Radians in `[0, 2π)`.
    pub heading: f32,
    pub speed: f32,
    pub state: AgentState,
    pub time_in_state: f32,
    pub waypoints: VecDeque<Position>,
    pub committed_target: Option<TargetId>,
    pub quality_of_committed: f32,
    pub at_target: bool,
    pub agents_at_target: Vec<CensusEntry>,
    pub avoided_target: Option<TargetId>,
    /// Written by recruiting peers.
    pub recruited_to: Option<TargetId>,
    pub attempted_to_recruit: HashSet<AgentId>,
    pub neighbors: Vec<AgentId>,
    pub known_targets: Vec<TargetId>,
    pub known_hazards: Vec<HazardId>,
    pub threatening_hazard: Option<HazardId>,
    pub threatening_neighbor: Option<AgentId>,
    pub bound_error: Option<BoundError>,
}

impl Agent {
    /// A fresh uncommitted agent.
    #[must_use]
    pub fn new(position: Position, heading: f32, speed: f32) -> Self {
        Self {
            position,
            heading,
            speed,
            state: AgentState::Uncommitted,
            time_in_state: 0.0,
            waypoints: VecDeque::with_capacity(1),
            committed_target: None,
            quality_of_committed: 0.0,
            at_target: false,
            agents_at_target: Vec::new(),
            avoided_target: None,
            recruited_to: None,
            attempted_to_recruit: HashSet::new(),
            neighbors: Vec::new(),
            known_targets: Vec::new(),
            known_hazards: Vec::new(),
            threatening_hazard: None,
            threatening_neighbor: None,
            bound_error: None,
        }
    }

    /// Switch phase and restart the dwell clock.
    pub fn enter(&mut self, state: AgentState) {
        self.state = state;
        self.time_in_state = 0.0;
    }

    /// Drop the current commitment and fall back to `Uncommitted`.
    pub fn abandon_commitment(&mut self) {
        self.committed_target = None;
        self.quality_of_committed = 0.0;
        self.agents_at_target.clear();
        self.at_target = false;
        self.enter(AgentState::Uncommitted);
    }

    /// Remember the committed target as avoided, then abandon it.
    pub fn reject_commitment(&mut self) {
        self.avoided_target = self.committed_target;
        self.abandon_commitment();
    }

    pub fn die(&mut self) {
        self.committed_target = None;
        self.at_target = false;
        self.waypoints.clear();
        self.enter(AgentState::Dead);
    }

    /// Live census size.
    #[must_use]
    pub fn census_len(&self) -> usize {
        self.agents_at_target.len()
    }

    /// Whether any validation error is recorded for the queued waypoint.
    #[must_use]
    pub fn has_violation(&self) -> bool {
        self.bound_error.is_some()
            || self.threatening_hazard.is_some()
            || self.threatening_neighbor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_phases_are_exactly_four() {
        let holding: Vec<AgentState> = AgentState::ALL
            .into_iter()
            .filter(|state| state.holds_commitment())
            .collect();
        assert_eq!(
            holding,
            vec![
                AgentState::Assessing,
                AgentState::Recruiting,
                AgentState::Surveying,
                AgentState::Done
            ]
        );
    }

    #[test]
    fn abandoning_clears_commitment_state() {
        let mut agent = Agent::new(Position::new(1.0, 1.0), 0.0, 0.2);
        agent.state = AgentState::Surveying;
        agent.time_in_state = 12.0;
        agent.quality_of_committed = 0.75;
        agent.at_target = true;
        agent.abandon_commitment();
        assert_eq!(agent.state, AgentState::Uncommitted);
        assert!(agent.committed_target.is_none());
        assert_eq!(agent.time_in_state, 0.0);
        assert!(!agent.at_target);
    }

    #[test]
    fn bound_normals_point_inward() {
        assert_eq!(BoundError::Left.inward_normal(), Position::new(1.0, 0.0));
        assert_eq!(BoundError::Top.inward_normal(), Position::new(0.0, 1.0));
    }
}

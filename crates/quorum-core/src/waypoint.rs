//! Waypoint generation, validation and correction leaves.
//!
//! A walk generates one candidate waypoint, validates it against hazards,
//! neighbors and the map bounds, nudges it with `fix` until it validates,
//! and finally commits it as the agent's new position.

use crate::agent::{AgentState, BoundError};
use crate::config::SwarmConfig;
use crate::geometry::{
    Position, angle_off_heading, bearing, heading_vector, turn_sign, wrap_signed_angle,
    wrap_unsigned_angle,
};
use crate::tree::{AgentTick, WalkMode};
use ordered_float::OrderedFloat;
use quorum_bt::Status;
use rand::Rng;
use tracing::debug;

/// First violated edge in Left, Right, Top, Bottom order.
#[must_use]
pub fn bound_violation(waypoint: Position, config: &SwarmConfig) -> Option<BoundError> {
    let margin = config.hazard_clearance;
    if waypoint.x <= margin {
        Some(BoundError::Left)
    } else if waypoint.x >= config.map_width - margin {
        Some(BoundError::Right)
    } else if waypoint.y <= margin {
        Some(BoundError::Top)
    } else if waypoint.y >= config.map_height - margin {
        Some(BoundError::Bottom)
    } else {
        None
    }
}

/// Unit vector from `threat` toward `waypoint`, falling back to the heading
/// when the two coincide. The flag reports the fallback.
fn push_away(waypoint: Position, threat: Position, heading: f32) -> (Position, bool) {
    match (waypoint - threat).normalized() {
        Some(unit) => (unit, false),
        None => (heading_vector(heading), true),
    }
}

impl AgentTick<'_> {
    /// Queue a waypoint one step ahead after a random, optionally anchored, turn.
    pub(crate) fn generate(&mut self, mode: WalkMode) -> Status {
        let config = self.config;
        let random_turn = self.rng.random_range(-1.0_f32..1.0) * config.max_rot_speed;
        let home = self.environment.home.position;
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        let target = agent
            .committed_target
            .and_then(|id| self.environment.targets.get(id));

        let anchor = match mode {
            WalkMode::Wander => {
                agent.at_target = false;
                None
            }
            WalkMode::Home => {
                agent.at_target = false;
                Some((home, config.home_clearance))
            }
            WalkMode::Target => target.map(|target| {
                let dist = agent.position.distance(target.position);
                if dist < config.target_clearance || dist < target.radius {
                    agent.at_target = true;
                }
                (target.position, config.target_clearance)
            }),
        };

        let mut turn = random_turn;
        if let Some((anchor, normal_distance)) = anchor {
            let offset = anchor - agent.position;
            let toward = wrap_signed_angle(bearing(offset) - agent.heading);
            // Far from the anchor the pull dominates; near it the walk is random.
            let weight = (offset.length() / normal_distance).powi(2);
            turn = (random_turn + weight * toward) / (1.0 + weight);
        }

        agent.heading = wrap_unsigned_angle(agent.heading + turn * config.dt);
        let next = agent.position + heading_vector(agent.heading) * (agent.speed * config.dt);
        agent.waypoints.push_back(next);
        Status::Success
    }

    /// Head straight for the committed target; fails once it is reached.
    pub(crate) fn generate_direct(&mut self) -> Status {
        let config = self.config;
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        if agent.state != AgentState::Assessing {
            return Status::Failure;
        }
        let Some(target) = agent
            .committed_target
            .and_then(|id| self.environment.targets.get(id))
        else {
            return Status::Failure;
        };
        let offset = target.position - agent.position;
        let dist = offset.length();
        if dist < config.target_clearance || dist < target.radius {
            agent.at_target = true;
            return Status::Failure;
        }
        let Some(unit) = offset.normalized() else {
            agent.at_target = true;
            return Status::Failure;
        };
        agent.heading = wrap_unsigned_angle(bearing(offset));
        agent
            .waypoints
            .push_back(agent.position + unit * (agent.speed * config.dt));
        Status::Success
    }

    /// Record every violation of the queued waypoint; succeeds when there is none.
    pub(crate) fn validate(&mut self) -> Status {
        let config = self.config;
        let Some(agent) = self.agents.get(self.id) else {
            return Status::Failure;
        };
        let Some(&waypoint) = agent.waypoints.front() else {
            return Status::Success;
        };

        let hazard = agent
            .known_hazards
            .iter()
            .filter_map(|&id| {
                let hazard = self.environment.hazards.get(id)?;
                let dist = waypoint.distance(hazard.position);
                (dist <= hazard.radius + config.hazard_clearance).then_some((id, dist))
            })
            .min_by_key(|&(_, dist)| OrderedFloat(dist))
            .map(|(id, _)| id);

        // min_by_key keeps the first of equal minima, so encounter order breaks ties.
        let neighbor = agent
            .neighbors
            .iter()
            .filter_map(|&id| {
                let other = self.agents.get(id)?;
                if other.state.is_terminal() {
                    return None;
                }
                let dist = waypoint.distance(other.position);
                (dist <= config.neighbor_clearance).then_some((id, dist))
            })
            .min_by_key(|&(_, dist)| OrderedFloat(dist))
            .map(|(id, _)| id);

        let bound = bound_violation(waypoint, config);

        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        agent.threatening_hazard = hazard;
        agent.threatening_neighbor = neighbor;
        agent.bound_error = bound;
        if agent.has_violation() {
            Status::Failure
        } else {
            Status::Success
        }
    }

    /// Apply the single highest-priority correction: bounds, then hazard, then neighbor.
    pub(crate) fn fix(&mut self) -> Status {
        let config = self.config;
        let Some(agent) = self.agents.get(self.id) else {
            return Status::Failure;
        };
        let Some(&waypoint) = agent.waypoints.front() else {
            return Status::Success;
        };
        let turn = config.max_rot_speed * config.dt;
        let mut degenerate = false;

        let (push, heading) = if let Some(bound) = agent.bound_error {
            let inward = bound.inward_normal();
            let toward_wall = inward * -1.0;
            let angle = angle_off_heading(agent.heading, toward_wall).unwrap_or(0.0);
            (inward, agent.heading + turn_sign(angle) * turn)
        } else if let Some(hazard) = agent
            .threatening_hazard
            .and_then(|id| self.environment.hazards.get(id))
        {
            let (push, fallback) = push_away(waypoint, hazard.position, agent.heading);
            let angle = angle_off_heading(agent.heading, hazard.position - agent.position);
            degenerate = fallback || angle.is_none();
            (
                push,
                agent.heading + turn_sign(angle.unwrap_or(0.0)) * turn,
            )
        } else if let Some(neighbor) = agent
            .threatening_neighbor
            .and_then(|id| self.agents.get(id))
        {
            let (push, fallback) = push_away(waypoint, neighbor.position, agent.heading);
            let offset = neighbor.position - agent.position;
            degenerate = fallback || offset.is_zero();
            let angle = wrap_signed_angle(bearing(offset) - agent.heading);
            (push, agent.heading - turn_sign(angle) * turn)
        } else {
            return Status::Success;
        };

        if degenerate {
            self.events.degenerate_geometry += 1;
            debug!(agent = ?self.id, "correction met a zero-length vector, using heading");
        }
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        if let Some(front) = agent.waypoints.front_mut() {
            *front += push * (agent.speed * config.dt);
        }
        agent.heading = wrap_unsigned_angle(heading);
        Status::Success
    }

    /// Move to the queued waypoint.
    pub(crate) fn commit(&mut self) -> Status {
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        match agent.waypoints.pop_front() {
            Some(next) => {
                agent.position = next;
                Status::Success
            }
            None => Status::Failure,
        }
    }
}

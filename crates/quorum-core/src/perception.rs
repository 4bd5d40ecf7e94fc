//! Per-tick visibility queries.
//!
//! A candidate is visible when it passes a cheap axis-aligned pre-filter,
//! lies within the Euclidean threshold and sits inside the field of view.
//! Both boundaries are inclusive. Extended bodies widen the threshold by
//! their radius. Results keep candidate order, which later tie-breaks rely on.

use crate::agent::{Agent, AgentState};
use crate::geometry::{Position, angle_off_heading};
use crate::layout::Environment;
use crate::{AgentId, HazardId, TargetId};
use slotmap::SlotMap;

/// Where an observer stands and how far it sees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub position: Position,
    pub heading: f32,
    pub range: f32,
    pub fov: f32,
}

impl Viewpoint {
    /// Distance to a body of `radius` at `at`, if it is visible.
    #[must_use]
    pub fn sees(&self, at: Position, radius: f32) -> Option<f32> {
        let threshold = self.range + radius;
        let delta = at - self.position;
        if delta.x.abs() > threshold || delta.y.abs() > threshold {
            return None;
        }
        // Coincident bodies have no bearing.
        if delta.is_zero() {
            return None;
        }
        let dist = delta.length();
        if dist > threshold {
            return None;
        }
        let angle = angle_off_heading(self.heading, delta)?;
        (angle <= 0.5 * self.fov).then_some(dist)
    }

    /// Keys of the candidates this viewpoint sees, in candidate order.
    pub fn visible<K, I>(&self, candidates: I) -> Vec<K>
    where
        I: IntoIterator<Item = (K, Position, f32)>,
    {
        candidates
            .into_iter()
            .filter(|&(_, at, radius)| self.sees(at, radius).is_some())
            .map(|(key, _, _)| key)
            .collect()
    }
}

/// Everything one agent perceives this tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Percepts {
    pub neighbors: Vec<AgentId>,
    pub targets: Vec<TargetId>,
    pub hazards: Vec<HazardId>,
}

/// Compute what `observer` sees. Dead peers are invisible; Done peers stay
/// visible so they keep counting toward censuses at their site.
#[must_use]
pub fn perceive(
    observer: AgentId,
    agents: &SlotMap<AgentId, Agent>,
    environment: &Environment,
    range: f32,
    fov: f32,
) -> Percepts {
    let Some(me) = agents.get(observer) else {
        return Percepts::default();
    };
    let view = Viewpoint {
        position: me.position,
        heading: me.heading,
        range,
        fov,
    };
    Percepts {
        neighbors: view.visible(
            agents
                .iter()
                .filter(|(id, other)| *id != observer && other.state != AgentState::Dead)
                .map(|(id, other)| (id, other.position, 0.0)),
        ),
        targets: visible_targets(&view, environment),
        hazards: view.visible(
            environment
                .hazards
                .iter()
                .map(|(id, hazard)| (id, hazard.position, hazard.radius)),
        ),
    }
}

/// Targets visible from `view`, in layout order.
#[must_use]
pub fn visible_targets(view: &Viewpoint, environment: &Environment) -> Vec<TargetId> {
    view.visible(
        environment
            .targets
            .iter()
            .map(|(id, target)| (id, target.position, target.radius)),
    )
}

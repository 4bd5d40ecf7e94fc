//! Fixed per-agent behavior tree and the runner that executes its leaves.
//!
//! ```text
//! root       = Parallel[Detect, Retry(roam)]
//! roam       = Sequence[pre_commit, commit]
//! pre_commit = Sequence[Parallel[IsRecruited, explore], assess]
//! explore    = Sequence[Roll(U->E), Parallel[Repeat(walk wander), CheckForTarget]]
//! assess     = Sequence[Inverter(Repeat(go to target)), QualityLive]
//! commit     = Sequence[Retry(bounce), Verdict]
//! bounce     = Selector[Inverter(QualityRemembered), Inverter(recruit), survey]
//! recruit    = Parallel[Roll(R->S), Broadcast, Repeat(walk home)]
//! survey     = Parallel[Inverter(Roll(S->R)), Repeat(walk target), Census]
//! walk       = Sequence[Generate, Retry(Selector[Validate, Inverter(Fix)]), Commit]
//! ```

use crate::agent::{Agent, AgentState};
use crate::config::SwarmConfig;
use crate::layout::Environment;
use crate::perception::perceive;
use crate::{AgentId, TickEvents};
use quorum_bt::{ActionRunner, Node, Status};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::warn;

/// Stochastic phase changes rolled from inside the tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Transition {
    UncommittedToExploring,
    RecruitingToSurveying,
    SurveyingToRecruiting,
}

impl Transition {
    #[must_use]
    pub const fn from_state(self) -> AgentState {
        match self {
            Self::UncommittedToExploring => AgentState::Uncommitted,
            Self::RecruitingToSurveying => AgentState::Recruiting,
            Self::SurveyingToRecruiting => AgentState::Surveying,
        }
    }

    #[must_use]
    pub const fn to_state(self) -> AgentState {
        match self {
            Self::UncommittedToExploring => AgentState::Exploring,
            Self::RecruitingToSurveying => AgentState::Surveying,
            Self::SurveyingToRecruiting => AgentState::Recruiting,
        }
    }
}

/// Anchor a generated waypoint is biased toward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WalkMode {
    Wander,
    Home,
    Target,
}

/// Leaf actions of the agent tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Action {
    /// Refresh neighbors, targets and hazards. Always running.
    Detect,
    /// Succeeds while the agent is in the given phase.
    InPhase(AgentState),
    Roll(Transition),
    IsRecruited,
    CheckForTarget,
    Generate(WalkMode),
    GenerateDirect,
    Validate,
    Fix,
    Commit,
    QualityLive,
    QualityRemembered,
    Broadcast,
    Census,
    Verdict,
}

fn walk(mode: WalkMode, retry_cap: u32) -> Node<Action> {
    let mut steps = Vec::with_capacity(4);
    if mode == WalkMode::Target {
        steps.push(Node::leaf(Action::InPhase(AgentState::Surveying)));
    }
    steps.push(Node::leaf(Action::Generate(mode)));
    steps.push(verify(retry_cap));
    steps.push(Node::leaf(Action::Commit));
    Node::sequence(steps)
}

fn verify(retry_cap: u32) -> Node<Action> {
    Node::retry(
        Node::selector(vec![
            Node::leaf(Action::Validate),
            Node::inverter(Node::leaf(Action::Fix)),
        ]),
        retry_cap,
    )
}

/// Build the tree every agent runs.
#[must_use]
pub fn build(retry_cap: u32) -> Node<Action> {
    let explore = Node::sequence(vec![
        Node::leaf(Action::Roll(Transition::UncommittedToExploring)),
        Node::parallel(vec![
            Node::repeat(walk(WalkMode::Wander, retry_cap), -1),
            Node::leaf(Action::CheckForTarget),
        ]),
    ]);
    let go_to_target = Node::sequence(vec![
        Node::leaf(Action::GenerateDirect),
        verify(retry_cap),
        Node::leaf(Action::Commit),
    ]);
    let pre_commit = Node::sequence(vec![
        Node::parallel(vec![Node::leaf(Action::IsRecruited), explore]),
        Node::sequence(vec![
            Node::inverter(Node::repeat(go_to_target, -1)),
            Node::leaf(Action::QualityLive),
        ]),
    ]);

    let recruit = Node::parallel(vec![
        Node::leaf(Action::Roll(Transition::RecruitingToSurveying)),
        Node::leaf(Action::Broadcast),
        Node::repeat(walk(WalkMode::Home, retry_cap), -1),
    ]);
    let survey = Node::parallel(vec![
        Node::inverter(Node::leaf(Action::Roll(Transition::SurveyingToRecruiting))),
        Node::repeat(walk(WalkMode::Target, retry_cap), -1),
        Node::leaf(Action::Census),
    ]);
    let bounce = Node::selector(vec![
        Node::inverter(Node::leaf(Action::QualityRemembered)),
        Node::inverter(recruit),
        survey,
    ]);
    let commit = Node::sequence(vec![
        Node::retry(bounce, retry_cap),
        Node::leaf(Action::Verdict),
    ]);

    Node::parallel(vec![
        Node::leaf(Action::Detect),
        Node::retry(Node::sequence(vec![pre_commit, commit]), retry_cap),
    ])
}

/// Borrowed world state for ticking one agent's tree.
pub(crate) struct AgentTick<'a> {
    pub(crate) id: AgentId,
    pub(crate) agents: &'a mut SlotMap<AgentId, Agent>,
    pub(crate) environment: &'a mut Environment,
    pub(crate) config: &'a SwarmConfig,
    pub(crate) rng: &'a mut SmallRng,
    pub(crate) events: &'a mut TickEvents,
}

impl AgentTick<'_> {
    fn detect(&mut self) -> Status {
        let percepts = perceive(
            self.id,
            self.agents,
            self.environment,
            self.config.visual_range,
            self.config.fov,
        );
        if let Some(agent) = self.agents.get_mut(self.id) {
            agent.neighbors = percepts.neighbors;
            agent.known_targets = percepts.targets;
            agent.known_hazards = percepts.hazards;
        }
        Status::Running
    }

    fn in_phase(&self, state: AgentState) -> Status {
        match self.agents.get(self.id) {
            Some(agent) if agent.state == state => Status::Success,
            _ => Status::Failure,
        }
    }
}

impl ActionRunner<Action> for AgentTick<'_> {
    fn run(&mut self, action: &Action) -> Status {
        match *action {
            Action::Detect => self.detect(),
            Action::InPhase(state) => self.in_phase(state),
            Action::Roll(transition) => self.roll(transition),
            Action::IsRecruited => self.is_recruited(),
            Action::CheckForTarget => self.check_for_target(),
            Action::Generate(mode) => self.generate(mode),
            Action::GenerateDirect => self.generate_direct(),
            Action::Validate => self.validate(),
            Action::Fix => self.fix(),
            Action::Commit => self.commit(),
            Action::QualityLive => self.quality_live(),
            Action::QualityRemembered => self.quality_remembered(),
            Action::Broadcast => self.broadcast(),
            Action::Census => self.census(),
            Action::Verdict => self.verdict(),
        }
    }

    /// Hold position instead of failing: the agent is boxed in.
    fn on_exhausted(&mut self, max_attempts: u32) -> Status {
        self.events.exhausted_retries += 1;
        warn!(
            agent = ?self.id,
            max_attempts,
            "retry bound exhausted, holding position"
        );
        Status::Running
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    use super::AgentTick;
    use crate::agent::Agent;
    use crate::config::SwarmConfig;
    use crate::geometry::Position;
    use crate::layout::Environment;
    use crate::{AgentId, TickEvents};
    use rand::rngs::SmallRng;
    use slotmap::SlotMap;

    /// Owned world pieces for driving individual leaves.
    pub(crate) struct Fixture {
        pub(crate) agents: SlotMap<AgentId, Agent>,
        pub(crate) environment: Environment,
        pub(crate) config: SwarmConfig,
        pub(crate) rng: SmallRng,
        pub(crate) events: TickEvents,
    }

    impl Fixture {
        pub(crate) fn new(config: SwarmConfig) -> Self {
            Self {
                agents: SlotMap::with_key(),
                environment: Environment::from_config(&config),
                rng: config.seeded_rng(),
                config,
                events: TickEvents::default(),
            }
        }

        pub(crate) fn spawn(&mut self, x: f32, y: f32, heading: f32) -> AgentId {
            self.agents
                .insert(Agent::new(Position::new(x, y), heading, self.config.max_speed))
        }

        pub(crate) fn runner(&mut self, id: AgentId) -> AgentTick<'_> {
            AgentTick {
                id,
                agents: &mut self.agents,
                environment: &mut self.environment,
                config: &self.config,
                rng: &mut self.rng,
                events: &mut self.events,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;
    use fixture::Fixture;

    #[test]
    fn exhausted_verify_holds_position() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let me = fx.spawn(0.3, 10.0, 0.0);
        fx.agents[me].waypoints.push_back(Position::new(0.1, 10.0));
        let mut walk = Node::sequence(vec![verify(2), Node::leaf(Action::Commit)]);

        assert_eq!(walk.tick(&mut fx.runner(me)), Status::Running);
        let agent = &fx.agents[me];
        assert_eq!(agent.position, Position::new(0.3, 10.0));
        assert_eq!(agent.waypoints.len(), 1);
        assert_eq!(agent.bound_error, Some(crate::agent::BoundError::Left));
        assert_eq!(fx.events.exhausted_retries, 1);
    }

    #[test]
    fn tree_wires_every_leaf_once() {
        let root = build(10);
        assert_eq!(root.leaf_count(), 28);
    }

    #[test]
    fn transitions_name_their_endpoints() {
        assert_eq!(
            Transition::SurveyingToRecruiting.from_state(),
            AgentState::Surveying
        );
        assert_eq!(
            Transition::UncommittedToExploring.to_state(),
            AgentState::Exploring
        );
    }
}

//! Swarm stepper: owns every table and drives one tree tick per live agent.

use crate::agent::{Agent, AgentState};
use crate::config::SwarmConfig;
use crate::geometry::{Position, transition_probability};
use crate::layout::Environment;
use crate::tree::{self, Action, AgentTick};
use crate::{
    AgentId, AgentMap, AgentSnapshot, HazardSnapshot, NullObserver, RunSummary, StepObserver,
    StepReport, SwarmError, TargetSnapshot, Tick, TickEvents,
};
use quorum_bt::Node;
use rand::Rng;
use rand::rngs::SmallRng;
use slotmap::SlotMap;
use std::f32::consts::TAU;
use std::fmt;
use tracing::debug;

/// Complete simulation state.
pub struct Swarm {
    config: SwarmConfig,
    tick: Tick,
    rng: SmallRng,
    agents: SlotMap<AgentId, Agent>,
    /// Tick order, fixed at spawn.
    order: Vec<AgentId>,
    trees: AgentMap<Node<Action>>,
    environment: Environment,
    observer: Box<dyn StepObserver>,
    done: bool,
}

impl fmt::Debug for Swarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Swarm")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("agent_count", &self.agents.len())
            .field("target_count", &self.environment.targets.len())
            .field("done", &self.done)
            .finish()
    }
}

impl Swarm {
    /// Build a swarm from a validated configuration.
    pub fn new(config: SwarmConfig) -> Result<Self, SwarmError> {
        Self::with_observer(config, Box::new(NullObserver))
    }

    /// Build a swarm that reports every step to `observer`.
    pub fn with_observer(
        config: SwarmConfig,
        observer: Box<dyn StepObserver>,
    ) -> Result<Self, SwarmError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let environment = Environment::from_config(&config);

        let (x_lo, x_hi) = config.layout.spawn_x;
        let (y_lo, y_hi) = config.layout.spawn_y;
        let mut agents = SlotMap::with_capacity_and_key(config.num_agents);
        let mut order = Vec::with_capacity(config.num_agents);
        let mut trees = AgentMap::with_capacity(config.num_agents);
        for _ in 0..config.num_agents {
            let x = rng.random_range(x_lo..=x_hi);
            let y = rng.random_range(y_lo..=y_hi);
            let heading = rng.random_range(0.0..TAU);
            let id = agents.insert(Agent::new(Position::new(x, y), heading, config.max_speed));
            trees.insert(id, tree::build(config.retry_cap));
            order.push(id);
        }

        debug!(
            seed = config.rng_seed,
            agents = agents.len(),
            targets = environment.targets.len(),
            hazards = environment.hazards.len(),
            "swarm initialised"
        );
        let done = order.is_empty();
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            agents,
            order,
            trees,
            environment,
            observer,
            done,
        })
    }

    /// Advance one step: tick every live agent in spawn order, rolling
    /// mortality right after each one.
    pub fn step(&mut self) -> TickEvents {
        self.tick = self.tick.next();
        let mut events = TickEvents {
            tick: self.tick,
            ..TickEvents::default()
        };

        for index in 0..self.order.len() {
            let id = self.order[index];
            if self.agents.get(id).is_none_or(|agent| agent.state.is_terminal()) {
                continue;
            }
            let Some(mut root) = self.trees.remove(id) else {
                continue;
            };
            let mut runner = AgentTick {
                id,
                agents: &mut self.agents,
                environment: &mut self.environment,
                config: &self.config,
                rng: &mut self.rng,
                events: &mut events,
            };
            root.tick(&mut runner);
            self.roll_mortality(id, &mut events);
            if self.agents.get(id).is_some_and(|agent| !agent.state.is_terminal()) {
                self.trees.insert(id, root);
            }
        }

        let (done, dead) = self.outcome_counts();
        self.done = done + dead == self.agents.len();
        events.done = self.done;
        let tallies = self.environment.tallies();
        self.observer.on_step(&StepReport {
            events: &events,
            done,
            dead,
            tallies: &tallies,
        });
        events
    }

    fn roll_mortality(&mut self, id: AgentId, events: &mut TickEvents) {
        let lifespan = self.config.lifespan;
        if lifespan <= 0.0 {
            return;
        }
        let Some(agent) = self.agents.get_mut(id) else {
            return;
        };
        if agent.state == AgentState::Uncommitted || agent.state.is_terminal() {
            return;
        }
        let p = transition_probability(self.config.dt, lifespan);
        let roll: f32 = self.rng.random();
        if roll < p {
            let state = agent.state;
            agent.die();
            events.deaths += 1;
            debug!(agent = ?id, from = %state, "agent died");
        }
    }

    /// Step until every agent is terminal or `max_steps` more steps have run.
    pub fn run_until_done(&mut self, max_steps: Option<u64>) -> RunSummary {
        let mut taken = 0_u64;
        while !self.done && max_steps.is_none_or(|limit| taken < limit) {
            self.step();
            taken += 1;
        }
        self.summary()
    }

    fn outcome_counts(&self) -> (usize, usize) {
        self.agents
            .values()
            .fold((0, 0), |(done, dead), agent| match agent.state {
                AgentState::Done => (done + 1, dead),
                AgentState::Dead => (done, dead + 1),
                _ => (done, dead),
            })
    }

    /// Current outcome digest.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let (done, dead) = self.outcome_counts();
        RunSummary {
            seed: self.config.rng_seed,
            steps: self.tick.0,
            finished: self.done,
            agents: self.agents.len(),
            done,
            dead,
            tallies: self.environment.tallies(),
            qualities: self
                .environment
                .targets
                .values()
                .map(|target| target.quality)
                .collect(),
        }
    }

    #[must_use]
    pub fn agent_snapshots(&self) -> Vec<AgentSnapshot> {
        self.order
            .iter()
            .filter_map(|&id| self.agents.get(id).map(|agent| (id, agent)))
            .map(|(id, agent)| AgentSnapshot {
                id,
                position: agent.position,
                heading: agent.heading,
                state: agent.state,
                time_in_state: agent.time_in_state,
                at_target: agent.at_target,
                quality_of_committed: agent.quality_of_committed,
                census: agent.census_len(),
                committed_target: agent.committed_target,
            })
            .collect()
    }

    #[must_use]
    pub fn target_snapshots(&self) -> Vec<TargetSnapshot> {
        self.environment
            .targets
            .iter()
            .map(|(id, target)| TargetSnapshot {
                id,
                position: target.position,
                radius: target.radius,
                quality: target.quality,
                num_agents_committed: target.num_agents_committed,
            })
            .collect()
    }

    #[must_use]
    pub fn hazard_snapshots(&self) -> Vec<HazardSnapshot> {
        self.environment
            .hazards
            .iter()
            .map(|(id, hazard)| HazardSnapshot {
                id,
                position: hazard.position,
                radius: hazard.radius,
            })
            .collect()
    }

    /// Whether every agent is Done or Dead.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Agents in tick order.
    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> + '_ {
        self.order
            .iter()
            .filter_map(|&id| self.agents.get(id).map(|agent| (id, agent)))
    }
}

/// Fresh swarm for `config`, seeded with `seed`.
pub fn init(mut config: SwarmConfig, seed: u64) -> Result<Swarm, SwarmError> {
    config.rng_seed = seed;
    Swarm::new(config)
}

/// Advance `swarm` by one step.
#[must_use]
pub fn step(mut swarm: Swarm) -> Swarm {
    swarm.step();
    swarm
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn rejects_invalid_config_before_spawning() {
        let config = SwarmConfig {
            dt: 0.0,
            ..SwarmConfig::default()
        };
        assert!(matches!(
            Swarm::new(config),
            Err(SwarmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn agents_spawn_inside_the_box() {
        let swarm = init(SwarmConfig::default(), 7).expect("swarm");
        assert_eq!(swarm.config().rng_seed, 7);
        assert_eq!(swarm.agents().count(), 30);
        for (_, agent) in swarm.agents() {
            assert!((12.0..=18.0).contains(&agent.position.x));
            assert!((12.0..=18.0).contains(&agent.position.y));
            assert!((0.0..TAU).contains(&agent.heading));
            assert_eq!(agent.state, AgentState::Uncommitted);
        }
    }

    #[test]
    fn degenerate_spawn_box_is_allowed() {
        let mut config = SwarmConfig::default();
        config.layout.spawn_x = (15.0, 15.0);
        config.layout.spawn_y = (15.0, 15.0);
        let swarm = Swarm::new(config).expect("swarm");
        assert!(
            swarm
                .agents()
                .all(|(_, agent)| agent.position == Position::new(15.0, 15.0))
        );
    }

    #[test]
    fn empty_swarm_is_done_immediately() {
        let config = SwarmConfig {
            num_agents: 0,
            ..SwarmConfig::default()
        };
        let mut swarm = Swarm::new(config).expect("swarm");
        assert!(swarm.is_done());
        let summary = swarm.run_until_done(None);
        assert_eq!(summary.steps, 0);
        assert!(summary.finished);
    }

    #[test]
    fn uncommitted_agents_are_immortal() {
        let config = SwarmConfig {
            lifespan: 1e-6,
            tau_explore: 1e9,
            ..SwarmConfig::default()
        };
        let mut swarm = Swarm::new(config).expect("swarm");
        let events = swarm.step();
        assert_eq!(events.deaths, 0);
    }

    #[test]
    fn short_lifespan_kills_explorers() {
        let config = SwarmConfig {
            lifespan: 1e-6,
            tau_explore: 1e-6,
            ..SwarmConfig::default()
        };
        let mut swarm = Swarm::new(config).expect("swarm");
        let events = swarm.step();
        assert_eq!(events.deaths, 30);
        assert!(events.done);
        for (_, agent) in swarm.agents() {
            assert_eq!(agent.state, AgentState::Dead);
            assert!(agent.committed_target.is_none());
        }
        let summary = swarm.summary();
        assert_eq!(summary.dead, 30);
        assert_eq!(summary.tallies, vec![0; 4]);
    }

    #[test]
    fn step_budget_is_respected() {
        let mut swarm = Swarm::new(SwarmConfig::default()).expect("swarm");
        let summary = swarm.run_until_done(Some(25));
        assert_eq!(summary.steps, 25);
        assert_eq!(swarm.tick(), Tick(25));
        let swarm = step(swarm);
        assert_eq!(swarm.tick(), Tick(26));
    }

    struct Counter(Arc<AtomicUsize>);

    impl StepObserver for Counter {
        fn on_step(&mut self, report: &StepReport<'_>) {
            assert_eq!(report.tallies.len(), 4);
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn observer_sees_every_step() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut swarm = Swarm::with_observer(
            SwarmConfig::default(),
            Box::new(Counter(Arc::clone(&seen))),
        )
        .expect("swarm");
        for _ in 0..5 {
            swarm.step();
        }
        assert_eq!(seen.load(Ordering::Relaxed), 5);
    }
}

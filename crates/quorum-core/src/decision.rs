//! Quorum-sensing phase leaves.

use crate::agent::{Agent, AgentState, CensusEntry};
use crate::geometry::transition_probability;
use crate::perception::{Viewpoint, visible_targets};
use crate::tree::{AgentTick, Transition};
use crate::{AgentId, TargetId};
use quorum_bt::Status;
use rand::Rng;
use tracing::{debug, trace};

/// Target an explorer commits to, given the targets it sees in layout order.
/// With two or more in view the second one is chosen.
#[must_use]
pub fn choose_target(seen: &[TargetId], avoided: Option<TargetId>) -> Option<TargetId> {
    match seen {
        [] => None,
        [only] if Some(*only) == avoided => None,
        [only] => Some(*only),
        [_, second, ..] => Some(*second),
    }
}

fn can_be_recruited(agent: &Agent) -> bool {
    agent.recruited_to.is_none() && !agent.state.is_terminal()
}

impl AgentTick<'_> {
    /// Roll a stochastic phase change. Agents outside the source phase pass through.
    pub(crate) fn roll(&mut self, transition: Transition) -> Status {
        let config = self.config;
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        if agent.state != transition.from_state() {
            return Status::Success;
        }
        let tau = match transition {
            Transition::UncommittedToExploring => config.tau_explore,
            Transition::RecruitingToSurveying => config.tau_recruit.tau(agent.quality_of_committed),
            Transition::SurveyingToRecruiting => config.tau_survey.tau(agent.census_len() as f32),
        };
        let mut p = transition_probability(config.dt, tau);
        // Surveyors stay put until they have actually reached the target.
        if transition == Transition::SurveyingToRecruiting && !agent.at_target {
            p = 0.0;
        }
        let roll: f32 = self.rng.random();
        if roll >= p {
            agent.time_in_state += config.dt;
            return Status::Running;
        }

        let waited = agent.time_in_state;
        agent.enter(transition.to_state());
        if transition == Transition::SurveyingToRecruiting {
            agent.quality_of_committed *= 0.5;
            agent.attempted_to_recruit.clear();
        }
        self.events.transitions += 1;
        debug!(
            agent = ?self.id,
            from = %transition.from_state(),
            to = %transition.to_state(),
            waited,
            p,
            "phase transition"
        );
        Status::Success
    }

    /// Adopt a target a peer recruited this agent to, unless it is the avoided one.
    pub(crate) fn is_recruited(&mut self) -> Status {
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        match agent.recruited_to {
            Some(target) if agent.avoided_target != Some(target) => {
                agent.committed_target = Some(target);
                agent.enter(AgentState::Assessing);
                trace!(agent = ?self.id, target = ?target, "adopted recruited target");
                Status::Success
            }
            _ => {
                agent.recruited_to = None;
                agent.agents_at_target.clear();
                Status::Failure
            }
        }
    }

    /// Look for targets and commit to one when the view allows it.
    pub(crate) fn check_for_target(&mut self) -> Status {
        let config = self.config;
        let Some(agent) = self.agents.get(self.id) else {
            return Status::Failure;
        };
        let view = Viewpoint {
            position: agent.position,
            heading: agent.heading,
            range: config.visual_range,
            fov: config.fov,
        };
        let seen = visible_targets(&view, self.environment);
        let choice = choose_target(&seen, agent.avoided_target).and_then(|id| {
            self.environment
                .targets
                .get(id)
                .map(|target| (id, target.quality))
        });

        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        agent.known_targets = seen;
        let Some((target, quality)) = choice else {
            return Status::Running;
        };
        agent.committed_target = Some(target);
        agent.quality_of_committed = quality;
        agent.enter(AgentState::Assessing);
        trace!(agent = ?self.id, target = ?target, quality, "discovered target");
        Status::Success
    }

    /// First-hand inspection on arrival. Non-assessing agents pass through.
    pub(crate) fn quality_live(&mut self) -> Status {
        let threshold = self.config.quality_threshold;
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        if agent.state != AgentState::Assessing {
            return Status::Success;
        }
        let quality = agent
            .committed_target
            .and_then(|id| self.environment.targets.get(id))
            .map(|target| target.quality);
        match quality {
            Some(quality) if quality > threshold => {
                agent.quality_of_committed = quality;
                agent.enter(AgentState::Recruiting);
                agent.attempted_to_recruit.clear();
                Status::Success
            }
            _ => {
                agent.reject_commitment();
                self.events.abandonments += 1;
                debug!(agent = ?self.id, ?quality, "rejected target on inspection");
                Status::Failure
            }
        }
    }

    /// Re-check the remembered quality against half the threshold.
    pub(crate) fn quality_remembered(&mut self) -> Status {
        let threshold = 0.5 * self.config.quality_threshold;
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        if agent.quality_of_committed > threshold {
            return Status::Success;
        }
        let quality = agent.quality_of_committed;
        agent.reject_commitment();
        self.events.abandonments += 1;
        debug!(agent = ?self.id, quality, "lost faith in target");
        Status::Failure
    }

    /// Try to recruit every peer that sees this agent or is seen by it, once per phase entry.
    pub(crate) fn broadcast(&mut self) -> Status {
        let recruit_prob = self.config.recruit_prob;
        let Some(me) = self.agents.get(self.id) else {
            return Status::Running;
        };
        if me.state != AgentState::Recruiting {
            return Status::Running;
        }
        let Some(target) = me.committed_target else {
            return Status::Running;
        };

        let mut candidates: Vec<AgentId> = me
            .neighbors
            .iter()
            .copied()
            .filter(|&id| self.agents.get(id).is_some_and(can_be_recruited))
            .collect();
        candidates.extend(
            self.agents
                .iter()
                .filter(|&(id, other)| {
                    id != self.id && can_be_recruited(other) && other.neighbors.contains(&self.id)
                })
                .map(|(id, _)| id),
        );

        for candidate in candidates {
            let Some(me) = self.agents.get_mut(self.id) else {
                break;
            };
            if !me.attempted_to_recruit.insert(candidate) {
                continue;
            }
            let roll: f32 = self.rng.random();
            if roll < recruit_prob {
                if let Some(peer) = self.agents.get_mut(candidate) {
                    peer.recruited_to = Some(target);
                    self.events.recruitments += 1;
                    trace!(agent = ?self.id, peer = ?candidate, target = ?target, "recruited peer");
                }
            }
        }
        Status::Running
    }

    /// Age, evict and refresh the census of peers seen at the target.
    pub(crate) fn census(&mut self) -> Status {
        let config = self.config;
        let Some(me) = self.agents.get(self.id) else {
            return Status::Failure;
        };
        if me.state != AgentState::Surveying {
            return Status::Failure;
        }
        let present: Vec<AgentId> = me
            .neighbors
            .iter()
            .copied()
            .filter(|&id| {
                self.agents
                    .get(id)
                    .is_some_and(|peer| peer.at_target && peer.state != AgentState::Dead)
            })
            .collect();

        let Some(me) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        me.agents_at_target
            .retain(|entry| entry.age < config.memory_limit);
        for entry in &mut me.agents_at_target {
            entry.age += config.dt;
        }
        for peer in present {
            match me.agents_at_target.iter_mut().find(|entry| entry.agent == peer) {
                Some(entry) => entry.age = 0.0,
                None => me.agents_at_target.push(CensusEntry {
                    agent: peer,
                    age: 0.0,
                }),
            }
        }

        if me.census_len() >= config.agent_threshold && me.at_target {
            Status::Success
        } else {
            Status::Running
        }
    }

    /// Final decision once the quorum wait ends.
    pub(crate) fn verdict(&mut self) -> Status {
        let threshold = self.config.agent_threshold;
        let Some(agent) = self.agents.get_mut(self.id) else {
            return Status::Failure;
        };
        let census = agent.census_len();
        match agent.committed_target {
            Some(target) if census >= threshold => {
                agent.enter(AgentState::Done);
                if let Some(site) = self.environment.targets.get_mut(target) {
                    site.num_agents_committed += 1;
                }
                self.events.verdicts += 1;
                debug!(agent = ?self.id, target = ?target, census, "committed to target");
                Status::Success
            }
            committed => {
                agent.abandon_commitment();
                // A rejected quality check already counted this rollback.
                if committed.is_some() {
                    self.events.abandonments += 1;
                    debug!(agent = ?self.id, census, "quorum not reached, starting over");
                }
                Status::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwarmConfig;
    use crate::tree::fixture::Fixture;

    fn surveyor(fx: &mut Fixture) -> (AgentId, TargetId) {
        let target = fx.environment.targets.keys().next().expect("target");
        let at = fx.environment.targets[target].position;
        let me = fx.spawn(at.x, at.y + 0.5, 0.0);
        let agent = &mut fx.agents[me];
        agent.state = AgentState::Surveying;
        agent.committed_target = Some(target);
        agent.at_target = true;
        agent.quality_of_committed = 0.75;
        (me, target)
    }

    #[test]
    fn census_evicts_stale_entries_before_refreshing() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let (me, _) = surveyor(&mut fx);
        let stale = fx.spawn(1.0, 1.0, 0.0);
        let seen = fx.spawn(2.0, 1.0, 0.0);
        let remembered = fx.spawn(3.0, 1.0, 0.0);
        let newcomer = fx.spawn(4.0, 1.0, 0.0);
        for id in [stale, seen, newcomer] {
            fx.agents[id].at_target = true;
        }
        fx.agents[me].agents_at_target = vec![
            CensusEntry { agent: stale, age: 20.0 },
            CensusEntry { agent: seen, age: 5.0 },
            CensusEntry { agent: remembered, age: 3.0 },
        ];
        fx.agents[me].neighbors = vec![seen, newcomer];

        assert_eq!(fx.runner(me).census(), Status::Success);
        assert_eq!(
            fx.agents[me].agents_at_target,
            vec![
                CensusEntry { agent: seen, age: 0.0 },
                CensusEntry { agent: remembered, age: 4.0 },
                CensusEntry { agent: newcomer, age: 0.0 },
            ]
        );
    }

    #[test]
    fn census_ignores_peers_away_from_target() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let (me, _) = surveyor(&mut fx);
        let wanderer = fx.spawn(1.0, 1.0, 0.0);
        fx.agents[me].neighbors = vec![wanderer];
        assert_eq!(fx.runner(me).census(), Status::Running);
        assert!(fx.agents[me].agents_at_target.is_empty());

        fx.agents[me].state = AgentState::Recruiting;
        assert_eq!(fx.runner(me).census(), Status::Failure);
    }

    #[test]
    fn second_visible_target_wins() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let ids: Vec<TargetId> = fx.environment.targets.keys().collect();
        assert_eq!(choose_target(&ids[..2], None), Some(ids[1]));
        assert_eq!(choose_target(&ids[..2], Some(ids[1])), Some(ids[1]));
        assert_eq!(choose_target(&ids[..1], Some(ids[0])), None);
        assert_eq!(choose_target(&ids[..1], None), Some(ids[0]));
        assert_eq!(choose_target(&[], None), None);

        let target = ids[0];
        let at = fx.environment.targets[target].position;
        let me = fx.spawn(at.x - 2.5, at.y, 0.0);
        fx.agents[me].state = AgentState::Exploring;
        assert_eq!(fx.runner(me).check_for_target(), Status::Success);
        let agent = &fx.agents[me];
        assert_eq!(agent.committed_target, Some(target));
        assert_eq!(agent.state, AgentState::Assessing);
        assert_eq!(agent.quality_of_committed, 0.25);
    }

    #[test]
    fn low_quality_target_is_rejected_and_avoided() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let target = fx.environment.targets.keys().next().expect("target");
        fx.environment.targets[target].quality = 0.1;
        let me = fx.spawn(5.0, 5.0, 0.0);
        fx.agents[me].state = AgentState::Assessing;
        fx.agents[me].committed_target = Some(target);

        assert_eq!(fx.runner(me).quality_live(), Status::Failure);
        let agent = &fx.agents[me];
        assert_eq!(agent.state, AgentState::Uncommitted);
        assert_eq!(agent.avoided_target, Some(target));
        assert!(agent.committed_target.is_none());

        fx.agents[me].recruited_to = Some(target);
        assert_eq!(fx.runner(me).is_recruited(), Status::Failure);
        assert!(fx.agents[me].recruited_to.is_none());
    }

    #[test]
    fn surveying_roll_never_fires_away_from_target() {
        let config = SwarmConfig {
            tau_survey: crate::config::DwellTime::new(1e-6, 0.0),
            ..SwarmConfig::default()
        };
        let mut fx = Fixture::new(config);
        let (me, _) = surveyor(&mut fx);
        fx.agents[me].at_target = false;
        for _ in 0..10 {
            assert_eq!(
                fx.runner(me).roll(Transition::SurveyingToRecruiting),
                Status::Running
            );
        }
        assert_eq!(fx.agents[me].time_in_state, 10.0);

        fx.agents[me].at_target = true;
        fx.agents[me].attempted_to_recruit.insert(me);
        assert_eq!(
            fx.runner(me).roll(Transition::SurveyingToRecruiting),
            Status::Success
        );
        let agent = &fx.agents[me];
        assert_eq!(agent.state, AgentState::Recruiting);
        assert_eq!(agent.quality_of_committed, 0.375);
        assert!(agent.attempted_to_recruit.is_empty());
        assert_eq!(agent.time_in_state, 0.0);
    }

    #[test]
    fn roll_passes_through_other_phases() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let me = fx.spawn(5.0, 5.0, 0.0);
        assert_eq!(
            fx.runner(me).roll(Transition::RecruitingToSurveying),
            Status::Success
        );
        assert_eq!(fx.agents[me].state, AgentState::Uncommitted);
    }

    #[test]
    fn broadcast_attempts_each_peer_once() {
        let config = SwarmConfig {
            recruit_prob: 1.0,
            ..SwarmConfig::default()
        };
        let mut fx = Fixture::new(config);
        let target = fx.environment.targets.keys().next().expect("target");
        let me = fx.spawn(5.0, 5.0, 0.0);
        let seen = fx.spawn(6.0, 5.0, 0.0);
        let watcher = fx.spawn(7.0, 5.0, 0.0);
        let taken = fx.spawn(6.0, 5.5, 0.0);
        let done = fx.spawn(6.0, 4.5, 0.0);
        fx.agents[done].state = AgentState::Done;
        fx.agents[taken].recruited_to = Some(target);
        fx.agents[watcher].neighbors = vec![me];
        {
            let agent = &mut fx.agents[me];
            agent.state = AgentState::Recruiting;
            agent.committed_target = Some(target);
            agent.neighbors = vec![seen, taken, done];
        }

        assert_eq!(fx.runner(me).broadcast(), Status::Running);
        assert_eq!(fx.agents[seen].recruited_to, Some(target));
        assert_eq!(fx.agents[watcher].recruited_to, Some(target));
        assert_eq!(fx.agents[done].recruited_to, None);
        assert_eq!(fx.events.recruitments, 2);

        fx.agents[seen].recruited_to = None;
        assert_eq!(fx.runner(me).broadcast(), Status::Running);
        assert_eq!(fx.agents[seen].recruited_to, None);
        assert_eq!(fx.events.recruitments, 2);
    }

    #[test]
    fn verdict_commits_or_rolls_back() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let (me, target) = surveyor(&mut fx);
        let peers: Vec<AgentId> = (0..3).map(|i| fx.spawn(i as f32, 1.0, 0.0)).collect();
        fx.agents[me].agents_at_target = peers
            .iter()
            .map(|&agent| CensusEntry { agent, age: 1.0 })
            .collect();
        assert_eq!(fx.runner(me).verdict(), Status::Success);
        assert_eq!(fx.agents[me].state, AgentState::Done);
        assert_eq!(fx.environment.targets[target].num_agents_committed, 1);

        let (other, _) = surveyor(&mut fx);
        assert_eq!(fx.runner(other).verdict(), Status::Failure);
        assert_eq!(fx.agents[other].state, AgentState::Uncommitted);
        assert!(fx.agents[other].committed_target.is_none());
        assert_eq!(fx.environment.targets[target].num_agents_committed, 1);
        assert_eq!(fx.events.verdicts, 1);
        assert_eq!(fx.events.abandonments, 1);
    }

    #[test]
    fn recruited_agent_adopts_target_unless_avoided() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let ids: Vec<TargetId> = fx.environment.targets.keys().collect();
        let me = fx.spawn(5.0, 5.0, 0.0);
        fx.agents[me].avoided_target = Some(ids[0]);
        fx.agents[me].recruited_to = Some(ids[2]);

        assert_eq!(fx.runner(me).is_recruited(), Status::Success);
        let agent = &fx.agents[me];
        assert_eq!(agent.state, AgentState::Assessing);
        assert_eq!(agent.committed_target, Some(ids[2]));
        assert_eq!(agent.recruited_to, Some(ids[2]));

        let other = fx.spawn(6.0, 5.0, 0.0);
        fx.agents[other].avoided_target = Some(ids[2]);
        fx.agents[other].recruited_to = Some(ids[2]);
        assert_eq!(fx.runner(other).is_recruited(), Status::Failure);
        assert_eq!(fx.agents[other].state, AgentState::Uncommitted);
        assert!(fx.agents[other].committed_target.is_none());
    }

    #[test]
    fn remembered_quality_uses_half_the_threshold() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let (me, target) = surveyor(&mut fx);
        fx.agents[me].state = AgentState::Recruiting;
        fx.agents[me].quality_of_committed = 0.11;
        assert_eq!(fx.runner(me).quality_remembered(), Status::Success);
        assert_eq!(fx.agents[me].committed_target, Some(target));

        fx.agents[me].quality_of_committed = 0.1;
        assert_eq!(fx.runner(me).quality_remembered(), Status::Failure);
        let agent = &fx.agents[me];
        assert_eq!(agent.state, AgentState::Uncommitted);
        assert_eq!(agent.avoided_target, Some(target));
        assert!(agent.committed_target.is_none());
        assert!(!agent.at_target);
        assert_eq!(fx.events.abandonments, 1);
    }

    #[test]
    fn one_halving_of_a_low_target_is_still_remembered() {
        let config = SwarmConfig {
            tau_survey: crate::config::DwellTime::new(1e-6, 0.0),
            ..SwarmConfig::default()
        };
        let mut fx = Fixture::new(config);
        let (me, _) = surveyor(&mut fx);
        fx.agents[me].quality_of_committed = 0.25;
        assert_eq!(
            fx.runner(me).roll(Transition::SurveyingToRecruiting),
            Status::Success
        );
        assert_eq!(fx.agents[me].quality_of_committed, 0.125);
        assert_eq!(fx.runner(me).quality_remembered(), Status::Success);
        assert_eq!(fx.agents[me].state, AgentState::Recruiting);
    }

    #[test]
    fn full_census_waits_until_self_is_at_target() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let (me, _) = surveyor(&mut fx);
        fx.agents[me].at_target = false;
        let peers: Vec<AgentId> = (0..3).map(|i| fx.spawn(i as f32, 1.0, 0.0)).collect();
        for &peer in &peers {
            fx.agents[peer].at_target = true;
        }
        fx.agents[me].neighbors = peers;

        assert_eq!(fx.runner(me).census(), Status::Running);
        assert_eq!(fx.agents[me].census_len(), 3);

        fx.agents[me].at_target = true;
        assert_eq!(fx.runner(me).census(), Status::Success);
    }

    #[test]
    fn rejected_quality_counts_one_abandonment() {
        let mut fx = Fixture::new(SwarmConfig::default());
        let (me, _) = surveyor(&mut fx);
        fx.agents[me].state = AgentState::Recruiting;
        fx.agents[me].quality_of_committed = 0.05;

        assert_eq!(fx.runner(me).quality_remembered(), Status::Failure);
        assert_eq!(fx.runner(me).verdict(), Status::Failure);
        assert_eq!(fx.agents[me].state, AgentState::Uncommitted);
        assert_eq!(fx.events.abandonments, 1);
        assert_eq!(fx.events.verdicts, 0);
    }
}

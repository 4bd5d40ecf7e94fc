use crate::SwarmError;
use crate::geometry::Position;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Mean dwell time `base + slope * x`, where `x` depends on the transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DwellTime {
    pub base: f32,
    pub slope: f32,
}

impl DwellTime {
    #[must_use]
    pub const fn new(base: f32, slope: f32) -> Self {
        Self { base, slope }
    }

    /// Mean dwell time for the given driver value.
    #[must_use]
    pub fn tau(&self, x: f32) -> f32 {
        self.base + self.slope * x
    }

    fn is_valid(&self) -> bool {
        self.base > 0.0 && self.slope >= 0.0 && self.base.is_finite() && self.slope.is_finite()
    }
}

/// Which of the hazard ring positions are populated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HazardLayout {
    #[default]
    None,
    /// One hazard per low-quality target slot.
    Partial,
    Full,
}

/// Static arrangement of home, targets and hazards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    /// Number of candidate targets; 0, 4 or 8.
    pub num_targets: usize,
    /// Share of targets carrying the high quality value.
    pub high_quality_share: f32,
    /// Quality assigned to high-quality targets.
    pub high_quality: f32,
    /// Quality assigned to low-quality targets.
    pub low_quality: f32,
    /// Distance from the map center to each target.
    pub target_distance: f32,
    pub target_radius: f32,
    pub hazards: HazardLayout,
    /// Distance from the map center to each hazard.
    pub hazard_distance: f32,
    pub hazard_radius: f32,
    /// Center of the home region.
    pub home: Position,
    pub home_radius: f32,
    /// Inclusive x range agents spawn in.
    pub spawn_x: (f32, f32),
    /// Inclusive y range agents spawn in.
    pub spawn_y: (f32, f32),
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            num_targets: 4,
            high_quality_share: 0.5,
            high_quality: 0.75,
            low_quality: 0.25,
            target_distance: 12.0,
            target_radius: 2.0,
            hazards: HazardLayout::None,
            hazard_distance: 7.5,
            hazard_radius: 2.0,
            home: Position::new(15.0, 15.0),
            home_radius: 4.0,
            spawn_x: (12.0, 18.0),
            spawn_y: (12.0, 18.0),
        }
    }
}

/// Static configuration for a swarm run. Read-only once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmConfig {
    /// Seed for the run's random source.
    pub rng_seed: u64,
    /// Number of agents spawned at start.
    pub num_agents: usize,
    /// Simulated seconds per step.
    pub dt: f32,
    pub map_width: f32,
    pub map_height: f32,
    /// Full field-of-view angle in radians.
    pub fov: f32,
    /// Sight distance for agents; targets and hazards add their radius.
    pub visual_range: f32,
    /// Agent travel speed in world units per second.
    pub max_speed: f32,
    /// Maximum heading change per second in radians.
    pub max_rot_speed: f32,
    /// Mean lifetime of committed agents; non-positive disables mortality.
    pub lifespan: f32,
    /// Personal space kept from non-terminal neighbors.
    pub neighbor_clearance: f32,
    /// Margin kept from hazard edges and from the map bounds.
    pub hazard_clearance: f32,
    /// Distance at which an agent counts as arrived at its target.
    pub target_clearance: f32,
    /// Distance scale for the pull toward home while recruiting.
    pub home_clearance: f32,
    /// Mean time spent uncommitted before exploring.
    pub tau_explore: f32,
    /// Recruiting dwell time, driven by the committed quality.
    pub tau_recruit: DwellTime,
    /// Surveying dwell time, driven by the census size.
    pub tau_survey: DwellTime,
    /// Peers that must be censused at a target before committing for good.
    pub agent_threshold: usize,
    /// Age at which a census entry is forgotten.
    pub memory_limit: f32,
    /// Minimum quality accepted on first inspection.
    pub quality_threshold: f32,
    /// Chance that a single recruitment attempt succeeds.
    pub recruit_prob: f32,
    /// Attempt cap for synchronous retry loops.
    pub retry_cap: u32,
    pub layout: LayoutConfig,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            rng_seed: 46,
            num_agents: 30,
            dt: 1.0,
            map_width: 30.0,
            map_height: 30.0,
            fov: 2.09439,
            visual_range: 2.0,
            max_speed: 0.2,
            max_rot_speed: 0.31416,
            lifespan: -1.0,
            neighbor_clearance: 0.8,
            hazard_clearance: 0.5,
            target_clearance: 1.0,
            home_clearance: 8.0,
            tau_explore: 1000.0,
            tau_recruit: DwellTime::new(25.0, 375.0),
            tau_survey: DwellTime::new(200.0, 2.0),
            agent_threshold: 3,
            memory_limit: 20.0,
            quality_threshold: 0.2,
            recruit_prob: 0.05,
            retry_cap: 10_000,
            layout: LayoutConfig::default(),
        }
    }
}

impl SwarmConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, SwarmError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Rejects configurations the stepper cannot run safely.
    pub fn validate(&self) -> Result<(), SwarmError> {
        if !(self.map_width > 0.0 && self.map_height > 0.0) {
            return Err(SwarmError::InvalidConfig("map dimensions must be positive"));
        }
        if !(self.dt > 0.0 && self.dt.is_finite()) {
            return Err(SwarmError::InvalidConfig("dt must be positive"));
        }
        if !(self.tau_explore > 0.0) || !self.tau_recruit.is_valid() || !self.tau_survey.is_valid()
        {
            return Err(SwarmError::InvalidConfig(
                "dwell time bases must be positive and slopes non-negative",
            ));
        }
        let half_extent = 0.5 * self.map_width.min(self.map_height);
        for clearance in [
            self.neighbor_clearance,
            self.hazard_clearance,
            self.target_clearance,
            self.home_clearance,
        ] {
            if !(clearance > 0.0) {
                return Err(SwarmError::InvalidConfig("clearances must be positive"));
            }
            if clearance >= half_extent {
                return Err(SwarmError::InvalidConfig(
                    "clearances must be smaller than half the map dimension",
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.recruit_prob)
            || !(0.0..=1.0).contains(&self.quality_threshold)
        {
            return Err(SwarmError::InvalidConfig(
                "recruit_prob and quality_threshold must lie in [0, 1]",
            ));
        }
        if !(self.fov > 0.0 && self.fov <= TAU) {
            return Err(SwarmError::InvalidConfig("fov must lie in (0, 2π]"));
        }
        if !(self.visual_range > 0.0) || !(self.max_speed > 0.0) || self.max_rot_speed < 0.0 {
            return Err(SwarmError::InvalidConfig(
                "visual_range and max_speed must be positive, max_rot_speed non-negative",
            ));
        }
        if !(self.memory_limit > 0.0) {
            return Err(SwarmError::InvalidConfig("memory_limit must be positive"));
        }
        if self.agent_threshold == 0 {
            return Err(SwarmError::InvalidConfig("agent_threshold must be at least 1"));
        }
        if self.retry_cap == 0 {
            return Err(SwarmError::InvalidConfig("retry_cap must be at least 1"));
        }
        self.validate_layout()
    }

    fn validate_layout(&self) -> Result<(), SwarmError> {
        let layout = &self.layout;
        if !matches!(layout.num_targets, 0 | 4 | 8) {
            return Err(SwarmError::InvalidConfig("num_targets must be 0, 4 or 8"));
        }
        if !(0.0..=1.0).contains(&layout.high_quality_share)
            || !(0.0..=1.0).contains(&layout.high_quality)
            || !(0.0..=1.0).contains(&layout.low_quality)
        {
            return Err(SwarmError::InvalidConfig(
                "target qualities and high_quality_share must lie in [0, 1]",
            ));
        }
        if !(layout.target_radius > 0.0) || layout.hazard_radius < 0.0 || layout.home_radius < 0.0
        {
            return Err(SwarmError::InvalidConfig(
                "target_radius must be positive, other radii non-negative",
            ));
        }
        let inside = |(lo, hi): (f32, f32), extent: f32| lo <= hi && lo >= 0.0 && hi <= extent;
        if !inside(layout.spawn_x, self.map_width) || !inside(layout.spawn_y, self.map_height) {
            return Err(SwarmError::InvalidConfig(
                "spawn ranges must be ordered and inside the map",
            ));
        }
        Ok(())
    }

    /// Fresh random source for this configuration.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.rng_seed)
    }
}

//! Static placement of home, targets and hazards.

use crate::config::{HazardLayout, LayoutConfig, SwarmConfig};
use crate::geometry::Position;
use crate::{HazardId, TargetId};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::f32::consts::FRAC_1_SQRT_2;

/// Candidate site agents decide between.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub position: Position,
    pub radius: f32,
    pub quality: f32,
    /// Agents that reached a final verdict here. Only ever increments.
    pub num_agents_committed: u32,
}

/// Static region agents steer away from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Hazard {
    pub position: Position,
    pub radius: f32,
}

/// Region recruiters return to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Home {
    pub position: Position,
    pub radius: f32,
}

/// Everything in the world that is not an agent.
#[derive(Debug, Clone)]
pub struct Environment {
    pub targets: SlotMap<TargetId, Target>,
    pub hazards: SlotMap<HazardId, Hazard>,
    pub home: Home,
}

impl Environment {
    /// Lay out the environment described by `config`.
    #[must_use]
    pub fn from_config(config: &SwarmConfig) -> Self {
        let layout = &config.layout;
        let center = Position::new(0.5 * config.map_width, 0.5 * config.map_height);

        let mut targets = SlotMap::with_capacity_and_key(layout.num_targets);
        let offsets = target_offsets(layout.num_targets, layout.target_distance);
        for (offset, quality) in offsets.into_iter().zip(target_qualities(layout)) {
            targets.insert(Target {
                position: center + offset,
                radius: layout.target_radius,
                quality,
                num_agents_committed: 0,
            });
        }

        let mut hazards = SlotMap::with_key();
        let ring = hazard_offsets(layout.num_targets, layout.hazard_distance);
        let placed = match layout.hazards {
            HazardLayout::None => 0,
            HazardLayout::Partial => layout.num_targets - high_quality_count(layout),
            HazardLayout::Full => ring.len(),
        };
        for offset in ring.into_iter().take(placed) {
            hazards.insert(Hazard {
                position: center + offset,
                radius: layout.hazard_radius,
            });
        }

        Self {
            targets,
            hazards,
            home: Home {
                position: layout.home,
                radius: layout.home_radius,
            },
        }
    }

    /// Final verdict count per target, in layout order.
    #[must_use]
    pub fn tallies(&self) -> Vec<u32> {
        self.targets
            .values()
            .map(|target| target.num_agents_committed)
            .collect()
    }
}

fn low_quality_count(layout: &LayoutConfig) -> usize {
    let low = ((1.0 - layout.high_quality_share) * layout.num_targets as f32).round();
    (low.max(0.0) as usize).min(layout.num_targets)
}

fn high_quality_count(layout: &LayoutConfig) -> usize {
    layout.num_targets - low_quality_count(layout)
}

/// Leading slots take the low quality, the rest the high quality.
fn target_qualities(layout: &LayoutConfig) -> Vec<f32> {
    let low = low_quality_count(layout);
    (0..layout.num_targets)
        .map(|slot| {
            if slot < low {
                layout.low_quality
            } else {
                layout.high_quality
            }
        })
        .collect()
}

fn target_offsets(count: usize, distance: f32) -> Vec<Position> {
    let d = distance * FRAC_1_SQRT_2;
    let mut offsets = vec![
        Position::new(d, -d),
        Position::new(-d, d),
        Position::new(-d, -d),
        Position::new(d, d),
    ];
    if count == 8 {
        offsets.extend([
            Position::new(distance, 0.0),
            Position::new(-distance, 0.0),
            Position::new(0.0, -distance),
            Position::new(0.0, distance),
        ]);
    }
    offsets.truncate(count);
    offsets
}

fn hazard_offsets(count: usize, distance: f32) -> Vec<Position> {
    let d = distance * FRAC_1_SQRT_2;
    match count {
        4 => vec![
            Position::new(d, d),
            Position::new(-d, -d),
            Position::new(-d, d),
            Position::new(d, -d),
        ],
        8 => vec![
            Position::new(0.0, -distance),
            Position::new(0.0, distance),
            Position::new(distance, 0.0),
            Position::new(-distance, 0.0),
            Position::new(-d, -d),
            Position::new(d, d),
            Position::new(d, -d),
            Position::new(-d, d),
        ],
        _ => Vec::new(),
    }
}

//! Planar geometry in screen convention (y grows downward).

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

/// Axis-aligned 2D position. Altitude is fixed at zero and never stored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Unit vector in the same direction, or `None` for a zero-length vector.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            Some(Self::new(self.x / len, self.y / len))
        } else {
            None
        }
    }
}

impl Add for Position {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Position {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Position {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Position {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Unit vector for a heading. The y component is inverted for screen space.
#[must_use]
pub fn heading_vector(heading: f32) -> Position {
    Position::new(heading.cos(), -heading.sin())
}

/// Heading that points along `delta`.
#[must_use]
pub fn bearing(delta: Position) -> f32 {
    (-delta.y).atan2(delta.x)
}

/// Angle in `[0, π]` between `heading` and `delta`, or `None` when `delta` has no direction.
#[must_use]
pub fn angle_off_heading(heading: f32, delta: Position) -> Option<f32> {
    let dist = delta.length();
    if dist <= 0.0 {
        return None;
    }
    let facing = heading_vector(heading);
    let cosine = ((delta.x * facing.x + delta.y * facing.y) / dist).clamp(-1.0, 1.0);
    Some(cosine.acos())
}

/// Wraps to `(-π, π]`.
pub fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// Wraps to `[0, 2π)`.
pub fn wrap_unsigned_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle < 0.0 {
        angle += FULL_TURN;
    }
    while angle >= FULL_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// Turn direction for a correction angle. Zero counts as positive.
#[must_use]
pub fn turn_sign(angle: f32) -> f32 {
    if angle < 0.0 { -1.0 } else { 1.0 }
}

/// Probability of leaving a state with mean dwell time `tau` within one step of `dt`.
#[must_use]
pub fn transition_probability(dt: f32, tau: f32) -> f32 {
    if tau <= 0.0 {
        return 1.0;
    }
    1.0 - (-dt / tau).exp()
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timing vocabulary shared by every level of the scheduler.
//!
//! All times are milliseconds on an animation's local timeline. A run is laid
//! out as `delay`, then `duration` (the active phase), then `end_delay`.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Smallest duration an effect may have; zero breaks phase-boundary math
pub const DURATION_EPSILON: f64 = 0.01;

/// Tolerance used when comparing times
pub(crate) const TIME_EPSILON: f64 = 1e-6;

/// Playback direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Play the forward rendering
    #[default]
    Forward,
    /// Play the backward rendering
    Backward,
}

impl Direction {
    /// The other direction
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    /// Literal used in logs and parsing
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Self::Forward),
            "backward" => Ok(Self::Backward),
            other => Err(ConfigurationError::InvalidDirection(other.to_string())),
        }
    }
}

/// A sub-interval of one directional run
///
/// Phases passed to the suspension-point API are always named from the
/// forward point of view: `Delay` is the interval before the forward active
/// phase no matter which direction is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Before the active phase
    Delay,
    /// Keyframes progressing
    Active,
    /// After the active phase
    EndDelay,
    /// The full run
    Whole,
}

impl Phase {
    /// Phase occupying the same interval when the run is mirrored
    pub fn mirrored(self) -> Self {
        match self {
            Self::Delay => Self::EndDelay,
            Self::EndDelay => Self::Delay,
            other => other,
        }
    }
}

impl FromStr for Phase {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delayPhase" | "delay" => Ok(Self::Delay),
            "activePhase" | "active" => Ok(Self::Active),
            "endDelayPhase" | "endDelay" => Ok(Self::EndDelay),
            "whole" => Ok(Self::Whole),
            other => Err(ConfigurationError::InvalidPhase(other.to_string())),
        }
    }
}

/// A point inside a phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimePosition {
    /// Start of the phase
    Beginning,
    /// End of the phase
    End,
    /// Absolute milliseconds; negative values count back from the phase end
    Millis(f64),
    /// Percentage of the phase duration; negative values count back from the end
    Percent(f64),
}

impl TimePosition {
    /// Resolve to an in-phase offset without range checking
    pub fn resolve(self, phase_duration: f64) -> f64 {
        match self {
            Self::Beginning => 0.0,
            Self::End => phase_duration,
            Self::Millis(ms) if ms < 0.0 => phase_duration + ms,
            Self::Millis(ms) => ms,
            Self::Percent(pct) if pct < 0.0 => phase_duration + phase_duration * pct / 100.0,
            Self::Percent(pct) => phase_duration * pct / 100.0,
        }
    }
}

impl From<f64> for TimePosition {
    fn from(ms: f64) -> Self {
        Self::Millis(ms)
    }
}

impl FromStr for TimePosition {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || ConfigurationError::InvalidTimePosition(s.to_string());
        match trimmed {
            "beginning" => Ok(Self::Beginning),
            "end" => Ok(Self::End),
            _ => {
                if let Some(pct) = trimmed.strip_suffix('%') {
                    let value: f64 = pct.trim().parse().map_err(|_| invalid())?;
                    return value.is_finite().then_some(Self::Percent(value)).ok_or_else(invalid);
                }
                let value: f64 = trimmed.parse().map_err(|_| invalid())?;
                value.is_finite().then_some(Self::Millis(value)).ok_or_else(invalid)
            }
        }
    }
}

/// Timing function handed to the render driver
///
/// The engine never samples these curves; it only tracks them so the
/// backward rendering can use the time-inverse of the forward one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Easing {
    /// Constant speed
    #[default]
    Linear,
    /// CSS `ease`
    Ease,
    /// CSS `ease-in`
    EaseIn,
    /// CSS `ease-out`
    EaseOut,
    /// CSS `ease-in-out`
    EaseInOut,
    /// Arbitrary cubic bezier `(x1, y1, x2, y2)`
    CubicBezier([f64; 4]),
}

impl Easing {
    /// Control points of the curve (`None` for linear)
    pub fn control_points(self) -> Option<[f64; 4]> {
        match self {
            Self::Linear => None,
            Self::Ease => Some([0.25, 0.1, 0.25, 1.0]),
            Self::EaseIn => Some([0.42, 0.0, 1.0, 1.0]),
            Self::EaseOut => Some([0.0, 0.0, 0.58, 1.0]),
            Self::EaseInOut => Some([0.42, 0.0, 0.58, 1.0]),
            Self::CubicBezier(points) => Some(points),
        }
    }

    /// The curve traced when time runs backwards
    pub fn inverse(self) -> Self {
        match self {
            Self::Linear => Self::Linear,
            Self::EaseIn => Self::EaseOut,
            Self::EaseOut => Self::EaseIn,
            Self::EaseInOut => Self::EaseInOut,
            Self::Ease | Self::CubicBezier(_) => {
                let [x1, y1, x2, y2] = self.control_points().unwrap_or([0.0, 0.0, 1.0, 1.0]);
                Self::CubicBezier([1.0 - x2, 1.0 - y2, 1.0 - x1, 1.0 - y1])
            }
        }
    }
}

impl fmt::Display for Easing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => f.write_str("linear"),
            Self::Ease => f.write_str("ease"),
            Self::EaseIn => f.write_str("ease-in"),
            Self::EaseOut => f.write_str("ease-out"),
            Self::EaseInOut => f.write_str("ease-in-out"),
            Self::CubicBezier([x1, y1, x2, y2]) => {
                write!(f, "cubic-bezier({x1}, {y1}, {x2}, {y2})")
            }
        }
    }
}

/// How an effect combines with the target's underlying values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Composite {
    /// Overwrite
    #[default]
    Replace,
    /// Add to the underlying value
    Add,
    /// Accumulate onto the underlying value
    Accumulate,
}

/// Timing for one direction of an effect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectTiming {
    /// Milliseconds before the active phase
    pub delay: f64,
    /// Milliseconds of keyframe progress
    pub duration: f64,
    /// Milliseconds after the active phase
    pub end_delay: f64,
    /// Timing function for the active phase
    pub easing: Easing,
    /// Base playback rate of the effect itself
    pub playback_rate: f64,
    /// Composition mode
    pub composite: Composite,
}

impl Default for EffectTiming {
    fn default() -> Self {
        Self {
            delay: 0.0,
            duration: 500.0,
            end_delay: 0.0,
            easing: Easing::Linear,
            playback_rate: 1.0,
            composite: Composite::Replace,
        }
    }
}

impl EffectTiming {
    /// Local time at which the run settles
    pub fn total(&self) -> f64 {
        self.delay + self.duration + self.end_delay
    }

    /// Timing for playing the same interval backwards
    pub fn mirrored(&self) -> Self {
        Self {
            delay: self.end_delay,
            end_delay: self.delay,
            easing: self.easing.inverse(),
            ..*self
        }
    }

    /// Reject negative or non-finite values; clamp the duration to
    /// [`DURATION_EPSILON`]
    pub fn validated(mut self) -> Result<Self, ConfigurationError> {
        for (field, value) in [
            ("delay", self.delay),
            ("duration", self.duration),
            ("end_delay", self.end_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidTiming { field, value });
            }
        }
        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            return Err(ConfigurationError::InvalidPlaybackRate(self.playback_rate));
        }
        self.duration = self.duration.max(DURATION_EPSILON);
        Ok(self)
    }
}

/// One value per direction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectionPair<T> {
    /// Forward value
    pub forward: T,
    /// Backward value
    pub backward: T,
}

impl<T> DirectionPair<T> {
    /// Build from both values
    pub fn new(forward: T, backward: T) -> Self {
        Self { forward, backward }
    }

    /// Value for `direction`
    pub fn get(&self, direction: Direction) -> &T {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    /// Mutable value for `direction`
    pub fn get_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::Forward => &mut self.forward,
            Direction::Backward => &mut self.backward,
        }
    }
}

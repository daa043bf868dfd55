// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for the scheduler.
//!
//! Structural problems surface as [`ConfigurationError`] before any visual
//! side effect happens. Failures in the middle of a run ([`CommitStylesError`])
//! reject the owning block's completion and travel up through the sequence and
//! timeline. [`SchedulingStateError`] covers calls made at the wrong moment.

use crate::timing::{Direction, Phase};
use thiserror::Error;

/// Invalid arguments or construction input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// Target is missing or detached from its render tree
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Effect name not present in the bank
    #[error("Unknown effect \"{name}\" in category \"{category}\"")]
    UnknownEffect {
        /// Category the lookup ran against
        category: String,
        /// Requested effect name
        name: String,
    },

    /// Effect registered twice in one bank
    #[error("Effect \"{0}\" is already registered")]
    DuplicateEffect(String),

    /// Effect registered under an empty name
    #[error("Effect names must not be empty")]
    EmptyEffectName,

    /// Unrecognized direction literal
    #[error("Invalid direction \"{0}\"; expected \"forward\" or \"backward\"")]
    InvalidDirection(String),

    /// Unrecognized phase literal
    #[error("Invalid phase \"{0}\"")]
    InvalidPhase(String),

    /// Unparseable time position literal
    #[error("Invalid time position \"{0}\"")]
    InvalidTimePosition(String),

    /// Resolved time position lies outside its phase
    #[error(
        "Time position {position} is outside [0, {phase_duration}] for {phase:?} ({direction:?})"
    )]
    TimePositionOutOfRange {
        /// Direction the position was resolved for
        direction: Direction,
        /// Phase the position was resolved against
        phase: Phase,
        /// Resolved in-phase position in milliseconds
        position: f64,
        /// Duration of the phase in milliseconds
        phase_duration: f64,
    },

    /// Non-finite or negative timing value
    #[error("Invalid timing value for {field}: {value}")]
    InvalidTiming {
        /// Config field name
        field: &'static str,
        /// Offending value
        value: f64,
    },

    /// Playback rate that is zero, negative, or not finite
    #[error("Invalid playback rate: {0}")]
    InvalidPlaybackRate(f64),

    /// Malformed RON configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Final-state commit failure at the end of an active phase
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitStylesError {
    /// Target was not rendered and forced commits are disabled
    #[error("Cannot commit styles to \"{target}\": target is not rendered")]
    NotRendered {
        /// Target label
        target: String,
    },

    /// Target stayed unrendered even with the hidden state overridden
    #[error("Forced style commit to \"{target}\" failed: {reason}")]
    ForcedCommitFailed {
        /// Target label
        target: String,
        /// Driver-supplied reason
        reason: String,
    },
}

/// Operation requested in a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingStateError {
    /// Timeline is already stepping
    #[error("Timeline is already stepping")]
    AlreadyStepping,

    /// Timeline is paused
    #[error("Timeline is paused")]
    Paused,

    /// No sequence left in the requested direction
    #[error("Timeline is already at its {} edge", edge_name(.0))]
    AtEdge(Direction),

    /// A skip is already running
    #[error("A skip is already in flight")]
    SkipInFlight,

    /// Tag did not match any sequence
    #[error("No sequence tagged \"{0}\"")]
    TagNotFound(String),

    /// Tag plus offset lands outside the timeline
    #[error("Skip target {index} is outside [0, {len}]")]
    IndexOutOfBounds {
        /// Requested cursor position
        index: isize,
        /// Number of sequences
        len: usize,
    },

    /// Sequence is already running
    #[error("Sequence \"{0}\" is already running")]
    SequenceRunning(String),

    /// Animation direction changed mid-run
    #[error("Cannot change direction while the animation is running")]
    AnimationInProgress,
}

fn edge_name(direction: &Direction) -> &'static str {
    match direction {
        Direction::Forward => "end",
        Direction::Backward => "beginning",
    }
}

/// Any failure raised by the engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// See [`ConfigurationError`]
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// See [`CommitStylesError`]
    #[error(transparent)]
    CommitStyles(#[from] CommitStylesError),

    /// See [`SchedulingStateError`]
    #[error(transparent)]
    Scheduling(#[from] SchedulingStateError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_message() {
        let err = EngineError::from(SchedulingStateError::AtEdge(Direction::Forward));
        assert_eq!(err.to_string(), "Timeline is already at its end edge");
        let err = EngineError::from(SchedulingStateError::AtEdge(Direction::Backward));
        assert_eq!(err.to_string(), "Timeline is already at its beginning edge");
    }
}

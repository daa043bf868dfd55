// SPDX-License-Identifier: MIT OR Apache-2.0
//! The rendering seam.
//!
//! A [`RenderDriver`] paints keyframes onto one target. The engine owns the
//! clock: it loads a direction's keyframes and timing into the driver, then
//! pushes a [`FrameState`] at every phase boundary and on every frame of the
//! active phase. Drivers never decide when a run advances.

use crate::error::CommitStylesError;
use crate::keyframe::Keyframes;
use crate::timing::{Direction, EffectTiming};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunPhase {
    /// Not started
    #[default]
    Idle,
    /// Waiting out the delay
    Delay,
    /// Keyframes progressing
    Active,
    /// Waiting out the end delay
    EndDelay,
    /// Run finished
    Settled,
}

/// Snapshot pushed to the driver on every rendered frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Direction being played
    pub direction: Direction,
    /// Phase the local time falls in
    pub phase: RunPhase,
    /// Milliseconds since the start of the run
    pub local_time: f64,
    /// Linear progress through the active phase in `[0, 1]`
    pub active_progress: f64,
}

/// Playback transitions reported to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A run started
    Play,
    /// Progress halted
    Pause,
    /// Progress resumed
    Resume,
    /// The run reached its end
    Finish,
}

/// Renders one target
pub trait RenderDriver: Send {
    /// Replace keyframes and timing (a hard reset of the effect)
    fn load(&mut self, frames: &Keyframes, timing: &EffectTiming);

    /// Paint the given moment
    fn render(&mut self, frame: &FrameState);

    /// Persist the final computed state onto the target
    ///
    /// Fails when the target is not currently rendered.
    fn commit_styles(&mut self) -> Result<(), CommitStylesError>;

    /// Remove the effect from the target
    fn cancel(&mut self);

    /// Observe play/pause/finish transitions
    fn playback_changed(&mut self, _event: PlaybackEvent) {}
}

/// Driver that renders nothing, for targets without a visual backend
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

impl RenderDriver for NullDriver {
    fn load(&mut self, _frames: &Keyframes, _timing: &EffectTiming) {}

    fn render(&mut self, _frame: &FrameState) {}

    fn commit_styles(&mut self) -> Result<(), CommitStylesError> {
        Ok(())
    }

    fn cancel(&mut self) {}
}

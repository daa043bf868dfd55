// SPDX-License-Identifier: MIT OR Apache-2.0
//! Visual subjects that blocks animate.
//!
//! The engine does not lock targets. Two blocks animating the same target at
//! the same time will interleave their class mutations and committed styles;
//! keeping such blocks apart is the caller's job.

use crate::driver::{FrameState, PlaybackEvent, RenderDriver};
use crate::error::CommitStylesError;
use crate::keyframe::{KeyframeValue, Keyframes};
use crate::timing::EffectTiming;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use std::sync::Arc;

/// Class that removes a target from rendering
pub const HIDDEN_CLASS: &str = "hidden";

/// A visual subject
pub trait Target: Send + Sync {
    /// Name used in logs and errors
    fn label(&self) -> String;

    /// Whether the target still exists in its render tree
    fn is_attached(&self) -> bool;

    /// Whether the target is currently rendered
    fn is_rendered(&self) -> bool;

    /// Add classes (already-present classes are left alone)
    fn add_classes(&self, classes: &[String]);

    /// Remove classes
    fn remove_classes(&self, classes: &[String]);

    /// Check for a class
    fn has_class(&self, class: &str) -> bool;

    /// Force the target to render even if it is hidden
    fn set_render_override(&self, forced: bool);

    /// Create the driver that paints this target
    fn create_driver(&self) -> Box<dyn RenderDriver>;
}

#[derive(Debug, Default)]
struct MemoryTargetState {
    attached: bool,
    forced: bool,
    classes: IndexSet<String>,
    committed: IndexMap<String, KeyframeValue>,
    frames_rendered: usize,
    last_frame: Option<FrameState>,
    cancellations: usize,
    events: Vec<PlaybackEvent>,
}

impl MemoryTargetState {
    fn rendered(&self) -> bool {
        self.attached && (self.forced || !self.classes.contains(HIDDEN_CLASS))
    }
}

/// Target that lives entirely in memory
///
/// Useful for headless playback and for observing what a timeline does.
#[derive(Debug, Clone)]
pub struct MemoryTarget {
    label: String,
    state: Arc<Mutex<MemoryTargetState>>,
}

impl MemoryTarget {
    /// Create an attached, rendered target
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            state: Arc::new(Mutex::new(MemoryTargetState {
                attached: true,
                ..Default::default()
            })),
        })
    }

    /// Create an attached target that starts hidden
    pub fn hidden(label: impl Into<String>) -> Arc<Self> {
        let target = Self::new(label);
        target.state.lock().classes.insert(HIDDEN_CLASS.to_string());
        target
    }

    /// Attach or detach the target
    pub fn set_attached(&self, attached: bool) {
        self.state.lock().attached = attached;
    }

    /// Current classes in insertion order
    pub fn classes(&self) -> Vec<String> {
        self.state.lock().classes.iter().cloned().collect()
    }

    /// Values committed so far
    pub fn committed(&self) -> IndexMap<String, KeyframeValue> {
        self.state.lock().committed.clone()
    }

    /// Number of frames painted
    pub fn frames_rendered(&self) -> usize {
        self.state.lock().frames_rendered
    }

    /// Most recent frame painted
    pub fn last_frame(&self) -> Option<FrameState> {
        self.state.lock().last_frame
    }

    /// Number of times an effect was cancelled
    pub fn cancellations(&self) -> usize {
        self.state.lock().cancellations
    }

    /// Playback transitions seen by this target's drivers
    pub fn playback_events(&self) -> Vec<PlaybackEvent> {
        self.state.lock().events.clone()
    }
}

impl Target for MemoryTarget {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    fn is_rendered(&self) -> bool {
        self.state.lock().rendered()
    }

    fn add_classes(&self, classes: &[String]) {
        let mut state = self.state.lock();
        state.classes.extend(classes.iter().cloned());
    }

    fn remove_classes(&self, classes: &[String]) {
        let mut state = self.state.lock();
        for class in classes {
            state.classes.shift_remove(class);
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.state.lock().classes.contains(class)
    }

    fn set_render_override(&self, forced: bool) {
        self.state.lock().forced = forced;
    }

    fn create_driver(&self) -> Box<dyn RenderDriver> {
        Box::new(MemoryDriver {
            label: self.label.clone(),
            state: Arc::clone(&self.state),
            frames: Keyframes::empty(),
        })
    }
}

/// Driver paired with [`MemoryTarget`]
///
/// Commits the keyframes' end state into the target's committed values.
struct MemoryDriver {
    label: String,
    state: Arc<Mutex<MemoryTargetState>>,
    frames: Keyframes,
}

impl RenderDriver for MemoryDriver {
    fn load(&mut self, frames: &Keyframes, _timing: &EffectTiming) {
        self.frames = frames.clone();
    }

    fn render(&mut self, frame: &FrameState) {
        let mut state = self.state.lock();
        state.frames_rendered += 1;
        state.last_frame = Some(*frame);
    }

    fn commit_styles(&mut self) -> Result<(), CommitStylesError> {
        let mut state = self.state.lock();
        if !state.rendered() {
            return Err(CommitStylesError::NotRendered {
                target: self.label.clone(),
            });
        }
        let end_state = self.frames.sample(1.0);
        state.committed.extend(end_state);
        Ok(())
    }

    fn cancel(&mut self) {
        self.state.lock().cancellations += 1;
    }

    fn playback_changed(&mut self, event: PlaybackEvent) {
        self.state.lock().events.push(event);
    }
}

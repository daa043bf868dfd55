// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered sequences stepped like a tape.
//!
//! The cursor `next_seq_index` names the sequence that plays on the next
//! forward step; a backward step rewinds the one before it. Failed steps and
//! skips leave the cursor at the sequence that failed, so the same call can
//! be retried.

use crate::config::{validate_rate, TimelineConfig};
use crate::error::{Result, SchedulingStateError};
use crate::ids::{IdGenerator, SequenceId, TimelineId};
use crate::sequence::{Sequence, SequenceControl};
use crate::timing::Direction;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Default)]
struct TimelineState {
    next_seq_index: usize,
    curr_direction: Direction,
    is_stepping: bool,
    is_paused: bool,
    is_skipping: bool,
    using_skip_to: bool,
    /// Pause and skip states to put back once the current skip ends
    after_skip: Option<(bool, bool)>,
    playback_rate: f64,
    in_progress: IndexMap<SequenceId, Arc<SequenceControl>>,
}

/// Point-in-time view of a timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineStatus {
    /// Timeline id
    pub id: TimelineId,
    /// Timeline name
    pub name: String,
    /// Index of the sequence the next forward step plays
    pub next_seq_index: usize,
    /// Number of sequences
    pub sequence_count: usize,
    /// Direction of the current or last step
    pub direction: Direction,
    /// A step is underway
    pub is_stepping: bool,
    /// Stepping is paused
    pub is_paused: bool,
    /// Sequences complete instantly
    pub is_skipping: bool,
    /// A skip is underway
    pub using_skip_to: bool,
    /// Rate applied on top of every sequence
    pub playback_rate: f64,
    /// Ids of the sequences currently playing
    pub in_flight: Vec<SequenceId>,
}

/// Which flag a [`FlagGuard`] clears
#[derive(Clone, Copy)]
enum Activity {
    Stepping,
    SkippingTo,
}

/// Clears an activity flag however the call ends; a finished skip also
/// puts back the pause and skip states
struct FlagGuard<'a> {
    state: &'a Mutex<TimelineState>,
    activity: Activity,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        match self.activity {
            Activity::Stepping => state.is_stepping = false,
            Activity::SkippingTo => {
                state.using_skip_to = false;
                if let Some((paused, skipping)) = state.after_skip.take() {
                    state.is_paused = paused;
                    state.is_skipping = skipping;
                }
            }
        }
    }
}

/// Ordered group of sequences
pub struct Timeline {
    id: TimelineId,
    name: String,
    ids: Arc<dyn IdGenerator>,
    sequences: Vec<Sequence>,
    state: Mutex<TimelineState>,
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("sequences", &self.sequences)
            .finish_non_exhaustive()
    }
}

impl Timeline {
    /// Create an empty timeline drawing every id from `ids`
    pub fn new(config: TimelineConfig, ids: Arc<dyn IdGenerator>) -> Result<Self> {
        let config = config.validated()?;
        Ok(Self {
            id: TimelineId(ids.next_id()),
            name: config.name,
            ids,
            sequences: Vec::new(),
            state: Mutex::new(TimelineState {
                is_paused: config.paused,
                is_skipping: config.skipping,
                playback_rate: config.playback_rate,
                ..Default::default()
            }),
        })
    }

    /// Append sequences; they and their blocks take ids from this timeline
    pub fn add_sequences(&mut self, sequences: impl IntoIterator<Item = Sequence>) -> &mut Self {
        for mut sequence in sequences {
            sequence.adopt(self.id, Arc::clone(&self.ids));
            self.sequences.push(sequence);
        }
        self
    }

    /// Builder form of [`add_sequences`](Self::add_sequences)
    pub fn with_sequences(mut self, sequences: impl IntoIterator<Item = Sequence>) -> Self {
        self.add_sequences(sequences);
        self
    }

    /// Timeline id
    pub fn id(&self) -> TimelineId {
        self.id
    }

    /// Timeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owned sequences
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    /// Index of the sequence the next forward step plays
    pub fn next_seq_index(&self) -> usize {
        self.state.lock().next_seq_index
    }

    /// No sequence left to rewind
    pub fn at_beginning(&self) -> bool {
        self.state.lock().next_seq_index == 0
    }

    /// No sequence left to play
    pub fn at_end(&self) -> bool {
        self.state.lock().next_seq_index >= self.sequences.len()
    }

    /// Index of the first sequence tagged `tag`
    pub fn find_sequence_index(&self, tag: &str) -> Option<usize> {
        self.sequences.iter().position(|s| s.tag() == tag)
    }

    /// Whether stepping is paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().is_paused
    }

    /// Whether skip mode is on
    pub fn is_skipping(&self) -> bool {
        self.state.lock().is_skipping
    }

    /// Timeline rate
    pub fn playback_rate(&self) -> f64 {
        self.state.lock().playback_rate
    }

    /// Play or rewind sequences until one without continuation is reached
    pub async fn step(&self, direction: Direction) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.is_stepping || state.using_skip_to {
                return Err(SchedulingStateError::AlreadyStepping.into());
            }
            if state.is_paused {
                return Err(SchedulingStateError::Paused.into());
            }
            let at_edge = match direction {
                Direction::Forward => state.next_seq_index >= self.sequences.len(),
                Direction::Backward => state.next_seq_index == 0,
            };
            if at_edge {
                return Err(SchedulingStateError::AtEdge(direction).into());
            }
            state.is_stepping = true;
            state.curr_direction = direction;
        }
        let _guard = FlagGuard {
            state: &self.state,
            activity: Activity::Stepping,
        };

        match direction {
            Direction::Forward => loop {
                let index = self.next_seq_index();
                let continues = self.step_forward_once().await?;
                let next_autoplays = self
                    .sequences
                    .get(index + 1)
                    .is_some_and(Sequence::autoplays);
                if !(continues || next_autoplays) || self.at_end() {
                    break;
                }
            },
            Direction::Backward => loop {
                let index = self.next_seq_index() - 1;
                let continues = self.step_backward_once().await?;
                let autoplayed = self.sequences[index].autoplays();
                if !(continues || autoplayed) || self.at_beginning() {
                    break;
                }
            },
        }
        Ok(())
    }

    /// Jump so that the sequence tagged `tag` (plus `offset`) plays next
    ///
    /// Every sequence in between is played or rewound exactly once, in skip
    /// mode. The pause and skip states are restored afterwards; toggles made
    /// while the skip runs change what gets restored, not the skip itself.
    pub async fn skip_to(&self, tag: &str, offset: isize) -> Result<()> {
        let target = {
            let mut state = self.state.lock();
            if state.using_skip_to {
                return Err(SchedulingStateError::SkipInFlight.into());
            }
            if state.is_stepping {
                return Err(SchedulingStateError::AlreadyStepping.into());
            }
            let base = self
                .find_sequence_index(tag)
                .ok_or_else(|| SchedulingStateError::TagNotFound(tag.to_string()))?;
            let target = base as isize + offset;
            if target < 0 || target as usize > self.sequences.len() {
                return Err(SchedulingStateError::IndexOutOfBounds {
                    index: target,
                    len: self.sequences.len(),
                }
                .into());
            }
            state.using_skip_to = true;
            state.after_skip = Some((state.is_paused, state.is_skipping));
            state.is_paused = false;
            state.is_skipping = true;
            target as usize
        };
        let _guard = FlagGuard {
            state: &self.state,
            activity: Activity::SkippingTo,
        };
        info!(timeline = %self.name, tag, offset, target, "Skipping");

        self.walk_to(target).await
    }

    async fn walk_to(&self, target: usize) -> Result<()> {
        loop {
            let index = self.next_seq_index();
            if index < target {
                self.step_forward_once().await?;
            } else if index > target {
                self.step_backward_once().await?;
            } else {
                return Ok(());
            }
        }
    }

    /// Play the sequence at the cursor and advance past it
    async fn step_forward_once(&self) -> Result<bool> {
        let index = self.next_seq_index();
        let sequence = &self.sequences[index];
        self.begin(sequence, Direction::Forward);
        let result = sequence.play().await;
        self.end(sequence);

        let continues = result?;
        self.state.lock().next_seq_index = index + 1;
        info!(timeline = %self.name, sequence = %sequence.id(), next = index + 1, "Stepped forward");
        Ok(continues)
    }

    /// Rewind the sequence before the cursor and retreat to it
    async fn step_backward_once(&self) -> Result<bool> {
        let index = self.next_seq_index() - 1;
        let sequence = &self.sequences[index];
        self.begin(sequence, Direction::Backward);
        let result = sequence.rewind().await;
        self.end(sequence);

        let continues = result?;
        self.state.lock().next_seq_index = index;
        info!(timeline = %self.name, sequence = %sequence.id(), next = index, "Stepped backward");
        Ok(continues)
    }

    fn begin(&self, sequence: &Sequence, direction: Direction) {
        let mut state = self.state.lock();
        state.curr_direction = direction;
        let control = Arc::clone(sequence.control());
        control.set_user_paused(state.is_paused);
        control.set_skipping(state.is_skipping);
        control.set_parent_rate(state.playback_rate);
        state.in_progress.insert(sequence.id(), control);
    }

    fn end(&self, sequence: &Sequence) {
        self.state.lock().in_progress.shift_remove(&sequence.id());
    }

    /// Flip skip mode, or force it with `force`; returns the new state
    ///
    /// Turning it on finishes every in-flight sequence immediately. During a
    /// [`skip_to`](Self::skip_to) the new state is held until the skip ends.
    pub fn toggle_skipping(&self, force: Option<bool>) -> bool {
        let mut state = self.state.lock();
        if let Some((_, pending)) = state.after_skip.as_mut() {
            *pending = force.unwrap_or(!*pending);
            debug!(timeline = %self.name, skipping = *pending, "Skip mode deferred until the skip ends");
            return *pending;
        }
        let skipping = force.unwrap_or(!state.is_skipping);
        state.is_skipping = skipping;
        for control in state.in_progress.values() {
            control.set_skipping(skipping);
            if skipping {
                control.skip_all();
            }
        }
        debug!(timeline = %self.name, skipping, "Skip mode changed");
        skipping
    }

    /// Flip the pause state, or force it with `force`; returns the new state
    ///
    /// Resuming while skip mode is on finishes in-flight sequences instead.
    /// During a [`skip_to`](Self::skip_to) the new state is held until the
    /// skip ends.
    pub fn toggle_pause(&self, force: Option<bool>) -> bool {
        let mut state = self.state.lock();
        if let Some((pending, _)) = state.after_skip.as_mut() {
            *pending = force.unwrap_or(!*pending);
            debug!(timeline = %self.name, paused = *pending, "Pause deferred until the skip ends");
            return *pending;
        }
        let paused = force.unwrap_or(!state.is_paused);
        state.is_paused = paused;
        for control in state.in_progress.values() {
            control.set_user_paused(paused);
            if !paused && state.is_skipping {
                control.skip_all();
            }
        }
        debug!(timeline = %self.name, paused, "Pause state changed");
        paused
    }

    /// Change the timeline rate, re-applying it to in-flight sequences
    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        let rate = validate_rate(rate)?;
        let mut state = self.state.lock();
        state.playback_rate = rate;
        for control in state.in_progress.values() {
            control.set_parent_rate(rate);
        }
        Ok(())
    }

    /// Snapshot of the timeline
    pub fn status(&self) -> TimelineStatus {
        let state = self.state.lock();
        TimelineStatus {
            id: self.id,
            name: self.name.clone(),
            next_seq_index: state.next_seq_index,
            sequence_count: self.sequences.len(),
            direction: state.curr_direction,
            is_stepping: state.is_stepping,
            is_paused: state.is_paused,
            is_skipping: state.is_skipping,
            using_skip_to: state.using_skip_to,
            playback_rate: state.playback_rate,
            in_flight: state.in_progress.keys().copied().collect(),
        }
    }
}

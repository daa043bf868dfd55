// SPDX-License-Identifier: MIT OR Apache-2.0
//! A single reversible, phase-segmented timed effect.
//!
//! [`TimedAnimation`] owns a forward and a backward [`EffectDescriptor`] for
//! one target. Playing a direction walks that direction's segment list: the
//! local clock advances to each stopping point in turn, the segment's
//! roadblocks and integrityblocks are awaited, then its callbacks fire.
//!
//! Handles are cheap to clone; every clone drives the same animation.

use crate::driver::{FrameState, PlaybackEvent, RenderDriver, RunPhase};
use crate::error::{CommitStylesError, Result, SchedulingStateError};
use crate::keyframe::Keyframes;
use crate::segment::{
    self, Awaitable, Emplaced, PhaseEmplacement, PhaseHooks, Segment, SegmentCallback,
    SegmentPayload,
};
use crate::target::Target;
use crate::timing::{Direction, DirectionPair, EffectTiming, Phase, TimePosition, TIME_EPSILON};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Wall-clock milliseconds between rendered frames of the active phase
pub const DEFAULT_FRAME_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// Per-frame callback invoked while the active phase progresses
pub type FrameMutator = Arc<dyn Fn(&Tween) + Send + Sync>;

/// Hook told when a roadblock starts or stops holding playback
pub type PauseRelay = Arc<dyn Fn(RelaySignal) + Send + Sync>;

/// Roadblock hold notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaySignal {
    /// A roadblock started holding playback
    Hold,
    /// The roadblock resolved
    Release,
}

/// Progress handed to frame mutators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    /// Direction being played
    pub direction: Direction,
    /// Linear progress through the active phase in `[0, 1]`
    pub progress: f64,
}

impl Tween {
    /// Value between `initial` and `final_value` at the current progress
    pub fn compute_tween(&self, initial: f64, final_value: f64) -> f64 {
        initial + (final_value - initial) * self.progress
    }
}

/// Timing, keyframes and optional mutator for one direction
#[derive(Clone)]
pub struct EffectDescriptor {
    /// Phase layout and rate
    pub timing: EffectTiming,
    /// Keyframes loaded into the driver
    pub frames: Keyframes,
    /// Called on every frame of the active phase
    pub mutator: Option<FrameMutator>,
}

struct AnimationState {
    descriptors: DirectionPair<EffectDescriptor>,
    backward_is_mirror: bool,
    direction: Direction,
    segments: DirectionPair<Vec<Segment>>,
    hooks: DirectionPair<PhaseHooks>,
    finished: DirectionPair<bool>,
    in_progress: bool,
    is_expediting: bool,
    paused: bool,
    holds: usize,
    rate_multiplier: f64,
    local_time: f64,
    phase: RunPhase,
    frame_interval: f64,
    driver: Box<dyn RenderDriver>,
    pause_relay: Option<PauseRelay>,
}

impl AnimationState {
    fn timing(&self) -> EffectTiming {
        self.descriptors.get(self.direction).timing
    }

    fn is_paused(&self) -> bool {
        self.paused || self.holds > 0
    }

    fn effective_rate(&self) -> f64 {
        self.timing().playback_rate * self.rate_multiplier
    }

    fn is_spent(&self, direction: Direction) -> bool {
        self.segments
            .get(direction)
            .iter()
            .any(|s| s.header.activated)
    }

    fn rebuild_segments(&mut self, direction: Direction) {
        let timing = self.descriptors.get(direction).timing;
        *self.segments.get_mut(direction) = segment::build_segments(&timing, self.hooks.get(direction));
        *self.finished.get_mut(direction) = false;
    }

    fn reload_driver(&mut self) {
        let descriptor = self.descriptors.get(self.direction);
        self.driver.load(&descriptor.frames, &descriptor.timing);
    }

    /// Paint the current local time; returns the mutator call to make once
    /// the lock is released
    fn render(&mut self) -> Option<(FrameMutator, Tween)> {
        let timing = self.timing();
        let active_start = timing.delay;
        let active_end = timing.delay + timing.duration;
        let t = self.local_time;

        let phase = if t < active_start - TIME_EPSILON {
            RunPhase::Delay
        } else if t < active_end - TIME_EPSILON {
            RunPhase::Active
        } else if t < timing.total() - TIME_EPSILON {
            RunPhase::EndDelay
        } else {
            RunPhase::Settled
        };
        let active_progress = ((t - active_start) / timing.duration).clamp(0.0, 1.0);

        self.phase = phase;
        self.driver.render(&FrameState {
            direction: self.direction,
            phase,
            local_time: t,
            active_progress,
        });

        let in_active = t >= active_start - TIME_EPSILON && t <= active_end + TIME_EPSILON;
        let mutator = self.descriptors.get(self.direction).mutator.clone()?;
        in_active.then_some((
            mutator,
            Tween {
                direction: self.direction,
                progress: active_progress,
            },
        ))
    }
}

struct AnimationInner {
    label: String,
    state: Mutex<AnimationState>,
    wake: Notify,
}

/// What `advance_to` does next
enum Advance {
    Arrived(Option<(FrameMutator, Tween)>),
    Wait,
    Sleep { from: f64, to: f64, rate: f64 },
}

/// Resets run flags if a run future is dropped or fails
///
/// A run that stops short also gives up its remaining segments, so every
/// time promise still attached to them resolves instead of hanging.
struct RunGuard<'a> {
    inner: &'a AnimationInner,
    direction: Direction,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let (relay, abandoned) = {
            let mut state = self.inner.state.lock();
            state.in_progress = false;
            state.is_expediting = false;
            let held = std::mem::take(&mut state.holds) > 0;
            let abandoned = if *state.finished.get(self.direction) {
                Vec::new()
            } else {
                let abandoned = std::mem::take(state.segments.get_mut(self.direction));
                state.rebuild_segments(self.direction);
                abandoned
            };
            let relay = if held { state.pause_relay.clone() } else { None };
            (relay, abandoned)
        };
        if !abandoned.is_empty() {
            debug!(
                animation = %self.inner.label,
                direction = %self.direction,
                segments = abandoned.len(),
                "Run stopped short; releasing its waiters"
            );
        }
        // Dropped outside the lock: senders wake their receivers here
        drop(abandoned);
        if let Some(relay) = relay {
            relay(RelaySignal::Release);
        }
    }
}

/// Reversible timed effect for one target
#[derive(Clone)]
pub struct TimedAnimation {
    inner: Arc<AnimationInner>,
}

impl std::fmt::Debug for TimedAnimation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TimedAnimation")
            .field("label", &self.inner.label)
            .field("direction", &state.direction)
            .field("phase", &state.phase)
            .field("local_time", &state.local_time)
            .field("in_progress", &state.in_progress)
            .finish()
    }
}

impl TimedAnimation {
    /// Create an animation painting through `driver`
    ///
    /// The backward descriptor starts as the mirror of the forward one.
    pub fn new(
        label: impl Into<String>,
        driver: Box<dyn RenderDriver>,
        timing: EffectTiming,
        frames: Keyframes,
    ) -> Result<Self> {
        let timing = timing.validated()?;
        let backward = EffectDescriptor {
            timing: timing.mirrored(),
            frames: frames.mirrored(),
            mutator: None,
        };
        let forward = EffectDescriptor {
            timing,
            frames,
            mutator: None,
        };
        let hooks = DirectionPair::<PhaseHooks>::default();
        let segments = DirectionPair::new(
            segment::build_segments(&forward.timing, &hooks.forward),
            segment::build_segments(&backward.timing, &hooks.backward),
        );

        let mut state = AnimationState {
            descriptors: DirectionPair::new(forward, backward),
            backward_is_mirror: true,
            direction: Direction::Forward,
            segments,
            hooks,
            finished: DirectionPair::default(),
            in_progress: false,
            is_expediting: false,
            paused: false,
            holds: 0,
            rate_multiplier: 1.0,
            local_time: 0.0,
            phase: RunPhase::Idle,
            frame_interval: DEFAULT_FRAME_INTERVAL_MS,
            driver,
            pause_relay: None,
        };
        state.reload_driver();

        Ok(Self {
            inner: Arc::new(AnimationInner {
                label: label.into(),
                state: Mutex::new(state),
                wake: Notify::new(),
            }),
        })
    }

    /// Create an animation using the target's own driver
    pub fn for_target(target: &dyn Target, timing: EffectTiming, frames: Keyframes) -> Result<Self> {
        Self::new(target.label(), target.create_driver(), timing, frames)
    }

    /// Name used in logs
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Replace the forward keyframes
    ///
    /// A mirrored backward rendering follows along.
    pub fn set_forward_frames(&self, frames: Keyframes) {
        let mut state = self.inner.state.lock();
        if state.backward_is_mirror {
            state.descriptors.backward.frames = frames.mirrored();
        }
        state.descriptors.forward.frames = frames;
        state.reload_driver();
    }

    /// Replace the backward keyframes with an explicit rendering
    pub fn set_backward_frames(&self, frames: Keyframes) {
        let mut state = self.inner.state.lock();
        state.backward_is_mirror = false;
        state.descriptors.backward.frames = frames;
        if state.direction == Direction::Backward {
            state.reload_driver();
        }
    }

    /// Replace both renderings at once
    ///
    /// Without `backward` the backward rendering mirrors `forward`. With
    /// `backward_is_mirror` set, `backward` is written in forward order and is
    /// mirrored before use.
    pub fn set_forward_and_backward_frames(
        &self,
        forward: Keyframes,
        backward: Option<Keyframes>,
        backward_is_mirror: bool,
    ) {
        let mut state = self.inner.state.lock();
        let (backward_frames, mirror) = match backward {
            None => (forward.mirrored(), true),
            Some(frames) if backward_is_mirror => (frames.mirrored(), false),
            Some(frames) => (frames, false),
        };
        state.backward_is_mirror = mirror;
        state.descriptors.forward.frames = forward;
        state.descriptors.backward.frames = backward_frames;
        state.reload_driver();
    }

    /// Replace the forward timing; the backward timing becomes its mirror
    ///
    /// Both segment lists are rebuilt, dropping pending suspension points.
    pub fn set_timing(&self, timing: EffectTiming) -> Result<()> {
        let timing = timing.validated()?;
        let mut state = self.inner.state.lock();
        if state.in_progress {
            return Err(SchedulingStateError::AnimationInProgress.into());
        }
        state.descriptors.forward.timing = timing;
        state.descriptors.backward.timing = timing.mirrored();
        state.rebuild_segments(Direction::Forward);
        state.rebuild_segments(Direction::Backward);
        state.reload_driver();
        Ok(())
    }

    /// Install per-frame mutators
    pub fn set_mutators(&self, forward: Option<FrameMutator>, backward: Option<FrameMutator>) {
        let mut state = self.inner.state.lock();
        state.descriptors.forward.mutator = forward;
        state.descriptors.backward.mutator = backward;
    }

    /// Install the phase-boundary callbacks for one direction
    ///
    /// Rebuilds that direction's segment list unless it is being played.
    pub fn set_phase_hooks(&self, direction: Direction, hooks: PhaseHooks) {
        let mut state = self.inner.state.lock();
        *state.hooks.get_mut(direction) = hooks;
        if !(state.in_progress && state.direction == direction) {
            state.rebuild_segments(direction);
        }
    }

    /// Receive roadblock hold notifications
    pub fn set_pause_relay(&self, relay: Option<PauseRelay>) {
        self.inner.state.lock().pause_relay = relay;
    }

    /// Change the wall-clock spacing of active-phase frames
    pub fn set_frame_interval(&self, millis: f64) {
        if millis.is_finite() && millis > 0.0 {
            self.inner.state.lock().frame_interval = millis;
        }
    }

    /// Select the descriptor that drives playback
    ///
    /// This is a hard reset of the driver, not a blend.
    pub fn set_direction(&self, direction: Direction) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.in_progress {
            return Err(SchedulingStateError::AnimationInProgress.into());
        }
        state.direction = direction;
        if state.is_spent(direction) {
            state.rebuild_segments(direction);
        }
        state.local_time = 0.0;
        state.phase = RunPhase::Idle;
        state.reload_driver();
        Ok(())
    }

    /// Give `direction` a clean segment list so waiters can be attached before
    /// it is played again
    pub fn prepare(&self, direction: Direction) {
        let mut state = self.inner.state.lock();
        if state.in_progress {
            return;
        }
        if state.is_spent(direction) || *state.finished.get(direction) {
            state.rebuild_segments(direction);
        }
    }

    /// Current direction
    pub fn direction(&self) -> Direction {
        self.inner.state.lock().direction
    }

    /// Timing of the current direction
    pub fn timing(&self) -> EffectTiming {
        self.inner.state.lock().timing()
    }

    /// Timing of the given direction
    pub fn timing_for(&self, direction: Direction) -> EffectTiming {
        self.inner.state.lock().descriptors.get(direction).timing
    }

    /// Keyframes of the given direction
    pub fn frames_for(&self, direction: Direction) -> Keyframes {
        self.inner.state.lock().descriptors.get(direction).frames.clone()
    }

    /// Whether a run is underway
    pub fn in_progress(&self) -> bool {
        self.inner.state.lock().in_progress
    }

    /// Whether the last run of `direction` completed
    pub fn is_finished(&self, direction: Direction) -> bool {
        *self.inner.state.lock().finished.get(direction)
    }

    /// Whether progress is halted, explicitly or by a roadblock
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().is_paused()
    }

    /// Whether the current run is completing instantly
    pub fn is_expediting(&self) -> bool {
        self.inner.state.lock().is_expediting
    }

    /// Milliseconds since the start of the current run
    pub fn local_time(&self) -> f64 {
        self.inner.state.lock().local_time
    }

    /// Where the current run is
    pub fn current_phase(&self) -> RunPhase {
        self.inner.state.lock().phase
    }

    /// Base rate times the multiplier inherited from ancestors
    pub fn effective_playback_rate(&self) -> f64 {
        self.inner.state.lock().effective_rate()
    }

    /// Multiplier inherited from ancestors
    pub fn rate_multiplier(&self) -> f64 {
        self.inner.state.lock().rate_multiplier
    }

    /// Scale the base rate; takes effect mid-run
    ///
    /// Non-positive or non-finite multipliers are ignored.
    pub fn set_rate_multiplier(&self, multiplier: f64) {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            warn!(animation = %self.inner.label, multiplier, "Ignoring invalid rate multiplier");
            return;
        }
        self.inner.state.lock().rate_multiplier = multiplier;
        self.inner.wake.notify_waiters();
    }

    /// Halt progress
    pub fn pause(&self) {
        {
            let mut state = self.inner.state.lock();
            state.paused = true;
            state.driver.playback_changed(PlaybackEvent::Pause);
        }
        self.inner.wake.notify_waiters();
    }

    /// Resume after [`pause`](Self::pause)
    pub fn unpause(&self) {
        {
            let mut state = self.inner.state.lock();
            state.paused = false;
            state.driver.playback_changed(PlaybackEvent::Resume);
        }
        self.inner.wake.notify_waiters();
    }

    /// Make the current (or next) run complete instantly
    pub fn expedite(&self) {
        self.inner.state.lock().is_expediting = true;
        self.inner.wake.notify_waiters();
    }

    /// Play the current direction to the end of its last segment
    ///
    /// A call made while a run is underway only resumes it.
    pub async fn play(&self) -> Result<()> {
        let direction = {
            let mut state = self.inner.state.lock();
            if state.in_progress {
                let was_paused = state.paused;
                state.paused = false;
                if was_paused {
                    state.driver.playback_changed(PlaybackEvent::Resume);
                }
                drop(state);
                self.inner.wake.notify_waiters();
                return Ok(());
            }

            let direction = state.direction;
            let other = direction.reversed();
            if *state.finished.get(other) || state.is_spent(other) {
                state.rebuild_segments(other);
            }
            if state.is_spent(direction) || *state.finished.get(direction) {
                state.rebuild_segments(direction);
            }
            state.in_progress = true;
            state.local_time = 0.0;
            state.driver.playback_changed(PlaybackEvent::Play);
            direction
        };
        let _guard = RunGuard {
            inner: &self.inner,
            direction,
        };
        debug!(animation = %self.inner.label, %direction, "Run started");

        let first_frame = self.inner.state.lock().render();
        call_mutator(first_frame);

        let mut index = 0;
        loop {
            // Scheduler tick: anything enqueued so far lands before this segment is fixed
            tokio::task::yield_now().await;

            let activated = {
                let mut state = self.inner.state.lock();
                let timing = state.timing();
                state
                    .segments
                    .get_mut(direction)
                    .get_mut(index)
                    .map(|seg| {
                        seg.header.activated = true;
                        (segment::local_time_of(&timing, seg.end_delay_offset), seg.skippable)
                    })
            };
            let Some((target_time, skippable)) = activated else {
                break;
            };

            if skippable {
                let frame = {
                    let mut state = self.inner.state.lock();
                    state.local_time = target_time;
                    state.render()
                };
                call_mutator(frame);
            } else {
                self.advance_to(target_time).await;
            }

            let (callbacks, roadblocks, integrityblocks) = {
                let mut state = self.inner.state.lock();
                match state.segments.get_mut(direction).get_mut(index) {
                    Some(seg) => {
                        seg.header.completed = true;
                        (
                            std::mem::take(&mut seg.callbacks),
                            std::mem::take(&mut seg.roadblocks),
                            std::mem::take(&mut seg.integrityblocks),
                        )
                    }
                    None => break,
                }
            };

            if !roadblocks.is_empty() {
                self.hold();
                future::join_all(roadblocks).await;
                self.release();
            }
            if !integrityblocks.is_empty() {
                future::join_all(integrityblocks).await;
            }
            for callback in callbacks {
                callback()?;
            }
            index += 1;
        }

        {
            let mut state = self.inner.state.lock();
            *state.finished.get_mut(direction) = true;
            state.phase = RunPhase::Settled;
            state.driver.playback_changed(PlaybackEvent::Finish);
        }
        debug!(animation = %self.inner.label, %direction, "Run finished");
        Ok(())
    }

    /// Complete the run instantly, still firing every callback once
    ///
    /// Starts a run first if none is underway.
    pub async fn finish(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.in_progress {
                if !state.is_expediting {
                    state.is_expediting = true;
                    drop(state);
                    self.inner.wake.notify_waiters();
                }
                return Ok(());
            }
            state.is_expediting = true;
        }
        self.play().await
    }

    /// Translate a request into a position on `direction`'s segment list
    pub fn compute_phase_emplacement(
        &self,
        direction: Direction,
        phase: Phase,
        position: impl Into<TimePosition>,
    ) -> Result<PhaseEmplacement> {
        let state = self.inner.state.lock();
        segment::compute_phase_emplacement(
            &state.descriptors.get(direction).timing,
            state.segments.get(direction),
            direction,
            phase,
            position.into(),
        )
    }

    /// Future that resolves when `direction`'s run reaches the given moment
    ///
    /// Resolves immediately if that moment has already passed.
    pub fn generate_time_promise(
        &self,
        direction: Direction,
        phase: Phase,
        position: impl Into<TimePosition>,
    ) -> Result<BoxFuture<'static, ()>> {
        let (tx, rx) = oneshot::channel::<()>();
        let sender = Mutex::new(Some(tx));
        let callback: SegmentCallback = Arc::new(move || {
            if let Some(tx) = sender.lock().take() {
                let _ = tx.send(());
            }
            Ok(())
        });

        let position = position.into();
        let (outcome, _) =
            self.emplace(direction, phase, position, SegmentPayload::Callback(callback))?;
        if outcome == Emplaced::Passed {
            warn!(
                animation = %self.inner.label,
                %direction,
                ?phase,
                ?position,
                "Time promise requested for a moment that has passed"
            );
            return Ok(future::ready(()).boxed());
        }
        Ok(async move {
            // A dropped sender means the run was reset; do not hang
            let _ = rx.await;
        }
        .boxed())
    }

    /// Hold playback at a moment until every awaitable resolves
    pub fn add_roadblocks(
        &self,
        direction: Direction,
        phase: Phase,
        position: impl Into<TimePosition>,
        roadblocks: Vec<Awaitable>,
    ) -> Result<()> {
        let position = position.into();
        let (outcome, _) =
            self.emplace(direction, phase, position, SegmentPayload::Roadblocks(roadblocks))?;
        if outcome == Emplaced::Passed {
            warn!(animation = %self.inner.label, %direction, ?phase, ?position, "Roadblocks added after their moment passed");
        }
        Ok(())
    }

    /// Await every future at a moment without holding playback
    pub fn add_integrityblocks(
        &self,
        direction: Direction,
        phase: Phase,
        position: impl Into<TimePosition>,
        integrityblocks: Vec<Awaitable>,
    ) -> Result<()> {
        let position = position.into();
        let (outcome, _) = self.emplace(
            direction,
            phase,
            position,
            SegmentPayload::Integrityblocks(integrityblocks),
        )?;
        if outcome == Emplaced::Passed {
            warn!(animation = %self.inner.label, %direction, ?phase, ?position, "Integrityblocks added after their moment passed");
        }
        Ok(())
    }

    /// Persist the current direction's final state onto the target
    pub fn commit_styles(&self) -> std::result::Result<(), CommitStylesError> {
        self.inner.state.lock().driver.commit_styles()
    }

    /// Remove the effect from the target
    pub fn cancel_effect(&self) {
        self.inner.state.lock().driver.cancel();
    }

    fn emplace(
        &self,
        direction: Direction,
        phase: Phase,
        position: TimePosition,
        payload: SegmentPayload,
    ) -> Result<(Emplaced, Option<SegmentPayload>)> {
        let mut state = self.inner.state.lock();
        let timing = state.descriptors.get(direction).timing;
        let at = segment::compute_phase_emplacement(
            &timing,
            state.segments.get(direction),
            direction,
            phase,
            position,
        )?;
        if *state.finished.get(direction) {
            return Ok((Emplaced::Passed, Some(payload)));
        }
        Ok(segment::emplace(
            state.segments.get_mut(direction),
            at.initial_segment_index,
            at.end_delay_offset(),
            payload,
        ))
    }

    fn hold(&self) {
        let relay = {
            let mut state = self.inner.state.lock();
            state.holds += 1;
            state.driver.playback_changed(PlaybackEvent::Pause);
            state.pause_relay.clone()
        };
        if let Some(relay) = relay {
            relay(RelaySignal::Hold);
        }
    }

    fn release(&self) {
        let relay = {
            let mut state = self.inner.state.lock();
            state.holds = state.holds.saturating_sub(1);
            state.driver.playback_changed(PlaybackEvent::Resume);
            state.pause_relay.clone()
        };
        if let Some(relay) = relay {
            relay(RelaySignal::Release);
        }
        self.inner.wake.notify_waiters();
    }

    /// Move the local clock to `target`, one frame at a time inside the
    /// active phase
    async fn advance_to(&self, target: f64) {
        loop {
            let notified = self.inner.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.inner.state.lock();
                let local = state.local_time;
                if local >= target - TIME_EPSILON || state.is_expediting {
                    state.local_time = target.max(local);
                    Advance::Arrived(state.render())
                } else if state.is_paused() {
                    Advance::Wait
                } else {
                    let timing = state.timing();
                    let rate = state.effective_rate();
                    let active_start = timing.delay;
                    let active_end = timing.delay + timing.duration;
                    let mut to = target;
                    if local < active_start - TIME_EPSILON {
                        to = to.min(active_start);
                    } else if local < active_end - TIME_EPSILON {
                        to = to.min(local + state.frame_interval * rate).min(active_end);
                    }
                    Advance::Sleep { from: local, to, rate }
                }
            };

            match next {
                Advance::Arrived(frame) => {
                    call_mutator(frame);
                    return;
                }
                Advance::Wait => notified.await,
                Advance::Sleep { from, to, rate } => {
                    let started = Instant::now();
                    let wall = Duration::from_secs_f64(((to - from) / rate / 1000.0).max(0.0));
                    let completed = tokio::select! {
                        _ = time::sleep(wall) => true,
                        _ = &mut notified => false,
                    };
                    let frame = {
                        let mut state = self.inner.state.lock();
                        state.local_time = if completed {
                            to
                        } else {
                            let advanced = started.elapsed().as_secs_f64() * 1000.0 * rate;
                            (from + advanced).min(to)
                        };
                        state.render()
                    };
                    call_mutator(frame);
                }
            }
        }
    }
}

fn call_mutator(frame: Option<(FrameMutator, Tween)>) {
    if let Some((mutator, tween)) = frame {
        mutator(&tween);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NullDriver;
    use crate::keyframe::{KeyframeValue, PropertyKeyframe};
    use crate::target::MemoryTarget;

    fn timing(delay: f64, duration: f64, end_delay: f64) -> EffectTiming {
        EffectTiming {
            delay,
            duration,
            end_delay,
            ..Default::default()
        }
    }

    fn animation(t: EffectTiming) -> TimedAnimation {
        TimedAnimation::new("test", Box::new(NullDriver), t, Keyframes::empty()).unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Option<SegmentCallback> {
        let log = Arc::clone(log);
        Some(Arc::new(move || {
            log.lock().push(name);
            Ok(())
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_walks_all_phases() {
        let anim = animation(timing(100.0, 400.0, 50.0));
        let start = Instant::now();
        anim.play().await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(550));
        assert!(elapsed < Duration::from_millis(600));
        assert_eq!(anim.current_phase(), RunPhase::Settled);
        assert!(anim.is_finished(Direction::Forward));
        assert!(!anim.in_progress());
        assert_eq!(anim.local_time(), 550.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_before_play_fires_hooks_in_order() {
        let anim = animation(timing(100.0, 400.0, 50.0));
        let log = Arc::new(Mutex::new(Vec::new()));
        anim.set_phase_hooks(
            Direction::Forward,
            PhaseHooks {
                on_delay_finish: recorder(&log, "delay"),
                on_active_finish: recorder(&log, "active"),
                on_end_delay_finish: recorder(&log, "end_delay"),
            },
        );

        let start = Instant::now();
        anim.finish().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(*log.lock(), vec!["delay", "active", "end_delay"]);
        assert!(anim.is_finished(Direction::Forward));
        assert!(!anim.is_expediting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_mid_run_completes_remaining_segments() {
        let anim = animation(timing(0.0, 1000.0, 0.0));
        let start = Instant::now();
        let skipper = async {
            time::sleep(Duration::from_millis(200)).await;
            anim.finish().await.unwrap();
        };
        let (played, ()) = tokio::join!(anim.play(), skipper);
        played.unwrap();
        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(anim.local_time(), 1000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roadblock_holds_progress() {
        let anim = animation(timing(0.0, 500.0, 0.0));
        let external = Duration::from_millis(300);
        anim.add_roadblocks(
            Direction::Forward,
            Phase::Active,
            TimePosition::Percent(50.0),
            vec![async move { time::sleep(external).await }.boxed()],
        )
        .unwrap();

        let start = Instant::now();
        anim.play().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(250) + external);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roadblock_relays_hold_and_release() {
        let anim = animation(timing(0.0, 200.0, 0.0));
        let signals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&signals);
        anim.set_pause_relay(Some(Arc::new(move |signal| sink.lock().push(signal))));
        anim.add_roadblocks(
            Direction::Forward,
            Phase::Active,
            TimePosition::Beginning,
            vec![time::sleep(Duration::from_millis(10)).boxed()],
        )
        .unwrap();

        anim.play().await.unwrap();
        assert_eq!(*signals.lock(), vec![RelaySignal::Hold, RelaySignal::Release]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_integrityblock_delays_without_holding() {
        let anim = animation(timing(0.0, 200.0, 0.0));
        let signals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&signals);
        anim.set_pause_relay(Some(Arc::new(move |signal| sink.lock().push(signal))));
        let external = Duration::from_millis(300);
        anim.add_integrityblocks(
            Direction::Forward,
            Phase::Active,
            TimePosition::Percent(50.0),
            vec![async move { time::sleep(external).await }.boxed()],
        )
        .unwrap();

        let start = Instant::now();
        let observer = async {
            time::sleep(Duration::from_millis(250)).await;
            (anim.is_paused(), anim.local_time())
        };
        let (played, (paused, local)) = tokio::join!(anim.play(), observer);
        played.unwrap();
        assert!(!paused);
        assert_eq!(local, 100.0);
        assert!(start.elapsed() >= Duration::from_millis(200) + external);
        assert!(signals.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backward_roadblock_lands_on_mirrored_moment() {
        // Backward run of (100, 200, 50) is (50, 200, 100)
        let anim = animation(timing(100.0, 200.0, 50.0));
        anim.play().await.unwrap();
        anim.set_direction(Direction::Backward).unwrap();

        let signals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&signals);
        anim.set_pause_relay(Some(Arc::new(move |signal| sink.lock().push(signal))));
        let external = Duration::from_millis(200);
        // The start of the forward delay is the end of the backward run
        anim.add_roadblocks(
            Direction::Backward,
            Phase::Delay,
            TimePosition::Beginning,
            vec![async move { time::sleep(external).await }.boxed()],
        )
        .unwrap();

        let start = Instant::now();
        let observer = async {
            time::sleep(Duration::from_millis(450)).await;
            (anim.is_paused(), anim.local_time())
        };
        let (played, (held, local)) = tokio::join!(anim.play(), observer);
        played.unwrap();
        assert!(held);
        assert_eq!(local, 350.0);
        assert!(start.elapsed() >= Duration::from_millis(350) + external);
        assert!(anim.is_finished(Direction::Backward));
        assert_eq!(*signals.lock(), vec![RelaySignal::Hold, RelaySignal::Release]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_releases_time_promises() {
        let anim = animation(timing(0.0, 100.0, 50.0));
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        anim.set_phase_hooks(
            Direction::Forward,
            PhaseHooks {
                on_active_finish: Some(Arc::new(move || -> Result<()> {
                    *counter.lock() += 1;
                    Err(CommitStylesError::NotRendered {
                        target: "test".into(),
                    }
                    .into())
                })),
                ..Default::default()
            },
        );
        let active_end = anim
            .generate_time_promise(Direction::Forward, Phase::Active, TimePosition::End)
            .unwrap();
        let run_end = anim
            .generate_time_promise(Direction::Forward, Phase::EndDelay, TimePosition::End)
            .unwrap();

        let waiters = async {
            let reached = time::timeout(Duration::from_secs(5), async {
                active_end.await;
                run_end.await;
            });
            reached.await.is_ok()
        };
        let (played, released) = tokio::join!(anim.play(), waiters);
        assert!(played.is_err());
        assert!(released);
        assert!(!anim.in_progress());
        assert!(!anim.is_finished(Direction::Forward));

        // The abandoned run left a fresh list behind; a retry fails the same way
        assert!(anim.play().await.is_err());
        assert_eq!(*attempts.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_delay_promise_follows_end_delay_hook() {
        let anim = animation(timing(0.0, 100.0, 0.0));
        let log = Arc::new(Mutex::new(Vec::new()));
        anim.set_phase_hooks(
            Direction::Forward,
            PhaseHooks {
                on_active_finish: recorder(&log, "active"),
                on_end_delay_finish: recorder(&log, "end_delay"),
                ..Default::default()
            },
        );
        let promise = anim
            .generate_time_promise(Direction::Forward, Phase::EndDelay, TimePosition::End)
            .unwrap();
        let waiter = async {
            promise.await;
            log.lock().push("promise");
        };
        let (played, ()) = tokio::join!(anim.play(), waiter);
        played.unwrap();
        assert_eq!(*log.lock(), vec!["active", "end_delay", "promise"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_promise_resolves_at_position() {
        let anim = animation(timing(100.0, 400.0, 0.0));
        let promise = anim
            .generate_time_promise(Direction::Forward, Phase::Active, TimePosition::Percent(50.0))
            .unwrap();

        let start = Instant::now();
        let waiter = async {
            promise.await;
            start.elapsed()
        };
        let (played, reached) = tokio::join!(anim.play(), waiter);
        played.unwrap();
        assert!(reached >= Duration::from_millis(300));
        assert!(reached < Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_passed_time_promise_resolves_immediately() {
        let anim = animation(timing(0.0, 100.0, 0.0));
        anim.play().await.unwrap();
        let promise = anim
            .generate_time_promise(Direction::Forward, Phase::Active, TimePosition::End)
            .unwrap();
        let start = Instant::now();
        promise.await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Attaching waiters after the fact is a warning, not an error
        assert!(anim
            .add_roadblocks(Direction::Forward, Phase::Active, TimePosition::Beginning, Vec::new())
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_promise_out_of_range() {
        let anim = animation(timing(0.0, 100.0, 0.0));
        assert!(anim
            .generate_time_promise(Direction::Forward, Phase::Active, TimePosition::Millis(150.0))
            .is_err());
        assert!(anim
            .generate_time_promise(Direction::Forward, Phase::Active, TimePosition::Percent(101.0))
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_progress() {
        let anim = animation(timing(0.0, 300.0, 0.0));
        let start = Instant::now();
        let controller = async {
            time::sleep(Duration::from_millis(100)).await;
            anim.pause();
            time::sleep(Duration::from_millis(200)).await;
            assert!(anim.local_time() <= 120.0);
            anim.unpause();
        };
        let (played, ()) = tokio::join!(anim.play(), controller);
        played.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_multiplier_scales_wall_time() {
        let anim = animation(timing(0.0, 400.0, 0.0));
        anim.set_rate_multiplier(2.0);
        assert_eq!(anim.effective_playback_rate(), 2.0);
        let start = Instant::now();
        anim.play().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direction_change_rejected_mid_run() {
        let anim = animation(timing(0.0, 200.0, 0.0));
        let observer = async {
            time::sleep(Duration::from_millis(50)).await;
            anim.set_direction(Direction::Backward)
        };
        let (played, changed) = tokio::join!(anim.play(), observer);
        played.unwrap();
        assert!(changed.is_err());
        assert!(anim.set_direction(Direction::Backward).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backward_rendering_mirrors_forward() {
        let target = MemoryTarget::new("box");
        let frames = Keyframes(vec![
            PropertyKeyframe::new().with("opacity", KeyframeValue::Float(0.0)),
            PropertyKeyframe::new().with("opacity", KeyframeValue::Float(1.0)),
        ]);
        let anim =
            TimedAnimation::for_target(target.as_ref(), timing(100.0, 200.0, 0.0), frames).unwrap();
        assert_eq!(anim.timing_for(Direction::Backward).end_delay, 100.0);
        assert_eq!(
            anim.frames_for(Direction::Backward).0[0].properties["opacity"],
            KeyframeValue::Float(1.0)
        );

        anim.play().await.unwrap();
        anim.set_direction(Direction::Backward).unwrap();
        anim.play().await.unwrap();
        assert!(anim.is_finished(Direction::Backward));
        // Playing backward resets the spent forward run
        assert!(!anim.is_finished(Direction::Forward));
        let last = target.last_frame().unwrap();
        assert_eq!(last.direction, Direction::Backward);
        assert_eq!(last.phase, RunPhase::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutator_receives_progress() {
        let anim = animation(timing(0.0, 100.0, 0.0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        anim.set_mutators(
            Some(Arc::new(move |tween: &Tween| {
                sink.lock().push(tween.compute_tween(10.0, 20.0));
            })),
            None,
        );
        anim.play().await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.first().copied(), Some(10.0));
        assert_eq!(seen.last().copied(), Some(20.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ordered, partially concurrent groups of blocks.
//!
//! A sequence plays its blocks in order. Neighbouring blocks are joined into
//! one concurrent group when their flags say so; joined blocks start at the
//! same moment and the walk waits for the whole group before moving on.
//! Inside a group, active-phase and end-delay completions are ordered by
//! finish time through integrityblocks ("forefinishers").

use crate::animation::{RelaySignal, TimedAnimation};
use crate::block::{Block, BlockSchedule};
use crate::config::{validate_rate, SequenceConfig};
use crate::error::{EngineError, Result, SchedulingStateError};
use crate::ids::{BlockId, IdGenerator, SequenceId, SequentialIds, TimelineId};
use crate::timing::{Direction, Phase, TimePosition};
use futures::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Callback with an inverse, run by sequences at their edges
#[derive(Clone)]
pub struct ReversibleHook {
    /// Run when playing forward
    pub perform: Arc<dyn Fn() -> Result<()> + Send + Sync>,
    /// Run when rewinding
    pub undo: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

impl ReversibleHook {
    /// Pair a callback with its inverse
    pub fn new(
        perform: impl Fn() -> Result<()> + Send + Sync + 'static,
        undo: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            perform: Arc::new(perform),
            undo: Arc::new(undo),
        }
    }
}

/// Runtime state shared between a running sequence and its timeline
#[derive(Default)]
struct ControlState {
    running: bool,
    direction: Direction,
    user_paused: bool,
    holds: usize,
    skipping: bool,
    own_rate: f64,
    parent_rate: f64,
    in_progress: IndexMap<BlockId, TimedAnimation>,
}

impl ControlState {
    fn halted(&self) -> bool {
        self.user_paused || self.holds > 0
    }

    fn compounded_rate(&self) -> f64 {
        self.own_rate * self.parent_rate
    }

    fn animations(&self) -> Vec<TimedAnimation> {
        self.in_progress.values().cloned().collect()
    }
}

/// Pause, skip and rate propagation for one sequence's in-flight blocks
pub(crate) struct SequenceControl {
    state: Mutex<ControlState>,
}

impl SequenceControl {
    fn new(own_rate: f64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ControlState {
                own_rate,
                parent_rate: 1.0,
                ..Default::default()
            }),
        })
    }

    fn begin(&self, direction: Direction, label: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.running {
            return Err(SchedulingStateError::SequenceRunning(label.to_string()).into());
        }
        state.running = true;
        state.direction = direction;
        state.holds = 0;
        Ok(())
    }

    fn end(&self) {
        let mut state = self.state.lock();
        state.running = false;
        state.holds = 0;
        state.in_progress.clear();
    }

    fn register(self: &Arc<Self>, block: &Block) {
        let animation = block.animation().clone();
        let weak: Weak<SequenceControl> = Arc::downgrade(self);
        animation.set_pause_relay(Some(Arc::new(move |signal| {
            if let Some(control) = weak.upgrade() {
                match signal {
                    RelaySignal::Hold => control.hold(),
                    RelaySignal::Release => control.release(),
                }
            }
        })));

        let (rate, halted, skipping) = {
            let mut state = self.state.lock();
            state.in_progress.insert(block.id(), animation.clone());
            (state.compounded_rate(), state.halted(), state.skipping)
        };
        block.use_compounded_playback_rate(rate);
        if halted {
            animation.pause();
        } else if animation.is_paused() {
            animation.unpause();
        }
        if skipping {
            animation.expedite();
        }
    }

    fn unregister(&self, block: &Block) {
        self.state.lock().in_progress.shift_remove(&block.id());
        block.animation().set_pause_relay(None);
    }

    fn hold(&self) {
        let animations = {
            let mut state = self.state.lock();
            state.holds += 1;
            state.animations()
        };
        for animation in animations {
            animation.pause();
        }
    }

    fn release(&self) {
        let animations = {
            let mut state = self.state.lock();
            state.holds = state.holds.saturating_sub(1);
            if state.halted() {
                return;
            }
            state.animations()
        };
        for animation in animations {
            animation.unpause();
        }
    }

    pub(crate) fn set_user_paused(&self, paused: bool) {
        let animations = {
            let mut state = self.state.lock();
            state.user_paused = paused;
            if !paused && state.holds > 0 {
                return;
            }
            state.animations()
        };
        for animation in animations {
            if paused {
                animation.pause();
            } else {
                animation.unpause();
            }
        }
    }

    pub(crate) fn set_skipping(&self, skipping: bool) {
        self.state.lock().skipping = skipping;
    }

    pub(crate) fn skip_all(&self) {
        let animations = self.state.lock().animations();
        for animation in animations {
            animation.expedite();
        }
    }

    pub(crate) fn set_parent_rate(&self, rate: f64) {
        let (rate, animations) = {
            let mut state = self.state.lock();
            state.parent_rate = rate;
            (state.compounded_rate(), state.animations())
        };
        for animation in animations {
            animation.set_rate_multiplier(rate);
        }
    }

    fn set_own_rate(&self, rate: f64) {
        let (rate, animations) = {
            let mut state = self.state.lock();
            state.own_rate = rate;
            (state.compounded_rate(), state.animations())
        };
        for animation in animations {
            animation.set_rate_multiplier(rate);
        }
    }
}

/// Clears a control's run state however the run ends
struct RunGuard<'a>(&'a SequenceControl);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Blocks grouped for one direction, each group in two finish orders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockGroups {
    /// Block indices per group, in traversal order
    pub members: Vec<Vec<usize>>,
    /// Each group sorted by active-phase finish time
    pub by_active_finish: Vec<Vec<usize>>,
    /// Each group sorted by end-delay finish time
    pub by_end_delay_finish: Vec<Vec<usize>>,
}

/// Result of [`Sequence::commit`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequencePlan {
    /// Per-block times, forward layout
    pub schedules: Vec<BlockSchedule>,
    /// Groups used when playing
    pub forward: BlockGroups,
    /// Groups used when rewinding
    pub backward: BlockGroups,
}

impl SequencePlan {
    /// Groups for `direction`
    pub fn groups(&self, direction: Direction) -> &BlockGroups {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }
}

/// Point-in-time view of a sequence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceStatus {
    /// Sequence id
    pub id: SequenceId,
    /// Tag
    pub tag: String,
    /// Description
    pub description: String,
    /// Whether a run is underway
    pub running: bool,
    /// Direction of the current or last run
    pub direction: Direction,
    /// Paused by the caller
    pub paused: bool,
    /// Roadblocks currently holding the sequence
    pub holds: usize,
    /// Blocks currently playing
    pub blocks_in_flight: usize,
    /// Total blocks
    pub block_count: usize,
}

/// Whether `later` (index `i`) runs concurrently with `earlier` (index `i - 1`)
fn joined(direction: Direction, earlier: &Block, later: &Block) -> bool {
    let (e, l) = (earlier.config(), later.config());
    match direction {
        Direction::Forward => e.starts_next_block || l.starts_with_previous || !e.blocks_next,
        Direction::Backward => l.starts_with_previous || e.starts_next_block || !l.blocks_prev,
    }
}

/// Ordered group of blocks
pub struct Sequence {
    id: SequenceId,
    timeline_id: TimelineId,
    config: SequenceConfig,
    blocks: Vec<Block>,
    ids: Arc<dyn IdGenerator>,
    control: Arc<SequenceControl>,
    on_start: Option<ReversibleHook>,
    on_finish: Option<ReversibleHook>,
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("id", &self.id)
            .field("tag", &self.config.tag)
            .field("description", &self.config.description)
            .field("blocks", &self.blocks)
            .finish_non_exhaustive()
    }
}

impl Sequence {
    /// Create an empty sequence with its own id counter
    pub fn new(config: SequenceConfig) -> Result<Self> {
        Self::with_ids(config, SequentialIds::shared())
    }

    /// Create an empty sequence drawing ids from `ids`
    pub fn with_ids(config: SequenceConfig, ids: Arc<dyn IdGenerator>) -> Result<Self> {
        let config = config.validated()?;
        Ok(Self {
            id: SequenceId(ids.next_id()),
            timeline_id: TimelineId::default(),
            control: SequenceControl::new(config.playback_rate),
            config,
            blocks: Vec::new(),
            ids,
            on_start: None,
            on_finish: None,
        })
    }

    /// Append blocks, assigning their ids
    pub fn add_blocks(&mut self, blocks: impl IntoIterator<Item = Block>) -> &mut Self {
        for block in blocks {
            block.assign(BlockId(self.ids.next_id()), self.id, self.timeline_id);
            self.blocks.push(block);
        }
        self
    }

    /// Builder form of [`add_blocks`](Self::add_blocks)
    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.add_blocks(blocks);
        self
    }

    /// Run `hook.perform` when playing starts and `hook.undo` when rewinding ends
    pub fn set_on_start(&mut self, hook: ReversibleHook) {
        self.on_start = Some(hook);
    }

    /// Run `hook.perform` when playing ends and `hook.undo` when rewinding starts
    pub fn set_on_finish(&mut self, hook: ReversibleHook) {
        self.on_finish = Some(hook);
    }

    /// Take ids from a timeline's generator
    pub(crate) fn adopt(&mut self, timeline_id: TimelineId, ids: Arc<dyn IdGenerator>) {
        self.timeline_id = timeline_id;
        self.id = SequenceId(ids.next_id());
        for block in &self.blocks {
            block.assign(BlockId(ids.next_id()), self.id, timeline_id);
        }
        self.ids = ids;
    }

    /// Sequence id
    pub fn id(&self) -> SequenceId {
        self.id
    }

    /// Owning timeline
    pub fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }

    /// Tag used by `skip_to`
    pub fn tag(&self) -> &str {
        &self.config.tag
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.config.description
    }

    /// Plays as soon as the previous sequence finishes
    pub fn autoplays(&self) -> bool {
        self.config.autoplays
    }

    /// Stepping continues past this sequence going forward
    pub fn continue_next(&self) -> bool {
        self.config.continue_next
    }

    /// Stepping continues past this sequence going backward
    pub fn continue_prev(&self) -> bool {
        self.config.continue_prev
    }

    /// Owned blocks
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Whether a run is underway
    pub fn is_running(&self) -> bool {
        self.control.state.lock().running
    }

    /// Sequence's own rate
    pub fn playback_rate(&self) -> f64 {
        self.control.state.lock().own_rate
    }

    pub(crate) fn control(&self) -> &Arc<SequenceControl> {
        &self.control
    }

    /// Compute block schedules and concurrency groups
    pub fn commit(&self) -> SequencePlan {
        let own_rate = self.playback_rate();
        let mut schedules = Vec::with_capacity(self.blocks.len());
        let mut max_finish: f64 = 0.0;
        let mut prev_start = 0.0;

        for (i, block) in self.blocks.iter().enumerate() {
            let config = block.config();
            let rate = config.playback_rate * own_rate;
            let start = if i > 0 && joined(Direction::Forward, &self.blocks[i - 1], block) {
                prev_start
            } else {
                max_finish
            };
            let active_start_time = start + config.delay / rate;
            let active_finish_time = active_start_time + config.duration / rate;
            let full_finish_time = active_finish_time + config.end_delay / rate;
            let schedule = BlockSchedule {
                full_start_time: start,
                active_start_time,
                active_finish_time,
                full_finish_time,
            };
            block.set_schedule(schedule);
            schedules.push(schedule);
            max_finish = max_finish.max(full_finish_time);
            prev_start = start;
        }

        SequencePlan {
            schedules,
            forward: self.groups(Direction::Forward),
            backward: self.groups(Direction::Backward),
        }
    }

    fn groups(&self, direction: Direction) -> BlockGroups {
        let mut members: Vec<Vec<usize>> = Vec::new();
        let order: Vec<usize> = match direction {
            Direction::Forward => (0..self.blocks.len()).collect(),
            Direction::Backward => (0..self.blocks.len()).rev().collect(),
        };
        for (pos, &i) in order.iter().enumerate() {
            let continues_group = pos > 0 && {
                let prev = order[pos - 1];
                let (earlier, later) = (prev.min(i), prev.max(i));
                joined(direction, &self.blocks[earlier], &self.blocks[later])
            };
            match members.last_mut() {
                Some(group) if continues_group => group.push(i),
                _ => members.push(vec![i]),
            }
        }

        // Times relative to the shared group start, in this direction's run
        let finish_times = |i: usize| {
            let timing = self.blocks[i].animation().timing_for(direction);
            let rate = timing.playback_rate;
            (
                (timing.delay + timing.duration) / rate,
                timing.total() / rate,
            )
        };
        let sorted_by = |pick: fn((f64, f64)) -> f64| -> Vec<Vec<usize>> {
            members
                .iter()
                .map(|group| {
                    let mut sorted = group.clone();
                    sorted.sort_by(|&a, &b| pick(finish_times(a)).total_cmp(&pick(finish_times(b))));
                    sorted
                })
                .collect()
        };

        BlockGroups {
            by_active_finish: sorted_by(|(active, _)| active),
            by_end_delay_finish: sorted_by(|(_, full)| full),
            members,
        }
    }

    /// Order completions inside each group by finish time
    fn install_forefinishers(&self, direction: Direction, groups: &BlockGroups) -> Result<()> {
        // Phases are named from the forward point of view
        let (active_end, end_delay_end) = match direction {
            Direction::Forward => (
                (Phase::Active, TimePosition::End),
                (Phase::EndDelay, TimePosition::End),
            ),
            Direction::Backward => (
                (Phase::Active, TimePosition::Beginning),
                (Phase::Delay, TimePosition::Beginning),
            ),
        };

        for group in &groups.members {
            for &i in group {
                self.blocks[i].prepare(direction);
            }
        }
        for (orders, (phase, position)) in [
            (&groups.by_active_finish, active_end),
            (&groups.by_end_delay_finish, end_delay_end),
        ] {
            for order in orders {
                for pair in order.windows(2) {
                    let (leader, follower) = (&self.blocks[pair[0]], &self.blocks[pair[1]]);
                    let reached = leader
                        .animation()
                        .generate_time_promise(direction, phase, position)?;
                    follower
                        .animation()
                        .add_integrityblocks(direction, phase, position, vec![reached])?;
                }
            }
        }
        Ok(())
    }

    fn launch(&self, block: Block, direction: Direction) -> BoxFuture<'static, Result<()>> {
        let control = Arc::clone(&self.control);
        async move {
            control.register(&block);
            let result = block.animate(direction).await;
            control.unregister(&block);
            result
        }
        .boxed()
    }

    /// Play or rewind every block; returns whether stepping should continue
    pub async fn run(&self, direction: Direction) -> Result<bool> {
        let label = if self.config.tag.is_empty() {
            self.id.to_string()
        } else {
            self.config.tag.clone()
        };
        self.control.begin(direction, &label)?;
        let _guard = RunGuard(&self.control);
        debug!(sequence = %label, %direction, blocks = self.blocks.len(), "Sequence started");

        let (entry, exit) = match direction {
            Direction::Forward => (
                self.on_start.as_ref().map(|h| &h.perform),
                self.on_finish.as_ref().map(|h| &h.perform),
            ),
            Direction::Backward => (
                self.on_finish.as_ref().map(|h| &h.undo),
                self.on_start.as_ref().map(|h| &h.undo),
            ),
        };
        if let Some(hook) = entry {
            hook()?;
        }

        let plan = self.commit();
        let groups = plan.groups(direction);
        self.install_forefinishers(direction, groups)?;

        for group in &groups.members {
            let pending: Vec<_> = group
                .iter()
                .map(|&i| self.launch(self.blocks[i].clone(), direction))
                .collect();
            let mut first_error: Option<EngineError> = None;
            for result in future::join_all(pending).await {
                if let Err(err) = result {
                    first_error.get_or_insert(err);
                }
            }
            if let Some(err) = first_error {
                warn!(sequence = %label, %direction, error = %err, "Sequence stopped by a failing block");
                return Err(err);
            }
        }

        if let Some(hook) = exit {
            hook()?;
        }
        debug!(sequence = %label, %direction, "Sequence finished");
        Ok(match direction {
            Direction::Forward => self.config.continue_next,
            Direction::Backward => self.config.continue_prev,
        })
    }

    /// Play forward; returns the sequence's `continue_next` flag
    pub async fn play(&self) -> Result<bool> {
        self.run(Direction::Forward).await
    }

    /// Rewind; returns the sequence's `continue_prev` flag
    pub async fn rewind(&self) -> Result<bool> {
        self.run(Direction::Backward).await
    }

    /// Pause every in-flight block
    pub fn pause(&self) {
        self.control.set_user_paused(true);
    }

    /// Resume every in-flight block
    pub fn unpause(&self) {
        self.control.set_user_paused(false);
    }

    /// Complete every in-flight block instantly
    pub fn skip_in_progress_animations(&self) {
        self.control.skip_all();
    }

    /// Change the sequence's own rate, re-applying it to in-flight blocks
    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        let rate = validate_rate(rate)?;
        self.control.set_own_rate(rate);
        Ok(())
    }

    /// Snapshot of the sequence
    pub fn status(&self) -> SequenceStatus {
        let state = self.control.state.lock();
        SequenceStatus {
            id: self.id,
            tag: self.config.tag.clone(),
            description: self.config.description.clone(),
            running: state.running,
            direction: state.direction,
            paused: state.user_paused,
            holds: state.holds,
            blocks_in_flight: state.in_progress.len(),
            block_count: self.blocks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::BlockCategory;
    use crate::config::PartialBlockConfig;
    use crate::error::CommitStylesError;
    use crate::effect::{EffectArgs, EffectBank, EffectDefinition};
    use crate::keyframe::Keyframes;
    use crate::target::MemoryTarget;
    use std::time::Duration;
    use tokio::time::{self, Instant};

    fn bank() -> EffectBank {
        EffectBank::new(BlockCategory::emphasis())
            .with("hold", EffectDefinition::precomputed(|_| (Keyframes::empty(), None)))
            .unwrap()
    }

    fn block(name: &str, config: PartialBlockConfig) -> Block {
        Block::new(&bank(), "hold", MemoryTarget::new(name), EffectArgs::none(), config).unwrap()
    }

    fn sequence(blocks: Vec<Block>) -> Sequence {
        Sequence::new(SequenceConfig::default())
            .unwrap()
            .with_blocks(blocks)
    }

    /// Records the order in which each block finishes its active phase
    fn finish_log(blocks: &[Block]) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for block in blocks {
            let log = Arc::clone(&log);
            let label = block.target().label();
            let animation = block.animation().clone();
            let promise = animation
                .generate_time_promise(Direction::Forward, Phase::Active, TimePosition::End)
                .unwrap();
            tokio::spawn(async move {
                promise.await;
                log.lock().push(label);
            });
        }
        log
    }

    #[test]
    fn test_commit_schedules_and_groups() {
        let a = block("a", PartialBlockConfig::new().with_duration(300.0).with_blocks_next(false));
        let b = block("b", PartialBlockConfig::new().with_duration(700.0).with_blocks_prev(false));
        let c = block("c", PartialBlockConfig::new().with_duration(100.0).with_delay(50.0));
        let seq = sequence(vec![a.clone(), b.clone(), c.clone()]);

        let plan = seq.commit();
        assert_eq!(plan.forward.members, vec![vec![0, 1], vec![2]]);
        assert_eq!(plan.forward.by_active_finish, vec![vec![0, 1], vec![2]]);
        assert_eq!(plan.backward.members, vec![vec![2], vec![1, 0]]);
        assert_eq!(plan.backward.by_active_finish, vec![vec![2], vec![0, 1]]);

        assert_eq!(b.schedule().full_start_time, 0.0);
        assert_eq!(b.schedule().full_finish_time, 700.0);
        assert_eq!(c.schedule().full_start_time, 700.0);
        assert_eq!(c.schedule().active_start_time, 750.0);
        assert_eq!(c.schedule().full_finish_time, 850.0);
        assert_eq!(a.schedule().active_finish_time, 300.0);
    }

    #[test]
    fn test_join_flags() {
        let plain = block("p", PartialBlockConfig::new());
        let with_prev = block("w", PartialBlockConfig::new().starting_with_previous());
        let starter = block("s", PartialBlockConfig::new().starting_next_block());
        let no_block_prev = block("n", PartialBlockConfig::new().with_blocks_prev(false));

        assert!(!joined(Direction::Forward, &plain, &plain));
        assert!(joined(Direction::Forward, &plain, &with_prev));
        assert!(joined(Direction::Forward, &starter, &plain));
        assert!(!joined(Direction::Forward, &plain, &no_block_prev));
        assert!(joined(Direction::Backward, &plain, &no_block_prev));
        assert!(joined(Direction::Backward, &plain, &with_prev));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_group_completes_before_next_block() {
        let a = block("a", PartialBlockConfig::new().with_duration(300.0).with_blocks_next(false));
        let b = block("b", PartialBlockConfig::new().with_duration(700.0).starting_with_previous());
        let c = block("c", PartialBlockConfig::new().with_duration(200.0));
        let seq = sequence(vec![a.clone(), b.clone(), c.clone()]);

        let c_started = c
            .animation()
            .generate_time_promise(Direction::Forward, Phase::Delay, TimePosition::Beginning)
            .unwrap();
        let start = Instant::now();
        let watcher = async {
            c_started.await;
            (
                start.elapsed(),
                a.animation().is_finished(Direction::Forward),
                b.animation().is_finished(Direction::Forward),
            )
        };
        let (played, (c_at, a_done, b_done)) = tokio::join!(seq.play(), watcher);
        played.unwrap();

        assert!(a_done && b_done);
        assert!(c_at >= Duration::from_millis(700));
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forefinishers_order_completion() {
        let slow = block("slow", PartialBlockConfig::new().with_duration(400.0).starting_next_block());
        let fast = block("fast", PartialBlockConfig::new().with_duration(100.0));
        let seq = sequence(vec![slow.clone(), fast.clone()]);
        let log = finish_log(&[slow.clone(), fast.clone()]);

        // Hold the fast block past the slow one's natural finish
        let meddler = async {
            time::sleep(Duration::from_millis(50)).await;
            fast.animation().pause();
            time::sleep(Duration::from_millis(500)).await;
            fast.animation().unpause();
        };
        let start = Instant::now();
        let (played, ()) = tokio::join!(seq.play(), meddler);
        played.unwrap();
        time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*log.lock(), vec!["fast".to_string(), "slow".to_string()]);
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forefinisher_wait_does_not_hold() {
        let slow = block("slow", PartialBlockConfig::new().with_duration(400.0).starting_next_block());
        let fast = block("fast", PartialBlockConfig::new().with_duration(100.0));
        let seq = sequence(vec![slow.clone(), fast.clone()]);

        let observer = async {
            time::sleep(Duration::from_millis(250)).await;
            (
                seq.status().holds,
                fast.animation().is_paused(),
                fast.animation().local_time(),
                slow.animation().is_paused(),
            )
        };
        let (played, (holds, fast_paused, fast_time, slow_paused)) =
            tokio::join!(seq.play(), observer);
        played.unwrap();

        // The fast block sits at its active end waiting on the slow one
        assert_eq!(holds, 0);
        assert!(!fast_paused);
        assert_eq!(fast_time, 100.0);
        assert!(!slow_paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_block_in_group_rejects_sequence() {
        let failing = Block::new(
            &bank(),
            "hold",
            MemoryTarget::hidden("a"),
            EffectArgs::none(),
            PartialBlockConfig::new()
                .with_duration(100.0)
                .with_end_delay(50.0)
                .starting_next_block(),
        )
        .unwrap();
        let sibling = block("b", PartialBlockConfig::new().with_duration(300.0));
        let seq = sequence(vec![failing.clone(), sibling.clone()]);

        let played = time::timeout(Duration::from_secs(10), seq.play())
            .await
            .expect("sequence settles");
        assert!(matches!(
            played,
            Err(EngineError::CommitStyles(CommitStylesError::NotRendered { .. }))
        ));
        assert!(!seq.is_running());
        assert_eq!(seq.status().holds, 0);
        assert!(!failing.animation().in_progress());
        // The sibling was released and ran to its end
        assert!(sibling.animation().is_finished(Direction::Forward));

        let retried = time::timeout(Duration::from_secs(10), seq.play())
            .await
            .expect("retry settles");
        assert!(matches!(retried, Err(EngineError::CommitStyles(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_roadblock_holds_whole_sequence() {
        let a = block("a", PartialBlockConfig::new().with_duration(400.0).starting_next_block());
        let b = block("b", PartialBlockConfig::new().with_duration(400.0));
        let seq = sequence(vec![a.clone(), b.clone()]);

        seq.commit();
        a.prepare(Direction::Forward);
        a.animation()
            .add_roadblocks(
                Direction::Forward,
                Phase::Active,
                TimePosition::Percent(25.0),
                vec![async { time::sleep(Duration::from_millis(500)).await }.boxed()],
            )
            .unwrap();

        let observer = async {
            time::sleep(Duration::from_millis(300)).await;
            (seq.status().holds, b.animation().is_paused(), b.animation().local_time())
        };
        let start = Instant::now();
        let (played, (holds, b_paused, b_time)) = tokio::join!(seq.play(), observer);
        played.unwrap();

        assert_eq!(holds, 1);
        assert!(b_paused);
        assert!(b_time <= 120.0);
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_skip_propagate() {
        let a = block("a", PartialBlockConfig::new().with_duration(1000.0));
        let seq = sequence(vec![a.clone()]);

        let start = Instant::now();
        let controller = async {
            time::sleep(Duration::from_millis(100)).await;
            seq.pause();
            assert!(a.animation().is_paused());
            time::sleep(Duration::from_millis(100)).await;
            seq.unpause();
            seq.skip_in_progress_animations();
        };
        let (played, ()) = tokio::join!(seq.play(), controller);
        assert!(!played.unwrap());
        assert!(start.elapsed() < Duration::from_millis(300));
        assert!(a.animation().is_finished(Direction::Forward));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reversible_hooks_and_rerun_guard() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str| {
            let events = Arc::clone(&events);
            move || {
                events.lock().push(name);
                Ok::<(), EngineError>(())
            }
        };
        let mut seq = sequence(vec![block("a", PartialBlockConfig::new().with_duration(50.0))]);
        seq.set_on_start(ReversibleHook::new(record("start"), record("unstart")));
        seq.set_on_finish(ReversibleHook::new(record("finish"), record("unfinish")));

        let (first, second) = tokio::join!(seq.play(), async {
            tokio::task::yield_now().await;
            seq.play().await
        });
        first.unwrap();
        assert!(matches!(
            second,
            Err(EngineError::Scheduling(SchedulingStateError::SequenceRunning(_)))
        ));

        seq.rewind().await.unwrap();
        assert_eq!(*events.lock(), vec!["start", "finish", "unfinish", "unstart"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_forward_twice() {
        let a = block("a", PartialBlockConfig::new().with_duration(100.0).starting_next_block());
        let b = block("b", PartialBlockConfig::new().with_duration(50.0));
        let seq = sequence(vec![a, b]);
        seq.play().await.unwrap();
        let start = Instant::now();
        seq.play().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}

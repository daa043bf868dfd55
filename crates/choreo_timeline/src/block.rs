// SPDX-License-Identifier: MIT OR Apache-2.0
//! One reversible timed effect bound to one target.
//!
//! A [`Block`] owns a [`TimedAnimation`] and hooks its phase boundaries:
//!
//! - delay end: start class mutations, the category start hook, then lazy
//!   keyframe generation
//! - active end: style commit, finish class mutations, the category finish
//!   hook
//! - end-delay end: the committed effect is cancelled
//!
//! Rewinding applies the same steps with every class mutation undone, so a
//! play/rewind round trip leaves the target's classes where it found them.

use crate::animation::TimedAnimation;
use crate::category::BlockCategory;
use crate::config::{BlockConfig, PartialBlockConfig};
use crate::effect::{EffectArgs, EffectBank, GeneratorPair, KeyframeSource};
use crate::error::{CommitStylesError, ConfigurationError, Result};
use crate::ids::{BlockId, SequenceId, TimelineId};
use crate::keyframe::Keyframes;
use crate::segment::{PhaseHooks, SegmentCallback};
use crate::target::Target;
use crate::timing::Direction;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Start and finish times of a block inside its sequence, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockSchedule {
    /// Start of the delay phase
    pub full_start_time: f64,
    /// Start of the active phase
    pub active_start_time: f64,
    /// End of the active phase
    pub active_finish_time: f64,
    /// End of the end-delay phase
    pub full_finish_time: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Ownership {
    id: BlockId,
    sequence_id: SequenceId,
    timeline_id: TimelineId,
}

struct BlockShared {
    ownership: Mutex<Ownership>,
    category: Arc<BlockCategory>,
    effect_name: String,
    target: Arc<dyn Target>,
    config: BlockConfig,
    generators: Option<GeneratorPair>,
    animation: TimedAnimation,
    schedule: Mutex<BlockSchedule>,
}

impl BlockShared {
    fn label(&self) -> String {
        format!("{}({})", self.effect_name, self.target.label())
    }

    fn on_start(&self, direction: Direction) -> Result<()> {
        let classes = &self.config.classes;
        match direction {
            Direction::Forward => {
                self.target.remove_classes(&classes.remove_on_start);
                self.target.add_classes(&classes.add_on_start);
            }
            Direction::Backward => {
                self.target.remove_classes(&classes.add_on_finish);
                self.target.add_classes(&classes.remove_on_finish);
            }
        }
        if let Some(hook) = self.category.start_hook(direction) {
            hook(self.target.as_ref())?;
        }
        self.generate_frames(direction);
        Ok(())
    }

    fn on_finish(&self, direction: Direction) -> Result<()> {
        if self.config.commits_styles {
            self.commit_styles()?;
        }
        let classes = &self.config.classes;
        match direction {
            Direction::Forward => {
                self.target.remove_classes(&classes.remove_on_finish);
                self.target.add_classes(&classes.add_on_finish);
            }
            Direction::Backward => {
                self.target.remove_classes(&classes.add_on_start);
                self.target.add_classes(&classes.remove_on_start);
            }
        }
        if let Some(hook) = self.category.finish_hook(direction) {
            hook(self.target.as_ref())?;
        }
        Ok(())
    }

    fn on_end_delay_finish(&self, direction: Direction) -> Result<()> {
        if self.config.commits_styles {
            self.animation.cancel_effect();
        }
        debug!(block = %self.ownership.lock().id, effect = %self.effect_name, %direction, "Block finished");
        Ok(())
    }

    fn generate_frames(&self, direction: Direction) {
        let Some((forward, backward)) = &self.generators else {
            return;
        };
        match (direction, backward) {
            (Direction::Forward, _) => self.animation.set_forward_frames(forward()),
            (Direction::Backward, Some(backward)) => self.animation.set_backward_frames(backward()),
            (Direction::Backward, None) => {
                self.animation
                    .set_forward_and_backward_frames(forward(), None, false);
            }
        }
    }

    fn commit_styles(&self) -> Result<()> {
        let Err(first) = self.animation.commit_styles() else {
            return Ok(());
        };
        if !self.config.commit_styles_forcefully {
            return Err(first.into());
        }

        warn!(target_label = %self.target.label(), "Target not rendered; forcing style commit");
        self.target.set_render_override(true);
        let retried = self.animation.commit_styles();
        self.target.set_render_override(false);
        retried.map_err(|e| {
            CommitStylesError::ForcedCommitFailed {
                target: self.target.label(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn phase_hooks(shared: &Weak<BlockShared>, direction: Direction) -> PhaseHooks {
    fn hook(
        shared: &Weak<BlockShared>,
        direction: Direction,
        f: fn(&BlockShared, Direction) -> Result<()>,
    ) -> Option<SegmentCallback> {
        let shared = Weak::clone(shared);
        Some(Arc::new(move || match shared.upgrade() {
            Some(block) => f(&block, direction),
            None => Ok(()),
        }))
    }

    PhaseHooks {
        on_delay_finish: hook(shared, direction, BlockShared::on_start),
        on_active_finish: hook(shared, direction, BlockShared::on_finish),
        on_end_delay_finish: hook(shared, direction, BlockShared::on_end_delay_finish),
    }
}

/// One timed effect bound to one target
#[derive(Clone)]
pub struct Block {
    shared: Arc<BlockShared>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.id())
            .field("category", &self.shared.category.name)
            .field("effect", &self.shared.effect_name)
            .field("target", &self.shared.target.label())
            .finish_non_exhaustive()
    }
}

impl Block {
    /// Build a block from a named effect
    ///
    /// Config layers resolve as `user_config` over the effect's config over
    /// the category default. Fails on a detached target or an unknown effect.
    pub fn new(
        bank: &EffectBank,
        effect_name: &str,
        target: Arc<dyn Target>,
        args: EffectArgs,
        user_config: PartialBlockConfig,
    ) -> Result<Self> {
        if !target.is_attached() {
            return Err(ConfigurationError::InvalidTarget(format!(
                "\"{}\" is not attached",
                target.label()
            ))
            .into());
        }
        let definition = bank.get(effect_name)?;
        let category = Arc::clone(bank.category());
        let config = BlockConfig::resolve(&category.default_config, &definition.config, &user_config)?;

        let (frames, backward_frames, generators, mutators) = match &definition.source {
            KeyframeSource::Precomputed(source) => {
                let (forward, backward) = source(&args);
                (forward, backward, None, None)
            }
            KeyframeSource::Generated(source) => (Keyframes::empty(), None, Some(source(&args)), None),
            KeyframeSource::Mutated(source) => (Keyframes::empty(), None, None, Some(source(&args))),
        };

        let label = format!("{effect_name}({})", target.label());
        let animation =
            TimedAnimation::new(label, target.create_driver(), config.timing(), frames)?;
        if let Some(backward) = backward_frames {
            animation.set_backward_frames(backward);
        }
        if let Some((forward, backward)) = mutators {
            animation.set_mutators(Some(forward), Some(backward));
        }

        let shared = Arc::new_cyclic(|weak: &Weak<BlockShared>| {
            animation.set_phase_hooks(Direction::Forward, phase_hooks(weak, Direction::Forward));
            animation.set_phase_hooks(Direction::Backward, phase_hooks(weak, Direction::Backward));
            BlockShared {
                ownership: Mutex::new(Ownership::default()),
                category,
                effect_name: effect_name.to_string(),
                target,
                config,
                generators,
                animation,
                schedule: Mutex::new(BlockSchedule::default()),
            }
        });

        Ok(Self { shared })
    }

    /// Block id (zero until the block joins a sequence)
    pub fn id(&self) -> BlockId {
        self.shared.ownership.lock().id
    }

    /// Owning sequence
    pub fn sequence_id(&self) -> SequenceId {
        self.shared.ownership.lock().sequence_id
    }

    /// Owning timeline
    pub fn timeline_id(&self) -> TimelineId {
        self.shared.ownership.lock().timeline_id
    }

    pub(crate) fn assign(&self, id: BlockId, sequence_id: SequenceId, timeline_id: TimelineId) {
        *self.shared.ownership.lock() = Ownership {
            id,
            sequence_id,
            timeline_id,
        };
    }

    /// Category record
    pub fn category(&self) -> &BlockCategory {
        &self.shared.category
    }

    /// Effect name within the category's bank
    pub fn effect_name(&self) -> &str {
        &self.shared.effect_name
    }

    /// Animated target
    pub fn target(&self) -> &Arc<dyn Target> {
        &self.shared.target
    }

    /// Resolved config
    pub fn config(&self) -> &BlockConfig {
        &self.shared.config
    }

    /// Owned animation
    pub fn animation(&self) -> &TimedAnimation {
        &self.shared.animation
    }

    /// Times computed by the last sequence commit
    pub fn schedule(&self) -> BlockSchedule {
        *self.shared.schedule.lock()
    }

    pub(crate) fn set_schedule(&self, schedule: BlockSchedule) {
        *self.shared.schedule.lock() = schedule;
    }

    /// Play forward
    pub async fn play(&self) -> Result<()> {
        self.animate(Direction::Forward).await
    }

    /// Play backward
    pub async fn rewind(&self) -> Result<()> {
        self.animate(Direction::Backward).await
    }

    /// Run the animation in `direction`
    ///
    /// While a run is underway this only resumes it.
    pub async fn animate(&self, direction: Direction) -> Result<()> {
        let animation = &self.shared.animation;
        if animation.in_progress() {
            return animation.play().await;
        }
        animation.set_direction(direction)?;
        debug!(block = %self.id(), effect = %self.shared.label(), %direction, "Block started");
        animation.play().await
    }

    /// Halt the animation
    pub fn pause(&self) {
        self.shared.animation.pause();
    }

    /// Resume the animation
    pub fn unpause(&self) {
        self.shared.animation.unpause();
    }

    /// Complete the current run instantly
    pub async fn finish(&self) -> Result<()> {
        self.shared.animation.finish().await
    }

    /// Apply the rate inherited from the sequence and timeline
    pub fn use_compounded_playback_rate(&self, parent_rate: f64) {
        self.shared.animation.set_rate_multiplier(parent_rate);
    }

    pub(crate) fn prepare(&self, direction: Direction) {
        self.shared.animation.prepare(direction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassMutations;
    use crate::effect::EffectDefinition;
    use crate::error::EngineError;
    use crate::keyframe::{KeyframeValue, PropertyKeyframe};
    use crate::target::{MemoryTarget, HIDDEN_CLASS};

    fn opacity(from: f32, to: f32) -> Keyframes {
        Keyframes(vec![
            PropertyKeyframe::new().with("opacity", KeyframeValue::Float(from)),
            PropertyKeyframe::new().with("opacity", KeyframeValue::Float(to)),
        ])
    }

    fn bank(category: BlockCategory) -> EffectBank {
        EffectBank::new(category)
            .with(
                "fade",
                EffectDefinition::precomputed(|_| (opacity(0.0, 1.0), None))
                    .with_config(PartialBlockConfig::new().with_duration(200.0)),
            )
            .unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_detached_target_fails_construction() {
        let target = MemoryTarget::new("ghost");
        target.set_attached(false);
        let result = Block::new(
            &bank(BlockCategory::emphasis()),
            "fade",
            target,
            EffectArgs::none(),
            PartialBlockConfig::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::Configuration(ConfigurationError::InvalidTarget(_)))
        ));
    }

    #[test]
    fn test_unknown_effect_fails_construction() {
        let result = Block::new(
            &bank(BlockCategory::emphasis()),
            "spin",
            MemoryTarget::new("box"),
            EffectArgs::none(),
            PartialBlockConfig::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::Configuration(ConfigurationError::UnknownEffect { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_restores_classes_and_schedule() {
        let target = MemoryTarget::hidden("card");
        target.add_classes(&strings(&["idle"]));
        let before = target.classes();

        let user = PartialBlockConfig::new().with_classes(ClassMutations {
            add_on_start: strings(&["moving"]),
            remove_on_start: strings(&["idle"]),
            add_on_finish: strings(&["done"]),
            remove_on_finish: strings(&["moving"]),
        });
        let block = Block::new(
            &bank(BlockCategory::entrance()),
            "fade",
            target.clone(),
            EffectArgs::none(),
            user,
        )
        .unwrap();
        let schedule = block.schedule();

        block.play().await.unwrap();
        assert!(target.is_rendered());
        assert!(target.has_class("done"));
        assert!(!target.has_class("idle"));
        assert!(!target.has_class("moving"));

        block.rewind().await.unwrap();
        let mut after = target.classes();
        let mut expected = before;
        after.sort();
        expected.sort();
        assert_eq!(after, expected);
        assert!(target.has_class(HIDDEN_CLASS));
        assert_eq!(block.schedule(), schedule);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_styles_on_hidden_target() {
        let strict = Block::new(
            &bank(BlockCategory::emphasis()),
            "fade",
            MemoryTarget::hidden("strict"),
            EffectArgs::none(),
            PartialBlockConfig::new(),
        )
        .unwrap();
        assert!(matches!(
            strict.play().await,
            Err(EngineError::CommitStyles(CommitStylesError::NotRendered { .. }))
        ));
        assert!(!strict.animation().in_progress());

        let target = MemoryTarget::hidden("forced");
        let forced = Block::new(
            &bank(BlockCategory::emphasis()),
            "fade",
            target.clone(),
            EffectArgs::none(),
            PartialBlockConfig::new().with_commit_styles_forcefully(true),
        )
        .unwrap();
        forced.play().await.unwrap();
        assert_eq!(target.committed()["opacity"], KeyframeValue::Float(1.0));
        assert!(!target.is_rendered());
        assert_eq!(target.cancellations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generators_run_after_start_mutations() {
        let target = MemoryTarget::new("panel");
        let observer = target.clone();
        let bank = EffectBank::new(BlockCategory::transition())
            .with(
                "grow",
                EffectDefinition::generated(move |_| {
                    let observer = observer.clone();
                    let forward: crate::effect::FrameGenerator = Arc::new(move || {
                        // Sees the class applied when the delay phase ended
                        let width = if observer.has_class("expanded") { 2.0 } else { 1.0 };
                        Keyframes(vec![PropertyKeyframe::new().with("width", KeyframeValue::Float(width))])
                    });
                    (forward, None)
                }),
            )
            .unwrap();

        let user = PartialBlockConfig::new().with_classes(ClassMutations {
            add_on_start: strings(&["expanded"]),
            ..Default::default()
        });
        let block = Block::new(&bank, "grow", target.clone(), EffectArgs::none(), user).unwrap();
        block.play().await.unwrap();
        assert_eq!(target.committed()["width"], KeyframeValue::Float(2.0));
        assert_eq!(
            block.animation().frames_for(Direction::Backward).0[0].properties["width"],
            KeyframeValue::Float(2.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_compounded_rate() {
        let block = Block::new(
            &bank(BlockCategory::emphasis()),
            "fade",
            MemoryTarget::new("box"),
            EffectArgs::none(),
            PartialBlockConfig::new(),
        )
        .unwrap();
        block.use_compounded_playback_rate(6.0);
        assert_eq!(block.animation().effective_playback_rate(), 6.0);
    }
}

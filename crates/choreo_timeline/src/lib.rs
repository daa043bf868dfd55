// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reversible, pausable, time-addressable effect scheduler.
//!
//! Playback is organized in four levels:
//! - [`TimedAnimation`]: one directional effect, split into awaitable segments
//! - [`Block`]: an animation bound to a target, a category and a config
//! - [`Sequence`]: blocks played in order, neighbours joined into groups
//! - [`Timeline`]: sequences stepped forward and backward like a tape
//!
//! ## Architecture
//!
//! Each run walks an ordered list of segments. A segment ends at a phase
//! boundary or at a caller-chosen time, and carries the callbacks,
//! roadblocks and integrityblocks that must settle before the run moves on.
//! Rendering is delegated to a [`RenderDriver`] created by the block's
//! [`Target`].

pub mod animation;
pub mod block;
pub mod category;
pub mod config;
pub mod driver;
pub mod effect;
pub mod error;
pub mod ids;
pub mod keyframe;
pub mod segment;
pub mod sequence;
pub mod target;
pub mod timeline;
pub mod timing;

pub use animation::{EffectDescriptor, FrameMutator, PauseRelay, RelaySignal, TimedAnimation, Tween};
pub use block::{Block, BlockSchedule};
pub use category::{BlockCategory, TargetHook};
pub use config::{BlockConfig, ClassMutations, PartialBlockConfig, SequenceConfig, TimelineConfig};
pub use driver::{FrameState, NullDriver, PlaybackEvent, RenderDriver, RunPhase};
pub use effect::{
    EffectArgs, EffectBank, EffectDefinition, FrameGenerator, GeneratorPair, KeyframePair,
    KeyframeSource, MutatorPair,
};
pub use error::{CommitStylesError, ConfigurationError, EngineError, Result, SchedulingStateError};
pub use ids::{BlockId, IdGenerator, RandomIds, SequenceId, SequentialIds, TimelineId};
pub use keyframe::{KeyframeValue, Keyframes, PropertyKeyframe};
pub use segment::{Awaitable, PhaseEmplacement, PhaseHooks, SegmentCallback};
pub use sequence::{BlockGroups, ReversibleHook, Sequence, SequencePlan, SequenceStatus};
pub use target::{MemoryTarget, Target, HIDDEN_CLASS};
pub use timeline::{Timeline, TimelineStatus};
pub use timing::{Composite, Direction, Easing, EffectTiming, Phase, TimePosition};

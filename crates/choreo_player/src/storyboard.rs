// SPDX-License-Identifier: MIT OR Apache-2.0
//! Storyboard files: a timeline, its targets, and a script to run against it.

use crate::library::EffectLibrary;
use crate::PlayerError;
use choreo_timeline::{
    Block, Direction, EffectArgs, KeyframeValue, MemoryTarget, PartialBlockConfig, Sequence,
    SequenceConfig, SequentialIds, Target, Timeline, TimelineConfig,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A target the storyboard animates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetEntry {
    /// Label blocks refer to
    pub label: String,
    /// Start with the hidden class
    pub hidden: bool,
}

/// One block of a sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockEntry {
    /// Category bank to draw the effect from
    pub category: String,
    /// Effect name within the bank
    pub effect: String,
    /// Target label
    pub target: String,
    /// Arguments for the effect's keyframe source
    pub args: Vec<KeyframeValue>,
    /// Highest config layer
    pub config: PartialBlockConfig,
}

/// One sequence and its blocks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceEntry {
    /// Sequence settings
    pub config: SequenceConfig,
    /// Blocks in play order
    pub blocks: Vec<BlockEntry>,
}

/// A script instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Step the timeline
    Step(Direction),
    /// Skip so that `tag` plus `offset` plays next
    SkipTo {
        /// Sequence tag
        tag: String,
        /// Offset from the tagged sequence
        #[serde(default)]
        offset: isize,
    },
    /// Force the pause state
    Pause(bool),
    /// Force skip mode
    Skipping(bool),
    /// Set the timeline rate
    Rate(f64),
    /// Sleep for some milliseconds
    Wait(f64),
}

/// Storyboard file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Storyboard {
    /// Timeline settings
    pub timeline: TimelineConfig,
    /// Targets, all attached
    pub targets: Vec<TargetEntry>,
    /// Sequences in timeline order
    pub sequences: Vec<SequenceEntry>,
    /// Commands run in order once the timeline is built
    pub script: Vec<Command>,
}

/// A built timeline plus the targets it animates
pub struct Stage {
    /// The timeline
    pub timeline: Timeline,
    /// Targets by label
    pub targets: IndexMap<String, Arc<MemoryTarget>>,
}

impl Storyboard {
    /// Parse a storyboard from RON text
    pub fn from_ron(s: &str) -> Result<Self, PlayerError> {
        Ok(ron::from_str(s)?)
    }

    /// Read and parse a storyboard file
    pub fn load(path: &Path) -> Result<Self, PlayerError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlayerError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let board = Self::from_ron(&content)?;
        info!(
            path = %path.display(),
            sequences = board.sequences.len(),
            commands = board.script.len(),
            "Loaded storyboard"
        );
        Ok(board)
    }

    /// Build the targets and timeline
    pub fn build(&self, library: &EffectLibrary) -> Result<Stage, PlayerError> {
        let targets: IndexMap<String, Arc<MemoryTarget>> = self
            .targets
            .iter()
            .map(|entry| {
                let target = if entry.hidden {
                    MemoryTarget::hidden(entry.label.clone())
                } else {
                    MemoryTarget::new(entry.label.clone())
                };
                (entry.label.clone(), target)
            })
            .collect();

        let mut sequences = Vec::with_capacity(self.sequences.len());
        for entry in &self.sequences {
            let mut blocks = Vec::with_capacity(entry.blocks.len());
            for block in &entry.blocks {
                let target = targets
                    .get(&block.target)
                    .ok_or_else(|| PlayerError::UnknownTarget(block.target.clone()))?;
                let bank = library.bank(&block.category)?;
                blocks.push(Block::new(
                    bank,
                    &block.effect,
                    Arc::clone(target) as Arc<dyn Target>,
                    EffectArgs::from(block.args.clone()),
                    block.config.clone(),
                )?);
            }
            sequences.push(Sequence::new(entry.config.clone())?.with_blocks(blocks));
        }

        let timeline = Timeline::new(self.timeline.clone(), SequentialIds::shared())?
            .with_sequences(sequences);
        Ok(Stage { timeline, targets })
    }
}

impl Stage {
    /// Run `script`, logging state after each command
    ///
    /// Scheduling failures are logged and the script carries on; anything
    /// else stops it.
    pub async fn run(&self, script: &[Command]) -> Result<(), PlayerError> {
        for command in script {
            let result = match command {
                Command::Step(direction) => self.timeline.step(*direction).await,
                Command::SkipTo { tag, offset } => self.timeline.skip_to(tag, *offset).await,
                Command::Pause(paused) => {
                    self.timeline.toggle_pause(Some(*paused));
                    Ok(())
                }
                Command::Skipping(skipping) => {
                    self.timeline.toggle_skipping(Some(*skipping));
                    Ok(())
                }
                Command::Rate(rate) => self.timeline.set_playback_rate(*rate),
                Command::Wait(ms) => {
                    tokio::time::sleep(Duration::from_secs_f64(ms.max(0.0) / 1000.0)).await;
                    Ok(())
                }
            };
            match result {
                Ok(()) => {}
                Err(choreo_timeline::EngineError::Scheduling(err)) => {
                    warn!(?command, error = %err, "Command rejected");
                }
                Err(err) => return Err(err.into()),
            }
            self.log_state();
        }
        Ok(())
    }

    fn log_state(&self) {
        let status = self.timeline.status();
        match ron::to_string(&status) {
            Ok(text) => info!(status = %text, "Timeline"),
            Err(err) => warn!(error = %err, "Could not serialize timeline status"),
        }
        for (label, target) in &self.targets {
            debug!(label = %label, rendered = target.is_rendered(), classes = ?target.classes(), "Target");
        }
    }
}

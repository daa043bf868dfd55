// SPDX-License-Identifier: MIT OR Apache-2.0
//! Block, sequence and timeline configuration.
//!
//! Block options come in three layers: the category default, the effect's
//! own config and the caller's config. Scalars take the highest layer that
//! sets them; class lists are concatenated across all layers with duplicates
//! dropped.
//!
//! Every config type reads from RON. Files may start with
//! `#![enable(implicit_some)]` to write optional values without `Some(..)`.

use crate::error::ConfigurationError;
use crate::timing::{Composite, Easing, EffectTiming};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

fn parse_ron<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, ConfigurationError> {
    ron::from_str(s).map_err(|e| ConfigurationError::Parse(e.to_string()))
}

/// Classes added or removed at phase boundaries
///
/// Named from the forward point of view; rewinding undoes them in reverse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassMutations {
    /// Added when the delay phase ends
    pub add_on_start: Vec<String>,
    /// Removed when the delay phase ends
    pub remove_on_start: Vec<String>,
    /// Added when the active phase ends
    pub add_on_finish: Vec<String>,
    /// Removed when the active phase ends
    pub remove_on_finish: Vec<String>,
}

impl ClassMutations {
    /// Concatenate two layers, keeping the first occurrence of each class
    pub fn merged(&self, higher: &ClassMutations) -> Self {
        fn join(lower: &[String], higher: &[String]) -> Vec<String> {
            lower
                .iter()
                .chain(higher)
                .cloned()
                .collect::<IndexSet<_>>()
                .into_iter()
                .collect()
        }
        Self {
            add_on_start: join(&self.add_on_start, &higher.add_on_start),
            remove_on_start: join(&self.remove_on_start, &higher.remove_on_start),
            add_on_finish: join(&self.add_on_finish, &higher.add_on_finish),
            remove_on_finish: join(&self.remove_on_finish, &higher.remove_on_finish),
        }
    }

    /// Check if nothing is mutated
    pub fn is_empty(&self) -> bool {
        self.add_on_start.is_empty()
            && self.remove_on_start.is_empty()
            && self.add_on_finish.is_empty()
            && self.remove_on_finish.is_empty()
    }
}

/// One layer of block options; unset fields fall through to lower layers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialBlockConfig {
    /// Active phase length in milliseconds
    pub duration: Option<f64>,
    /// Milliseconds before the active phase
    pub delay: Option<f64>,
    /// Milliseconds after the active phase
    pub end_delay: Option<f64>,
    /// Timing function handed to the driver
    pub easing: Option<Easing>,
    /// Block's own rate
    pub playback_rate: Option<f64>,
    /// Commit the final state when the active phase ends
    pub commits_styles: Option<bool>,
    /// Override the hidden state if committing fails
    pub commit_styles_forcefully: Option<bool>,
    /// Composition mode
    pub composite: Option<Composite>,
    /// Class mutations merged into lower layers
    pub classes: ClassMutations,
    /// The following block starts together with this one
    pub starts_next_block: Option<bool>,
    /// This block starts together with the previous one
    pub starts_with_previous: Option<bool>,
    /// The following block waits for this one
    pub blocks_next: Option<bool>,
    /// Rewinding the previous block waits for this one
    pub blocks_prev: Option<bool>,
}

impl PartialBlockConfig {
    /// Empty layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a layer from RON
    pub fn from_ron(s: &str) -> Result<Self, ConfigurationError> {
        parse_ron(s)
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the delay
    pub fn with_delay(mut self, delay: f64) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the end delay
    pub fn with_end_delay(mut self, end_delay: f64) -> Self {
        self.end_delay = Some(end_delay);
        self
    }

    /// Set the easing
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = Some(easing);
        self
    }

    /// Set the block's own rate
    pub fn with_playback_rate(mut self, rate: f64) -> Self {
        self.playback_rate = Some(rate);
        self
    }

    /// Set whether styles are committed
    pub fn with_commits_styles(mut self, commits: bool) -> Self {
        self.commits_styles = Some(commits);
        self
    }

    /// Set whether style commits may override the hidden state
    pub fn with_commit_styles_forcefully(mut self, forcefully: bool) -> Self {
        self.commit_styles_forcefully = Some(forcefully);
        self
    }

    /// Set the composition mode
    pub fn with_composite(mut self, composite: Composite) -> Self {
        self.composite = Some(composite);
        self
    }

    /// Replace the class mutations
    pub fn with_classes(mut self, classes: ClassMutations) -> Self {
        self.classes = classes;
        self
    }

    /// Let the following block start together with this one
    pub fn starting_next_block(mut self) -> Self {
        self.starts_next_block = Some(true);
        self
    }

    /// Start together with the previous block
    pub fn starting_with_previous(mut self) -> Self {
        self.starts_with_previous = Some(true);
        self
    }

    /// Set whether the following block waits for this one
    pub fn with_blocks_next(mut self, blocks: bool) -> Self {
        self.blocks_next = Some(blocks);
        self
    }

    /// Set whether rewinding the previous block waits for this one
    pub fn with_blocks_prev(mut self, blocks: bool) -> Self {
        self.blocks_prev = Some(blocks);
        self
    }

    /// This layer laid over `lower`
    pub fn over(&self, lower: &PartialBlockConfig) -> Self {
        Self {
            duration: self.duration.or(lower.duration),
            delay: self.delay.or(lower.delay),
            end_delay: self.end_delay.or(lower.end_delay),
            easing: self.easing.or(lower.easing),
            playback_rate: self.playback_rate.or(lower.playback_rate),
            commits_styles: self.commits_styles.or(lower.commits_styles),
            commit_styles_forcefully: self
                .commit_styles_forcefully
                .or(lower.commit_styles_forcefully),
            composite: self.composite.or(lower.composite),
            classes: lower.classes.merged(&self.classes),
            starts_next_block: self.starts_next_block.or(lower.starts_next_block),
            starts_with_previous: self.starts_with_previous.or(lower.starts_with_previous),
            blocks_next: self.blocks_next.or(lower.blocks_next),
            blocks_prev: self.blocks_prev.or(lower.blocks_prev),
        }
    }
}

/// Fully resolved block options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Active phase length in milliseconds
    pub duration: f64,
    /// Milliseconds before the active phase
    pub delay: f64,
    /// Milliseconds after the active phase
    pub end_delay: f64,
    /// Timing function handed to the driver
    pub easing: Easing,
    /// Block's own rate
    pub playback_rate: f64,
    /// Commit the final state when the active phase ends
    pub commits_styles: bool,
    /// Override the hidden state if committing fails
    pub commit_styles_forcefully: bool,
    /// Composition mode
    pub composite: Composite,
    /// Class mutations
    pub classes: ClassMutations,
    /// The following block starts together with this one
    pub starts_next_block: bool,
    /// This block starts together with the previous one
    pub starts_with_previous: bool,
    /// The following block waits for this one
    pub blocks_next: bool,
    /// Rewinding the previous block waits for this one
    pub blocks_prev: bool,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            duration: 500.0,
            delay: 0.0,
            end_delay: 0.0,
            easing: Easing::Linear,
            playback_rate: 1.0,
            commits_styles: true,
            commit_styles_forcefully: false,
            composite: Composite::Replace,
            classes: ClassMutations::default(),
            starts_next_block: false,
            starts_with_previous: false,
            blocks_next: true,
            blocks_prev: true,
        }
    }
}

impl BlockConfig {
    /// Resolve the three layers: `user` over `effect` over `category`
    ///
    /// Timing values are validated and the duration is clamped to
    /// [`DURATION_EPSILON`](crate::timing::DURATION_EPSILON).
    pub fn resolve(
        category: &PartialBlockConfig,
        effect: &PartialBlockConfig,
        user: &PartialBlockConfig,
    ) -> Result<Self, ConfigurationError> {
        let layered = user.over(&effect.over(category));
        let defaults = Self::default();
        let resolved = Self {
            duration: layered.duration.unwrap_or(defaults.duration),
            delay: layered.delay.unwrap_or(defaults.delay),
            end_delay: layered.end_delay.unwrap_or(defaults.end_delay),
            easing: layered.easing.unwrap_or(defaults.easing),
            playback_rate: layered.playback_rate.unwrap_or(defaults.playback_rate),
            commits_styles: layered.commits_styles.unwrap_or(defaults.commits_styles),
            commit_styles_forcefully: layered
                .commit_styles_forcefully
                .unwrap_or(defaults.commit_styles_forcefully),
            composite: layered.composite.unwrap_or(defaults.composite),
            classes: layered.classes,
            starts_next_block: layered.starts_next_block.unwrap_or(defaults.starts_next_block),
            starts_with_previous: layered
                .starts_with_previous
                .unwrap_or(defaults.starts_with_previous),
            blocks_next: layered.blocks_next.unwrap_or(defaults.blocks_next),
            blocks_prev: layered.blocks_prev.unwrap_or(defaults.blocks_prev),
        };

        let timing = resolved.timing().validated()?;
        Ok(Self {
            duration: timing.duration,
            ..resolved
        })
    }

    /// Forward timing described by this config
    pub fn timing(&self) -> EffectTiming {
        EffectTiming {
            delay: self.delay,
            duration: self.duration,
            end_delay: self.end_delay,
            easing: self.easing,
            playback_rate: self.playback_rate,
            composite: self.composite,
        }
    }
}

/// Options for one sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Shown in logs and status
    pub description: String,
    /// Address used by `skip_to`
    pub tag: String,
    /// Play as soon as the previous sequence finishes
    pub autoplays: bool,
    /// Keep stepping forward after this sequence
    pub continue_next: bool,
    /// Keep stepping backward after rewinding this sequence
    pub continue_prev: bool,
    /// Sequence's own rate
    pub playback_rate: f64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            description: "<blank sequence description>".to_string(),
            tag: String::new(),
            autoplays: false,
            continue_next: false,
            continue_prev: false,
            playback_rate: 1.0,
        }
    }
}

impl SequenceConfig {
    /// Read from RON
    pub fn from_ron(s: &str) -> Result<Self, ConfigurationError> {
        parse_ron(s)
    }

    /// Reject a non-positive or non-finite rate
    pub fn validated(self) -> Result<Self, ConfigurationError> {
        validate_rate(self.playback_rate)?;
        Ok(self)
    }
}

/// Options for a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Shown in logs and status
    pub name: String,
    /// Rate applied on top of every sequence
    pub playback_rate: f64,
    /// Start with stepping paused
    pub paused: bool,
    /// Start in skip mode
    pub skipping: bool,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            name: "timeline".to_string(),
            playback_rate: 1.0,
            paused: false,
            skipping: false,
        }
    }
}

impl TimelineConfig {
    /// Read from RON
    pub fn from_ron(s: &str) -> Result<Self, ConfigurationError> {
        parse_ron(s)
    }

    /// Reject a non-positive or non-finite rate
    pub fn validated(self) -> Result<Self, ConfigurationError> {
        validate_rate(self.playback_rate)?;
        Ok(self)
    }
}

pub(crate) fn validate_rate(rate: f64) -> Result<f64, ConfigurationError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(ConfigurationError::InvalidPlaybackRate(rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::DURATION_EPSILON;

    fn classes(add_on_start: &[&str]) -> ClassMutations {
        ClassMutations {
            add_on_start: add_on_start.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_precedence() {
        let category = PartialBlockConfig::new()
            .with_duration(300.0)
            .with_easing(Easing::EaseIn)
            .with_commits_styles(false);
        let effect = PartialBlockConfig::new()
            .with_duration(400.0)
            .with_delay(50.0);
        let user = PartialBlockConfig::new().with_duration(600.0);

        let config = BlockConfig::resolve(&category, &effect, &user).unwrap();
        assert_eq!(config.duration, 600.0);
        assert_eq!(config.delay, 50.0);
        assert_eq!(config.easing, Easing::EaseIn);
        assert!(!config.commits_styles);
        assert!(config.blocks_next);
        assert_eq!(config.playback_rate, 1.0);
    }

    #[test]
    fn test_class_lists_concatenate() {
        let category = PartialBlockConfig::new().with_classes(classes(&["shown", "a"]));
        let effect = PartialBlockConfig::new().with_classes(classes(&["a", "b"]));
        let user = PartialBlockConfig::new().with_classes(classes(&["c", "shown"]));

        let config = BlockConfig::resolve(&category, &effect, &user).unwrap();
        assert_eq!(config.classes.add_on_start, vec!["shown", "a", "b", "c"]);
        assert!(config.classes.remove_on_finish.is_empty());
    }

    #[test]
    fn test_zero_duration_is_clamped() {
        let user = PartialBlockConfig::new().with_duration(0.0);
        let config =
            BlockConfig::resolve(&PartialBlockConfig::new(), &PartialBlockConfig::new(), &user)
                .unwrap();
        assert_eq!(config.duration, DURATION_EPSILON);

        let negative = PartialBlockConfig::new().with_delay(-5.0);
        assert!(BlockConfig::resolve(
            &PartialBlockConfig::new(),
            &PartialBlockConfig::new(),
            &negative
        )
        .is_err());
    }

    #[test]
    fn test_from_ron() {
        let partial = PartialBlockConfig::from_ron(
            r#"#![enable(implicit_some)]
            (
                duration: 250.0,
                easing: EaseOut,
                classes: (add_on_finish: ["done"]),
                blocks_next: false,
            )"#,
        )
        .unwrap();
        assert_eq!(partial.duration, Some(250.0));
        assert_eq!(partial.easing, Some(Easing::EaseOut));
        assert_eq!(partial.classes.add_on_finish, vec!["done"]);
        assert_eq!(partial.blocks_next, Some(false));
        assert_eq!(partial.delay, None);

        let sequence = SequenceConfig::from_ron(r#"(tag: "intro", continue_next: true)"#).unwrap();
        assert_eq!(sequence.tag, "intro");
        assert!(sequence.continue_next);
        assert_eq!(sequence.playback_rate, 1.0);

        assert!(matches!(
            TimelineConfig::from_ron("(playback_rate: )"),
            Err(ConfigurationError::Parse(_))
        ));
        assert!(TimelineConfig {
            playback_rate: 0.0,
            ..Default::default()
        }
        .validated()
        .is_err());
    }
}

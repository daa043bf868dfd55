// SPDX-License-Identifier: MIT OR Apache-2.0
//! Block categories.
//!
//! A category is a capability record: up to four target hooks plus a default
//! config layer. Every block of a category shares the same record.

use crate::config::PartialBlockConfig;
use crate::error::Result;
use crate::target::{Target, HIDDEN_CLASS};
use crate::timing::{Composite, Direction};
use std::fmt;
use std::sync::Arc;

/// Hook run against a block's target at a phase boundary
pub type TargetHook = Arc<dyn Fn(&dyn Target) -> Result<()> + Send + Sync>;

/// Hooks and defaults shared by a family of effects
#[derive(Clone, Default)]
pub struct BlockCategory {
    /// Category name
    pub name: String,
    /// Forward delay phase ended
    pub on_start_forward: Option<TargetHook>,
    /// Forward active phase ended
    pub on_finish_forward: Option<TargetHook>,
    /// Backward delay phase ended
    pub on_start_backward: Option<TargetHook>,
    /// Backward active phase ended
    pub on_finish_backward: Option<TargetHook>,
    /// Lowest config layer
    pub default_config: PartialBlockConfig,
}

impl fmt::Debug for BlockCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCategory")
            .field("name", &self.name)
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

impl BlockCategory {
    /// Category without hooks
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the default config layer
    pub fn with_default_config(mut self, config: PartialBlockConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Set the hook run when `direction`'s delay phase ends
    pub fn on_start(
        mut self,
        direction: Direction,
        hook: impl Fn(&dyn Target) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let hook: TargetHook = Arc::new(hook);
        match direction {
            Direction::Forward => self.on_start_forward = Some(hook),
            Direction::Backward => self.on_start_backward = Some(hook),
        }
        self
    }

    /// Set the hook run when `direction`'s active phase ends
    pub fn on_finish(
        mut self,
        direction: Direction,
        hook: impl Fn(&dyn Target) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let hook: TargetHook = Arc::new(hook);
        match direction {
            Direction::Forward => self.on_finish_forward = Some(hook),
            Direction::Backward => self.on_finish_backward = Some(hook),
        }
        self
    }

    pub(crate) fn start_hook(&self, direction: Direction) -> Option<&TargetHook> {
        match direction {
            Direction::Forward => self.on_start_forward.as_ref(),
            Direction::Backward => self.on_start_backward.as_ref(),
        }
    }

    pub(crate) fn finish_hook(&self, direction: Direction) -> Option<&TargetHook> {
        match direction {
            Direction::Forward => self.on_finish_forward.as_ref(),
            Direction::Backward => self.on_finish_backward.as_ref(),
        }
    }

    /// Reveals a hidden target when it starts and hides it again on rewind
    pub fn entrance() -> Self {
        Self::new("entrance")
            .with_default_config(PartialBlockConfig::new().with_commits_styles(false))
            .on_start(Direction::Forward, |target| {
                target.remove_classes(&[HIDDEN_CLASS.to_string()]);
                Ok(())
            })
            .on_finish(Direction::Backward, |target| {
                target.add_classes(&[HIDDEN_CLASS.to_string()]);
                Ok(())
            })
    }

    /// Hides a target when it finishes and reveals it again on rewind
    pub fn exit() -> Self {
        Self::new("exit")
            .with_default_config(PartialBlockConfig::new().with_commits_styles(false))
            .on_finish(Direction::Forward, |target| {
                target.add_classes(&[HIDDEN_CLASS.to_string()]);
                Ok(())
            })
            .on_start(Direction::Backward, |target| {
                target.remove_classes(&[HIDDEN_CLASS.to_string()]);
                Ok(())
            })
    }

    /// Draws attention to a visible target
    pub fn emphasis() -> Self {
        Self::new("emphasis")
    }

    /// Moves a target; offsets accumulate onto its current placement
    pub fn motion() -> Self {
        Self::new("motion")
            .with_default_config(PartialBlockConfig::new().with_composite(Composite::Accumulate))
    }

    /// Scrolls a container; the scroll position is its own final state
    pub fn scroller() -> Self {
        Self::new("scroller")
            .with_default_config(PartialBlockConfig::new().with_commits_styles(false))
    }

    /// Morphs a target between two states
    pub fn transition() -> Self {
        Self::new("transition")
    }
}

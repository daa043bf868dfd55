// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named effects and the banks that hold them.
//!
//! An [`EffectBank`] maps effect names to [`EffectDefinition`]s for one
//! [`BlockCategory`]. Definitions are checked when they are registered, so a
//! block built from a bank only fails on a name the bank never had.

use crate::animation::FrameMutator;
use crate::category::BlockCategory;
use crate::config::{BlockConfig, PartialBlockConfig};
use crate::error::ConfigurationError;
use crate::keyframe::{KeyframeValue, Keyframes};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Arguments handed to a keyframe source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectArgs(pub Vec<KeyframeValue>);

impl EffectArgs {
    /// No arguments
    pub fn none() -> Self {
        Self::default()
    }

    /// Argument at `index`
    pub fn get(&self, index: usize) -> Option<&KeyframeValue> {
        self.0.get(index)
    }

    /// Float argument at `index`
    pub fn float(&self, index: usize) -> Option<f32> {
        self.get(index).and_then(KeyframeValue::as_float)
    }
}

impl From<Vec<KeyframeValue>> for EffectArgs {
    fn from(args: Vec<KeyframeValue>) -> Self {
        Self(args)
    }
}

/// Lazily invoked keyframe generator
pub type FrameGenerator = Arc<dyn Fn() -> Keyframes + Send + Sync>;

/// Forward keyframes and optional explicit backward keyframes
pub type KeyframePair = (Keyframes, Option<Keyframes>);

/// Forward generator and optional explicit backward generator
pub type GeneratorPair = (FrameGenerator, Option<FrameGenerator>);

/// Forward and backward per-frame mutators
pub type MutatorPair = (FrameMutator, FrameMutator);

/// How an effect produces its keyframes
#[derive(Clone)]
pub enum KeyframeSource {
    /// Keyframes computed when the block is built
    Precomputed(Arc<dyn Fn(&EffectArgs) -> KeyframePair + Send + Sync>),
    /// Generators invoked when a direction's delay phase ends
    Generated(Arc<dyn Fn(&EffectArgs) -> GeneratorPair + Send + Sync>),
    /// Mutators invoked on every frame of the active phase
    Mutated(Arc<dyn Fn(&EffectArgs) -> MutatorPair + Send + Sync>),
}

impl fmt::Debug for KeyframeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precomputed(_) => f.write_str("Precomputed"),
            Self::Generated(_) => f.write_str("Generated"),
            Self::Mutated(_) => f.write_str("Mutated"),
        }
    }
}

/// A named effect: keyframe source plus its config layer
#[derive(Debug, Clone)]
pub struct EffectDefinition {
    /// Keyframe source
    pub source: KeyframeSource,
    /// Middle config layer
    pub config: PartialBlockConfig,
}

impl EffectDefinition {
    /// Effect whose keyframes are computed up front
    pub fn precomputed(f: impl Fn(&EffectArgs) -> KeyframePair + Send + Sync + 'static) -> Self {
        Self {
            source: KeyframeSource::Precomputed(Arc::new(f)),
            config: PartialBlockConfig::default(),
        }
    }

    /// Effect whose keyframes are generated when playback reaches them
    pub fn generated(f: impl Fn(&EffectArgs) -> GeneratorPair + Send + Sync + 'static) -> Self {
        Self {
            source: KeyframeSource::Generated(Arc::new(f)),
            config: PartialBlockConfig::default(),
        }
    }

    /// Effect driven by per-frame mutators
    pub fn mutated(f: impl Fn(&EffectArgs) -> MutatorPair + Send + Sync + 'static) -> Self {
        Self {
            source: KeyframeSource::Mutated(Arc::new(f)),
            config: PartialBlockConfig::default(),
        }
    }

    /// Set the effect's config layer
    pub fn with_config(mut self, config: PartialBlockConfig) -> Self {
        self.config = config;
        self
    }
}

/// Registry of effects for one category
#[derive(Debug, Clone)]
pub struct EffectBank {
    category: Arc<BlockCategory>,
    effects: IndexMap<String, EffectDefinition>,
}

impl EffectBank {
    /// Empty bank
    pub fn new(category: BlockCategory) -> Self {
        Self {
            category: Arc::new(category),
            effects: IndexMap::new(),
        }
    }

    /// Category shared by every effect in the bank
    pub fn category(&self) -> &Arc<BlockCategory> {
        &self.category
    }

    /// Add an effect
    ///
    /// Rejects empty and duplicate names, and configs that do not resolve
    /// over the category default.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        definition: EffectDefinition,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigurationError::EmptyEffectName);
        }
        if self.effects.contains_key(&name) {
            return Err(ConfigurationError::DuplicateEffect(name));
        }
        BlockConfig::resolve(
            &self.category.default_config,
            &definition.config,
            &PartialBlockConfig::default(),
        )?;
        self.effects.insert(name, definition);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(
        mut self,
        name: impl Into<String>,
        definition: EffectDefinition,
    ) -> Result<Self, ConfigurationError> {
        self.register(name, definition)?;
        Ok(self)
    }

    /// Look up an effect
    pub fn get(&self, name: &str) -> Result<&EffectDefinition, ConfigurationError> {
        self.effects
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownEffect {
                category: self.category.name.clone(),
                name: name.to_string(),
            })
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.effects.keys().map(String::as_str)
    }

    /// Number of effects
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Check if the bank is empty
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

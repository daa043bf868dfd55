// SPDX-License-Identifier: MIT OR Apache-2.0
//! Effect banks available to storyboards.

use crate::PlayerError;
use choreo_timeline::{
    BlockCategory, Composite, EffectArgs, EffectBank, EffectDefinition, FrameGenerator,
    FrameMutator, KeyframeValue, Keyframes, PartialBlockConfig, PropertyKeyframe, Tween,
};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::trace;

/// Effect banks keyed by category name
#[derive(Debug, Clone, Default)]
pub struct EffectLibrary {
    banks: IndexMap<String, EffectBank>,
}

fn opacity(from: f32, to: f32) -> Keyframes {
    Keyframes(vec![
        PropertyKeyframe::new().with("opacity", KeyframeValue::Float(from)),
        PropertyKeyframe::new().with("opacity", KeyframeValue::Float(to)),
    ])
}

fn translate(from: [f32; 2], to: [f32; 2]) -> Keyframes {
    Keyframes(vec![
        PropertyKeyframe::new().with("translate", KeyframeValue::Vec2(from)),
        PropertyKeyframe::new().with("translate", KeyframeValue::Vec2(to)),
    ])
}

fn vec2_arg(args: &EffectArgs, index: usize) -> [f32; 2] {
    match args.get(index) {
        Some(KeyframeValue::Vec2(v)) => *v,
        _ => [0.0, 0.0],
    }
}

impl EffectLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bank under its category's name
    pub fn insert(&mut self, bank: EffectBank) {
        self.banks.insert(bank.category().name.clone(), bank);
    }

    /// Bank for `category`
    pub fn bank(&self, category: &str) -> Result<&EffectBank, PlayerError> {
        self.banks
            .get(category)
            .ok_or_else(|| PlayerError::UnknownCategory(category.to_string()))
    }

    /// Category names in insertion order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.banks.keys().map(String::as_str)
    }

    /// Banks for the six built-in categories
    pub fn standard() -> Result<Self, PlayerError> {
        let mut library = Self::new();

        library.insert(
            EffectBank::new(BlockCategory::entrance())
                .with("fade-in", EffectDefinition::precomputed(|_| (opacity(0.0, 1.0), None)))?
                .with(
                    "slide-in",
                    EffectDefinition::precomputed(|args| (translate(vec2_arg(args, 0), [0.0, 0.0]), None))
                        .with_config(PartialBlockConfig::new().with_duration(400.0)),
                )?,
        );

        library.insert(
            EffectBank::new(BlockCategory::exit())
                .with("fade-out", EffectDefinition::precomputed(|_| (opacity(1.0, 0.0), None)))?,
        );

        let pulse = Keyframes(vec![
            PropertyKeyframe::new().with("scale", KeyframeValue::Float(1.0)),
            PropertyKeyframe::at(0.5).with("scale", KeyframeValue::Float(1.1)),
            PropertyKeyframe::new().with("scale", KeyframeValue::Float(1.0)),
        ]);
        library.insert(
            EffectBank::new(BlockCategory::emphasis())
                .with("pulse", EffectDefinition::precomputed(move |_| (pulse.clone(), None)))?
                .with(
                    "highlight",
                    EffectDefinition::precomputed(|args| {
                        let color = match args.get(0) {
                            Some(KeyframeValue::Color(c)) => *c,
                            _ => [1.0, 1.0, 0.0, 1.0],
                        };
                        let frames = Keyframes(vec![
                            PropertyKeyframe::new().with("background", KeyframeValue::Color([0.0; 4])),
                            PropertyKeyframe::new().with("background", KeyframeValue::Color(color)),
                        ]);
                        (frames, None)
                    }),
                )?,
        );

        library.insert(
            EffectBank::new(BlockCategory::motion()).with(
                "translate",
                EffectDefinition::precomputed(|args| (translate([0.0, 0.0], vec2_arg(args, 0)), None))
                    .with_config(PartialBlockConfig::new().with_composite(Composite::Accumulate)),
            )?,
        );

        library.insert(
            EffectBank::new(BlockCategory::scroller()).with(
                "scroll",
                EffectDefinition::mutated(|args| {
                    let distance = f64::from(args.float(0).unwrap_or(100.0));
                    let forward: FrameMutator = Arc::new(move |tween: &Tween| {
                        trace!(offset = tween.compute_tween(0.0, distance), "Scrolled");
                    });
                    let backward: FrameMutator = Arc::new(move |tween: &Tween| {
                        trace!(offset = tween.compute_tween(distance, 0.0), "Scrolled");
                    });
                    (forward, backward)
                }),
            )?,
        );

        library.insert(
            EffectBank::new(BlockCategory::transition()).with(
                "morph",
                EffectDefinition::generated(|args| {
                    let width = args.float(0).unwrap_or(1.0);
                    let forward: FrameGenerator = Arc::new(move || {
                        Keyframes(vec![
                            PropertyKeyframe::new().with("width", KeyframeValue::Float(1.0)),
                            PropertyKeyframe::new().with("width", KeyframeValue::Float(width)),
                        ])
                    });
                    (forward, None)
                }),
            )?,
        );

        Ok(library)
    }
}

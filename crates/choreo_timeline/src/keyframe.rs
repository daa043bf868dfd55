// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property keyframes handed to render drivers.

use crate::timing::{Composite, Easing};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Value stored in a keyframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyframeValue {
    /// Float value
    Float(f32),
    /// 2D vector
    Vec2([f32; 2]),
    /// 3D vector
    Vec3([f32; 3]),
    /// Color (RGBA)
    Color([f32; 4]),
    /// Boolean
    Bool(bool),
    /// Opaque text (e.g. a CSS value the driver understands)
    Text(String),
}

/// One keyframe: a set of property values at an offset of the active phase
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyKeyframe {
    /// Position in `[0, 1]`; `None` lets the keyframe be spaced evenly
    pub offset: Option<f32>,
    /// Timing function from this keyframe to the next
    pub easing: Option<Easing>,
    /// Composition override for this keyframe
    pub composite: Option<Composite>,
    /// Property values
    pub properties: IndexMap<String, KeyframeValue>,
}

impl PropertyKeyframe {
    /// Create an empty keyframe
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a keyframe pinned to an offset
    pub fn at(offset: f32) -> Self {
        Self {
            offset: Some(offset),
            ..Self::default()
        }
    }

    /// Set a property value
    pub fn with(mut self, property: impl Into<String>, value: KeyframeValue) -> Self {
        self.properties.insert(property.into(), value);
        self
    }

    /// Set the easing to the next keyframe
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = Some(easing);
        self
    }
}

/// Ordered keyframes for one direction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Keyframes(pub Vec<PropertyKeyframe>);

impl Keyframes {
    /// No keyframes (effects driven purely by mutators)
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Check if there are no keyframes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keyframes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate keyframes in order
    pub fn iter(&self) -> impl Iterator<Item = &PropertyKeyframe> {
        self.0.iter()
    }

    /// Offsets with missing ones spaced evenly between their neighbours
    pub fn computed_offsets(&self) -> Vec<f32> {
        let len = self.0.len();
        let mut offsets: Vec<Option<f32>> = self.0.iter().map(|k| k.offset).collect();
        if len == 0 {
            return Vec::new();
        }
        if offsets[0].is_none() {
            offsets[0] = Some(if len == 1 { 1.0 } else { 0.0 });
        }
        if offsets[len - 1].is_none() {
            offsets[len - 1] = Some(1.0);
        }

        let mut start = 0;
        while start < len {
            let Some(next_known) = (start + 1..len).find(|&i| offsets[i].is_some()) else {
                break;
            };
            let from = offsets[start].unwrap_or(0.0);
            let to = offsets[next_known].unwrap_or(1.0);
            let gap = (next_known - start) as f32;
            for i in start + 1..next_known {
                offsets[i] = Some(from + (to - from) * (i - start) as f32 / gap);
            }
            start = next_known;
        }

        offsets.into_iter().map(|o| o.unwrap_or(1.0)).collect()
    }

    /// The same keyframes played from end to start
    ///
    /// Offsets become `1 - offset`, and each interval keeps its easing in
    /// time-inverted form.
    pub fn mirrored(&self) -> Self {
        let offsets = self.computed_offsets();
        let len = self.0.len();
        let frames = (0..len)
            .map(|j| {
                let source = &self.0[len - 1 - j];
                // The interval after new keyframe j was the interval after old keyframe len-2-j
                let easing = (j + 1 < len)
                    .then(|| self.0[len - 2 - j].easing.map(Easing::inverse))
                    .flatten();
                PropertyKeyframe {
                    offset: Some(1.0 - offsets[len - 1 - j]),
                    easing,
                    composite: source.composite,
                    properties: source.properties.clone(),
                }
            })
            .collect();
        Self(frames)
    }

    /// Linearly sample every property at `progress`
    ///
    /// Used to resolve the final state a driver commits. Easing curves are not
    /// applied.
    pub fn sample(&self, progress: f32) -> IndexMap<String, KeyframeValue> {
        let offsets = self.computed_offsets();
        let mut tracks: IndexMap<&str, Vec<(f32, &KeyframeValue)>> = IndexMap::new();
        for (keyframe, offset) in self.0.iter().zip(&offsets) {
            for (name, value) in &keyframe.properties {
                tracks.entry(name.as_str()).or_default().push((*offset, value));
            }
        }

        tracks
            .into_iter()
            .filter_map(|(name, points)| {
                let value = match points.iter().position(|(offset, _)| *offset >= progress) {
                    None => points.last().map(|(_, v)| (*v).clone()),
                    Some(0) => points.first().map(|(_, v)| (*v).clone()),
                    Some(idx) => {
                        let (a_off, a) = points[idx - 1];
                        let (b_off, b) = points[idx];
                        if (b_off - a_off).abs() < 0.0001 {
                            Some(b.clone())
                        } else {
                            a.interpolate(b, (progress - a_off) / (b_off - a_off))
                        }
                    }
                }?;
                Some((name.to_string(), value))
            })
            .collect()
    }
}

impl From<Vec<PropertyKeyframe>> for Keyframes {
    fn from(frames: Vec<PropertyKeyframe>) -> Self {
        Self(frames)
    }
}

/// Interpolation utilities
pub struct Interpolation;

impl Interpolation {
    /// Linear interpolation between two floats
    pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
        a + (b - a) * t
    }

    /// Interpolate fixed-size vectors component-wise
    pub fn lerp_array<const N: usize>(a: [f32; N], b: [f32; N], t: f32) -> [f32; N] {
        std::array::from_fn(|i| Self::lerp(a[i], b[i], t))
    }
}

impl KeyframeValue {
    /// Interpolate between two keyframe values; `None` for mismatched kinds
    pub fn interpolate(&self, other: &KeyframeValue, t: f32) -> Option<KeyframeValue> {
        match (self, other) {
            (KeyframeValue::Float(a), KeyframeValue::Float(b)) => {
                Some(KeyframeValue::Float(Interpolation::lerp(*a, *b, t)))
            }
            (KeyframeValue::Vec2(a), KeyframeValue::Vec2(b)) => {
                Some(KeyframeValue::Vec2(Interpolation::lerp_array(*a, *b, t)))
            }
            (KeyframeValue::Vec3(a), KeyframeValue::Vec3(b)) => {
                Some(KeyframeValue::Vec3(Interpolation::lerp_array(*a, *b, t)))
            }
            (KeyframeValue::Color(a), KeyframeValue::Color(b)) => {
                Some(KeyframeValue::Color(Interpolation::lerp_array(*a, *b, t)))
            }
            // Discrete values flip at the end of the interval
            (KeyframeValue::Bool(a), KeyframeValue::Bool(b)) => {
                Some(KeyframeValue::Bool(if t < 1.0 { *a } else { *b }))
            }
            (KeyframeValue::Text(a), KeyframeValue::Text(b)) => {
                Some(KeyframeValue::Text(if t < 1.0 { a.clone() } else { b.clone() }))
            }
            _ => None,
        }
    }

    /// Get as float if possible
    pub fn as_float(&self) -> Option<f32> {
        match self {
            KeyframeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as text if possible
    pub fn as_text(&self) -> Option<&str> {
        match self {
            KeyframeValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Entity identifiers and the injectable generator that hands them out.
//!
//! Blocks, sequences and timelines refer to their owners by id only. Ids are
//! drawn from an [`IdGenerator`] handed to the owner at construction, so two
//! timelines in one process never share counter state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Source of fresh entity ids
pub trait IdGenerator: Send + Sync {
    /// Return an id not handed out before by this generator
    fn next_id(&self) -> u64;
}

/// Monotonic counter starting at 1
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    /// Create a counter whose first id is 1
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create a counter behind a shareable handle
    pub fn shared() -> Arc<dyn IdGenerator> {
        Arc::new(Self::new())
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Ids taken from random v4 UUIDs, for ids that must stay unique across
/// processes
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> u64 {
        // 0 marks "unassigned"
        loop {
            let (high, _) = Uuid::new_v4().as_u64_pair();
            if high != 0 {
                return high;
            }
        }
    }
}

/// Unique identifier for a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockId(pub u64);

/// Unique identifier for a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequenceId(pub u64);

/// Unique identifier for a timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimelineId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sequence#{}", self.0)
    }
}

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timeline#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_are_independent() {
        let a = SequentialIds::new();
        let b = SequentialIds::new();
        assert_eq!(a.next_id(), 1);
        assert_eq!(a.next_id(), 2);
        assert_eq!(b.next_id(), 1);
    }

    #[test]
    fn test_random_ids_are_nonzero() {
        let ids = RandomIds;
        for _ in 0..32 {
            assert_ne!(ids.next_id(), 0);
        }
    }
}

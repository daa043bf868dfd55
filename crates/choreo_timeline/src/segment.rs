// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stopping points along one directional run.
//!
//! A segment's position is an end-delay offset: milliseconds measured from
//! the end of the active phase, negative inside the delay and active phases.
//! Each run starts with three segments, one per phase boundary, and more are
//! spliced in whenever a caller asks to be told about (or to hold up) a moment
//! of the run. Lists stay sorted ascending by offset, and nothing may be
//! spliced in front of a segment that has already been activated.

use crate::error::{ConfigurationError, Result};
use crate::timing::{Direction, EffectTiming, Phase, TimePosition, TIME_EPSILON};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Future a segment waits on
pub type Awaitable = BoxFuture<'static, ()>;

/// Callback fired when a segment completes
pub type SegmentCallback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Progress markers of a segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Playback is heading to this segment (or past it)
    pub activated: bool,
    /// Playback reached this segment
    pub completed: bool,
}

/// A stopping point
pub struct Segment {
    /// Offset from the end of the active phase
    pub end_delay_offset: f64,
    /// Fired after the waiters resolve
    pub callbacks: Vec<SegmentCallback>,
    /// Awaited with playback held
    pub roadblocks: Vec<Awaitable>,
    /// Awaited without holding playback
    pub integrityblocks: Vec<Awaitable>,
    /// Zero span from the previous stopping point; only a scheduler tick is needed
    pub skippable: bool,
    /// Progress markers
    pub header: SegmentHeader,
}

impl Segment {
    fn boundary(end_delay_offset: f64, callback: Option<SegmentCallback>, skippable: bool) -> Self {
        Self {
            end_delay_offset,
            callbacks: callback.into_iter().collect(),
            roadblocks: Vec::new(),
            integrityblocks: Vec::new(),
            skippable,
            header: SegmentHeader::default(),
        }
    }
}

/// Callbacks fired at the three phase boundaries of a run
#[derive(Clone, Default)]
pub struct PhaseHooks {
    /// End of the delay phase
    pub on_delay_finish: Option<SegmentCallback>,
    /// End of the active phase
    pub on_active_finish: Option<SegmentCallback>,
    /// End of the end-delay phase
    pub on_end_delay_finish: Option<SegmentCallback>,
}

/// Fresh segment list for a run with the given timing
pub(crate) fn build_segments(timing: &EffectTiming, hooks: &PhaseHooks) -> Vec<Segment> {
    vec![
        Segment::boundary(
            -timing.duration,
            hooks.on_delay_finish.clone(),
            timing.delay <= TIME_EPSILON,
        ),
        Segment::boundary(0.0, hooks.on_active_finish.clone(), false),
        Segment::boundary(
            timing.end_delay,
            hooks.on_end_delay_finish.clone(),
            timing.end_delay <= TIME_EPSILON,
        ),
    ]
}

/// Local time at which a segment is reached
pub(crate) fn local_time_of(timing: &EffectTiming, end_delay_offset: f64) -> f64 {
    timing.delay + timing.duration + end_delay_offset
}

/// Where a `(direction, phase, position)` request lands in a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseEmplacement {
    /// First segment at or after the start of the phase; for the end-delay
    /// phase, the first one after the active-end boundary
    pub initial_segment_index: usize,
    /// Duration of the phase in the run being addressed
    pub phase_duration: f64,
    /// End-delay offset of the start of the phase
    pub phase_end_delay_offset: f64,
    /// In-phase position, already mirrored for backward runs
    pub phase_time_position: f64,
}

impl PhaseEmplacement {
    /// End-delay offset of the requested moment
    pub fn end_delay_offset(&self) -> f64 {
        self.phase_end_delay_offset + self.phase_time_position
    }
}

/// Translate a request into a position on `direction`'s run
///
/// `phase` and `position` are named from the forward point of view; for a
/// backward run the delay and end-delay phases trade places and the in-phase
/// position is mirrored, so one request means one moment in both directions.
pub(crate) fn compute_phase_emplacement(
    timing: &EffectTiming,
    segments: &[Segment],
    direction: Direction,
    phase: Phase,
    position: TimePosition,
) -> Result<PhaseEmplacement> {
    let run_phase = match direction {
        Direction::Forward => phase,
        Direction::Backward => phase.mirrored(),
    };

    let (phase_duration, phase_end_delay_offset) = match run_phase {
        Phase::Delay => (timing.delay, -(timing.duration + timing.delay)),
        Phase::Active => (timing.duration, -timing.duration),
        Phase::EndDelay => (timing.end_delay, 0.0),
        Phase::Whole => (timing.total(), -(timing.duration + timing.delay)),
    };

    let resolved = position.resolve(phase_duration);
    if !(-TIME_EPSILON..=phase_duration + TIME_EPSILON).contains(&resolved) {
        return Err(ConfigurationError::TimePositionOutOfRange {
            direction,
            phase,
            position: resolved,
            phase_duration,
        }
        .into());
    }
    let resolved = resolved.clamp(0.0, phase_duration);
    let phase_time_position = match direction {
        Direction::Forward => resolved,
        Direction::Backward => phase_duration - resolved,
    };

    let initial_segment_index = match run_phase {
        // The active-end boundary shares offset 0; end-delay moments come after it
        Phase::EndDelay => {
            let active_end = segments.partition_point(|s| s.end_delay_offset < -TIME_EPSILON);
            (active_end + 1).min(segments.len())
        }
        _ => segments
            .partition_point(|s| s.end_delay_offset < phase_end_delay_offset - TIME_EPSILON),
    };

    Ok(PhaseEmplacement {
        initial_segment_index,
        phase_duration,
        phase_end_delay_offset,
        phase_time_position,
    })
}

/// What a caller wants attached to a moment
pub(crate) enum SegmentPayload {
    Callback(SegmentCallback),
    Roadblocks(Vec<Awaitable>),
    Integrityblocks(Vec<Awaitable>),
}

/// Outcome of splicing a payload into a segment list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Emplaced {
    /// A new segment was inserted
    Inserted,
    /// The payload joined an existing segment
    Merged,
    /// The moment has already passed; the payload is handed back
    Passed,
}

/// Attach `payload` at `end_delay_offset`, keeping the list sorted
///
/// Returns the payload back when the moment has already passed.
pub(crate) fn emplace(
    segments: &mut Vec<Segment>,
    start_index: usize,
    end_delay_offset: f64,
    payload: SegmentPayload,
) -> (Emplaced, Option<SegmentPayload>) {
    let start = start_index.min(segments.len());
    let index = start
        + segments[start..]
            .partition_point(|s| s.end_delay_offset < end_delay_offset - TIME_EPSILON);

    if let Some(existing) = segments.get_mut(index) {
        if (existing.end_delay_offset - end_delay_offset).abs() <= TIME_EPSILON {
            if existing.header.completed {
                return (Emplaced::Passed, Some(payload));
            }
            match payload {
                SegmentPayload::Callback(cb) => existing.callbacks.push(cb),
                SegmentPayload::Roadblocks(list) => existing.roadblocks.extend(list),
                SegmentPayload::Integrityblocks(list) => existing.integrityblocks.extend(list),
            }
            return (Emplaced::Merged, None);
        }
        if existing.header.activated {
            return (Emplaced::Passed, Some(payload));
        }
    } else if segments.last().is_some_and(|s| s.header.completed) {
        return (Emplaced::Passed, Some(payload));
    }

    let mut segment = Segment::boundary(end_delay_offset, None, false);
    match payload {
        SegmentPayload::Callback(cb) => segment.callbacks.push(cb),
        SegmentPayload::Roadblocks(list) => segment.roadblocks = list,
        SegmentPayload::Integrityblocks(list) => segment.integrityblocks = list,
    }
    segments.insert(index, segment);
    (Emplaced::Inserted, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> EffectTiming {
        EffectTiming {
            delay: 100.0,
            duration: 400.0,
            end_delay: 50.0,
            ..Default::default()
        }
    }

    fn offsets(segments: &[Segment]) -> Vec<f64> {
        segments.iter().map(|s| s.end_delay_offset).collect()
    }

    #[test]
    fn test_boundaries() {
        let segments = build_segments(&timing(), &PhaseHooks::default());
        assert_eq!(offsets(&segments), vec![-400.0, 0.0, 50.0]);
        assert!(!segments[0].skippable);

        let instant = EffectTiming {
            duration: 10.0,
            ..Default::default()
        };
        let segments = build_segments(&instant, &PhaseHooks::default());
        assert!(segments[0].skippable);
        assert!(segments[2].skippable);
    }

    #[test]
    fn test_emplacement_forward() {
        let segments = build_segments(&timing(), &PhaseHooks::default());
        let at = compute_phase_emplacement(
            &timing(),
            &segments,
            Direction::Forward,
            Phase::Active,
            TimePosition::Percent(25.0),
        )
        .unwrap();
        assert_eq!(at.phase_duration, 400.0);
        assert_eq!(at.end_delay_offset(), -300.0);
        assert_eq!(at.initial_segment_index, 0);
        assert_eq!(local_time_of(&timing(), at.end_delay_offset()), 200.0);
    }

    #[test]
    fn test_emplacement_backward_mirrors() {
        // The backward run of a (100, 400, 50) effect is (50, 400, 100)
        let backward = timing().mirrored();
        let segments = build_segments(&backward, &PhaseHooks::default());
        let at = compute_phase_emplacement(
            &backward,
            &segments,
            Direction::Backward,
            Phase::Delay,
            TimePosition::Millis(25.0),
        )
        .unwrap();
        // 25ms into the forward delay is 25ms before the end of the backward run
        assert_eq!(at.phase_duration, 100.0);
        assert_eq!(at.phase_time_position, 75.0);
        assert_eq!(local_time_of(&backward, at.end_delay_offset()), 525.0);
    }

    #[test]
    fn test_end_delay_requests_follow_active_end() {
        let no_end_delay = EffectTiming {
            delay: 100.0,
            duration: 400.0,
            ..Default::default()
        };
        let mut segments = build_segments(&no_end_delay, &PhaseHooks::default());
        assert_eq!(offsets(&segments), vec![-400.0, 0.0, 0.0]);
        let noop: SegmentCallback = Arc::new(|| Ok(()));

        let end = compute_phase_emplacement(
            &no_end_delay,
            &segments,
            Direction::Forward,
            Phase::EndDelay,
            TimePosition::End,
        )
        .unwrap();
        assert_eq!(end.initial_segment_index, 2);
        let (outcome, _) = emplace(
            &mut segments,
            end.initial_segment_index,
            end.end_delay_offset(),
            SegmentPayload::Callback(noop.clone()),
        );
        assert_eq!(outcome, Emplaced::Merged);
        assert!(segments[1].callbacks.is_empty());
        assert_eq!(segments[2].callbacks.len(), 1);

        // The end of the active phase still lands on its own boundary
        let active = compute_phase_emplacement(
            &no_end_delay,
            &segments,
            Direction::Forward,
            Phase::Active,
            TimePosition::End,
        )
        .unwrap();
        let (outcome, _) = emplace(
            &mut segments,
            active.initial_segment_index,
            active.end_delay_offset(),
            SegmentPayload::Callback(noop),
        );
        assert_eq!(outcome, Emplaced::Merged);
        assert_eq!(segments[1].callbacks.len(), 1);
    }

    #[test]
    fn test_end_delay_beginning_inserts_after_active_end() {
        let mut segments = build_segments(&timing(), &PhaseHooks::default());
        let at = compute_phase_emplacement(
            &timing(),
            &segments,
            Direction::Forward,
            Phase::EndDelay,
            TimePosition::Beginning,
        )
        .unwrap();
        let noop: SegmentCallback = Arc::new(|| Ok(()));
        let (outcome, _) = emplace(
            &mut segments,
            at.initial_segment_index,
            at.end_delay_offset(),
            SegmentPayload::Callback(noop),
        );
        assert_eq!(outcome, Emplaced::Inserted);
        assert_eq!(offsets(&segments), vec![-400.0, 0.0, 0.0, 50.0]);
        assert!(segments[1].callbacks.is_empty());
        assert_eq!(segments[2].callbacks.len(), 1);
    }

    #[test]
    fn test_emplacement_out_of_range() {
        let segments = build_segments(&timing(), &PhaseHooks::default());
        let err = compute_phase_emplacement(
            &timing(),
            &segments,
            Direction::Forward,
            Phase::EndDelay,
            TimePosition::Millis(80.0),
        );
        assert!(matches!(
            err,
            Err(crate::error::EngineError::Configuration(
                ConfigurationError::TimePositionOutOfRange { .. }
            ))
        ));
    }

    #[test]
    fn test_emplace_keeps_order_and_merges() {
        let mut segments = build_segments(&timing(), &PhaseHooks::default());
        let noop: SegmentCallback = Arc::new(|| Ok(()));
        let (outcome, _) = emplace(&mut segments, 0, -200.0, SegmentPayload::Callback(noop.clone()));
        assert_eq!(outcome, Emplaced::Inserted);
        assert_eq!(offsets(&segments), vec![-400.0, -200.0, 0.0, 50.0]);

        let (outcome, _) = emplace(&mut segments, 0, 0.0, SegmentPayload::Callback(noop));
        assert_eq!(outcome, Emplaced::Merged);
        assert_eq!(segments[2].callbacks.len(), 1);
    }

    #[test]
    fn test_emplace_refuses_passed_time() {
        let mut segments = build_segments(&timing(), &PhaseHooks::default());
        segments[0].header = SegmentHeader {
            activated: true,
            completed: true,
        };
        segments[1].header.activated = true;
        let noop: SegmentCallback = Arc::new(|| Ok(()));

        // Before an activated segment
        let (outcome, payload) =
            emplace(&mut segments, 0, -100.0, SegmentPayload::Callback(noop.clone()));
        assert_eq!(outcome, Emplaced::Passed);
        assert!(payload.is_some());

        // Onto a completed segment
        let (outcome, _) = emplace(&mut segments, 0, -400.0, SegmentPayload::Callback(noop.clone()));
        assert_eq!(outcome, Emplaced::Passed);

        // Onto the activated segment itself is still allowed
        let (outcome, _) = emplace(&mut segments, 0, 0.0, SegmentPayload::Callback(noop));
        assert_eq!(outcome, Emplaced::Merged);
    }
}

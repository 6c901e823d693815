//! Global timeline composition: segment offsets, background trajectory, and
//! the caption overlay schedule.

use log::debug;

use crate::error::{PipelineError, Result};
use crate::timing::WordTiming;

/// Tolerance for floating-point comparisons on the timeline.
const EPSILON: f64 = 1e-6;

/// Compute each segment's global start offset: the cumulative sum of all
/// preceding durations plus `gap` seconds between consecutive segments.
///
/// Offsets are derived and deterministic; they are recomputed every render
/// and never persisted.
pub fn segment_offsets(durations: &[f64], gap: f64) -> Vec<f64> {
    let mut offsets = Vec::with_capacity(durations.len());
    let mut elapsed = 0.0;
    for duration in durations {
        offsets.push(elapsed);
        elapsed += duration + gap;
    }
    offsets
}

/// Background crop/position trajectory for one segment.
///
/// Each trajectory owns a snapshot of the offset captured when the
/// background choice was made. `position_at` is a pure function of elapsed
/// time over that snapshot, so interleaved background choices can never
/// collapse onto a shared, last-written offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundTrajectory {
    start_offset: f64,
}

impl BackgroundTrajectory {
    pub fn new(start_offset: f64) -> Self {
        Self { start_offset }
    }

    /// The offset snapshot this trajectory was constructed with.
    pub fn start_offset(&self) -> f64 {
        self.start_offset
    }

    /// Background position shown `elapsed` seconds into this trajectory.
    pub fn position_at(&self, elapsed: f64) -> f64 {
        self.start_offset + elapsed
    }
}

/// One drawable caption state change: the progressive text visible between
/// `visible_from` and `visible_until` on the global timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEvent {
    /// Index of the owning segment; each segment's caption region resets.
    pub segment: usize,
    /// All of the owning segment's words revealed so far.
    pub text: String,
    pub visible_from: f64,
    pub visible_until: f64,
}

/// The composed timeline for one video.
#[derive(Debug, Clone)]
pub struct Timeline {
    /// Global start offset of each segment, in input order.
    pub offsets: Vec<f64>,
    /// End of the last segment; the encode is bounded to this.
    pub total_duration: f64,
    /// One background trajectory per segment, each owning its offset.
    pub trajectories: Vec<BackgroundTrajectory>,
    /// Caption schedule in non-decreasing `visible_from` order; empty when
    /// captions are disabled.
    pub overlay_events: Vec<OverlayEvent>,
}

impl Timeline {
    /// Background position at a global elapsed time, delegated to the
    /// owning segment's trajectory. `None` before the first segment starts.
    pub fn background_position(&self, elapsed: f64) -> Option<f64> {
        let index = self.offsets.iter().rposition(|&o| o <= elapsed + EPSILON)?;
        self.trajectories
            .get(index)
            .map(|t| t.position_at(elapsed - self.offsets[index]))
    }
}

/// Compose the global timeline from probed segment durations.
///
/// `timings` carries each segment's word timing sequence when captions are
/// enabled. Fails fast when the narration would run past the available
/// background duration; the pipeline never truncates silently.
pub fn compose(
    durations: &[f64],
    timings: Option<&[Vec<WordTiming>]>,
    background_duration: f64,
    gap: f64,
) -> Result<Timeline> {
    let offsets = segment_offsets(durations, gap);
    let total_duration = match (offsets.last(), durations.last()) {
        (Some(offset), Some(duration)) => offset + duration,
        _ => 0.0,
    };

    if total_duration > background_duration + EPSILON {
        return Err(PipelineError::Timeline(format!(
            "narration runs {total_duration:.3}s but the background only provides \
             {background_duration:.3}s"
        )));
    }

    let trajectories = offsets
        .iter()
        .map(|&offset| BackgroundTrajectory::new(offset))
        .collect();

    let overlay_events = match timings {
        Some(per_segment) => compose_overlay_events(per_segment, &offsets, durations)?,
        None => Vec::new(),
    };
    debug!(
        "composed timeline: {} segment(s), {:.3}s total, {} overlay event(s)",
        durations.len(),
        total_duration,
        overlay_events.len()
    );

    Ok(Timeline {
        offsets,
        total_duration,
        trajectories,
        overlay_events,
    })
}

/// Build the global overlay schedule from per-segment word timings shifted
/// by their segment offsets.
///
/// Each event's text is the progressive reveal within its own segment; an
/// event stays visible until the next word appears, and the segment's last
/// event stays until the segment ends.
fn compose_overlay_events(
    per_segment: &[Vec<WordTiming>],
    offsets: &[f64],
    durations: &[f64],
) -> Result<Vec<OverlayEvent>> {
    let mut events = Vec::new();

    for (segment, timings) in per_segment.iter().enumerate() {
        let offset = offsets[segment];
        let duration = durations[segment];

        let mut revealed = String::new();
        for (i, timing) in timings.iter().enumerate() {
            if timing.start > timing.end {
                return Err(PipelineError::Timeline(format!(
                    "segment {segment} word {i} starts after it ends \
                     ({:.3} > {:.3})",
                    timing.start, timing.end
                )));
            }
            if timing.end > duration + EPSILON {
                return Err(PipelineError::Timeline(format!(
                    "segment {segment} word {i} ends at {:.3}s, past the segment \
                     duration {duration:.3}s",
                    timing.end
                )));
            }
            if let Some(next) = timings.get(i + 1) {
                if next.start < timing.start - EPSILON {
                    return Err(PipelineError::Timeline(format!(
                        "segment {segment} word timings out of order at {i}: \
                         {:.3}s after {:.3}s",
                        next.start, timing.start
                    )));
                }
                if next.start < timing.end - EPSILON {
                    return Err(PipelineError::Timeline(format!(
                        "segment {segment} word timings overlap at {i}: \
                         [{:.3}, {:.3}] and next start {:.3}",
                        timing.start, timing.end, next.start
                    )));
                }
            }
            if !revealed.is_empty() {
                revealed.push(' ');
            }
            revealed.push_str(&timing.word);

            let visible_until = match timings.get(i + 1) {
                Some(next) => offset + next.start,
                None => offset + duration,
            };
            events.push(OverlayEvent {
                segment,
                text: revealed.clone(),
                visible_from: offset + timing.start,
                visible_until,
            });
        }
    }

    // The per-segment checks above make this unreachable for well-formed
    // offsets, but a global ordering violation must never slip through to
    // the overlay generator.
    for pair in events.windows(2) {
        if pair[1].visible_from < pair[0].visible_from - EPSILON {
            return Err(PipelineError::Timeline(format!(
                "overlay events out of order: {:.3}s after {:.3}s",
                pair[1].visible_from, pair[0].visible_from
            )));
        }
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::estimate_word_timings;

    #[test]
    fn offsets_are_a_prefix_sum() {
        assert_eq!(
            segment_offsets(&[3.0, 2.5, 4.0], 0.0),
            vec![0.0, 3.0, 5.5]
        );
        // A fourth segment would start at 9.5.
        assert_eq!(
            segment_offsets(&[3.0, 2.5, 4.0, 1.0], 0.0)[3],
            9.5
        );
    }

    #[test]
    fn offsets_include_the_inter_segment_gap() {
        assert_eq!(
            segment_offsets(&[3.0, 2.5, 4.0], 0.5),
            vec![0.0, 3.5, 6.5]
        );
    }

    #[test]
    fn each_trajectory_keeps_its_own_offset() {
        let first = BackgroundTrajectory::new(1.0);
        let second = BackgroundTrajectory::new(2.0);
        // Both evaluated at the same elapsed time must use their own
        // captured offsets, never both collapsing to the last-seen one.
        assert_eq!(first.position_at(5.0), 6.0);
        assert_eq!(second.position_at(5.0), 7.0);
        assert_eq!(first.position_at(5.0), 6.0);
    }

    #[test]
    fn compose_rejects_narration_longer_than_the_background() {
        let err = compose(&[30.0, 30.0], None, 45.0, 0.0).unwrap_err();
        assert!(matches!(err, PipelineError::Timeline(_)));
        assert!(err.to_string().contains("60.000"));
    }

    #[test]
    fn compose_builds_one_trajectory_per_segment() {
        let timeline = compose(&[3.0, 2.5, 4.0], None, 60.0, 0.0).unwrap();
        assert_eq!(timeline.trajectories.len(), 3);
        assert_eq!(timeline.trajectories[1].start_offset(), 3.0);
        assert_eq!(timeline.trajectories[2].position_at(1.0), 6.5);
        assert_eq!(timeline.total_duration, 9.5);
    }

    #[test]
    fn background_position_uses_the_owning_segment() {
        let timeline = compose(&[3.0, 2.5], None, 60.0, 0.0).unwrap();
        // 4.0s elapsed is 1.0s into segment 1, whose trajectory captured 3.0.
        assert_eq!(timeline.background_position(4.0), Some(4.0));
        assert_eq!(timeline.background_position(0.0), Some(0.0));
    }

    #[test]
    fn overlay_events_shift_by_segment_offsets() {
        let timings = vec![
            estimate_word_timings("one two", 2.0).unwrap(),
            estimate_word_timings("three", 1.0).unwrap(),
        ];
        let timeline = compose(&[2.0, 1.0], Some(&timings), 30.0, 0.0).unwrap();
        let events = &timeline.overlay_events;
        assert_eq!(events.len(), 3);

        assert_eq!(events[0].text, "one");
        assert_eq!(events[0].visible_from, 0.0);
        // The first word stays visible until the second appears.
        assert_eq!(events[0].visible_until, 1.0);
        assert_eq!(events[1].text, "one two");
        assert_eq!(events[1].visible_until, 2.0);

        // The second segment's caption resets and is shifted by 2.0s.
        assert_eq!(events[2].text, "three");
        assert_eq!(events[2].visible_from, 2.0);
        assert_eq!(events[2].visible_until, 3.0);

        for pair in events.windows(2) {
            assert!(pair[0].visible_from <= pair[1].visible_from);
        }
    }

    #[test]
    fn overlapping_timings_are_an_error() {
        let bad = vec![vec![
            WordTiming {
                word: "first".to_string(),
                start: 0.0,
                end: 1.5,
            },
            WordTiming {
                word: "second".to_string(),
                start: 1.0,
                end: 2.0,
            },
        ]];
        let err = compose(&[2.0], Some(&bad), 30.0, 0.0).unwrap_err();
        assert!(matches!(err, PipelineError::Timeline(_)));
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn out_of_order_timings_are_an_error() {
        let bad = vec![vec![
            WordTiming {
                word: "second".to_string(),
                start: 1.0,
                end: 2.0,
            },
            WordTiming {
                word: "first".to_string(),
                start: 0.0,
                end: 1.0,
            },
        ]];
        let err = compose(&[2.0], Some(&bad), 30.0, 0.0).unwrap_err();
        assert!(matches!(err, PipelineError::Timeline(_)));
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn word_past_segment_duration_is_an_error() {
        let bad = vec![vec![WordTiming {
            word: "late".to_string(),
            start: 0.0,
            end: 5.0,
        }]];
        let err = compose(&[2.0], Some(&bad), 30.0, 0.0).unwrap_err();
        assert!(matches!(err, PipelineError::Timeline(_)));
        assert!(err.to_string().contains("past the segment duration"));
    }
}

//! Segment planning: turns a clip range plus cut intervals into keep segments.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A time range in seconds, `end > start >= 0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

/// A region excluded from the output
pub type Cut = TimeRange;

/// A region retained in the output
pub type KeepSegment = TimeRange;

impl TimeRange {
    /// Create a validated range
    pub fn new(start: f64, end: f64) -> Result<Self, PipelineError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Check the range invariant
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "time range [{}, {}] is not finite",
                self.start, self.end
            )));
        }
        if self.start < 0.0 || self.end <= self.start {
            return Err(PipelineError::Configuration(format!(
                "time range [{}, {}] must satisfy end > start >= 0",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// Length in seconds
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Compute the ordered keep segments left after removing `cuts` from `full`.
///
/// Cuts may overlap, touch, arrive in any order, or extend past either end of
/// the full range; their union is removed. No cuts yields `[full]`.
pub fn plan_keep_segments(full: TimeRange, cuts: &[Cut]) -> Vec<KeepSegment> {
    if cuts.is_empty() {
        return vec![full];
    }

    let mut sorted: Vec<Cut> = cuts.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut segments = Vec::new();
    let mut cursor = full.start;

    for cut in &sorted {
        if cursor >= full.end {
            break;
        }
        let cut_start = cut.start.min(full.end);
        if cut_start > cursor {
            segments.push(KeepSegment {
                start: cursor,
                end: cut_start,
            });
        }
        cursor = cursor.max(cut.end);
    }

    if cursor < full.end {
        segments.push(KeepSegment {
            start: cursor,
            end: full.end,
        });
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(start: f64, end: f64) -> TimeRange {
        TimeRange { start, end }
    }

    #[test]
    fn test_two_disjoint_cuts() {
        let segments = plan_keep_segments(r(0.0, 100.0), &[r(10.0, 20.0), r(30.0, 40.0)]);
        assert_eq!(segments, vec![r(0.0, 10.0), r(20.0, 30.0), r(40.0, 100.0)]);
    }

    #[test]
    fn test_overlapping_cuts_merge() {
        let segments = plan_keep_segments(r(0.0, 100.0), &[r(10.0, 20.0), r(15.0, 25.0)]);
        assert_eq!(segments, vec![r(0.0, 10.0), r(25.0, 100.0)]);
    }

    #[test]
    fn test_no_cuts_is_full_range() {
        let segments = plan_keep_segments(r(0.0, 100.0), &[]);
        assert_eq!(segments, vec![r(0.0, 100.0)]);
    }

    #[test]
    fn test_out_of_order_cuts() {
        let segments = plan_keep_segments(r(0.0, 100.0), &[r(30.0, 40.0), r(10.0, 20.0)]);
        assert_eq!(segments, vec![r(0.0, 10.0), r(20.0, 30.0), r(40.0, 100.0)]);
    }

    #[test]
    fn test_cut_at_edges() {
        let segments = plan_keep_segments(r(5.0, 50.0), &[r(0.0, 10.0), r(45.0, 60.0)]);
        assert_eq!(segments, vec![r(10.0, 45.0)]);
    }

    #[test]
    fn test_cut_covers_everything() {
        let segments = plan_keep_segments(r(5.0, 50.0), &[r(0.0, 60.0)]);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_cut_beyond_range_ignored() {
        let segments = plan_keep_segments(r(0.0, 50.0), &[r(70.0, 80.0)]);
        assert_eq!(segments, vec![r(0.0, 50.0)]);
    }

    #[test]
    fn test_time_range_validation() {
        assert!(TimeRange::new(0.0, 1.0).is_ok());
        assert!(TimeRange::new(1.0, 1.0).is_err());
        assert!(TimeRange::new(-1.0, 1.0).is_err());
        assert!(TimeRange::new(0.0, f64::NAN).is_err());
    }

    fn cut_strategy() -> impl Strategy<Value = Cut> {
        (0.0f64..120.0, 0.1f64..30.0).prop_map(|(start, len)| r(start, start + len))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_segments_sorted_disjoint_and_inside(
            start in 0.0f64..20.0,
            len in 1.0f64..100.0,
            cuts in proptest::collection::vec(cut_strategy(), 0..8),
        ) {
            let full = r(start, start + len);
            let segments = plan_keep_segments(full, &cuts);

            for seg in &segments {
                prop_assert!(seg.end > seg.start);
                prop_assert!(seg.start >= full.start && seg.end <= full.end);
                for cut in &cuts {
                    // No kept region overlaps a cut
                    prop_assert!(seg.end <= cut.start || seg.start >= cut.end,
                        "segment {:?} overlaps cut {:?}", seg, cut);
                }
            }
            for pair in segments.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
        }

        #[test]
        fn prop_kept_plus_cut_covers_range(
            len in 1.0f64..100.0,
            cuts in proptest::collection::vec(cut_strategy(), 0..8),
        ) {
            let full = r(0.0, len);
            let segments = plan_keep_segments(full, &cuts);

            // Every sampled point is either kept or inside some cut
            let steps = 200;
            for i in 0..steps {
                let t = full.start + (i as f64 + 0.5) * full.duration() / steps as f64;
                let kept = segments.iter().any(|s| t >= s.start && t < s.end);
                let cut = cuts.iter().any(|c| t >= c.start && t < c.end);
                prop_assert!(kept != cut, "t={} kept={} cut={}", t, kept, cut);
            }
        }
    }
}

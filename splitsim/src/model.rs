//! Weighted duration distributions over segment histories.

use std::collections::HashSet;
use std::time::Duration;

use crate::lss::RunHistory;
use crate::SimError;

pub const DEFAULT_WEIGHT_MULTIPLIER: f64 = 0.75;

/// Recency weighting applied while walking a segment's history newest to
/// oldest. The newest valid attempt always starts at weight 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Weighting {
    /// Multiply the running weight by the multiplier after each valid
    /// attempt consumed.
    Geometric { multiplier: f64 },
    /// Subtract `1 / total_attempts` after each valid attempt consumed,
    /// where the total counts skipped entries too.
    Linear,
}

impl Default for Weighting {
    fn default() -> Self {
        Weighting::Geometric {
            multiplier: DEFAULT_WEIGHT_MULTIPLIER,
        }
    }
}

/// One duration sample with its normalized recency weight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedTime {
    pub time: Duration,
    pub weight: f64,
}

/// A segment's distribution: samples sorted ascending by duration, weights
/// normalized to sum to 1.
#[derive(Clone, Debug)]
pub struct Segment {
    pub name: String,
    samples: Vec<WeightedTime>,
}

impl Segment {
    /// Sorts and normalizes raw weighted samples into a distribution.
    /// `index` is the segment's position in the course, used only for the
    /// error diagnostic.
    pub fn from_samples(
        index: usize,
        name: String,
        mut samples: Vec<WeightedTime>,
    ) -> Result<Self, SimError> {
        if samples.is_empty() {
            return Err(SimError::ZeroSampleSegment { index, name });
        }
        samples.sort_by_key(|sample| sample.time);
        let total: f64 = samples.iter().map(|sample| sample.weight).sum();
        for sample in &mut samples {
            sample.weight /= total;
        }
        Ok(Self { name, samples })
    }

    pub fn samples(&self) -> &[WeightedTime] {
        &self.samples
    }

    /// Predicted duration at percentile `p` in `[0, 1]`.
    ///
    /// Weighted interpolation rather than a rank percentile: each sample's
    /// cumulative territory spans half its weight to either side of its
    /// position, and `p` interpolates linearly between neighboring samples
    /// within a step. Non-decreasing in `p`.
    pub fn time_at_percentile(&self, p: f64) -> Duration {
        let first = self.samples[0];
        if p <= first.weight / 2.0 {
            return first.time;
        }
        let last = self.samples[self.samples.len() - 1];
        if p >= 1.0 - last.weight / 2.0 {
            return last.time;
        }
        let mut accum = first.weight / 2.0;
        for pair in self.samples.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let step = (prev.weight + next.weight) / 2.0;
            if p >= accum && p <= accum + step {
                let frac = (p - accum) / step;
                return prev.time + (next.time - prev.time).mul_f64(frac);
            }
            accum += step;
        }
        last.time
    }
}

/// All segment distributions for one category, in activity order.
#[derive(Clone, Debug, Default)]
pub struct Course {
    pub segments: Vec<Segment>,
}

impl Course {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Predicted finish time at percentile `p`: every segment's predicted
    /// duration summed. Non-decreasing in `p`.
    pub fn finish_at_percentile(&self, p: f64) -> Duration {
        self.segments
            .iter()
            .map(|segment| segment.time_at_percentile(p))
            .sum()
    }
}

/// Builds the course model from a document history.
///
/// Attempts are weighted newest to oldest. An attempt id skipped in one
/// segment is excluded from the next segment's samples: the next recorded
/// split also covers the skipped one, so it is not a clean sample there.
/// Exclusion does not cascade past that one segment.
pub fn build_course(history: &RunHistory, weighting: Weighting) -> Result<Course, SimError> {
    if let Weighting::Geometric { multiplier } = weighting {
        if !(multiplier > 0.0 && multiplier <= 1.0) {
            return Err(SimError::InvalidParameter(format!(
                "weight multiplier must be in (0, 1], got {multiplier}"
            )));
        }
    }

    let mut segments = Vec::with_capacity(history.segments.len());
    let mut skipped_prev: HashSet<&str> = HashSet::new();
    for (index, segment) in history.segments.iter().enumerate() {
        let total_attempts = segment.attempts.len();
        let mut weight = 1.0f64;
        let mut samples = Vec::new();
        let mut skipped: HashSet<&str> = HashSet::new();
        for attempt in segment.attempts.iter().rev() {
            match attempt.time {
                Some(time) if !skipped_prev.contains(attempt.id.as_str()) => {
                    samples.push(WeightedTime { time, weight });
                    weight = match weighting {
                        Weighting::Geometric { multiplier } => weight * multiplier,
                        Weighting::Linear => weight - 1.0 / total_attempts as f64,
                    };
                }
                None => {
                    skipped.insert(attempt.id.as_str());
                }
                Some(_) => {}
            }
        }
        skipped_prev = skipped;
        segments.push(Segment::from_samples(index, segment.name.clone(), samples)?);
    }
    Ok(Course { segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lss::{Attempt, SegmentHistory};

    fn attempt(id: &str, secs: Option<f64>) -> Attempt {
        Attempt {
            id: id.to_string(),
            time: secs.map(Duration::from_secs_f64),
        }
    }

    fn history_of(segments: Vec<(&str, Vec<Attempt>)>) -> RunHistory {
        RunHistory {
            game: None,
            category: None,
            segments: segments
                .into_iter()
                .map(|(name, attempts)| SegmentHistory {
                    name: name.to_string(),
                    attempts,
                })
                .collect(),
        }
    }

    fn equal_weight_segment(secs: [u64; 3]) -> Segment {
        let samples = secs
            .iter()
            .map(|&s| WeightedTime {
                time: Duration::from_secs(s),
                weight: 1.0,
            })
            .collect();
        Segment::from_samples(0, "segment".to_string(), samples).unwrap()
    }

    #[test]
    fn test_weights_sum_to_one_and_samples_sorted() {
        let history = history_of(vec![(
            "only",
            vec![
                attempt("1", Some(30.0)),
                attempt("2", Some(10.0)),
                attempt("3", Some(20.0)),
            ],
        )]);
        for weighting in [Weighting::default(), Weighting::Linear] {
            let course = build_course(&history, weighting).unwrap();
            let samples = course.segments[0].samples();
            let total: f64 = samples.iter().map(|s| s.weight).sum();
            assert!((total - 1.0).abs() < 1e-9, "weight sum {}", total);
            for pair in samples.windows(2) {
                assert!(pair[0].time <= pair[1].time);
            }
        }
    }

    #[test]
    fn test_geometric_weights_favor_recent_attempts() {
        // Chronological order 10, 20, 30: the 30s attempt is newest.
        let history = history_of(vec![(
            "only",
            vec![
                attempt("1", Some(10.0)),
                attempt("2", Some(20.0)),
                attempt("3", Some(30.0)),
            ],
        )]);
        let course = build_course(&history, Weighting::default()).unwrap();
        let samples = course.segments[0].samples();
        // Sorted ascending, so weights run oldest to newest here.
        let raw_total = 1.0 + 0.75 + 0.5625;
        assert!((samples[0].weight - 0.5625 / raw_total).abs() < 1e-9);
        assert!((samples[1].weight - 0.75 / raw_total).abs() < 1e-9);
        assert!((samples[2].weight - 1.0 / raw_total).abs() < 1e-9);
    }

    #[test]
    fn test_linear_weights_step_down_by_one_third() {
        let history = history_of(vec![(
            "only",
            vec![
                attempt("1", Some(10.0)),
                attempt("2", Some(20.0)),
                attempt("3", Some(30.0)),
            ],
        )]);
        let course = build_course(&history, Weighting::Linear).unwrap();
        let samples = course.segments[0].samples();
        // Raw weights 1/3, 2/3, 1 over a total of 2.
        assert!((samples[0].weight - 1.0 / 6.0).abs() < 1e-9);
        assert!((samples[1].weight - 1.0 / 3.0).abs() < 1e-9);
        assert!((samples[2].weight - 1.0 / 2.0).abs() < 1e-9);
        let step = samples[2].weight - samples[1].weight;
        assert!((step - (samples[1].weight - samples[0].weight)).abs() < 1e-9);
    }

    #[test]
    fn test_linear_and_geometric_weight_vectors_differ() {
        let history = history_of(vec![(
            "only",
            vec![
                attempt("1", Some(10.0)),
                attempt("2", Some(20.0)),
                attempt("3", Some(30.0)),
            ],
        )]);
        let linear = build_course(&history, Weighting::Linear).unwrap();
        let geometric = build_course(&history, Weighting::default()).unwrap();
        let differs = linear.segments[0]
            .samples()
            .iter()
            .zip(geometric.segments[0].samples())
            .any(|(a, b)| (a.weight - b.weight).abs() > 1e-9);
        assert!(differs);
        for course in [&linear, &geometric] {
            let samples = course.segments[0].samples();
            // Newest (30s) outweighs oldest (10s) under both modes.
            assert!(samples[2].weight > samples[0].weight);
        }
    }

    #[test]
    fn test_skip_propagation_excludes_next_segment_only() {
        let history = history_of(vec![
            (
                "first",
                vec![
                    attempt("1", Some(10.0)),
                    attempt("2", None),
                    attempt("3", Some(12.0)),
                ],
            ),
            (
                "second",
                vec![
                    attempt("1", Some(20.0)),
                    attempt("2", Some(45.0)),
                    attempt("3", Some(21.0)),
                ],
            ),
            (
                "third",
                vec![
                    attempt("1", Some(30.0)),
                    attempt("2", Some(31.0)),
                    attempt("3", Some(32.0)),
                ],
            ),
        ]);
        let course = build_course(&history, Weighting::default()).unwrap();
        // Attempt 2 skipped the first split, so its inflated 45s second
        // split is dropped.
        assert_eq!(course.segments[0].samples().len(), 2);
        assert_eq!(course.segments[1].samples().len(), 2);
        assert!(!course.segments[1]
            .samples()
            .iter()
            .any(|s| s.time == Duration::from_secs(45)));
        // No cascade: attempt 2 is a normal sample again in the third.
        assert_eq!(course.segments[2].samples().len(), 3);
    }

    #[test]
    fn test_zero_sample_segment_is_an_error() {
        let history = history_of(vec![
            ("fine", vec![attempt("1", Some(10.0))]),
            ("empty", vec![attempt("1", None)]),
        ]);
        let err = build_course(&history, Weighting::default()).unwrap_err();
        match err {
            SimError::ZeroSampleSegment { index, name } => {
                assert_eq!(index, 1);
                assert_eq!(name, "empty");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_invalid_multiplier_rejected() {
        let history = history_of(vec![("only", vec![attempt("1", Some(10.0))])]);
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let err = build_course(&history, Weighting::Geometric { multiplier: bad });
            assert!(matches!(err, Err(SimError::InvalidParameter(_))), "accepted {}", bad);
        }
    }

    #[test]
    fn test_percentile_edges_and_midpoint() {
        let segment = equal_weight_segment([10, 20, 30]);
        assert_eq!(segment.time_at_percentile(0.0), Duration::from_secs(10));
        assert_eq!(segment.time_at_percentile(0.5), Duration::from_secs(20));
        assert_eq!(segment.time_at_percentile(1.0), Duration::from_secs(30));
    }

    #[test]
    fn test_percentile_interpolates_between_samples() {
        let segment = equal_weight_segment([10, 20, 30]);
        // Quarter point sits midway through the first interpolation step.
        let quarter = segment.time_at_percentile(0.25).as_secs_f64();
        assert!((quarter - 12.5).abs() < 1e-6, "got {}", quarter);
    }

    #[test]
    fn test_percentile_monotonic_in_p() {
        let segment = equal_weight_segment([10, 20, 30]);
        let mut previous = segment.time_at_percentile(0.0);
        for step in 1..=100 {
            let current = segment.time_at_percentile(step as f64 / 100.0);
            assert!(current >= previous, "decreased at step {}", step);
            previous = current;
        }
        assert!(segment.time_at_percentile(0.0) <= segment.time_at_percentile(1.0));
    }

    #[test]
    fn test_singleton_distribution_is_flat() {
        let segment = Segment::from_samples(
            0,
            "single".to_string(),
            vec![WeightedTime {
                time: Duration::from_secs(42),
                weight: 3.0,
            }],
        )
        .unwrap();
        for p in [0.0, 0.3, 0.5, 1.0] {
            assert_eq!(segment.time_at_percentile(p), Duration::from_secs(42));
        }
    }

    #[test]
    fn test_finish_time_sums_segments() {
        let course = Course {
            segments: vec![
                equal_weight_segment([10, 20, 30]),
                equal_weight_segment([10, 20, 30]),
            ],
        };
        assert_eq!(course.finish_at_percentile(0.5), Duration::from_secs(40));
        let mut previous = course.finish_at_percentile(0.0);
        for step in 1..=100 {
            let current = course.finish_at_percentile(step as f64 / 100.0);
            assert!(current >= previous);
            previous = current;
        }
    }
}

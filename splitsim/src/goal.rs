//! Goal percentile search.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::model::Course;
use crate::time::serde_secs;
use crate::SimError;

/// Absolute tolerance, in seconds, for matching the goal time.
pub const GOAL_TOLERANCE_SECONDS: f64 = 0.1;

const MAX_BISECTION_STEPS: u32 = 100;

/// A named cumulative predicted time at one segment boundary.
#[derive(Clone, Debug, Serialize)]
pub struct SplitTime {
    pub name: String,
    #[serde(with = "serde_secs")]
    pub time: Duration,
}

/// The percentile needed to hit a goal, with the predicted splits at that
/// percentile for every boundary except the finish line.
#[derive(Clone, Debug, Serialize)]
pub struct GoalReport {
    pub percentile: f64,
    #[serde(with = "serde_secs")]
    pub goal: Duration,
    pub splits: Vec<SplitTime>,
}

/// Bisects percentile space for the point where the predicted finish time
/// matches `goal` within [`GOAL_TOLERANCE_SECONDS`].
///
/// The bracket halves on every step, so running out of steps means no
/// percentile in `[0, 1]` lands near the goal.
pub fn find_goal_percentile(course: &Course, goal: Duration) -> Result<GoalReport, SimError> {
    if course.segments.is_empty() {
        return Err(SimError::InvalidParameter(
            "course has no segments".to_string(),
        ));
    }
    let goal_secs = goal.as_secs_f64();
    let mut lower = 0.0f64;
    let mut upper = 1.0f64;
    for step in 0..MAX_BISECTION_STEPS {
        let mid = (lower + upper) / 2.0;
        let finish = course.finish_at_percentile(mid);
        let diff = finish.as_secs_f64() - goal_secs;
        debug!(
            "Goal probe {}: percentile {:.6} predicts {:.2}s",
            step,
            mid,
            finish.as_secs_f64()
        );
        if diff.abs() < GOAL_TOLERANCE_SECONDS {
            return Ok(build_report(course, mid, goal));
        }
        if diff > 0.0 {
            upper = mid;
        } else {
            lower = mid;
        }
    }
    Err(SimError::GoalUnreachable)
}

fn build_report(course: &Course, percentile: f64, goal: Duration) -> GoalReport {
    let mut cumulative = Duration::ZERO;
    let mut splits = Vec::new();
    for segment in &course.segments[..course.segments.len() - 1] {
        cumulative += segment.time_at_percentile(percentile);
        splits.push(SplitTime {
            name: segment.name.clone(),
            time: cumulative,
        });
    }
    GoalReport {
        percentile,
        goal,
        splits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Segment, WeightedTime};

    fn equal_weight_segment(name: &str, secs: [u64; 3]) -> Segment {
        let samples = secs
            .iter()
            .map(|&s| WeightedTime {
                time: Duration::from_secs(s),
                weight: 1.0,
            })
            .collect();
        Segment::from_samples(0, name.to_string(), samples).unwrap()
    }

    fn course() -> Course {
        Course {
            segments: vec![
                equal_weight_segment("one", [10, 20, 30]),
                equal_weight_segment("two", [10, 20, 30]),
            ],
        }
    }

    #[test]
    fn test_round_trip_through_the_median() {
        let course = course();
        let target = course.finish_at_percentile(0.5);
        let report = find_goal_percentile(&course, target).unwrap();
        assert!(
            (report.percentile - 0.5).abs() <= 0.01,
            "got {}",
            report.percentile
        );
    }

    #[test]
    fn test_reports_every_boundary_except_the_last() {
        let course = course();
        let report = find_goal_percentile(&course, Duration::from_secs(40)).unwrap();
        assert_eq!(report.splits.len(), 1);
        assert_eq!(report.splits[0].name, "one");
        let predicted = report.splits[0].time.as_secs_f64();
        assert!((predicted - 20.0).abs() < 0.1, "got {}", predicted);
    }

    #[test]
    fn test_goal_below_reachable_range_fails() {
        let err = find_goal_percentile(&course(), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, SimError::GoalUnreachable));
    }

    #[test]
    fn test_goal_above_reachable_range_fails() {
        let err = find_goal_percentile(&course(), Duration::from_secs(600)).unwrap_err();
        assert!(matches!(err, SimError::GoalUnreachable));
    }

    #[test]
    fn test_extreme_but_reachable_goal_succeeds() {
        // The slowest representable finish is 60s; asking for exactly that
        // drives the percentile toward 1 and still converges.
        let report = find_goal_percentile(&course(), Duration::from_secs(60)).unwrap();
        assert!(report.percentile > 0.8, "got {}", report.percentile);
    }

    #[test]
    fn test_empty_course_is_rejected() {
        let empty = Course::default();
        let err = find_goal_percentile(&empty, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameter(_)));
    }
}

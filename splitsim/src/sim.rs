//! Monte Carlo run simulation.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::model::Course;
use crate::time::serde_secs_opt_list;
use crate::CancelToken;

/// Minimum iterations before any stopping rule applies.
pub const MIN_ITERATIONS: u64 = 10_000;

/// Discrete percentile levels a draw can land on (2-decimal buckets).
pub const PERCENTILE_BUCKETS: usize = 101;

const CONVERGENCE_BAND: f64 = 0.001;
const CONVERGENCE_RUN_TARGETED: u64 = 500;
const CONVERGENCE_RUN_FREE: u64 = 1_000;
const TARGET_BAND_LOW: f64 = 0.5;
const TARGET_BAND_HIGH: f64 = 1.5;

/// Per-segment elapsed-time ceilings. A simulated attempt whose running
/// total exceeds the ceiling at a segment counts as reset.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ResetThresholds {
    #[serde(with = "serde_secs_opt_list")]
    limits: Vec<Option<Duration>>,
}

impl ResetThresholds {
    /// A set with no ceilings for a course of `segment_count` segments.
    pub fn unset(segment_count: usize) -> Self {
        Self {
            limits: vec![None; segment_count],
        }
    }

    pub fn limit_at(&self, segment: usize) -> Option<Duration> {
        self.limits.get(segment).copied().flatten()
    }

    pub fn set_limit(&mut self, segment: usize, limit: Duration) {
        self.limits[segment] = Some(limit);
    }

    pub fn limits(&self) -> &[Option<Duration>] {
        &self.limits
    }
}

/// Parameters for one simulation: where the attempt starts and what
/// counts as success.
#[derive(Clone, Debug)]
pub struct SimRun<'a> {
    /// First segment index to simulate.
    pub start_split: usize,
    /// Elapsed time already on the clock at `start_split`.
    pub start_time: Duration,
    /// A finished attempt strictly below this total counts as a success.
    pub goal: Duration,
    pub thresholds: &'a ResetThresholds,
    /// Expected success rate; the run stops early once the estimate
    /// clearly leaves `[0.5x, 1.5x]` of it.
    pub target_rate: Option<f64>,
    /// Consecutive segments sharing one percentile draw.
    pub chunk_size: usize,
}

impl<'a> SimRun<'a> {
    /// A full-course run from a clean start.
    pub fn from_start(goal: Duration, thresholds: &'a ResetThresholds) -> Self {
        Self {
            start_split: 0,
            start_time: Duration::ZERO,
            goal,
            thresholds,
            target_rate: None,
            chunk_size: 1,
        }
    }
}

/// Why a simulation stopped.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub enum StopReason {
    /// The success rate held inside the convergence band long enough.
    Converged,
    /// The estimate left the plausible band around the target rate.
    OffTarget,
    /// Cancelled between iterations; the rate is the estimate so far.
    Cancelled,
}

/// Success estimate plus convergence diagnostics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SimOutcome {
    /// Success percentage in `[0, 100]`.
    pub rate: f64,
    pub iterations: u64,
    pub reason: StopReason,
}

impl SimOutcome {
    pub fn converged(&self) -> bool {
        self.reason == StopReason::Converged
    }
}

/// Memoized `time_at_percentile` lookups for one `simulate_runs` call.
/// Never shared across invocations.
struct PercentileCache {
    slots: Vec<Option<Duration>>,
}

impl PercentileCache {
    fn new(segment_count: usize) -> Self {
        Self {
            slots: vec![None; segment_count * PERCENTILE_BUCKETS],
        }
    }

    fn time_at(&mut self, course: &Course, segment: usize, bucket: usize) -> Duration {
        let slot = &mut self.slots[segment * PERCENTILE_BUCKETS + bucket];
        *slot.get_or_insert_with(|| {
            course.segments[segment].time_at_percentile(bucket as f64 / 100.0)
        })
    }
}

/// Estimates the odds of finishing under `run.goal` by repeated randomized
/// attempts over the course model.
///
/// Runs at least [`MIN_ITERATIONS`] iterations, then keeps going until the
/// estimate stabilizes: once the rate stays within 0.1% of its last
/// checkpoint for long enough it is considered converged. With a target
/// rate the run also bails out as soon as the estimate clearly diverges
/// from the target. The cancellation token is honored between iterations
/// and yields the current estimate.
pub fn simulate_runs<R: Rng>(
    course: &Course,
    run: &SimRun<'_>,
    rng: &mut R,
    cancel: &CancelToken,
) -> SimOutcome {
    let segment_count = course.segments.len();
    let chunk_size = run.chunk_size.max(1);
    let mut cache = PercentileCache::new(segment_count);

    let streak_needed = if run.target_rate.is_some() {
        CONVERGENCE_RUN_TARGETED
    } else {
        CONVERGENCE_RUN_FREE
    };
    let mut iterations: u64 = 0;
    let mut successes: u64 = 0;
    let mut checkpoint = -1.0f64;
    let mut stable_for: u64 = 0;

    loop {
        iterations += 1;
        let mut elapsed = run.start_time;
        let mut reset = false;
        let mut bucket = draw_bucket(rng);
        let mut chunk_left = chunk_size;
        for segment in run.start_split..segment_count {
            elapsed += cache.time_at(course, segment, bucket);
            if let Some(limit) = run.thresholds.limit_at(segment) {
                if elapsed > limit {
                    reset = true;
                    break;
                }
            }
            chunk_left -= 1;
            if chunk_left == 0 {
                bucket = draw_bucket(rng);
                chunk_left = chunk_size;
            }
        }
        if !reset && elapsed < run.goal {
            successes += 1;
        }
        let rate = successes as f64 / iterations as f64 * 100.0;

        if cancel.is_cancelled() {
            debug!("Simulation cancelled at {:.2}% after {} iterations", rate, iterations);
            return SimOutcome {
                rate,
                iterations,
                reason: StopReason::Cancelled,
            };
        }
        if iterations < MIN_ITERATIONS {
            continue;
        }
        if let Some(target) = run.target_rate {
            if rate <= target * TARGET_BAND_LOW || rate >= target * TARGET_BAND_HIGH {
                debug!(
                    "Estimate {:.2}% left the band around target {:.2}% after {} iterations",
                    rate, target, iterations
                );
                return SimOutcome {
                    rate,
                    iterations,
                    reason: StopReason::OffTarget,
                };
            }
        }
        if rate <= checkpoint * (1.0 + CONVERGENCE_BAND)
            && rate >= checkpoint * (1.0 - CONVERGENCE_BAND)
        {
            stable_for += 1;
            if stable_for >= streak_needed {
                debug!("Simulation converged at {:.2}% after {} iterations", rate, iterations);
                return SimOutcome {
                    rate,
                    iterations,
                    reason: StopReason::Converged,
                };
            }
        } else {
            checkpoint = rate;
            stable_for = 0;
        }
    }
}

fn draw_bucket<R: Rng>(rng: &mut R) -> usize {
    (rng.gen::<f64>() * 100.0).round() as usize
}

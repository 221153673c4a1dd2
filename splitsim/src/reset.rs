//! Balanced reset-threshold search.
//!
//! For each split, finds the elapsed time at which continuing the run and
//! resetting for a fresh attempt give equal odds of eventually hitting the
//! goal, under the model's simulated success rates.

use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::model::Course;
use crate::sim::{simulate_runs, ResetThresholds, SimRun, StopReason};
use crate::time::format_duration;
use crate::CancelToken;

/// Base success percentage below which threshold estimates get shaky.
pub const LOW_ODDS_FLOOR: f64 = 0.1;

const RATE_MATCH_BAND: f64 = 0.01;
const MAX_SEARCH_STEPS: u32 = 64;

/// How the reset-planning run is configured.
#[derive(Clone, Copy, Debug)]
pub struct ResetOptions {
    /// Refinement passes over all splits.
    pub passes: u32,
    /// Consecutive segments sharing one percentile draw in the inner
    /// simulations.
    pub chunk_size: usize,
}

impl Default for ResetOptions {
    fn default() -> Self {
        Self {
            passes: 1,
            chunk_size: 1,
        }
    }
}

/// Thresholds plus the diagnostics that qualify them.
#[derive(Clone, Debug, Serialize)]
pub struct ResetReport {
    pub thresholds: ResetThresholds,
    /// Clean-start success percentage under the previous pass's thresholds.
    pub base_rate: f64,
    /// Passes fully completed; lower than requested when cancelled.
    pub completed_passes: u32,
    /// Splits whose search ran out of its step budget.
    pub imprecise_splits: Vec<usize>,
    pub cancelled: bool,
}

/// Chance, as a percentage, of at least one success over `tries` attempts
/// each succeeding with probability `rate` percent. `tries` may be
/// fractional.
pub fn repeated_odds(rate: f64, tries: f64) -> f64 {
    (1.0 - (1.0 - rate / 100.0).powf(tries)) * 100.0
}

/// How many fresh attempts fit in the real-time budget left when a run
/// stands at `elapsed` against `goal`. Grows without bound as `elapsed`
/// approaches `goal`.
pub fn run_progress_factor(goal: Duration, elapsed: Duration) -> f64 {
    goal.as_secs_f64() / (goal.as_secs_f64() - elapsed.as_secs_f64())
}

/// Searches every split for its balanced reset threshold, refining over
/// `opts.passes` passes. Each pass re-simulates the clean-start baseline
/// under the previous pass's thresholds, then replaces the whole set.
pub fn find_reset_thresholds<R: Rng>(
    course: &Course,
    goal: Duration,
    opts: &ResetOptions,
    rng: &mut R,
    cancel: &CancelToken,
) -> ResetReport {
    let segment_count = course.segments.len();
    let mut thresholds = ResetThresholds::unset(segment_count);
    let mut base_rate = 0.0;
    let mut imprecise_splits = Vec::new();
    let mut completed_passes = 0;

    'passes: for pass in 0..opts.passes {
        let previous = thresholds.clone();

        let mut baseline = SimRun::from_start(goal, &previous);
        baseline.chunk_size = opts.chunk_size;
        let outcome = simulate_runs(course, &baseline, rng, cancel);
        base_rate = outcome.rate;
        if outcome.reason == StopReason::Cancelled {
            break;
        }
        info!("Pass {}: base success rate {:.2}%", pass + 1, base_rate);
        if base_rate < LOW_ODDS_FLOOR {
            warn!(
                "Base success rate {:.2}% is very low; threshold estimates may be unreliable",
                base_rate
            );
        }

        imprecise_splits.clear();
        for split in 1..segment_count {
            if cancel.is_cancelled() {
                break 'passes;
            }
            let found = search_reset_time(
                course,
                goal,
                split,
                &previous,
                base_rate,
                opts.chunk_size,
                rng,
                cancel,
            );
            thresholds.set_limit(split - 1, found.threshold);
            if !found.precise {
                imprecise_splits.push(split);
                warn!(
                    "Split {}: search ran out of steps; keeping the bracket midpoint",
                    split
                );
            }
            info!(
                "Split {}: reset threshold {}",
                split,
                format_duration(found.threshold)
            );
        }
        completed_passes = pass + 1;
    }

    ResetReport {
        thresholds,
        base_rate,
        completed_passes,
        imprecise_splits,
        cancelled: cancel.is_cancelled(),
    }
}

struct SearchResult {
    threshold: Duration,
    precise: bool,
}

/// Bisects the elapsed time entering `split` until continuing is about as
/// likely to pay off as resetting, judged through `repeated_odds` against
/// the clean-start baseline.
fn search_reset_time<R: Rng>(
    course: &Course,
    goal: Duration,
    split: usize,
    previous: &ResetThresholds,
    base_rate: f64,
    chunk_size: usize,
    rng: &mut R,
    cancel: &CancelToken,
) -> SearchResult {
    let mut lower = Duration::ZERO;
    let mut upper = goal;
    for _ in 0..MAX_SEARCH_STEPS {
        if lower.as_secs_f64().round() == upper.as_secs_f64().round() {
            return SearchResult {
                threshold: midpoint(lower, upper),
                precise: true,
            };
        }
        let candidate = midpoint(lower, upper);
        let factor = run_progress_factor(goal, candidate);
        let target = repeated_odds(base_rate, factor);

        let mut probe = SimRun::from_start(goal, previous);
        probe.start_split = split;
        probe.start_time = candidate;
        probe.target_rate = Some(target);
        probe.chunk_size = chunk_size;
        let outcome = simulate_runs(course, &probe, rng, cancel);
        if outcome.reason == StopReason::Cancelled {
            return SearchResult {
                threshold: candidate,
                precise: true,
            };
        }

        let result = repeated_odds(outcome.rate, factor);
        debug!(
            "Split {} probe at {}: continued odds {:.2}% vs base {:.2}%",
            split,
            format_duration(candidate),
            result,
            base_rate
        );
        if result <= base_rate * (1.0 + RATE_MATCH_BAND)
            && result >= base_rate * (1.0 - RATE_MATCH_BAND)
        {
            return SearchResult {
                threshold: candidate,
                precise: true,
            };
        }
        if result < base_rate {
            upper = candidate;
        } else {
            lower = candidate;
        }
    }
    SearchResult {
        threshold: midpoint(lower, upper),
        precise: false,
    }
}

fn midpoint(lower: Duration, upper: Duration) -> Duration {
    (lower + upper) / 2
}

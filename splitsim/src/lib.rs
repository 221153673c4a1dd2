//! Split-history modeling and simulation for segmented timed runs.
//!
//! Builds weighted duration distributions from a LiveSplit attempt history
//! and inverts them against goal times. Monte Carlo simulation over the
//! same model estimates goal odds and balanced reset thresholds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub mod goal;
pub mod lss;
pub mod model;
pub mod reset;
pub mod sim;
pub mod time;

pub use goal::{find_goal_percentile, GoalReport, SplitTime, GOAL_TOLERANCE_SECONDS};
pub use lss::{parse_lss, Attempt, RunHistory, SegmentHistory};
pub use model::{
    build_course, Course, Segment, WeightedTime, Weighting, DEFAULT_WEIGHT_MULTIPLIER,
};
pub use reset::{
    find_reset_thresholds, repeated_odds, run_progress_factor, ResetOptions, ResetReport,
};
pub use sim::{
    simulate_runs, ResetThresholds, SimOutcome, SimRun, StopReason, MIN_ITERATIONS,
};
pub use time::{format_duration, parse_time};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("malformed splits document: {0}")]
    MalformedSplits(String),
    #[error("invalid time string: {0:?}")]
    InvalidTime(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("segment {index} ({name:?}) has no usable history samples")]
    ZeroSampleSegment { index: usize, name: String },
    #[error("goal search did not converge; the goal time is likely outside the reachable range")]
    GoalUnreachable,
}

/// Cooperative cancellation flag shared between a long-running solver and
/// the caller that may interrupt it. Checked between iterations only.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shares_state_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use rand::thread_rng;
use serde::Serialize;
use splitsim::{
    build_course, find_goal_percentile, find_reset_thresholds, format_duration, parse_lss,
    parse_time, simulate_runs, CancelToken, Course, GoalReport, ResetOptions, ResetReport,
    ResetThresholds, SimOutcome, SimRun, StopReason, Weighting, DEFAULT_WEIGHT_MULTIPLIER,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Split-history statistics and reset planning CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the percentile needed to hit a goal time, with predicted splits
    Goal(GoalArgs),
    /// Estimate the odds of beating a goal time by simulation
    Sim(SimArgs),
    /// Compute balanced reset thresholds for every split
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// LiveSplit splits file (.lss)
    #[arg(value_hint = ValueHint::FilePath)]
    splits: PathBuf,

    /// Goal time, e.g. `1:32:00` or `95:30`
    goal: String,

    /// Geometric recency weight multiplier in (0, 1]
    #[arg(short = 'w', long = "weight", default_value_t = DEFAULT_WEIGHT_MULTIPLIER, conflicts_with = "linear")]
    weight: f64,

    /// Weight attempts linearly from newest to oldest instead
    #[arg(long, action = ArgAction::SetTrue)]
    linear: bool,

    /// Also write the report as pretty JSON to this path
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

impl ModelArgs {
    fn weighting(&self) -> Weighting {
        if self.linear {
            Weighting::Linear
        } else {
            Weighting::Geometric {
                multiplier: self.weight,
            }
        }
    }
}

#[derive(Args, Debug)]
struct GoalArgs {
    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct SimArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// First segment index to simulate (0-based)
    #[arg(long, default_value_t = 0)]
    start_split: usize,

    /// Elapsed time already on the clock at the start split
    #[arg(long, default_value = "0")]
    start_time: String,

    /// Consecutive segments sharing one percentile draw
    #[arg(long, default_value_t = 1)]
    chunk: usize,
}

#[derive(Args, Debug)]
struct ResetArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Refinement passes over all splits
    #[arg(long, default_value_t = 1)]
    iterations: u32,

    /// Consecutive segments sharing one percentile draw
    #[arg(long, default_value_t = 1)]
    chunk: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        Command::Goal(args) => {
            if args.model.verbose {
                "debug"
            } else {
                "info"
            }
        }
        Command::Sim(args) => {
            if args.model.verbose {
                "debug"
            } else {
                "info"
            }
        }
        Command::Reset(args) => {
            if args.model.verbose {
                "debug"
            } else {
                "info"
            }
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Goal(args) => handle_goal(args),
        Command::Sim(args) => handle_sim(args),
        Command::Reset(args) => handle_reset(args),
    }
}

fn handle_goal(args: GoalArgs) -> Result<()> {
    let loaded = load_model(&args.model)?;
    let t_search = Instant::now();
    let report = find_goal_percentile(&loaded.course, loaded.goal)?;
    info!(
        "Goal search: {:.1} ms",
        t_search.elapsed().as_secs_f64() * 1000.0
    );

    print_goal_report(&report)?;
    write_json(args.model.json.as_deref(), &report)
}

fn handle_sim(args: SimArgs) -> Result<()> {
    if args.chunk == 0 {
        return Err(anyhow!("--chunk must be at least 1"));
    }
    let start_time = parse_time(&args.start_time).context("invalid start time")?;
    let loaded = load_model(&args.model)?;
    if args.start_split >= loaded.course.segment_count() {
        return Err(anyhow!(
            "--start-split {} is out of range for {} segments",
            args.start_split,
            loaded.course.segment_count()
        ));
    }

    let cancel = arm_ctrl_c()?;
    let thresholds = ResetThresholds::default();
    let mut run = SimRun::from_start(loaded.goal, &thresholds);
    run.start_split = args.start_split;
    run.start_time = start_time;
    run.chunk_size = args.chunk;

    let t_sim = Instant::now();
    let outcome = simulate_runs(&loaded.course, &run, &mut thread_rng(), &cancel);
    info!(
        "Simulation: {:.1} ms ({} iterations)",
        t_sim.elapsed().as_secs_f64() * 1000.0,
        outcome.iterations
    );
    if outcome.reason == StopReason::Cancelled {
        warn!("Interrupted; reporting the estimate so far");
    }

    print_sim_outcome(&outcome)?;
    write_json(args.model.json.as_deref(), &outcome)
}

fn handle_reset(args: ResetArgs) -> Result<()> {
    if args.chunk == 0 {
        return Err(anyhow!("--chunk must be at least 1"));
    }
    if args.iterations == 0 {
        return Err(anyhow!("--iterations must be at least 1"));
    }
    let loaded = load_model(&args.model)?;
    if loaded.course.segment_count() < 2 {
        return Err(anyhow!("reset planning needs at least two segments"));
    }

    let cancel = arm_ctrl_c()?;
    info!("Press Ctrl+C to stop early and keep the current estimates");
    let opts = ResetOptions {
        passes: args.iterations,
        chunk_size: args.chunk,
    };
    let t_plan = Instant::now();
    let report =
        find_reset_thresholds(&loaded.course, loaded.goal, &opts, &mut thread_rng(), &cancel);
    info!(
        "Reset planning: {:.1} ms ({} passes)",
        t_plan.elapsed().as_secs_f64() * 1000.0,
        report.completed_passes
    );
    if report.cancelled {
        warn!("Interrupted; reporting the estimates so far");
    }

    print_reset_report(&report, &loaded.course)?;
    write_json(args.model.json.as_deref(), &report)
}

fn print_goal_report(report: &GoalReport) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Goal percentile: {:.4}", report.percentile)?;
    for split in &report.splits {
        writeln!(out, "{}  {}", format_duration(split.time), split.name)?;
    }
    writeln!(out, "{}  (goal)", format_duration(report.goal))?;
    Ok(())
}

fn print_sim_outcome(outcome: &SimOutcome) -> Result<()> {
    let note = match outcome.reason {
        StopReason::Converged => "",
        StopReason::OffTarget => " (off target)",
        StopReason::Cancelled => " (interrupted)",
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "Success rate: {:.2}% over {} iterations{}",
        outcome.rate, outcome.iterations, note
    )?;
    Ok(())
}

fn print_reset_report(report: &ResetReport, course: &Course) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Base success rate: {:.2}%", report.base_rate)?;
    for (index, segment) in course.segments.iter().enumerate() {
        match report.thresholds.limit_at(index) {
            Some(limit) => writeln!(out, "{}  {}", format_duration(limit), segment.name)?,
            None => writeln!(out, "-  {}", segment.name)?,
        }
    }
    writeln!(out, "Passes: {}", report.completed_passes)?;
    Ok(())
}

struct LoadedModel {
    course: Course,
    goal: Duration,
}

fn load_model(args: &ModelArgs) -> Result<LoadedModel> {
    let text = fs::read_to_string(&args.splits)
        .with_context(|| format!("failed to read {}", args.splits.display()))?;
    let t_parse = Instant::now();
    let history =
        parse_lss(&text).with_context(|| format!("failed to parse {}", args.splits.display()))?;
    let goal = parse_time(&args.goal).context("invalid goal time")?;
    let course = build_course(&history, args.weighting())?;
    match (&history.game, &history.category) {
        (Some(game), Some(category)) => info!("Splits: {} - {}", game, category),
        (Some(game), None) => info!("Splits: {}", game),
        _ => {}
    }
    let attempts = history
        .segments
        .iter()
        .map(|segment| segment.attempts.len())
        .max()
        .unwrap_or(0);
    info!(
        "Model built: {} segments from {} attempts ({:.1} ms)",
        course.segment_count(),
        attempts,
        t_parse.elapsed().as_secs_f64() * 1000.0
    );
    Ok(LoadedModel { course, goal })
}

fn arm_ctrl_c() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        handle.cancel();
    })
    .context("failed to install the Ctrl+C handler")?;
    Ok(cancel)
}

fn write_json<T: Serialize>(path: Option<&Path>, report: &T) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => return Ok(()),
    };
    let text =
        serde_json::to_string_pretty(report).context("failed to encode the JSON report")?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote JSON report: {}", path.display());
    Ok(())
}

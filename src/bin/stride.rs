//! Stride CLI - Command-line interface for Stride Evolve
//!
//! Commands:
//! - replay: Drive the engine with a series of daily step entries
//! - status: Show decay state, progress and the 7-day memory from saved state
//! - phase: Show the phase and progress for a weekly step total
//! - doctor: Diagnose configuration and state files

use clap::{Parser, Subcommand, ValueEnum};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stride_evolve::clock::ManualClock;
use stride_evolve::config::EvolutionConfig;
use stride_evolve::engine::{EvolutionProcessor, EvolutionStatus, STATE_VERSION};
use stride_evolve::phase;
use stride_evolve::types::{DayKey, DecayState, Phase};
use stride_evolve::{EvolveError, PRODUCER_NAME, STRIDE_VERSION};

/// Stride - evolution phases and decay from daily step counts
#[derive(Parser)]
#[command(name = "stride")]
#[command(version = STRIDE_VERSION)]
#[command(about = "Turn daily step totals into evolution phases and decay status", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay daily step entries through the engine
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the daily step goal
        #[arg(long)]
        goal: Option<u32>,

        /// Treat the user as premium (no phase cap)
        #[arg(long)]
        premium: bool,

        /// Load engine state from file before replaying
        #[arg(long)]
        load_state: Option<PathBuf>,

        /// Save engine state to file after replaying
        #[arg(long)]
        save_state: Option<PathBuf>,
    },

    /// Show the current status from a state file
    Status {
        /// State file written by `replay --save-state`
        #[arg(short, long)]
        state: PathBuf,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Evaluate as of this date (YYYY-MM-DD) instead of today
        #[arg(long)]
        date: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show phase and progress for a weekly step total
    Phase {
        /// Rolling 7-day step total
        weekly_steps: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and state files
    Doctor {
        /// Check a state file
        #[arg(long)]
        state: Option<PathBuf>,

        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one entry per line)
    Ndjson,
    /// JSON array of entries
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

/// One line of replay input
#[derive(Debug, Deserialize)]
struct StepEntry {
    date: String,
    steps: i64,
    #[serde(default)]
    goal: Option<i64>,
}

/// One line of replay output
#[derive(Serialize)]
struct ReplayRecord {
    date: DayKey,
    steps: u32,
    goal: u32,
    goal_met: bool,
    decay: DecayState,
    accessible_phase: Phase,
    weekly_total: u64,
    steps_remaining: Option<u32>,
    phase_advanced: Option<Phase>,
    milestones: Vec<u64>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), StrideCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            config,
            goal,
            premium,
            load_state,
            save_state,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(goal) = goal {
                config.daily_goal = goal;
            }
            config.premium = config.premium || premium;
            cmd_replay(
                &input,
                &output,
                input_format,
                output_format,
                config,
                load_state.as_deref(),
                save_state.as_deref(),
            )
        }

        Commands::Status {
            state,
            config,
            date,
            json,
        } => cmd_status(&state, config.as_deref(), date.as_deref(), json),

        Commands::Phase { weekly_steps, json } => cmd_phase(weekly_steps, json),

        Commands::Doctor { state, config, json } => {
            cmd_doctor(state.as_deref(), config.as_deref(), json)
        }
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: EvolutionConfig,
    load_state: Option<&Path>,
    save_state: Option<&Path>,
) -> Result<(), StrideCliError> {
    let input_data = read_input(input)?;

    let entries: Vec<StepEntry> = match input_format {
        InputFormat::Ndjson => parse_ndjson(&input_data)?,
        InputFormat::Json => serde_json::from_str(&input_data)?,
    };

    if entries.is_empty() {
        return Err(StrideCliError::NoEntries);
    }

    let first = DayKey::parse(&entries[0].date)?;
    let clock = ManualClock::at_date(first.date());
    let mut processor = EvolutionProcessor::with_clock(config, clock.clone())?;

    if let Some(state_path) = load_state {
        let state_json = fs::read_to_string(state_path)?;
        processor.load_state(&state_json)?;
    }

    // The clock only moves forward; entries dated before the latest day seen
    // are applied as backfill
    let mut latest: Option<NaiveDate> = None;
    let mut records: Vec<ReplayRecord> = Vec::with_capacity(entries.len());

    for entry in &entries {
        let day = DayKey::parse(&entry.date)?;
        if latest.map_or(true, |l| day.date() > l) {
            clock.set_date(day.date());
            latest = Some(day.date());
        }

        let update = if Some(day.date()) == latest && entry.goal.is_none() {
            processor.update_today(entry.steps)
        } else {
            processor.record_day(day.date(), entry.steps, entry.goal)?
        };

        let Some(record) = processor.history().get(day).cloned() else {
            warn!(day = %day, "Entry is older than the retention window, skipping");
            continue;
        };

        records.push(ReplayRecord {
            date: day,
            steps: record.steps(),
            goal: record.goal(),
            goal_met: record.goal_met(),
            decay: update.decay,
            accessible_phase: processor.accessible_phase(),
            weekly_total: processor.weekly_total(),
            steps_remaining: processor.steps_remaining_to_next_phase(),
            phase_advanced: update.phase_advanced,
            milestones: update.milestones,
        });
    }

    if let Some(state_path) = save_state {
        let state_json = processor.save_state()?;
        fs::write(state_path, state_json)?;
    }

    let output_data = format_output(&records, &output_format)?;

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_status(
    state: &Path,
    config: Option<&Path>,
    date: Option<&str>,
    json: bool,
) -> Result<(), StrideCliError> {
    let config = load_config(config)?;
    let state_json = fs::read_to_string(state)?;

    let mut processor = match date {
        Some(date) => {
            let day = DayKey::parse(date)?;
            EvolutionProcessor::with_clock(config, ManualClock::at_date(day.date()))?
        }
        None => EvolutionProcessor::new(config)?,
    };
    processor.load_state(&state_json)?;
    if processor.tick().is_none() {
        processor.evaluate();
    }

    let status = processor.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }

    Ok(())
}

fn print_status(status: &EvolutionStatus) {
    println!("Stride Status ({})", status.today);
    println!("======================");
    println!("Baseline phase:   {}", status.decay.baseline_phase);
    println!("Displayed phase:  {}", status.decay.displayed_phase);
    println!("Accessible phase: {}", status.accessible_phase);
    println!("Status:           {}", status.decay.status.as_str());
    println!("Missed days:      {}", status.decay.consecutive_misses);
    println!("Weekly total:     {}", status.weekly_total);
    match status.steps_remaining {
        Some(remaining) => println!(
            "Next phase:       {} steps to go ({:.0}%)",
            remaining,
            status.weekly_progress * 100.0
        ),
        None => println!("Next phase:       maxed out"),
    }
    println!("Lifetime steps:   {}", status.lifetime_steps);
    println!("Current streak:   {}", status.current_streak);
    println!("Best streak:      {}", status.best_streak);

    println!("\nLast 7 days:");
    for view in &status.last_7_days {
        let mark = match (view.has_data, view.goal_met) {
            (_, true) => "[MET] ",
            (true, false) => "[MISS]",
            (false, false) => "[----]",
        };
        let today = if view.is_today { " (today)" } else { "" };
        println!("  {} {} {:>6} / {}{}", mark, view.date, view.steps, view.goal, today);
    }
}

fn cmd_phase(weekly_steps: u64, json: bool) -> Result<(), StrideCliError> {
    let earned = phase::phase_for_weekly_total(weekly_steps);
    let report = PhaseReport {
        weekly_steps,
        phase: earned,
        next_threshold: phase::next_phase_threshold(earned),
        progress: phase::weekly_progress_fraction(weekly_steps, earned),
        steps_remaining: phase::steps_remaining_to_next_phase(weekly_steps, earned),
        is_maxed: earned.is_max(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Weekly steps: {}", report.weekly_steps);
        println!("Phase:        {}", report.phase);
        match report.steps_remaining {
            Some(remaining) => println!(
                "Next phase:   {} steps to go ({:.0}% of {})",
                remaining,
                report.progress * 100.0,
                report.next_threshold
            ),
            None => println!("Next phase:   maxed out"),
        }
    }

    Ok(())
}

fn cmd_doctor(state: Option<&Path>, config: Option<&Path>, json: bool) -> Result<(), StrideCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "stride_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Stride version {}", STRIDE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "state_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("State format version {}", STATE_VERSION),
    });

    if let Some(config_path) = config {
        checks.push(match fs::read_to_string(config_path) {
            Ok(content) => match EvolutionConfig::from_json(&content) {
                Ok(config) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config valid (daily goal {})", config.daily_goal),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid config: {}", e),
                },
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Cannot read config file: {}", e),
            },
        });
    }

    if let Some(state_path) = state {
        if state_path.exists() {
            checks.push(match fs::read_to_string(state_path) {
                Ok(content) => {
                    let mut processor = EvolutionProcessor::default();
                    match processor.load_state(&content) {
                        Ok(()) => DoctorCheck {
                            name: "state".to_string(),
                            status: CheckStatus::Ok,
                            message: format!(
                                "State file valid ({} days of history, baseline phase {})",
                                processor.history().len(),
                                processor.baseline_phase()
                            ),
                        },
                        Err(e) => DoctorCheck {
                            name: "state".to_string(),
                            status: CheckStatus::Error,
                            message: format!("Invalid state: {}", e),
                        },
                    }
                }
                Err(e) => DoctorCheck {
                    name: "state".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read state file: {}", e),
                },
            });
        } else {
            checks.push(DoctorCheck {
                name: "state".to_string(),
                status: CheckStatus::Warning,
                message: "State file does not exist".to_string(),
            });
        }
    }

    // Check stdin is available (for piped replays)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay input ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: STRIDE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Stride Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(StrideCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, StrideCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EvolutionConfig, StrideCliError> {
    match path {
        Some(path) => Ok(EvolutionConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EvolutionConfig::default()),
    }
}

fn parse_ndjson(data: &str) -> Result<Vec<StepEntry>, StrideCliError> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line.trim()).map_err(|e| {
                StrideCliError::ParseError(format!("Line {}: {}", idx + 1, e))
            })
        })
        .collect()
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, StrideCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error types

#[derive(Debug)]
enum StrideCliError {
    Io(io::Error),
    Engine(EvolveError),
    Json(serde_json::Error),
    NoEntries,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for StrideCliError {
    fn from(e: io::Error) -> Self {
        StrideCliError::Io(e)
    }
}

impl From<EvolveError> for StrideCliError {
    fn from(e: EvolveError) -> Self {
        StrideCliError::Engine(e)
    }
}

impl From<serde_json::Error> for StrideCliError {
    fn from(e: serde_json::Error) -> Self {
        StrideCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<StrideCliError> for CliError {
    fn from(e: StrideCliError) -> Self {
        match e {
            StrideCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            StrideCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check dates (YYYY-MM-DD), goals (> 0) and state files".to_string()),
            },
            StrideCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            StrideCliError::NoEntries => CliError {
                code: "NO_ENTRIES".to_string(),
                message: "No step entries found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            StrideCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            StrideCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be {\"date\": \"YYYY-MM-DD\", \"steps\": N}".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct PhaseReport {
    weekly_steps: u64,
    phase: Phase,
    next_threshold: u32,
    progress: f64,
    steps_remaining: Option<u32>,
    is_maxed: bool,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

//! Durastep CLI Entry Point
//!
//! Runs the sample onboarding workflow against a SQLite step ledger and
//! lets the process be killed at a chosen point to demonstrate recovery.
//!
//! # Usage
//!
//! ```bash
//! # Run (or resume) the workflow
//! durastep
//!
//! # Kill the process right after step-2 is recorded, then resume
//! durastep --crash-after step-2
//! durastep
//!
//! # Kill the process inside step-3; a re-run within the zombie
//! # timeout reports the step as in progress, a later one re-executes it
//! durastep --crash-during step-3
//!
//! # Inspect the ledger for a workflow
//! durastep --workflow-id wf-001 --status
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use durastep::demo::{CrashPlan, OnboardingWorkflow, CRASH_EXIT_CODE};
use durastep::{EngineConfig, SqliteLedger, StepLedger, StepStatus, APP_NAME, VERSION};

/// Employee onboarded when none is specified.
const DEFAULT_EMPLOYEE: &str = "Ada Lovelace";

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    config_path: Option<PathBuf>,
    database_path: Option<PathBuf>,
    workflow_id: Option<String>,
    zombie_timeout_ms: Option<u64>,
    employee: Option<String>,
    crash_plan: CrashPlan,
    interactive: bool,
    status: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| match record.level() {
            log::Level::Warn | log::Level::Error => {
                writeln!(buf, "[{}] {}", record.level(), record.args())
            }
            _ => writeln!(buf, "{}", record.args()),
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Crash-Resilient Workflow Steps");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: durastep [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config PATH            Load settings from a YAML file");
    println!("  --db PATH                Ledger database (default: durable.db)");
    println!("  --workflow-id ID         Workflow identity (default: wf-001)");
    println!("  --zombie-timeout-ms N    Age after which in-progress steps are re-run");
    println!("  --employee NAME          Employee to onboard (default: {})", DEFAULT_EMPLOYEE);
    println!("  --crash-after STEP       Exit right after STEP is recorded completed");
    println!("  --crash-during STEP      Exit inside STEP before it is recorded");
    println!("  --interactive            Prompt before running; type 'exit' to crash");
    println!("  --status                 Show ledger records and exit");
    println!("  --verbose                Enable debug logging");
    println!("  --help                   Show this help message");
    println!("  --version                Show version information");
    println!();
    println!("Examples:");
    println!("  durastep --crash-after step-2 && durastep");
    println!("  durastep --workflow-id wf-002 --status");
}

/// Returns the value following an option, advancing the cursor.
fn option_value(args: &[String], i: &mut usize, name: &str) -> Result<String, String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| format!("{} requires a value", name))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--interactive" | "-i" => config.interactive = true,
            "--status" => config.status = true,
            "--config" => {
                config.config_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--db" => {
                config.database_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--workflow-id" => config.workflow_id = Some(option_value(args, &mut i, arg)?),
            "--employee" => config.employee = Some(option_value(args, &mut i, arg)?),
            "--zombie-timeout-ms" => {
                let value = option_value(args, &mut i, arg)?;
                config.zombie_timeout_ms = Some(
                    value
                        .parse()
                        .map_err(|_| format!("Invalid zombie timeout: {}", value))?,
                );
            }
            "--crash-after" => config.crash_plan.after = Some(option_value(args, &mut i, arg)?),
            "--crash-during" => config.crash_plan.during = Some(option_value(args, &mut i, arg)?),
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the engine config from the optional file plus CLI overrides.
fn engine_config(config: &Config) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut engine = match &config.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(path) = &config.database_path {
        engine.database_path = path.clone();
    }
    if let Some(id) = &config.workflow_id {
        engine.workflow_id = id.clone();
    }
    if let Some(ms) = config.zombie_timeout_ms {
        engine.zombie_timeout_ms = ms;
    }

    engine.validate()?;
    Ok(engine)
}

/// Prints every ledger record of the workflow.
fn print_status(ledger: &SqliteLedger, workflow_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let records = ledger.list(workflow_id)?;

    if records.is_empty() {
        println!("No steps recorded for workflow '{}'", workflow_id);
        return Ok(());
    }

    println!("Workflow '{}' ({} steps):", workflow_id, records.len());
    println!();
    for record in records {
        let status = match record.status() {
            StepStatus::Completed => record.status().as_str().green(),
            StepStatus::InProgress => record.status().as_str().yellow(),
        };
        let updated = record
            .updated_at_utc()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| record.updated_at().to_string());

        println!(
            "  {:12} {:22} {:24} {}",
            record.step_id(),
            status,
            updated,
            record.output().unwrap_or("-")
        );
    }
    Ok(())
}

/// Waits for the operator; `exit` simulates a crash before any step runs.
fn prompt_operator() -> io::Result<()> {
    println!("Type 'exit' to simulate a crash. Press Enter to continue.");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;

    if input.trim().eq_ignore_ascii_case("exit") {
        warn!("Simulating crash...");
        std::process::exit(CRASH_EXIT_CODE);
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let engine = engine_config(&config)?;
    let ledger = Arc::new(engine.open_ledger()?);

    if config.status {
        return print_status(&ledger, &engine.workflow_id);
    }

    info!("Workflow: {}", engine.workflow_id);
    info!("Ledger: {}", engine.database_path.display());
    if config.crash_plan.is_armed() {
        info!("Crash plan: {:?}", config.crash_plan);
    }

    if config.interactive {
        prompt_operator()?;
    }

    let ctx = engine.context(Arc::clone(&ledger));
    let workflow = OnboardingWorkflow::new(
        config
            .employee
            .clone()
            .unwrap_or_else(|| DEFAULT_EMPLOYEE.to_string()),
    )
    .with_crash_plan(config.crash_plan.clone());

    let outcome = workflow.run(&ctx).map_err(|e| {
        error!("Workflow '{}' failed: {}", engine.workflow_id, e);
        if e.is_retryable() {
            warn!(
                "Retry after the zombie timeout ({:?}) to resume",
                engine.zombie_timeout()
            );
        }
        e
    })?;

    let timeline = ctx.timeline();

    println!();
    println!("{}", "Workflow completed successfully".green());
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    println!("{}", timeline.gantt_chart());
    println!("Steps {}", timeline.summary());
    println!();
    info!("Re-run with the same workflow id to verify nothing executes twice.");

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

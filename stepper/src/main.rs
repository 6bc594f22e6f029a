//! Step controller CLI.
//!
//! Runs a question against the local agent and environment ports one tick at a
//! time, persisting the session snapshot and step records after every tick.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;

use stepper::core::task::TaskDescriptor;
use stepper::exit_codes;
use stepper::io::config::{DEFAULT_CONFIG_PATH, RunConfig, load_config, write_config};
use stepper::io::local::LocalPortFactory;
use stepper::io::run_state::{snapshot_path, write_session_snapshot};
use stepper::io::step_log::write_step_record;
use stepper::logging;
use stepper::looping::{LoopStop, run_loop};
use stepper::step::{Session, StepController};

#[derive(Parser)]
#[command(
    name = "stepper",
    version,
    about = "Resumable step controller for agent/environment runs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a question and drive the run to completion.
    Run {
        /// Natural-language task for the agent.
        #[arg(short, long)]
        question: String,
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Load and validate the config file.
    CheckConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Write the default config file.
    InitConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { question, config } => cmd_run(question, &config),
        Command::CheckConfig { config } => cmd_check_config(&config),
        Command::InitConfig { config, force } => cmd_init_config(&config, force),
    }
}

fn cmd_run(question: String, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let task = TaskDescriptor::local(question, config.task.setup.clone(), Utc::now().timestamp());
    let output_dir = config.environment.output_dir.clone();
    let instance_id = task.instance_id.clone();
    let snapshot = snapshot_path(&output_dir, &instance_id);
    let max_steps = config.agent.max_steps;
    println!("Instance: {instance_id}");

    let controller = StepController::new(LocalPortFactory);
    let mut session = Session::<LocalPortFactory>::new();
    session.submit(task);

    let mut records_written = 0usize;
    let outcome = run_loop(&controller, &mut session, &config, |_, session| {
        for record in &session.steps()[records_written..] {
            if let Err(err) = write_step_record(&output_dir, &instance_id, record) {
                warn!(err = %format!("{err:#}"), step = record.step_number, "failed to write step record");
            }
        }
        records_written = session.steps().len();
        if let Err(err) = write_session_snapshot(&snapshot, &session.snapshot(max_steps)) {
            warn!(err = %format!("{err:#}"), "failed to write session snapshot");
        }
    });

    report(&session, &config);
    println!(
        "Ticks: {}, actions executed: {}",
        outcome.ticks, outcome.actions_executed
    );
    println!("Snapshot: {}", snapshot.display());
    match outcome.stop {
        LoopStop::Completed => Ok(exit_codes::OK),
        LoopStop::Failed { .. } => Ok(exit_codes::FAILED),
    }
}

fn report(session: &Session<LocalPortFactory>, config: &RunConfig) {
    println!(
        "Steps: {}/{}",
        session.step_index(),
        config.agent.max_steps
    );
    if let Some(result) = session.result() {
        println!("Result: {result}");
    }
    if let Some(files) = session.result_files() {
        for (name, location) in files {
            println!("File: {name} -> {location}");
        }
    }
    if let Some(error) = session.error() {
        eprintln!("{error}");
    }
    for suppressed in session.suppressed_errors() {
        eprintln!("(also) {suppressed}");
    }
}

fn cmd_check_config(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    println!(
        "config ok: {} (model {}, max_steps {})",
        config_path.display(),
        config.agent.model.as_str(),
        config.agent.max_steps
    );
    Ok(exit_codes::OK)
}

fn cmd_init_config(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &RunConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

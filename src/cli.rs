use crate::config::loader::ConfigOverrides;
use crate::config::types::RunnerConfig;
use crate::config::validator::{check_interpreter, validate_config};
use crate::exec::cancel::CancelToken;
use crate::exec::coordinator::ExecutionCoordinator;
use crate::exec::outcome::{ExecutionRequest, ExecutionResult};
use crate::kernel::signal::SignalHandler;
use crate::safety::staging::StagingArea;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to ./nimble-runner.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Also append audit events to this file
    #[arg(long, global = true)]
    audit_log: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a program and print {"output", "error"} as JSON
    Execute {
        /// Program file to run (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
        /// Treat input as a {"code": "..."} request body
        #[arg(long)]
        json: bool,
        /// Interpreter binary
        #[arg(long)]
        interpreter: Option<PathBuf>,
        /// Staging directory
        #[arg(long)]
        staging_dir: Option<PathBuf>,
        /// Deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Validate configuration and the interpreter binary
    Check {
        /// Interpreter binary
        #[arg(long)]
        interpreter: Option<PathBuf>,
    },
    /// Remove staged programs left behind by a crashed runner
    Cleanup {
        /// Only remove artifacts older than this many seconds
        #[arg(long, default_value_t = 3600)]
        max_age_secs: u64,
        /// Staging directory
        #[arg(long)]
        staging_dir: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if let Some(path) = cli.audit_log.clone() {
        crate::observability::audit::init_audit_log(path)?;
    }

    match cli.command {
        Commands::Execute {
            file,
            json,
            interpreter,
            staging_dir,
            timeout_ms,
        } => {
            let config = load_config(
                cli.config.as_deref(),
                ConfigOverrides {
                    interpreter,
                    staging_dir,
                    timeout_ms,
                },
            )?;
            let source = read_source(file.as_deref())?;
            let request = if json {
                serde_json::from_str::<ExecutionRequest>(&source)
                    .context("Failed to parse request body")?
            } else {
                ExecutionRequest::new(source)
            };

            let result = execute_with_signals(config, &request)?;
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Commands::Check { interpreter } => {
            let config = load_config(
                cli.config.as_deref(),
                ConfigOverrides {
                    interpreter,
                    ..ConfigOverrides::default()
                },
            )?;

            let validation = validate_config(&config)?;
            for warning in &validation.warnings {
                eprintln!("Warning: {}", warning);
            }

            match check_interpreter(&config) {
                Ok(()) => {
                    eprintln!("Interpreter: {} (ok)", config.interpreter.display());
                    eprintln!("Staging directory: {}", config.staging_dir.display());
                    eprintln!("Deadline: {}ms", config.timeout_ms);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Cleanup {
            max_age_secs,
            staging_dir,
        } => {
            let config = load_config(
                cli.config.as_deref(),
                ConfigOverrides {
                    staging_dir,
                    ..ConfigOverrides::default()
                },
            )?;

            let staging = StagingArea::new(config.staging_dir.clone(), config.extension.clone())?;
            let removed = staging.sweep_stale(Duration::from_secs(max_age_secs))?;
            eprintln!(
                "Removed {} stale program(s) from {}",
                removed,
                staging.root().display()
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, overrides: ConfigOverrides) -> Result<RunnerConfig> {
    let config = RunnerConfig::load(path)?.with_overrides(&overrides);
    log::debug!("Effective configuration: {:?}", config);
    Ok(config)
}

fn read_source(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read program {}", path.display())),
        None => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("Failed to read program from stdin")?;
            Ok(source)
        }
    }
}

/// SIGINT/SIGTERM while a program runs cancels it instead of orphaning it.
fn execute_with_signals(config: RunnerConfig, request: &ExecutionRequest) -> Result<ExecutionResult> {
    let signals = SignalHandler::init().map_err(anyhow::Error::msg)?;
    let coordinator = ExecutionCoordinator::new(config)?;
    let token = CancelToken::new();

    let result = std::thread::scope(|scope| {
        let watcher_token = token.clone();
        let done = CancelToken::new();
        let watcher_done = done.clone();
        scope.spawn(move || {
            while !watcher_done.is_cancelled() {
                if signals.shutdown_requested() {
                    log::warn!("signal {} received, cancelling execution", signals.get_signal());
                    watcher_token.cancel();
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        });

        let result = coordinator.execute_with_cancel(request.source(), &token);
        done.cancel();
        result
    });

    Ok(result)
}

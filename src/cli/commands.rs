// file: src/cli/commands.rs
// version: 2.1.0
// guid: g7h8i9j0-k1l2-3456-7890-123456ghijkl

//! Command implementations for the CLI

use super::args::{Cli, Commands};
use super::prompt;
use crate::config::loader::ConfigLoader;
use crate::config::BootstrapConfig;
use crate::executor::{CommandExecutor, DryRunExecutor, LocalExecutor};
use crate::interruption::{maybe_reboot, resume_command, resume_instructions, StopSignal};
use crate::logging::{init_logger, tail};
use crate::preconditions::{CheckOptions, PreconditionChecker, SystemProbe};
use crate::runner::{exit_codes, RunOutcome, RunReport, StageRunner};
use crate::stage::{StageStatus, PARAM_ADMIN_USER};
use crate::stages::default_stages;
use crate::state::{FileStateStore, MemoryStateStore, RunStateStore, StateLock};
use crate::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tracing::{error, info, warn};

/// Lines of the log file shown after a fatal error
const FATAL_TAIL_LINES: usize = 20;

/// Execute the parsed command line, returning the process exit code
///
/// `stop` is checked between stages of a `run`.
pub async fn dispatch(cli: Cli, stop: StopSignal) -> i32 {
    let overrides = cli.overrides();
    let config = match ConfigLoader::new().load(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return exit_codes::FATAL;
        }
    };

    let require_log_file = matches!(cli.command, Commands::Run { .. }) && !config.general.dry_run;
    let log_path = match init_logger(&config.logging, cli.quiet, require_log_file) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return exit_codes::FATAL;
        }
    };

    let result = match &cli.command {
        Commands::Run { .. } => run_command(cli.config.as_deref(), config, stop).await,
        Commands::Status { json } => status_command(&config, *json),
        Commands::Reset { yes } => reset_command(&config, *yes),
        Commands::Check { .. } => check_command(&config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal: {}", e);
            report_fatal(&e.to_string(), log_path.as_deref());
            exit_codes::FATAL
        }
    }
}

fn report_fatal(message: &str, log_path: Option<&Path>) {
    eprintln!("\n{} {}", "FATAL:".red().bold(), message);

    let Some(path) = log_path else {
        return;
    };
    match tail(path, FATAL_TAIL_LINES) {
        Ok(lines) if !lines.is_empty() => {
            eprintln!("\nLast {} lines of {}:", lines.len(), path.display());
            for line in lines {
                eprintln!("  {}", line);
            }
        }
        Ok(_) => {}
        Err(e) => eprintln!("(could not read {}: {})", path.display(), e),
    }
}

/// Run all pending stages
pub async fn run_command(
    config_path: Option<&Path>,
    mut config: BootstrapConfig,
    stop: StopSignal,
) -> Result<i32> {
    let dry_run = config.general.dry_run;
    let file_store = FileStateStore::new(&config.general.state_file);

    // dry runs never take the lock or write run state
    let _lock = if dry_run {
        None
    } else {
        Some(StateLock::acquire(&config.general.state_file)?)
    };
    let store: Box<dyn RunStateStore> = if dry_run {
        warn!("DRY RUN: no changes will be made to the host or the run state");
        Box::new(MemoryStateStore::from_snapshot(file_store.snapshot()?))
    } else {
        Box::new(file_store)
    };

    if config.general.interactive && store.snapshot()?.parameters.get(PARAM_ADMIN_USER).is_none() {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        config.account.admin_user =
            prompt::prompt_admin_user(&mut stdin.lock(), &mut stdout, &config.account.admin_user)?;
    }
    pin_admin_user(store.as_ref(), &mut config)?;

    let executor: Box<dyn CommandExecutor> = if dry_run {
        Box::new(DryRunExecutor::new())
    } else {
        Box::new(LocalExecutor::new())
    };
    let probe = SystemProbe::new();

    let runner = StageRunner::new(&config, default_stages(), store.as_ref(), executor.as_ref(), &probe)?
        .with_stop_signal(stop);
    info!("Run {} using {}", runner.run_id(), store.location());

    let outcome = runner.run().await?;
    print_report(outcome.report());

    match &outcome {
        RunOutcome::Completed { .. } => {
            println!("\n{}", "All stages completed.".green().bold());
        }
        RunOutcome::AwaitingReboot { stage_id, reason, .. } => {
            let rebooting = maybe_reboot(&config, executor.as_ref()).await?;
            let resume = resume_command(config_path, &config);
            println!(
                "\n{}\n{}",
                "Reboot required".yellow().bold(),
                resume_instructions(stage_id, reason, &resume, rebooting)
            );
        }
        RunOutcome::Interrupted { next_stage, .. } => {
            eprintln!(
                "\n{} stopped before {}; completed stages are recorded.",
                "INTERRUPTED:".yellow().bold(),
                next_stage
            );
            eprintln!("Resume with:\n\n    {}", resume_command(config_path, &config));
        }
        RunOutcome::Failed { failure, .. } => {
            eprintln!("\n{} {}", "FAILED:".red().bold(), failure);
            eprintln!(
                "Fix the problem and run 'vps-bootstrap run' again; completed stages will be skipped."
            );
        }
    }

    Ok(outcome.exit_code())
}

/// Settle the admin account for the whole run
///
/// A name recorded by an earlier invocation wins. Otherwise the chosen name
/// is recorded before any stage runs, so a reboot ahead of the account
/// stage resumes with the same account.
pub fn pin_admin_user(store: &dyn RunStateStore, config: &mut BootstrapConfig) -> Result<()> {
    let recorded = store.snapshot()?.parameters.get(PARAM_ADMIN_USER).cloned();
    match recorded {
        Some(persisted) => {
            if persisted != config.account.admin_user {
                warn!(
                    "Admin account '{}' was chosen by an earlier run; ignoring '{}'",
                    persisted, config.account.admin_user
                );
                config.account.admin_user = persisted;
            }
        }
        None => {
            store.set_parameter(PARAM_ADMIN_USER, &config.account.admin_user)?;
            info!("Admin account for this host: {}", config.account.admin_user);
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    if report.stages.is_empty() {
        return;
    }

    println!("\n{:<10} {:<10} {:>10}", "STAGE", "RESULT", "TIME");
    for record in &report.stages {
        let status = match record.status {
            StageStatus::Completed => "completed".green(),
            StageStatus::Skipped => "skipped".dimmed(),
            StageStatus::Failed => "failed".red(),
            StageStatus::Running => "running".yellow(),
            StageStatus::Pending => "pending".normal(),
        };
        println!(
            "{:<10} {:<10} {:>9.1}s",
            record.stage_id,
            status,
            record.duration.as_secs_f64()
        );
    }
}

#[derive(Debug, Serialize)]
struct StageView {
    id: String,
    description: String,
    completed: bool,
    checkpoints: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    state_file: String,
    stages: Vec<StageView>,
    parameters: std::collections::BTreeMap<String, String>,
}

/// Show progress recorded in the run state
pub fn status_command(config: &BootstrapConfig, json: bool) -> Result<i32> {
    let store = FileStateStore::new(&config.general.state_file);
    let snapshot = store.snapshot()?;

    let view = StatusView {
        state_file: store.location(),
        stages: default_stages()
            .iter()
            .map(|stage| StageView {
                id: stage.id().to_string(),
                description: stage.description().to_string(),
                completed: snapshot.completed.contains(stage.id()),
                checkpoints: snapshot
                    .checkpoints
                    .get(stage.id())
                    .map(|names| names.iter().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect(),
        parameters: snapshot.parameters.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(exit_codes::SUCCESS);
    }

    println!("Run state: {}", view.state_file);
    println!("{:<10} {:<34} {}", "STAGE", "DESCRIPTION", "STATUS");
    println!("{:-<60}", "");
    for stage in &view.stages {
        let status = if stage.completed {
            "completed".green()
        } else if !stage.checkpoints.is_empty() {
            format!("partial ({})", stage.checkpoints.join(", ")).yellow()
        } else {
            "pending".normal()
        };
        println!("{:<10} {:<34} {}", stage.id, stage.description, status);
    }

    if !view.parameters.is_empty() {
        println!("\nParameters:");
        for (key, value) in &view.parameters {
            println!("  {}={}", key, value);
        }
    }

    Ok(exit_codes::SUCCESS)
}

/// Forget all progress so the next run starts from the first stage
pub fn reset_command(config: &BootstrapConfig, yes: bool) -> Result<i32> {
    let state_file = &config.general.state_file;

    if !yes {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        let question = format!("Delete run state {}?", state_file.display());
        if !prompt::confirm(&mut stdin.lock(), &mut stdout, &question)? {
            println!("Reset cancelled.");
            return Ok(exit_codes::SUCCESS);
        }
    }

    let _lock = StateLock::acquire(state_file)?;
    FileStateStore::new(state_file).reset()?;
    info!("Run state {} reset", state_file.display());
    println!("Run state reset; the next run starts from the first stage.");
    Ok(exit_codes::SUCCESS)
}

/// Evaluate host preconditions without changing anything
pub async fn check_command(config: &BootstrapConfig) -> Result<i32> {
    let probe = SystemProbe::new();
    let checker = PreconditionChecker::new(&config.requirements, &probe);
    let report = checker
        .run_all(CheckOptions {
            skip_os_check: config.general.skip_os_check,
            require_root: true,
        })
        .await;

    for result in &report.results {
        let mark = if result.passed { "✓".green() } else { "✗".red() };
        println!("{} {:<12} {}", mark, result.name, result.reason);
    }

    if report.passed() {
        println!("\n{}", "Host meets all requirements.".green().bold());
        Ok(exit_codes::SUCCESS)
    } else {
        Ok(exit_codes::PRECONDITION_FAILED)
    }
}

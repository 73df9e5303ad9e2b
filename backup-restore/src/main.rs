//! Backup Restore - Main entry point
//!
//! Verifies, lists, validates or restores one backup point.

use anyhow::Context;
use backup_restore::crypto::GpgBackend;
use backup_restore::integrity::Par2Repair;
use backup_restore::{utils, Config, RestoreExecutor, RestoreJob, RestoreMode, RestoreResult};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Any file belonging to the backup set
    #[arg(value_name = "BACKUP_FILE")]
    backup_file: PathBuf,

    /// Print the manifest's changes without restoring
    #[arg(short, long, group = "mode")]
    list: bool,

    /// Check everything a restore would, without writing
    #[arg(long, group = "mode")]
    validate: bool,

    /// Restore into this directory
    #[arg(short, long, value_name = "DIR", group = "mode")]
    restore: Option<PathBuf>,

    /// Continue past non-essential failures
    #[arg(short, long)]
    force: bool,

    /// Require the manifest to reference this parent backup
    #[arg(long, value_name = "ID")]
    lastbackup: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write logs to this file (overrides config)
    #[arg(long, value_name = "FILE")]
    logfile: Option<PathBuf>,
}

impl Args {
    fn mode(&self) -> RestoreMode {
        if let Some(target) = &self.restore {
            RestoreMode::Restore {
                target: target.clone(),
            }
        } else if self.list {
            RestoreMode::List
        } else if self.validate {
            RestoreMode::Validate
        } else {
            RestoreMode::Verify
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("backup-restore: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    // Initialize logging
    let log_level = if args.debug { "debug" } else { config.log.level.as_str() };
    let log_file = args.logfile.as_deref().or(config.log.file.as_deref());
    if let Err(e) = utils::logger::init(log_level, log_file).context("failed to initialize logging") {
        eprintln!("backup-restore: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::debug!("backup-restore v{}", env!("CARGO_PKG_VERSION"));

    let crypto = GpgBackend::new(config.tools.gpg.clone(), config.tools.gpg_home.clone());
    let repairer = Par2Repair::new(config.tools.par2.clone());
    let executor = RestoreExecutor::new(&crypto, &repairer, config.security.passphrase.clone());

    let job = RestoreJob {
        backup_file: args.backup_file.clone(),
        mode: args.mode(),
        force: args.force,
        required_parent: args.lastbackup.clone(),
    };

    match executor.execute(&job) {
        Ok(result) => {
            report(&result);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Restore failed: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn report(result: &RestoreResult) {
    if result.mode == RestoreMode::List {
        if let Some(plan) = &result.plan {
            print!("{}", plan.listing());
        }
        return;
    }

    if !result.skipped.is_empty() {
        tracing::warn!("Skipped (forced): {}", result.skipped.join(", "));
    }
    if let Some(summary) = &result.summary {
        tracing::info!(
            "Restore complete: {} extracted, {} deleted, {} moved, {} skipped{}",
            summary.extracted,
            summary.deleted,
            summary.moved,
            summary.skipped,
            if result.repaired { " (archive repaired)" } else { "" }
        );
    }
}

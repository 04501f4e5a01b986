//! backup-catalog - Main entry point
//!
//! Inspects and validates a catalog of physical PostgreSQL backups.

use anyhow::{bail, Context, Result};
use backup_catalog::catalog::{BackupId, BackupRecord, CatalogStore};
use backup_catalog::recovery::{ArchiveTimelines, ArchiveWalValidator, RecoveryTarget};
use backup_catalog::validate::{ChainValidator, ValidationReport};
use backup_catalog::{fs::walker, selector, utils, Config, Session};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Catalog root directory (overrides config)
    #[arg(short = 'B', long, global = true)]
    backup_path: Option<PathBuf>,

    /// WAL archive directory (overrides config)
    #[arg(short = 'A', long, global = true)]
    arclog_path: Option<PathBuf>,

    /// Number of parallel validation workers (overrides config)
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the catalog directory layout
    Init,

    /// List backups, newest first
    Show {
        /// Only this backup (base36 id)
        #[arg(long)]
        backup_id: Option<String>,

        /// Only the newest OK backup with data on this timeline
        #[arg(long)]
        timeline: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Rebuild a backup's file list from its database directory
    FileList {
        /// Backup to describe (base36 id)
        #[arg(long)]
        backup_id: String,
    },

    /// Mark abandoned runs as ERROR and validate every DONE backup
    ValidateAll {
        #[arg(long)]
        json: bool,
    },

    /// Validate the backups and WAL needed to recover to a target
    Validate {
        /// Use backups taken at or before this one (base36 id)
        #[arg(long)]
        backup_id: Option<String>,

        /// Recovery target time, e.g. "2017-01-01 12:00:00"
        #[arg(long)]
        time: Option<String>,

        /// Recovery target transaction id
        #[arg(long)]
        xid: Option<String>,

        /// Whether recovery stops just after the target
        #[arg(long)]
        inclusive: Option<String>,

        /// Recovery target timeline
        #[arg(long)]
        timeline: Option<u32>,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("cannot load configuration \"{}\"", path.display()))?,
        None => Config::default(),
    };
    if let Some(path) = args.backup_path {
        config.catalog.backup_path = path;
    }
    if let Some(path) = args.arclog_path {
        config.catalog.arclog_path = path;
    }
    if let Some(threads) = args.threads {
        config.validate.workers = threads;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "backup-catalog v{} (catalog: {})",
        env!("CARGO_PKG_VERSION"),
        config.catalog.backup_path.display()
    );

    let mut session = Session::from_config(&config);
    let signals = utils::shutdown::cancel_on_signal(session.cancel.clone());

    let result = run(args.command, &mut session).await;

    session.cancel.cancel();
    let _ = signals.await;
    result
}

async fn run(command: Command, session: &mut Session) -> Result<()> {
    match command {
        Command::Init => {
            CatalogStore::init(session.store.root())?;
            println!("initialized backup catalog at {}", session.store.root().display());
        }
        Command::Show {
            backup_id,
            timeline,
            json,
        } => {
            let filter = backup_id.as_deref().map(BackupId::from_base36);
            let mut backups = session.store.list(filter)?;
            if let Some(timeline) = timeline {
                backups = selector::last_data_backup(&backups, timeline)
                    .cloned()
                    .into_iter()
                    .collect();
            }
            if filter.is_some() && backups.is_empty() {
                bail!("backup {} not found", backup_id.unwrap_or_default());
            }
            if json {
                print_json(&backups)?;
            } else {
                print_table(&backups);
            }
        }
        Command::FileList { backup_id } => {
            let id = BackupId::from_base36(&backup_id);
            if session.store.read(id)?.is_none() {
                bail!("backup {} not found", backup_id);
            }
            let count = walker::record_file_list(
                &session.store.database_dir(id),
                &session.store.file_list_path(id),
            )?;
            println!("backup {}: {} entries written", id, count);
        }
        Command::ValidateAll { json } => {
            let timelines = ArchiveTimelines::new(&session.arclog_path);
            let wal = ArchiveWalValidator::new(timelines.clone());
            let summary = ChainValidator::new(session, &timelines, &wal)
                .validate_all_completed()
                .await?;
            if json {
                print_json(&summary)?;
            } else {
                for id in &summary.cleaned {
                    println!("backup {}: ERROR (abandoned run)", id);
                }
                print_reports(&summary.reports);
            }
        }
        Command::Validate {
            backup_id,
            time,
            xid,
            inclusive,
            timeline,
            json,
        } => {
            let anchor = backup_id.as_deref().map(BackupId::from_base36);
            let target = RecoveryTarget::parse(time.as_deref(), xid.as_deref(), inclusive.as_deref())?;
            let timelines = ArchiveTimelines::new(&session.arclog_path);
            let wal = ArchiveWalValidator::new(timelines.clone());
            let summary = ChainValidator::new(session, &timelines, &wal)
                .validate_to_target(anchor, &target, timeline)
                .await?;
            if json {
                print_json(&summary)?;
            } else {
                print_reports(&summary.reports);
                println!(
                    "WAL from {} on timeline {} checked (backup {})",
                    summary.wal_start, summary.target_timeline, summary.wal_backup
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_table(backups: &[BackupRecord]) {
    println!(
        "{:<8} {:<19} {:<6} {:>4} {:>12} {:<10} {:<10} {:<8}",
        "ID", "Recovery time", "Mode", "TLI", "Data", "Start LSN", "Stop LSN", "Status"
    );
    for backup in backups {
        let recovery_time = if backup.recovery_time > 0 {
            utils::time::format_timestamp(backup.recovery_time)
        } else {
            "----".to_string()
        };
        let data = backup
            .data_bytes
            .map(|bytes| bytes.to_string())
            .unwrap_or_else(|| "----".to_string());
        println!(
            "{:<8} {:<19} {:<6} {:>4} {:>12} {:<10} {:<10} {:<8}",
            backup.id.to_string(),
            recovery_time,
            backup.backup_mode.label(),
            backup.timeline,
            data,
            backup.start_lsn.to_string(),
            backup.stop_lsn.to_string(),
            backup.status.to_string()
        );
    }
}

fn print_reports(reports: &[ValidationReport]) {
    for report in reports {
        println!(
            "backup {}: {} ({} files, {} problems)",
            report.backup_id,
            report.status,
            report.files_total,
            report.problems.len()
        );
    }
}

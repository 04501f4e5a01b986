//! Error types for the backup catalog.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::record::{BackupId, BackupStatus};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open file \"{path}\": {source}")]
    LockOpen {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot lock file \"{path}\": {source}")]
    Lock {
        path: PathBuf,
        source: nix::errno::Errno,
    },

    #[error("cannot open directory \"{path}\": {source}")]
    CatalogRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid backup metadata \"{path}\": {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("invalid format found in \"{path}\" line {line}: {reason}")]
    FileList {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("cannot stat backup file \"{path}\": {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no full backup found, cannot validate")]
    NoFullBackup,

    #[error("given backup {id} is {status}")]
    BackupUnusable { id: BackupId, status: BackupStatus },

    #[error("interrupted during validate")]
    Interrupted,

    #[error("validation worker failed: {0}")]
    Worker(String),

    #[error("Timeline history error: {0}")]
    Timeline(String),

    #[error("WAL error: {0}")]
    Wal(String),

    #[error("Invalid recovery target: {0}")]
    InvalidTarget(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

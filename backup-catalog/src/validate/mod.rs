//! Backup validation.
//!
//! [`ValidationEngine`] checks every file of one backup against its file
//! list and records the verdict in the backup's metadata.
//! [`chain::ChainValidator`] drives it across the catalog.

pub mod chain;
pub mod pool;

use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::record::{BackupId, BackupRecord, BackupStatus};
use crate::fs::{checksum, manifest, FileEntry};
use crate::session::Session;
use crate::utils::{CatalogError, Result};
use pool::Step;

pub use chain::{CatalogSummary, ChainSummary, ChainValidator};

/// Why a file failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemKind {
    Vanished,
    SizeMismatch { expected: u64, actual: u64 },
    CrcMismatch { expected: u32, actual: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProblem {
    /// Path relative to the backup's database directory.
    pub path: PathBuf,
    #[serde(flatten)]
    pub kind: ProblemKind,
}

/// Result of validating one backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub backup_id: BackupId,
    pub status: BackupStatus,
    pub files_total: usize,
    pub problems: Vec<FileProblem>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.status == BackupStatus::Ok
    }
}

pub struct ValidationEngine<'a> {
    session: &'a Session,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Check the files of `record` by size, and by CRC unless `size_only`,
    /// then persist OK or CORRUPT.
    ///
    /// Cancellation and fatal I/O errors leave the stored status untouched.
    pub async fn validate(&self, record: &mut BackupRecord, size_only: bool) -> Result<ValidationReport> {
        let store = &self.session.store;
        let mut files_total = 0;
        let mut problems = Vec::new();

        if record.backup_mode.has_data() {
            info!(
                "validate: {} backup and archive log files by {}",
                record.id,
                if size_only { "SIZE" } else { "CRC" }
            );
            debug!("database files...");

            let files = manifest::read_file_list(
                &store.database_dir(record.id),
                &store.file_list_path(record.id),
            )?;
            for file in &files {
                file.release();
            }
            files_total = files.len();

            problems = pool::run(
                Arc::new(files),
                self.session.workers,
                &self.session.cancel,
                move |index, file: &FileEntry| check_file(index, files_total, file, size_only),
            )
            .await?;
        }

        record.status = if problems.is_empty() {
            BackupStatus::Ok
        } else {
            BackupStatus::Corrupt
        };
        store.write(record)?;

        if problems.is_empty() {
            debug!("backup {} is valid", record.id);
        } else {
            warn!("backup {} is corrupted", record.id);
        }

        Ok(ValidationReport {
            backup_id: record.id,
            status: record.status,
            files_total,
            problems,
        })
    }
}

fn check_file(index: usize, total: usize, file: &FileEntry, size_only: bool) -> Result<Step<FileProblem>> {
    let Some(write_size) = file.write_size else {
        return Ok(Step::Next);
    };
    if !file.is_regular() {
        return Ok(Step::Next);
    }

    debug!("({}/{}) {}", index + 1, total, file.rel_path.display());

    let problem = |kind: ProblemKind| -> Result<Step<FileProblem>> {
        Ok(Step::Stop(FileProblem {
            path: file.rel_path.clone(),
            kind,
        }))
    };

    let metadata = match std::fs::metadata(&file.path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("backup file \"{}\" vanished", file.path.display());
            return problem(ProblemKind::Vanished);
        }
        Err(source) => {
            return Err(CatalogError::Stat {
                path: file.rel_path.clone(),
                source,
            })
        }
    };

    if metadata.len() != write_size {
        warn!(
            "size of backup file \"{}\" must be {} but {}",
            file.rel_path.display(),
            write_size,
            metadata.len()
        );
        return problem(ProblemKind::SizeMismatch {
            expected: write_size,
            actual: metadata.len(),
        });
    }

    if !size_only {
        let crc = match checksum::file_crc(&file.path) {
            Ok(crc) => crc,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("backup file \"{}\" vanished", file.path.display());
                return problem(ProblemKind::Vanished);
            }
            Err(e) => return Err(e.into()),
        };
        if crc != file.crc {
            warn!(
                "CRC of backup file \"{}\" must be {:X} but {:X}",
                file.rel_path.display(),
                file.crc,
                crc
            );
            return problem(ProblemKind::CrcMismatch {
                expected: file.crc,
                actual: crc,
            });
        }
    }

    Ok(Step::Next)
}

//! WAL range check after file validation.
//!
//! File checks only prove that the backups are intact; recovery to the
//! target also needs the WAL from the start of the last chain member.

use std::path::Path;
use tracing::{debug, info};

use super::timeline::{ArchiveTimelines, TimelineSource};
use crate::catalog::record::{BackupRecord, Lsn, TimeLineId, TransactionId};
use crate::utils::{CatalogError, Result};

pub const WAL_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

const SEGMENTS_PER_XLOG_ID: u64 = 0x1_0000_0000 / WAL_SEGMENT_SIZE;

/// WAL that recovery from `backup` to the target would replay.
#[derive(Debug, Clone)]
pub struct WalRange<'a> {
    /// Chain member closest to the target.
    pub backup: &'a BackupRecord,
    /// Archive directory, or the backup's own WAL directory for streamed backups.
    pub wal_dir: &'a Path,
    pub start_lsn: Lsn,
    pub target_time: Option<i64>,
    pub target_xid: Option<TransactionId>,
    pub timeline: TimeLineId,
}

pub trait WalValidator: Send + Sync {
    fn validate_wal(&self, range: &WalRange<'_>) -> Result<()>;
}

/// WAL segment file name, e.g. `000000010000000100000089`.
pub fn segment_file_name(timeline: TimeLineId, segno: u64) -> String {
    format!(
        "{:08X}{:08X}{:08X}",
        timeline,
        segno / SEGMENTS_PER_XLOG_ID,
        segno % SEGMENTS_PER_XLOG_ID
    )
}

/// Checks that the segment holding the start LSN is present and counts the
/// contiguous segments after it. Record contents are not decoded.
#[derive(Debug, Clone)]
pub struct ArchiveWalValidator {
    timelines: ArchiveTimelines,
}

impl ArchiveWalValidator {
    pub fn new(timelines: ArchiveTimelines) -> Self {
        Self { timelines }
    }
}

impl WalValidator for ArchiveWalValidator {
    fn validate_wal(&self, range: &WalRange<'_>) -> Result<()> {
        let history = self.timelines.history(range.timeline)?;
        // None past the end of the LSN space, which also ends the scan.
        let present = |segno: u64| {
            let owner = history.timeline_at(Lsn(segno.checked_mul(WAL_SEGMENT_SIZE)?));
            [owner, range.timeline]
                .into_iter()
                .map(|tli| segment_file_name(tli, segno))
                .find(|name| range.wal_dir.join(name).is_file())
        };

        let first = range.start_lsn.0 / WAL_SEGMENT_SIZE;
        let Some(first_name) = present(first) else {
            return Err(CatalogError::Wal(format!(
                "WAL segment \"{}\" needed by backup {} is missing from \"{}\"",
                segment_file_name(history.timeline_at(range.start_lsn), first),
                range.backup.id,
                range.wal_dir.display()
            )));
        };

        let mut last_name = first_name.clone();
        let mut segno = first + 1;
        while let Some(name) = present(segno) {
            last_name = name;
            segno += 1;
        }

        debug!(
            target_time = ?range.target_time,
            target_xid = ?range.target_xid,
            "WAL range checked on timeline {}",
            range.timeline
        );
        info!(
            "backup {}: {} WAL segments available ({} .. {})",
            range.backup.id,
            segno - first,
            first_name,
            last_name
        );
        Ok(())
    }
}

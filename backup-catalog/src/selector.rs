//! Choosing which backups a recovery to a target would use.
//!
//! All functions take the catalog listing sorted newest first, as returned
//! by [`CatalogStore::list`](crate::catalog::CatalogStore::list).

use tracing::debug;

use crate::catalog::record::{BackupId, BackupMode, BackupRecord, BackupStatus, TimeLineId};
use crate::recovery::{RecoveryTarget, TimelineHistory};
use crate::utils::{CatalogError, Result};

/// Backups a recovery replays on top of the base, oldest last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan {
    /// Indices of the accepted differential backups, in replay order.
    pub members: Vec<usize>,
    /// Index of the backup closest to the target; the base when no
    /// differential was accepted.
    pub last_restored: usize,
}

/// Newest OK backup with data on `timeline`.
pub fn last_data_backup(backups: &[BackupRecord], timeline: TimeLineId) -> Option<&BackupRecord> {
    backups.iter().find(|backup| {
        backup.status == BackupStatus::Ok
            && backup.timeline == timeline
            && backup.backup_mode.has_data()
    })
}

fn usable_for(backup: &BackupRecord, target: &RecoveryTarget, history: &TimelineHistory) -> bool {
    history.contains(backup) && target.is_reachable_from(backup)
}

/// Index of the FULL backup recovery would start from.
///
/// With an `anchor`, newer backups are ignored and the anchor itself must be
/// OK or CORRUPT. A candidate failing the timeline or target check forgets
/// that the anchor was seen, so only the first FULL at or below the anchor
/// is ever accepted.
pub fn resolve_base(
    backups: &[BackupRecord],
    anchor: Option<BackupId>,
    target: &RecoveryTarget,
    history: &TimelineHistory,
) -> Result<usize> {
    let mut anchor_found = false;

    for (index, backup) in backups.iter().enumerate() {
        if let Some(anchor) = anchor {
            if backup.id > anchor {
                continue;
            }
            if backup.id == anchor {
                if !backup.status.is_settled() {
                    return Err(CatalogError::BackupUnusable {
                        id: anchor,
                        status: backup.status,
                    });
                }
                anchor_found = true;
            }
        }

        if !backup.backup_mode.is_at_least_full() || !backup.status.is_settled() {
            continue;
        }

        if usable_for(backup, target, history) && (anchor.is_none() || anchor_found) {
            debug!("base backup {} found at position {}", backup.id, index);
            return Ok(index);
        }
        anchor_found = false;
    }

    Err(CatalogError::NoFullBackup)
}

/// Differential backups stacked on the base at `base_index`.
pub fn chain_members(
    backups: &[BackupRecord],
    base_index: usize,
    anchor: Option<BackupId>,
    target: &RecoveryTarget,
    history: &TimelineHistory,
) -> ChainPlan {
    let base = &backups[base_index];
    let mut plan = ChainPlan {
        members: Vec::new(),
        last_restored: base_index,
    };

    for index in (0..base_index).rev() {
        let backup = &backups[index];

        if !backup.status.is_settled() || backup.timeline != base.timeline {
            continue;
        }
        if backup.backup_mode == BackupMode::Full {
            break;
        }
        if anchor.is_some_and(|anchor| backup.id > anchor) {
            break;
        }
        if !backup.backup_mode.is_differential() {
            continue;
        }
        if !usable_for(backup, target, history) {
            continue;
        }

        plan.members.push(index);
        plan.last_restored = index;
    }

    plan
}

/// Whether `backup` can decide the target timeline: an OK FULL backup
/// from which `target` is still reachable.
pub fn fixes_timeline(backup: &BackupRecord, target: &RecoveryTarget) -> bool {
    backup.backup_mode == BackupMode::Full
        && backup.status == BackupStatus::Ok
        && target.is_reachable_from(backup)
}

//! Catalog-wide and chain-wide validation.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{ValidationEngine, ValidationReport};
use crate::catalog::record::{BackupId, BackupMode, BackupRecord, BackupStatus, Lsn, TimeLineId};
use crate::catalog::LockOutcome;
use crate::recovery::{RecoveryTarget, TimelineSource, WalRange, WalValidator};
use crate::selector;
use crate::session::Session;
use crate::utils::{CatalogError, Result};

/// Directory inside a backup's database holding streamed WAL.
const STREAMED_WAL_DIR: &str = "pg_xlog";

/// Outcome of [`ChainValidator::validate_all_completed`].
#[derive(Debug, Default, Serialize)]
pub struct CatalogSummary {
    /// Another process held the catalog lock, so stale runs were left alone.
    pub cleanup_skipped: bool,
    /// Backups moved from RUNNING or DELETING to ERROR.
    pub cleaned: Vec<BackupId>,
    pub reports: Vec<ValidationReport>,
}

/// Outcome of [`ChainValidator::validate_to_target`].
#[derive(Debug, Serialize)]
pub struct ChainSummary {
    pub target_timeline: TimeLineId,
    pub base: BackupId,
    pub members: Vec<BackupId>,
    /// Backup whose start LSN the WAL check began from.
    pub wal_backup: BackupId,
    pub wal_start: Lsn,
    pub stream: bool,
    pub reports: Vec<ValidationReport>,
}

pub struct ChainValidator<'a> {
    session: &'a mut Session,
    timelines: &'a dyn TimelineSource,
    wal: &'a dyn WalValidator,
}

impl<'a> ChainValidator<'a> {
    pub fn new(
        session: &'a mut Session,
        timelines: &'a dyn TimelineSource,
        wal: &'a dyn WalValidator,
    ) -> Self {
        Self {
            session,
            timelines,
            wal,
        }
    }

    /// Mark runs abandoned by a crashed process as ERROR, then validate
    /// every DONE backup, oldest first.
    ///
    /// Stale runs are only touched when this process got the catalog lock.
    pub async fn validate_all_completed(&mut self) -> Result<CatalogSummary> {
        let outcome = self.session.store.lock()?;
        let result = self.validate_all_locked(outcome).await;
        self.session.store.unlock();
        result
    }

    async fn validate_all_locked(&self, outcome: LockOutcome) -> Result<CatalogSummary> {
        let store = &self.session.store;
        let mut summary = CatalogSummary {
            cleanup_skipped: outcome == LockOutcome::Held,
            ..CatalogSummary::default()
        };
        if summary.cleanup_skipped {
            warn!("another process holds the catalog lock, stale backups are left as they are");
        }

        let mut backups = store.list(None)?;
        let engine = ValidationEngine::new(self.session);

        for backup in backups.iter_mut().rev() {
            if !summary.cleanup_skipped
                && matches!(backup.status, BackupStatus::Running | BackupStatus::Deleting)
            {
                info!("backup {} was left {}, marking it ERROR", backup.id, backup.status);
                backup.status = BackupStatus::Error;
                store.write(backup)?;
                summary.cleaned.push(backup.id);
            }

            if backup.status != BackupStatus::Done {
                continue;
            }
            summary.reports.push(engine.validate(backup, false).await?);
        }

        Ok(summary)
    }

    /// Validate every backup a recovery to `target` would use, then the WAL
    /// between the last of them and the target.
    ///
    /// `anchor` restricts the search to backups taken at or before it.
    pub async fn validate_to_target(
        &mut self,
        anchor: Option<BackupId>,
        target: &RecoveryTarget,
        requested_timeline: Option<TimeLineId>,
    ) -> Result<ChainSummary> {
        if self.session.store.lock()? == LockOutcome::Held {
            debug!("catalog lock is held by another process");
        }
        let result = self.validate_chain(anchor, target, requested_timeline).await;
        self.session.store.unlock();
        result
    }

    async fn validate_chain(
        &self,
        anchor: Option<BackupId>,
        target: &RecoveryTarget,
        requested_timeline: Option<TimeLineId>,
    ) -> Result<ChainSummary> {
        let store = &self.session.store;
        let engine = ValidationEngine::new(self.session);
        let mut backups = store.list(None)?;
        let mut reports = Vec::new();

        let target_timeline = match requested_timeline {
            Some(timeline) => timeline,
            None => match self.timelines.newest_timeline()? {
                1 => full_backup_timeline(&engine, &mut backups, target, &mut reports).await?,
                newest => newest,
            },
        };
        info!("target timeline is {}", target_timeline);
        let history = self.timelines.history(target_timeline)?;

        debug!("searching recent full backup");
        let base_index = selector::resolve_base(&backups, anchor, target, &history)?;
        let mut stream = false;
        if anchor.is_some() {
            stream = backups[base_index].stream;
        }
        reports.push(engine.validate(&mut backups[base_index], false).await?);

        debug!("searching differential backup...");
        let plan = selector::chain_members(&backups, base_index, anchor, target, &history);
        for &index in &plan.members {
            if anchor.is_some() {
                stream = backups[index].stream;
            }
            reports.push(engine.validate(&mut backups[index], false).await?);
        }

        let last = &backups[plan.last_restored];
        let wal_dir = if stream {
            store.database_dir(last.id).join(STREAMED_WAL_DIR)
        } else {
            self.session.arclog_path.clone()
        };
        self.wal.validate_wal(&WalRange {
            backup: last,
            wal_dir: &wal_dir,
            start_lsn: last.start_lsn,
            target_time: target.time,
            target_xid: target.xid,
            timeline: target_timeline,
        })?;

        Ok(ChainSummary {
            target_timeline,
            base: backups[base_index].id,
            members: plan.members.iter().map(|&i| backups[i].id).collect(),
            wal_backup: last.id,
            wal_start: last.start_lsn,
            stream,
            reports,
        })
    }
}

/// Timeline of the newest usable FULL backup, walking newest first.
///
/// A FULL backup still DONE gets a size-only validation so it can qualify.
/// The walk stops at the first one that does, so older FULL backups are
/// left untouched.
async fn full_backup_timeline(
    engine: &ValidationEngine<'_>,
    backups: &mut [BackupRecord],
    target: &RecoveryTarget,
    reports: &mut Vec<ValidationReport>,
) -> Result<TimeLineId> {
    for backup in backups.iter_mut() {
        if backup.backup_mode != BackupMode::Full {
            continue;
        }
        if backup.status == BackupStatus::Done {
            reports.push(engine.validate(backup, true).await?);
        }
        if selector::fixes_timeline(backup, target) {
            return Ok(backup.timeline);
        }
    }
    Err(CatalogError::NoFullBackup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::lock::CatalogLock;
    use crate::catalog::store::CATALOG_LOCK_FILE;
    use crate::catalog::CatalogStore;
    use crate::recovery::TimelineHistory;
    use crate::validate::tests::{backup_on_disk, session};
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct FixedTimelines(TimeLineId);

    impl TimelineSource for FixedTimelines {
        fn newest_timeline(&self) -> Result<TimeLineId> {
            Ok(self.0)
        }

        fn history(&self, timeline: TimeLineId) -> Result<TimelineHistory> {
            Ok(TimelineHistory::single(timeline))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct WalCall {
        backup: BackupId,
        wal_dir: PathBuf,
        start_lsn: Lsn,
        timeline: TimeLineId,
    }

    #[derive(Default)]
    struct RecordingWal {
        calls: Mutex<Vec<WalCall>>,
        missing: bool,
    }

    impl WalValidator for RecordingWal {
        fn validate_wal(&self, range: &WalRange<'_>) -> Result<()> {
            self.calls.lock().unwrap().push(WalCall {
                backup: range.backup.id,
                wal_dir: range.wal_dir.to_path_buf(),
                start_lsn: range.start_lsn,
                timeline: range.timeline,
            });
            if self.missing {
                return Err(CatalogError::Wal("segment missing".into()));
            }
            Ok(())
        }
    }

    const FILES: &[(&str, &[u8])] = &[("base/1/1259", b"pages"), ("PG_VERSION", b"9.6\n")];

    fn set_status(store: &CatalogStore, record: &mut BackupRecord, status: BackupStatus) {
        record.status = status;
        store.write(record).unwrap();
    }

    fn status_of(store: &CatalogStore, id: i64) -> BackupStatus {
        store.read(BackupId(id)).unwrap().unwrap().status
    }

    /// FULL 100 (DONE), PAGE 150 (OK), FULL 200 (DONE), all on timeline 1.
    fn three_backups(store: &CatalogStore) {
        backup_on_disk(store, 100, BackupMode::Full, 1, FILES);
        let mut diff = backup_on_disk(store, 150, BackupMode::DiffPage, 1, FILES);
        set_status(store, &mut diff, BackupStatus::Ok);
        backup_on_disk(store, 200, BackupMode::Full, 1, FILES);
    }

    #[tokio::test]
    async fn test_validate_all_cleans_stale_runs() {
        let (_dir, mut session) = session(2);
        let store = &session.store;
        backup_on_disk(store, 100, BackupMode::Full, 1, FILES);
        let mut running = backup_on_disk(store, 150, BackupMode::DiffPage, 1, FILES);
        set_status(store, &mut running, BackupStatus::Running);
        let mut deleting = backup_on_disk(store, 200, BackupMode::Full, 1, FILES);
        set_status(store, &mut deleting, BackupStatus::Deleting);
        let mut corrupt = backup_on_disk(store, 250, BackupMode::Full, 1, FILES);
        set_status(store, &mut corrupt, BackupStatus::Corrupt);

        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let summary = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_all_completed()
            .await
            .unwrap();

        assert!(!summary.cleanup_skipped);
        assert_eq!(summary.cleaned, vec![BackupId(150), BackupId(200)]);
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].backup_id, BackupId(100));

        assert_eq!(status_of(&session.store, 100), BackupStatus::Ok);
        assert_eq!(status_of(&session.store, 150), BackupStatus::Error);
        assert_eq!(status_of(&session.store, 200), BackupStatus::Error);
        assert_eq!(status_of(&session.store, 250), BackupStatus::Corrupt);
        assert!(!session.store.holds_lock());
        assert!(wal.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_all_leaves_runs_of_lock_holder() {
        let (_dir, mut session) = session(2);
        backup_on_disk(&session.store, 100, BackupMode::Full, 1, FILES);
        let mut running = backup_on_disk(&session.store, 150, BackupMode::DiffPage, 1, FILES);
        set_status(&session.store, &mut running, BackupStatus::Running);

        let _other = CatalogLock::try_acquire(&session.store.root().join(CATALOG_LOCK_FILE))
            .unwrap()
            .unwrap();

        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let summary = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_all_completed()
            .await
            .unwrap();

        assert!(summary.cleanup_skipped);
        assert!(summary.cleaned.is_empty());
        assert_eq!(status_of(&session.store, 150), BackupStatus::Running);
        assert_eq!(status_of(&session.store, 100), BackupStatus::Ok);
    }

    #[tokio::test]
    async fn test_target_before_newest_full() {
        let (_dir, mut session) = session(3);
        three_backups(&session.store);
        let arclog = session.arclog_path.clone();

        let target = RecoveryTarget {
            time: Some(199),
            ..RecoveryTarget::latest()
        };
        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let summary = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(None, &target, None)
            .await
            .unwrap();

        assert_eq!(summary.target_timeline, 1);
        assert_eq!(summary.base, BackupId(100));
        assert_eq!(summary.members, vec![BackupId(150)]);
        assert_eq!(summary.wal_backup, BackupId(150));
        assert!(!summary.stream);
        assert!(summary.reports.iter().all(|r| r.is_valid()));

        // Both FULL backups were size-checked while looking for a timeline.
        assert_eq!(status_of(&session.store, 200), BackupStatus::Ok);
        assert_eq!(status_of(&session.store, 100), BackupStatus::Ok);

        let calls = wal.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![WalCall {
                backup: BackupId(150),
                wal_dir: arclog,
                start_lsn: Lsn(150 * 0x100_0000),
                timeline: 1,
            }]
        );
        assert!(!session.store.holds_lock());
    }

    #[tokio::test]
    async fn test_timeline_search_stops_at_first_usable_full() {
        let (_dir, mut session) = session(2);
        backup_on_disk(&session.store, 100, BackupMode::Full, 1, FILES);
        let mut newest = backup_on_disk(&session.store, 300, BackupMode::Full, 1, FILES);
        set_status(&session.store, &mut newest, BackupStatus::Ok);
        // Same size, different contents: only a CRC pass would notice.
        let version = session.store.database_dir(BackupId(100)).join("PG_VERSION");
        std::fs::write(&version, b"9.7\n").unwrap();

        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let summary = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(None, &RecoveryTarget::latest(), None)
            .await
            .unwrap();

        assert_eq!(summary.base, BackupId(300));
        let validated: Vec<_> = summary.reports.iter().map(|r| r.backup_id).collect();
        assert_eq!(validated, vec![BackupId(300)]);
        assert_eq!(status_of(&session.store, 100), BackupStatus::Done);
    }

    #[tokio::test]
    async fn test_anchor_with_streamed_wal() {
        let (_dir, mut session) = session(2);
        three_backups(&session.store);
        let mut full = session.store.read(BackupId(100)).unwrap().unwrap();
        set_status(&session.store, &mut full, BackupStatus::Ok);
        let mut diff = session.store.read(BackupId(150)).unwrap().unwrap();
        diff.stream = true;
        session.store.write(&diff).unwrap();
        let streamed = session.store.database_dir(BackupId(150)).join("pg_xlog");

        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let summary = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(Some(BackupId(150)), &RecoveryTarget::latest(), Some(1))
            .await
            .unwrap();

        assert_eq!(summary.base, BackupId(100));
        assert_eq!(summary.members, vec![BackupId(150)]);
        assert!(summary.stream);
        assert_eq!(wal.calls.lock().unwrap()[0].wal_dir, streamed);
        // 200 is newer than the anchor and never looked at.
        assert_eq!(status_of(&session.store, 200), BackupStatus::Done);
    }

    #[tokio::test]
    async fn test_newest_archive_timeline_is_used() {
        let (_dir, mut session) = session(2);
        backup_on_disk(&session.store, 100, BackupMode::Full, 1, FILES);
        let mut forked = backup_on_disk(&session.store, 200, BackupMode::Full, 2, FILES);
        set_status(&session.store, &mut forked, BackupStatus::Ok);

        let timelines = FixedTimelines(2);
        let wal = RecordingWal::default();
        let summary = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(None, &RecoveryTarget::latest(), None)
            .await
            .unwrap();

        assert_eq!(summary.target_timeline, 2);
        assert_eq!(summary.base, BackupId(200));
        assert_eq!(summary.reports.len(), 1);
        assert_eq!(status_of(&session.store, 100), BackupStatus::Done);
    }

    #[tokio::test]
    async fn test_unusable_anchor_fails_and_unlocks() {
        let (_dir, mut session) = session(2);
        three_backups(&session.store);
        let mut diff = session.store.read(BackupId(150)).unwrap().unwrap();
        set_status(&session.store, &mut diff, BackupStatus::Error);

        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let err = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(Some(BackupId(150)), &RecoveryTarget::latest(), Some(1))
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::BackupUnusable { id: BackupId(150), .. }));
        assert!(!session.store.holds_lock());
    }

    #[tokio::test]
    async fn test_missing_wal_fails_after_files_pass() {
        let (_dir, mut session) = session(2);
        three_backups(&session.store);

        let timelines = FixedTimelines(1);
        let wal = RecordingWal {
            missing: true,
            ..RecordingWal::default()
        };
        let err = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(None, &RecoveryTarget::latest(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::Wal(_)));
        assert_eq!(status_of(&session.store, 200), BackupStatus::Ok);
    }

    #[tokio::test]
    async fn test_no_full_backup() {
        let (_dir, mut session) = session(2);
        let mut diff = backup_on_disk(&session.store, 150, BackupMode::DiffPage, 1, FILES);
        set_status(&session.store, &mut diff, BackupStatus::Ok);

        let timelines = FixedTimelines(1);
        let wal = RecordingWal::default();
        let err = ChainValidator::new(&mut session, &timelines, &wal)
            .validate_to_target(None, &RecoveryTarget::latest(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NoFullBackup));
    }
}

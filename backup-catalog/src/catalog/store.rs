//! Directory-based backup catalog.
//!
//! ```text
//! <root>/pg_probackup.conf                 lock marker
//! <root>/backups/<base36 id>/backup.ini    metadata (see `ini`)
//! <root>/backups/<base36 id>/file_database.txt
//! <root>/backups/<base36 id>/database/     backed-up files
//! ```
//!
//! The store is the only writer of `backup.ini`.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::ini;
use super::lock::{CatalogLock, LockOutcome};
use super::record::{BackupId, BackupRecord};
use crate::utils::{CatalogError, Result};

pub const BACKUPS_DIR: &str = "backups";
pub const BACKUP_INI_FILE: &str = "backup.ini";
pub const DATABASE_DIR: &str = "database";
pub const DATABASE_FILE_LIST: &str = "file_database.txt";
pub const CATALOG_LOCK_FILE: &str = "pg_probackup.conf";

const DIR_PERMISSION: u32 = 0o700;

#[derive(Debug)]
pub struct CatalogStore {
    root: PathBuf,
    lock: Option<CatalogLock>,
}

impl CatalogStore {
    /// Open an existing catalog. Nothing is touched on disk.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: None,
        }
    }

    /// Create the catalog skeleton (idempotent) and open it.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::open(root);
        create_dir(&store.backups_dir())?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(store.root.join(CATALOG_LOCK_FILE))?;
        debug!("initialized backup catalog at {}", store.root.display());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn backup_dir(&self, id: BackupId) -> PathBuf {
        self.backups_dir().join(id.to_base36())
    }

    pub fn ini_path(&self, id: BackupId) -> PathBuf {
        self.backup_dir(id).join(BACKUP_INI_FILE)
    }

    pub fn database_dir(&self, id: BackupId) -> PathBuf {
        self.backup_dir(id).join(DATABASE_DIR)
    }

    pub fn file_list_path(&self, id: BackupId) -> PathBuf {
        self.backup_dir(id).join(DATABASE_FILE_LIST)
    }

    /// Take the catalog lock without blocking.
    pub fn lock(&mut self) -> Result<LockOutcome> {
        if self.lock.is_some() {
            return Ok(LockOutcome::Acquired);
        }
        match CatalogLock::try_acquire(&self.root.join(CATALOG_LOCK_FILE))? {
            Some(lock) => {
                self.lock = Some(lock);
                Ok(LockOutcome::Acquired)
            }
            None => Ok(LockOutcome::Held),
        }
    }

    /// Release the lock if held; a no-op otherwise.
    pub fn unlock(&mut self) {
        self.lock = None;
    }

    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Read one record. `Ok(None)` when the backup has no `backup.ini`.
    pub fn read(&self, id: BackupId) -> Result<Option<BackupRecord>> {
        read_ini(&self.ini_path(id), id)
    }

    /// All records, newest first. With `filter`, at most the matching one.
    ///
    /// Entries whose `backup.ini` cannot be decoded are skipped with a
    /// warning; failing to read the backups directory itself fails the
    /// whole listing.
    pub fn list(&self, filter: Option<BackupId>) -> Result<Vec<BackupRecord>> {
        let backups_dir = self.backups_dir();
        let root_error = |source| CatalogError::CatalogRoot {
            path: backups_dir.clone(),
            source,
        };

        let mut backups = Vec::new();
        for entry in fs::read_dir(&backups_dir).map_err(root_error)? {
            let entry = entry.map_err(root_error)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();

            if name.starts_with('.') || !path.is_dir() {
                continue;
            }

            let id = BackupId::from_base36(&name);
            match read_ini(&path.join(BACKUP_INI_FILE), id) {
                Ok(Some(record)) => {
                    if filter.is_some_and(|wanted| wanted != record.id) {
                        continue;
                    }
                    backups.push(record);
                }
                Ok(None) => {}
                Err(e @ CatalogError::Metadata { .. }) => {
                    warn!("skipping backup \"{}\": {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        backups.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(backups)
    }

    /// Rewrite the record's whole `backup.ini`.
    ///
    /// The text goes to a temporary file that is synced and renamed over
    /// the old one, so a crash leaves either the old or the new file.
    pub fn write(&self, record: &BackupRecord) -> Result<()> {
        let path = self.ini_path(record.id);
        let tmp_path = path.with_extension("ini.tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(ini::encode(record).as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        debug!(backup_id = %record.id, status = %record.status, "wrote {}", path.display());
        Ok(())
    }

    /// Create the backup directory and its `database/` subdirectory.
    pub fn create_directories(&self, record: &BackupRecord) -> Result<()> {
        create_dir(&self.backup_dir(record.id))?;
        create_dir(&self.database_dir(record.id))?;
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_PERMISSION);
    }
    builder.create(path)?;
    Ok(())
}

fn read_ini(path: &Path, id: BackupId) -> Result<Option<BackupRecord>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(CatalogError::Metadata {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    let mut record = ini::decode(&text, path, id)?;
    // The directory is where the record lives and is rewritten; a
    // START_TIME in a repeated local hour can decode an hour early.
    if record.id != id {
        warn!(
            "\"{}\" names backup {} but lives under {}, using {}",
            path.display(),
            record.id,
            id,
            id
        );
        record.id = id;
    }
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::record::{BackupMode, BackupStatus, Lsn};
    use tempfile::TempDir;

    fn record(id: i64, backup_mode: BackupMode, status: BackupStatus) -> BackupRecord {
        BackupRecord {
            id: BackupId(id),
            backup_mode,
            status,
            timeline: 1,
            start_lsn: Lsn(0x0000_0001_89AB_CDEF),
            stop_lsn: Lsn(0x0000_0001_9000_0000),
            block_size: 8192,
            wal_block_size: 8192,
            ..BackupRecord::default()
        }
    }

    fn store_with(records: &[BackupRecord]) -> Result<(TempDir, CatalogStore)> {
        let dir = TempDir::new()?;
        let store = CatalogStore::init(dir.path())?;
        for r in records {
            store.create_directories(r)?;
            store.write(r)?;
        }
        Ok((dir, store))
    }

    #[test]
    fn test_write_then_read() -> Result<()> {
        let mut original = record(1_500_000_000, BackupMode::DiffPtrack, BackupStatus::Done);
        original.parent_backup = Some(BackupId(1_499_000_000));
        original.data_bytes = Some(42);
        let (_dir, store) = store_with(&[original.clone()])?;

        assert_eq!(store.read(original.id)?, Some(original.clone()));
        assert!(!store.backup_dir(original.id).join("backup.ini.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_read_missing_is_none() -> Result<()> {
        let (_dir, store) = store_with(&[])?;
        assert_eq!(store.read(BackupId(12345))?, None);
        Ok(())
    }

    #[test]
    fn test_list_is_descending() -> Result<()> {
        let (_dir, store) = store_with(&[
            record(1_500_000_100, BackupMode::Full, BackupStatus::Ok),
            record(1_500_000_300, BackupMode::DiffPage, BackupStatus::Ok),
            record(1_500_000_200, BackupMode::Full, BackupStatus::Error),
        ])?;

        let ids: Vec<i64> = store.list(None)?.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1_500_000_300, 1_500_000_200, 1_500_000_100]);
        Ok(())
    }

    #[test]
    fn test_list_with_filter() -> Result<()> {
        let (_dir, store) = store_with(&[
            record(1_500_000_100, BackupMode::Full, BackupStatus::Ok),
            record(1_500_000_200, BackupMode::Full, BackupStatus::Ok),
        ])?;

        let found = store.list(Some(BackupId(1_500_000_100)))?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, BackupId(1_500_000_100));

        assert!(store.list(Some(BackupId(7)))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_list_skips_hidden_files_and_bad_entries() -> Result<()> {
        let good = record(1_500_000_100, BackupMode::Full, BackupStatus::Ok);
        let (_dir, store) = store_with(&[good.clone()])?;

        let hidden = store.backups_dir().join(".in-progress");
        fs::create_dir(&hidden)?;
        fs::write(hidden.join(BACKUP_INI_FILE), ini::encode(&good))?;
        fs::write(store.backups_dir().join("README"), "not a backup")?;
        fs::create_dir(store.backups_dir().join("EMPTY"))?;

        let broken = store.backups_dir().join("BROKEN");
        fs::create_dir(&broken)?;
        fs::write(broken.join(BACKUP_INI_FILE), "BACKUP_MODE=SIDEWAYS\n")?;

        let listed = store.list(None)?;
        assert_eq!(listed, vec![good]);
        Ok(())
    }

    #[test]
    fn test_directory_decides_record_id() -> Result<()> {
        let stored = record(1_500_000_100, BackupMode::Full, BackupStatus::Ok);
        let (_dir, store) = store_with(&[stored.clone()])?;
        let shifted = BackupRecord {
            id: BackupId(stored.id.0 - 3600),
            ..stored.clone()
        };
        fs::write(store.ini_path(stored.id), ini::encode(&shifted))?;

        assert_eq!(store.list(None)?, vec![stored.clone()]);
        assert_eq!(store.read(stored.id)?, Some(stored.clone()));

        store.write(&store.read(stored.id)?.unwrap_or_default())?;
        assert!(!store.backup_dir(shifted.id).exists());
        Ok(())
    }

    #[test]
    fn test_list_without_backups_dir_fails() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path().join("nowhere"));
        assert!(matches!(
            store.list(None),
            Err(CatalogError::CatalogRoot { .. })
        ));
    }

    #[test]
    fn test_write_replaces_whole_file() -> Result<()> {
        let mut r = record(1_500_000_100, BackupMode::Full, BackupStatus::Done);
        r.parent_backup = Some(BackupId(99));
        let (_dir, store) = store_with(&[r.clone()])?;

        r.status = BackupStatus::Ok;
        r.parent_backup = None;
        store.write(&r)?;

        let text = fs::read_to_string(store.ini_path(r.id))?;
        assert!(text.contains("STATUS=OK\n"));
        assert!(!text.contains("PARENT_BACKUP"));
        Ok(())
    }

    #[test]
    fn test_create_directories_is_idempotent() -> Result<()> {
        let r = record(1_500_000_100, BackupMode::Full, BackupStatus::Running);
        let (_dir, store) = store_with(&[])?;
        store.create_directories(&r)?;
        store.create_directories(&r)?;
        assert!(store.database_dir(r.id).is_dir());
        Ok(())
    }

    #[test]
    fn test_second_store_sees_lock_held() -> Result<()> {
        let (dir, mut first) = store_with(&[])?;
        let mut second = CatalogStore::open(dir.path());

        assert_eq!(first.lock()?, LockOutcome::Acquired);
        assert_eq!(second.lock()?, LockOutcome::Held);
        assert!(!second.holds_lock());

        first.unlock();
        first.unlock();
        assert_eq!(second.lock()?, LockOutcome::Acquired);
        Ok(())
    }

    #[test]
    fn test_lock_without_marker_fails() {
        let dir = TempDir::new().unwrap();
        let mut store = CatalogStore::open(dir.path());
        assert!(store.lock().is_err());
    }
}

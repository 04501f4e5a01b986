//! Backup catalog: record model, `backup.ini` codec, lock and store.

pub mod ini;
pub mod lock;
pub mod record;
pub mod store;

pub use lock::LockOutcome;
pub use record::{BackupId, BackupMode, BackupRecord, BackupStatus, Lsn, TimeLineId, TransactionId};
pub use store::CatalogStore;

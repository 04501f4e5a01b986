//! Per-invocation context shared by catalog operations.

use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::catalog::CatalogStore;
use crate::config::Config;

/// Catalog handle, WAL archive location, worker count and the cancellation
/// token for one run of the tool.
#[derive(Debug)]
pub struct Session {
    pub store: CatalogStore,
    pub arclog_path: PathBuf,
    pub workers: usize,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(store: CatalogStore, arclog_path: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            store,
            arclog_path: arclog_path.into(),
            workers: workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            CatalogStore::open(&config.catalog.backup_path),
            &config.catalog.arclog_path,
            config.workers(),
        )
    }
}

//! Backup catalog library
//!
//! Catalog of physical PostgreSQL backups: metadata codec, locked store,
//! backup selection for point-in-time recovery and parallel validation.

pub mod catalog;
pub mod config;
pub mod fs;
pub mod recovery;
pub mod selector;
pub mod session;
pub mod utils;
pub mod validate;

// Re-export commonly used types
pub use config::Config;
pub use session::Session;
pub use utils::errors::{CatalogError, Result};

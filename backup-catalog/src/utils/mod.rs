//! Utility modules for the backup catalog.

pub mod base36;
pub mod errors;
pub mod logger;
pub mod shutdown;
pub mod time;

pub use errors::{CatalogError, Result};

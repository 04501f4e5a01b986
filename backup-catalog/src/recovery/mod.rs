//! Recovery-side collaborators: targets, timeline history and WAL checks.

pub mod target;
pub mod timeline;
pub mod wal;

pub use target::RecoveryTarget;
pub use timeline::{ArchiveTimelines, TimelineHistory, TimelineSource};
pub use wal::{ArchiveWalValidator, WalRange, WalValidator};

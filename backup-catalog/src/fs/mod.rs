//! Backed-up file handling: file lists, scanning and checksums.

pub mod checksum;
pub mod manifest;
pub mod walker;

pub use manifest::{FileEntry, FileKind};

//! File list of a backup (`file_database.txt`).
//!
//! One line per file:
//!
//! ```text
//! <rel_path> <type> <write_size> <crc> 0<perm> [<YYYY-MM-DD HH:MM:SS> | <link target>]
//! ```
//!
//! `type` is `F` (relation data file), `f` (other regular file), `d` or `l`.
//! A `write_size` of all ones marks a file the differential backup did not
//! copy. Regular files carry their mtime, symlinks their target.

use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::utils::{time, CatalogError, Result};

/// `write_size` value of a file absent from a differential backup.
pub const WRITE_SIZE_ABSENT: u64 = u64::MAX;

const PERMISSION_BITS: u32 = 0o777;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

/// One file of a backup, loaded fresh for each validation run.
#[derive(Debug)]
pub struct FileEntry {
    /// Path relative to the backup's `database/` directory.
    pub rel_path: PathBuf,
    /// Absolute on-disk path.
    pub path: PathBuf,
    pub kind: FileKind,
    pub permissions: u32,
    pub is_datafile: bool,
    /// `None` when the file was not copied into this backup.
    pub write_size: Option<u64>,
    pub crc: u32,
    /// Unix seconds; 0 when not recorded.
    pub mtime: i64,
    pub linked: Option<String>,
    claimed: AtomicBool,
}

impl FileEntry {
    pub fn new(root: &Path, rel_path: impl Into<PathBuf>, kind: FileKind) -> Self {
        let rel_path = rel_path.into();
        Self {
            path: root.join(&rel_path),
            rel_path,
            kind,
            permissions: 0o600,
            is_datafile: false,
            write_size: None,
            crc: 0,
            mtime: 0,
            linked: None,
            claimed: AtomicBool::new(false),
        }
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn type_char(&self) -> char {
        match self.kind {
            FileKind::Regular if self.is_datafile => 'F',
            FileKind::Regular => 'f',
            FileKind::Directory => 'd',
            FileKind::Symlink => 'l',
        }
    }

    /// Claim this entry for the calling worker. Succeeds for exactly one
    /// caller until [`release`](Self::release).
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// The entry as one file-list line, without the newline.
    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{} {} {} {} 0{:o}",
            self.rel_path.display(),
            self.type_char(),
            self.write_size.unwrap_or(WRITE_SIZE_ABSENT),
            self.crc,
            self.permissions & PERMISSION_BITS,
        );
        match self.kind {
            FileKind::Regular => {
                line.push(' ');
                line.push_str(&time::format_timestamp(self.mtime));
            }
            FileKind::Symlink => {
                if let Some(target) = &self.linked {
                    line.push(' ');
                    line.push_str(target);
                }
            }
            FileKind::Directory => {}
        }
        line
    }
}

/// Load the file list at `list_path`, rooting every entry at `root`.
pub fn read_file_list(root: &Path, list_path: &Path) -> Result<Vec<FileEntry>> {
    let text = fs::read_to_string(list_path)?;
    parse_file_list(root, &text, list_path)
}

/// Parse file-list text; entries come back sorted by path.
pub fn parse_file_list(root: &Path, text: &str, list_path: &Path) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_line(root, line).map_err(|reason| CatalogError::FileList {
            path: list_path.to_path_buf(),
            line: index + 1,
            reason,
        })?;
        entries.push(entry);
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn parse_line(root: &Path, line: &str) -> std::result::Result<FileEntry, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(format!("expected at least 5 fields, got {}", fields.len()));
    }

    let (kind, is_datafile) = match fields[1] {
        "F" => (FileKind::Regular, true),
        "f" => (FileKind::Regular, false),
        "d" => (FileKind::Directory, false),
        "l" => (FileKind::Symlink, false),
        other => return Err(format!("invalid type '{}'", other)),
    };
    let write_size: u64 = fields[2]
        .parse()
        .map_err(|_| format!("invalid write size \"{}\"", fields[2]))?;
    let crc: u32 = fields[3]
        .parse()
        .map_err(|_| format!("invalid crc \"{}\"", fields[3]))?;
    let permissions = u32::from_str_radix(fields[4], 8)
        .map_err(|_| format!("invalid mode \"{}\"", fields[4]))?;

    let mut entry = FileEntry::new(root, fields[0], kind);
    entry.is_datafile = is_datafile;
    entry.write_size = (write_size != WRITE_SIZE_ABSENT).then_some(write_size);
    entry.crc = crc;
    entry.permissions = permissions;

    match kind {
        FileKind::Regular if fields.len() >= 7 => {
            let stamp = format!("{} {}", fields[5], fields[6]);
            entry.mtime = time::parse_timestamp(&stamp).unwrap_or(0);
        }
        FileKind::Symlink => entry.linked = fields.get(5).map(|s| s.to_string()),
        _ => {}
    }

    Ok(entry)
}

/// Write `entries` as a file list at `list_path`.
pub fn write_file_list(entries: &[FileEntry], list_path: &Path) -> Result<()> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_line());
        out.push('\n');
    }
    let mut file = fs::File::create(list_path)?;
    file.write_all(out.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

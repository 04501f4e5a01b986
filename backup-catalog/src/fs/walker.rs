//! Build a file list from a backup's database directory.
//!
//! Produces the same entries a backup run records in `file_database.txt`:
//! every file, directory and symlink under the root (the root itself
//! excluded), with size and CRC for regular files.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use super::checksum::file_crc;
use super::manifest::{write_file_list, FileEntry, FileKind};
use crate::utils::Result;

/// Top-level directories whose numerically named files are relation data.
const DATA_DIRECTORIES: &[&str] = &["base", "global", "pg_tblspc"];

/// Walk `root` and describe everything below it, sorted by path.
pub fn scan_database_dir(root: &Path) -> std::io::Result<Vec<FileEntry>> {
    let mut entries = Vec::new();

    for dir_entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let dir_entry = dir_entry?;
        entries.push(describe(&dir_entry, root)?);
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

/// Scan `root` and store the result as the file list at `list_path`.
/// Returns the number of entries written.
pub fn record_file_list(root: &Path, list_path: &Path) -> Result<usize> {
    let entries = scan_database_dir(root)?;
    write_file_list(&entries, list_path)?;
    Ok(entries.len())
}

fn describe(dir_entry: &DirEntry, root: &Path) -> std::io::Result<FileEntry> {
    let metadata = dir_entry.metadata()?;
    let rel_path = dir_entry
        .path()
        .strip_prefix(root)
        .unwrap_or(dir_entry.path())
        .to_path_buf();

    let file_type = dir_entry.file_type();
    let kind = if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Directory
    } else {
        FileKind::Regular
    };

    let mut entry = FileEntry::new(root, rel_path, kind);
    entry.permissions = metadata.permissions().mode();
    entry.mtime = metadata.mtime();

    match kind {
        FileKind::Regular => {
            entry.is_datafile = is_datafile(&entry.rel_path);
            entry.write_size = Some(metadata.len());
            entry.crc = file_crc(dir_entry.path())?;
        }
        FileKind::Symlink => {
            entry.write_size = Some(0);
            entry.linked = Some(std::fs::read_link(dir_entry.path())?.display().to_string());
        }
        FileKind::Directory => entry.write_size = Some(0),
    }

    Ok(entry)
}

fn is_datafile(rel_path: &Path) -> bool {
    let top_level = rel_path
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .unwrap_or_default();
    let starts_with_digit = rel_path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.chars().next())
        .is_some_and(|c| c.is_ascii_digit());

    DATA_DIRECTORIES.contains(&top_level) && starts_with_digit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(scan_database_dir(temp_dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_records_size_crc_and_kind() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("base/1"))?;
        fs::write(temp_dir.path().join("base/1/1259"), b"123456789")?;
        fs::write(temp_dir.path().join("PG_VERSION"), b"9.6\n")?;

        let entries = scan_database_dir(temp_dir.path())?;
        let names: Vec<_> = entries.iter().map(|e| e.rel_path.to_str().unwrap()).collect();
        assert_eq!(names, vec!["PG_VERSION", "base", "base/1", "base/1/1259"]);

        let relation = &entries[3];
        assert_eq!(relation.type_char(), 'F');
        assert_eq!(relation.write_size, Some(9));
        assert_eq!(relation.crc, 0xCBF4_3926);
        assert_eq!(relation.path, temp_dir.path().join("base/1/1259"));

        assert_eq!(entries[0].type_char(), 'f');
        assert_eq!(entries[1].kind, FileKind::Directory);
        Ok(())
    }

    #[test]
    fn test_recorded_list_reads_back() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("database");
        fs::create_dir_all(root.join("global"))?;
        fs::write(root.join("global/pg_control"), b"control")?;
        let list_path = temp_dir.path().join("file_database.txt");

        assert_eq!(record_file_list(&root, &list_path).unwrap(), 2);
        let entries = crate::fs::manifest::read_file_list(&root, &list_path).unwrap();
        assert_eq!(entries[1].rel_path, Path::new("global/pg_control"));
        assert_eq!(entries[1].write_size, Some(7));
        assert!(!entries[1].is_datafile);
        Ok(())
    }

    #[test]
    fn test_scan_records_symlinks() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("pg_tblspc"))?;
        std::os::unix::fs::symlink("/mnt/space", temp_dir.path().join("pg_tblspc/16385"))?;

        let entries = scan_database_dir(temp_dir.path())?;
        let link = entries.iter().find(|e| e.kind == FileKind::Symlink).unwrap();
        assert_eq!(link.linked.as_deref(), Some("/mnt/space"));
        Ok(())
    }
}

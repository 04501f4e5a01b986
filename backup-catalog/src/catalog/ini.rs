//! `backup.ini` codec.
//!
//! One `KEY=VALUE` per line, values optionally single-quoted, `#` or `;`
//! starting a comment. Each key maps to a setter through [`SCHEMA`]; keys
//! absent from the file keep the defaults of [`BackupRecord::new`].
//!
//! Strictness is per key: a malformed LSN or an unknown STATUS only warns,
//! while an unknown BACKUP_MODE, an unparsable number or time, an unknown
//! key, or a malformed line fails the whole decode.

use std::fmt;
use std::path::Path;
use tracing::warn;

use super::record::{BackupId, BackupMode, BackupRecord, BackupStatus, Lsn};
use crate::utils::{base36, time, CatalogError, Result};

/// Soft problems are logged inside the setter; `Err` aborts the decode.
type Setter = fn(&mut BackupRecord, &str) -> std::result::Result<(), String>;

struct Field {
    key: &'static str,
    set: Setter,
}

const SCHEMA: &[Field] = &[
    Field { key: "BACKUP_MODE", set: set_backup_mode },
    Field { key: "TIMELINEID", set: set_timeline },
    Field { key: "START_LSN", set: set_start_lsn },
    Field { key: "STOP_LSN", set: set_stop_lsn },
    Field { key: "START_TIME", set: set_start_time },
    Field { key: "END_TIME", set: set_end_time },
    Field { key: "RECOVERY_XID", set: set_recovery_xid },
    Field { key: "RECOVERY_TIME", set: set_recovery_time },
    Field { key: "DATA_BYTES", set: set_data_bytes },
    Field { key: "BLOCK_SIZE", set: set_block_size },
    Field { key: "XLOG_BLOCK_SIZE", set: set_wal_block_size },
    Field { key: "CHECKSUM_VERSION", set: set_checksum_version },
    Field { key: "STREAM", set: set_stream },
    Field { key: "STATUS", set: set_status },
    Field { key: "PARENT_BACKUP", set: set_parent_backup },
];

/// Decode the text of a `backup.ini`. `id` is used when the file carries no
/// `START_TIME`; `path` only labels errors.
pub fn decode(text: &str, path: &Path, id: BackupId) -> Result<BackupRecord> {
    let mut record = BackupRecord::new(id);

    for (index, line) in text.lines().enumerate() {
        let fail = |reason: String| CatalogError::Metadata {
            path: path.to_path_buf(),
            reason: format!("line {}: {}", index + 1, reason),
        };

        let Some((key, value)) = parse_pair(line).map_err(fail)? else {
            continue;
        };
        let field = SCHEMA
            .iter()
            .find(|field| key_equals(key, field.key))
            .ok_or_else(|| fail(format!("invalid option \"{}\"", key)))?;
        (field.set)(&mut record, &value).map_err(fail)?;
    }

    Ok(record)
}

/// Encode the full file: configuration section then result section.
pub fn encode(record: &BackupRecord) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_config_section(&mut out, record)
        .and_then(|_| write_result_section(&mut out, record));
    out
}

fn write_config_section(out: &mut impl fmt::Write, record: &BackupRecord) -> fmt::Result {
    writeln!(out, "# configuration")?;
    writeln!(out, "BACKUP_MODE={}", record.backup_mode.as_str())
}

fn write_result_section(out: &mut impl fmt::Write, record: &BackupRecord) -> fmt::Result {
    writeln!(out, "# result")?;
    writeln!(out, "TIMELINEID={}", record.timeline)?;
    writeln!(out, "START_LSN={}", record.start_lsn)?;
    writeln!(out, "STOP_LSN={}", record.stop_lsn)?;
    writeln!(out, "START_TIME='{}'", time::format_timestamp(record.start_time()))?;
    if record.end_time > 0 {
        writeln!(out, "END_TIME='{}'", time::format_timestamp(record.end_time))?;
    }
    writeln!(out, "RECOVERY_XID={}", record.recovery_xid)?;
    if record.recovery_time > 0 {
        writeln!(out, "RECOVERY_TIME='{}'", time::format_timestamp(record.recovery_time))?;
    }
    if let Some(bytes) = record.data_bytes {
        writeln!(out, "DATA_BYTES={}", bytes)?;
    }
    writeln!(out, "BLOCK_SIZE={}", record.block_size)?;
    writeln!(out, "XLOG_BLOCK_SIZE={}", record.wal_block_size)?;
    writeln!(out, "CHECKSUM_VERSION={}", record.checksum_version)?;
    writeln!(out, "STREAM={}", u8::from(record.stream))?;
    writeln!(out, "STATUS={}", record.status)?;
    if let Some(parent) = record.parent_backup {
        writeln!(out, "PARENT_BACKUP='{}'", parent)?;
    }
    Ok(())
}

fn is_comment_start(c: char) -> bool {
    c == '#' || c == ';'
}

/// Split one line into key and unquoted value. `Ok(None)` for blank and
/// comment lines.
fn parse_pair(line: &str) -> std::result::Result<Option<(&str, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(is_comment_start) {
        return Ok(None);
    }
    let syntax_error = || format!("syntax error in \"{}\"", line);

    let key_end = line
        .find(|c: char| c == '=' || c.is_whitespace() || is_comment_start(c))
        .unwrap_or(line.len());
    if key_end == 0 {
        return Err(syntax_error());
    }
    let key = &line[..key_end];

    let rest = line[key_end..].trim_start();
    let rest = rest.strip_prefix('=').ok_or_else(syntax_error)?.trim_start();

    let (value, rest) = match rest.strip_prefix('\'') {
        Some(quoted) => read_quoted(quoted).ok_or_else(syntax_error)?,
        None => {
            let end = rest
                .find(|c: char| c.is_whitespace() || is_comment_start(c))
                .unwrap_or(rest.len());
            (rest[..end].to_string(), &rest[end..])
        }
    };

    let rest = rest.trim_start();
    if !rest.is_empty() && !rest.starts_with(is_comment_start) {
        return Err(syntax_error());
    }

    Ok(Some((key, value)))
}

/// Read up to the closing quote; `''` is a literal quote.
fn read_quoted(text: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = text.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        if c != '\'' {
            value.push(c);
            continue;
        }
        if matches!(chars.peek(), Some((_, '\''))) {
            chars.next();
            value.push('\'');
            continue;
        }
        return Some((value, &text[pos + 1..]));
    }
    None
}

/// Case-insensitive, with `-` and `_` interchangeable.
fn key_equals(key: &str, name: &str) -> bool {
    fn norm(c: char) -> char {
        if c == '-' {
            '_'
        } else {
            c.to_ascii_uppercase()
        }
    }
    key.len() == name.len() && key.chars().map(norm).eq(name.chars().map(norm))
}

fn parse_u32(value: &str) -> std::result::Result<u32, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("value \"{}\" is not an unsigned 32-bit integer", value))
}

fn parse_time(value: &str) -> std::result::Result<i64, String> {
    time::parse_timestamp(value).ok_or_else(|| format!("value \"{}\" is not a timestamp", value))
}

fn set_backup_mode(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.backup_mode =
        BackupMode::parse(value).ok_or_else(|| format!("invalid backup-mode \"{}\"", value))?;
    Ok(())
}

fn set_timeline(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.timeline = parse_u32(value)?;
    Ok(())
}

fn set_start_lsn(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    match value.parse::<Lsn>() {
        Ok(lsn) => record.start_lsn = lsn,
        Err(_) => warn!("invalid START_LSN \"{}\"", value),
    }
    Ok(())
}

fn set_stop_lsn(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    match value.parse::<Lsn>() {
        Ok(lsn) => record.stop_lsn = lsn,
        Err(_) => warn!("invalid STOP_LSN \"{}\"", value),
    }
    Ok(())
}

fn set_start_time(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.id = BackupId(parse_time(value)?);
    Ok(())
}

fn set_end_time(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.end_time = parse_time(value)?;
    Ok(())
}

fn set_recovery_xid(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.recovery_xid = parse_u32(value)?;
    Ok(())
}

fn set_recovery_time(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.recovery_time = parse_time(value)?;
    Ok(())
}

fn set_data_bytes(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    let bytes: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("value \"{}\" is not a 64-bit integer", value))?;
    record.data_bytes = (bytes >= 0).then_some(bytes);
    Ok(())
}

fn set_block_size(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.block_size = parse_u32(value)?;
    Ok(())
}

fn set_wal_block_size(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.wal_block_size = parse_u32(value)?;
    Ok(())
}

fn set_checksum_version(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.checksum_version = parse_u32(value)?;
    Ok(())
}

fn set_stream(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    record.stream = match value.trim() {
        v if v.eq_ignore_ascii_case("true") => true,
        v if v.eq_ignore_ascii_case("false") => false,
        v => parse_u32(v)? != 0,
    };
    Ok(())
}

fn set_status(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    match BackupStatus::parse(value) {
        Some(status) => record.status = status,
        None => warn!("invalid STATUS \"{}\"", value),
    }
    Ok(())
}

fn set_parent_backup(record: &mut BackupRecord, value: &str) -> std::result::Result<(), String> {
    let parent = base36::decode(value);
    record.parent_backup = (parent != 0).then_some(BackupId(parent as i64));
    Ok(())
}

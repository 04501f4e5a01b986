//! Backup record model.
//!
//! A [`BackupRecord`] is the decoded form of one `backup.ini`. The record id
//! is the Unix time the backup started; its base-36 form names the backup's
//! catalog directory.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::utils::base36;

pub type TimeLineId = u32;
pub type TransactionId = u32;

/// Backup id: Unix start time of the backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(pub i64);

impl BackupId {
    pub fn from_base36(text: &str) -> Self {
        BackupId(base36::decode(text) as i64)
    }

    pub fn to_base36(self) -> String {
        base36::encode(self.0 as u64)
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base36())
    }
}

impl Serialize for BackupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base36())
    }
}

/// Log sequence number, written as `high/low` hex halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid LSN \"{0}\"")]
pub struct ParseLsnError(pub String);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);
    pub const MAX: Lsn = Lsn(u64::MAX);

    pub fn from_parts(high: u32, low: u32) -> Self {
        Lsn((u64::from(high) << 32) | u64::from(low))
    }

    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn low(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}/{:08x}", self.high(), self.low())
    }
}

impl FromStr for Lsn {
    type Err = ParseLsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseLsnError(s.to_string());
        let (high, low) = s.trim().split_once('/').ok_or_else(invalid)?;
        let high = u32::from_str_radix(high, 16).map_err(|_| invalid())?;
        let low = u32::from_str_radix(low, 16).map_err(|_| invalid())?;
        Ok(Lsn::from_parts(high, low))
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupMode {
    #[default]
    Invalid,
    #[serde(rename = "PAGE")]
    DiffPage,
    #[serde(rename = "PTRACK")]
    DiffPtrack,
    Full,
}

impl BackupMode {
    /// Text stored in `BACKUP_MODE`.
    pub fn as_str(self) -> &'static str {
        match self {
            BackupMode::Invalid => "",
            BackupMode::DiffPage => "PAGE",
            BackupMode::DiffPtrack => "PTRACK",
            BackupMode::Full => "FULL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        [
            BackupMode::Invalid,
            BackupMode::DiffPage,
            BackupMode::DiffPtrack,
            BackupMode::Full,
        ]
        .into_iter()
        .find(|mode| mode.as_str().eq_ignore_ascii_case(value))
    }

    /// True for modes usable as a restore base.
    pub fn is_at_least_full(self) -> bool {
        matches!(self, BackupMode::Full)
    }

    pub fn is_differential(self) -> bool {
        matches!(self, BackupMode::DiffPage | BackupMode::DiffPtrack)
    }

    /// True for modes that carry database files.
    pub fn has_data(self) -> bool {
        self.is_at_least_full() || self.is_differential()
    }

    pub fn label(self) -> &'static str {
        match self {
            BackupMode::Invalid => "INVALID",
            other => other.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BackupStatus {
    #[default]
    Invalid,
    Ok,
    Running,
    Error,
    Deleting,
    Deleted,
    Done,
    Corrupt,
}

const STATUS_NAMES: &[(BackupStatus, &str)] = &[
    (BackupStatus::Invalid, "UNKNOWN"),
    (BackupStatus::Ok, "OK"),
    (BackupStatus::Running, "RUNNING"),
    (BackupStatus::Error, "ERROR"),
    (BackupStatus::Deleting, "DELETING"),
    (BackupStatus::Deleted, "DELETED"),
    (BackupStatus::Done, "DONE"),
    (BackupStatus::Corrupt, "CORRUPT"),
];

impl BackupStatus {
    pub fn as_str(self) -> &'static str {
        STATUS_NAMES
            .iter()
            .find(|(status, _)| *status == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Exact, case-sensitive lookup.
    pub fn parse(value: &str) -> Option<Self> {
        STATUS_NAMES
            .iter()
            .find(|(_, name)| *name == value)
            .map(|(status, _)| *status)
    }

    /// OK or CORRUPT: finished backups that may take part in a chain.
    pub fn is_settled(self) -> bool {
        matches!(self, BackupStatus::Ok | BackupStatus::Corrupt)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BackupStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Metadata of one backup, as stored in its `backup.ini`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub backup_mode: BackupMode,
    pub status: BackupStatus,
    pub timeline: TimeLineId,
    pub start_lsn: Lsn,
    pub stop_lsn: Lsn,
    /// Unix seconds; 0 when unknown.
    pub end_time: i64,
    pub recovery_xid: TransactionId,
    /// Unix seconds; 0 when unknown.
    pub recovery_time: i64,
    pub data_bytes: Option<i64>,
    pub block_size: u32,
    pub wal_block_size: u32,
    pub checksum_version: u32,
    /// WAL was streamed into the backup rather than archived.
    pub stream: bool,
    pub parent_backup: Option<BackupId>,
}

impl BackupRecord {
    /// A default-initialised record for `id`.
    pub fn new(id: BackupId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn start_time(&self) -> i64 {
        self.id.0
    }
}

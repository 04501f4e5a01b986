//! Timeline history.
//!
//! A history is the chain of timelines leading to a target timeline, each
//! with the LSN where the next one branched off. Histories are read from
//! `<TLI>.history` files in the WAL archive:
//!
//! ```text
//! # comment
//! 1	0/3000000	no recovery target specified
//! 2	0/5000000	before 2017-01-01 12:00:00
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::catalog::record::{BackupRecord, Lsn, TimeLineId};
use crate::utils::{CatalogError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub timeline: TimeLineId,
    /// First LSN no longer on this timeline; unbounded for the target.
    pub end: Lsn,
}

/// Ancestor chain of a timeline, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineHistory {
    entries: Vec<TimelineEntry>,
}

impl TimelineHistory {
    /// History of a timeline with no recorded ancestors.
    pub fn single(timeline: TimeLineId) -> Self {
        Self {
            entries: vec![TimelineEntry {
                timeline,
                end: Lsn::MAX,
            }],
        }
    }

    /// Parse the history file text of `target`.
    pub fn parse(target: TimeLineId, text: &str) -> Result<Self> {
        let invalid = |line: &str, why: &str| {
            CatalogError::Timeline(format!(
                "invalid data in history file of timeline {}: \"{}\": {}",
                target, line, why
            ))
        };

        let mut ancestors: Vec<TimelineEntry> = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace();
            let timeline: TimeLineId = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| invalid(line, "expected a numeric timeline ID"))?;
            let end: Lsn = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| invalid(line, "expected a switchpoint location"))?;

            if ancestors.last().is_some_and(|prev| timeline <= prev.timeline) {
                return Err(invalid(line, "timeline IDs must be in increasing sequence"));
            }
            ancestors.push(TimelineEntry { timeline, end });
        }

        if ancestors.last().is_some_and(|prev| target <= prev.timeline) {
            return Err(CatalogError::Timeline(format!(
                "timeline IDs must be less than child timeline's ID {}",
                target
            )));
        }

        let mut entries = Self::single(target).entries;
        entries.extend(ancestors.into_iter().rev());
        Ok(Self { entries })
    }

    pub fn target(&self) -> TimeLineId {
        self.entries[0].timeline
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Whether `record` lies on this history: its timeline is in the chain
    /// and it stopped before that timeline was branched off.
    pub fn contains(&self, record: &BackupRecord) -> bool {
        self.entries
            .iter()
            .any(|e| e.timeline == record.timeline && record.stop_lsn < e.end)
    }

    /// Timeline that owns `lsn` along this history.
    pub fn timeline_at(&self, lsn: Lsn) -> TimeLineId {
        self.entries
            .iter()
            .rev()
            .find(|e| lsn < e.end)
            .map(|e| e.timeline)
            .unwrap_or_else(|| self.target())
    }
}

/// Timeline discovery used when validating toward a recovery target.
pub trait TimelineSource: Send + Sync {
    /// The newest timeline known to the archive.
    fn newest_timeline(&self) -> Result<TimeLineId>;

    /// Ancestor chain of `timeline`.
    fn history(&self, timeline: TimeLineId) -> Result<TimelineHistory>;
}

pub fn history_file_name(timeline: TimeLineId) -> String {
    format!("{:08X}.history", timeline)
}

/// Reads history files from a WAL archive directory.
#[derive(Debug, Clone)]
pub struct ArchiveTimelines {
    arclog_path: PathBuf,
}

impl ArchiveTimelines {
    pub fn new(arclog_path: impl Into<PathBuf>) -> Self {
        Self {
            arclog_path: arclog_path.into(),
        }
    }

    fn history_exists(&self, timeline: TimeLineId) -> bool {
        self.arclog_path.join(history_file_name(timeline)).is_file()
    }
}

impl TimelineSource for ArchiveTimelines {
    fn newest_timeline(&self) -> Result<TimeLineId> {
        let mut newest = 1;
        while self.history_exists(newest + 1) {
            newest += 1;
        }
        debug!("newest timeline in archive is {}", newest);
        Ok(newest)
    }

    fn history(&self, timeline: TimeLineId) -> Result<TimelineHistory> {
        if timeline == 1 {
            return Ok(TimelineHistory::single(1));
        }
        let path = self.arclog_path.join(history_file_name(timeline));
        match fs::read_to_string(&path) {
            Ok(text) => TimelineHistory::parse(timeline, &text),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TimelineHistory::single(timeline)),
            Err(e) => Err(CatalogError::Timeline(format!(
                "cannot read \"{}\": {}",
                path.display(),
                e
            ))),
        }
    }
}

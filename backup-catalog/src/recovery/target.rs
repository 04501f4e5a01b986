//! Recovery target: where point-in-time recovery should stop.

use serde::Serialize;

use crate::catalog::record::{BackupRecord, TransactionId};
use crate::utils::{time, CatalogError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryTarget {
    /// Unix seconds.
    pub time: Option<i64>,
    pub xid: Option<TransactionId>,
    pub inclusive: bool,
}

impl RecoveryTarget {
    /// Recover to the end of available WAL.
    pub fn latest() -> Self {
        Self {
            time: None,
            xid: None,
            inclusive: true,
        }
    }

    /// Build a target from optional command-line style strings.
    pub fn parse(time: Option<&str>, xid: Option<&str>, inclusive: Option<&str>) -> Result<Self> {
        let mut target = Self::latest();

        if let Some(text) = time {
            target.time = Some(time::parse_timestamp(text).ok_or_else(|| {
                CatalogError::InvalidTarget(format!("invalid value of time option \"{}\"", text))
            })?);
        }
        if let Some(text) = xid {
            target.xid = Some(text.trim().parse().map_err(|_| {
                CatalogError::InvalidTarget(format!("invalid value of xid option \"{}\"", text))
            })?);
        }
        if let Some(text) = inclusive {
            target.inclusive = parse_bool(text).ok_or_else(|| {
                CatalogError::InvalidTarget(format!(
                    "invalid value of inclusive option \"{}\"",
                    text
                ))
            })?;
        }

        Ok(target)
    }

    /// Whether recovery from `record` can still stop at this target.
    /// An xid target takes precedence over a time target.
    pub fn is_reachable_from(&self, record: &BackupRecord) -> bool {
        if let Some(xid) = self.xid {
            return record.recovery_xid <= xid;
        }
        if let Some(time) = self.time {
            return record.recovery_time <= time;
        }
        true
    }
}

/// PostgreSQL-style boolean: any unambiguous prefix of true/false/yes/no,
/// `on`/`off`, `1`/`0`.
fn parse_bool(text: &str) -> Option<bool> {
    let value = text.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    match value.as_str() {
        "1" | "on" => return Some(true),
        "0" | "off" => return Some(false),
        _ => {}
    }
    if "true".starts_with(&value) || "yes".starts_with(&value) {
        Some(true)
    } else if "false".starts_with(&value) || "no".starts_with(&value) {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::record::BackupId;

    fn record(recovery_xid: u32, recovery_time: i64) -> BackupRecord {
        BackupRecord {
            recovery_xid,
            recovery_time,
            ..BackupRecord::new(BackupId(1))
        }
    }

    #[test]
    fn test_latest_accepts_everything() {
        assert!(RecoveryTarget::latest().is_reachable_from(&record(u32::MAX, i64::MAX)));
    }

    #[test]
    fn test_time_target() {
        let target = RecoveryTarget {
            time: Some(1000),
            ..RecoveryTarget::latest()
        };
        assert!(target.is_reachable_from(&record(0, 1000)));
        assert!(!target.is_reachable_from(&record(0, 1001)));
    }

    #[test]
    fn test_xid_wins_over_time() {
        let target = RecoveryTarget {
            time: Some(0),
            xid: Some(500),
            inclusive: true,
        };
        assert!(target.is_reachable_from(&record(500, 99_999)));
        assert!(!target.is_reachable_from(&record(501, 0)));
    }

    #[test]
    fn test_parse() {
        let target = RecoveryTarget::parse(None, Some("700"), Some("off")).unwrap();
        assert_eq!(target.xid, Some(700));
        assert!(!target.inclusive);
        assert_eq!(target.time, None);

        let target = RecoveryTarget::parse(Some("2017-01-01 00:00:00"), None, None).unwrap();
        assert!(target.time.is_some());
        assert!(target.inclusive);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(RecoveryTarget::parse(Some("soon"), None, None).is_err());
        assert!(RecoveryTarget::parse(None, Some("-4"), None).is_err());
        assert!(RecoveryTarget::parse(None, None, Some("maybe")).is_err());
    }

    #[test]
    fn test_parse_bool_prefixes() {
        assert_eq!(parse_bool("t"), Some(true));
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("f"), Some(false));
        assert_eq!(parse_bool("o"), None);
        assert_eq!(parse_bool(""), None);
    }
}

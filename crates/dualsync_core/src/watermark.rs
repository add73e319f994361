//! Watermarks: per-table incremental extraction cursors.
//!
//! # Invariants
//!
//! - `last_sync_timestamp` only ever comes from data observed in a
//!   completed batch, never from the wall clock.
//! - It never moves backwards.

use crate::record::Record;
use chrono::NaiveDateTime;
use std::fmt;

/// Replication direction; each has its own metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Origin to cloud.
    Forward,
    /// Cloud to origin.
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Reverse => f.write_str("reverse"),
        }
    }
}

/// Status of a table's last sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// Seeded, never synced.
    Pending,
    /// Last attempt succeeded.
    Success,
    /// Last attempt failed.
    Error,
}

impl SyncStatus {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        }
    }

    /// Parses the stored form; unknown values read as `Pending`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "success" => SyncStatus::Success,
            "error" => SyncStatus::Error,
            _ => SyncStatus::Pending,
        }
    }
}

/// The epoch-origin timestamp every new watermark starts from.
pub fn epoch() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// One row of a metadata table.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    /// Logical table name.
    pub table_name: String,
    /// Boundary of already-processed data.
    pub last_sync_timestamp: NaiveDateTime,
    /// Rows written by the last successful sync.
    pub records_synced: i64,
    /// Last attempt status.
    pub status: SyncStatus,
    /// Last error, if the last attempt failed.
    pub error_message: Option<String>,
    /// When the row was last written.
    pub updated_at: NaiveDateTime,
}

impl Watermark {
    /// A fresh watermark at the epoch origin.
    pub fn bootstrap(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            last_sync_timestamp: epoch(),
            records_synced: 0,
            status: SyncStatus::Pending,
            error_message: None,
            updated_at: epoch(),
        }
    }

    /// Records a successful sync.
    ///
    /// `observed` is the largest timestamp seen in the batch; `None` (empty
    /// batch or no timestamp column) leaves the cursor where it is.
    pub fn advance(&mut self, observed: Option<NaiveDateTime>, records: i64, now: NaiveDateTime) {
        if let Some(ts) = observed {
            self.last_sync_timestamp = self.last_sync_timestamp.max(ts);
        }
        self.records_synced = records;
        self.status = SyncStatus::Success;
        self.error_message = None;
        self.updated_at = now;
    }

    /// Records a failed sync; the cursor is untouched.
    pub fn fail(&mut self, message: impl Into<String>, now: NaiveDateTime) {
        self.status = SyncStatus::Error;
        self.error_message = Some(message.into());
        self.updated_at = now;
    }
}

/// Largest timestamp of `column` across `records`.
pub fn max_timestamp<'a, I>(records: I, column: &str) -> Option<NaiveDateTime>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .filter_map(|r| r.get(column).and_then(|v| v.as_timestamp()))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn bootstrap_starts_at_epoch() {
        let wm = Watermark::bootstrap("orders");
        assert_eq!(wm.last_sync_timestamp, epoch());
        assert_eq!(wm.status, SyncStatus::Pending);
        assert_eq!(epoch().to_string(), "1970-01-01 00:00:00");
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut wm = Watermark::bootstrap("orders");
        wm.advance(Some(at(10)), 5, at(12));
        assert_eq!(wm.last_sync_timestamp, at(10));

        wm.advance(Some(at(8)), 1, at(13));
        assert_eq!(wm.last_sync_timestamp, at(10));
        assert_eq!(wm.records_synced, 1);

        wm.advance(None, 0, at(14));
        assert_eq!(wm.last_sync_timestamp, at(10));
    }

    #[test]
    fn failure_keeps_cursor() {
        let mut wm = Watermark::bootstrap("orders");
        wm.advance(Some(at(10)), 5, at(12));
        wm.fail("boom", at(13));
        assert_eq!(wm.last_sync_timestamp, at(10));
        assert_eq!(wm.status, SyncStatus::Error);
        assert_eq!(wm.error_message.as_deref(), Some("boom"));

        wm.advance(None, 0, at(14));
        assert_eq!(wm.error_message, None);
    }

    #[test]
    fn max_timestamp_ignores_nulls() {
        let rows = vec![
            record! { "updated_at" => at(3) },
            record! { "updated_at" => crate::Value::Null },
            record! { "updated_at" => at(9) },
        ];
        assert_eq!(max_timestamp(&rows, "updated_at"), Some(at(9)));
        assert_eq!(max_timestamp(&rows, "missing"), None);
    }

    #[test]
    fn status_roundtrip() {
        for s in [SyncStatus::Pending, SyncStatus::Success, SyncStatus::Error] {
            assert_eq!(SyncStatus::parse(s.as_str()), s);
        }
    }
}

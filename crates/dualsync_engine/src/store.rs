//! Store abstraction.
//!
//! The engines never talk SQL directly. Each store exposes the handful of
//! catalog, extraction and write primitives the replication algorithms need,
//! and a transaction type for the atomic staging commit. The PostgreSQL
//! implementation lives in `dualsync_postgres`; [`MemoryStore`] backs tests.
//!
//! [`MemoryStore`]: crate::MemoryStore

use crate::error::SyncResult;
use chrono::NaiveDateTime;
use dualsync_core::{ColumnInfo, OriginMarker, Record, Value, Watermark};
use std::future::Future;

/// Lower bound of an incremental extraction: `column > after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Since {
    /// Mutation timestamp column.
    pub column: String,
    /// Exclusive lower bound.
    pub after: NaiveDateTime,
}

/// Restricts an extraction to rows carrying one origin marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerFilter {
    /// Marker column.
    pub column: String,
    /// Required marker.
    pub marker: OriginMarker,
}

/// What to read from a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Table to read.
    pub table: String,
    /// Incremental lower bound; `None` reads every row.
    pub since: Option<Since>,
    /// Marker restriction.
    pub marker: Option<MarkerFilter>,
}

impl FetchRequest {
    /// Reads every row of `table`.
    pub fn all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            since: None,
            marker: None,
        }
    }

    /// Reads only rows with `column > after`.
    #[must_use]
    pub fn since(mut self, column: impl Into<String>, after: NaiveDateTime) -> Self {
        self.since = Some(Since {
            column: column.into(),
            after,
        });
        self
    }

    /// Reads only rows whose `column` holds `marker`.
    #[must_use]
    pub fn marked(mut self, column: impl Into<String>, marker: OriginMarker) -> Self {
        self.marker = Some(MarkerFilter {
            column: column.into(),
            marker,
        });
        self
    }

    /// True if this is a full extraction.
    pub fn is_full(&self) -> bool {
        self.since.is_none()
    }
}

/// A transaction-scoped, constraint-free clone of a target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    /// Name of the staging table.
    pub name: String,
    /// Table it clones.
    pub target: String,
    /// Columns, in the target's order.
    pub columns: Vec<ColumnInfo>,
}

/// A replication endpoint.
///
/// Every method acquires what it needs from the store's pool and releases it
/// before returning, on success and on error alike.
pub trait Store: Send + Sync {
    /// Transaction type returned by [`Store::begin`].
    type Transaction: StoreTransaction;

    /// Name used in logs and errors (`origin`, `cloud`).
    fn name(&self) -> &str;

    /// Checks the store is reachable.
    fn ping(&self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Columns of `table`, or `None` if the table does not exist.
    fn columns(&self, table: &str) -> impl Future<Output = SyncResult<Option<Vec<ColumnInfo>>>> + Send;

    /// Primary key columns declared in the catalog; empty if none.
    fn primary_key(&self, table: &str) -> impl Future<Output = SyncResult<Vec<String>>> + Send;

    /// Reads rows.
    fn fetch(&self, request: &FetchRequest) -> impl Future<Output = SyncResult<Vec<Record>>> + Send;

    /// Distinct non-NULL values of one column.
    fn distinct_values(
        &self,
        table: &str,
        column: &str,
    ) -> impl Future<Output = SyncResult<Vec<Value>>> + Send;

    /// `(match, select)` pairs used to materialise a lookup.
    fn lookup_pairs(
        &self,
        table: &str,
        match_column: &str,
        select_column: &str,
    ) -> impl Future<Output = SyncResult<Vec<(Value, Value)>>> + Send;

    /// True if a row with these key values exists.
    fn exists(
        &self,
        table: &str,
        key: &[(String, Value)],
    ) -> impl Future<Output = SyncResult<bool>> + Send;

    /// Inserts one row outside any explicit transaction.
    fn insert(&self, table: &str, record: &Record) -> impl Future<Output = SyncResult<()>> + Send;

    /// Creates a watermark table if it does not exist.
    fn ensure_metadata_table(&self, table: &str) -> impl Future<Output = SyncResult<()>> + Send;

    /// Inserts an epoch watermark for every name that has none.
    fn seed_watermarks(
        &self,
        table: &str,
        names: &[String],
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Reads one watermark; `None` if the table or row is missing.
    fn read_watermark(
        &self,
        table: &str,
        name: &str,
    ) -> impl Future<Output = SyncResult<Option<Watermark>>> + Send;

    /// Reads every watermark, ordered by name.
    fn read_watermarks(&self, table: &str) -> impl Future<Output = SyncResult<Vec<Watermark>>> + Send;

    /// Upserts a watermark outside any explicit transaction.
    ///
    /// The stored timestamp never decreases.
    fn write_watermark(
        &self,
        table: &str,
        watermark: &Watermark,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Opens a transaction on a dedicated connection.
    fn begin(&self) -> impl Future<Output = SyncResult<Self::Transaction>> + Send;

    /// Closes the pool.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// An open transaction.
///
/// Dropping a transaction without committing rolls it back, and every
/// staging table it created disappears with it.
pub trait StoreTransaction: Send {
    /// Defers deferrable constraint checks to commit time.
    fn defer_constraints(&mut self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Creates a staging clone of `target`.
    fn create_staging(
        &mut self,
        target: &str,
    ) -> impl Future<Output = SyncResult<StagingTable>> + Send;

    /// Bulk-inserts rows into a staging table.
    fn stage_rows(
        &mut self,
        staging: &StagingTable,
        rows: &[Record],
        batch_size: usize,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Upserts staged rows into the target by `key`, deduplicating staged
    /// rows by key (last staged wins).
    ///
    /// With a marker column, existing rows whose marker is neither `"D"`
    /// nor NULL are left untouched. Returns rows inserted or updated.
    fn upsert_from_staging(
        &mut self,
        staging: &StagingTable,
        columns: &[String],
        key: &[String],
        marker_column: Option<&str>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Deletes origin-authored rows (marker `"D"` or NULL), or every row
    /// when there is no marker column. Returns rows deleted.
    fn delete_origin_rows(
        &mut self,
        target: &str,
        marker_column: Option<&str>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Copies every staged row into the target. Returns rows inserted.
    fn insert_from_staging(
        &mut self,
        staging: &StagingTable,
    ) -> impl Future<Output = SyncResult<u64>> + Send;

    /// Upserts a watermark as part of this transaction.
    fn write_watermark(
        &mut self,
        table: &str,
        watermark: &Watermark,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Commits.
    fn commit(self) -> impl Future<Output = SyncResult<()>> + Send;

    /// Rolls back.
    fn rollback(self) -> impl Future<Output = SyncResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualsync_core::epoch;

    #[test]
    fn fetch_request_builder() {
        let request = FetchRequest::all("orders");
        assert!(request.is_full());

        let request = FetchRequest::all("visits")
            .since("updated_at", epoch())
            .marked("origin_marker", OriginMarker::Cloud);
        assert!(!request.is_full());
        assert_eq!(request.since.as_ref().map(|s| s.column.as_str()), Some("updated_at"));
        assert_eq!(request.marker.map(|m| m.marker), Some(OriginMarker::Cloud));
    }
}

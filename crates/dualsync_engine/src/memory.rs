//! An in-memory store for testing.
//!
//! Models the PostgreSQL behaviour the engines depend on: primary-key
//! uniqueness, NOT NULL, `character varying(n)` limits, serial columns,
//! transaction isolation with rollback on drop, and a marker-aware upsert.
//! Failures can be injected at each phase, and every committed row change
//! is recorded in a statement log.

use crate::error::{SyncError, SyncResult};
use crate::store::{FetchRequest, StagingTable, Store, StoreTransaction};
use dualsync_core::{
    ColumnInfo, ColumnType, KeyValue, OriginMarker, Record, SyncStatus, Value, Watermark,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `ping` and `begin`.
    Connect,
    /// `fetch`.
    Fetch,
    /// Staging table creation and load.
    Stage,
    /// Applying staged rows to the target.
    Apply,
    /// Transaction commit.
    Commit,
    /// Direct single-row inserts.
    Insert,
}

/// Definition of an in-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// Primary key columns.
    pub primary_key: Vec<String>,
    /// Column filled from a sequence when omitted.
    pub serial: Option<String>,
}

impl TableDef {
    /// Starts a table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            serial: None,
        }
    }

    /// Adds a nullable column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.columns.push(ColumnInfo::new(name, sql_type));
        self
    }

    /// Adds a NOT NULL column.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        self.columns.push(ColumnInfo::new(name, sql_type).not_null());
        self
    }

    /// Adds an integer column filled from a sequence.
    #[must_use]
    pub fn serial(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.columns
            .push(ColumnInfo::new(name.clone(), "integer").not_null().with_default());
        self.serial = Some(name);
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    fn metadata(name: &str) -> Self {
        TableDef::new(name)
            .required("table_name", "character varying(255)")
            .required("last_sync_timestamp", "timestamp without time zone")
            .column("records_synced", "bigint")
            .column("sync_status", "character varying(20)")
            .column("error_message", "text")
            .column("updated_at", "timestamp without time zone")
            .primary_key(["table_name"])
    }
}

#[derive(Debug, Clone)]
struct MemoryTable {
    def: TableDef,
    rows: Vec<Record>,
    next_serial: i64,
}

impl MemoryTable {
    fn new(def: TableDef) -> Self {
        Self {
            def,
            rows: Vec::new(),
            next_serial: 1,
        }
    }

    /// Lays `record` out in column order, filling omitted columns with
    /// their default, and checks column-level constraints.
    fn conform(&mut self, record: &Record) -> SyncResult<Record> {
        if let Some(unknown) = record
            .columns()
            .find(|c| !self.def.columns.iter().any(|d| d.name == *c))
        {
            return Err(SyncError::store_fatal(format!(
                "column \"{unknown}\" of relation \"{}\" does not exist",
                self.def.name
            )));
        }

        let mut row = Record::with_capacity(self.def.columns.len());
        for column in &self.def.columns {
            let value = match record.get(&column.name) {
                Some(v) => v.clone(),
                None if self.def.serial.as_deref() == Some(column.name.as_str()) => {
                    let n = self.next_serial;
                    self.next_serial += 1;
                    Value::Int(n)
                }
                None => Value::Null,
            };
            if value.is_null() && !column.nullable {
                return Err(SyncError::Constraint(format!(
                    "null value in column \"{}\" of relation \"{}\"",
                    column.name, self.def.name
                )));
            }
            if let (ColumnType::Text { max_len: Some(n) }, Value::Text(s)) = (&column.ty, &value) {
                if s.chars().count() > *n {
                    return Err(SyncError::store_fatal(format!(
                        "value too long for type {} in column \"{}\"",
                        column.sql_type, column.name
                    )));
                }
            }
            row.set(column.name.clone(), value);
        }
        Ok(row)
    }

    fn key_of(&self, record: &Record) -> Option<Vec<KeyValue>> {
        if self.def.primary_key.is_empty() {
            return None;
        }
        record.key(&self.def.primary_key)
    }

    fn position(&self, key: &[KeyValue]) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| self.key_of(r).as_deref() == Some(key))
    }

    fn insert(&mut self, record: &Record) -> SyncResult<()> {
        let row = self.conform(record)?;
        if let Some(key) = self.key_of(&row) {
            if self.position(&key).is_some() {
                return Err(SyncError::Constraint(format!(
                    "duplicate key value violates unique constraint \"{}_pkey\"",
                    self.def.name
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }
}

type Tables = BTreeMap<String, MemoryTable>;

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    failures: Mutex<HashMap<FailPoint, String>>,
    unreachable: AtomicBool,
    statements: Mutex<Vec<String>>,
    staging_seq: AtomicU64,
}

impl Shared {
    fn check(&self, point: FailPoint) -> SyncResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("connection refused".into()));
        }
        match self.failures.lock().remove(&point) {
            None => Ok(()),
            Some(message) => Err(match point {
                FailPoint::Connect => SyncError::Connection(message),
                FailPoint::Fetch | FailPoint::Commit => SyncError::store_retryable(message),
                FailPoint::Stage | FailPoint::Apply | FailPoint::Insert => {
                    SyncError::Constraint(message)
                }
            }),
        }
    }

    fn reachable(&self) -> SyncResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SyncError::Connection("connection refused".into()));
        }
        Ok(())
    }
}

fn missing(table: &str) -> SyncError {
    SyncError::store_fatal(format!("relation \"{table}\" does not exist"))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> SyncResult<&'a mut MemoryTable> {
    tables.get_mut(name).ok_or_else(|| missing(name))
}

fn watermark_to_record(watermark: &Watermark) -> Record {
    let mut r = Record::with_capacity(6);
    r.set("table_name", watermark.table_name.as_str());
    r.set("last_sync_timestamp", watermark.last_sync_timestamp);
    r.set("records_synced", watermark.records_synced);
    r.set("sync_status", watermark.status.as_str());
    r.set("error_message", watermark.error_message.clone());
    r.set("updated_at", watermark.updated_at);
    r
}

fn record_to_watermark(record: &Record) -> Option<Watermark> {
    let mut watermark = Watermark::bootstrap(record.get("table_name")?.as_text()?);
    watermark.last_sync_timestamp = record.get("last_sync_timestamp")?.as_timestamp()?;
    watermark.records_synced = record.get("records_synced").and_then(Value::as_int).unwrap_or(0);
    watermark.status = record
        .get("sync_status")
        .and_then(Value::as_text)
        .map_or(SyncStatus::Pending, SyncStatus::parse);
    watermark.error_message = record
        .get("error_message")
        .and_then(Value::as_text)
        .map(str::to_string);
    if let Some(ts) = record.get("updated_at").and_then(Value::as_timestamp) {
        watermark.updated_at = ts;
    }
    Some(watermark)
}

fn upsert_watermark(
    tables: &mut Tables,
    table: &str,
    watermark: &Watermark,
    log: &mut Vec<String>,
) -> SyncResult<()> {
    let meta = table_mut(tables, table)?;
    let key = vec![KeyValue::Text(watermark.table_name.clone())];
    match meta.position(&key) {
        Some(idx) => {
            let mut merged = watermark.clone();
            if let Some(existing) = record_to_watermark(&meta.rows[idx]) {
                merged.last_sync_timestamp =
                    merged.last_sync_timestamp.max(existing.last_sync_timestamp);
            }
            meta.rows[idx] = meta.conform(&watermark_to_record(&merged))?;
            log.push(format!("UPDATE {table}"));
        }
        None => {
            meta.insert(&watermark_to_record(watermark))?;
            log.push(format!("INSERT {table}"));
        }
    }
    Ok(())
}

fn matches_request(record: &Record, request: &FetchRequest) -> bool {
    if let Some(since) = &request.since {
        match record.get(&since.column).and_then(Value::as_timestamp) {
            Some(ts) if ts > since.after => {}
            _ => return false,
        }
    }
    if let Some(filter) = &request.marker {
        let marker = record.get(&filter.column).and_then(OriginMarker::from_value);
        if marker != Some(filter.marker) {
            return false;
        }
    }
    true
}

/// An in-memory [`Store`].
///
/// Clones share the same tables, so a test can keep a handle while an
/// engine owns another.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Creates (or replaces) a table.
    pub fn create_table(&self, def: TableDef) {
        self.shared
            .tables
            .write()
            .insert(def.name.clone(), MemoryTable::new(def));
    }

    /// Drops a table if it exists.
    pub fn drop_table(&self, table: &str) {
        self.shared.tables.write().remove(table);
    }

    /// True if the table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.shared.tables.read().contains_key(table)
    }

    /// Inserts a row directly, bypassing failure injection and the log.
    pub fn insert_row(&self, table: &str, record: Record) -> SyncResult<()> {
        table_mut(&mut self.shared.tables.write(), table)?.insert(&record)
    }

    /// Sets `column = value` on every row where `key_column` matches `key`.
    /// Returns the number of rows changed.
    pub fn update_rows(
        &self,
        table: &str,
        key_column: &str,
        key: impl Into<Value>,
        column: &str,
        value: impl Into<Value>,
    ) -> usize {
        let key = key.into().key();
        let value = value.into();
        let mut tables = self.shared.tables.write();
        let Some(t) = tables.get_mut(table) else {
            return 0;
        };
        let mut changed = 0;
        for row in &mut t.rows {
            if row.get(key_column).and_then(Value::key) == key {
                row.set(column, value.clone());
                changed += 1;
            }
        }
        changed
    }

    /// Deletes every row where `key_column` matches `key`.
    pub fn delete_rows(&self, table: &str, key_column: &str, key: impl Into<Value>) -> usize {
        let key = key.into().key();
        let mut tables = self.shared.tables.write();
        let Some(t) = tables.get_mut(table) else {
            return 0;
        };
        let before = t.rows.len();
        t.rows.retain(|r| r.get(key_column).and_then(Value::key) != key);
        before - t.rows.len()
    }

    /// All rows of a table, in storage order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.shared.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// Finds a row by the value of one column.
    pub fn find(&self, table: &str, column: &str, value: impl Into<Value>) -> Option<Record> {
        let key = value.into().key();
        self.rows(table)
            .into_iter()
            .find(|r| r.get(column).and_then(Value::key) == key)
    }

    /// Makes the next operation reaching `point` fail with `message`.
    pub fn inject_failure(&self, point: FailPoint, message: impl Into<String>) {
        self.shared.failures.lock().insert(point, message.into());
    }

    /// Makes every operation fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Committed row changes, e.g. `"INSERT orders"`, `"UPDATE orders"`.
    pub fn statements(&self) -> Vec<String> {
        self.shared.statements.lock().clone()
    }

    /// Clears the statement log.
    pub fn clear_statements(&self) {
        self.shared.statements.lock().clear();
    }

    fn log(&self, statement: String) {
        self.shared.statements.lock().push(statement);
    }
}

impl Store for MemoryStore {
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> SyncResult<()> {
        self.shared.check(FailPoint::Connect)
    }

    async fn columns(&self, table: &str) -> SyncResult<Option<Vec<ColumnInfo>>> {
        self.shared.reachable()?;
        Ok(self
            .shared
            .tables
            .read()
            .get(table)
            .map(|t| t.def.columns.clone()))
    }

    async fn primary_key(&self, table: &str) -> SyncResult<Vec<String>> {
        self.shared.reachable()?;
        let tables = self.shared.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;
        Ok(t.def.primary_key.clone())
    }

    async fn fetch(&self, request: &FetchRequest) -> SyncResult<Vec<Record>> {
        self.shared.check(FailPoint::Fetch)?;
        let tables = self.shared.tables.read();
        let t = tables
            .get(&request.table)
            .ok_or_else(|| missing(&request.table))?;
        Ok(t.rows
            .iter()
            .filter(|r| matches_request(r, request))
            .cloned()
            .collect())
    }

    async fn distinct_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        self.shared.reachable()?;
        let tables = self.shared.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;
        let mut seen = HashSet::new();
        Ok(t.rows
            .iter()
            .filter_map(|r| r.get(column))
            .filter(|v| v.key().is_some_and(|k| seen.insert(k)))
            .cloned()
            .collect())
    }

    async fn lookup_pairs(
        &self,
        table: &str,
        match_column: &str,
        select_column: &str,
    ) -> SyncResult<Vec<(Value, Value)>> {
        self.shared.reachable()?;
        let tables = self.shared.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;
        Ok(t.rows
            .iter()
            .filter_map(|r| {
                let m = r.get(match_column).filter(|v| !v.is_null())?;
                Some((m.clone(), r.get(select_column).cloned().unwrap_or(Value::Null)))
            })
            .collect())
    }

    async fn exists(&self, table: &str, key: &[(String, Value)]) -> SyncResult<bool> {
        self.shared.reachable()?;
        let tables = self.shared.tables.read();
        let t = tables.get(table).ok_or_else(|| missing(table))?;
        Ok(t.rows.iter().any(|r| {
            key.iter()
                .all(|(c, v)| v.key().is_some() && r.get(c).and_then(Value::key) == v.key())
        }))
    }

    async fn insert(&self, table: &str, record: &Record) -> SyncResult<()> {
        self.shared.check(FailPoint::Insert)?;
        table_mut(&mut self.shared.tables.write(), table)?.insert(record)?;
        self.log(format!("INSERT {table}"));
        Ok(())
    }

    async fn ensure_metadata_table(&self, table: &str) -> SyncResult<()> {
        self.shared.reachable()?;
        self.shared
            .tables
            .write()
            .entry(table.to_string())
            .or_insert_with(|| MemoryTable::new(TableDef::metadata(table)));
        Ok(())
    }

    async fn seed_watermarks(&self, table: &str, names: &[String]) -> SyncResult<()> {
        self.shared.reachable()?;
        let mut tables = self.shared.tables.write();
        let meta = table_mut(&mut tables, table)?;
        for name in names {
            if meta.position(&[KeyValue::Text(name.clone())]).is_none() {
                meta.insert(&watermark_to_record(&Watermark::bootstrap(name.as_str())))?;
            }
        }
        Ok(())
    }

    async fn read_watermark(&self, table: &str, name: &str) -> SyncResult<Option<Watermark>> {
        self.shared.reachable()?;
        let tables = self.shared.tables.read();
        let Some(meta) = tables.get(table) else {
            return Ok(None);
        };
        Ok(meta
            .position(&[KeyValue::Text(name.to_string())])
            .and_then(|idx| record_to_watermark(&meta.rows[idx])))
    }

    async fn read_watermarks(&self, table: &str) -> SyncResult<Vec<Watermark>> {
        self.shared.reachable()?;
        let tables = self.shared.tables.read();
        let mut all: Vec<_> = tables
            .get(table)
            .map(|meta| meta.rows.iter().filter_map(record_to_watermark).collect())
            .unwrap_or_default();
        all.sort_by(|a: &Watermark, b| a.table_name.cmp(&b.table_name));
        Ok(all)
    }

    async fn write_watermark(&self, table: &str, watermark: &Watermark) -> SyncResult<()> {
        self.shared.reachable()?;
        let mut log = Vec::new();
        upsert_watermark(&mut self.shared.tables.write(), table, watermark, &mut log)?;
        self.shared.statements.lock().extend(log);
        Ok(())
    }

    async fn begin(&self) -> SyncResult<MemoryTransaction> {
        self.shared.check(FailPoint::Connect)?;
        Ok(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            working: self.shared.tables.read().clone(),
            staging: BTreeMap::new(),
            log: Vec::new(),
        })
    }

    async fn close(&self) {}
}

/// A transaction over a [`MemoryStore`].
///
/// Works on a private copy of every table; commit swaps the copy in,
/// drop discards it.
#[derive(Debug)]
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    working: Tables,
    staging: BTreeMap<String, MemoryTable>,
    log: Vec<String>,
}

impl MemoryTransaction {
    fn staged(&self, staging: &StagingTable) -> SyncResult<&MemoryTable> {
        self.staging
            .get(&staging.name)
            .ok_or_else(|| missing(&staging.name))
    }
}

impl StoreTransaction for MemoryTransaction {
    async fn defer_constraints(&mut self) -> SyncResult<()> {
        self.shared.reachable()
    }

    async fn create_staging(&mut self, target: &str) -> SyncResult<StagingTable> {
        self.shared.check(FailPoint::Stage)?;
        let def = &table_mut(&mut self.working, target)?.def;
        let n = self.shared.staging_seq.fetch_add(1, Ordering::SeqCst);
        let name = format!("_dualsync_stage_{target}_{n}");
        let staging = StagingTable {
            name: name.clone(),
            target: target.to_string(),
            columns: def.columns.clone(),
        };
        let mut def = def.clone();
        def.name = name.clone();
        def.primary_key.clear();
        // Staging draws serial values from the target's sequence.
        def.serial = None;
        self.staging.insert(name, MemoryTable::new(def));
        Ok(staging)
    }

    async fn stage_rows(
        &mut self,
        staging: &StagingTable,
        rows: &[Record],
        _batch_size: usize,
    ) -> SyncResult<u64> {
        self.shared.reachable()?;
        let target = table_mut(&mut self.working, &staging.target)?;
        let serial = target.def.serial.clone();
        let stage = self
            .staging
            .get_mut(&staging.name)
            .ok_or_else(|| missing(&staging.name))?;
        for row in rows {
            let mut row = row.clone();
            if let Some(column) = &serial {
                if !row.contains(column) {
                    row.set(column.clone(), target.next_serial);
                    target.next_serial += 1;
                }
            }
            stage.insert(&row)?;
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_from_staging(
        &mut self,
        staging: &StagingTable,
        columns: &[String],
        key: &[String],
        marker_column: Option<&str>,
    ) -> SyncResult<u64> {
        self.shared.check(FailPoint::Apply)?;

        // Last staged row per key wins.
        let mut latest: Vec<(Vec<KeyValue>, Record)> = Vec::new();
        for row in &self.staged(staging)?.rows {
            let k = row.key(key).ok_or_else(|| {
                SyncError::Constraint(format!(
                    "null value in key column of relation \"{}\"",
                    staging.target
                ))
            })?;
            match latest.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = row.clone(),
                None => latest.push((k, row.clone())),
            }
        }

        let target = table_mut(&mut self.working, &staging.target)?;
        let mut affected = 0;
        for (k, row) in latest {
            let projected: Record = columns
                .iter()
                .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                .collect();
            let existing = target
                .rows
                .iter()
                .position(|r| r.key(key).as_deref() == Some(k.as_slice()));
            match existing {
                Some(idx) => {
                    let owned = marker_column
                        .map_or(true, |m| OriginMarker::is_origin_owned(target.rows[idx].get(m)));
                    if !owned {
                        continue;
                    }
                    let mut updated = target.rows[idx].clone();
                    for (c, v) in projected {
                        if !key.contains(&c) {
                            updated.set(c, v);
                        }
                    }
                    target.rows[idx] = target.conform(&updated)?;
                    self.log.push(format!("UPDATE {}", staging.target));
                }
                None => {
                    target.insert(&projected)?;
                    self.log.push(format!("INSERT {}", staging.target));
                }
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_origin_rows(
        &mut self,
        target: &str,
        marker_column: Option<&str>,
    ) -> SyncResult<u64> {
        self.shared.check(FailPoint::Apply)?;
        let t = table_mut(&mut self.working, target)?;
        let before = t.rows.len();
        t.rows.retain(|r| match marker_column {
            Some(m) => !OriginMarker::is_origin_owned(r.get(m)),
            None => false,
        });
        let deleted = before - t.rows.len();
        self.log
            .extend(std::iter::repeat(format!("DELETE {target}")).take(deleted));
        Ok(deleted as u64)
    }

    async fn insert_from_staging(&mut self, staging: &StagingTable) -> SyncResult<u64> {
        self.shared.reachable()?;
        let rows = self.staged(staging)?.rows.clone();
        let target = table_mut(&mut self.working, &staging.target)?;
        for row in &rows {
            target.insert(row)?;
            self.log.push(format!("INSERT {}", staging.target));
        }
        Ok(rows.len() as u64)
    }

    async fn write_watermark(&mut self, table: &str, watermark: &Watermark) -> SyncResult<()> {
        self.shared.reachable()?;
        upsert_watermark(&mut self.working, table, watermark, &mut self.log)
    }

    async fn commit(self) -> SyncResult<()> {
        self.shared.check(FailPoint::Commit)?;
        *self.shared.tables.write() = self.working;
        self.shared.statements.lock().extend(self.log);
        Ok(())
    }

    async fn rollback(self) -> SyncResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualsync_core::record;

    fn lines() -> TableDef {
        TableDef::new("lines")
            .serial("id")
            .required("sku", "character varying(4)")
            .column("origin_marker", "character(1)")
            .primary_key(["id"])
    }

    #[tokio::test]
    async fn enforces_column_constraints() {
        let store = MemoryStore::new("cloud");
        store.create_table(lines());

        store.insert_row("lines", record! { "sku" => "A1" }).unwrap();
        assert_eq!(store.rows("lines")[0].get("id"), Some(&Value::Int(1)));

        let err = store.insert_row("lines", record! { "id" => 1, "sku" => "B" }).unwrap_err();
        assert!(matches!(err, SyncError::Constraint(_)));

        let err = store.insert_row("lines", record! { "sku" => Value::Null }).unwrap_err();
        assert!(matches!(err, SyncError::Constraint(_)));

        assert!(store.insert_row("lines", record! { "sku" => "TOOLONG" }).is_err());
        assert!(store.insert_row("lines", record! { "nope" => 1 }).is_err());
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new("cloud");
        store.create_table(lines());
        store.insert_row("lines", record! { "sku" => "A1", "origin_marker" => "D" }).unwrap();

        {
            let mut txn = store.begin().await.unwrap();
            txn.delete_origin_rows("lines", Some("origin_marker")).await.unwrap();
        }
        assert_eq!(store.row_count("lines"), 1);
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn replace_keeps_cloud_rows() {
        let store = MemoryStore::new("cloud");
        store.create_table(lines());
        store.insert_row("lines", record! { "id" => 100, "sku" => "M1", "origin_marker" => "M" }).unwrap();
        store.insert_row("lines", record! { "sku" => "D1", "origin_marker" => "D" }).unwrap();

        let mut txn = store.begin().await.unwrap();
        let staging = txn.create_staging("lines").await.unwrap();
        txn.stage_rows(&staging, &[record! { "sku" => "D2", "origin_marker" => "D" }], 10)
            .await
            .unwrap();
        assert_eq!(txn.delete_origin_rows("lines", Some("origin_marker")).await.unwrap(), 1);
        assert_eq!(txn.insert_from_staging(&staging).await.unwrap(), 1);
        txn.commit().await.unwrap();

        let rows = store.rows("lines");
        assert_eq!(rows.len(), 2);
        assert!(store.find("lines", "id", 100).is_some());
        assert!(store.find("lines", "sku", "D2").is_some());
        assert_eq!(store.statements(), vec!["DELETE lines", "INSERT lines"]);
    }

    #[tokio::test]
    async fn upsert_skips_cloud_owned_rows() {
        let store = MemoryStore::new("cloud");
        store.create_table(lines());
        store.insert_row("lines", record! { "id" => 1, "sku" => "M1", "origin_marker" => "M" }).unwrap();
        store.insert_row("lines", record! { "id" => 2, "sku" => "D1", "origin_marker" => "D" }).unwrap();

        let mut txn = store.begin().await.unwrap();
        let staging = txn.create_staging("lines").await.unwrap();
        let rows = vec![
            record! { "id" => 1, "sku" => "X1", "origin_marker" => "D" },
            record! { "id" => 2, "sku" => "X2", "origin_marker" => "D" },
            record! { "id" => 2, "sku" => "X3", "origin_marker" => "D" },
            record! { "id" => 3, "sku" => "X4", "origin_marker" => "D" },
        ];
        txn.stage_rows(&staging, &rows, 10).await.unwrap();
        let columns: Vec<String> = ["id", "sku", "origin_marker"].map(String::from).to_vec();
        let key = vec!["id".to_string()];
        let n = txn
            .upsert_from_staging(&staging, &columns, &key, Some("origin_marker"))
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(n, 2);
        assert_eq!(store.find("lines", "id", 1).unwrap().get("sku"), Some(&Value::from("M1")));
        assert_eq!(store.find("lines", "id", 2).unwrap().get("sku"), Some(&Value::from("X3")));
        assert!(store.find("lines", "id", 3).is_some());
    }

    #[tokio::test]
    async fn watermark_writes_never_regress() {
        let store = MemoryStore::new("cloud");
        store.ensure_metadata_table("sync_metadata").await.unwrap();
        store
            .seed_watermarks("sync_metadata", &["orders".to_string()])
            .await
            .unwrap();

        let mut wm = store.read_watermark("sync_metadata", "orders").await.unwrap().unwrap();
        assert_eq!(wm.status, SyncStatus::Pending);

        let later = dualsync_core::epoch() + chrono::Duration::days(10);
        wm.advance(Some(later), 3, later);
        store.write_watermark("sync_metadata", &wm).await.unwrap();

        let mut stale = wm.clone();
        stale.last_sync_timestamp = dualsync_core::epoch();
        store.write_watermark("sync_metadata", &stale).await.unwrap();

        let stored = store.read_watermark("sync_metadata", "orders").await.unwrap().unwrap();
        assert_eq!(stored.last_sync_timestamp, later);
        assert_eq!(stored.records_synced, 3);
        assert!(store.read_watermark("missing", "orders").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let store = MemoryStore::new("origin");
        store.inject_failure(FailPoint::Connect, "refused");
        assert!(matches!(store.ping().await, Err(SyncError::Connection(_))));
        store.ping().await.unwrap();

        store.set_unreachable(true);
        assert!(store.columns("x").await.is_err());
        store.set_unreachable(false);
        assert_eq!(store.columns("x").await.unwrap(), None);
    }
}

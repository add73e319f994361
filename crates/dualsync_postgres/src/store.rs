//! [`Store`] over a `sqlx` PostgreSQL pool.

use crate::config::{ReplicationConfig, StoreConfig};
use crate::error::{is_undefined_table, store_error};
use crate::sql::{self, Statement};
use chrono::NaiveDateTime;
use dualsync_core::{
    ColumnInfo, ColumnType, Record, SyncRegistry, SyncStatus, Value, Watermark,
};
use dualsync_engine::{
    FetchRequest, ReplicationEngine, StagingTable, Store, StoreTransaction, SyncError, SyncResult,
};
use parking_lot::RwLock;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

/// Opens both pools and builds an engine over them.
///
/// The engine still needs [`ReplicationEngine::initialize`].
pub async fn connect(
    config: &ReplicationConfig,
    registry: SyncRegistry,
) -> SyncResult<ReplicationEngine<PgStore, PgStore>> {
    let origin = PgStore::connect("origin", &config.origin).await?;
    let cloud = match PgStore::connect("cloud", &config.cloud).await {
        Ok(cloud) => cloud,
        Err(e) => {
            origin.close().await;
            return Err(e);
        }
    };
    Ok(ReplicationEngine::new(
        config.engine.clone(),
        registry,
        origin,
        cloud,
    ))
}

/// A PostgreSQL store.
///
/// Every operation borrows a connection from the pool for its duration;
/// a transaction holds one until it commits or is dropped.
#[derive(Debug)]
pub struct PgStore {
    name: String,
    pool: PgPool,
    schema: String,
    /// Column types of tables written outside transactions, refreshed by
    /// every catalog read.
    types: RwLock<HashMap<String, Vec<ColumnInfo>>>,
}

impl PgStore {
    /// Connects a pool.
    pub async fn connect(name: impl Into<String>, config: &StoreConfig) -> SyncResult<Self> {
        let name = name.into();
        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await
            .map_err(|e| SyncError::Connection(format!("{name}: {e}")))?;
        info!(
            store = %name,
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "connected"
        );
        Ok(Self::from_pool(name, pool, config.schema.clone()))
    }

    /// Wraps an existing pool.
    pub fn from_pool(name: impl Into<String>, pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool,
            schema: schema.into(),
            types: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Schema holding the replicated tables.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn typed_columns(&self, table: &str) -> SyncResult<Vec<ColumnInfo>> {
        if let Some(columns) = self.types.read().get(table) {
            return Ok(columns.clone());
        }
        self.columns(table)
            .await?
            .ok_or_else(|| SyncError::MissingTable {
                table: table.to_string(),
                store: self.name.clone(),
            })
    }
}

impl Store for PgStore {
    type Transaction = PgTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> SyncResult<()> {
        self.pool
            .execute("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| SyncError::Connection(format!("{}: {e}", self.name)))
    }

    async fn columns(&self, table: &str) -> SyncResult<Option<Vec<ColumnInfo>>> {
        let columns = load_columns(&self.pool, &self.schema, table).await?;
        if columns.is_empty() {
            self.types.write().remove(table);
            return Ok(None);
        }
        self.types
            .write()
            .insert(table.to_string(), columns.clone());
        Ok(Some(columns))
    }

    async fn primary_key(&self, table: &str) -> SyncResult<Vec<String>> {
        let rows = sqlx::query(sql::PRIMARY_KEY)
            .bind(self.schema.clone())
            .bind(table.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<_, _>>()
            .map_err(store_error)
    }

    async fn fetch(&self, request: &FetchRequest) -> SyncResult<Vec<Record>> {
        let columns = self
            .columns(&request.table)
            .await?
            .ok_or_else(|| SyncError::MissingTable {
                table: request.table.clone(),
                store: self.name.clone(),
            })?;
        let stmt = sql::select(&self.schema, request, &columns);
        debug!(store = %self.name, sql = %stmt.sql, "fetch");
        let rows = prepared(&stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(|row| decode_record(row, &columns)).collect()
    }

    async fn distinct_values(&self, table: &str, column: &str) -> SyncResult<Vec<Value>> {
        let query = sql::distinct_values(&self.schema, table, column);
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map(Value::Text))
            .collect::<Result<_, _>>()
            .map_err(store_error)
    }

    async fn lookup_pairs(
        &self,
        table: &str,
        match_column: &str,
        select_column: &str,
    ) -> SyncResult<Vec<(Value, Value)>> {
        let query = sql::lookup_pairs(&self.schema, table, match_column, select_column);
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter()
            .map(|row| {
                let matched: String = row.try_get(0)?;
                let selected: Option<String> = row.try_get(1)?;
                Ok((Value::Text(matched), Value::from(selected)))
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(store_error)
    }

    async fn exists(&self, table: &str, key: &[(String, Value)]) -> SyncResult<bool> {
        let columns = self.typed_columns(table).await?;
        let stmt = sql::exists(&self.schema, table, key, &columns);
        let row = prepared(&stmt)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        row.try_get::<bool, _>(0).map_err(store_error)
    }

    async fn insert(&self, table: &str, record: &Record) -> SyncResult<()> {
        let columns = self.typed_columns(table).await?;
        let stmt = sql::insert(&self.schema, table, record, &columns);
        prepared(&stmt)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn ensure_metadata_table(&self, table: &str) -> SyncResult<()> {
        let ddl = sql::create_metadata_table(&self.schema, table);
        self.pool.execute(ddl.as_str()).await.map_err(store_error)?;
        Ok(())
    }

    async fn seed_watermarks(&self, table: &str, names: &[String]) -> SyncResult<()> {
        if let Some(stmt) = sql::seed_watermarks(&self.schema, table, names) {
            prepared(&stmt)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
        }
        Ok(())
    }

    async fn read_watermark(&self, table: &str, name: &str) -> SyncResult<Option<Watermark>> {
        let query = sql::read_watermark(&self.schema, table);
        let row = match sqlx::query(&query)
            .bind(name.to_string())
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) if is_undefined_table(&e) => return Ok(None),
            Err(e) => return Err(store_error(e)),
        };
        row.as_ref().map(decode_watermark).transpose()
    }

    async fn read_watermarks(&self, table: &str) -> SyncResult<Vec<Watermark>> {
        let query = sql::read_watermarks(&self.schema, table);
        let rows = match sqlx::query(&query).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_undefined_table(&e) => return Ok(Vec::new()),
            Err(e) => return Err(store_error(e)),
        };
        rows.iter().map(decode_watermark).collect()
    }

    async fn write_watermark(&self, table: &str, watermark: &Watermark) -> SyncResult<()> {
        let stmt = sql::write_watermark(&self.schema, table, watermark);
        prepared(&stmt)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn begin(&self) -> SyncResult<PgTransaction> {
        let txn = self.pool.begin().await.map_err(store_error)?;
        Ok(PgTransaction {
            txn,
            store: self.name.clone(),
            schema: self.schema.clone(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(store = %self.name, "pool closed");
    }
}

/// A transaction on one pooled connection.
///
/// Dropping it without [`commit`](StoreTransaction::commit) rolls back
/// and returns the connection to the pool.
pub struct PgTransaction {
    txn: Transaction<'static, Postgres>,
    store: String,
    schema: String,
}

impl fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTransaction")
            .field("store", &self.store)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl PgTransaction {
    async fn run(&mut self, stmt: &Statement) -> SyncResult<u64> {
        debug!(store = %self.store, sql = %stmt.sql, params = stmt.params.len(), "execute");
        let done = prepared(stmt)
            .execute(&mut *self.txn)
            .await
            .map_err(store_error)?;
        Ok(done.rows_affected())
    }

    async fn run_sql(&mut self, query: &str) -> SyncResult<u64> {
        debug!(store = %self.store, sql = %query, "execute");
        let done = sqlx::query(query)
            .execute(&mut *self.txn)
            .await
            .map_err(store_error)?;
        Ok(done.rows_affected())
    }
}

impl StoreTransaction for PgTransaction {
    async fn defer_constraints(&mut self) -> SyncResult<()> {
        self.run_sql(sql::DEFER_CONSTRAINTS).await?;
        Ok(())
    }

    async fn create_staging(&mut self, target: &str) -> SyncResult<StagingTable> {
        let columns = load_columns(&mut *self.txn, &self.schema, target).await?;
        if columns.is_empty() {
            return Err(SyncError::MissingTable {
                table: target.to_string(),
                store: self.store.clone(),
            });
        }
        let name = format!("dualsync_stage_{}", Uuid::new_v4().simple());
        self.run_sql(&sql::create_staging(&self.schema, &name, target))
            .await?;
        Ok(StagingTable {
            name,
            target: target.to_string(),
            columns,
        })
    }

    async fn stage_rows(
        &mut self,
        staging: &StagingTable,
        rows: &[Record],
        batch_size: usize,
    ) -> SyncResult<u64> {
        let chunk = sql::stage_chunk_size(batch_size, staging.columns.len());
        let mut staged = 0;
        for rows in rows.chunks(chunk) {
            if let Some(stmt) = sql::stage_insert(staging, rows) {
                staged += self.run(&stmt).await?;
            }
        }
        Ok(staged)
    }

    async fn upsert_from_staging(
        &mut self,
        staging: &StagingTable,
        columns: &[String],
        key: &[String],
        marker_column: Option<&str>,
    ) -> SyncResult<u64> {
        let query = sql::upsert_from_staging(&self.schema, staging, columns, key, marker_column);
        self.run_sql(&query).await
    }

    async fn delete_origin_rows(
        &mut self,
        target: &str,
        marker_column: Option<&str>,
    ) -> SyncResult<u64> {
        let query = sql::delete_origin_rows(&self.schema, target, marker_column);
        self.run_sql(&query).await
    }

    async fn insert_from_staging(&mut self, staging: &StagingTable) -> SyncResult<u64> {
        let query = sql::insert_from_staging(&self.schema, staging);
        self.run_sql(&query).await
    }

    async fn write_watermark(&mut self, table: &str, watermark: &Watermark) -> SyncResult<()> {
        let stmt = sql::write_watermark(&self.schema, table, watermark);
        self.run(&stmt).await?;
        Ok(())
    }

    async fn commit(self) -> SyncResult<()> {
        self.txn.commit().await.map_err(store_error)
    }

    async fn rollback(self) -> SyncResult<()> {
        self.txn.rollback().await.map_err(store_error)
    }
}

/// Binds a statement's text parameters.
fn prepared(stmt: &Statement) -> Query<'_, Postgres, PgArguments> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |query, param| query.bind(param.clone()))
}

/// Reads a table's columns from the catalog; empty if it does not exist.
async fn load_columns<'e, E>(executor: E, schema: &str, table: &str) -> SyncResult<Vec<ColumnInfo>>
where
    E: Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(sql::COLUMNS)
        .bind(schema.to_string())
        .bind(table.to_string())
        .fetch_all(executor)
        .await
        .map_err(store_error)?;
    rows.iter()
        .map(|row| {
            let name: String = row.try_get(0)?;
            let sql_type: String = row.try_get(1)?;
            let not_null: bool = row.try_get(2)?;
            let has_default: bool = row.try_get(3)?;
            let mut column = ColumnInfo::new(name, sql_type);
            if not_null {
                column = column.not_null();
            }
            if has_default {
                column = column.with_default();
            }
            Ok(column)
        })
        .collect::<Result<_, sqlx::Error>>()
        .map_err(store_error)
}

fn decode_record(row: &PgRow, columns: &[ColumnInfo]) -> SyncResult<Record> {
    let mut record = Record::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let text: Option<String> = row.try_get(idx).map_err(store_error)?;
        let value = Value::from_sql_text(text.as_deref(), &column.ty)?;
        record.set(column.name.clone(), value);
    }
    Ok(record)
}

fn decode_watermark(row: &PgRow) -> SyncResult<Watermark> {
    let table_name: String = row.try_get(0).map_err(store_error)?;
    let last_sync: String = row.try_get(1).map_err(store_error)?;
    let records_synced: i64 = row.try_get(2).map_err(store_error)?;
    let status: String = row.try_get(3).map_err(store_error)?;
    let error_message: Option<String> = row.try_get(4).map_err(store_error)?;
    let updated_at: String = row.try_get(5).map_err(store_error)?;
    Ok(Watermark {
        table_name,
        last_sync_timestamp: parse_timestamp(&last_sync)?,
        records_synced,
        status: SyncStatus::parse(&status),
        error_message,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn parse_timestamp(text: &str) -> SyncResult<NaiveDateTime> {
    let value = Value::from_sql_text(Some(text), &ColumnType::Timestamp)?;
    value
        .as_timestamp()
        .ok_or_else(|| SyncError::store_fatal(format!("invalid watermark timestamp {text:?}")))
}

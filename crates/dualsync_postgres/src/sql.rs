//! SQL text for every store primitive.
//!
//! Values travel as text parameters and are cast to the column's declared
//! type on the server; reads go the other way through `::text`. Every
//! identifier is quoted.

use dualsync_core::{find_column, ColumnInfo, ColumnType, Record, Value, Watermark};
use dualsync_engine::{FetchRequest, StagingTable};

/// Columns of one table, in declaration order.
pub const COLUMNS: &str = "\
SELECT a.attname::text, format_type(a.atttypid, a.atttypmod), a.attnotnull, a.atthasdef \
FROM pg_catalog.pg_attribute a \
JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p') \
AND a.attnum > 0 AND NOT a.attisdropped \
ORDER BY a.attnum";

/// Primary key columns of one table, in key order.
pub const PRIMARY_KEY: &str = "\
SELECT a.attname::text \
FROM pg_catalog.pg_index i \
JOIN pg_catalog.pg_class c ON c.oid = i.indrelid \
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey) \
WHERE i.indisprimary AND n.nspname = $1 AND c.relname = $2 \
ORDER BY array_position(i.indkey::int2[], a.attnum)";

/// Defers deferrable constraints until commit.
pub const DEFER_CONSTRAINTS: &str = "SET CONSTRAINTS ALL DEFERRED";

/// Bind parameters never exceed this count per statement.
pub const MAX_PARAMS: usize = 65_535;

/// SQL text plus its positional text parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Values for `$1..$n`, NULL as `None`.
    pub params: Vec<Option<String>>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter and returns its placeholder with a cast.
    fn bind(&mut self, value: Option<String>, sql_type: &str) -> String {
        self.params.push(value);
        format!("${}::{}", self.params.len(), sql_type)
    }
}

/// Quotes an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read expression for one column, yielding text in the format
/// [`Value::from_sql_text`] parses.
fn text_expr(column: &ColumnInfo) -> String {
    let ident = quote_ident(&column.name);
    match column.ty {
        ColumnType::TimestampTz => format!("({ident} AT TIME ZONE 'UTC')::text"),
        _ => format!("{ident}::text"),
    }
}

fn cast_type<'a>(columns: &'a [ColumnInfo], name: &str) -> &'a str {
    find_column(columns, name).map_or("text", |c| c.sql_type.as_str())
}

/// Reads the columns named in `columns` according to `request`.
pub fn select(schema: &str, request: &FetchRequest, columns: &[ColumnInfo]) -> Statement {
    let mut stmt = Statement::new();
    let reads = columns.iter().map(text_expr).collect::<Vec<_>>().join(", ");
    let mut filters = Vec::new();
    if let Some(since) = &request.since {
        let after = Value::Timestamp(since.after).to_sql_text();
        let placeholder = stmt.bind(after, "timestamp");
        filters.push(format!("{} > {placeholder}", quote_ident(&since.column)));
    }
    if let Some(marker) = &request.marker {
        let placeholder = stmt.bind(Some(marker.marker.as_str().to_string()), "text");
        filters.push(format!("TRIM({}) = {placeholder}", quote_ident(&marker.column)));
    }

    stmt.sql = format!("SELECT {reads} FROM {}", qualified(schema, &request.table));
    if !filters.is_empty() {
        stmt.sql.push_str(" WHERE ");
        stmt.sql.push_str(&filters.join(" AND "));
    }
    if let Some(since) = &request.since {
        stmt.sql.push_str(&format!(" ORDER BY {}", quote_ident(&since.column)));
    }
    stmt
}

/// Distinct non-NULL values of one column, as text.
pub fn distinct_values(schema: &str, table: &str, column: &str) -> String {
    let column = quote_ident(column);
    format!(
        "SELECT DISTINCT {column}::text FROM {} WHERE {column} IS NOT NULL",
        qualified(schema, table)
    )
}

/// `(match, select)` pairs for a lookup, as text.
pub fn lookup_pairs(schema: &str, table: &str, match_column: &str, select_column: &str) -> String {
    let match_column = quote_ident(match_column);
    format!(
        "SELECT {match_column}::text, {}::text FROM {} WHERE {match_column} IS NOT NULL",
        quote_ident(select_column),
        qualified(schema, table)
    )
}

/// Whether a row with the given key exists.
pub fn exists(
    schema: &str,
    table: &str,
    key: &[(String, Value)],
    columns: &[ColumnInfo],
) -> Statement {
    let mut stmt = Statement::new();
    let predicates: Vec<_> = key
        .iter()
        .map(|(column, value)| {
            let placeholder = stmt.bind(value.to_sql_text(), cast_type(columns, column));
            format!("{} = {placeholder}", quote_ident(column))
        })
        .collect();
    stmt.sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {})",
        qualified(schema, table),
        predicates.join(" AND ")
    );
    stmt
}

/// Inserts one record.
pub fn insert(schema: &str, table: &str, record: &Record, columns: &[ColumnInfo]) -> Statement {
    let mut stmt = Statement::new();
    let names: Vec<_> = record.columns().collect();
    let values: Vec<_> = record
        .iter()
        .map(|(column, value)| stmt.bind(value.to_sql_text(), cast_type(columns, column)))
        .collect();
    stmt.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        qualified(schema, table),
        column_list(&names),
        values.join(", ")
    );
    stmt
}

/// A session-local staging clone of `target`, dropped at commit.
///
/// Keeps column defaults so omitted serial columns draw from the target's
/// sequence; copies no keys, indexes or checks.
pub fn create_staging(schema: &str, staging: &str, target: &str) -> String {
    format!(
        "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
        quote_ident(staging),
        qualified(schema, target)
    )
}

/// Rows per staging insert for `column_count` columns, within the bind
/// parameter limit.
pub fn stage_chunk_size(batch_size: usize, column_count: usize) -> usize {
    let by_params = MAX_PARAMS / column_count.max(1);
    batch_size.clamp(1, by_params.max(1))
}

/// A multi-row insert into a staging table.
///
/// Only columns some row carries are listed; a row lacking one of them
/// gets `DEFAULT`. Returns `None` for an empty chunk.
pub fn stage_insert(staging: &StagingTable, rows: &[Record]) -> Option<Statement> {
    let columns: Vec<&ColumnInfo> = staging
        .columns
        .iter()
        .filter(|c| rows.iter().any(|r| r.contains(&c.name)))
        .collect();
    if columns.is_empty() {
        return None;
    }

    let mut stmt = Statement::new();
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| match row.get(&c.name) {
                    Some(value) => stmt.bind(value.to_sql_text(), &c.sql_type),
                    None => "DEFAULT".to_string(),
                })
                .collect();
            format!("({})", cells.join(", "))
        })
        .collect();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    stmt.sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(&staging.name),
        column_list(&names),
        tuples.join(", ")
    );
    Some(stmt)
}

/// Upserts staged rows into the target.
///
/// Staged rows are deduplicated by key, keeping the one staged last. With
/// a marker column, conflicting rows not authored by the origin are left
/// alone.
pub fn upsert_from_staging(
    schema: &str,
    staging: &StagingTable,
    columns: &[String],
    key: &[String],
    marker_column: Option<&str>,
) -> String {
    let cols = column_list(columns);
    let keys = column_list(key);
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !key.contains(c))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect();

    let mut sql = format!(
        "INSERT INTO {} AS t ({cols}) \
         SELECT {cols} FROM (\
         SELECT DISTINCT ON ({keys}) * FROM {} ORDER BY {keys}, ctid DESC\
         ) AS s ON CONFLICT ({keys}) ",
        qualified(schema, &staging.target),
        quote_ident(&staging.name)
    );
    if updates.is_empty() {
        sql.push_str("DO NOTHING");
        return sql;
    }
    sql.push_str("DO UPDATE SET ");
    sql.push_str(&updates.join(", "));
    if let Some(marker) = marker_column {
        let marker = quote_ident(marker);
        sql.push_str(&format!(" WHERE t.{marker} = 'D' OR t.{marker} IS NULL"));
    }
    sql
}

/// Deletes origin-authored rows, or every row without a marker column.
pub fn delete_origin_rows(schema: &str, target: &str, marker_column: Option<&str>) -> String {
    let table = qualified(schema, target);
    match marker_column {
        Some(marker) => {
            let marker = quote_ident(marker);
            format!("DELETE FROM {table} WHERE {marker} = 'D' OR {marker} IS NULL")
        }
        None => format!("DELETE FROM {table}"),
    }
}

/// Copies every staged row into the target.
pub fn insert_from_staging(schema: &str, staging: &StagingTable) -> String {
    let names: Vec<&str> = staging.columns.iter().map(|c| c.name.as_str()).collect();
    let cols = column_list(&names);
    format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
        qualified(schema, &staging.target),
        quote_ident(&staging.name)
    )
}

/// Creates a watermark table.
pub fn create_metadata_table(schema: &str, table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         table_name varchar(255) PRIMARY KEY, \
         last_sync_timestamp timestamp NOT NULL DEFAULT '1970-01-01 00:00:00', \
         records_synced bigint NOT NULL DEFAULT 0, \
         sync_status varchar(20) NOT NULL DEFAULT 'pending', \
         error_message text, \
         updated_at timestamp NOT NULL DEFAULT (now() AT TIME ZONE 'UTC'))",
        qualified(schema, table)
    )
}

/// Inserts a default row for every name that has none.
pub fn seed_watermarks(schema: &str, table: &str, names: &[String]) -> Option<Statement> {
    if names.is_empty() {
        return None;
    }
    let mut stmt = Statement::new();
    let values: Vec<String> = names
        .iter()
        .map(|name| format!("({})", stmt.bind(Some(name.clone()), "text")))
        .collect();
    stmt.sql = format!(
        "INSERT INTO {} (table_name) VALUES {} ON CONFLICT (table_name) DO NOTHING",
        qualified(schema, table),
        values.join(", ")
    );
    Some(stmt)
}

const WATERMARK_COLUMNS: &str = "table_name, last_sync_timestamp::text, records_synced, \
     sync_status, error_message, updated_at::text";

/// Reads one watermark row.
pub fn read_watermark(schema: &str, table: &str) -> String {
    format!(
        "SELECT {WATERMARK_COLUMNS} FROM {} WHERE table_name = $1",
        qualified(schema, table)
    )
}

/// Reads every watermark row, ordered by name.
pub fn read_watermarks(schema: &str, table: &str) -> String {
    format!(
        "SELECT {WATERMARK_COLUMNS} FROM {} ORDER BY table_name",
        qualified(schema, table)
    )
}

/// Upserts a watermark row. The stored timestamp never decreases.
pub fn write_watermark(schema: &str, table: &str, watermark: &Watermark) -> Statement {
    let mut stmt = Statement::new();
    let values = [
        stmt.bind(Some(watermark.table_name.clone()), "text"),
        stmt.bind(
            Value::Timestamp(watermark.last_sync_timestamp).to_sql_text(),
            "timestamp",
        ),
        stmt.bind(Some(watermark.records_synced.to_string()), "bigint"),
        stmt.bind(Some(watermark.status.as_str().to_string()), "text"),
        stmt.bind(watermark.error_message.clone(), "text"),
        stmt.bind(Value::Timestamp(watermark.updated_at).to_sql_text(), "timestamp"),
    ];
    stmt.sql = format!(
        "INSERT INTO {} AS m \
         (table_name, last_sync_timestamp, records_synced, sync_status, error_message, updated_at) \
         VALUES ({}) ON CONFLICT (table_name) DO UPDATE SET \
         last_sync_timestamp = GREATEST(m.last_sync_timestamp, EXCLUDED.last_sync_timestamp), \
         records_synced = EXCLUDED.records_synced, \
         sync_status = EXCLUDED.sync_status, \
         error_message = EXCLUDED.error_message, \
         updated_at = EXCLUDED.updated_at",
        qualified(schema, table),
        values.join(", ")
    );
    stmt
}

//! Column metadata as reported by a store catalog.

use serde::{Deserialize, Serialize};

/// Logical type of a column, derived from the catalog's formatted type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// `smallint`, `integer`, `bigint`.
    Integer,
    /// `real`, `double precision`.
    Float,
    /// `numeric(p, s)`; kept textual to avoid precision loss.
    Numeric,
    /// `boolean`.
    Boolean,
    /// `text`, `character varying(n)`, `character(n)`.
    Text {
        /// Declared maximum length in characters, if any.
        max_len: Option<usize>,
    },
    /// `date`.
    Date,
    /// `time without time zone`.
    Time,
    /// `timestamp without time zone`.
    Timestamp,
    /// `timestamp with time zone` (read and written as UTC).
    TimestampTz,
    /// `bytea`.
    Bytes,
    /// Anything else; values travel as text.
    Other(String),
}

impl ColumnType {
    /// Parses the output of PostgreSQL's `format_type()`.
    pub fn from_pg(formatted: &str) -> Self {
        let ty = formatted.trim().to_ascii_lowercase();
        match ty.as_str() {
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => ColumnType::Integer,
            "real" | "double precision" | "float4" | "float8" => ColumnType::Float,
            "boolean" | "bool" => ColumnType::Boolean,
            "text" | "character varying" | "varchar" | "name" => ColumnType::Text { max_len: None },
            "date" => ColumnType::Date,
            "bytea" => ColumnType::Bytes,
            _ => Self::from_pg_parameterised(&ty),
        }
    }

    fn from_pg_parameterised(ty: &str) -> Self {
        if ty.starts_with("numeric") || ty.starts_with("decimal") {
            return ColumnType::Numeric;
        }
        if let Some(rest) = ty
            .strip_prefix("character varying")
            .or_else(|| ty.strip_prefix("varchar"))
            .or_else(|| ty.strip_prefix("character"))
            .or_else(|| ty.strip_prefix("bpchar"))
        {
            return ColumnType::Text {
                max_len: parse_length(rest),
            };
        }
        if ty.starts_with("timestamp") {
            return if ty.ends_with("with time zone") || ty == "timestamptz" {
                ColumnType::TimestampTz
            } else {
                ColumnType::Timestamp
            };
        }
        if ty.starts_with("time") {
            return ColumnType::Time;
        }
        ColumnType::Other(ty.to_string())
    }

    /// Returns true for timestamp-like types usable as a mutation cursor.
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date | ColumnType::Timestamp | ColumnType::TimestampTz
        )
    }

    /// Declared character limit for text columns.
    pub fn max_len(&self) -> Option<usize> {
        match self {
            ColumnType::Text { max_len } => *max_len,
            _ => None,
        }
    }
}

fn parse_length(rest: &str) -> Option<usize> {
    let inner = rest.trim().strip_prefix('(')?.strip_suffix(')')?;
    inner.trim().parse().ok()
}

/// A column of a store table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Exact SQL type name, used for casts when binding values.
    pub sql_type: String,
    /// Parsed logical type.
    pub ty: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the column has a default expression (e.g. a sequence).
    pub has_default: bool,
}

impl ColumnInfo {
    /// Builds column info from a PostgreSQL type name.
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        let sql_type = sql_type.into();
        Self {
            name: name.into(),
            ty: ColumnType::from_pg(&sql_type),
            sql_type,
            nullable: true,
            has_default: false,
        }
    }

    /// Marks the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Marks the column as having a default.
    #[must_use]
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// Finds a column by name.
pub fn find_column<'a>(columns: &'a [ColumnInfo], name: &str) -> Option<&'a ColumnInfo> {
    columns.iter().find(|c| c.name == name)
}

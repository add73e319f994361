//! Sync descriptors: the static, per-table replication rules.
//!
//! Descriptors are closed, tagged types. Unknown fields or rule kinds are
//! rejected when the document is parsed, and [`SyncRegistry`] validates the
//! cross-field invariants, so a malformed rule fails at startup instead of
//! silently doing nothing.
//!
//! [`SyncRegistry`]: crate::SyncRegistry

use crate::error::ConfigError;
use crate::fk::FkRule;
use crate::value::Value;
use serde::Deserialize;
use std::collections::HashSet;

/// How a table is replicated forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Reference data: always extracted in full and fully replaced.
    Reference,
    /// Transactional data: extracted incrementally where possible.
    Transactional,
}

/// Whether a table's primary key survives from one run to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PkReliability {
    /// Keys are stable; rows can be upserted by key.
    #[default]
    Stable,
    /// Keys are regenerated; origin-authored rows are deleted and reinserted.
    Unstable,
}

/// Value of a column added during transformation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum AddValue {
    /// A constant.
    Static {
        /// The constant value.
        value: Value,
    },
    /// The transformation timestamp.
    Now,
    /// The transformation date.
    Today,
}

/// A column added to every transformed row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddColumn {
    /// Column name in the target.
    pub name: String,
    /// How the value is produced.
    pub value: AddValue,
}

/// A derived column populated through a join against another table.
///
/// For each row, `record[source_column]` is matched against
/// `from_table.match_column` and `from_table.select_column` is written to
/// `target_column`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupRule {
    /// Column written on the transformed row.
    pub target_column: String,
    /// Table providing the values (read from the origin store).
    pub from_table: String,
    /// Column of `from_table` matched against the row.
    pub match_column: String,
    /// Column of `from_table` copied into `target_column`.
    pub select_column: String,
    /// Row column holding the match value; defaults to `match_column`.
    #[serde(default)]
    pub source_column: Option<String>,
}

impl LookupRule {
    /// Creates a lookup rule.
    pub fn new(
        target_column: impl Into<String>,
        from_table: impl Into<String>,
        match_column: impl Into<String>,
        select_column: impl Into<String>,
    ) -> Self {
        Self {
            target_column: target_column.into(),
            from_table: from_table.into(),
            match_column: match_column.into(),
            select_column: select_column.into(),
            source_column: None,
        }
    }

    /// Sets the row column used for matching.
    #[must_use]
    pub fn from_column(mut self, column: impl Into<String>) -> Self {
        self.source_column = Some(column.into());
        self
    }

    /// Row column used for matching.
    pub fn source_column(&self) -> &str {
        self.source_column.as_deref().unwrap_or(&self.match_column)
    }
}

/// Forward replication rules for one logical table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncDescriptor {
    /// Logical name; also the key of the table's watermark.
    pub name: String,
    /// Table read from the origin store.
    pub source_table: String,
    /// Table written in the cloud store; defaults to `source_table`.
    #[serde(default)]
    pub target_table: Option<String>,
    /// Reference or transactional.
    pub classification: Classification,
    /// Primary key reliability.
    #[serde(default)]
    pub pk_reliability: PkReliability,
    /// Target key columns; discovered from the target catalog when empty.
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Mutation timestamp column; the engine default applies when unset.
    #[serde(default)]
    pub timestamp_column: Option<String>,
    /// Columns removed before writing.
    #[serde(default)]
    pub skip_columns: Vec<String>,
    /// Columns added before writing.
    #[serde(default)]
    pub add_columns: Vec<AddColumn>,
    /// Derived-column lookups.
    #[serde(default)]
    pub lookups: Vec<LookupRule>,
    /// Reference checks applied before writing.
    #[serde(default)]
    pub foreign_keys: Vec<FkRule>,
}

impl SyncDescriptor {
    fn new(name: impl Into<String>, classification: Classification) -> Self {
        let name = name.into();
        Self {
            source_table: name.clone(),
            name,
            target_table: None,
            classification,
            pk_reliability: PkReliability::Stable,
            primary_key: Vec::new(),
            timestamp_column: None,
            skip_columns: Vec::new(),
            add_columns: Vec::new(),
            lookups: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Creates a reference-table descriptor reading and writing `name`.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::new(name, Classification::Reference)
    }

    /// Creates a transactional-table descriptor reading and writing `name`.
    pub fn transactional(name: impl Into<String>) -> Self {
        Self::new(name, Classification::Transactional)
    }

    /// Sets the origin table.
    #[must_use]
    pub fn source(mut self, table: impl Into<String>) -> Self {
        self.source_table = table.into();
        self
    }

    /// Sets the cloud table.
    #[must_use]
    pub fn with_target(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }

    /// Marks the primary key as unstable.
    #[must_use]
    pub fn unstable_pk(mut self) -> Self {
        self.pk_reliability = PkReliability::Unstable;
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the mutation timestamp column.
    #[must_use]
    pub fn timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    /// Adds a column to skip.
    #[must_use]
    pub fn skip(mut self, column: impl Into<String>) -> Self {
        self.skip_columns.push(column.into());
        self
    }

    /// Adds a column with a constant value.
    #[must_use]
    pub fn add_static(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_columns.push(AddColumn {
            name: column.into(),
            value: AddValue::Static {
                value: value.into(),
            },
        });
        self
    }

    /// Adds a column holding the transformation timestamp.
    #[must_use]
    pub fn add_now(mut self, column: impl Into<String>) -> Self {
        self.add_columns.push(AddColumn {
            name: column.into(),
            value: AddValue::Now,
        });
        self
    }

    /// Adds a lookup rule.
    #[must_use]
    pub fn lookup(mut self, rule: LookupRule) -> Self {
        self.lookups.push(rule);
        self
    }

    /// Adds a foreign-key rule.
    #[must_use]
    pub fn foreign_key(mut self, rule: FkRule) -> Self {
        self.foreign_keys.push(rule);
        self
    }

    /// The cloud table name.
    pub fn target(&self) -> &str {
        self.target_table.as_deref().unwrap_or(&self.source_table)
    }

    /// True if every run must extract the whole source table.
    ///
    /// Unstable-key tables are reconciled destructively, so a partial batch
    /// would delete every row it did not contain.
    pub fn requires_full_extract(&self) -> bool {
        self.classification == Classification::Reference
            || self.pk_reliability == PkReliability::Unstable
    }

    /// Checks the descriptor's internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let empty = |field| ConfigError::EmptyField {
            table: self.name.clone(),
            field,
        };
        if self.name.trim().is_empty() {
            return Err(empty("name"));
        }
        if self.source_table.trim().is_empty() {
            return Err(empty("source_table"));
        }
        if self.target_table.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(empty("target_table"));
        }
        if self.timestamp_column.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(empty("timestamp_column"));
        }

        let mut added = HashSet::new();
        for column in &self.add_columns {
            if column.name.trim().is_empty() {
                return Err(empty("add_columns.name"));
            }
            if !added.insert(column.name.as_str()) {
                return Err(self.duplicate(&column.name));
            }
        }
        for rule in &self.lookups {
            if [
                &rule.target_column,
                &rule.from_table,
                &rule.match_column,
                &rule.select_column,
            ]
            .iter()
            .any(|f| f.trim().is_empty())
            {
                return Err(empty("lookups"));
            }
            if !added.insert(rule.target_column.as_str()) {
                return Err(self.duplicate(&rule.target_column));
            }
        }
        if let Some(col) = self.skip_columns.iter().find(|c| added.contains(c.as_str())) {
            return Err(ConfigError::Invalid {
                table: self.name.clone(),
                message: format!("column '{col}' is both skipped and produced"),
            });
        }
        for rule in &self.foreign_keys {
            rule.validate(&self.name)?;
        }
        Ok(())
    }

    fn duplicate(&self, column: &str) -> ConfigError {
        ConfigError::DuplicateColumn {
            table: self.name.clone(),
            column: column.to_string(),
        }
    }
}

/// A schema coercion applied to reverse-synced rows.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Coercion {
    /// Widens a time-of-day column to a timestamp using a date column.
    CombineDateTime {
        /// Column holding the time (overwritten with the timestamp).
        time_column: String,
        /// Column holding the date.
        date_column: String,
    },
    /// Truncates a text column to a fixed number of characters.
    Truncate {
        /// Column to truncate.
        column: String,
        /// Maximum characters kept.
        max_len: usize,
    },
}

/// Reverse replication rules for one mobile-originated table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReverseDescriptor {
    /// Logical name; also the key of the table's reverse watermark.
    pub name: String,
    /// Table read from the cloud store.
    pub cloud_table: String,
    /// Table written in the origin store; defaults to `cloud_table`.
    #[serde(default)]
    pub origin_table: Option<String>,
    /// Key used for the existence check at the origin.
    pub primary_key: Vec<String>,
    /// Mutation timestamp column; the engine default applies when unset.
    #[serde(default)]
    pub timestamp_column: Option<String>,
    /// Cloud-only columns never written to the origin.
    #[serde(default)]
    pub drop_columns: Vec<String>,
    /// Type coercions, applied in order.
    #[serde(default)]
    pub coercions: Vec<Coercion>,
}

impl ReverseDescriptor {
    /// Creates a reverse descriptor for `name` keyed by `primary_key`.
    pub fn new<I, S>(name: impl Into<String>, primary_key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        Self {
            cloud_table: name.clone(),
            name,
            origin_table: None,
            primary_key: primary_key.into_iter().map(Into::into).collect(),
            timestamp_column: None,
            drop_columns: Vec::new(),
            coercions: Vec::new(),
        }
    }

    /// Sets the origin table.
    #[must_use]
    pub fn origin(mut self, table: impl Into<String>) -> Self {
        self.origin_table = Some(table.into());
        self
    }

    /// Sets the mutation timestamp column.
    #[must_use]
    pub fn timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    /// Adds a column that is never written to the origin.
    #[must_use]
    pub fn drop_column(mut self, column: impl Into<String>) -> Self {
        self.drop_columns.push(column.into());
        self
    }

    /// Adds a coercion.
    #[must_use]
    pub fn coerce(mut self, coercion: Coercion) -> Self {
        self.coercions.push(coercion);
        self
    }

    /// The origin table name.
    pub fn origin_table(&self) -> &str {
        self.origin_table.as_deref().unwrap_or(&self.cloud_table)
    }

    /// Checks the descriptor's internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let empty = |field| ConfigError::EmptyField {
            table: self.name.clone(),
            field,
        };
        if self.name.trim().is_empty() {
            return Err(empty("name"));
        }
        if self.cloud_table.trim().is_empty() {
            return Err(empty("cloud_table"));
        }
        if self.primary_key.is_empty() || self.primary_key.iter().any(|c| c.trim().is_empty()) {
            return Err(empty("primary_key"));
        }
        if let Some(col) = self.primary_key.iter().find(|c| self.drop_columns.contains(c)) {
            return Err(ConfigError::Invalid {
                table: self.name.clone(),
                message: format!("key column '{col}' cannot be dropped"),
            });
        }
        for coercion in &self.coercions {
            match coercion {
                Coercion::CombineDateTime {
                    time_column,
                    date_column,
                } => {
                    if time_column.trim().is_empty() || date_column.trim().is_empty() {
                        return Err(empty("coercions"));
                    }
                }
                Coercion::Truncate { column, max_len } => {
                    if column.trim().is_empty() {
                        return Err(empty("coercions"));
                    }
                    if *max_len == 0 {
                        return Err(ConfigError::Invalid {
                            table: self.name.clone(),
                            message: format!("truncation of '{column}' to zero characters"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

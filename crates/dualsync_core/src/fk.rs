//! Foreign-key validation cache.
//!
//! The origin store enforces no foreign keys, so every candidate row is
//! checked against in-memory sets of valid parent keys loaded from the cloud
//! store before it is written. Rows that fail are dropped for the run and
//! reported; they never abort a batch and are never retried.
//!
//! The cache is a plain value. Loading and reloading happen in the engine,
//! which threads the cache through a run explicitly: after a reference table
//! is written, the sets that reference it are reloaded before any dependent
//! table is validated.

use crate::error::ConfigError;
use crate::record::Record;
use crate::value::{KeyValue, Value};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A reference check on one column of a table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FkRule {
    /// Column of the checked table.
    pub column: String,
    /// Referenced table in the cloud store.
    pub reference_table: String,
    /// Referenced column.
    pub reference_column: String,
    /// Sentinel values meaning "unassigned" (NULL is always exempt).
    #[serde(default)]
    pub exempt_values: Vec<Value>,
}

impl FkRule {
    /// Creates a rule with no exempt sentinels.
    pub fn new(
        column: impl Into<String>,
        reference_table: impl Into<String>,
        reference_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            reference_table: reference_table.into(),
            reference_column: reference_column.into(),
            exempt_values: Vec::new(),
        }
    }

    /// Declares an exempt sentinel value.
    #[must_use]
    pub fn exempt(mut self, value: impl Into<Value>) -> Self {
        self.exempt_values.push(value.into());
        self
    }

    /// True if `value` is automatically valid.
    pub fn is_exempt(&self, value: &Value) -> bool {
        let Some(key) = value.key() else {
            return true;
        };
        self.exempt_values.iter().any(|v| v.key().as_ref() == Some(&key))
    }

    /// The referenced `(table, column)` pair.
    pub fn reference(&self) -> ReferenceKey {
        ReferenceKey {
            table: self.reference_table.clone(),
            column: self.reference_column.clone(),
        }
    }

    pub(crate) fn validate(&self, table: &str) -> Result<(), ConfigError> {
        if [&self.column, &self.reference_table, &self.reference_column]
            .iter()
            .any(|f| f.trim().is_empty())
        {
            return Err(ConfigError::EmptyField {
                table: table.to_string(),
                field: "foreign_keys",
            });
        }
        Ok(())
    }
}

/// A referenced `(table, column)` pair whose values form a key set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceKey {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
}

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FkValidation {
    /// True if every rule passed.
    pub valid: bool,
    /// One entry per failed rule.
    pub reasons: Vec<String>,
}

/// A record excluded from a batch, with the reasons.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// The excluded record.
    pub record: Record,
    /// Why it was excluded.
    pub reasons: Vec<String>,
}

/// A batch partitioned by [`FkValidationCache::filter`].
#[derive(Debug, Clone, Default)]
pub struct FkFilterOutcome {
    /// Records that passed every rule.
    pub valid: Vec<Record>,
    /// Records that failed at least one rule.
    pub invalid: Vec<RejectedRow>,
}

/// In-memory sets of valid parent keys, with the rules that use them.
#[derive(Debug, Clone, Default)]
pub struct FkValidationCache {
    rules: HashMap<String, Vec<FkRule>>,
    keys: HashMap<ReferenceKey, HashSet<KeyValue>>,
}

impl FkValidationCache {
    /// Creates an empty cache with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches rules to a table. Tables without rules are unchecked.
    #[must_use]
    pub fn with_rules(mut self, table: impl Into<String>, rules: Vec<FkRule>) -> Self {
        if !rules.is_empty() {
            self.rules.entry(table.into()).or_default().extend(rules);
        }
        self
    }

    /// All referenced `(table, column)` pairs, sorted.
    pub fn references(&self) -> Vec<ReferenceKey> {
        self.rules
            .values()
            .flatten()
            .map(FkRule::reference)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Referenced pairs that live in `table`.
    pub fn references_to(&self, table: &str) -> Vec<ReferenceKey> {
        self.references()
            .into_iter()
            .filter(|r| r.table == table)
            .collect()
    }

    /// True if any rule references `table`.
    pub fn depends_on(&self, table: &str) -> bool {
        self.rules
            .values()
            .flatten()
            .any(|r| r.reference_table == table)
    }

    /// Rules attached to `table`.
    pub fn rules_for(&self, table: &str) -> &[FkRule] {
        self.rules.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces the key set of a referenced pair.
    pub fn set_keys<I>(&mut self, reference: ReferenceKey, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let set = values.into_iter().filter_map(|v| v.key()).collect();
        self.keys.insert(reference, set);
    }

    /// Number of keys loaded for a referenced pair.
    pub fn key_count(&self, reference: &ReferenceKey) -> Option<usize> {
        self.keys.get(reference).map(HashSet::len)
    }

    /// Adds a single key to a loaded set.
    pub fn insert_key(&mut self, reference: &ReferenceKey, value: &Value) {
        if let (Some(set), Some(key)) = (self.keys.get_mut(reference), value.key()) {
            set.insert(key);
        }
    }

    /// Checks every rule attached to `table` against `record`.
    pub fn validate(&self, table: &str, record: &Record) -> FkValidation {
        let mut reasons = Vec::new();
        for rule in self.rules_for(table) {
            let value = record.get(&rule.column).unwrap_or(&Value::Null);
            if rule.is_exempt(value) {
                continue;
            }
            let reference = rule.reference();
            match (self.keys.get(&reference), value.key()) {
                (Some(set), Some(key)) if set.contains(&key) => {}
                (Some(_), _) => reasons.push(format!(
                    "{}={} has no match in {}.{}",
                    rule.column, value, rule.reference_table, rule.reference_column
                )),
                (None, _) => reasons.push(format!(
                    "{}: keys of {}.{} are not loaded",
                    rule.column, rule.reference_table, rule.reference_column
                )),
            }
        }
        FkValidation {
            valid: reasons.is_empty(),
            reasons,
        }
    }

    /// Partitions a batch into valid and invalid records.
    pub fn filter(&self, table: &str, records: Vec<Record>) -> FkFilterOutcome {
        if self.rules_for(table).is_empty() {
            return FkFilterOutcome {
                valid: records,
                invalid: Vec::new(),
            };
        }
        let mut outcome = FkFilterOutcome::default();
        for record in records {
            let check = self.validate(table, &record);
            if check.valid {
                outcome.valid.push(record);
            } else {
                outcome.invalid.push(RejectedRow {
                    record,
                    reasons: check.reasons,
                });
            }
        }
        outcome
    }
}

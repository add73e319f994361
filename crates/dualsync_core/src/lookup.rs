//! Lookup cache for derived columns.
//!
//! A lookup rule fills a column through a join against another table. The
//! joined table is materialised once per table per run and resolved from
//! memory for every row.

use crate::descriptor::LookupRule;
use crate::record::Record;
use crate::value::{KeyValue, Value};
use std::collections::HashMap;

/// Materialised lookup tables for one descriptor.
#[derive(Debug, Clone, Default)]
pub struct LookupCache {
    entries: Vec<(LookupRule, HashMap<KeyValue, Value>)>,
}

impl LookupCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule with its `(match, select)` pairs.
    ///
    /// When the joined table holds duplicate match values, the first one wins.
    pub fn insert<I>(&mut self, rule: LookupRule, pairs: I)
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        let mut map = HashMap::new();
        for (key, value) in pairs {
            if let Some(key) = key.key() {
                map.entry(key).or_insert(value);
            }
        }
        self.entries.push((rule, map));
    }

    /// Number of materialised rules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no rule is materialised.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fills every lookup column of `record`.
    ///
    /// Unmatched lookups are written as NULL. Returns the number of misses;
    /// a NULL source value is not a miss.
    pub fn resolve(&self, record: &mut Record) -> usize {
        let mut misses = 0;
        for (rule, map) in &self.entries {
            let source = record.get(rule.source_column()).and_then(Value::key);
            let value = match source {
                Some(key) => match map.get(&key) {
                    Some(v) => v.clone(),
                    None => {
                        misses += 1;
                        Value::Null
                    }
                },
                None => Value::Null,
            };
            record.set(rule.target_column.clone(), value);
        }
        misses
    }
}

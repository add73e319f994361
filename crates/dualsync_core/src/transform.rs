//! Forward row transformation.
//!
//! Order of application:
//! 1. skip columns
//! 2. add columns
//! 3. lookups
//! 4. projection onto the target's column set
//! 5. origin marker stamp

use crate::descriptor::{AddValue, SyncDescriptor};
use crate::lookup::LookupCache;
use crate::marker::OriginMarker;
use crate::record::Record;
use crate::schema::ColumnInfo;
use crate::value::Value;
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashSet};

/// Result of transforming a batch.
#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    /// Transformed records, in extraction order.
    pub records: Vec<Record>,
    /// Source columns dropped because the target has no such column.
    pub dropped_columns: BTreeSet<String>,
    /// Lookups that found no match.
    pub lookup_misses: usize,
}

/// Applies one descriptor's column rules to extracted rows.
#[derive(Debug)]
pub struct Transformer<'a> {
    descriptor: &'a SyncDescriptor,
    lookups: &'a LookupCache,
    target_columns: Option<HashSet<&'a str>>,
    marker_column: Option<&'a str>,
    now: NaiveDateTime,
}

impl<'a> Transformer<'a> {
    /// Creates a transformer; `now` is used for `now`/`today` columns.
    pub fn new(descriptor: &'a SyncDescriptor, lookups: &'a LookupCache, now: NaiveDateTime) -> Self {
        Self {
            descriptor,
            lookups,
            target_columns: None,
            marker_column: None,
            now,
        }
    }

    /// Drops every column the target does not have.
    #[must_use]
    pub fn project_onto(mut self, columns: &'a [ColumnInfo]) -> Self {
        self.target_columns = Some(columns.iter().map(|c| c.name.as_str()).collect());
        self
    }

    /// Stamps the origin marker into `column`.
    #[must_use]
    pub fn stamp_marker(mut self, column: &'a str) -> Self {
        self.marker_column = Some(column);
        self
    }

    /// Transforms a single record.
    pub fn apply(&self, mut record: Record, dropped: &mut BTreeSet<String>) -> (Record, usize) {
        let skip = &self.descriptor.skip_columns;
        if !skip.is_empty() {
            record.retain(|c| !skip.iter().any(|s| s == c));
        }

        for column in &self.descriptor.add_columns {
            let value = match &column.value {
                AddValue::Static { value } => value.clone(),
                AddValue::Now => Value::Timestamp(self.now),
                AddValue::Today => Value::Date(self.now.date()),
            };
            record.set(column.name.clone(), value);
        }

        let misses = self.lookups.resolve(&mut record);

        if let Some(target) = &self.target_columns {
            record.retain(|c| {
                let keep = target.contains(c);
                if !keep && !dropped.contains(c) {
                    dropped.insert(c.to_string());
                }
                keep
            });
        }

        if let Some(marker) = self.marker_column {
            record.set(marker, OriginMarker::Origin.value());
        }

        (record, misses)
    }

    /// Transforms a batch.
    pub fn transform(&self, records: Vec<Record>) -> TransformOutcome {
        let mut outcome = TransformOutcome {
            records: Vec::with_capacity(records.len()),
            ..TransformOutcome::default()
        };
        for record in records {
            let (record, misses) = self.apply(record, &mut outcome.dropped_columns);
            outcome.lookup_misses += misses;
            outcome.records.push(record);
        }
        outcome
    }
}

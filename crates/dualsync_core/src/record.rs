//! Ordered column/value rows.

use crate::value::{KeyValue, Value};

/// An ordered mapping of column name to value.
///
/// A record has no identity beyond its column values. Column order follows
/// extraction order and is preserved through transformation so that staged
/// inserts line up with the source schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty record with room for `capacity` columns.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builds a record from column/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Self::new();
        for (k, v) in pairs {
            record.set(k, v);
        }
        record
    }

    /// Returns the value of a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Returns true if the column is present (even if NULL).
    pub fn contains(&self, column: &str) -> bool {
        self.fields.iter().any(|(c, _)| c == column)
    }

    /// Sets a column, replacing the value in place or appending it.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Removes a column and returns its value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(c, _)| c == column)?;
        Some(self.fields.remove(idx).1)
    }

    /// Keeps only the columns for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.fields.retain(|(c, _)| keep(c));
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    /// Iterates over `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the normalised key formed by `columns`.
    ///
    /// `None` if any key column is missing or NULL.
    pub fn key(&self, columns: &[String]) -> Option<Vec<KeyValue>> {
        columns
            .iter()
            .map(|c| self.get(c).and_then(Value::key))
            .collect()
    }

    /// Returns the `(column, value)` pairs for `columns`, or `None` if any is
    /// missing or NULL.
    pub fn key_values(&self, columns: &[String]) -> Option<Vec<(String, Value)>> {
        columns
            .iter()
            .map(|c| match self.get(c) {
                Some(v) if !v.is_null() => Some((c.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Builds a [`Record`] from `column => value` pairs.
///
/// ```
/// use dualsync_core::{record, Value};
///
/// let row = record! { "id" => 7, "name" => "Ada" };
/// assert_eq!(row.get("id"), Some(&Value::Int(7)));
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::Record::new() };
    ($($column:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::Record::new();
        $( record.set($column, $value); )+
        record
    }};
}

//! Dynamic column values.

use crate::error::{CoreError, CoreResult};
use crate::schema::ColumnType;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer};
use std::fmt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// A single scalar column value.
///
/// Values are produced by extraction and carried through transformation
/// untouched unless a rule rewrites them. Both stores are PostgreSQL, so the
/// set mirrors the scalar types the replicated schemas actually use.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (any integer column width).
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Arbitrary precision decimal, kept in its textual form.
    Numeric(String),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Timestamp without time zone.
    Timestamp(NaiveDateTime),
}

/// Normalised, hashable form of a value used for key comparisons.
///
/// The origin store declares no foreign keys, so a child column may be text
/// while its parent is an integer. `"12"`, `12` and `12.0` all normalise to
/// `KeyValue::Int(12)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    /// Integral key.
    Int(i64),
    /// Any other key, trimmed.
    Text(String),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Numeric(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a point in time.
    ///
    /// Dates are taken at midnight.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    /// Get this value as a date.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }
    }

    /// Get this value as a time of day.
    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            Value::Time(t) => Some(*t),
            Value::Text(s) => NaiveTime::parse_from_str(s.trim(), TIME_FORMAT).ok(),
            _ => None,
        }
    }

    /// Returns the normalised key form, or `None` for NULL.
    pub fn key(&self) -> Option<KeyValue> {
        match self {
            Value::Null => None,
            Value::Int(n) => Some(KeyValue::Int(*n)),
            Value::Bool(b) => Some(KeyValue::Int(i64::from(*b))),
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some(KeyValue::Int(*f as i64))
                } else {
                    Some(KeyValue::Text(f.to_string()))
                }
            }
            Value::Numeric(s) | Value::Text(s) => Some(text_key(s)),
            Value::Bytes(b) => Some(KeyValue::Text(hex_encode(b))),
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) => {
                self.to_sql_text().map(KeyValue::Text)
            }
        }
    }

    /// Renders the value in PostgreSQL's text input format.
    ///
    /// Returns `None` for NULL. Values are bound as text and cast to the
    /// column's declared type on the server side.
    pub fn to_sql_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(f) if f.is_nan() => Some("NaN".to_string()),
            Value::Float(f) if f.is_infinite() => {
                let text = if *f > 0.0 { "Infinity" } else { "-Infinity" };
                Some(text.to_string())
            }
            Value::Float(f) => Some(f.to_string()),
            Value::Numeric(s) | Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(format!("\\x{}", hex_encode(b))),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            Value::Time(t) => Some(t.format(TIME_FORMAT).to_string()),
            Value::Timestamp(ts) => Some(ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    /// Parses a value from its PostgreSQL text output for the given type.
    pub fn from_sql_text(text: Option<&str>, ty: &ColumnType) -> CoreResult<Value> {
        let Some(text) = text else {
            return Ok(Value::Null);
        };
        let parse_err = || CoreError::ValueParse {
            column_type: format!("{ty:?}"),
            text: text.to_string(),
        };
        let value = match ty {
            ColumnType::Integer => Value::Int(text.trim().parse().map_err(|_| parse_err())?),
            ColumnType::Float => Value::Float(text.trim().parse().map_err(|_| parse_err())?),
            ColumnType::Numeric => Value::Numeric(text.trim().to_string()),
            ColumnType::Boolean => match text.trim() {
                "t" | "true" | "TRUE" | "1" => Value::Bool(true),
                "f" | "false" | "FALSE" | "0" => Value::Bool(false),
                _ => return Err(parse_err()),
            },
            ColumnType::Date => Value::Date(
                NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).map_err(|_| parse_err())?,
            ),
            ColumnType::Time => Value::Time(
                NaiveTime::parse_from_str(text.trim(), TIME_FORMAT).map_err(|_| parse_err())?,
            ),
            ColumnType::Timestamp | ColumnType::TimestampTz => Value::Timestamp(
                NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
                    .map_err(|_| parse_err())?,
            ),
            ColumnType::Bytes => {
                let hex = text.strip_prefix("\\x").ok_or_else(parse_err)?;
                Value::Bytes(hex_decode(hex).ok_or_else(parse_err)?)
            }
            ColumnType::Text { .. } | ColumnType::Other(_) => Value::Text(text.to_string()),
        };
        Ok(value)
    }
}

fn text_key(s: &str) -> KeyValue {
    let trimmed = s.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return KeyValue::Int(n);
    }
    // "12.000" from a numeric column
    if let Some((int_part, frac)) = trimmed.split_once('.') {
        if !frac.is_empty() && frac.bytes().all(|b| b == b'0') {
            if let Ok(n) = int_part.parse::<i64>() {
                return KeyValue::Int(n);
            }
        }
    }
    KeyValue::Text(trimmed.to_string())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_sql_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(n) => write!(f, "{n}"),
            KeyValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| D::Error::custom(format!("unsupported number {n}"))),
            },
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            other => Err(D::Error::custom(format!(
                "expected a scalar value, found {other}"
            ))),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveTime> for Value {
    fn from(t: NaiveTime) -> Self {
        Value::Time(t)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn key_normalisation() {
        assert_eq!(Value::Int(12).key(), Some(KeyValue::Int(12)));
        assert_eq!(Value::Text(" 12 ".into()).key(), Some(KeyValue::Int(12)));
        assert_eq!(Value::Numeric("12.000".into()).key(), Some(KeyValue::Int(12)));
        assert_eq!(Value::Float(12.0).key(), Some(KeyValue::Int(12)));
        assert_eq!(
            Value::Numeric("12.5".into()).key(),
            Some(KeyValue::Text("12.5".into()))
        );
        assert_eq!(
            Value::Text("ABC  ".into()).key(),
            Some(KeyValue::Text("ABC".into()))
        );
        assert_eq!(Value::Null.key(), None);
    }

    #[test]
    fn sql_text_rendering() {
        assert_eq!(Value::Null.to_sql_text(), None);
        assert_eq!(Value::Bool(true).to_sql_text().as_deref(), Some("true"));
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).to_sql_text().as_deref(), Some("\\xdead"));
        assert_eq!(
            Value::Timestamp(ts("2024-03-01 08:30:00")).to_sql_text().as_deref(),
            Some("2024-03-01 08:30:00")
        );
        assert_eq!(
            Value::Float(f64::INFINITY).to_sql_text().as_deref(),
            Some("Infinity")
        );
    }

    #[test]
    fn parse_from_sql_text() {
        assert_eq!(
            Value::from_sql_text(Some("42"), &ColumnType::Integer).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            Value::from_sql_text(Some("t"), &ColumnType::Boolean).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from_sql_text(Some("2024-03-01 08:30:00.25"), &ColumnType::Timestamp).unwrap(),
            Value::Timestamp(ts("2024-03-01 08:30:00.25"))
        );
        assert_eq!(
            Value::from_sql_text(Some("\\x0aff"), &ColumnType::Bytes).unwrap(),
            Value::Bytes(vec![0x0a, 0xff])
        );
        assert_eq!(
            Value::from_sql_text(None, &ColumnType::Integer).unwrap(),
            Value::Null
        );
        assert!(Value::from_sql_text(Some("abc"), &ColumnType::Integer).is_err());
    }

    #[test]
    fn timestamp_roundtrips_through_text() {
        let original = Value::Timestamp(ts("2023-12-31 23:59:59.123456"));
        let text = original.to_sql_text().unwrap();
        let parsed = Value::from_sql_text(Some(&text), &ColumnType::Timestamp).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn deserializes_scalars_only() {
        let v: Value = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(v, Value::Text("x".into()));
        let v: Value = serde_json::from_str("0").unwrap();
        assert_eq!(v, Value::Int(0));
        let v: Value = serde_json::from_str("null").unwrap();
        assert_eq!(v, Value::Null);
        assert!(serde_json::from_str::<Value>("[1]").is_err());
    }

    #[test]
    fn from_impls() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i64), Value::Int(42));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(()), Value::Null);
    }
}

//! Reverse row projection onto the origin schema.

use crate::descriptor::{Coercion, ReverseDescriptor};
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::schema::{ColumnInfo, ColumnType};
use crate::value::Value;

/// Projects cloud rows onto an origin table's column set.
#[derive(Debug)]
pub struct ReverseProjector<'a> {
    descriptor: &'a ReverseDescriptor,
    origin_columns: &'a [ColumnInfo],
    marker_column: &'a str,
}

impl<'a> ReverseProjector<'a> {
    /// Creates a projector for one descriptor and origin schema.
    pub fn new(
        descriptor: &'a ReverseDescriptor,
        origin_columns: &'a [ColumnInfo],
        marker_column: &'a str,
    ) -> Self {
        Self {
            descriptor,
            origin_columns,
            marker_column,
        }
    }

    /// Produces the row to insert at the origin.
    ///
    /// Errors are row-level: the caller excludes the row and moves on.
    pub fn project(&self, record: &Record) -> CoreResult<Record> {
        let mut row = record.clone();

        for coercion in &self.descriptor.coercions {
            match coercion {
                Coercion::CombineDateTime {
                    time_column,
                    date_column,
                } => combine_date_time(&mut row, time_column, date_column)?,
                Coercion::Truncate { column, max_len } => {
                    if let Some(Value::Text(s)) = row.get(column) {
                        if let Some(cut) = truncate(s, *max_len) {
                            row.set(column.clone(), cut);
                        }
                    }
                }
            }
        }

        let drop = &self.descriptor.drop_columns;
        row.retain(|c| {
            c != self.marker_column
                && !drop.iter().any(|d| d == c)
                && self.origin_columns.iter().any(|o| o.name == c)
        });

        let mut out = Record::with_capacity(row.len());
        for (name, value) in row {
            let value = match self.origin_columns.iter().find(|o| o.name == name) {
                Some(column) => fit_to_column(value, column)?,
                None => value,
            };
            out.set(name, value);
        }
        Ok(out)
    }
}

fn combine_date_time(row: &mut Record, time_column: &str, date_column: &str) -> CoreResult<()> {
    let time = match row.get(time_column) {
        None | Some(Value::Null) | Some(Value::Timestamp(_)) => return Ok(()),
        Some(v) => v
            .as_time()
            .ok_or_else(|| CoreError::coercion(time_column, format!("{v} is not a time")))?,
    };
    let date = row
        .get(date_column)
        .and_then(Value::as_date)
        .ok_or_else(|| CoreError::coercion(date_column, "no date to combine with time"))?;
    row.set(time_column, Value::Timestamp(date.and_time(time)));
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> Option<String> {
    (s.chars().count() > max_len).then(|| s.chars().take(max_len).collect())
}

fn fit_to_column(value: Value, column: &ColumnInfo) -> CoreResult<Value> {
    match (&column.ty, value) {
        (ColumnType::Text { max_len: Some(n) }, Value::Text(s)) => {
            Ok(Value::Text(truncate(&s, *n).unwrap_or(s)))
        }
        (ColumnType::Timestamp | ColumnType::TimestampTz, Value::Time(_)) => Err(
            CoreError::coercion(&column.name, "time value needs a date to fit a timestamp"),
        ),
        (ColumnType::Date, Value::Timestamp(ts)) => Ok(Value::Date(ts.date())),
        (_, v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use chrono::{NaiveDate, NaiveTime};

    fn origin_schema() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo::new("visit_id", "integer"),
            ColumnInfo::new("visit_date", "date"),
            ColumnInfo::new("visit_time", "timestamp without time zone"),
            ColumnInfo::new("notes", "character varying(5)"),
        ]
    }

    fn descriptor() -> ReverseDescriptor {
        ReverseDescriptor::new("visits", ["visit_id"])
            .drop_column("device_id")
            .coerce(Coercion::CombineDateTime {
                time_column: "visit_time".into(),
                date_column: "visit_date".into(),
            })
    }

    #[test]
    fn projects_combines_and_truncates() {
        let schema = origin_schema();
        let desc = descriptor();
        let p = ReverseProjector::new(&desc, &schema, "origin_marker");

        let date = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let time = NaiveTime::from_hms_opt(14, 30, 0).unwrap();
        let row = record! {
            "visit_id" => 7,
            "visit_date" => date,
            "visit_time" => time,
            "notes" => "héllo world",
            "device_id" => "abc",
            "origin_marker" => "M",
            "cloud_only" => 1,
        };
        let out = p.project(&row).unwrap();

        assert_eq!(
            out.columns().collect::<Vec<_>>(),
            vec!["visit_id", "visit_date", "visit_time", "notes"]
        );
        assert_eq!(out.get("visit_time"), Some(&Value::Timestamp(date.and_time(time))));
        assert_eq!(out.get("notes"), Some(&Value::from("héllo")));
    }

    #[test]
    fn missing_date_rejects_row() {
        let schema = origin_schema();
        let desc = descriptor();
        let p = ReverseProjector::new(&desc, &schema, "origin_marker");
        let row = record! {
            "visit_id" => 7,
            "visit_time" => NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        };
        let err = p.project(&row).unwrap_err();
        assert!(err.to_string().contains("visit_date"));
    }

    #[test]
    fn explicit_truncation() {
        let schema = vec![ColumnInfo::new("code", "text")];
        let desc = ReverseDescriptor::new("codes", ["code"]).coerce(Coercion::Truncate {
            column: "code".into(),
            max_len: 3,
        });
        let p = ReverseProjector::new(&desc, &schema, "origin_marker");
        let out = p.project(&record! { "code" => "ABCDEF" }).unwrap();
        assert_eq!(out.get("code"), Some(&Value::from("ABC")));
    }
}

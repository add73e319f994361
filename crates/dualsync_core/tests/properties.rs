//! Property and file-loading tests for the core types.

use chrono::{Duration, NaiveDateTime};
use dualsync_core::{
    epoch, record, FkRule, FkValidationCache, KeyValue, Record, ReferenceKey, SyncRegistry, Value,
    Watermark,
};
use proptest::prelude::*;
use std::io::Write;

fn at(secs: i64) -> NaiveDateTime {
    epoch() + Duration::seconds(secs)
}

proptest! {
    #[test]
    fn integer_keys_normalise_across_representations(n in -1_000_000i64..1_000_000) {
        let expected = Some(KeyValue::Int(n));
        prop_assert_eq!(Value::Int(n).key(), expected.clone());
        prop_assert_eq!(Value::Text(n.to_string()).key(), expected.clone());
        prop_assert_eq!(Value::Text(format!(" {n} ")).key(), expected.clone());
        prop_assert_eq!(Value::Float(n as f64).key(), expected);
    }

    #[test]
    fn watermark_is_monotonic(batches in prop::collection::vec(prop::option::of(0i64..10_000_000), 1..20)) {
        let mut wm = Watermark::bootstrap("t");
        let mut previous = wm.last_sync_timestamp;
        for (i, observed) in batches.iter().enumerate() {
            wm.advance(observed.map(at), 1, at(i as i64));
            prop_assert!(wm.last_sync_timestamp >= previous);
            previous = wm.last_sync_timestamp;
        }
        let max = batches.iter().flatten().max().map(|s| at(*s)).unwrap_or_else(epoch);
        prop_assert_eq!(wm.last_sync_timestamp, max);
    }

    #[test]
    fn fk_filter_partitions_without_loss(
        parents in prop::collection::hash_set(1i64..50, 0..20),
        children in prop::collection::vec(prop::option::of(1i64..60), 0..40),
    ) {
        let mut cache = FkValidationCache::new()
            .with_rules("child", vec![FkRule::new("parent_id", "parent", "id")]);
        cache.set_keys(
            ReferenceKey { table: "parent".into(), column: "id".into() },
            parents.iter().map(|p| Value::Int(*p)),
        );

        let batch: Vec<Record> = children
            .iter()
            .enumerate()
            .map(|(i, p)| record! { "n" => i as i64, "parent_id" => *p })
            .collect();
        let outcome = cache.filter("child", batch);

        let expected_valid = children
            .iter()
            .filter(|p| p.map_or(true, |p| parents.contains(&p)))
            .count();
        prop_assert_eq!(outcome.valid.len(), expected_valid);
        prop_assert_eq!(outcome.valid.len() + outcome.invalid.len(), children.len());
        for rejected in &outcome.invalid {
            prop_assert!(!rejected.reasons.is_empty());
        }
    }
}

#[test]
fn registry_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "tables": [
                {{"name": "units", "source_table": "units", "classification": "reference"}}
            ],
            "reverse_tables": []
        }}"#
    )
    .unwrap();

    let registry = SyncRegistry::from_json_file(file.path()).unwrap();
    assert_eq!(registry.forward_names(), vec!["units".to_string()]);
}

#[test]
fn registry_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = SyncRegistry::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("cannot read"));
}

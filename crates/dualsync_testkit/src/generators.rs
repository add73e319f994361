//! Property-based test generators using proptest.
//!
//! Strategies produce rows that fit the sample schema in
//! [`fixtures`](crate::fixtures).

use crate::fixtures::{at, order};
use chrono::NaiveDateTime;
use dualsync_core::{Record, Value};
use proptest::prelude::*;

/// Strategy for mutation timestamps within the first ~115 days of 2024.
pub fn timestamp_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (0i64..10_000_000).prop_map(at)
}

/// Strategy for origin markers as stored: `"D"`, `"M"` or NULL.
pub fn marker_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::from("D")),
        Just(Value::from("M")),
        Just(Value::Null),
    ]
}

/// Strategy for integer keys in any of the representations a key column
/// may arrive in.
pub fn key_value_strategy() -> impl Strategy<Value = (i64, Value)> {
    (-100_000i64..100_000).prop_flat_map(|n| {
        prop_oneof![
            Just((n, Value::Int(n))),
            Just((n, Value::Text(n.to_string()))),
            Just((n, Value::Text(format!("  {n}")))),
            Just((n, Value::Float(n as f64))),
        ]
    })
}

/// Strategy for a money amount in `numeric(12,2)` text form.
pub fn amount_strategy() -> impl Strategy<Value = String> {
    (0u32..1_000_000, 0u32..100).prop_map(|(units, cents)| format!("{units}.{cents:02}"))
}

/// Strategy for a batch of origin `orders` rows with distinct ids, each
/// referencing customer 1 or 2.
pub fn orders_strategy(max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_map(
        100i64..10_000,
        (1i64..=2, amount_strategy(), timestamp_strategy()),
        0..max,
    )
    .prop_map(|orders| {
        orders
            .into_iter()
            .map(|(id, (customer_id, total, updated_at))| {
                order(id, customer_id, &total, updated_at)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_orders_have_unique_ids(rows in orders_strategy(20)) {
            let mut ids: Vec<_> = rows.iter().filter_map(|r| r.get("id").and_then(Value::as_int)).collect();
            let n = ids.len();
            ids.dedup();
            prop_assert_eq!(ids.len(), n);
            prop_assert_eq!(n, rows.len());
        }

        #[test]
        fn key_representations_normalise(pair in key_value_strategy()) {
            let (n, value) = pair;
            prop_assert_eq!(value.key(), Value::Int(n).key());
        }
    }
}

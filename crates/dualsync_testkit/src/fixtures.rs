//! Test fixtures: a sample schema on both sides, its registry, and row
//! builders.
//!
//! The sample models a small ordering system. `units` is reference data,
//! `customers` and `orders` have stable keys, `order_lines` has keys the
//! origin regenerates, and `visits` is recorded by the mobile client and
//! flows back to the origin.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use dualsync_core::{
    record, Coercion, FkRule, LookupRule, Record, ReverseDescriptor, SyncDescriptor, SyncRegistry,
    Value,
};
use dualsync_engine::{EngineConfig, MemoryStore, ReplicationEngine, TableDef};
use std::sync::Once;

/// Installs a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `2024-01-01 00:00:00` plus `secs` seconds.
pub fn at(secs: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid base timestamp")
        + Duration::seconds(secs)
}

/// The registry for the sample schema.
pub fn sample_registry() -> SyncRegistry {
    SyncRegistry::new(sample_descriptors(), sample_reverse_descriptors())
        .expect("sample registry is valid")
}

/// Forward descriptors for the sample schema, in declaration order.
pub fn sample_descriptors() -> Vec<SyncDescriptor> {
    vec![
        SyncDescriptor::transactional("customers").primary_key(["id"]),
        SyncDescriptor::transactional("orders")
            .primary_key(["id"])
            .add_now("synced_at")
            .lookup(
                LookupRule::new("customer_name", "customers", "id", "name")
                    .from_column("customer_id"),
            )
            .foreign_key(FkRule::new("customer_id", "customers", "id")),
        SyncDescriptor::transactional("order_lines")
            .unstable_pk()
            .skip("line_no")
            .foreign_key(FkRule::new("order_id", "orders", "id").exempt(0))
            .foreign_key(FkRule::new("unit_code", "units", "code")),
        SyncDescriptor::reference("units").primary_key(["code"]),
    ]
}

/// Reverse descriptors for the sample schema.
pub fn sample_reverse_descriptors() -> Vec<ReverseDescriptor> {
    vec![ReverseDescriptor::new("visits", ["visit_id"])
        .drop_column("device_id")
        .coerce(Coercion::CombineDateTime {
            time_column: "visit_time".into(),
            date_column: "visit_date".into(),
        })]
}

/// Origin and cloud stores carrying the sample schema.
#[derive(Debug, Clone)]
pub struct Replica {
    /// The origin store.
    pub origin: MemoryStore,
    /// The cloud store.
    pub cloud: MemoryStore,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    /// Creates both stores with empty sample tables.
    pub fn new() -> Self {
        let origin = MemoryStore::new("origin");
        let cloud = MemoryStore::new("cloud");
        for def in origin_tables() {
            origin.create_table(def);
        }
        for def in cloud_tables() {
            cloud.create_table(def);
        }
        Self { origin, cloud }
    }

    /// Creates both stores and loads a baseline data set into the origin.
    ///
    /// Two units, two customers, two orders and three order lines, all
    /// stamped between `at(0)` and `at(60)`.
    pub fn seeded() -> Self {
        let replica = Self::new();
        let rows = [
            ("units", unit("kg", "Kilogram", at(0))),
            ("units", unit("pc", "Piece", at(0))),
            ("customers", customer(1, "Acme", at(10))),
            ("customers", customer(2, "Globex", at(20))),
            ("orders", order(10, 1, "120.50", at(30))),
            ("orders", order(11, 2, "80.00", at(40))),
            ("order_lines", line(1, 10, "BOLT", 4, "pc", at(50))),
            ("order_lines", line(2, 10, "WIRE", 2, "kg", at(50))),
            ("order_lines", line(3, 11, "NUT", 9, "pc", at(60))),
        ];
        for (table, row) in rows {
            replica
                .origin
                .insert_row(table, row)
                .expect("baseline row fits the sample schema");
        }
        replica
    }

    /// An engine over clones of both stores and the sample registry.
    pub fn engine(&self, config: EngineConfig) -> ReplicationEngine<MemoryStore, MemoryStore> {
        ReplicationEngine::new(
            config,
            sample_registry(),
            self.origin.clone(),
            self.cloud.clone(),
        )
    }
}

/// Origin-side table definitions.
pub fn origin_tables() -> Vec<TableDef> {
    vec![
        TableDef::new("units")
            .required("code", "character varying(8)")
            .column("label", "character varying(40)")
            .column("updated_at", "timestamp without time zone")
            .primary_key(["code"]),
        TableDef::new("customers")
            .required("id", "integer")
            .column("name", "text")
            .column("updated_at", "timestamp without time zone")
            .primary_key(["id"]),
        TableDef::new("orders")
            .required("id", "integer")
            .column("customer_id", "integer")
            .column("total", "numeric(12,2)")
            .column("status", "character varying(10)")
            .column("updated_at", "timestamp without time zone")
            .primary_key(["id"]),
        TableDef::new("order_lines")
            .required("line_no", "integer")
            .column("order_id", "integer")
            .column("sku", "character varying(16)")
            .column("qty", "integer")
            .column("unit_code", "character varying(8)")
            .column("updated_at", "timestamp without time zone")
            .primary_key(["line_no"]),
        TableDef::new("visits")
            .required("visit_id", "text")
            .column("customer_id", "integer")
            .column("visit_time", "timestamp without time zone")
            .column("notes", "character varying(20)")
            .primary_key(["visit_id"]),
    ]
}

/// Cloud-side table definitions.
pub fn cloud_tables() -> Vec<TableDef> {
    vec![
        TableDef::new("units")
            .required("code", "character varying(8)")
            .column("label", "character varying(40)")
            .column("updated_at", "timestamp without time zone")
            .primary_key(["code"]),
        TableDef::new("customers")
            .required("id", "integer")
            .column("name", "text")
            .column("updated_at", "timestamp without time zone")
            .column("origin_marker", "character(1)")
            .primary_key(["id"]),
        TableDef::new("orders")
            .required("id", "integer")
            .column("customer_id", "integer")
            .column("customer_name", "text")
            .column("total", "numeric(12,2)")
            .column("status", "character varying(10)")
            .column("synced_at", "timestamp without time zone")
            .column("updated_at", "timestamp without time zone")
            .column("origin_marker", "character(1)")
            .primary_key(["id"]),
        TableDef::new("order_lines")
            .serial("id")
            .column("order_id", "integer")
            .column("sku", "character varying(16)")
            .column("qty", "integer")
            .column("unit_code", "character varying(8)")
            .column("updated_at", "timestamp without time zone")
            .column("origin_marker", "character(1)")
            .primary_key(["id"]),
        TableDef::new("visits")
            .required("visit_id", "text")
            .column("customer_id", "integer")
            .column("visit_time", "time without time zone")
            .column("visit_date", "date")
            .column("notes", "text")
            .column("device_id", "text")
            .column("updated_at", "timestamp without time zone")
            .column("origin_marker", "character(1)")
            .primary_key(["visit_id"]),
    ]
}

/// An origin `units` row.
pub fn unit(code: &str, label: &str, updated_at: NaiveDateTime) -> Record {
    record! { "code" => code, "label" => label, "updated_at" => updated_at }
}

/// An origin `customers` row.
pub fn customer(id: i64, name: &str, updated_at: NaiveDateTime) -> Record {
    record! { "id" => id, "name" => name, "updated_at" => updated_at }
}

/// An open origin `orders` row.
pub fn order(id: i64, customer_id: i64, total: &str, updated_at: NaiveDateTime) -> Record {
    record! {
        "id" => id,
        "customer_id" => customer_id,
        "total" => Value::Numeric(total.to_string()),
        "status" => "open",
        "updated_at" => updated_at,
    }
}

/// An origin `order_lines` row.
pub fn line(
    line_no: i64,
    order_id: i64,
    sku: &str,
    qty: i64,
    unit_code: &str,
    updated_at: NaiveDateTime,
) -> Record {
    record! {
        "line_no" => line_no,
        "order_id" => order_id,
        "sku" => sku,
        "qty" => qty,
        "unit_code" => unit_code,
        "updated_at" => updated_at,
    }
}

/// A cloud `visits` row recorded by the mobile client at 09:30 on the day
/// of `updated_at`.
pub fn mobile_visit(id: &str, customer_id: i64, notes: &str, updated_at: NaiveDateTime) -> Record {
    record! {
        "visit_id" => id,
        "customer_id" => customer_id,
        "visit_time" => NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"),
        "visit_date" => updated_at.date(),
        "notes" => notes,
        "device_id" => "tablet-7",
        "updated_at" => updated_at,
        "origin_marker" => "M",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_replica_has_baseline_rows() {
        let replica = Replica::seeded();
        assert_eq!(replica.origin.row_count("order_lines"), 3);
        assert_eq!(replica.cloud.row_count("orders"), 0);
        assert!(replica.cloud.has_table("visits"));
    }

    #[test]
    fn sample_registry_orders_reference_tables_first() {
        let registry = sample_registry();
        let order: Vec<_> = registry.ordered().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(order, vec!["units", "customers", "orders", "order_lines"]);
        assert!(registry.reverse("visits").is_some());
    }

    #[test]
    fn timestamps_offset_from_base() {
        assert_eq!(at(90) - at(0), Duration::seconds(90));
    }
}

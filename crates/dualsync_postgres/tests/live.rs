//! Tests against live PostgreSQL servers.
//!
//! Set `DUALSYNC_TEST_ORIGIN_URL` and `DUALSYNC_TEST_CLOUD_URL` to run them
//! (both may point at the same database). Each test works in a schema of
//! its own and drops it afterwards. Without the variables every test
//! returns early.

use dualsync_core::{Direction, SyncStatus, Watermark};
use dualsync_engine::{ReplicationEngine, Store, StoreTransaction, SyncMode};
use dualsync_postgres::PgStore;
use dualsync_testkit::prelude::*;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

const ORIGIN_DDL: &str = "
CREATE TABLE {s}.units (code varchar(8) PRIMARY KEY, label varchar(40), updated_at timestamp);
CREATE TABLE {s}.customers (id integer PRIMARY KEY, name text, updated_at timestamp);
CREATE TABLE {s}.orders (
    id integer PRIMARY KEY, customer_id integer, total numeric(12,2),
    status varchar(10), updated_at timestamp);
CREATE TABLE {s}.order_lines (
    line_no integer PRIMARY KEY, order_id integer, sku varchar(16), qty integer,
    unit_code varchar(8), updated_at timestamp);
CREATE TABLE {s}.visits (
    visit_id text PRIMARY KEY, customer_id integer, visit_time timestamp,
    notes varchar(20));
";

const CLOUD_DDL: &str = "
CREATE TABLE {s}.units (code varchar(8) PRIMARY KEY, label varchar(40), updated_at timestamp);
CREATE TABLE {s}.customers (
    id integer PRIMARY KEY, name text, updated_at timestamp, origin_marker char(1));
CREATE TABLE {s}.orders (
    id integer PRIMARY KEY, customer_id integer, customer_name text, total numeric(12,2),
    status varchar(10), synced_at timestamp, updated_at timestamp, origin_marker char(1));
CREATE TABLE {s}.order_lines (
    id serial PRIMARY KEY, order_id integer, sku varchar(16), qty integer,
    unit_code varchar(8), updated_at timestamp, origin_marker char(1));
CREATE TABLE {s}.visits (
    visit_id text PRIMARY KEY, customer_id integer, visit_time time, visit_date date,
    notes text, device_id text, updated_at timestamp, origin_marker char(1));
";

/// Both pools and a throwaway schema on each side.
struct Sandbox {
    schema: String,
    origin: PgPool,
    cloud: PgPool,
}

impl Sandbox {
    async fn open() -> Option<Self> {
        let origin_url = std::env::var("DUALSYNC_TEST_ORIGIN_URL").ok()?;
        let cloud_url = std::env::var("DUALSYNC_TEST_CLOUD_URL").ok()?;
        init_tracing();

        let schema = format!("dualsync_test_{}", uuid_suffix());
        let origin = pool(&origin_url).await;
        let cloud = pool(&cloud_url).await;
        create_schema(&origin, &format!("{schema}_o"), ORIGIN_DDL).await;
        create_schema(&cloud, &format!("{schema}_c"), CLOUD_DDL).await;
        Some(Self {
            schema,
            origin,
            cloud,
        })
    }

    fn engine(&self) -> ReplicationEngine<PgStore, PgStore> {
        ReplicationEngine::new(
            EngineConfig::default(),
            sample_registry(),
            PgStore::from_pool("origin", self.origin.clone(), format!("{}_o", self.schema)),
            PgStore::from_pool("cloud", self.cloud.clone(), format!("{}_c", self.schema)),
        )
    }

    async fn count(&self, pool: &PgPool, side: &str, table: &str, filter: &str) -> i64 {
        let sql = format!(
            "SELECT count(*) FROM \"{}_{side}\".\"{table}\" {filter}",
            self.schema
        );
        sqlx::query_scalar(&sql).fetch_one(pool).await.unwrap()
    }

    async fn teardown(self) {
        for (pool, side) in [(&self.origin, "o"), (&self.cloud, "c")] {
            let sql = format!("DROP SCHEMA IF EXISTS \"{}_{side}\" CASCADE", self.schema);
            sqlx::raw_sql(&sql).execute(pool).await.unwrap();
        }
    }
}

fn uuid_suffix() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("{}_{}", std::process::id(), nanos % 1_000_000_000)
}

async fn pool(url: &str) -> PgPool {
    let options: PgConnectOptions = url.parse().unwrap();
    let options = options.options([("TimeZone", "UTC")]);
    PgPoolOptions::new()
        .max_connections(3)
        .connect_with(options)
        .await
        .unwrap()
}

async fn create_schema(pool: &PgPool, schema: &str, ddl: &str) {
    let quoted = format!("\"{schema}\"");
    let sql = format!("CREATE SCHEMA {quoted};{}", ddl.replace("{s}", &quoted));
    sqlx::raw_sql(&sql).execute(pool).await.unwrap();
}

async fn seed(store: &PgStore) {
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
        // unknown order, filtered by the reference check
        ("order_lines", line(4, 99, "NUT", 1, "pc", at(60))),
    ];
    for (table, row) in rows {
        store.insert(table, &row).await.unwrap();
    }
}

#[tokio::test]
async fn store_reads_the_catalog() {
    let Some(sandbox) = Sandbox::open().await else {
        return;
    };
    let engine = sandbox.engine();
    let cloud = engine.cloud();

    let columns = cloud.columns("orders").await.unwrap().unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names[0], "id");
    assert!(names.contains(&"origin_marker"));
    let total = columns.iter().find(|c| c.name == "total").unwrap();
    assert_eq!(total.sql_type, "numeric(12,2)");
    assert!(!columns[0].nullable);

    assert_eq!(cloud.primary_key("order_lines").await.unwrap(), vec!["id"]);
    assert!(cloud.columns("no_such_table").await.unwrap().is_none());

    sandbox.teardown().await;
}

#[tokio::test]
async fn watermark_writes_never_move_back() {
    let Some(sandbox) = Sandbox::open().await else {
        return;
    };
    let engine = sandbox.engine();
    let cloud = engine.cloud();

    assert!(cloud.read_watermark("sync_metadata", "orders").await.unwrap().is_none());
    cloud.ensure_metadata_table("sync_metadata").await.unwrap();
    cloud
        .seed_watermarks("sync_metadata", &["orders".to_string()])
        .await
        .unwrap();

    let mut watermark = Watermark::bootstrap("orders");
    watermark.last_sync_timestamp = at(100);
    watermark.status = SyncStatus::Success;
    cloud.write_watermark("sync_metadata", &watermark).await.unwrap();

    watermark.last_sync_timestamp = at(50);
    let mut txn = cloud.begin().await.unwrap();
    txn.write_watermark("sync_metadata", &watermark).await.unwrap();
    txn.commit().await.unwrap();

    let stored = cloud
        .read_watermark("sync_metadata", "orders")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_sync_timestamp, at(100));
    assert_eq!(stored.status, SyncStatus::Success);

    sandbox.teardown().await;
}

#[tokio::test]
async fn forward_and_reverse_round_trip() {
    let Some(sandbox) = Sandbox::open().await else {
        return;
    };
    let engine = sandbox.engine();
    seed(engine.origin()).await;
    engine.initialize().await.unwrap();

    let report = engine.sync_all(SyncMode::Full).await.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(sandbox.count(&sandbox.cloud, "c", "orders", "").await, 2);
    assert_eq!(sandbox.count(&sandbox.cloud, "c", "order_lines", "").await, 3);
    assert_eq!(
        sandbox
            .count(&sandbox.cloud, "c", "orders", "WHERE customer_name = 'Acme' AND origin_marker = 'D'")
            .await,
        1
    );

    let rerun = engine.sync_all(SyncMode::Incremental).await.unwrap();
    assert_eq!(rerun.table("orders").unwrap().written, 0);
    assert_eq!(rerun.table("customers").unwrap().written, 0);
    assert_eq!(sandbox.count(&sandbox.cloud, "c", "order_lines", "").await, 3);

    engine
        .cloud()
        .insert("visits", &mobile_visit("v-1", 1, "met buyer", at(120)))
        .await
        .unwrap();

    let reverse = engine.reverse_sync_all().await.unwrap();
    assert_eq!(reverse.written(), 1);
    assert_eq!(
        sandbox
            .count(
                &sandbox.origin,
                "o",
                "visits",
                "WHERE visit_time = '2024-01-01 09:30:00'"
            )
            .await,
        1
    );
    let again = engine.reverse_sync_all().await.unwrap();
    assert_eq!(again.written(), 0);

    let reverse_marks = engine.watermarks(Direction::Reverse).await.unwrap();
    assert_eq!(reverse_marks[0].last_sync_timestamp, at(120));

    sandbox.teardown().await;
    engine.cleanup().await;
    assert!(engine.origin().pool().is_closed());
}

#[tokio::test]
async fn unreachable_server_fails_to_connect() {
    if std::env::var("DUALSYNC_TEST_ORIGIN_URL").is_err() {
        return;
    }
    let config = dualsync_postgres::StoreConfig::new()
        .with_host("127.0.0.1", 1)
        .with_connect_timeout(std::time::Duration::from_secs(1));
    let err = PgStore::connect("origin", &config).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("origin"));
}

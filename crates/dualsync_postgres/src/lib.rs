//! # dualsync PostgreSQL store
//!
//! Runs the replication engine against real PostgreSQL servers through
//! `sqlx` connection pools.
//!
//! This crate provides:
//! - `PgStore`, a [`Store`](dualsync_engine::Store) over one pool
//! - `StoreConfig` and `ReplicationConfig`, loadable from JSON
//! - [`connect`], which opens both pools and returns a ready-to-initialize
//!   engine
//! - Mapping of driver errors onto `SyncError`
//!
//! ## Architecture
//!
//! Values cross the wire as text: reads cast every column to `text` and
//! parse it by the column's catalog type, writes bind text parameters and
//! cast them to the destination type on the server. A forward commit runs
//! in one transaction on one pooled connection; its staging table is a
//! temporary table dropped at commit.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dualsync_core::SyncRegistry;
//! use dualsync_engine::SyncMode;
//! use dualsync_postgres::{connect, ReplicationConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReplicationConfig::from_json_file("replication.json")?;
//! let registry = SyncRegistry::from_json_file("tables.json")?;
//! let engine = connect(&config, registry).await?;
//! engine.initialize().await?;
//! let report = engine.sync_all(SyncMode::Incremental).await?;
//! println!("{} rows written", report.written());
//! engine.cleanup().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod sql;
mod store;

pub use config::{ReplicationConfig, StoreConfig, TlsMode};
pub use error::store_error;
pub use store::{connect, PgStore, PgTransaction};

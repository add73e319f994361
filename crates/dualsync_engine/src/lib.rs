//! # dualsync engine
//!
//! Bidirectional replication between an origin store and a cloud store.
//!
//! This crate provides:
//! - Forward sync (origin → cloud) with full or incremental extraction
//! - Reverse sync (cloud → origin), insert only
//! - Upsert and replace commit strategies over a staging table
//! - Per-direction watermarks persisted in the cloud store
//! - Reference checks against cached key sets
//! - A store abstraction and an in-memory store for tests
//!
//! ## Architecture
//!
//! Every table moves through `Extract → Transform → Validate → Stage →
//! Commit → AdvanceWatermark`. A forward table commits in one transaction
//! together with its watermark, so a failure leaves the target and the
//! cursor unchanged. Tables run one at a time, reference tables first.
//!
//! ## Key Invariants
//!
//! - Forward sync never overwrites or deletes rows authored on the cloud side
//! - Reverse sync never updates or deletes origin rows
//! - Watermarks never move backwards and never skip unextracted rows
//! - Running a sync twice with no source changes changes nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod forward;
mod loader;
mod memory;
mod metadata;
mod report;
mod reverse;
mod store;
mod strategy;

pub use config::EngineConfig;
pub use engine::{EngineState, EngineStats, ReplicationEngine};
pub use error::{SyncError, SyncResult};
pub use forward::{choose_extraction, ForwardSync};
pub use loader::{build_lookup_cache, load_fk_cache, reload_fk_cache};
pub use memory::{FailPoint, MemoryStore, MemoryTransaction, TableDef};
pub use metadata::MetadataStore;
pub use report::{
    Extraction, FullReason, RunReport, SyncMode, TableFailure, TableReport, TableStage,
};
pub use reverse::ReverseSync;
pub use store::{FetchRequest, MarkerFilter, Since, StagingTable, Store, StoreTransaction};
pub use strategy::{
    ApplyOutcome, CommitPlan, CommitStrategy, ReplaceStrategy, Strategy, StrategyKind,
    UpsertStrategy,
};

//! # dualsync core
//!
//! Storage-independent building blocks of the dualsync replicator.
//!
//! This crate provides:
//! - Sync descriptors and the validated descriptor registry
//! - Dynamic column values and ordered records
//! - The foreign-key validation cache
//! - The lookup cache for derived columns
//! - Watermarks and origin markers
//! - Forward row transformation and reverse row projection
//!
//! Nothing here performs I/O. Loading caches, reading watermarks and writing
//! rows belong to `dualsync_engine`, which drives these types against a
//! store.
//!
//! ## Key Invariants
//!
//! - Descriptors are closed types; malformed rules fail at load
//! - A watermark only moves forward, and only to an observed timestamp
//! - Rows whose origin marker is not `"D"` are never owned by the forward path
//! - NULL never fails a foreign-key check

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coerce;
mod descriptor;
mod error;
mod fk;
mod lookup;
mod marker;
mod record;
mod registry;
mod schema;
mod transform;
mod value;
mod watermark;

pub use coerce::ReverseProjector;
pub use descriptor::{
    AddColumn, AddValue, Classification, Coercion, LookupRule, PkReliability, ReverseDescriptor,
    SyncDescriptor,
};
pub use error::{ConfigError, CoreError, CoreResult};
pub use fk::{FkFilterOutcome, FkRule, FkValidation, FkValidationCache, ReferenceKey, RejectedRow};
pub use lookup::LookupCache;
pub use marker::OriginMarker;
pub use record::Record;
pub use registry::SyncRegistry;
pub use schema::{find_column, ColumnInfo, ColumnType};
pub use transform::{TransformOutcome, Transformer};
pub use value::{KeyValue, Value};
pub use watermark::{epoch, max_timestamp, Direction, SyncStatus, Watermark};

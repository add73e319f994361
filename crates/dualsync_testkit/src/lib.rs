//! # dualsync testkit
//!
//! Test utilities for dualsync.
//!
//! This crate provides:
//! - A sample schema for the origin and cloud stores, with its registry
//! - Seeded in-memory store pairs and row builders
//! - Property-based test generators using proptest
//! - A `tracing` subscriber for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dualsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn forward_sync() {
//!     let replica = Replica::seeded();
//!     let engine = replica.engine(EngineConfig::default());
//!     engine.initialize().await.unwrap();
//!     // ... sync and inspect replica.cloud
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use dualsync_engine::EngineConfig;
}

pub use fixtures::*;
pub use generators::*;

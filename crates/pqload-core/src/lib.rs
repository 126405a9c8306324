//! # pqload-core
//!
//! Core abstractions for the pqload Parquet-to-PostgreSQL loader.
//!
//! This crate provides the foundational types and traits used by the pipeline:
//!
//! - **Records**: [`OrderRecord`], [`LoadBatch`] and the fixed [`TargetTable`]
//! - **Storage**: the [`ObjectFetcher`] contract plus local and in-memory fetchers
//! - **Scratch space**: per-invocation download locations that clean up on drop
//! - **Sinks**: the [`CopyTarget`]/[`CopySession`] bulk-copy contract and an
//!   in-memory transactional table
//! - **Configuration**: [`DatabaseConfig`] read once from the environment
//! - **Error Types**: shared error taxonomy and result alias
//!
//! ## Example
//!
//! ```rust
//! use pqload_core::prelude::*;
//!
//! let table = MemoryTable::new();
//! assert_eq!(table.row_count(), 0);
//! assert_eq!(TargetTable::ORDERS.name, "test_orders");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;
pub mod record;
pub mod scratch;
pub mod sink;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::DatabaseConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::InvocationId;
    pub use crate::record::{FieldKind, LoadBatch, OrderField, OrderRecord, TargetTable};
    pub use crate::scratch::{ScratchFile, ScratchStore};
    pub use crate::sink::{CopySession, CopyTarget, LoadStage, MemoryTable};
    pub use crate::storage::{LocalDirFetcher, MemoryFetcher, ObjectFetcher};
}

// Re-export key types at crate root for ergonomics
pub use config::DatabaseConfig;
pub use error::{Error, Result};
pub use id::InvocationId;
pub use observability::{LogFormat, Redacted, init_logging, pipeline_span};
pub use record::{FieldKind, LoadBatch, OrderField, OrderRecord, TargetTable};
pub use scratch::{ScratchFile, ScratchStore};
pub use sink::{CopySession, CopyTarget, LoadStage, MemorySession, MemoryTable};
pub use storage::{LocalDirFetcher, MemoryFetcher, ObjectFetcher};

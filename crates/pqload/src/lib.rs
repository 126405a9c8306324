//! # pqload
//!
//! Loads Parquet order files into PostgreSQL when object storage announces
//! them.
//!
//! One invocation takes the first record of a notification batch, downloads
//! the object into per-invocation scratch space, decodes it column by column
//! into row records and bulk-copies the rows into the `test_orders` table in
//! a single transaction. The object is either loaded completely or not at
//! all.
//!
//! ## Components
//!
//! - [`notification`]: trigger payload parsing and object selection
//! - [`decode`]: Parquet column resolution, reading and row assembly
//! - [`load`]: the transactional bulk loader
//! - [`postgres`] / [`s3`]: production copy target and object fetcher
//! - [`pipeline`]: the fetch → decode → load driver
//! - [`server`] / [`metrics`]: HTTP trigger endpoint and Prometheus metrics

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod decode;
pub mod load;
pub mod metrics;
pub mod notification;
pub mod pipeline;
pub mod postgres;
pub mod s3;
pub mod server;

pub use decode::{ColumnAddress, ColumnarDecoder, FieldResolution};
pub use load::{BulkLoader, LoadReport};
pub use notification::{NotificationBatch, ObjectRef};
pub use pipeline::{Acknowledgement, InvocationOutcome, Pipeline, PipelineRun, PipelineState};
pub use postgres::PostgresTarget;
pub use s3::S3Fetcher;
pub use server::{ServiceState, router};

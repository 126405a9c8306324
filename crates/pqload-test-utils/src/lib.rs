//! Shared test utilities for pqload integration tests.
//!
//! This crate provides:
//! - Parquet fixtures for order files ([`fixtures`])
//! - [`FailingCopyTarget`]: a bulk-copy sink that fails at a chosen protocol step
//!
//! # Example
//!
//! ```rust,ignore
//! use pqload_test_utils::{orders_parquet_bytes, sample_orders};
//!
//! let bytes = orders_parquet_bytes(&sample_orders());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod failing;
pub mod fixtures;

pub use failing::*;
pub use fixtures::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pqload=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

//! Observability infrastructure for pqload.
//!
//! Structured logging with consistent spans. Every invocation runs inside a
//! [`pipeline_span`] so that fetch, decode and load events can be correlated
//! by invocation ID and object.

use std::fmt;
use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Error;
use crate::id::InvocationId;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    #[default]
    Json,
    /// Pretty-printed logs (for development).
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::config(format!(
                "unknown log format '{other}' (expected 'json' or 'pretty')"
            ))),
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `pqload=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one pipeline invocation.
///
/// # Example
///
/// ```rust
/// use pqload_core::id::InvocationId;
/// use pqload_core::observability::pipeline_span;
///
/// let span = pipeline_span(InvocationId::generate(), "orders-bucket", "2024/orders.parquet");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn pipeline_span(invocation_id: InvocationId, bucket: &str, key: &str) -> Span {
    tracing::info_span!(
        "pipeline",
        invocation_id = %invocation_id,
        bucket = bucket,
        key = key,
    )
}

/// Wrapper that keeps a secret out of `Debug` and `Display` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wraps a secret value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Returns the secret. Callers must not log the result.
    #[must_use]
    pub const fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // Second call should be no-op
    }

    #[test]
    fn test_pipeline_span_creates_span() {
        let span = pipeline_span(InvocationId::generate(), "bucket", "orders.parquet");
        let _guard = span.enter();
        tracing::info!("message in pipeline span");
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn redacted_hides_value() {
        let secret = Redacted::new("hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose(), "hunter2");
    }
}

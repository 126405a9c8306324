//! Loader metrics.
//!
//! Prometheus-compatible metrics for invocations:
//! - Invocations by outcome and their duration
//! - Failures by pipeline stage and error kind
//! - Bytes fetched and rows committed

use std::sync::OnceLock;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use pqload_core::{Error, Result};

// ============================================================================
// Metric Names
// ============================================================================

/// Invocation duration in seconds.
pub const INVOCATION_DURATION: &str = "pqload_invocation_duration_seconds";

/// Total invocations, labeled by outcome.
pub const INVOCATIONS_TOTAL: &str = "pqload_invocations_total";

/// Failures, labeled by stage and error kind.
pub const STAGE_ERRORS_TOTAL: &str = "pqload_stage_errors_total";

/// Rows committed to the target table.
pub const ROWS_LOADED_TOTAL: &str = "pqload_rows_loaded_total";

/// Bytes downloaded into scratch space.
pub const BYTES_FETCHED_TOTAL: &str = "pqload_bytes_fetched_total";

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with the Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls return the existing handle.
///
/// # Errors
///
/// Returns [`Error::Internal`] if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("failed to install prometheus recorder: {e}")))?;

    describe_histogram!(INVOCATION_DURATION, "Duration of invocations in seconds");
    describe_counter!(INVOCATIONS_TOTAL, "Total invocations by outcome");
    describe_counter!(STAGE_ERRORS_TOTAL, "Total failures by stage and error kind");
    describe_counter!(ROWS_LOADED_TOTAL, "Total rows committed to the target table");
    describe_counter!(BYTES_FETCHED_TOTAL, "Total bytes downloaded into scratch space");

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// ============================================================================
// Metrics Endpoint
// ============================================================================

/// Handler for the `/metrics` endpoint.
pub async fn serve_metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Final outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The batch was committed.
    Success,
    /// The file or event was rejected (format, schema, coercion, event shape).
    Rejected,
    /// Infrastructure failure (fetch, load, I/O).
    Failed,
}

impl Outcome {
    /// Classifies a pipeline result.
    #[must_use]
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) if e.is_rejection() => Self::Rejected,
            Err(_) => Self::Failed,
        }
    }

    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// Records a finished invocation.
pub fn record_invocation(outcome: Outcome, duration_secs: f64) {
    let labels = [("outcome", outcome.as_str())];
    histogram!(INVOCATION_DURATION, &labels).record(duration_secs);
    counter!(INVOCATIONS_TOTAL, &labels).increment(1);
}

/// Records a failure in one pipeline stage.
pub fn record_stage_error(stage: &'static str, error: &Error) {
    counter!(STAGE_ERRORS_TOTAL, "stage" => stage, "kind" => error.kind()).increment(1);
}

/// Records a completed download.
pub fn record_fetch(bytes: u64) {
    counter!(BYTES_FETCHED_TOTAL).increment(bytes);
}

/// Records a committed load.
pub fn record_load(rows: u64) {
    counter!(ROWS_LOADED_TOTAL).increment(rows);
}

/// RAII guard for measuring invocation duration.
pub struct InvocationTimer {
    start: Instant,
}

impl InvocationTimer {
    /// Starts timing an invocation.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the timer started.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Stops the timer and records the invocation.
    pub fn finish(self, outcome: Outcome) {
        record_invocation(outcome, self.start.elapsed().as_secs_f64());
    }
}

//! HTTP trigger endpoint.
//!
//! `POST /events` accepts one notification batch and runs one invocation
//! for its first record, answering only once the invocation finished:
//!
//! - `200 OK` with the acknowledgment
//! - `400 Bad Request` for malformed events and rejected files
//! - `500 Internal Server Error` for fetch, load and other failures
//!
//! `/health`, `/ready` and `/metrics` serve liveness, invocation counters
//! and Prometheus metrics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::Serialize;

use pqload_core::Error;

use crate::metrics;
use crate::notification::NotificationBatch;
use crate::pipeline::Pipeline;

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct ServiceState {
    pipeline: Pipeline,
    successful_invocations: AtomicU64,
    failed_invocations: AtomicU64,
    in_flight: AtomicU64,
    last_success_ts: AtomicU64,
}

impl ServiceState {
    /// Wraps the pipeline that handles incoming events.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            successful_invocations: AtomicU64::new(0),
            failed_invocations: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            last_success_ts: AtomicU64::new(0),
        }
    }

    fn record_success(&self) {
        let now: u64 = Utc::now().timestamp().try_into().unwrap_or_default();
        self.last_success_ts.store(now, Ordering::Release);
        self.successful_invocations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed_invocations.fetch_add(1, Ordering::Relaxed);
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        let ts = self.last_success_ts.load(Ordering::Acquire);
        if ts == 0 {
            None
        } else {
            DateTime::from_timestamp(i64::try_from(ts).ok()?, 0)
        }
    }
}

/// Holds one slot of the in-flight counter until dropped.
///
/// Axum drops the handler future when the client disconnects, so the slot
/// must be released on drop rather than after the await.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Builds the service router.
pub fn router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics::serve_metrics))
        .route("/events", post(handle_event))
        .with_state(state)
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    ready: bool,
    successful_invocations: u64,
    failed_invocations: u64,
    in_flight: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_success: Option<String>,
}

/// GET /health - Shallow liveness check.
async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// GET /ready - Readiness with invocation counters.
async fn ready(State(state): State<Arc<ServiceState>>) -> impl IntoResponse {
    Json(ReadyResponse {
        ready: true,
        successful_invocations: state.successful_invocations.load(Ordering::Relaxed),
        failed_invocations: state.failed_invocations.load(Ordering::Relaxed),
        in_flight: state.in_flight.load(Ordering::Acquire),
        last_success: state.last_success().map(|dt| dt.to_rfc3339()),
    })
}

// ============================================================================
// Trigger Endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

/// Status code reported to the trigger for a failed invocation.
#[must_use]
pub fn status_for(error: &Error) -> StatusCode {
    if error.is_rejection() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn error_response(error: &Error) -> Response {
    (
        status_for(error),
        Json(ErrorResponse {
            error: error.kind(),
            message: error.to_string(),
        }),
    )
        .into_response()
}

/// POST /events - Run one invocation for the first record of the batch.
async fn handle_event(State(state): State<Arc<ServiceState>>, body: Bytes) -> Response {
    let batch = match NotificationBatch::from_json(&body) {
        Ok(batch) => batch,
        Err(err) => {
            tracing::warn!(error = %err, "malformed trigger payload");
            state.record_failure();
            return error_response(&err);
        }
    };

    let result = {
        let _slot = InFlight::enter(&state.in_flight);
        state.pipeline.process_event(&batch).await
    };

    match result {
        Ok(ack) => {
            state.record_success();
            (StatusCode::OK, Json(ack)).into_response()
        }
        Err(err) => {
            state.record_failure();
            error_response(&err)
        }
    }
}

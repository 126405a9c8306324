//! Pipeline driver.
//!
//! One invocation moves through a strictly sequential state machine:
//!
//! ```text
//! Idle → Fetching → Decoding → Loading → Done
//!            └─────────┴──────────┴──→ Failed
//! ```
//!
//! Each stage completes before the next begins. The first error moves the
//! run to `Failed` and is returned to the caller unchanged. The driver never
//! retries; redelivery belongs to whatever delivered the trigger.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use pqload_core::{Error, InvocationId, ObjectFetcher, Result, ScratchStore, pipeline_span};

use crate::decode::ColumnarDecoder;
use crate::load::BulkLoader;
use crate::metrics::{self, InvocationTimer, Outcome};
use crate::notification::{NotificationBatch, ObjectRef};

/// Pipeline state machine states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Created, nothing started.
    #[default]
    Idle,
    /// Downloading the object into scratch space.
    Fetching,
    /// Decoding the local file into a load batch.
    Decoding,
    /// Loading the batch into the target table.
    Loading,
    /// The batch was committed.
    Done,
    /// A stage failed; nothing was committed.
    Failed,
}

impl PipelineState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Idle => matches!(target, Self::Fetching),
            Self::Fetching => matches!(target, Self::Decoding | Self::Failed),
            Self::Decoding => matches!(target, Self::Loading | Self::Failed),
            Self::Loading => matches!(target, Self::Done | Self::Failed),
            Self::Done | Self::Failed => false,
        }
    }

    /// Stable name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Decoding => "decoding",
            Self::Loading => "loading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress record of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    invocation_id: InvocationId,
    state: PipelineState,
    failed_stage: Option<PipelineState>,
}

impl PipelineRun {
    /// Creates an idle run.
    #[must_use]
    pub fn new(invocation_id: InvocationId) -> Self {
        Self {
            invocation_id,
            state: PipelineState::Idle,
            failed_stage: None,
        }
    }

    /// Identifier of the invocation.
    #[must_use]
    pub const fn invocation_id(&self) -> InvocationId {
        self.invocation_id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    /// Stage that was active when the run failed.
    #[must_use]
    pub const fn failed_stage(&self) -> Option<PipelineState> {
        self.failed_stage
    }

    /// Moves to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the transition is not allowed.
    pub fn transition(&mut self, target: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::internal(format!(
                "invalid pipeline transition {} -> {target}",
                self.state
            )));
        }
        tracing::debug!(from = %self.state, to = %target, "pipeline transition");
        self.state = target;
        Ok(())
    }

    fn fail(&mut self) {
        if self.state.can_transition_to(PipelineState::Failed) {
            self.failed_stage = Some(self.state);
            self.state = PipelineState::Failed;
        }
    }
}

/// Acknowledgment returned for a committed object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    /// Invocation that processed the object.
    pub invocation_id: InvocationId,
    /// Source bucket.
    pub bucket: String,
    /// Source object key.
    pub key: String,
    /// Bytes downloaded.
    pub bytes_fetched: u64,
    /// Rows committed.
    pub rows_loaded: u64,
    /// Wall time of the invocation.
    pub elapsed_ms: u64,
}

/// Final state and result of one invocation.
#[derive(Debug)]
pub struct InvocationOutcome {
    /// Final run record.
    pub run: PipelineRun,
    /// Acknowledgment or the error that aborted the run.
    pub result: Result<Acknowledgement>,
}

/// Fetch → decode → load driver.
#[derive(Clone)]
pub struct Pipeline {
    fetcher: Arc<dyn ObjectFetcher>,
    decoder: ColumnarDecoder,
    loader: BulkLoader,
    scratch: ScratchStore,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("decoder", &self.decoder)
            .field("loader", &self.loader)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Assembles a pipeline from its stages.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn ObjectFetcher>,
        decoder: ColumnarDecoder,
        loader: BulkLoader,
        scratch: ScratchStore,
    ) -> Self {
        Self {
            fetcher,
            decoder,
            loader,
            scratch,
        }
    }

    /// Runs one invocation for `object` and reports its final state.
    pub async fn execute(&self, object: &ObjectRef) -> InvocationOutcome {
        let invocation_id = InvocationId::generate();
        let span = pipeline_span(invocation_id, &object.bucket, &object.key);
        self.execute_inner(invocation_id, object)
            .instrument(span)
            .await
    }

    /// Runs one invocation for `object`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage.
    pub async fn process(&self, object: &ObjectRef) -> Result<Acknowledgement> {
        self.execute(object).await.result
    }

    /// Runs one invocation for the first record of `batch`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] if the batch names no object, otherwise
    /// the error of the first failing stage.
    pub async fn process_event(&self, batch: &NotificationBatch) -> Result<Acknowledgement> {
        let object = batch.first_object().inspect_err(|err| {
            tracing::warn!(error = %err, "rejecting trigger event");
            metrics::record_stage_error("event", err);
            metrics::record_invocation(Outcome::Rejected, 0.0);
        })?;
        self.process(&object).await
    }

    async fn execute_inner(
        &self,
        invocation_id: InvocationId,
        object: &ObjectRef,
    ) -> InvocationOutcome {
        let timer = InvocationTimer::start();
        let mut run = PipelineRun::new(invocation_id);
        tracing::info!("invocation started");

        let result = self.run_stages(&mut run, object, &timer).await;
        match &result {
            Ok(ack) => {
                tracing::info!(
                    rows_loaded = ack.rows_loaded,
                    bytes_fetched = ack.bytes_fetched,
                    elapsed_ms = ack.elapsed_ms,
                    "invocation succeeded"
                );
            }
            Err(err) => {
                let stage = run.state();
                run.fail();
                metrics::record_stage_error(stage.as_str(), err);
                tracing::error!(
                    error = %err,
                    kind = err.kind(),
                    stage = %stage,
                    "invocation failed"
                );
            }
        }

        timer.finish(Outcome::of(&result));
        InvocationOutcome { run, result }
    }

    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        object: &ObjectRef,
        timer: &InvocationTimer,
    ) -> Result<Acknowledgement> {
        run.transition(PipelineState::Fetching)?;
        // Scratch allocation is part of the fetch stage.
        let scratch = self.scratch.allocate(&object.key).map_err(|err| match err {
            Error::Io { message, source } => {
                Error::fetch_with_source(&object.bucket, &object.key, message, source)
            }
            other => other,
        })?;
        let bytes_fetched = self
            .fetcher
            .fetch(&object.bucket, &object.key, scratch.path())
            .await?;
        metrics::record_fetch(bytes_fetched);
        if let Some(announced) = object.size.filter(|&size| size != bytes_fetched) {
            tracing::warn!(announced, bytes_fetched, "object size differs from notification");
        }

        run.transition(PipelineState::Decoding)?;
        let decoder = self.decoder.clone();
        let path = scratch.path().to_path_buf();
        let span = tracing::Span::current();
        let batch = tokio::task::spawn_blocking(move || span.in_scope(|| decoder.decode(&path)))
            .await
            .map_err(|e| Error::internal(format!("decode task failed: {e}")))??;

        run.transition(PipelineState::Loading)?;
        let report = self.loader.load(&batch).await?;
        metrics::record_load(report.rows_committed);

        run.transition(PipelineState::Done)?;
        Ok(Acknowledgement {
            invocation_id: run.invocation_id(),
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            bytes_fetched,
            rows_loaded: report.rows_committed,
            elapsed_ms: timer.elapsed_ms(),
        })
    }
}

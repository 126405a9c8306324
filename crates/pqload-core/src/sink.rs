//! Bulk-copy sink abstraction.
//!
//! A [`CopyTarget`] opens [`CopySession`]s against a relational store. A
//! session drives one transaction through the bulk-copy protocol:
//!
//! ```text
//! connect → begin → prepare_copy → write_row* → finish_copy → close_copy → commit
//!                         └──────────── any failure ────────────→ rollback
//! ```
//!
//! Rows written to a session are invisible to other readers until `commit`
//! succeeds. The in-memory [`MemoryTable`] implements the same contract for
//! tests.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::record::{OrderRecord, TargetTable};

/// Step of the bulk-copy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStage {
    /// Opening the connection.
    Connect,
    /// Starting the transaction.
    Begin,
    /// Preparing the streaming insert statement.
    Prepare,
    /// Streaming one row.
    WriteRow,
    /// Finalizing (flushing) the copy stream.
    Finish,
    /// Closing the prepared statement.
    Close,
    /// Committing the transaction.
    Commit,
    /// Abandoning the transaction after a failure.
    Rollback,
    /// Checking the acknowledged row count.
    Verify,
}

impl LoadStage {
    /// Stable name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Begin => "begin",
            Self::Prepare => "prepare",
            Self::WriteRow => "write_row",
            Self::Finish => "finish",
            Self::Close => "close",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens bulk-copy sessions against a relational store.
#[async_trait]
pub trait CopyTarget: Send + Sync + 'static {
    /// Opens one connection.
    ///
    /// Returns [`Error::Load`] with [`LoadStage::Connect`] on failure.
    async fn connect(&self) -> Result<Box<dyn CopySession>>;
}

/// One connection driving one transaction through the bulk-copy protocol.
#[async_trait]
pub trait CopySession: Send {
    /// Starts the transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Prepares the streaming insert statement for `table`.
    async fn prepare_copy(&mut self, table: &TargetTable) -> Result<()>;

    /// Streams one row through the prepared statement.
    async fn write_row(&mut self, row: &OrderRecord) -> Result<()>;

    /// Finalizes the copy stream, returning the row count acknowledged by
    /// the store.
    async fn finish_copy(&mut self) -> Result<u64>;

    /// Closes the prepared statement.
    async fn close_copy(&mut self) -> Result<()>;

    /// Commits the transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Aborts the transaction. A no-op if no transaction is open.
    async fn rollback(&mut self) -> Result<()>;

    /// Releases the connection.
    async fn disconnect(self: Box<Self>);
}

/// In-memory table with transactional visibility for testing.
///
/// Rows become visible in [`MemoryTable::rows`] only after a session
/// commits. The table tracks open sessions so tests can assert that
/// connections are released on every exit path.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    committed: Arc<Mutex<Vec<OrderRecord>>>,
    open_sessions: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    rollbacks: Arc<AtomicUsize>,
}

impl MemoryTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows in commit order.
    #[must_use]
    pub fn rows(&self) -> Vec<OrderRecord> {
        self.committed
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Number of committed rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.committed.lock().map_or(0, |rows| rows.len())
    }

    /// Sessions connected but not yet disconnected.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of rollbacks that discarded an open transaction.
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Opens a session directly (without the trait object).
    #[must_use]
    pub fn session(&self) -> MemorySession {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        MemorySession {
            table: self.clone(),
            state: SessionState::Connected,
            staged: Vec::new(),
            copied: 0,
        }
    }
}

#[async_trait]
impl CopyTarget for MemoryTable {
    async fn connect(&self) -> Result<Box<dyn CopySession>> {
        Ok(Box::new(self.session()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connected,
    InTransaction,
    Copying,
    Finished,
    Closed,
    Committed,
}

/// Session over a [`MemoryTable`].
///
/// Enforces protocol ordering: calling a step out of order is a load error
/// for that step.
#[derive(Debug)]
pub struct MemorySession {
    table: MemoryTable,
    state: SessionState,
    staged: Vec<OrderRecord>,
    copied: u64,
}

impl MemorySession {
    fn expect_state(&self, expected: SessionState, stage: LoadStage) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::load(
                stage,
                format!("protocol violation: session is {:?}", self.state),
            ))
        }
    }
}

#[async_trait]
impl CopySession for MemorySession {
    async fn begin(&mut self) -> Result<()> {
        self.expect_state(SessionState::Connected, LoadStage::Begin)?;
        self.state = SessionState::InTransaction;
        Ok(())
    }

    async fn prepare_copy(&mut self, _table: &TargetTable) -> Result<()> {
        self.expect_state(SessionState::InTransaction, LoadStage::Prepare)?;
        self.state = SessionState::Copying;
        Ok(())
    }

    async fn write_row(&mut self, row: &OrderRecord) -> Result<()> {
        self.expect_state(SessionState::Copying, LoadStage::WriteRow)?;
        self.staged.push(row.clone());
        self.copied += 1;
        Ok(())
    }

    async fn finish_copy(&mut self) -> Result<u64> {
        self.expect_state(SessionState::Copying, LoadStage::Finish)?;
        self.state = SessionState::Finished;
        Ok(self.copied)
    }

    async fn close_copy(&mut self) -> Result<()> {
        self.expect_state(SessionState::Finished, LoadStage::Close)?;
        self.state = SessionState::Closed;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.expect_state(SessionState::Closed, LoadStage::Commit)?;
        let mut committed = self
            .table
            .committed
            .lock()
            .map_err(|_| Error::load(LoadStage::Commit, "table lock poisoned"))?;
        committed.append(&mut self.staged);
        drop(committed);
        self.state = SessionState::Committed;
        self.table.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected | SessionState::Committed => Ok(()),
            _ => {
                self.staged.clear();
                self.copied = 0;
                self.state = SessionState::Connected;
                self.table.rollbacks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn disconnect(self: Box<Self>) {
        self.table.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i32) -> OrderRecord {
        OrderRecord {
            order_id: id,
            first_name: "A".into(),
            last_name: "B".into(),
            email: "a@x.com".into(),
            quantity: 1,
            order_total: 1.5,
        }
    }

    #[tokio::test]
    async fn rows_visible_only_after_commit() {
        let table = MemoryTable::new();
        let mut session = table.connect().await.unwrap();

        session.begin().await.unwrap();
        session.prepare_copy(&TargetTable::ORDERS).await.unwrap();
        session.write_row(&record(1)).await.unwrap();
        session.write_row(&record(2)).await.unwrap();
        assert_eq!(session.finish_copy().await.unwrap(), 2);
        session.close_copy().await.unwrap();
        assert_eq!(table.row_count(), 0);

        session.commit().await.unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.commits(), 1);

        assert_eq!(table.open_sessions(), 1);
        session.disconnect().await;
        assert_eq!(table.open_sessions(), 0);
    }

    #[tokio::test]
    async fn rollback_discards_staged_rows() {
        let table = MemoryTable::new();
        let mut session = table.connect().await.unwrap();

        session.begin().await.unwrap();
        session.prepare_copy(&TargetTable::ORDERS).await.unwrap();
        session.write_row(&record(1)).await.unwrap();
        session.rollback().await.unwrap();
        session.disconnect().await;

        assert_eq!(table.row_count(), 0);
        assert_eq!(table.rollbacks(), 1);
        assert_eq!(table.open_sessions(), 0);
    }

    #[tokio::test]
    async fn out_of_order_step_is_load_error() {
        let table = MemoryTable::new();
        let mut session = table.connect().await.unwrap();

        let err = session.write_row(&record(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Load {
                stage: LoadStage::WriteRow,
                ..
            }
        ));

        session.begin().await.unwrap();
        let err = session.commit().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Load {
                stage: LoadStage::Commit,
                ..
            }
        ));
        session.disconnect().await;
    }

    #[tokio::test]
    async fn rollback_without_transaction_is_noop() {
        let table = MemoryTable::new();
        let mut session = table.connect().await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(table.rollbacks(), 0);
        session.disconnect().await;
    }

    #[test]
    fn stage_names() {
        assert_eq!(LoadStage::WriteRow.to_string(), "write_row");
        assert_eq!(LoadStage::Verify.as_str(), "verify");
        assert_eq!(LoadStage::Rollback.to_string(), "rollback");
    }
}

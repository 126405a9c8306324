//! Bulk-copy sink with configurable failure injection.
//!
//! Wraps a [`MemoryTable`] and fails one chosen protocol step, so tests can
//! verify that no rows become visible after a failure at any point.

use async_trait::async_trait;

use pqload_core::{
    CopySession, CopyTarget, Error, LoadStage, MemorySession, MemoryTable, OrderRecord, Result,
    TargetTable,
};

/// Protocol step at which a [`FailingCopyTarget`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Connection refused.
    Connect,
    /// `BEGIN` fails.
    Begin,
    /// Preparing the copy statement fails.
    Prepare,
    /// Writing the row with this zero-based index fails.
    WriteRow(usize),
    /// Finalizing the copy stream fails.
    Finish,
    /// Finalize succeeds but acknowledges one row more than was written.
    Miscount,
    /// Closing the statement fails.
    Close,
    /// `COMMIT` fails.
    Commit,
}

impl FailurePoint {
    /// Every failure point reachable for a batch of `rows` rows.
    pub fn all_for(rows: usize) -> Vec<Self> {
        let mut points = vec![Self::Connect, Self::Begin, Self::Prepare];
        points.extend((0..rows).map(Self::WriteRow));
        points.extend([Self::Finish, Self::Miscount, Self::Close, Self::Commit]);
        points
    }
}

/// Copy target that injects one failure into every session it opens.
#[derive(Debug, Clone)]
pub struct FailingCopyTarget {
    table: MemoryTable,
    failure: FailurePoint,
    failing_rollback: bool,
}

impl FailingCopyTarget {
    /// Creates a target over `table` that fails at `failure`.
    pub fn new(table: MemoryTable, failure: FailurePoint) -> Self {
        Self {
            table,
            failure,
            failing_rollback: false,
        }
    }

    /// Makes `rollback` report a failure as well.
    ///
    /// Staged rows are still discarded, as a server does when the client
    /// goes away mid-transaction.
    #[must_use]
    pub fn with_failing_rollback(mut self) -> Self {
        self.failing_rollback = true;
        self
    }

    /// The underlying table.
    pub fn table(&self) -> &MemoryTable {
        &self.table
    }
}

fn injected(stage: LoadStage) -> Error {
    Error::load(stage, format!("injected {stage} failure"))
}

#[async_trait]
impl CopyTarget for FailingCopyTarget {
    async fn connect(&self) -> Result<Box<dyn CopySession>> {
        if self.failure == FailurePoint::Connect {
            return Err(injected(LoadStage::Connect));
        }
        Ok(Box::new(FailingSession {
            inner: self.table.session(),
            failure: self.failure,
            failing_rollback: self.failing_rollback,
            rows_written: 0,
        }))
    }
}

struct FailingSession {
    inner: MemorySession,
    failure: FailurePoint,
    failing_rollback: bool,
    rows_written: usize,
}

#[async_trait]
impl CopySession for FailingSession {
    async fn begin(&mut self) -> Result<()> {
        if self.failure == FailurePoint::Begin {
            return Err(injected(LoadStage::Begin));
        }
        self.inner.begin().await
    }

    async fn prepare_copy(&mut self, table: &TargetTable) -> Result<()> {
        if self.failure == FailurePoint::Prepare {
            return Err(injected(LoadStage::Prepare));
        }
        self.inner.prepare_copy(table).await
    }

    async fn write_row(&mut self, row: &OrderRecord) -> Result<()> {
        if self.failure == FailurePoint::WriteRow(self.rows_written) {
            return Err(injected(LoadStage::WriteRow));
        }
        self.inner.write_row(row).await?;
        self.rows_written += 1;
        Ok(())
    }

    async fn finish_copy(&mut self) -> Result<u64> {
        match self.failure {
            FailurePoint::Finish => Err(injected(LoadStage::Finish)),
            FailurePoint::Miscount => Ok(self.inner.finish_copy().await? + 1),
            _ => self.inner.finish_copy().await,
        }
    }

    async fn close_copy(&mut self) -> Result<()> {
        if self.failure == FailurePoint::Close {
            return Err(injected(LoadStage::Close));
        }
        self.inner.close_copy().await
    }

    async fn commit(&mut self) -> Result<()> {
        if self.failure == FailurePoint::Commit {
            return Err(injected(LoadStage::Commit));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await?;
        if self.failing_rollback {
            return Err(injected(LoadStage::Rollback));
        }
        Ok(())
    }

    async fn disconnect(self: Box<Self>) {
        Box::new(self.inner).disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_orders;

    #[test]
    fn all_for_covers_every_row() {
        let points = FailurePoint::all_for(3);
        assert!(points.contains(&FailurePoint::WriteRow(0)));
        assert!(points.contains(&FailurePoint::WriteRow(2)));
        assert!(!points.contains(&FailurePoint::WriteRow(3)));
        assert_eq!(points.len(), 3 + 3 + 4);
    }

    #[tokio::test]
    async fn injected_commit_failure_leaves_table_empty() {
        let target = FailingCopyTarget::new(MemoryTable::new(), FailurePoint::Commit);
        let mut session = target.connect().await.unwrap();
        session.begin().await.unwrap();
        session.prepare_copy(&TargetTable::ORDERS).await.unwrap();
        for row in &sample_orders() {
            session.write_row(row).await.unwrap();
        }
        session.finish_copy().await.unwrap();
        session.close_copy().await.unwrap();
        assert!(session.commit().await.is_err());
        session.rollback().await.unwrap();
        session.disconnect().await;

        assert_eq!(target.table().row_count(), 0);
        assert_eq!(target.table().open_sessions(), 0);
    }
}

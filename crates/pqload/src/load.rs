//! Transactional bulk loader.
//!
//! Drives one [`CopySession`] through the bulk-copy protocol for a whole
//! [`LoadBatch`]. The batch is committed completely or not at all: any
//! failure after `begin` rolls the transaction back, and the connection is
//! released on every path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pqload_core::{
    CopySession, CopyTarget, DatabaseConfig, Error, LoadBatch, LoadStage, Result, TargetTable,
};

use crate::postgres::PostgresTarget;

/// Outcome of a committed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows acknowledged by the store and committed.
    pub rows_committed: u64,
    /// Time from connect to commit.
    pub elapsed: Duration,
}

/// Loads batches into one target table.
#[derive(Clone)]
pub struct BulkLoader {
    target: Arc<dyn CopyTarget>,
    table: TargetTable,
}

impl std::fmt::Debug for BulkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkLoader")
            .field("table", &self.table.name)
            .finish_non_exhaustive()
    }
}

impl BulkLoader {
    /// Creates a loader over an arbitrary copy target.
    #[must_use]
    pub fn new(target: Arc<dyn CopyTarget>) -> Self {
        Self {
            target,
            table: TargetTable::ORDERS,
        }
    }

    /// Creates a loader over a PostgreSQL database.
    #[must_use]
    pub fn postgres(config: DatabaseConfig) -> Self {
        Self::new(Arc::new(PostgresTarget::new(config)))
    }

    /// Overrides the destination table.
    #[must_use]
    pub fn with_table(mut self, table: TargetTable) -> Self {
        self.table = table;
        self
    }

    /// Destination table.
    #[must_use]
    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    /// Loads `batch` in a single transaction.
    ///
    /// An empty batch still runs the full protocol and commits zero rows.
    ///
    /// # Errors
    ///
    /// Returns the [`Error::Load`] of the first failing stage. The
    /// transaction has been rolled back and the connection released by the
    /// time this returns.
    pub async fn load(&self, batch: &LoadBatch) -> Result<LoadReport> {
        let started = Instant::now();
        let mut session = self.target.connect().await?;

        let result = copy_batch(session.as_mut(), &self.table, batch).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "bulk load failed; rolling back");
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
        }
        session.disconnect().await;

        let rows_committed = result?;
        let report = LoadReport {
            rows_committed,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            table = self.table.name,
            rows = report.rows_committed,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "bulk load committed"
        );
        Ok(report)
    }
}

async fn copy_batch(
    session: &mut dyn CopySession,
    table: &TargetTable,
    batch: &LoadBatch,
) -> Result<u64> {
    session.begin().await?;
    session.prepare_copy(table).await?;
    for row in batch {
        session.write_row(row).await?;
    }

    let acknowledged = session.finish_copy().await?;
    let expected = u64::try_from(batch.len()).unwrap_or(u64::MAX);
    if acknowledged != expected {
        return Err(Error::load(
            LoadStage::Verify,
            format!("store acknowledged {acknowledged} rows, expected {expected}"),
        ));
    }

    session.close_copy().await?;
    session.commit().await?;
    Ok(acknowledged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqload_core::MemoryTable;
    use pqload_test_utils::{FailingCopyTarget, FailurePoint, assert_orders_eq, sample_orders};

    #[tokio::test]
    async fn commits_whole_batch() {
        let table = MemoryTable::new();
        let loader = BulkLoader::new(Arc::new(table.clone()));

        let report = loader.load(&LoadBatch::new(sample_orders())).await.unwrap();

        assert_eq!(report.rows_committed, 3);
        assert_orders_eq(&table.rows(), &sample_orders());
        assert_eq!(table.commits(), 1);
        assert_eq!(table.open_sessions(), 0);
    }

    #[tokio::test]
    async fn empty_batch_commits_nothing() {
        let table = MemoryTable::new();
        let loader = BulkLoader::new(Arc::new(table.clone()));

        let report = loader.load(&LoadBatch::default()).await.unwrap();

        assert_eq!(report.rows_committed, 0);
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.commits(), 1);
    }

    #[tokio::test]
    async fn failure_at_any_stage_leaves_table_unchanged() {
        let rows = sample_orders();
        for point in FailurePoint::all_for(rows.len()) {
            let table = MemoryTable::new();
            let target = FailingCopyTarget::new(table.clone(), point);
            let loader = BulkLoader::new(Arc::new(target));

            let err = loader.load(&LoadBatch::new(rows.clone())).await.unwrap_err();

            assert!(matches!(err, Error::Load { .. }), "{point:?}: {err}");
            assert_eq!(table.row_count(), 0, "{point:?} leaked rows");
            assert_eq!(table.commits(), 0, "{point:?}");
            assert_eq!(table.open_sessions(), 0, "{point:?} leaked a session");
        }
    }

    #[tokio::test]
    async fn reports_failing_stage() {
        let cases = [
            (FailurePoint::Connect, LoadStage::Connect),
            (FailurePoint::WriteRow(1), LoadStage::WriteRow),
            (FailurePoint::Miscount, LoadStage::Verify),
            (FailurePoint::Commit, LoadStage::Commit),
        ];
        for (point, expected) in cases {
            let target = FailingCopyTarget::new(MemoryTable::new(), point);
            let err = BulkLoader::new(Arc::new(target))
                .load(&LoadBatch::new(sample_orders()))
                .await
                .unwrap_err();
            match err {
                Error::Load { stage, .. } => assert_eq!(stage, expected, "{point:?}"),
                other => panic!("{point:?}: unexpected error {other}"),
            }
        }
    }

    #[tokio::test]
    async fn rollback_runs_once_per_failed_transaction() {
        let table = MemoryTable::new();
        let target = FailingCopyTarget::new(table.clone(), FailurePoint::Finish);

        BulkLoader::new(Arc::new(target))
            .load(&LoadBatch::new(sample_orders()))
            .await
            .unwrap_err();

        assert_eq!(table.rollbacks(), 1);
    }

    #[tokio::test]
    async fn failed_rollback_keeps_original_error() {
        let table = MemoryTable::new();
        let target =
            FailingCopyTarget::new(table.clone(), FailurePoint::Commit).with_failing_rollback();

        let err = BulkLoader::new(Arc::new(target))
            .load(&LoadBatch::new(sample_orders()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Load {
                stage: LoadStage::Commit,
                ..
            }
        ));
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.open_sessions(), 0);
    }

    #[tokio::test]
    async fn connect_failure_skips_rollback() {
        let table = MemoryTable::new();
        let target = FailingCopyTarget::new(table.clone(), FailurePoint::Connect);

        BulkLoader::new(Arc::new(target))
            .load(&LoadBatch::new(sample_orders()))
            .await
            .unwrap_err();

        assert_eq!(table.rollbacks(), 0);
        assert_eq!(table.open_sessions(), 0);
    }
}

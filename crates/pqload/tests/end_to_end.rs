//! End-to-end pipeline tests: notification → fetch → decode → load.
//!
//! # Invariants Tested
//!
//! 1. **Row-count fidelity**: committed rows equal the file's declared rows
//! 2. **Atomicity**: a failure at any loader step leaves the table unchanged
//! 3. **Rejection before load**: format and coercion errors commit nothing
//! 4. **Scratch cleanup**: no scratch files survive an invocation

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use pqload::{
    BulkLoader, ColumnarDecoder, NotificationBatch, ObjectRef, Pipeline, PipelineState,
};
use pqload_core::{
    CopyTarget, Error, LoadBatch, LocalDirFetcher, MemoryFetcher, MemoryTable, ObjectFetcher,
    OrderField, ScratchStore,
};
use pqload_test_utils::{
    FailingCopyTarget, FailurePoint, assert_orders_eq, indexed_orders, init_test_logging,
    orders_batch, orders_parquet_bytes, parquet_bytes, parquet_bytes_chunked, sample_orders,
    text_quantity_batch, write_orders_parquet,
};
use tempfile::TempDir;

const BUCKET: &str = "orders-inbox";
const KEY: &str = "daily/orders.parquet";

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    fetcher: MemoryFetcher,
    table: MemoryTable,
    scratch: TempDir,
}

impl Harness {
    fn new() -> Self {
        init_test_logging();
        Self {
            fetcher: MemoryFetcher::new(),
            table: MemoryTable::new(),
            scratch: tempfile::tempdir().unwrap(),
        }
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline_with(Arc::new(self.table.clone()))
    }

    fn pipeline_with(&self, target: Arc<dyn CopyTarget>) -> Pipeline {
        self.pipeline_over(Arc::new(self.fetcher.clone()), target)
    }

    fn pipeline_over(&self, fetcher: Arc<dyn ObjectFetcher>, target: Arc<dyn CopyTarget>) -> Pipeline {
        Pipeline::new(
            fetcher,
            ColumnarDecoder::default(),
            BulkLoader::new(target),
            ScratchStore::new(self.scratch.path()),
        )
    }

    fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).unwrap().count()
    }
}

fn notification(records: &[(&str, &str)]) -> NotificationBatch {
    let records: Vec<_> = records
        .iter()
        .map(|(bucket, key)| {
            serde_json::json!({
                "eventName": "ObjectCreated:Put",
                "s3": { "bucket": { "name": bucket }, "object": { "key": key } }
            })
        })
        .collect();
    let payload = serde_json::json!({ "Records": records });
    NotificationBatch::from_json(payload.to_string().as_bytes()).unwrap()
}

// ============================================================================
// Success paths
// ============================================================================

#[tokio::test]
async fn reference_file_commits_three_rows_in_order() {
    let h = Harness::new();
    let bytes = orders_parquet_bytes(&sample_orders());
    h.fetcher.put(BUCKET, KEY, bytes.clone()).unwrap();

    let ack = h
        .pipeline()
        .process_event(&notification(&[(BUCKET, KEY)]))
        .await
        .unwrap();

    assert_eq!(ack.bucket, BUCKET);
    assert_eq!(ack.key, KEY);
    assert_eq!(ack.rows_loaded, 3);
    assert_eq!(ack.bytes_fetched, bytes.len() as u64);
    assert_orders_eq(&h.table.rows(), &sample_orders());
    assert_eq!(h.table.commits(), 1);
    assert_eq!(h.table.open_sessions(), 0);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn run_reaches_done() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, KEY, orders_parquet_bytes(&sample_orders()))
        .unwrap();

    let outcome = h.pipeline().execute(&ObjectRef::new(BUCKET, KEY)).await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.run.state(), PipelineState::Done);
    assert_eq!(outcome.run.failed_stage(), None);
    assert_eq!(
        outcome.result.unwrap().invocation_id,
        outcome.run.invocation_id()
    );
}

#[tokio::test]
async fn multi_row_group_file_keeps_every_row() {
    let h = Harness::new();
    let rows = indexed_orders(500);
    h.fetcher
        .put(BUCKET, KEY, parquet_bytes_chunked(&orders_batch(&rows), 64))
        .unwrap();

    let ack = h.pipeline().process(&ObjectRef::new(BUCKET, KEY)).await.unwrap();

    assert_eq!(ack.rows_loaded, 500);
    assert_orders_eq(&h.table.rows(), &rows);
}

#[tokio::test]
async fn empty_file_commits_zero_rows() {
    let h = Harness::new();
    h.fetcher.put(BUCKET, KEY, orders_parquet_bytes(&[])).unwrap();

    let ack = h.pipeline().process(&ObjectRef::new(BUCKET, KEY)).await.unwrap();

    assert_eq!(ack.rows_loaded, 0);
    assert_eq!(h.table.row_count(), 0);
    assert_eq!(h.table.commits(), 1);
}

#[tokio::test]
async fn only_first_notification_record_is_processed() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, "first.parquet", orders_parquet_bytes(&sample_orders()))
        .unwrap();
    h.fetcher
        .put(BUCKET, "second.parquet", orders_parquet_bytes(&indexed_orders(7)))
        .unwrap();

    let ack = h
        .pipeline()
        .process_event(&notification(&[
            (BUCKET, "first.parquet"),
            (BUCKET, "second.parquet"),
        ]))
        .await
        .unwrap();

    assert_eq!(ack.key, "first.parquet");
    assert_orders_eq(&h.table.rows(), &sample_orders());
}

#[tokio::test]
async fn encoded_notification_key_is_decoded() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, "daily/orders 2024-05-01.parquet", orders_parquet_bytes(&sample_orders()))
        .unwrap();

    let ack = h
        .pipeline()
        .process_event(&notification(&[(BUCKET, "daily/orders+2024%2D05%2D01.parquet")]))
        .await
        .unwrap();

    assert_eq!(ack.key, "daily/orders 2024-05-01.parquet");
    assert_eq!(h.table.row_count(), 3);
}

#[tokio::test]
async fn local_directory_fetcher_feeds_pipeline() {
    let h = Harness::new();
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join(BUCKET).join("daily")).unwrap();
    write_orders_parquet(&root.path().join(BUCKET).join(KEY), &sample_orders());

    let pipeline = h.pipeline_over(
        Arc::new(LocalDirFetcher::new(root.path())),
        Arc::new(h.table.clone()),
    );
    let ack = pipeline.process(&ObjectRef::new(BUCKET, KEY)).await.unwrap();

    assert_eq!(ack.rows_loaded, 3);
    assert_orders_eq(&h.table.rows(), &sample_orders());
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn text_quantity_rejects_whole_file() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, KEY, parquet_bytes(&text_quantity_batch(&sample_orders())))
        .unwrap();

    let outcome = h.pipeline().execute(&ObjectRef::new(BUCKET, KEY)).await;

    match outcome.result.unwrap_err() {
        Error::Coercion { field, .. } => assert_eq!(field, OrderField::Quantity),
        other => panic!("expected coercion error, got {other}"),
    }
    assert_eq!(outcome.run.state(), PipelineState::Failed);
    assert_eq!(outcome.run.failed_stage(), Some(PipelineState::Decoding));
    assert_eq!(h.table.row_count(), 0);
    assert_eq!(h.table.commits(), 0);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn wrong_extension_is_rejected_without_loading() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, "daily/orders.csv", orders_parquet_bytes(&sample_orders()))
        .unwrap();

    let outcome = h
        .pipeline()
        .execute(&ObjectRef::new(BUCKET, "daily/orders.csv"))
        .await;

    assert!(matches!(
        outcome.result,
        Err(Error::FormatMismatch { .. })
    ));
    assert_eq!(outcome.run.failed_stage(), Some(PipelineState::Decoding));
    assert_eq!(h.table.row_count(), 0);
    assert_eq!(h.table.open_sessions(), 0);
}

#[tokio::test]
async fn missing_object_fails_fetch() {
    let h = Harness::new();

    let outcome = h
        .pipeline()
        .execute(&ObjectRef::new(BUCKET, "absent.parquet"))
        .await;

    assert!(matches!(outcome.result, Err(Error::Fetch { .. })));
    assert_eq!(outcome.run.failed_stage(), Some(PipelineState::Fetching));
    assert_eq!(h.table.commits(), 0);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn unwritable_scratch_fails_fetch() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, KEY, orders_parquet_bytes(&sample_orders()))
        .unwrap();
    let not_a_dir = h.scratch.path().join("occupied");
    std::fs::write(&not_a_dir, b"file").unwrap();

    let pipeline = Pipeline::new(
        Arc::new(h.fetcher.clone()),
        ColumnarDecoder::default(),
        BulkLoader::new(Arc::new(h.table.clone())),
        ScratchStore::new(&not_a_dir),
    );
    let outcome = pipeline.execute(&ObjectRef::new(BUCKET, KEY)).await;

    let err = outcome.result.unwrap_err();
    assert!(matches!(err, Error::Fetch { .. }), "{err}");
    assert_eq!(err.kind(), "fetch");
    assert_eq!(outcome.run.failed_stage(), Some(PipelineState::Fetching));
    assert_eq!(h.table.commits(), 0);
}

#[tokio::test]
async fn empty_notification_is_invalid_event() {
    let h = Harness::new();

    let err = h
        .pipeline()
        .process_event(&notification(&[]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidEvent { .. }));
    assert_eq!(h.table.commits(), 0);
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn load_failure_at_any_step_leaves_table_unchanged() {
    let rows = sample_orders();
    for point in FailurePoint::all_for(rows.len()) {
        let h = Harness::new();
        h.fetcher.put(BUCKET, KEY, orders_parquet_bytes(&rows)).unwrap();

        // Seed the table with a previous invocation's rows.
        BulkLoader::new(Arc::new(h.table.clone()))
            .load(&LoadBatch::new(indexed_orders(2)))
            .await
            .unwrap();
        let count_before = h.table.row_count();

        let target = FailingCopyTarget::new(h.table.clone(), point);
        let outcome = h
            .pipeline_with(Arc::new(target))
            .execute(&ObjectRef::new(BUCKET, KEY))
            .await;

        assert!(
            matches!(outcome.result, Err(Error::Load { .. })),
            "{point:?}: {:?}",
            outcome.result
        );
        assert_eq!(outcome.run.failed_stage(), Some(PipelineState::Loading));
        assert_eq!(h.table.row_count(), count_before, "{point:?} changed the table");
        assert_orders_eq(&h.table.rows(), &indexed_orders(2));
        assert_eq!(h.table.open_sessions(), 0, "{point:?} leaked a session");
        assert_eq!(h.scratch_entries(), 0);
    }
}

#[tokio::test]
async fn redelivery_after_failure_loads_once() {
    let h = Harness::new();
    h.fetcher
        .put(BUCKET, KEY, orders_parquet_bytes(&sample_orders()))
        .unwrap();
    let object = ObjectRef::new(BUCKET, KEY);

    let failing = FailingCopyTarget::new(h.table.clone(), FailurePoint::Commit);
    assert!(h.pipeline_with(Arc::new(failing)).process(&object).await.is_err());
    assert_eq!(h.table.row_count(), 0);

    h.pipeline().process(&object).await.unwrap();
    assert_orders_eq(&h.table.rows(), &sample_orders());
}

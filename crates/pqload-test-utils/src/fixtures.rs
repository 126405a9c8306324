//! Pre-built Parquet fixtures for order files.
//!
//! The canonical order file layout is
//! `[id:int32, FirstName:utf8, LastName:utf8, Email:utf8, qty:int32, total:float64]`.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use pqload_core::OrderRecord;

/// Builds an order record.
pub fn order(
    order_id: i32,
    first_name: &str,
    last_name: &str,
    email: &str,
    quantity: i32,
    order_total: f64,
) -> OrderRecord {
    OrderRecord {
        order_id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: email.to_string(),
        quantity,
        order_total,
    }
}

/// The three-row reference file.
pub fn sample_orders() -> Vec<OrderRecord> {
    vec![
        order(1, "A", "B", "a@x.com", 2, 9.99),
        order(2, "C", "D", "c@x.com", 1, 4.50),
        order(3, "E", "F", "e@x.com", 5, 20.00),
    ]
}

/// `n` distinct rows whose fields all encode their row index.
///
/// Useful for alignment checks: row `i` has `order_id == i`,
/// `first_name == "first-{i}"`, `quantity == i * 10` and so on.
pub fn indexed_orders(n: usize) -> Vec<OrderRecord> {
    (0..n)
        .map(|i| {
            let id = i32::try_from(i).expect("fixture size fits in i32");
            order(
                id,
                &format!("first-{i}"),
                &format!("last-{i}"),
                &format!("user{i}@example.com"),
                id * 10,
                f64::from(id) + 0.25,
            )
        })
        .collect()
}

/// Schema of the canonical order file.
pub fn orders_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("FirstName", DataType::Utf8, false),
        Field::new("LastName", DataType::Utf8, false),
        Field::new("Email", DataType::Utf8, false),
        Field::new("qty", DataType::Int32, false),
        Field::new("total", DataType::Float64, false),
    ]))
}

fn text_column<'a>(rows: &'a [OrderRecord], f: impl Fn(&'a OrderRecord) -> &'a str) -> ArrayRef {
    Arc::new(StringArray::from(
        rows.iter().map(|r| Some(f(r))).collect::<Vec<_>>(),
    ))
}

/// Builds a record batch in the canonical layout.
pub fn orders_batch(rows: &[OrderRecord]) -> RecordBatch {
    RecordBatch::try_new(
        orders_schema(),
        vec![
            Arc::new(Int32Array::from(
                rows.iter().map(|r| r.order_id).collect::<Vec<_>>(),
            )),
            text_column(rows, |r| r.first_name.as_str()),
            text_column(rows, |r| r.last_name.as_str()),
            text_column(rows, |r| r.email.as_str()),
            Arc::new(Int32Array::from(
                rows.iter().map(|r| r.quantity).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(|r| r.order_total).collect::<Vec<_>>(),
            )),
        ],
    )
    .expect("record batch build")
}

/// Builds a batch in the canonical layout except that the quantity column is
/// stored as text.
pub fn text_quantity_batch(rows: &[OrderRecord]) -> RecordBatch {
    let mut fields: Vec<Field> = orders_schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields[4] = Field::new("qty", DataType::Utf8, false);
    let schema = Arc::new(Schema::new(fields));

    let canonical = orders_batch(rows);
    let mut columns: Vec<ArrayRef> = canonical.columns().to_vec();
    columns[4] = Arc::new(StringArray::from(
        rows.iter()
            .map(|r| Some(r.quantity.to_string()))
            .collect::<Vec<_>>(),
    ));

    RecordBatch::try_new(schema, columns).expect("record batch build")
}

/// Serializes a batch to Parquet.
pub fn parquet_bytes(batch: &RecordBatch) -> Bytes {
    write_parquet_with(batch, WriterProperties::builder().build())
}

/// Serializes a batch to Parquet with at most `rows_per_group` rows per row
/// group, so that readers see several batches.
pub fn parquet_bytes_chunked(batch: &RecordBatch, rows_per_group: usize) -> Bytes {
    let props = WriterProperties::builder()
        .set_max_row_group_size(rows_per_group)
        .build();
    write_parquet_with(batch, props)
}

fn write_parquet_with(batch: &RecordBatch, props: WriterProperties) -> Bytes {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer =
        ArrowWriter::try_new(&mut cursor, batch.schema(), Some(props)).expect("parquet writer init");
    writer.write(batch).expect("parquet write");
    writer.close().expect("parquet close");
    Bytes::from(cursor.into_inner())
}

/// Parquet bytes of a canonical order file.
pub fn orders_parquet_bytes(rows: &[OrderRecord]) -> Bytes {
    parquet_bytes(&orders_batch(rows))
}

/// Writes a canonical order file to `path`.
pub fn write_orders_parquet(path: &Path, rows: &[OrderRecord]) {
    std::fs::write(path, orders_parquet_bytes(rows)).expect("write parquet fixture");
}

/// Writes an arbitrary batch as Parquet to `path`.
pub fn write_parquet(path: &Path, batch: &RecordBatch) {
    std::fs::write(path, parquet_bytes(batch)).expect("write parquet fixture");
}

/// Asserts that two record sequences are equal, comparing totals with a
/// small tolerance.
///
/// # Panics
///
/// Panics on the first mismatching row.
pub fn assert_orders_eq(actual: &[OrderRecord], expected: &[OrderRecord]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "row count differs: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (row, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(a.order_id, e.order_id, "order_id at row {row}");
        assert_eq!(a.first_name, e.first_name, "first_name at row {row}");
        assert_eq!(a.last_name, e.last_name, "last_name at row {row}");
        assert_eq!(a.email, e.email, "email at row {row}");
        assert_eq!(a.quantity, e.quantity, "quantity at row {row}");
        assert!(
            (a.order_total - e.order_total).abs() < 1e-9,
            "order_total at row {row}: {} vs {}",
            a.order_total,
            e.order_total
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::file::reader::{FileReader, SerializedFileReader};

    #[test]
    fn sample_file_declares_three_rows() {
        let bytes = orders_parquet_bytes(&sample_orders());
        let reader = SerializedFileReader::new(bytes).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 3);
        assert_eq!(reader.metadata().num_row_groups(), 1);
    }

    #[test]
    fn chunked_file_has_several_row_groups() {
        let bytes = parquet_bytes_chunked(&orders_batch(&indexed_orders(10)), 3);
        let reader = SerializedFileReader::new(bytes).unwrap();
        assert_eq!(reader.metadata().num_row_groups(), 4);
    }

    #[test]
    fn text_quantity_batch_replaces_only_quantity() {
        let batch = text_quantity_batch(&sample_orders());
        assert_eq!(batch.schema().field(4).data_type(), &DataType::Utf8);
        assert_eq!(batch.schema().field(5).data_type(), &DataType::Float64);
    }
}

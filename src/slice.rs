//! Slice Format (spec.md §4.2).
//!
//! Columnar encode/decode of a write batch: `(key, vector,
//! metadata_json)` rows. Grounded on
//! `examples/original_source/src/app/storage/slices.py`
//! (`rows_to_parquet_bytes`/`rows_to_jsonl_bytes`); zstd-compressed
//! Parquet is the default, newline-delimited JSON the fallback,
//! selected per-install via `Config::slice_format`.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float32Array, ListArray, StringArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::config::SliceFormat;
use crate::error::{Error, Result};
use crate::models::VectorRow;

/// `key: Utf8`, `vector: List<Float32>`, `metadata_json: Utf8` — the
/// fixed slice schema from spec.md §4.2.
pub fn slice_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, true))),
            false,
        ),
        Field::new("metadata_json", DataType::Utf8, false),
    ]))
}

pub fn rows_to_batch(rows: &[VectorRow]) -> Result<RecordBatch> {
    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    let metas: Vec<String> = rows
        .iter()
        .map(|r| serde_json::Value::Object(r.metadata.clone()).to_string())
        .collect();

    let mut values = Vec::new();
    let mut offsets = vec![0i32];
    for r in rows {
        values.extend_from_slice(&r.vector);
        offsets.push(values.len() as i32);
    }
    let vector_field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = ListArray::new(
        vector_field,
        OffsetBuffer::new(offsets.into()),
        Arc::new(Float32Array::from(values)),
        None,
    );

    let batch = RecordBatch::try_new(
        slice_schema(),
        vec![
            Arc::new(StringArray::from(keys)) as ArrayRef,
            Arc::new(vector_array) as ArrayRef,
            Arc::new(StringArray::from(metas)) as ArrayRef,
        ],
    )?;
    Ok(batch)
}

pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<VectorRow>> {
    let keys = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::internal("slice: key column has unexpected type"))?;
    let vectors = batch
        .column(1)
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| Error::internal("slice: vector column has unexpected type"))?;
    let metas = batch
        .column(2)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::internal("slice: metadata_json column has unexpected type"))?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let vec_values = vectors.value(i);
        let float_array = vec_values
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| Error::internal("slice: vector item type mismatch"))?;
        let vector: Vec<f32> = float_array.iter().map(|v| v.unwrap_or(0.0)).collect();
        let metadata: serde_json::Map<String, serde_json::Value> =
            match serde_json::from_str(metas.value(i))? {
                serde_json::Value::Object(m) => m,
                _ => serde_json::Map::new(),
            };
        rows.push(VectorRow {
            key: keys.value(i).to_string(),
            vector,
            metadata,
        });
    }
    Ok(rows)
}

pub fn encode_parquet(rows: &[VectorRow]) -> Result<Vec<u8>> {
    let batch = rows_to_batch(rows)?;
    let mut buf = Vec::new();
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
    }
    Ok(buf)
}

pub fn decode_parquet(bytes: &[u8]) -> Result<Vec<VectorRow>> {
    let cursor = Cursor::new(bytes.to_vec());
    let builder = ParquetRecordBatchReaderBuilder::try_new(cursor)
        .map_err(|e| Error::dependency(format!("slice corrupt: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| Error::dependency(format!("slice corrupt: {e}")))?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::dependency(format!("slice corrupt: {e}")))?;
        rows.extend(batch_to_rows(&batch)?);
    }
    Ok(rows)
}

pub fn encode_jsonl(rows: &[VectorRow]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

pub fn decode_jsonl(bytes: &[u8]) -> Result<Vec<VectorRow>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::dependency(format!("slice not valid utf-8: {e}")))?;
    let mut rows = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(line)?);
    }
    Ok(rows)
}

pub fn encode(rows: &[VectorRow], format: SliceFormat) -> Result<Vec<u8>> {
    match format {
        SliceFormat::Parquet => encode_parquet(rows),
        SliceFormat::Jsonl => encode_jsonl(rows),
    }
}

pub fn decode(bytes: &[u8], format: SliceFormat) -> Result<Vec<VectorRow>> {
    match format {
        SliceFormat::Parquet => decode_parquet(bytes),
        SliceFormat::Jsonl => decode_jsonl(bytes),
    }
}

/// Slice file name encoding a millisecond timestamp, so lexicographic
/// listing of `staged/<index>/` is also ingest order (spec.md §4.2).
pub fn staged_key(index: &str, ts_millis: u128, ext: &str) -> String {
    format!("staged/{index}/slice-{ts_millis}.{ext}")
}

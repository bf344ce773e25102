//! ID Map (spec.md §4.3).
//!
//! The durable source of truth for `(key, vector, metadata, aliveness)`.
//! Stored wholesale as a single Parquet file, replaced on each build
//! (spec.md §9's documented "whole-file ID map" scaling limit). Grounded
//! on `examples/original_source/src/app/index/indexer.py`'s
//! `_load_idmap`/`_write_idmap`/`_append_to_idmap`.
//!
//! The in-memory representation keeps each row's full metadata object
//! (not split into typed-column-minus-overlay) — `metadata_json` on
//! disk carries the complete object, and typed filterable columns are
//! a derived Arrow projection built by `schema::SchemaRegistry` at
//! query time. Overlaying typed columns onto a `metadata_json` that
//! already contains the same keys is idempotent, so this costs nothing
//! in correctness and keeps the on-disk format to the base five
//! columns (see DESIGN.md).

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Int64Array, ListArray, StringArray,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Map as JsonMap;

use crate::error::{Error, Result};
use crate::models::VectorRow;

#[derive(Debug, Clone)]
pub struct IdMapRow {
    pub id: i64,
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: JsonMap<String, serde_json::Value>,
    pub alive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IdMap {
    rows: Vec<IdMapRow>,
    key_to_id: HashMap<String, usize>,
}

pub fn idmap_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("key", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, true))),
            false,
        ),
        Field::new("metadata_json", DataType::Utf8, false),
        Field::new("alive", DataType::Boolean, false),
    ]))
}

impl IdMap {
    pub fn empty() -> Self {
        IdMap::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn alive_count(&self) -> u64 {
        self.rows.iter().filter(|r| r.alive).count() as u64
    }

    pub fn rows(&self) -> &[IdMapRow] {
        &self.rows
    }

    fn rebuild_index(&mut self) {
        self.key_to_id.clear();
        for (i, row) in self.rows.iter().enumerate() {
            self.key_to_id.insert(row.key.clone(), i);
        }
    }

    /// Append rows, assigning `id = current_max_id + 1 ..` — or, for a
    /// key that already has a live row, tombstone the old row and
    /// append a fresh one at a new id (last-write-wins while keeping
    /// ids stable, spec.md §4.3/§4.6).
    pub fn append(&mut self, new_rows: Vec<VectorRow>) {
        let mut next_id = self.rows.len() as i64;
        for row in new_rows {
            if let Some(&existing) = self.key_to_id.get(&row.key) {
                self.rows[existing].alive = false;
            }
            self.rows.push(IdMapRow {
                id: next_id,
                key: row.key.clone(),
                vector: row.vector,
                metadata: row.metadata,
                alive: true,
            });
            self.key_to_id.insert(row.key, next_id as usize);
            next_id += 1;
        }
    }

    /// O(n) scan over the in-memory key→id cache; returns only live
    /// rows (spec.md §4.3 "Lookup by key").
    pub fn lookup_by_key(&self, key: &str) -> Option<&IdMapRow> {
        self.key_to_id
            .get(key)
            .map(|&i| &self.rows[i])
            .filter(|r| r.alive)
    }

    pub fn lookup_by_id(&self, id: i64) -> Option<&IdMapRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    /// Flip `alive` to false for matching keys; returns the count
    /// tombstoned.
    pub fn tombstone_by_keys(&mut self, keys: &[String]) -> usize {
        let mut n = 0;
        for key in keys {
            if let Some(&i) = self.key_to_id.get(key) {
                if self.rows[i].alive {
                    self.rows[i].alive = false;
                    n += 1;
                }
            }
        }
        n
    }

    /// Key-ordered page: `(key > cursor, limit N)`, returning only
    /// alive rows and the last key seen as the next cursor.
    pub fn list_page(&self, cursor: Option<&str>, limit: usize) -> (Vec<&IdMapRow>, Option<String>) {
        let mut sorted: Vec<&IdMapRow> = self.rows.iter().filter(|r| r.alive).collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        let start = match cursor {
            Some(c) => sorted.partition_point(|r| r.key.as_str() <= c),
            None => 0,
        };
        let page: Vec<&IdMapRow> = sorted.into_iter().skip(start).take(limit).collect();
        let next_cursor = if page.len() == limit {
            page.last().map(|r| r.key.clone())
        } else {
            None
        };
        (page, next_cursor)
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let ids: Vec<i64> = self.rows.iter().map(|r| r.id).collect();
        let keys: Vec<&str> = self.rows.iter().map(|r| r.key.as_str()).collect();
        let metas: Vec<String> = self
            .rows
            .iter()
            .map(|r| serde_json::Value::Object(r.metadata.clone()).to_string())
            .collect();
        let alive: Vec<bool> = self.rows.iter().map(|r| r.alive).collect();

        let mut values = Vec::new();
        let mut offsets = vec![0i32];
        for r in &self.rows {
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

        Ok(RecordBatch::try_new(
            idmap_schema(),
            vec![
                Arc::new(Int64Array::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(keys)) as ArrayRef,
                Arc::new(vector_array) as ArrayRef,
                Arc::new(StringArray::from(metas)) as ArrayRef,
                Arc::new(BooleanArray::from(alive)) as ArrayRef,
            ],
        )?)
    }

    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| Error::internal("idmap: id column type mismatch"))?;
        let keys = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::internal("idmap: key column type mismatch"))?;
        let vectors = batch
            .column(2)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| Error::internal("idmap: vector column type mismatch"))?;
        let metas = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::internal("idmap: metadata_json column type mismatch"))?;
        let alive = batch
            .column(4)
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| Error::internal("idmap: alive column type mismatch"))?;

        let mut rows = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let vec_values = vectors.value(i);
            let float_array = vec_values
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| Error::internal("idmap: vector item type mismatch"))?;
            let vector: Vec<f32> = float_array.iter().map(|v| v.unwrap_or(0.0)).collect();
            let metadata = match serde_json::from_str(metas.value(i))? {
                serde_json::Value::Object(m) => m,
                _ => JsonMap::new(),
            };
            rows.push(IdMapRow {
                id: ids.value(i),
                key: keys.value(i).to_string(),
                vector,
                metadata,
                alive: alive.value(i),
            });
        }
        let mut map = IdMap {
            rows,
            key_to_id: HashMap::new(),
        };
        map.rebuild_index();
        Ok(map)
    }

    pub fn to_parquet_bytes(&self) -> Result<Vec<u8>> {
        let batch = self.to_record_batch()?;
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

    pub fn from_parquet_bytes(bytes: &[u8]) -> Result<Self> {
        let cursor = Cursor::new(bytes.to_vec());
        let builder = ParquetRecordBatchReaderBuilder::try_new(cursor)
            .map_err(|e| Error::dependency(format!("idmap corrupt: {e}")))?;
        let reader = builder
            .build()
            .map_err(|e| Error::dependency(format!("idmap corrupt: {e}")))?;
        let mut map = IdMap::empty();
        for batch in reader {
            let batch = batch.map_err(|e| Error::dependency(format!("idmap corrupt: {e}")))?;
            let partial = IdMap::from_record_batch(&batch)?;
            map.rows.extend(partial.rows);
        }
        map.rebuild_index();
        Ok(map)
    }
}

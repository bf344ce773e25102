//! Metadata Schema Engine — schema evolution half (spec.md §4.4).
//!
//! Grounded on `examples/original_source/src/app/lance/schema.py`
//! (`infer_arrow_type`, `create_filterable_types`, `prepare_batch_data`)
//! and `.../lance/index_ops.py::upsert_vectors`'s `add_columns` step.
//! The filter-translation half of §4.4 lives in `filter.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde_json::Value;

use crate::error::Result;
use crate::idmap::IdMap;
use crate::models::FieldType;

/// Per-index typed-column registry: which metadata keys have been
/// promoted to filterable columns, and their inferred type, in
/// first-observed order.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    columns: Vec<(String, FieldType)>,
    non_filterable: HashSet<String>,
}

impl SchemaRegistry {
    pub fn new(non_filterable_keys: Vec<String>) -> Self {
        SchemaRegistry {
            columns: Vec::new(),
            non_filterable: non_filterable_keys.into_iter().collect(),
        }
    }

    pub fn columns(&self) -> &[(String, FieldType)] {
        &self.columns
    }

    pub fn column_type(&self, name: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    pub fn is_typed_column(&self, name: &str) -> bool {
        self.column_type(name).is_some()
    }

    /// `bool` -> Bool, `int`-like number -> Int64, other number ->
    /// Float64, everything else -> String — matches
    /// `schema.py::infer_arrow_type` exactly.
    pub fn infer_field_type(value: &Value) -> FieldType {
        match value {
            Value::Bool(_) => FieldType::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    FieldType::Int64
                } else {
                    FieldType::Float64
                }
            }
            _ => FieldType::String,
        }
    }

    /// Adds a nullable column if it doesn't already exist; returns
    /// `true` if this call added it, `false` if it was already present
    /// (the "observed-and-re-read reconciliation" spec.md §4.4 requires
    /// for racing writers — a no-op, not an error).
    pub fn add_nullable_column(&mut self, name: &str, ty: FieldType) -> bool {
        if self.is_typed_column(name) {
            return false;
        }
        self.columns.push((name.to_string(), ty));
        true
    }

    /// Scans a write batch's metadata, inferring a type from the first
    /// non-null value seen per key, and promotes any new key (not
    /// declared non-filterable) to a column. Returns the newly added
    /// column names.
    pub fn evolve(&mut self, rows: &[crate::models::VectorRow]) -> Vec<String> {
        let mut added = Vec::new();
        for row in rows {
            for (key, value) in row.metadata.iter() {
                if value.is_null() || self.non_filterable.contains(key) {
                    continue;
                }
                if !self.is_typed_column(key) {
                    let ty = Self::infer_field_type(value);
                    if self.add_nullable_column(key, ty) {
                        added.push(key.to_string());
                    }
                }
            }
        }
        added
    }

    /// An Arrow projection of the id map suitable for DataFusion SQL
    /// evaluation: `id`, `metadata_json` (the full per-row metadata
    /// object, see idmap.rs's design note), and one column per typed
    /// filterable key, pulling values out of each row's metadata where
    /// present.
    pub fn to_arrow_batch(&self, idmap: &IdMap) -> Result<RecordBatch> {
        let rows = idmap.rows();
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let metas: Vec<String> = rows
            .iter()
            .map(|r| Value::Object(r.metadata.clone()).to_string())
            .collect();

        let mut fields = vec![
            Field::new("id", DataType::Int64, false),
            Field::new("metadata_json", DataType::Utf8, true),
        ];
        let mut arrays: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(metas)),
        ];

        for (name, ty) in &self.columns {
            let values: Vec<Option<Value>> = rows
                .iter()
                .map(|r| r.metadata.get(name).cloned())
                .collect();
            let (arrow_ty, array): (DataType, ArrayRef) = match ty {
                FieldType::Bool => {
                    let v: Vec<Option<bool>> = values.iter().map(|v| v.as_ref().and_then(Value::as_bool)).collect();
                    (DataType::Boolean, Arc::new(BooleanArray::from(v)))
                }
                FieldType::Int64 => {
                    let v: Vec<Option<i64>> = values.iter().map(|v| v.as_ref().and_then(Value::as_i64)).collect();
                    (DataType::Int64, Arc::new(Int64Array::from(v)))
                }
                FieldType::Float64 => {
                    let v: Vec<Option<f64>> = values.iter().map(|v| v.as_ref().and_then(Value::as_f64)).collect();
                    (DataType::Float64, Arc::new(Float64Array::from(v)))
                }
                FieldType::String => {
                    let v: Vec<Option<String>> = values
                        .iter()
                        .map(|v| v.as_ref().map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }))
                        .collect();
                    (DataType::Utf8, Arc::new(StringArray::from(v)))
                }
            };
            fields.push(Field::new(name, arrow_ty, true));
            arrays.push(array);
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorRow;
    use serde_json::json;

    fn row(meta: Value) -> VectorRow {
        VectorRow {
            key: "k".into(),
            vector: vec![0.0],
            metadata: meta.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn infers_types_from_first_batch() {
        let mut reg = SchemaRegistry::new(vec![]);
        let rows = vec![row(json!({"cat": "x", "score": 7, "active": true, "ratio": 0.5}))];
        let added = reg.evolve(&rows);
        assert_eq!(added.len(), 4);
        assert_eq!(reg.column_type("cat"), Some(FieldType::String));
        assert_eq!(reg.column_type("score"), Some(FieldType::Int64));
        assert_eq!(reg.column_type("active"), Some(FieldType::Bool));
        assert_eq!(reg.column_type("ratio"), Some(FieldType::Float64));
    }

    #[test]
    fn non_filterable_keys_never_become_columns() {
        let mut reg = SchemaRegistry::new(vec!["secret".to_string()]);
        reg.evolve(&[row(json!({"secret": "shh", "cat": "x"}))]);
        assert!(!reg.is_typed_column("secret"));
        assert!(reg.is_typed_column("cat"));
    }

    #[test]
    fn add_nullable_column_is_idempotent_for_racing_writers() {
        let mut reg = SchemaRegistry::new(vec![]);
        assert!(reg.add_nullable_column("cat", FieldType::String));
        assert!(!reg.add_nullable_column("cat", FieldType::String));
        assert_eq!(reg.columns().len(), 1);
    }

    #[test]
    fn new_keys_in_later_batches_backfill_as_null() {
        let mut reg = SchemaRegistry::new(vec![]);
        let mut idmap = IdMap::empty();
        idmap.append(vec![VectorRow {
            key: "a".into(),
            vector: vec![1.0],
            metadata: json!({"cat": "x"}).as_object().unwrap().clone(),
        }]);
        reg.evolve(idmap.rows().iter().map(|r| VectorRow {
            key: r.key.clone(),
            vector: r.vector.clone(),
            metadata: r.metadata.clone(),
        }).collect::<Vec<_>>().as_slice());

        idmap.append(vec![VectorRow {
            key: "b".into(),
            vector: vec![2.0],
            metadata: json!({"cat": "y", "score": 5}).as_object().unwrap().clone(),
        }]);
        let new_rows = vec![VectorRow {
            key: "b".into(),
            vector: vec![2.0],
            metadata: json!({"cat": "y", "score": 5}).as_object().unwrap().clone(),
        }];
        reg.evolve(&new_rows);

        let batch = reg.to_arrow_batch(&idmap).unwrap();
        let score_col = batch
            .column_by_name("score")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(score_col.is_null(0));
        assert_eq!(score_col.value(1), 5);
    }
}

//! Metadata Schema Engine — filter translation half (spec.md §4.4).
//!
//! `FilterExpr` is the single source of truth for filter semantics: its
//! `matches` method is the in-process evaluator (used for the
//! postfilter path and as the reference semantics for pushdown≡
//! postfilter equivalence tests, spec.md §8/§9 "Brute-force fallback
//! path"), and `to_sql` is the WHERE-clause translator used for the
//! prefilter path. Grounded on
//! `examples/original_source/src/app/lance/filter_translate.py`
//! (`aws_filter_to_where`) for SQL translation and
//! `.../lance/index_ops.py::_apply_python_filter` for the in-process
//! semantics (the most complete evaluator in the corpus — it alone
//! carries `in`/`not_in`, which `filter_engine.py` and
//! `filter_translate.py` each only partially cover).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::SchemaRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum FilterExpr {
    And { operands: Vec<FilterExpr> },
    Or { operands: Vec<FilterExpr> },
    Not { operand: Box<FilterExpr> },
    Equals { metadata_key: String, value: Value },
    NotEquals { metadata_key: String, value: Value },
    GreaterThan { metadata_key: String, value: Value },
    GreaterEqual { metadata_key: String, value: Value },
    LessThan { metadata_key: String, value: Value },
    LessEqual { metadata_key: String, value: Value },
    In { metadata_key: String, value: Value },
    NotIn { metadata_key: String, value: Value },
    Exists { metadata_key: String, value: Value },
}

impl FilterExpr {
    /// In-process predicate evaluation over a row's full metadata
    /// object — the reference semantics (spec.md §4.4, §9).
    pub fn matches(&self, metadata: &serde_json::Map<String, Value>) -> bool {
        match self {
            FilterExpr::And { operands } => operands.iter().all(|o| o.matches(metadata)),
            FilterExpr::Or { operands } => operands.iter().any(|o| o.matches(metadata)),
            FilterExpr::Not { operand } => !operand.matches(metadata),
            FilterExpr::Equals { metadata_key, value } => {
                metadata.get(metadata_key) == Some(value)
            }
            FilterExpr::NotEquals { metadata_key, value } => {
                metadata.get(metadata_key) != Some(value)
            }
            FilterExpr::In { metadata_key, value } => match value.as_array() {
                Some(list) => metadata
                    .get(metadata_key)
                    .map(|v| list.contains(v))
                    .unwrap_or(false),
                None => false,
            },
            FilterExpr::NotIn { metadata_key, value } => match value.as_array() {
                Some(list) => !metadata
                    .get(metadata_key)
                    .map(|v| list.contains(v))
                    .unwrap_or(false),
                None => true,
            },
            FilterExpr::GreaterThan { metadata_key, value } => {
                cmp_num(metadata.get(metadata_key), value, |a, b| a > b)
            }
            FilterExpr::GreaterEqual { metadata_key, value } => {
                cmp_num(metadata.get(metadata_key), value, |a, b| a >= b)
            }
            FilterExpr::LessThan { metadata_key, value } => {
                cmp_num(metadata.get(metadata_key), value, |a, b| a < b)
            }
            FilterExpr::LessEqual { metadata_key, value } => {
                cmp_num(metadata.get(metadata_key), value, |a, b| a <= b)
            }
            FilterExpr::Exists { metadata_key, value } => {
                let present = metadata.get(metadata_key).is_some();
                let want = value.as_bool().unwrap_or(true);
                present == want
            }
        }
    }

    /// Every leaf references a typed column known to `registry` — the
    /// pushdown-eligibility test of spec.md §4.7 step 3.
    pub fn all_leaves_typed(&self, registry: &SchemaRegistry) -> bool {
        match self {
            FilterExpr::And { operands } | FilterExpr::Or { operands } => {
                operands.iter().all(|o| o.all_leaves_typed(registry))
            }
            FilterExpr::Not { operand } => operand.all_leaves_typed(registry),
            _ => registry.is_typed_column(self.metadata_key()),
        }
    }

    fn metadata_key(&self) -> &str {
        match self {
            FilterExpr::Equals { metadata_key, .. }
            | FilterExpr::NotEquals { metadata_key, .. }
            | FilterExpr::GreaterThan { metadata_key, .. }
            | FilterExpr::GreaterEqual { metadata_key, .. }
            | FilterExpr::LessThan { metadata_key, .. }
            | FilterExpr::LessEqual { metadata_key, .. }
            | FilterExpr::In { metadata_key, .. }
            | FilterExpr::NotIn { metadata_key, .. }
            | FilterExpr::Exists { metadata_key, .. } => metadata_key,
            FilterExpr::And { .. } | FilterExpr::Or { .. } | FilterExpr::Not { .. } => "",
        }
    }

    /// Translate to a SQL WHERE-clause fragment: typed columns get a
    /// bare column reference, everything else falls back to
    /// `json_extract(metadata_json, '$.key')` (spec.md §4.4).
    pub fn to_sql(&self, registry: &SchemaRegistry) -> String {
        match self {
            FilterExpr::And { operands } => {
                if operands.is_empty() {
                    return "TRUE".to_string();
                }
                let parts: Vec<String> = operands.iter().map(|o| o.to_sql(registry)).collect();
                format!("({})", parts.join(" AND "))
            }
            FilterExpr::Or { operands } => {
                if operands.is_empty() {
                    return "TRUE".to_string();
                }
                let parts: Vec<String> = operands.iter().map(|o| o.to_sql(registry)).collect();
                format!("({})", parts.join(" OR "))
            }
            FilterExpr::Not { operand } => format!("NOT ({})", operand.to_sql(registry)),
            FilterExpr::Equals { metadata_key, value } => {
                leaf_cmp(registry, metadata_key, "=", value)
            }
            FilterExpr::NotEquals { metadata_key, value } => {
                leaf_cmp(registry, metadata_key, "!=", value)
            }
            FilterExpr::GreaterThan { metadata_key, value } => {
                leaf_numeric_cmp(registry, metadata_key, ">", value)
            }
            FilterExpr::GreaterEqual { metadata_key, value } => {
                leaf_numeric_cmp(registry, metadata_key, ">=", value)
            }
            FilterExpr::LessThan { metadata_key, value } => {
                leaf_numeric_cmp(registry, metadata_key, "<", value)
            }
            FilterExpr::LessEqual { metadata_key, value } => {
                leaf_numeric_cmp(registry, metadata_key, "<=", value)
            }
            FilterExpr::In { metadata_key, value } => {
                let items = match value.as_array() {
                    Some(list) if !list.is_empty() => list,
                    _ => return "FALSE".to_string(),
                };
                let column = column_ref(registry, metadata_key);
                let literals: Vec<String> = items.iter().map(escape_value).collect();
                format!("{} IN ({})", column, literals.join(", "))
            }
            FilterExpr::NotIn { metadata_key, value } => {
                let items = match value.as_array() {
                    Some(list) if !list.is_empty() => list,
                    _ => return "TRUE".to_string(),
                };
                let column = column_ref(registry, metadata_key);
                let literals: Vec<String> = items.iter().map(escape_value).collect();
                format!("{} NOT IN ({})", column, literals.join(", "))
            }
            FilterExpr::Exists { metadata_key, value } => {
                let column = column_ref(registry, metadata_key);
                if value.as_bool().unwrap_or(true) {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
        }
    }
}

fn cmp_num(actual: Option<&Value>, want: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.and_then(Value::as_f64), want.as_f64()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// A bare column reference for a typed key, or a `json_extract` fallback.
fn column_ref(registry: &SchemaRegistry, metadata_key: &str) -> String {
    if registry.is_typed_column(metadata_key) {
        format!("\"{}\"", escape_identifier(metadata_key))
    } else {
        format!(
            "json_extract(metadata_json, '$.{}')",
            escape_json_key(metadata_key)
        )
    }
}

fn leaf_cmp(registry: &SchemaRegistry, metadata_key: &str, op: &str, value: &Value) -> String {
    if metadata_key.is_empty() {
        return "TRUE".to_string();
    }
    format!("{} {} {}", column_ref(registry, metadata_key), op, escape_value(value))
}

fn leaf_numeric_cmp(registry: &SchemaRegistry, metadata_key: &str, op: &str, value: &Value) -> String {
    if metadata_key.is_empty() {
        return "TRUE".to_string();
    }
    let column = column_ref(registry, metadata_key);
    let column = if registry.is_typed_column(metadata_key) {
        column
    } else {
        format!("CAST({column} AS DOUBLE)")
    };
    format!("{} {} {}", column, op, escape_value(value))
}

fn escape_identifier(key: &str) -> String {
    key.replace('"', "\"\"")
}

fn escape_json_key(key: &str) -> String {
    key.replace('"', "\\\"")
}

/// Type-correct literal formatting: booleans as `TRUE`/`FALSE`,
/// numbers unquoted, strings with doubled single quotes. Every leaf
/// must round-trip through this — injection via `value` is a
/// correctness requirement (spec.md §4.4).
fn escape_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Fuzz harness over arbitrary filter trees (spec.md §9: "fuzz-testing
/// the translator against arbitrary filter trees is part of §8").
/// Grounded on the pack's own use of `proptest` for tree-shaped input
/// generation (e.g. `stratadb-labs-strata-core`, `jayminwest-kota-db`).
#[cfg(test)]
mod fuzz {
    use super::*;
    use proptest::prelude::*;

    fn registry_with(cols: &[(&str, crate::models::FieldType)]) -> SchemaRegistry {
        let mut reg = SchemaRegistry::new(vec![]);
        for (name, ty) in cols {
            reg.add_nullable_column(name, *ty);
        }
        reg
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| serde_json::json!(n)),
            "[a-zA-Z0-9' \";-]{0,12}".prop_map(Value::String),
        ]
    }

    fn arb_leaf() -> impl Strategy<Value = FilterExpr> {
        let key = "[a-z]{1,6}";
        prop_oneof![
            (key, arb_value()).prop_map(|(k, v)| FilterExpr::Equals { metadata_key: k, value: v }),
            (key, arb_value()).prop_map(|(k, v)| FilterExpr::NotEquals { metadata_key: k, value: v }),
            (key, arb_value()).prop_map(|(k, v)| FilterExpr::GreaterThan { metadata_key: k, value: v }),
            (key, arb_value()).prop_map(|(k, v)| FilterExpr::LessEqual { metadata_key: k, value: v }),
            (key, prop::collection::vec(arb_value(), 0..4))
                .prop_map(|(k, v)| FilterExpr::In { metadata_key: k, value: Value::Array(v) }),
            (key, any::<bool>()).prop_map(|(k, b)| FilterExpr::Exists { metadata_key: k, value: Value::Bool(b) }),
        ]
    }

    fn arb_filter_expr() -> impl Strategy<Value = FilterExpr> {
        arb_leaf().prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(|operands| FilterExpr::And { operands }),
                prop::collection::vec(inner.clone(), 1..4).prop_map(|operands| FilterExpr::Or { operands }),
                inner.prop_map(|operand| FilterExpr::Not { operand: Box::new(operand) }),
            ]
        })
    }

    fn arb_metadata() -> impl Strategy<Value = serde_json::Map<String, Value>> {
        prop::collection::hash_map("[a-z]{1,6}", arb_value(), 0..5)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        /// The translator must never panic on an arbitrary filter tree,
        /// no matter which keys are typed vs. fall back to `json_extract`.
        #[test]
        fn to_sql_never_panics(tree in arb_filter_expr()) {
            let untyped = SchemaRegistry::new(vec![]);
            let _ = tree.to_sql(&untyped);
            let typed = registry_with(&[("a", crate::models::FieldType::String), ("b", crate::models::FieldType::Int64)]);
            let _ = tree.to_sql(&typed);
        }

        /// The in-process evaluator must never panic on an arbitrary
        /// filter tree against arbitrary metadata.
        #[test]
        fn matches_never_panics(tree in arb_filter_expr(), metadata in arb_metadata()) {
            let _ = tree.matches(&metadata);
        }

        /// Injection-safety invariant (spec.md §4.4): every string
        /// literal's escaped form has balanced quote-doubling, i.e. an
        /// even count of `'` inside its delimiters, for any input
        /// including quotes, semicolons, and SQL keywords.
        #[test]
        fn string_literal_escaping_is_always_balanced(s in ".*") {
            let escaped = escape_value(&Value::String(s));
            prop_assert!(escaped.starts_with('\'') && escaped.ends_with('\''));
            let inner = &escaped[1..escaped.len() - 1];
            prop_assert_eq!(inner.matches('\'').count() % 2, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with(cols: &[(&str, crate::models::FieldType)]) -> SchemaRegistry {
        let mut reg = SchemaRegistry::new(vec![]);
        for (name, ty) in cols {
            reg.add_nullable_column(name, *ty);
        }
        reg
    }

    #[test]
    fn equals_matches_in_process() {
        let f = FilterExpr::Equals {
            metadata_key: "cat".into(),
            value: json!("x"),
        };
        let meta = json!({"cat": "x"}).as_object().unwrap().clone();
        assert!(f.matches(&meta));
        let meta2 = json!({"cat": "y"}).as_object().unwrap().clone();
        assert!(!f.matches(&meta2));
    }

    #[test]
    fn typed_column_emits_bare_reference() {
        let reg = registry_with(&[("cat", crate::models::FieldType::String)]);
        let f = FilterExpr::Equals {
            metadata_key: "cat".into(),
            value: json!("x"),
        };
        assert_eq!(f.to_sql(&reg), "\"cat\" = 'x'");
    }

    #[test]
    fn untyped_key_falls_back_to_json_extract() {
        let reg = SchemaRegistry::new(vec![]);
        let f = FilterExpr::Equals {
            metadata_key: "cat".into(),
            value: json!("x"),
        };
        assert_eq!(
            f.to_sql(&reg),
            "json_extract(metadata_json, '$.cat') = 'x'"
        );
    }

    #[test]
    fn string_literal_escapes_single_quotes() {
        let reg = SchemaRegistry::new(vec![]);
        let f = FilterExpr::Equals {
            metadata_key: "name".into(),
            value: json!("O'Brien"),
        };
        assert_eq!(
            f.to_sql(&reg),
            "json_extract(metadata_json, '$.name') = 'O''Brien'"
        );
    }

    #[test]
    fn sql_injection_attempt_in_value_is_neutralized() {
        let reg = SchemaRegistry::new(vec![]);
        let malicious = "x'; DROP TABLE idmap; --";
        let f = FilterExpr::Equals {
            metadata_key: "cat".into(),
            value: json!(malicious),
        };
        let sql = f.to_sql(&reg);
        assert_eq!(
            sql,
            "json_extract(metadata_json, '$.cat') = 'x''; DROP TABLE idmap; --'"
        );
    }

    #[test]
    fn empty_in_list_is_false_not_equals_never_matches() {
        let reg = SchemaRegistry::new(vec![]);
        let f = FilterExpr::In {
            metadata_key: "cat".into(),
            value: json!([]),
        };
        assert_eq!(f.to_sql(&reg), "FALSE");
        let meta = json!({"cat": "x"}).as_object().unwrap().clone();
        assert!(!f.matches(&meta));
    }

    #[test]
    fn empty_not_in_list_is_true() {
        let reg = SchemaRegistry::new(vec![]);
        let f = FilterExpr::NotIn {
            metadata_key: "cat".into(),
            value: json!([]),
        };
        assert_eq!(f.to_sql(&reg), "TRUE");
    }

    #[test]
    fn and_or_not_compose_with_parens() {
        let reg = SchemaRegistry::new(vec![]);
        let f = FilterExpr::And {
            operands: vec![
                FilterExpr::Equals { metadata_key: "a".into(), value: json!(1) },
                FilterExpr::Not {
                    operand: Box::new(FilterExpr::Equals { metadata_key: "b".into(), value: json!(2) }),
                },
            ],
        };
        let sql = f.to_sql(&reg);
        assert!(sql.starts_with('('));
        assert!(sql.contains("AND"));
        assert!(sql.contains("NOT ("));
    }

    #[test]
    fn exists_maps_to_is_not_null_or_is_null() {
        let reg = SchemaRegistry::new(vec![]);
        let f_true = FilterExpr::Exists { metadata_key: "cat".into(), value: json!(true) };
        assert!(f_true.to_sql(&reg).ends_with("IS NOT NULL"));
        let f_false = FilterExpr::Exists { metadata_key: "cat".into(), value: json!(false) };
        assert!(f_false.to_sql(&reg).ends_with("IS NULL"));
    }

    #[test]
    fn pushdown_equivalent_to_postfilter_on_sample_dataset() {
        let reg = registry_with(&[
            ("cat", crate::models::FieldType::String),
            ("score", crate::models::FieldType::Int64),
        ]);
        let rows = vec![
            json!({"cat": "x", "score": 7}),
            json!({"cat": "y", "score": 3}),
            json!({"cat": "x", "score": 1}),
        ];
        let f = FilterExpr::And {
            operands: vec![
                FilterExpr::Equals { metadata_key: "cat".into(), value: json!("x") },
                FilterExpr::GreaterThan { metadata_key: "score".into(), value: json!(2) },
            ],
        };
        // in-process (postfilter reference semantics)
        let postfilter: Vec<bool> = rows
            .iter()
            .map(|r| f.matches(r.as_object().unwrap()))
            .collect();
        assert_eq!(postfilter, vec![true, false, false]);

        // the translated WHERE clause must reference the same typed
        // columns for both predicates (pushdown-eligible).
        assert!(f.all_leaves_typed(&reg));
        let sql = f.to_sql(&reg);
        assert!(sql.contains("\"cat\""));
        assert!(sql.contains("\"score\""));
    }
}

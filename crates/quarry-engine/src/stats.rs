//! Statistics store: row counts, column cardinalities, null fractions,
//! indexes and predicate selectivity.
//!
//! Unknown collections and columns fall back to fixed defaults so the
//! planner can always produce an estimate.

use parking_lot::RwLock;
use quarry_core::value::{canonical_string, sort_cmp};
use quarry_core::{BinaryOp, DataNode, Expr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

pub const DEFAULT_ROW_COUNT: u64 = 1000;
/// Cardinality of an unknown column as a fraction of the row count
pub const DEFAULT_CARDINALITY_FRACTION: f64 = 0.1;
pub const DEFAULT_NULL_FRACTION: f64 = 0.1;
pub const DEFAULT_ROW_SIZE: f64 = 100.0;
/// Selectivity of range comparisons and of anything unrecognized
pub const DEFAULT_SELECTIVITY: f64 = 0.333;
pub const LIKE_SELECTIVITY: f64 = 0.25;
/// Columns with at most this many distinct values get a histogram
pub const HISTOGRAM_MAX_DISTINCT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    BTree,
    Hash,
    Lsm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub kind: IndexKind,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            kind: IndexKind::BTree,
            unique: false,
            primary: false,
        }
    }

    /// Leading column, the only one usable for a single-column probe
    pub fn leading(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnStats {
    pub cardinality: u64,
    pub null_fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    /// Canonical value -> frequency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub histogram: Option<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub row_count: u64,
    pub avg_row_size: f64,
    #[serde(default)]
    pub columns: HashMap<String, ColumnStats>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

impl Default for CollectionStats {
    fn default() -> Self {
        Self {
            row_count: DEFAULT_ROW_COUNT,
            avg_row_size: DEFAULT_ROW_SIZE,
            columns: HashMap::new(),
            indexes: Vec::new(),
        }
    }
}

impl CollectionStats {
    /// Column entry for a possibly qualified path (`u.age` -> `age`)
    fn column(&self, path: &str) -> Option<&ColumnStats> {
        self.columns.get(path).or_else(|| {
            path.split_once('.')
                .and_then(|(_, rest)| self.columns.get(rest))
        })
    }
}

/// Thread-safe statistics store.
///
/// Readers and mutators are serialized by an `RwLock`; entries are small so
/// lookups clone what they return.
#[derive(Debug, Default)]
pub struct StatisticsStore {
    collections: RwLock<HashMap<String, CollectionStats>>,
}

fn strip_qualifier(path: &str) -> &str {
    path.split_once('.').map_or(path, |(_, rest)| rest)
}

impl StatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known(&self, collection: &str) -> bool {
        self.collections.read().contains_key(collection)
    }

    pub fn row_count(&self, collection: &str) -> u64 {
        self.collections
            .read()
            .get(collection)
            .map_or(DEFAULT_ROW_COUNT, |c| c.row_count)
    }

    pub fn avg_row_size(&self, collection: &str) -> f64 {
        self.collections
            .read()
            .get(collection)
            .map_or(DEFAULT_ROW_SIZE, |c| c.avg_row_size)
    }

    /// Distinct values of a column; 10% of the row count when unknown
    pub fn cardinality(&self, collection: &str, column: &str) -> u64 {
        let collections = self.collections.read();
        let stats = collections.get(collection);
        if let Some(col) = stats.and_then(|c| c.column(column)) {
            return col.cardinality.max(1);
        }
        let rows = stats.map_or(DEFAULT_ROW_COUNT, |c| c.row_count);
        ((rows as f64 * DEFAULT_CARDINALITY_FRACTION).round() as u64).max(1)
    }

    pub fn null_fraction(&self, collection: &str, column: &str) -> f64 {
        self.collections
            .read()
            .get(collection)
            .and_then(|c| c.column(column))
            .map_or(DEFAULT_NULL_FRACTION, |c| c.null_fraction)
    }

    pub fn has_index(&self, collection: &str, column: &str) -> bool {
        self.index_on(collection, column).is_some()
    }

    /// Index whose leading column is `column`
    pub fn index_on(&self, collection: &str, column: &str) -> Option<IndexInfo> {
        let column = if self.column_exists(collection, column) {
            column
        } else {
            strip_qualifier(column)
        };
        self.collections.read().get(collection).and_then(|c| {
            c.indexes
                .iter()
                .find(|i| i.leading() == Some(column))
                .cloned()
        })
    }

    fn column_exists(&self, collection: &str, column: &str) -> bool {
        self.collections.read().get(collection).is_some_and(|c| {
            c.columns.contains_key(column) || c.indexes.iter().any(|i| i.leading() == Some(column))
        })
    }

    pub fn indexes(&self, collection: &str) -> Vec<IndexInfo> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, collection: &str) -> Option<CollectionStats> {
        self.collections.read().get(collection).cloned()
    }

    // ------------------------------------------------------------------
    // Mutators
    // ------------------------------------------------------------------

    pub fn set_row_count(&self, collection: &str, rows: u64) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .row_count = rows;
    }

    pub fn set_column(&self, collection: &str, column: &str, stats: ColumnStats) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .columns
            .insert(column.to_string(), stats);
    }

    /// Register an index, replacing one of the same name
    pub fn register_index(&self, collection: &str, index: IndexInfo) {
        let mut collections = self.collections.write();
        let entry = collections.entry(collection.to_string()).or_default();
        entry.indexes.retain(|i| i.name != index.name);
        debug!(collection, index = %index.name, "registered index");
        entry.indexes.push(index);
    }

    /// Drop an index by name from any collection
    pub fn drop_index(&self, name: &str) -> bool {
        let mut dropped = false;
        for stats in self.collections.write().values_mut() {
            let before = stats.indexes.len();
            stats.indexes.retain(|i| i.name != name);
            dropped |= stats.indexes.len() != before;
        }
        dropped
    }

    pub fn remove(&self, collection: &str) {
        self.collections.write().remove(collection);
    }

    pub fn clear(&self) {
        self.collections.write().clear();
    }

    /// Derive statistics for a collection from its rows.
    ///
    /// Indexes already registered for the collection are kept.
    pub fn analyze(&self, collection: &str, rows: &[Value]) {
        let row_count = rows.len() as u64;
        let avg_row_size = if rows.is_empty() {
            DEFAULT_ROW_SIZE
        } else {
            rows.iter().map(|r| r.to_string().len() as f64).sum::<f64>() / rows.len() as f64
        };

        let mut names: Vec<&str> = rows
            .iter()
            .filter_map(Value::as_object)
            .flat_map(|o| o.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();

        let mut columns = HashMap::with_capacity(names.len());
        for name in names {
            let mut nulls = 0u64;
            let mut counts: HashMap<String, u64> = HashMap::new();
            let mut min: Option<&Value> = None;
            let mut max: Option<&Value> = None;
            for row in rows {
                match row.get(name) {
                    None | Some(Value::Null) => nulls += 1,
                    Some(v) => {
                        *counts.entry(canonical_string(v)).or_default() += 1;
                        if min.map_or(true, |m| sort_cmp(v, m, true) == Ordering::Less) {
                            min = Some(v);
                        }
                        if max.map_or(true, |m| sort_cmp(v, m, true) == Ordering::Greater) {
                            max = Some(v);
                        }
                    }
                }
            }
            let histogram = (counts.len() <= HISTOGRAM_MAX_DISTINCT)
                .then(|| counts.iter().map(|(k, v)| (k.clone(), *v)).collect());
            columns.insert(
                name.to_string(),
                ColumnStats {
                    cardinality: counts.len() as u64,
                    null_fraction: if row_count == 0 {
                        0.0
                    } else {
                        nulls as f64 / row_count as f64
                    },
                    min: min.cloned(),
                    max: max.cloned(),
                    histogram,
                },
            );
        }

        let mut collections = self.collections.write();
        let indexes = collections
            .remove(collection)
            .map(|c| c.indexes)
            .unwrap_or_default();
        debug!(collection, rows = row_count, "analyzed collection");
        collections.insert(
            collection.to_string(),
            CollectionStats {
                row_count,
                avg_row_size,
                columns,
                indexes,
            },
        );
    }

    /// Analyze every top-level array of objects in a data node
    pub fn analyze_node(&self, data: &dyn DataNode) -> usize {
        let mut analyzed = 0;
        for (name, value) in data.children("") {
            if let Value::Array(rows) = value {
                if rows.iter().all(Value::is_object) {
                    self.analyze(&name, rows);
                    analyzed += 1;
                }
            }
        }
        analyzed
    }

    // ------------------------------------------------------------------
    // Selectivity
    // ------------------------------------------------------------------

    /// Estimated fraction of rows of `collection` kept by `predicate`
    pub fn selectivity(&self, collection: Option<&str>, predicate: &Expr) -> f64 {
        let collection = collection.unwrap_or_default();
        let s = match predicate {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => self.selectivity(Some(collection), left) * self.selectivity(Some(collection), right),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
            } => {
                let a = self.selectivity(Some(collection), left);
                let b = self.selectivity(Some(collection), right);
                1.0 - (1.0 - a) * (1.0 - b)
            }
            Expr::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Field(f), Expr::Literal(v)) | (Expr::Literal(v), Expr::Field(f)) => {
                    self.equality_selectivity(collection, f, Some(v))
                }
                (Expr::Field(f), _) | (_, Expr::Field(f)) => {
                    self.equality_selectivity(collection, f, None)
                }
                _ => DEFAULT_SELECTIVITY,
            },
            Expr::Like { .. } => LIKE_SELECTIVITY,
            Expr::In { expr, list, negated } => {
                let k = list.len() as f64;
                let card = match expr.as_ref() {
                    Expr::Field(f) => self.cardinality(collection, f) as f64,
                    _ => DEFAULT_ROW_COUNT as f64 * DEFAULT_CARDINALITY_FRACTION,
                };
                let s = (k / card).min(1.0);
                if *negated {
                    1.0 - s
                } else {
                    s
                }
            }
            Expr::IsNull { expr, negated } => {
                let s = match expr.as_ref() {
                    Expr::Field(f) => self.null_fraction(collection, f),
                    _ => DEFAULT_NULL_FRACTION,
                };
                if *negated {
                    1.0 - s
                } else {
                    s
                }
            }
            Expr::Not(inner) => 1.0 - self.selectivity(Some(collection), inner),
            _ => DEFAULT_SELECTIVITY,
        };
        s.clamp(0.0, 1.0)
    }

    fn equality_selectivity(&self, collection: &str, field: &str, literal: Option<&Value>) -> f64 {
        let collections = self.collections.read();
        let stats = collections.get(collection);
        let column = stats.and_then(|c| c.column(field));
        if let (Some(literal), Some(stats), Some(column)) = (literal, stats, column) {
            if let Some(histogram) = &column.histogram {
                let freq = histogram.get(&canonical_string(literal)).copied().unwrap_or(0);
                let rows = stats.row_count.max(1) as f64;
                return (freq as f64 / rows).max(1.0 / rows);
            }
        }
        drop(collections);
        1.0 / self.cardinality(collection, field) as f64
    }
}

/// Collections named anywhere in a tree of sources, deduplicated
pub fn referenced_collections(action: &quarry_core::Action) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for node in action.iter() {
        let names: Vec<&str> = match &node.params {
            quarry_core::Params::Select(p) => p.from.iter().map(|s| s.name.as_str()).collect(),
            quarry_core::Params::Join(p) => vec![p.target.name.as_str()],
            quarry_core::Params::Write(p) => vec![p.target.as_str()],
            _ => Vec::new(),
        };
        for name in names {
            if seen.insert(name.to_string()) {
                out.push(name.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::JsonNode;
    use serde_json::json;

    fn gt(field: &str, n: i64) -> Expr {
        Expr::binary(BinaryOp::Gt, Expr::field(field), Expr::lit(n))
    }

    fn eq(field: &str, v: Value) -> Expr {
        Expr::eq(Expr::field(field), Expr::Literal(v))
    }

    #[test]
    fn test_defaults_for_unknown_collections() {
        let stats = StatisticsStore::new();
        assert_eq!(stats.row_count("users"), 1000);
        assert_eq!(stats.cardinality("users", "age"), 100);
        assert!((stats.null_fraction("users", "age") - 0.1).abs() < 1e-9);
        assert!(!stats.has_index("users", "age"));
    }

    #[test]
    fn test_selectivity_rules() {
        let stats = StatisticsStore::new();
        let eq_s = stats.selectivity(Some("users"), &eq("age", json!(30)));
        assert!((eq_s - 0.01).abs() < 1e-9);
        assert!((stats.selectivity(Some("users"), &gt("age", 30)) - 0.333).abs() < 1e-9);

        let like = Expr::Like {
            expr: Box::new(Expr::field("name")),
            pattern: Box::new(Expr::lit("A%")),
            negated: false,
            case_insensitive: false,
        };
        assert!((stats.selectivity(Some("users"), &like) - 0.25).abs() < 1e-9);

        let within = Expr::In {
            expr: Box::new(Expr::field("age")),
            list: vec![Expr::lit(1), Expr::lit(2)],
            negated: false,
        };
        assert!((stats.selectivity(Some("users"), &within) - 0.02).abs() < 1e-9);

        let both = Expr::and(gt("age", 1), like.clone());
        assert!((stats.selectivity(Some("users"), &both) - 0.333 * 0.25).abs() < 1e-9);
        let either = Expr::or(gt("age", 1), like);
        let expected = 1.0 - (1.0 - 0.333) * (1.0 - 0.25);
        assert!((stats.selectivity(Some("users"), &either) - expected).abs() < 1e-9);
        assert!((stats.selectivity(None, &Expr::Raw("x".into())) - 0.333).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_builds_columns_and_histograms() {
        let stats = StatisticsStore::new();
        let rows = vec![
            json!({"dept": "A", "age": 30}),
            json!({"dept": "A", "age": null}),
            json!({"dept": "B"}),
            json!({"dept": "A", "age": 41}),
        ];
        stats.analyze("staff", &rows);
        let snapshot = stats.snapshot("staff").unwrap();
        assert_eq!(snapshot.row_count, 4);
        let dept = &snapshot.columns["dept"];
        assert_eq!(dept.cardinality, 2);
        assert_eq!(dept.histogram.as_ref().unwrap()["\"A\""], 3);
        let age = &snapshot.columns["age"];
        assert!((age.null_fraction - 0.5).abs() < 1e-9);
        assert_eq!(age.min, Some(json!(30)));
        assert_eq!(age.max, Some(json!(41)));

        // histogram-backed equality
        let s = stats.selectivity(Some("staff"), &eq("dept", json!("A")));
        assert!((s - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_equality_selectivity_sources() {
        let stats = StatisticsStore::new();
        let staff: Vec<Value> = ["A", "A", "A", "B"].iter().map(|d| json!({"dept": d})).collect();
        stats.analyze("staff", &staff);
        let seen = stats.selectivity(Some("staff"), &eq("dept", json!("B")));
        assert!((seen - 0.25).abs() < 1e-9);
        // unseen values floor at one row
        let unseen = stats.selectivity(Some("staff"), &eq("dept", json!("Z")));
        assert!((unseen - 0.25).abs() < 1e-9);

        let ids: Vec<Value> = (0..200).map(|i| json!({"id": i % 80})).collect();
        stats.analyze("t", &ids);
        assert!(stats.snapshot("t").unwrap().columns["id"].histogram.is_none());
        let s = stats.selectivity(Some("t"), &eq("id", json!(3)));
        assert!((s - 1.0 / 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_histogram_skipped_for_many_distinct_values() {
        let stats = StatisticsStore::new();
        let rows: Vec<Value> = (0..100).map(|i| json!({"id": i})).collect();
        stats.analyze("t", &rows);
        let snapshot = stats.snapshot("t").unwrap();
        assert!(snapshot.columns["id"].histogram.is_none());
        assert_eq!(stats.cardinality("t", "id"), 100);
    }

    #[test]
    fn test_indexes_survive_analyze() {
        let stats = StatisticsStore::new();
        stats.register_index("users", IndexInfo::new("idx_age", vec!["age".into()]));
        stats.analyze("users", &[json!({"age": 3})]);
        assert!(stats.has_index("users", "age"));
        assert!(stats.has_index("users", "u.age"));
        assert!(stats.drop_index("idx_age"));
        assert!(!stats.has_index("users", "age"));
    }

    #[test]
    fn test_analyze_node_covers_tabular_collections() {
        let stats = StatisticsStore::new();
        let node = JsonNode::from_native(json!({
            "users": [{"name": "a"}, {"name": "b"}],
            "config": {"debug": true},
            "tags": ["x", "y"]
        }));
        assert_eq!(stats.analyze_node(&node), 1);
        assert_eq!(stats.row_count("users"), 2);
        assert!(!stats.is_known("tags"));
    }
}

//! The data node: the hierarchical container queries execute against.

use crate::error::{QueryError, Result};
use crate::value;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Structural tag used for capability checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataShape {
    Tabular,
    Document,
    Graph,
    KeyValue,
    Stream,
}

impl DataShape {
    pub const ALL: [DataShape; 5] = [
        DataShape::Tabular,
        DataShape::Document,
        DataShape::Graph,
        DataShape::KeyValue,
        DataShape::Stream,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataShape::Tabular => "tabular",
            DataShape::Document => "document",
            DataShape::Graph => "graph",
            DataShape::KeyValue => "key-value",
            DataShape::Stream => "stream",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small set of [`DataShape`]s
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShapeSet(u8);

impl ShapeSet {
    pub const EMPTY: ShapeSet = ShapeSet(0);

    pub fn of(shapes: &[DataShape]) -> Self {
        shapes.iter().fold(Self::EMPTY, |set, s| set.with(*s))
    }

    pub fn all() -> Self {
        Self::of(&DataShape::ALL)
    }

    pub fn all_except(shape: DataShape) -> Self {
        ShapeSet(Self::all().0 & !shape.bit())
    }

    pub fn with(self, shape: DataShape) -> Self {
        ShapeSet(self.0 | shape.bit())
    }

    pub fn contains(self, shape: DataShape) -> bool {
        self.0 & shape.bit() != 0
    }

    pub fn intersects(self, other: ShapeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = DataShape> {
        DataShape::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl fmt::Debug for ShapeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for ShapeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(DataShape::as_str).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Uniform key/child interface over hierarchical data.
///
/// Paths are dotted; numeric segments index arrays and the empty path is the
/// root.
pub trait DataNode: Send {
    fn get(&self, path: &str) -> Option<&Value>;

    fn get_mut(&mut self, path: &str) -> Option<&mut Value>;

    /// Direct children of the value at `path` as `(key, value)` pairs
    fn children<'a>(&'a self, path: &str) -> Box<dyn Iterator<Item = (String, &'a Value)> + 'a>;

    fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    fn set(&mut self, path: &str, value: Value) -> Result<()>;

    fn delete(&mut self, path: &str) -> Result<Option<Value>>;

    fn root(&self) -> &Value;

    /// Shapes this node can be viewed as
    fn shapes(&self) -> ShapeSet;

    /// Opaque structural signature; stable across row-value changes
    fn signature(&self) -> String;
}

/// [`DataNode`] backed by a `serde_json::Value`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JsonNode {
    root: Value,
    declared: Option<DataShape>,
}

impl JsonNode {
    pub fn from_native(root: Value) -> Self {
        Self {
            root,
            declared: None,
        }
    }

    /// Force the node's primary shape, e.g. `stream`, which is never inferred
    pub fn with_shape(mut self, shape: DataShape) -> Self {
        self.declared = Some(shape);
        self
    }

    pub fn into_inner(self) -> Value {
        self.root
    }
}

impl From<Value> for JsonNode {
    fn from(root: Value) -> Self {
        Self::from_native(root)
    }
}

/// Infer the shapes of a native value.
pub fn infer_shapes(root: &Value) -> ShapeSet {
    let Value::Object(map) = root else {
        return match root {
            Value::Array(items) if items.iter().all(Value::is_object) => {
                ShapeSet::of(&[DataShape::Tabular])
            }
            _ => ShapeSet::EMPTY,
        };
    };
    let mut set = ShapeSet::of(&[DataShape::Document]);
    let has_vertices = ["nodes", "vertices"]
        .iter()
        .any(|k| map.get(*k).is_some_and(Value::is_array));
    if has_vertices && map.get("edges").is_some_and(Value::is_array) {
        set = set.with(DataShape::Graph);
    }
    let tabular = map.values().any(|v| {
        v.as_array()
            .is_some_and(|items| !items.is_empty() && items.iter().all(Value::is_object))
    });
    if tabular {
        set = set.with(DataShape::Tabular);
    }
    if !map.is_empty() && map.values().all(|v| !v.is_object() && !v.is_array()) {
        set = set.with(DataShape::KeyValue);
    }
    set
}

/// Sorted top-level keys with the union of their row field names.
pub fn shape_signature(root: &Value) -> String {
    fn fields_of(value: &Value) -> String {
        match value {
            Value::Array(items) => {
                let mut keys: Vec<&str> = items
                    .iter()
                    .filter_map(Value::as_object)
                    .flat_map(|o| o.keys().map(String::as_str))
                    .collect();
                keys.sort_unstable();
                keys.dedup();
                format!("[{}]", keys.join(","))
            }
            Value::Object(map) => {
                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                format!("{{{}}}", keys.join(","))
            }
            other => value::type_name(other).to_string(),
        }
    }
    match root {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            entries
                .into_iter()
                .map(|(k, v)| format!("{k}:{}", fields_of(v)))
                .collect::<Vec<_>>()
                .join(";")
        }
        other => fields_of(other),
    }
}

impl DataNode for JsonNode {
    fn get(&self, path: &str) -> Option<&Value> {
        value::get_path(&self.root, path)
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        value::get_path_mut(&mut self.root, path)
    }

    fn children<'a>(&'a self, path: &str) -> Box<dyn Iterator<Item = (String, &'a Value)> + 'a> {
        match self.get(path) {
            Some(Value::Object(map)) => Box::new(map.iter().map(|(k, v)| (k.clone(), v))),
            Some(Value::Array(items)) => {
                Box::new(items.iter().enumerate().map(|(i, v)| (i.to_string(), v)))
            }
            _ => Box::new(std::iter::empty()),
        }
    }

    fn set(&mut self, path: &str, new: Value) -> Result<()> {
        if value::set_path(&mut self.root, path, new) {
            Ok(())
        } else {
            Err(QueryError::value(format!("cannot write to path '{path}'")))
        }
    }

    fn delete(&mut self, path: &str) -> Result<Option<Value>> {
        if path.is_empty() {
            return Err(QueryError::value("cannot delete the root"));
        }
        Ok(value::remove_path(&mut self.root, path))
    }

    fn root(&self) -> &Value {
        &self.root
    }

    fn shapes(&self) -> ShapeSet {
        let inferred = infer_shapes(&self.root);
        match self.declared {
            Some(shape) => inferred.with(shape),
            None => inferred,
        }
    }

    fn signature(&self) -> String {
        let sig = shape_signature(&self.root);
        match self.declared {
            Some(shape) => format!("{shape}|{sig}"),
            None => sig,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_and_children() {
        let node = JsonNode::from_native(json!({"users": [{"name": "Alice"}, {"name": "Bob"}]}));
        assert_eq!(node.get("users.1.name"), Some(&json!("Bob")));
        assert!(node.has("users.0"));
        assert!(!node.has("users.5"));
        let keys: Vec<String> = node.children("users").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["0", "1"]);
    }

    #[test]
    fn test_set_and_delete() {
        let mut node = JsonNode::from_native(json!({"a": {"b": 1}}));
        node.set("a.c", json!(2)).unwrap();
        assert_eq!(node.get("a.c"), Some(&json!(2)));
        assert_eq!(node.delete("a.b").unwrap(), Some(json!(1)));
        assert!(node.set("a.c.d", json!(3)).is_err());
        assert!(node.delete("").is_err());
    }

    #[test]
    fn test_shape_inference() {
        let tabular = JsonNode::from_native(json!({"users": [{"id": 1}]}));
        assert!(tabular.shapes().contains(DataShape::Tabular));
        assert!(tabular.shapes().contains(DataShape::Document));
        assert!(!tabular.shapes().contains(DataShape::Graph));

        let graph = JsonNode::from_native(json!({"nodes": [{"id": 1}], "edges": []}));
        assert!(graph.shapes().contains(DataShape::Graph));

        let kv = JsonNode::from_native(json!({"host": "a", "port": 80}));
        assert!(kv.shapes().contains(DataShape::KeyValue));

        let stream = JsonNode::from_native(json!({})).with_shape(DataShape::Stream);
        assert!(stream.shapes().contains(DataShape::Stream));
    }

    #[test]
    fn test_signature_ignores_values() {
        let a = JsonNode::from_native(json!({"users": [{"id": 1, "age": 20}]}));
        let b = JsonNode::from_native(json!({"users": [{"age": 99, "id": 7}, {"id": 8}]}));
        assert_eq!(a.signature(), b.signature());
        let c = JsonNode::from_native(json!({"users": [{"id": 1, "email": "x"}]}));
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn test_shape_set_display() {
        let set = ShapeSet::of(&[DataShape::Graph, DataShape::Tabular]);
        assert_eq!(set.to_string(), "{tabular, graph}");
        assert!(!ShapeSet::all_except(DataShape::Stream).contains(DataShape::Stream));
    }
}

//! Graph projection of a data node.
//!
//! Vertices come from a top-level `nodes` or `vertices` array of objects
//! with an `id` and a `label` or `labels`; edges from an `edges` array with
//! `from`/`to` (or `source`/`target`), optional `id`, `label`/`type` and
//! `weight`. Vertices are keyed by the canonical form of their id.

use quarry_core::value::{as_number, canonical_string, loose_eq};
use quarry_core::{Direction, TraversalStrategy};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

pub const EDGES_KEY: &str = "edges";
const VERTEX_KEYS: [&str; 2] = ["nodes", "vertices"];

/// Upper bound on paths enumerated by ALL_PATHS and variable-length matches
pub const MAX_ENUMERATED_PATHS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct Vertex {
    pub key: String,
    pub id: Value,
    pub labels: Vec<String>,
    /// Index in the vertex array
    pub position: usize,
    pub value: Value,
}

impl Vertex {
    pub fn has_labels(&self, labels: &[String]) -> bool {
        labels.iter().all(|l| self.labels.contains(l))
    }

    pub fn matches(&self, labels: &[String], properties: &Map<String, Value>) -> bool {
        self.has_labels(labels)
            && properties
                .iter()
                .all(|(k, v)| self.value.get(k).is_some_and(|actual| loose_eq(actual, v, false)))
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    /// Index in the edge array
    pub position: usize,
    pub from: String,
    pub to: String,
    pub label: Option<String>,
    pub value: Value,
}

impl Edge {
    pub fn has_label(&self, labels: &[String]) -> bool {
        labels.is_empty() || self.label.as_ref().is_some_and(|l| labels.contains(l))
    }

    pub fn matches(&self, labels: &[String], properties: &Map<String, Value>) -> bool {
        self.has_label(labels)
            && properties
                .iter()
                .all(|(k, v)| self.value.get(k).is_some_and(|actual| loose_eq(actual, v, false)))
    }

    /// Weight under `property`, default 1
    pub fn weight(&self, property: Option<&str>) -> f64 {
        self.value
            .get(property.unwrap_or("weight"))
            .and_then(|w| as_number(w, true))
            .unwrap_or(1.0)
    }

    /// Endpoint opposite `key`
    pub fn other(&self, key: &str) -> &str {
        if self.from == key {
            &self.to
        } else {
            &self.from
        }
    }
}

/// A path through the graph: vertex keys and the edges between them
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPath {
    pub vertices: Vec<String>,
    pub edges: Vec<usize>,
    pub cost: f64,
}

impl GraphPath {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphView {
    /// Top-level key holding vertices
    pub vertex_key: String,
    vertices: Vec<Vertex>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

pub fn vertex_key(id: &Value) -> String {
    canonical_string(id)
}

fn labels_of(value: &Value) -> Vec<String> {
    match (value.get("labels"), value.get("label")) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .filter_map(|l| l.as_str().map(str::to_string))
            .collect(),
        (_, Some(Value::String(label))) => vec![label.clone()],
        _ => Vec::new(),
    }
}

/// Whether the root carries a vertex array and an edge array
pub fn is_graph(root: &Value) -> bool {
    VERTEX_KEYS
        .iter()
        .any(|k| root.get(*k).is_some_and(Value::is_array))
        && root.get(EDGES_KEY).is_some_and(Value::is_array)
}

/// Key of the vertex array in `root`, `nodes` when absent
pub fn vertex_array_key(root: &Value) -> &'static str {
    VERTEX_KEYS
        .iter()
        .copied()
        .find(|k| root.get(*k).is_some_and(Value::is_array))
        .unwrap_or(VERTEX_KEYS[0])
}

impl GraphView {
    /// Project the graph held by `root`; empty when there is none
    pub fn from_root(root: &Value) -> Self {
        let array_key = vertex_array_key(root);
        let mut view = GraphView {
            vertex_key: array_key.to_string(),
            ..GraphView::default()
        };
        if let Some(Value::Array(items)) = root.get(array_key) {
            for (position, item) in items.iter().enumerate() {
                let Some(id) = item.get("id") else {
                    continue;
                };
                let key = vertex_key(id);
                view.index.insert(key.clone(), view.vertices.len());
                view.vertices.push(Vertex {
                    key,
                    id: id.clone(),
                    labels: labels_of(item),
                    position,
                    value: item.clone(),
                });
            }
        }
        if let Some(Value::Array(items)) = root.get(EDGES_KEY) {
            for (position, item) in items.iter().enumerate() {
                let from = item.get("from").or_else(|| item.get("source"));
                let to = item.get("to").or_else(|| item.get("target"));
                let (Some(from), Some(to)) = (from, to) else {
                    continue;
                };
                let label = item
                    .get("label")
                    .or_else(|| item.get("type"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let edge = Edge {
                    position,
                    from: vertex_key(from),
                    to: vertex_key(to),
                    label,
                    value: item.clone(),
                };
                let index = view.edges.len();
                view.outgoing.entry(edge.from.clone()).or_default().push(index);
                view.incoming.entry(edge.to.clone()).or_default().push(index);
                view.edges.push(edge);
            }
        }
        view
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, key: &str) -> Option<&Vertex> {
        self.index.get(key).map(|&i| &self.vertices[i])
    }

    pub fn vertex_by_id(&self, id: &Value) -> Option<&Vertex> {
        self.vertex(&vertex_key(id))
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Key of a vertex given by id or by a vertex object
    pub fn resolve(&self, reference: &Value) -> Option<&Vertex> {
        match reference {
            Value::Object(map) => map.get("id").and_then(|id| self.vertex_by_id(id)),
            other => self.vertex_by_id(other),
        }
    }

    /// Edge indexes incident to `key` in `direction`
    pub fn incident(&self, key: &str, direction: Direction, labels: &[String]) -> Vec<usize> {
        let pick = |map: &HashMap<String, Vec<usize>>| map.get(key).cloned().unwrap_or_default();
        let mut out = match direction {
            Direction::Out => pick(&self.outgoing),
            Direction::In => pick(&self.incoming),
            Direction::Both => {
                let mut both = pick(&self.outgoing);
                // self-loops appear once
                both.extend(pick(&self.incoming).into_iter().filter(|i| {
                    let e = &self.edges[*i];
                    e.from != e.to
                }));
                both
            }
        };
        out.retain(|i| self.edges[*i].has_label(labels));
        out.sort_unstable();
        out
    }

    /// `(edge index, neighbor key)` pairs
    pub fn neighbors(&self, key: &str, direction: Direction, labels: &[String]) -> Vec<(usize, String)> {
        self.incident(key, direction, labels)
            .into_iter()
            .map(|i| (i, self.edges[i].other(key).to_string()))
            .collect()
    }

    /// `(in, out)` degree
    pub fn degree(&self, key: &str, labels: &[String]) -> (usize, usize) {
        (
            self.incident(key, Direction::In, labels).len(),
            self.incident(key, Direction::Out, labels).len(),
        )
    }

    /// Vertices reachable from `starts` at depth `min_depth..=max_depth`,
    /// each reported once with the depth it was first reached at
    pub fn traverse(
        &self,
        starts: &[String],
        direction: Direction,
        labels: &[String],
        min_depth: u32,
        max_depth: u32,
        strategy: TraversalStrategy,
    ) -> Vec<(String, u32)> {
        let mut seen: HashSet<String> = starts.iter().cloned().collect();
        let mut out = Vec::new();
        match strategy {
            TraversalStrategy::Bfs => {
                let mut queue: VecDeque<(String, u32)> = starts.iter().map(|s| (s.clone(), 0)).collect();
                while let Some((key, depth)) = queue.pop_front() {
                    if depth >= min_depth && depth > 0 {
                        out.push((key.clone(), depth));
                    } else if depth == 0 && min_depth == 0 {
                        out.push((key.clone(), 0));
                    }
                    if depth >= max_depth {
                        continue;
                    }
                    for (_, next) in self.neighbors(&key, direction, labels) {
                        if seen.insert(next.clone()) {
                            queue.push_back((next, depth + 1));
                        }
                    }
                }
            }
            TraversalStrategy::Dfs => {
                let mut stack: Vec<(String, u32)> = starts.iter().rev().map(|s| (s.clone(), 0)).collect();
                while let Some((key, depth)) = stack.pop() {
                    if depth >= min_depth {
                        out.push((key.clone(), depth));
                    }
                    if depth >= max_depth {
                        continue;
                    }
                    for (_, next) in self.neighbors(&key, direction, labels).into_iter().rev() {
                        if seen.insert(next.clone()) {
                            stack.push((next, depth + 1));
                        }
                    }
                }
            }
        }
        out
    }

    /// Fewest hops, or least total weight when `weight` names a property
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        direction: Direction,
        labels: &[String],
        weight: Option<&str>,
    ) -> Option<GraphPath> {
        self.vertex(from)?;
        self.vertex(to)?;
        if from == to {
            return Some(GraphPath {
                vertices: vec![from.to_string()],
                edges: Vec::new(),
                cost: 0.0,
            });
        }
        match weight {
            None => self.bfs_path(from, to, direction, labels),
            Some(property) => self.dijkstra(from, to, direction, labels, property),
        }
    }

    fn bfs_path(&self, from: &str, to: &str, direction: Direction, labels: &[String]) -> Option<GraphPath> {
        let mut previous: HashMap<String, (String, usize)> = HashMap::new();
        let mut queue = VecDeque::from([from.to_string()]);
        let mut seen = HashSet::from([from.to_string()]);
        while let Some(key) = queue.pop_front() {
            if key == to {
                break;
            }
            for (edge, next) in self.neighbors(&key, direction, labels) {
                if seen.insert(next.clone()) {
                    previous.insert(next.clone(), (key.clone(), edge));
                    queue.push_back(next);
                }
            }
        }
        let path = unwind(&previous, from, to)?;
        let cost = path.edges.len() as f64;
        Some(GraphPath { cost, ..path })
    }

    fn dijkstra(
        &self,
        from: &str,
        to: &str,
        direction: Direction,
        labels: &[String],
        property: &str,
    ) -> Option<GraphPath> {
        #[derive(PartialEq)]
        struct State(f64, String);
        impl Eq for State {}
        impl PartialOrd for State {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for State {
            fn cmp(&self, other: &Self) -> Ordering {
                other
                    .0
                    .partial_cmp(&self.0)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| other.1.cmp(&self.1))
            }
        }

        let mut dist: HashMap<String, f64> = HashMap::from([(from.to_string(), 0.0)]);
        let mut previous: HashMap<String, (String, usize)> = HashMap::new();
        let mut heap = BinaryHeap::from([State(0.0, from.to_string())]);
        while let Some(State(cost, key)) = heap.pop() {
            if key == to {
                break;
            }
            if cost > dist.get(&key).copied().unwrap_or(f64::INFINITY) {
                continue;
            }
            for (edge, next) in self.neighbors(&key, direction, labels) {
                let candidate = cost + self.edges[edge].weight(Some(property)).max(0.0);
                if candidate < dist.get(&next).copied().unwrap_or(f64::INFINITY) {
                    dist.insert(next.clone(), candidate);
                    previous.insert(next.clone(), (key.clone(), edge));
                    heap.push(State(candidate, next));
                }
            }
        }
        let path = unwind(&previous, from, to)?;
        let cost = dist.get(to).copied().unwrap_or_default();
        Some(GraphPath { cost, ..path })
    }

    /// Simple paths from `from` (to `to` when given) with
    /// `min_length..=max_length` edges, depth first
    pub fn all_paths(
        &self,
        from: &str,
        to: Option<&str>,
        direction: Direction,
        labels: &[String],
        min_length: u32,
        max_length: u32,
    ) -> Vec<GraphPath> {
        let mut out = Vec::new();
        if self.vertex(from).is_none() {
            return out;
        }
        let mut vertices = vec![from.to_string()];
        let mut edges = Vec::new();
        self.walk(
            &mut vertices,
            &mut edges,
            to,
            direction,
            labels,
            (min_length, max_length),
            &mut out,
        );
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        vertices: &mut Vec<String>,
        edges: &mut Vec<usize>,
        to: Option<&str>,
        direction: Direction,
        labels: &[String],
        (min_length, max_length): (u32, u32),
        out: &mut Vec<GraphPath>,
    ) {
        if out.len() >= MAX_ENUMERATED_PATHS {
            return;
        }
        let Some(current) = vertices.last().cloned() else {
            return;
        };
        let length = edges.len() as u32;
        let at_target = to.map_or(true, |t| t == current);
        if length >= min_length && at_target && (length > 0 || min_length == 0) {
            out.push(GraphPath {
                vertices: vertices.clone(),
                edges: edges.clone(),
                cost: length as f64,
            });
        }
        if length >= max_length {
            return;
        }
        for (edge, next) in self.neighbors(&current, direction, labels) {
            if vertices.contains(&next) {
                continue;
            }
            vertices.push(next);
            edges.push(edge);
            self.walk(vertices, edges, to, direction, labels, (min_length, max_length), out);
            vertices.pop();
            edges.pop();
        }
    }

    /// Weakly connected components, each sorted, in order of first vertex
    pub fn connected_components(&self) -> Vec<Vec<String>> {
        let mut seen = HashSet::new();
        let mut components = Vec::new();
        for vertex in &self.vertices {
            if !seen.insert(vertex.key.clone()) {
                continue;
            }
            let mut component = vec![vertex.key.clone()];
            let mut queue = VecDeque::from([vertex.key.clone()]);
            while let Some(key) = queue.pop_front() {
                for (_, next) in self.neighbors(&key, Direction::Both, &[]) {
                    if self.vertex(&next).is_some() && seen.insert(next.clone()) {
                        component.push(next.clone());
                        queue.push_back(next);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    /// A cycle as a closed vertex sequence, if any
    pub fn find_cycle(&self, directed: bool, labels: &[String]) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Open,
            Done,
        }
        let mut marks: HashMap<String, Mark> = HashMap::new();
        for vertex in &self.vertices {
            if marks.contains_key(&vertex.key) {
                continue;
            }
            // (vertex, edge used to enter, neighbor cursor)
            let mut stack: Vec<(String, Option<usize>, usize)> = vec![(vertex.key.clone(), None, 0)];
            marks.insert(vertex.key.clone(), Mark::Open);
            while let Some((key, entered_by, cursor)) = stack.last().cloned() {
                let direction = if directed { Direction::Out } else { Direction::Both };
                let neighbors = self.neighbors(&key, direction, labels);
                if cursor >= neighbors.len() {
                    marks.insert(key, Mark::Done);
                    stack.pop();
                    continue;
                }
                if let Some(top) = stack.last_mut() {
                    top.2 += 1;
                }
                let (edge, next) = &neighbors[cursor];
                if !directed && Some(*edge) == entered_by {
                    continue;
                }
                match marks.get(next) {
                    Some(Mark::Open) => {
                        let start = stack.iter().position(|(k, _, _)| k == next).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..].iter().map(|(k, _, _)| k.clone()).collect();
                        cycle.push(next.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next.clone(), Mark::Open);
                        stack.push((next.clone(), Some(*edge), 0));
                    }
                }
            }
        }
        None
    }

    /// Object form of a path for results
    pub fn path_value(&self, path: &GraphPath) -> Value {
        let vertices: Vec<Value> = path
            .vertices
            .iter()
            .filter_map(|k| self.vertex(k).map(|v| v.value.clone()))
            .collect();
        let edges: Vec<Value> = path
            .edges
            .iter()
            .filter_map(|i| self.edge(*i).map(|e| e.value.clone()))
            .collect();
        serde_json::json!({
            "vertices": vertices,
            "edges": edges,
            "length": path.len(),
            "cost": quarry_core::value::number(path.cost),
        })
    }
}

fn unwind(previous: &HashMap<String, (String, usize)>, from: &str, to: &str) -> Option<GraphPath> {
    let mut vertices = vec![to.to_string()];
    let mut edges = Vec::new();
    let mut current = to.to_string();
    while current != from {
        let (prev, edge) = previous.get(&current)?;
        edges.push(*edge);
        vertices.push(prev.clone());
        current = prev.clone();
    }
    vertices.reverse();
    edges.reverse();
    Some(GraphPath {
        vertices,
        edges,
        cost: 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn social() -> GraphView {
        GraphView::from_root(&json!({
            "nodes": [
                {"id": 1, "label": "User", "name": "Ann"},
                {"id": 2, "label": "User", "name": "Bob"},
                {"id": 3, "labels": ["User", "Admin"], "name": "Cy"},
                {"id": 4, "label": "User", "name": "Dee"},
                {"id": 5, "label": "Post"}
            ],
            "edges": [
                {"from": 1, "to": 2, "label": "FOLLOWS", "weight": 5},
                {"from": 2, "to": 3, "label": "FOLLOWS", "weight": 1},
                {"from": 1, "to": 3, "label": "FOLLOWS", "weight": 10},
                {"source": 3, "target": 4, "type": "FOLLOWS", "weight": 1},
                {"from": 4, "to": 5, "label": "WROTE"}
            ]
        }))
    }

    fn key(id: i64) -> String {
        vertex_key(&json!(id))
    }

    #[test]
    fn test_projection_reads_labels_and_endpoints() {
        let g = social();
        assert_eq!(g.vertices().len(), 5);
        assert_eq!(g.edges().len(), 5);
        assert!(g.vertex(&key(3)).unwrap().has_labels(&["Admin".into()]));
        assert_eq!(g.edge(3).unwrap().label.as_deref(), Some("FOLLOWS"));
        assert_eq!(g.degree(&key(1), &[]), (0, 2));
        assert_eq!(g.degree(&key(3), &[]), (2, 1));
    }

    #[test]
    fn test_bfs_traversal_depths() {
        let g = social();
        let reached = g.traverse(&[key(1)], Direction::Out, &["FOLLOWS".into()], 1, 2, TraversalStrategy::Bfs);
        assert_eq!(reached, vec![(key(2), 1), (key(3), 1), (key(4), 2)]);
    }

    #[test]
    fn test_shortest_path_unweighted_and_weighted() {
        let g = social();
        let hops = g.shortest_path(&key(1), &key(4), Direction::Out, &[], None).unwrap();
        assert_eq!(hops.vertices, vec![key(1), key(3), key(4)]);
        assert_eq!(hops.cost, 2.0);

        let weighted = g
            .shortest_path(&key(1), &key(4), Direction::Out, &[], Some("weight"))
            .unwrap();
        assert_eq!(weighted.vertices, vec![key(1), key(2), key(3), key(4)]);
        assert_eq!(weighted.cost, 7.0);

        assert!(g.shortest_path(&key(5), &key(1), Direction::Out, &[], None).is_none());
    }

    #[test]
    fn test_all_paths_respects_max_length() {
        let g = social();
        let paths = g.all_paths(&key(1), Some(&key(3)), Direction::Out, &[], 1, 3);
        assert_eq!(paths.len(), 2);
        let short = g.all_paths(&key(1), Some(&key(3)), Direction::Out, &[], 1, 1);
        assert_eq!(short.len(), 1);
    }

    #[test]
    fn test_components_and_cycles() {
        let g = GraphView::from_root(&json!({
            "nodes": [{"id": "a"}, {"id": "b"}, {"id": "c"}, {"id": "d"}],
            "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "a"}, {"from": "c", "to": "d"}]
        }));
        assert_eq!(g.connected_components().len(), 2);
        let cycle = g.find_cycle(true, &[]).unwrap();
        assert_eq!(cycle.first(), cycle.last());

        assert!(social().find_cycle(true, &[]).is_none());
        // 1-2-3-1 is a cycle once direction is ignored
        assert!(social().find_cycle(false, &[]).is_some());
    }

    #[test]
    fn test_is_graph() {
        assert!(is_graph(&json!({"vertices": [], "edges": []})));
        assert!(!is_graph(&json!({"nodes": []})));
        assert_eq!(vertex_array_key(&json!({"vertices": []})), "vertices");
        assert_eq!(vertex_array_key(&json!({})), "nodes");
    }
}

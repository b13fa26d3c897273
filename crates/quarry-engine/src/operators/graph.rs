//! Graph operators: pattern matching, traversals, paths, analysis and
//! graph mutations.
//!
//! Read operators project the data node through [`GraphView`]. Mutations
//! edit the vertex and edge arrays of the data node in place; inside a
//! MATCH pipeline they either rewrite the binding rows (SET, CREATE of a
//! vertex) or return a void result so the rows flow through unchanged.

use super::{bad_params, OperatorRegistry};
use crate::executor::ExecutionContext;
use crate::graph::{vertex_array_key, vertex_key, GraphView, EDGES_KEY, MAX_ENUMERATED_PATHS};
use quarry_core::value::{as_number, canonical_string, get_path, remove_path, set_path};
use quarry_core::{
    Action, ActionKind, Direction, EdgeParams, EdgePattern, ExecutionResult, PathParams,
    PatternElement, QueryError, Result, ResultShape, SchemaParams, TraverseParams,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

pub(super) fn register(registry: &mut OperatorRegistry) {
    use ActionKind::*;
    registry.builtin(Match, match_pattern);
    for kind in [Out, InTraverse, Both, Neighbors, OutV, InV, BothV] {
        registry.builtin(kind, adjacent);
    }
    for kind in [OutE, InE, BothE] {
        registry.builtin(kind, incident_edges);
    }
    registry.builtin(Expand, traverse);
    registry.builtin(Traversal, traverse);
    registry.builtin(Degree, degree);
    for kind in [Path, AllPaths, VariablePath] {
        registry.builtin(kind, all_paths);
    }
    registry.builtin(ShortestPath, shortest_path);
    registry.builtin(PathLength, path_length);
    registry.builtin(ExtractPath, extract_path);
    registry.builtin(ConnectedComponents, components);
    registry.builtin(CycleDetection, cycle_detection);
    registry.builtin(Subgraph, subgraph);
    registry.builtin(Clone, clone_vertex);
    registry.builtin(CreateEdge, create_edge);
    registry.builtin(DeleteEdge, delete_edge);
    registry.builtin(UpdateEdge, update_edge);
    registry.builtin(Set, properties);
    registry.builtin(Properties, properties);
    registry.builtin(DetachDelete, detach_delete);
}

fn view_of(ctx: &ExecutionContext<'_>) -> GraphView {
    GraphView::from_root(ctx.data.root())
}

/// No rows were piped in: the operator starts from scratch
pub(super) fn is_unseeded(input: &ExecutionResult) -> bool {
    input.shape == ResultShape::Void || input.data.is_null()
}

/// Rows to evaluate expressions against; one empty row when unseeded
fn seed_rows(input: ExecutionResult) -> Vec<Value> {
    if is_unseeded(&input) {
        vec![Value::Object(Map::new())]
    } else {
        input.into_rows()
    }
}

/// Id named by a vertex/edge object or a bare id
fn reference_id(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => map.get("id").cloned(),
        other => Some(other.clone()),
    }
}

fn is_edge_value(value: &Value) -> bool {
    let has = |a: &str, b: &str| value.get(a).or_else(|| value.get(b)).is_some();
    has("from", "source") && has("to", "target")
}

fn endpoint<'v>(edge: &'v Value, primary: &str, fallback: &str) -> Option<&'v Value> {
    edge.get(primary).or_else(|| edge.get(fallback))
}

// ============================================================================
// MATCH
// ============================================================================

/// Depth-first pattern matcher over one seed binding
struct Matcher<'g> {
    view: &'g GraphView,
    elements: &'g [PatternElement],
    out: Vec<Map<String, Value>>,
}

impl<'g> Matcher<'g> {
    fn node(&mut self, idx: usize, binding: Map<String, Value>, at: Option<&str>, used: &mut Vec<usize>) {
        if self.out.len() >= MAX_ENUMERATED_PATHS {
            return;
        }
        let elements = self.elements;
        let Some(element) = elements.get(idx) else {
            self.out.push(binding);
            return;
        };
        let PatternElement::Node(node) = element else {
            return;
        };
        let view = self.view;
        let candidates: Vec<_> = match at {
            Some(key) => view.vertex(key).into_iter().collect(),
            None => view.vertices().iter().collect(),
        };
        for vertex in candidates {
            if !vertex.matches(&node.labels, &node.properties) {
                continue;
            }
            if let Some(bound) = node.variable.as_ref().and_then(|v| binding.get(v)) {
                let same = reference_id(bound).is_some_and(|id| vertex_key(&id) == vertex.key);
                if !same {
                    continue;
                }
            }
            let mut next = binding.clone();
            if let Some(var) = &node.variable {
                next.insert(var.clone(), vertex.value.clone());
            }
            self.edge(idx + 1, next, &vertex.key, used);
        }
    }

    fn edge(&mut self, idx: usize, binding: Map<String, Value>, from: &str, used: &mut Vec<usize>) {
        let elements = self.elements;
        let Some(element) = elements.get(idx) else {
            self.out.push(binding);
            return;
        };
        let PatternElement::Edge(pattern) = element else {
            return;
        };
        // without an upper bound no walk can outgrow the edge count
        let max = pattern.max_hops.unwrap_or(self.view.edges().len() as u32);
        let mut trail = Vec::new();
        self.hop(idx, pattern, &binding, from, max, &mut trail, used);
    }

    #[allow(clippy::too_many_arguments)]
    fn hop(
        &mut self,
        idx: usize,
        pattern: &EdgePattern,
        binding: &Map<String, Value>,
        at: &str,
        max: u32,
        trail: &mut Vec<usize>,
        used: &mut Vec<usize>,
    ) {
        if self.out.len() >= MAX_ENUMERATED_PATHS {
            return;
        }
        let view = self.view;
        let depth = trail.len() as u32;
        if depth >= pattern.min_hops && self.edge_binding_agrees(pattern, binding, trail) {
            let mut next = binding.clone();
            if let Some(var) = &pattern.variable {
                next.insert(var.clone(), self.edge_value(pattern, trail));
            }
            used.extend(trail.iter().copied());
            self.node(idx + 1, next, Some(at), used);
            used.truncate(used.len() - trail.len());
        }
        if depth >= max {
            return;
        }
        for (index, other) in view.neighbors(at, pattern.direction, &[]) {
            let edge = &view.edges()[index];
            if !edge.matches(&pattern.labels, &pattern.properties)
                || trail.contains(&index)
                || used.contains(&index)
            {
                continue;
            }
            trail.push(index);
            self.hop(idx, pattern, binding, &other, max, trail, used);
            trail.pop();
        }
    }

    fn edge_value(&self, pattern: &EdgePattern, trail: &[usize]) -> Value {
        let edges = self.view.edges();
        if pattern.is_variable_length() {
            Value::Array(trail.iter().map(|i| edges[*i].value.clone()).collect())
        } else {
            trail.first().map_or(Value::Null, |i| edges[*i].value.clone())
        }
    }

    fn edge_binding_agrees(&self, pattern: &EdgePattern, binding: &Map<String, Value>, trail: &[usize]) -> bool {
        match pattern.variable.as_ref().and_then(|v| binding.get(v)) {
            Some(bound) => canonical_string(bound) == canonical_string(&self.edge_value(pattern, trail)),
            None => true,
        }
    }
}

fn pattern_variables(elements: &[PatternElement]) -> impl Iterator<Item = &String> {
    elements.iter().filter_map(|e| match e {
        PatternElement::Node(n) => n.variable.as_ref(),
        PatternElement::Edge(e) => e.variable.as_ref(),
    })
}

/// MATCH: bind pattern variables, then run the children over the bindings
fn match_pattern(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_pattern().ok_or_else(|| bad_params(action))?;
    if !matches!(p.elements.first(), Some(PatternElement::Node(_))) {
        return Err(QueryError::validation("MATCH pattern must start with a node"));
    }
    let view = view_of(ctx);
    let seeds: Vec<Map<String, Value>> = seed_rows(input)
        .into_iter()
        .map(|row| match row {
            Value::Object(map) => map,
            _ => Map::new(),
        })
        .collect();

    let mut rows = Vec::new();
    for seed in seeds {
        ctx.checkpoint()?;
        let mut matcher = Matcher {
            view: &view,
            elements: &p.elements,
            out: Vec::new(),
        };
        matcher.node(0, seed.clone(), None, &mut Vec::new());
        if matcher.out.is_empty() && p.optional {
            let mut row = seed;
            for var in pattern_variables(&p.elements) {
                row.entry(var.clone()).or_insert(Value::Null);
            }
            rows.push(Value::Object(row));
        } else {
            rows.extend(matcher.out.into_iter().map(Value::Object));
        }
    }
    debug!(action_id = action.id, bindings = rows.len(), "pattern matched");
    ctx.run_children(action, ExecutionResult::rows(rows))
}

// ============================================================================
// Traversals
// ============================================================================

/// Start vertex keys from explicit ids, the piped rows, or every vertex
fn start_keys(view: &GraphView, p: &TraverseParams, input: &ExecutionResult) -> Vec<String> {
    let refs: Vec<Value> = if !p.start.is_empty() {
        p.start.clone()
    } else if is_unseeded(input) {
        return view.vertices().iter().map(|v| v.key.clone()).collect();
    } else {
        input.row_slice()
    };
    let mut seen = HashSet::new();
    refs.iter()
        .filter_map(|r| view.resolve(r))
        .filter(|v| seen.insert(v.key.clone()))
        .map(|v| v.key.clone())
        .collect()
}

/// OUT, IN_TRAVERSE, BOTH, NEIGHBORS; OUT_V / IN_V / BOTH_V over edges
/// yield the edges' endpoints
fn adjacent(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_traverse().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let direction = match action.kind {
        ActionKind::Out | ActionKind::OutV => Direction::Out,
        ActionKind::InTraverse | ActionKind::InV => Direction::In,
        ActionKind::Both | ActionKind::BothV => Direction::Both,
        _ => p.direction,
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let rows = input.row_slice();
    let over_edges = matches!(action.kind, ActionKind::OutV | ActionKind::InV | ActionKind::BothV)
        && p.start.is_empty()
        && !rows.is_empty()
        && rows.iter().all(is_edge_value);
    if over_edges {
        for edge in &rows {
            let ends = match direction {
                Direction::Out => vec![endpoint(edge, "from", "source")],
                Direction::In => vec![endpoint(edge, "to", "target")],
                Direction::Both => vec![endpoint(edge, "from", "source"), endpoint(edge, "to", "target")],
            };
            for vertex in ends.into_iter().flatten().filter_map(|id| view.vertex_by_id(id)) {
                if seen.insert(vertex.key.clone()) {
                    out.push(vertex.value.clone());
                }
            }
        }
        return Ok(ExecutionResult::rows(out));
    }

    for start in start_keys(&view, p, &input) {
        for (_, next) in view.neighbors(&start, direction, &p.labels) {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(vertex) = view.vertex(&next) {
                out.push(vertex.value.clone());
            }
        }
    }
    Ok(ExecutionResult::rows(out))
}

/// OUT_E, IN_E, BOTH_E
fn incident_edges(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_traverse().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let direction = match action.kind {
        ActionKind::OutE => Direction::Out,
        ActionKind::InE => Direction::In,
        _ => Direction::Both,
    };
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for start in start_keys(&view, p, &input) {
        for index in view.incident(&start, direction, &p.labels) {
            if seen.insert(index) {
                out.push(view.edges()[index].value.clone());
            }
        }
    }
    Ok(ExecutionResult::rows(out))
}

/// EXPAND / TRAVERSAL: multi-hop reachability with depth bounds
fn traverse(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_traverse().ok_or_else(|| bad_params(action))?;
    if p.min_depth > p.max_depth {
        return Err(QueryError::validation(format!(
            "min_depth {} exceeds max_depth {}",
            p.min_depth, p.max_depth
        )));
    }
    let view = view_of(ctx);
    let starts = start_keys(&view, p, &input);
    let reached = view.traverse(&starts, p.direction, &p.labels, p.min_depth, p.max_depth, p.strategy);
    let rows = reached
        .iter()
        .filter_map(|(key, _)| view.vertex(key).map(|v| v.value.clone()))
        .collect();
    let depths: Vec<Value> = reached.iter().map(|(_, depth)| Value::from(*depth)).collect();
    Ok(ExecutionResult::rows(rows).with_meta("depths", depths))
}

fn degree(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_traverse().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let mut rows = Vec::new();
    for key in start_keys(&view, p, &input) {
        let Some(vertex) = view.vertex(&key) else {
            continue;
        };
        let (incoming, outgoing) = view.degree(&key, &p.labels);
        let mut row = Map::new();
        row.insert("id".into(), vertex.id.clone());
        row.insert("in".into(), Value::from(incoming));
        row.insert("out".into(), Value::from(outgoing));
        row.insert("degree".into(), Value::from(incoming + outgoing));
        rows.push(Value::Object(row));
    }
    Ok(ExecutionResult::rows(rows))
}

// ============================================================================
// Paths
// ============================================================================

/// Start key and optional target key; `None` when a vertex is unknown
fn path_ends(
    view: &GraphView,
    p: &PathParams,
    input: &ExecutionResult,
    strict: bool,
) -> Result<Option<(String, Option<String>)>> {
    let from_ref = match &p.from {
        Some(from) => from.clone(),
        None => input
            .row_slice()
            .iter()
            .find(|row| view.resolve(row).is_some())
            .cloned()
            .ok_or_else(|| QueryError::validation("path needs a start vertex"))?,
    };
    let unknown = |r: &Value| QueryError::value(format!("unknown vertex {}", canonical_string(r)));
    let from = match view.resolve(&from_ref) {
        Some(v) => v.key.clone(),
        None if strict => return Err(unknown(&from_ref)),
        None => return Ok(None),
    };
    let to = match &p.to {
        Some(to_ref) => match view.resolve(to_ref) {
            Some(v) => Some(v.key.clone()),
            None if strict => return Err(unknown(to_ref)),
            None => return Ok(None),
        },
        None => None,
    };
    Ok(Some((from, to)))
}

/// PATH, ALL_PATHS, VARIABLE_PATH: simple paths within the length bounds
fn all_paths(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_path().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let Some((from, to)) = path_ends(&view, p, &input, ctx.is_strict())? else {
        return Ok(ExecutionResult::rows(Vec::new()));
    };
    let max = p.max_length.unwrap_or(view.edges().len() as u32);
    let min = match action.kind {
        ActionKind::VariablePath => p.min_length,
        _ => p.min_length.max(1),
    };
    if min > max {
        return Err(QueryError::validation(format!("min_length {min} exceeds max_length {max}")));
    }
    let paths = view.all_paths(&from, to.as_deref(), p.direction, &p.labels, min, max);
    let mut result = ExecutionResult::rows(paths.iter().map(|path| view.path_value(path)).collect());
    if paths.len() >= MAX_ENUMERATED_PATHS {
        result = result.with_meta("truncated", true);
    }
    Ok(result)
}

fn shortest(view: &GraphView, p: &PathParams, input: &ExecutionResult, strict: bool) -> Result<Option<Value>> {
    if p.to.is_none() {
        return Err(QueryError::validation("shortest path needs a target vertex"));
    }
    let Some((from, Some(to))) = path_ends(view, p, input, strict)? else {
        return Ok(None);
    };
    Ok(view
        .shortest_path(&from, &to, p.direction, &p.labels, p.weight.as_deref())
        .map(|path| view.path_value(&path)))
}

/// SHORTEST_PATH: one path, or no rows when the target is unreachable
fn shortest_path(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_path().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let found = shortest(&view, p, &input, ctx.is_strict())?;
    Ok(ExecutionResult::rows(found.into_iter().collect()))
}

/// Piped rows that already are path objects
fn piped_paths(p: &PathParams, input: &ExecutionResult) -> Option<Vec<Value>> {
    let rows = input.row_slice();
    let are_paths = p.from.is_none() && !rows.is_empty() && rows.iter().all(|r| r.get("edges").is_some_and(Value::is_array));
    are_paths.then_some(rows)
}

/// PATH_LENGTH: edge count of piped paths, or of the shortest path
fn path_length(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_path().ok_or_else(|| bad_params(action))?;
    if let Some(paths) = piped_paths(p, &input) {
        let lengths = paths
            .iter()
            .map(|path| Value::from(path.get("edges").and_then(Value::as_array).map_or(0, Vec::len)))
            .collect();
        return Ok(ExecutionResult::rows(lengths));
    }
    let view = view_of(ctx);
    let length = shortest(&view, p, &input, ctx.is_strict())?
        .and_then(|path| path.get("length").cloned())
        .unwrap_or(Value::Null);
    Ok(ExecutionResult::scalar(length))
}

/// EXTRACT_PATH: the vertices along piped paths, or along the shortest path
fn extract_path(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_path().ok_or_else(|| bad_params(action))?;
    let paths = match piped_paths(p, &input) {
        Some(paths) => paths,
        None => {
            let view = view_of(ctx);
            shortest(&view, p, &input, ctx.is_strict())?.into_iter().collect()
        }
    };
    let vertices = paths
        .iter()
        .filter_map(|path| path.get("vertices").and_then(Value::as_array))
        .flatten()
        .cloned()
        .collect();
    Ok(ExecutionResult::rows(vertices))
}

// ============================================================================
// Analysis
// ============================================================================

fn ids_of(view: &GraphView, keys: &[String]) -> Vec<Value> {
    keys.iter()
        .filter_map(|k| view.vertex(k).map(|v| v.id.clone()))
        .collect()
}

fn components(_action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let view = view_of(ctx);
    let rows = view
        .connected_components()
        .iter()
        .enumerate()
        .map(|(i, keys)| {
            let mut row = Map::new();
            row.insert("component".into(), Value::from(i));
            row.insert("size".into(), Value::from(keys.len()));
            row.insert("vertices".into(), Value::Array(ids_of(&view, keys)));
            Value::Object(row)
        })
        .collect();
    Ok(ExecutionResult::rows(rows))
}

/// Whether a cycle exists; the witness goes to metadata
fn cycle_detection(action: &Action, _input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_graph_target().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    Ok(match view.find_cycle(p.directed, &p.labels) {
        Some(cycle) => ExecutionResult::boolean(true).with_meta("cycle", ids_of(&view, &cycle)),
        None => ExecutionResult::boolean(false),
    })
}

/// Vertex keys named by `targets` (evaluated per row) or by `labels`
fn targeted_keys(
    ctx: &ExecutionContext<'_>,
    view: &GraphView,
    targets: &[quarry_core::Expr],
    labels: &[String],
    rows: &[Value],
) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |key: String| {
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    };
    if targets.is_empty() {
        for vertex in view.vertices().iter().filter(|v| v.has_labels(labels)) {
            push(vertex.key.clone());
        }
        return Ok(keys);
    }
    for row in rows {
        for target in targets {
            let values = match ctx.eval(target, row)? {
                Value::Array(items) => items,
                single => vec![single],
            };
            for id in values.iter().filter_map(reference_id) {
                push(vertex_key(&id));
            }
        }
    }
    Ok(keys)
}

/// SUBGRAPH: chosen vertices and the edges among them
fn subgraph(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_graph_target().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let rows = seed_rows(input);
    let keys: HashSet<String> = targeted_keys(ctx, &view, &p.targets, &p.labels, &rows)?
        .into_iter()
        .collect();
    let vertices: Vec<Value> = view
        .vertices()
        .iter()
        .filter(|v| keys.contains(&v.key))
        .map(|v| v.value.clone())
        .collect();
    let edges: Vec<Value> = view
        .edges()
        .iter()
        .filter(|e| keys.contains(&e.from) && keys.contains(&e.to))
        .map(|e| e.value.clone())
        .collect();
    let mut graph = Map::new();
    graph.insert(view.vertex_key.clone(), Value::Array(vertices));
    graph.insert(EDGES_KEY.into(), Value::Array(edges));
    Ok(ExecutionResult::graph(Value::Object(graph)))
}

// ============================================================================
// Mutations
// ============================================================================

fn ensure_array(ctx: &mut ExecutionContext<'_>, key: &str) -> Result<()> {
    match ctx.data.get(key) {
        Some(Value::Array(_)) => Ok(()),
        None | Some(Value::Null) => ctx.data.set(key, Value::Array(Vec::new())),
        Some(_) => Err(QueryError::value(format!("'{key}' is not an array"))),
    }
}

fn array_mut<'d>(ctx: &'d mut ExecutionContext<'_>, key: &str) -> Result<&'d mut Vec<Value>> {
    ensure_array(ctx, key)?;
    ctx.data
        .get_mut(key)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| QueryError::value(format!("'{key}' is not an array")))
}

/// One past the largest numeric id, or the item count plus one
pub(crate) fn next_id(items: &[Value]) -> Value {
    let largest = items
        .iter()
        .filter_map(|item| item.get("id").and_then(|id| as_number(id, false)))
        .fold(None, |max: Option<f64>, n| Some(max.map_or(n, |m| m.max(n))));
    match largest {
        Some(n) => Value::from(n.floor() as i64 + 1),
        None => Value::from(items.len() as i64 + 1),
    }
}

/// Position of the vertex with `id` in the vertex array
fn vertex_slot(ctx: &ExecutionContext<'_>, id: &Value) -> Option<(&'static str, usize)> {
    let root = ctx.data.root();
    let key = vertex_array_key(root);
    let wanted = vertex_key(id);
    root.get(key)?
        .as_array()?
        .iter()
        .position(|v| v.get("id").is_some_and(|i| vertex_key(i) == wanted))
        .map(|pos| (key, pos))
}

/// Position of an edge given by value, by id when it has one
fn edge_slot(ctx: &ExecutionContext<'_>, edge: &Value) -> Option<usize> {
    let edges = ctx.data.root().get(EDGES_KEY)?.as_array()?;
    match edge.get("id") {
        Some(id) => {
            let wanted = canonical_string(id);
            edges
                .iter()
                .position(|e| e.get("id").is_some_and(|i| canonical_string(i) == wanted))
        }
        None => {
            let wanted = canonical_string(edge);
            edges.iter().position(|e| canonical_string(e) == wanted)
        }
    }
}

/// Path of a vertex or edge property inside the data node
fn property_path(ctx: &ExecutionContext<'_>, target: &Value, property: &str) -> Option<String> {
    if is_edge_value(target) {
        return edge_slot(ctx, target).map(|pos| format!("{EDGES_KEY}.{pos}.{property}"));
    }
    let id = reference_id(target)?;
    vertex_slot(ctx, &id).map(|(key, pos)| format!("{key}.{pos}.{property}"))
}

/// CREATE of a vertex; binds it under `name` in every piped row
pub(crate) fn create_vertex(p: &SchemaParams, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let unseeded = is_unseeded(&input);
    let mut rows = seed_rows(input);
    let key = vertex_array_key(ctx.data.root());
    let mut created = Vec::with_capacity(rows.len());
    for row in &mut rows {
        let vertices = array_mut(ctx, key)?;
        let mut vertex = Map::new();
        let id = p.properties.get("id").cloned().unwrap_or_else(|| next_id(vertices));
        vertex.insert("id".into(), id);
        match p.labels.as_slice() {
            [] => {}
            [label] => {
                vertex.insert("label".into(), Value::String(label.clone()));
            }
            many => {
                vertex.insert("labels".into(), many.iter().cloned().map(Value::String).collect());
            }
        }
        for (k, v) in &p.properties {
            vertex.entry(k.clone()).or_insert_with(|| v.clone());
        }
        let vertex = Value::Object(vertex);
        vertices.push(vertex.clone());
        if let Value::Object(map) = row {
            map.insert(p.name.clone(), vertex.clone());
        }
        created.push(vertex);
    }
    debug!(count = created.len(), "vertices created");
    if unseeded {
        return Ok(ExecutionResult::rows(created));
    }
    let count = created.len() as u64;
    let mut result = ExecutionResult::rows(rows);
    result.affected_count = count;
    Ok(result)
}

fn eval_reference(ctx: &ExecutionContext<'_>, expr: Option<&quarry_core::Expr>, row: &Value) -> Result<Option<Value>> {
    match expr {
        Some(expr) => Ok(reference_id(&ctx.eval(expr, row)?)),
        None => Ok(None),
    }
}

/// CREATE_EDGE between two existing vertices, once per piped row
fn create_edge(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_edge().ok_or_else(|| bad_params(action))?;
    let unseeded = is_unseeded(&input);
    let mut created = Vec::new();
    for row in seed_rows(input) {
        let from = eval_reference(ctx, p.from.as_ref(), &row)?
            .ok_or_else(|| QueryError::value("edge needs a source vertex"))?;
        let to = eval_reference(ctx, p.to.as_ref(), &row)?
            .ok_or_else(|| QueryError::value("edge needs a target vertex"))?;
        for end in [&from, &to] {
            if vertex_slot(ctx, end).is_none() {
                return Err(QueryError::value(format!("unknown vertex {}", canonical_string(end))));
            }
        }
        let mut edge = Map::new();
        let mut properties = Vec::with_capacity(p.properties.len());
        for assignment in &p.properties {
            properties.push((assignment.path.clone(), ctx.eval(&assignment.value, &row)?));
        }
        let edges = array_mut(ctx, EDGES_KEY)?;
        edge.insert("id".into(), p.id.clone().unwrap_or_else(|| next_id(edges)));
        edge.insert("from".into(), from);
        edge.insert("to".into(), to);
        if let Some(label) = &p.label {
            edge.insert("label".into(), Value::String(label.clone()));
        }
        edge.extend(properties);
        let edge = Value::Object(edge);
        edges.push(edge.clone());
        created.push(edge);
    }
    if unseeded {
        Ok(ExecutionResult::rows(created))
    } else {
        Ok(ExecutionResult::void(created.len() as u64))
    }
}

/// Edge positions selected by id, by bound edge values, or by endpoints
fn selected_edges(ctx: &ExecutionContext<'_>, p: &EdgeParams, rows: &[Value]) -> Result<Vec<usize>> {
    let Some(Value::Array(edges)) = ctx.data.root().get(EDGES_KEY) else {
        return Ok(Vec::new());
    };
    let mut picked = HashSet::new();
    if let Some(id) = &p.id {
        let wanted = canonical_string(id);
        picked.extend(
            edges
                .iter()
                .enumerate()
                .filter(|(_, e)| e.get("id").is_some_and(|i| canonical_string(i) == wanted))
                .map(|(i, _)| i),
        );
    } else {
        for row in rows {
            let from = match &p.from {
                Some(expr) => ctx.eval(expr, row)?,
                None => Value::Null,
            };
            let bound: Vec<&Value> = match &from {
                Value::Array(items) => items.iter().filter(|i| is_edge_value(i)).collect(),
                single if is_edge_value(single) => vec![single],
                _ => Vec::new(),
            };
            if !bound.is_empty() {
                picked.extend(bound.into_iter().filter_map(|edge| edge_slot(ctx, edge)));
                continue;
            }
            let from = reference_id(&from).map(|id| vertex_key(&id));
            let to = eval_reference(ctx, p.to.as_ref(), row)?.map(|id| vertex_key(&id));
            for (i, edge) in edges.iter().enumerate() {
                let ends = |primary: &str, fallback: &str| endpoint(edge, primary, fallback).map(vertex_key);
                let label = edge.get("label").or_else(|| edge.get("type")).and_then(Value::as_str);
                let keep = from.as_ref().map_or(true, |f| ends("from", "source").as_ref() == Some(f))
                    && to.as_ref().map_or(true, |t| ends("to", "target").as_ref() == Some(t))
                    && p.label.as_deref().map_or(true, |l| label == Some(l));
                if keep {
                    picked.insert(i);
                }
            }
        }
    }
    let mut positions: Vec<usize> = picked.into_iter().collect();
    positions.sort_unstable();
    Ok(positions)
}

fn delete_edge(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_edge().ok_or_else(|| bad_params(action))?;
    let rows = seed_rows(input);
    if p.id.is_none() && p.from.is_none() && p.to.is_none() && p.label.is_none() {
        return Err(QueryError::validation("DELETE_EDGE needs an id, endpoints or a label"));
    }
    let doomed = selected_edges(ctx, p, &rows)?;
    if doomed.is_empty() {
        return Ok(ExecutionResult::void(0));
    }
    let edges = array_mut(ctx, EDGES_KEY)?;
    for position in doomed.iter().rev() {
        edges.remove(*position);
    }
    debug!(count = doomed.len(), "edges deleted");
    Ok(ExecutionResult::void(doomed.len() as u64))
}

fn update_edge(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_edge().ok_or_else(|| bad_params(action))?;
    let rows = seed_rows(input);
    let positions = selected_edges(ctx, p, &rows)?;
    let first = rows.first().cloned().unwrap_or(Value::Null);
    let mut values = Vec::with_capacity(p.properties.len());
    for assignment in &p.properties {
        values.push((assignment.path.clone(), ctx.eval(&assignment.value, &first)?));
    }
    for position in &positions {
        for (path, value) in &values {
            ctx.data.set(&format!("{EDGES_KEY}.{position}.{path}"), value.clone())?;
        }
    }
    Ok(ExecutionResult::void(positions.len() as u64))
}

/// Split `var.prop` when `var` is bound to an object in `row`
fn split_binding<'p>(row: &Value, path: &'p str) -> (Option<&'p str>, &'p str) {
    match path.split_once('.') {
        Some((var, prop)) if row.get(var).is_some_and(Value::is_object) => (Some(var), prop),
        _ => (None, path),
    }
}

/// SET / REMOVE on bound vertices or edges, mirrored into the rows; a
/// PROPERTIES without assignments reads properties instead
fn properties(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_properties().ok_or_else(|| bad_params(action))?;
    if action.kind == ActionKind::Properties && p.assignments.is_empty() {
        return read_properties(ctx, p, input);
    }
    let mut rows = input.into_rows();
    let mut affected = 0u64;
    for row in &mut rows {
        let explicit = match &p.target {
            Some(expr) => Some(ctx.eval(expr, row)?),
            None => None,
        };
        for assignment in &p.assignments {
            let value = ctx.eval(&assignment.value, row)?;
            let (var, prop) = match &explicit {
                Some(_) => (None, assignment.path.as_str()),
                None => split_binding(row, &assignment.path),
            };
            let target = match (&explicit, var) {
                (Some(target), _) => target.clone(),
                (None, Some(var)) => row.get(var).cloned().unwrap_or(Value::Null),
                (None, None) => row.clone(),
            };
            if let Some(path) = property_path(ctx, &target, prop) {
                ctx.data.set(&path, value.clone())?;
            }
            match (&explicit, var) {
                (Some(_), _) => {}
                (None, Some(var)) => {
                    set_path(row, &format!("{var}.{prop}"), value);
                }
                (None, None) => {
                    set_path(row, prop, value);
                }
            }
            affected += 1;
        }
        for key in &p.keys {
            let (var, prop) = match &explicit {
                Some(_) => (None, key.as_str()),
                None => split_binding(row, key),
            };
            let target = match (&explicit, var) {
                (Some(target), _) => target.clone(),
                (None, Some(var)) => row.get(var).cloned().unwrap_or(Value::Null),
                (None, None) => row.clone(),
            };
            if let Some(path) = property_path(ctx, &target, prop) {
                ctx.data.delete(&path)?;
            }
            if explicit.is_none() {
                remove_path(row, key);
            }
            affected += 1;
        }
    }
    let mut result = ExecutionResult::rows(rows);
    result.affected_count = affected;
    Ok(result)
}

fn read_properties(
    ctx: &ExecutionContext<'_>,
    p: &quarry_core::PropertiesParams,
    input: ExecutionResult,
) -> Result<ExecutionResult> {
    let mut out = Vec::new();
    for row in input.into_rows() {
        let target = match &p.target {
            Some(expr) => ctx.eval(expr, &row)?,
            None => row,
        };
        let Value::Object(map) = target else {
            out.push(Value::Null);
            continue;
        };
        let picked: Map<String, Value> = if p.keys.is_empty() {
            map.into_iter()
                .filter(|(k, _)| !matches!(k.as_str(), "id" | "label" | "labels"))
                .collect()
        } else {
            let whole = Value::Object(map);
            p.keys
                .iter()
                .map(|k| (k.clone(), get_path(&whole, k).cloned().unwrap_or(Value::Null)))
                .collect()
        };
        out.push(Value::Object(picked));
    }
    Ok(ExecutionResult::rows(out))
}

/// DETACH_DELETE: vertices and every edge touching them
fn detach_delete(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_graph_target().ok_or_else(|| bad_params(action))?;
    if p.targets.is_empty() && p.labels.is_empty() {
        return Err(QueryError::validation("DETACH_DELETE needs targets or labels"));
    }
    let view = view_of(ctx);
    let rows = seed_rows(input);
    let doomed: HashSet<String> = targeted_keys(ctx, &view, &p.targets, &p.labels, &rows)?
        .into_iter()
        .collect();
    if doomed.is_empty() {
        return Ok(ExecutionResult::void(0));
    }
    let touches = |edge: &Value| {
        ["from", "to", "source", "target"]
            .iter()
            .filter_map(|k| edge.get(*k))
            .any(|id| doomed.contains(&vertex_key(id)))
    };
    let edges = array_mut(ctx, EDGES_KEY)?;
    let edges_before = edges.len();
    edges.retain(|e| !touches(e));
    let edges_removed = edges_before - edges.len();

    let key = vertex_array_key(ctx.data.root());
    let vertices = array_mut(ctx, key)?;
    let before = vertices.len();
    vertices.retain(|v| !v.get("id").is_some_and(|id| doomed.contains(&vertex_key(id))));
    let removed = before - vertices.len();
    debug!(vertices = removed, edges = edges_removed, "detach delete");
    Ok(ExecutionResult::void(removed as u64).with_meta("edges_removed", edges_removed))
}

/// CLONE: copy target vertices under fresh ids
fn clone_vertex(action: &Action, input: ExecutionResult, ctx: &mut ExecutionContext<'_>) -> Result<ExecutionResult> {
    let p = action.params.as_graph_target().ok_or_else(|| bad_params(action))?;
    let view = view_of(ctx);
    let rows = seed_rows(input);
    let keys = targeted_keys(ctx, &view, &p.targets, &p.labels, &rows)?;
    if p.new_id.is_some() && keys.len() > 1 {
        return Err(QueryError::validation("CLONE with new_id takes a single vertex"));
    }
    let key = vertex_array_key(ctx.data.root());
    let mut clones = Vec::new();
    for source in keys.iter().filter_map(|k| view.vertex(k)) {
        let vertices = array_mut(ctx, key)?;
        let id = p.new_id.clone().unwrap_or_else(|| next_id(vertices));
        let mut copy = source.value.clone();
        if let Value::Object(map) = &mut copy {
            map.insert("id".into(), id);
        }
        vertices.push(copy.clone());
        clones.push(copy);
    }
    Ok(ExecutionResult::rows(clones))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{
        DataNode, Expr, GraphTargetParams, JsonNode, Params, QueryOptions, TraversalStrategy,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn social() -> Value {
        json!({
            "nodes": [
                {"id": 1, "label": "Person", "name": "Alice"},
                {"id": 2, "label": "Person", "name": "Bob"},
                {"id": 3, "label": "Person", "name": "Carol"},
                {"id": 4, "label": "Person", "name": "Dave"}
            ],
            "edges": [
                {"id": 1, "from": 1, "to": 2, "label": "FOLLOWS", "weight": 1},
                {"id": 2, "from": 2, "to": 3, "label": "FOLLOWS", "weight": 1},
                {"id": 3, "from": 3, "to": 1, "label": "FOLLOWS", "weight": 1},
                {"id": 4, "from": 1, "to": 4, "label": "KNOWS", "weight": 5}
            ]
        })
    }

    fn cypher(text: &str) -> Action {
        quarry_syntax::ParserBridge::new()
            .parse(text, quarry_syntax::QueryFormat::Cypher)
            .unwrap()
            .action
    }

    fn run_on(data: &mut JsonNode, action: &Action) -> Result<ExecutionResult> {
        let mut ctx = ExecutionContext::new(data, QueryOptions::new(), Arc::new(OperatorRegistry::with_defaults()));
        ctx.execute(action, ExecutionResult::void(0))
    }

    fn run(action: &Action) -> ExecutionResult {
        run_on(&mut JsonNode::from_native(social()), action).unwrap()
    }

    fn traverse_action(kind: ActionKind, start: Vec<Value>) -> Action {
        Action::new(kind, Params::Traverse(TraverseParams { start, ..TraverseParams::default() }))
    }

    fn names(result: &ExecutionResult) -> Vec<String> {
        result
            .row_slice()
            .iter()
            .filter_map(|r| r["name"].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_match_where_return() {
        let action = cypher("MATCH (u:Person)-[:FOLLOWS]->(v:Person) WHERE u.name = 'Alice' RETURN v.name");
        assert_eq!(run(&action).data, json!([{"v.name": "Bob"}]));
    }

    #[test]
    fn test_variable_length_match() {
        let action = cypher("MATCH (a:Person {name: 'Alice'})-[:FOLLOWS*1..2]->(b) RETURN b.name");
        assert_eq!(run(&action).data, json!([{"b.name": "Bob"}, {"b.name": "Carol"}]));
    }

    #[test]
    fn test_unbounded_hops_terminate_on_cycles() {
        let action = cypher("MATCH (a:Person {name: 'Alice'})-[:FOLLOWS*]->(b) RETURN b.name");
        // Alice -> Bob -> Carol -> Alice, each edge used at most once
        assert_eq!(
            run(&action).data,
            json!([{"b.name": "Bob"}, {"b.name": "Carol"}, {"b.name": "Alice"}])
        );
    }

    #[test]
    fn test_out_and_in() {
        let out = run(&traverse_action(ActionKind::Out, vec![json!(1)]));
        assert_eq!(names(&out), vec!["Bob", "Dave"]);
        let incoming = run(&traverse_action(ActionKind::InTraverse, vec![json!(1)]));
        assert_eq!(names(&incoming), vec!["Carol"]);
    }

    #[test]
    fn test_out_v_over_edges() {
        let edges = traverse_action(ActionKind::OutE, vec![json!(2)]);
        let pipeline = traverse_action(ActionKind::InV, Vec::new()).with_children(vec![edges]);
        assert_eq!(names(&run(&pipeline)), vec!["Carol"]);
    }

    #[test]
    fn test_traversal_depths() {
        let action = Action::new(
            ActionKind::Traversal,
            Params::Traverse(TraverseParams {
                start: vec![json!(1)],
                labels: vec!["FOLLOWS".into()],
                max_depth: 3,
                strategy: TraversalStrategy::Bfs,
                ..TraverseParams::default()
            }),
        );
        let result = run(&action);
        assert_eq!(names(&result), vec!["Bob", "Carol"]);
        assert_eq!(result.metadata["depths"], json!([1, 2]));
    }

    #[test]
    fn test_degree() {
        let result = run(&traverse_action(ActionKind::Degree, vec![json!(1)]));
        assert_eq!(result.data, json!([{"id": 1, "in": 1, "out": 2, "degree": 3}]));
    }

    #[test]
    fn test_weighted_shortest_path() {
        let action = Action::new(
            ActionKind::ShortestPath,
            Params::Path(PathParams {
                from: Some(json!(1)),
                to: Some(json!(3)),
                weight: Some("weight".into()),
                ..PathParams::default()
            }),
        );
        let result = run(&action);
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.data[0]["length"], json!(2));
        assert_eq!(result.data[0]["cost"], json!(2));
    }

    #[test]
    fn test_shortest_path_requires_target() {
        let action = Action::new(
            ActionKind::ShortestPath,
            Params::Path(PathParams { from: Some(json!(1)), ..PathParams::default() }),
        );
        assert!(run_on(&mut JsonNode::from_native(social()), &action).is_err());
    }

    #[test]
    fn test_cycle_detection_reports_witness() {
        let action = Action::new(ActionKind::CycleDetection, Params::GraphTarget(GraphTargetParams::default()));
        let found = run(&action);
        assert_eq!(found.data, json!(true));
        assert!(found.metadata["cycle"].as_array().is_some_and(|c| c.len() >= 3));
    }

    #[test]
    fn test_set_updates_data_and_rows() {
        let mut data = JsonNode::from_native(social());
        let action = cypher("MATCH (a:Person {name: 'Alice'}) SET a.age = 31 RETURN a.age");
        let result = run_on(&mut data, &action).unwrap();
        assert_eq!(result.data, json!([{"a.age": 31}]));
        assert_eq!(data.root()["nodes"][0]["age"], json!(31));
    }

    #[test]
    fn test_detach_delete_removes_incident_edges() {
        let mut data = JsonNode::from_native(social());
        run_on(&mut data, &cypher("MATCH (n:Person {name: 'Bob'}) DETACH DELETE n")).unwrap();
        let root = data.into_inner();
        assert_eq!(root["nodes"].as_array().map(Vec::len), Some(3));
        assert_eq!(root["edges"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_create_edge_between_bound_vertices() {
        let mut data = JsonNode::from_native(social());
        let action = cypher("MATCH (a:Person {name: 'Dave'}), (b:Person {name: 'Carol'}) CREATE (a)-[:KNOWS]->(b)");
        run_on(&mut data, &action).unwrap();
        let edges = data.root()["edges"].as_array().cloned().unwrap_or_default();
        assert_eq!(edges.len(), 5);
        assert_eq!(edges[4], json!({"id": 5, "from": 4, "to": 3, "label": "KNOWS"}));
    }

    #[test]
    fn test_create_vertex_without_match() {
        let mut data = JsonNode::from_native(social());
        let result = run_on(&mut data, &cypher("CREATE (n:Person {name: 'Eve'})")).unwrap();
        assert_eq!(result.data, json!([{"id": 5, "label": "Person", "name": "Eve"}]));
        assert_eq!(data.root()["nodes"].as_array().map(Vec::len), Some(5));
    }

    #[test]
    fn test_delete_edge_by_endpoints() {
        let mut data = JsonNode::from_native(social());
        let action = Action::new(
            ActionKind::DeleteEdge,
            Params::Edge(EdgeParams {
                from: Some(Expr::lit(1)),
                label: Some("KNOWS".into()),
                ..EdgeParams::default()
            }),
        );
        assert_eq!(run_on(&mut data, &action).unwrap().affected_count, 1);
        assert_eq!(data.root()["edges"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_subgraph_keeps_inner_edges() {
        let action = Action::new(
            ActionKind::Subgraph,
            Params::GraphTarget(GraphTargetParams {
                targets: vec![Expr::lit(1), Expr::lit(2)],
                ..GraphTargetParams::default()
            }),
        );
        let result = run(&action);
        assert_eq!(result.shape, ResultShape::Graph);
        assert_eq!(result.data["edges"], json!([{"id": 1, "from": 1, "to": 2, "label": "FOLLOWS", "weight": 1}]));
    }

    #[test]
    fn test_graph_kinds_reject_tabular_data() {
        let mut data = JsonNode::from_native(json!({"users": [{"id": 1}]}));
        let action = traverse_action(ActionKind::Out, vec![json!(1)]);
        assert!(run_on(&mut data, &action).is_err());
    }

    #[test]
    fn test_next_id() {
        assert_eq!(next_id(&[json!({"id": 3}), json!({"id": "x"})]), json!(4));
        assert_eq!(next_id(&[json!({"id": "a"})]), json!(2));
        assert_eq!(next_id(&[]), json!(1));
    }
}

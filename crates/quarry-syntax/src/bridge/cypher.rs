//! Cypher clauses to actions.
//!
//! A query starting with MATCH becomes one `MATCH` node for the first
//! pattern. The remaining clauses become its children and run as a pipeline
//! over the bindings: further patterns, WHERE, writes, WITH, then
//! ORDER/LIMIT and RETURN. A query starting with CREATE or MERGE becomes
//! write actions.

use super::extract::{convert_expr, extract_order_by, extract_where_clause, value_from_expr};
use super::BuildContext;
use crate::cst::SyntaxNode;
use quarry_core::{
    Action, ActionKind, Assignment, Direction, EdgeParams, EdgePattern, Expr, GraphTargetParams,
    LimitParams, NodePattern, OrderParams, Params, PatternElement, PatternParams, PredicateParams,
    ProjectParams, Projection, PropertiesParams, QueryError, Result, SchemaObject, SchemaParams,
    SortKey, WriteParams,
};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub(super) fn build(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let first = node
        .first()
        .ok_or_else(|| QueryError::validation("empty Cypher query"))?;
    match first.rule {
        "match_clause" => build_match_query(&node.children, ctx),
        "create_clause" | "merge_clause" => build_write_query(&node.children, ctx),
        other => Err(QueryError::validation(format!(
            "Cypher query must start with MATCH, CREATE or MERGE, found {other}"
        ))),
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// Pattern plus predicates for properties that are not constants
struct BuiltPattern {
    params: PatternParams,
    predicates: Vec<Expr>,
}

fn property_map(
    node: &SyntaxNode,
    variable: Option<&str>,
    predicates: &mut Vec<Expr>,
    ctx: &mut BuildContext,
) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    let Some(properties) = node.child("properties") else {
        return Ok(map);
    };
    for property in properties.children_by("property") {
        let Some(value) = property.first() else {
            continue;
        };
        let Some(expr) = convert_expr(value, ctx)? else {
            continue;
        };
        match (value_from_expr(&expr), variable) {
            (Some(v), _) => {
                map.insert(property.text().to_string(), v);
            }
            (None, Some(var)) => {
                predicates.push(Expr::eq(Expr::field(format!("{var}.{}", property.text())), expr));
            }
            (None, None) => ctx.skip("non-constant property on an anonymous pattern element")?,
        }
    }
    Ok(map)
}

fn labels(node: &SyntaxNode) -> Vec<String> {
    node.children_by("label").map(|l| l.text().to_string()).collect()
}

fn variable(node: &SyntaxNode) -> Option<String> {
    node.child("variable").map(|v| v.text().to_string())
}

fn parse_hops(text: &str) -> Result<(u32, Option<u32>)> {
    let invalid = || QueryError::value(format!("invalid path length '{text}'"));
    let (min, max) = text.split_once("..").ok_or_else(invalid)?;
    let min = if min.is_empty() {
        1
    } else {
        min.parse().map_err(|_| invalid())?
    };
    let max = if max.is_empty() {
        None
    } else {
        Some(max.parse().map_err(|_| invalid())?)
    };
    Ok((min, max))
}

fn build_pattern(node: &SyntaxNode, optional: bool, ctx: &mut BuildContext) -> Result<BuiltPattern> {
    let mut elements = Vec::with_capacity(node.children.len());
    let mut predicates = Vec::new();

    for element in &node.children {
        let var = variable(element);
        let properties = property_map(element, var.as_deref(), &mut predicates, ctx)?;
        match element.rule {
            "node_pattern" => elements.push(PatternElement::Node(NodePattern {
                variable: var,
                labels: labels(element),
                properties,
            })),
            "rel_pattern" => {
                let (min_hops, max_hops) = match element.child("quantifier") {
                    Some(q) => parse_hops(q.text())?,
                    None => (1, Some(1)),
                };
                let direction = match element.text() {
                    "in" => Direction::In,
                    "both" => Direction::Both,
                    _ => Direction::Out,
                };
                elements.push(PatternElement::Edge(EdgePattern {
                    variable: var,
                    labels: labels(element),
                    direction,
                    min_hops,
                    max_hops,
                    properties,
                }));
            }
            other => {
                return Err(QueryError::validation(format!(
                    "unexpected pattern element '{other}'"
                )))
            }
        }
    }

    Ok(BuiltPattern {
        params: PatternParams { elements, optional },
        predicates,
    })
}

fn edge_variables(patterns: &[&SyntaxNode]) -> HashSet<String> {
    patterns
        .iter()
        .flat_map(|p| p.children_by("rel_pattern"))
        .filter_map(variable)
        .collect()
}

fn where_action(predicate: Expr) -> Action {
    Action::new(ActionKind::Where, Params::Predicate(PredicateParams { predicate }))
}

// ============================================================================
// MATCH queries
// ============================================================================

/// ORDER BY / SKIP / LIMIT collected for placement around RETURN
#[derive(Default)]
struct Tail {
    order: Vec<SortKey>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl Tail {
    fn into_actions(self) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.order.is_empty() {
            actions.push(Action::new(
                ActionKind::Order,
                Params::Order(OrderParams { keys: self.order }),
            ));
        }
        match (self.limit, self.skip) {
            (Some(count), skip) => actions.push(Action::new(
                ActionKind::Limit,
                Params::Limit(LimitParams {
                    count: Some(count),
                    offset: skip.unwrap_or(0),
                }),
            )),
            (None, Some(offset)) => actions.push(Action::new(
                ActionKind::Offset,
                Params::Limit(LimitParams {
                    count: None,
                    offset,
                }),
            )),
            (None, None) => {}
        }
        actions
    }
}

fn parse_count(node: &SyntaxNode) -> Result<u64> {
    node.text()
        .parse::<u64>()
        .map_err(|_| QueryError::value(format!("invalid row count '{}'", node.text())))
}

fn collect_tail(clause: &SyntaxNode, tail: &mut Tail, ctx: &mut BuildContext) -> Result<()> {
    match clause.rule {
        "order_by" => tail.order = extract_order_by(clause, ctx)?,
        "skip_clause" => tail.skip = Some(parse_count(clause)?),
        "limit_clause" => tail.limit = Some(parse_count(clause)?),
        _ => {}
    }
    Ok(())
}

fn projection(items: &SyntaxNode, ctx: &mut BuildContext) -> Result<ProjectParams> {
    let mut fields = Vec::new();
    for item in items.children_by("return_item") {
        let Some(expr_node) = item.first() else {
            continue;
        };
        if let Some(expr) = convert_expr(expr_node, ctx)? {
            fields.push(Projection {
                expr,
                alias: item.child("alias").map(|a| a.text().to_string()),
            });
        }
    }
    if fields.is_empty() {
        return Err(QueryError::validation(format!(
            "{} has no projectable items",
            items.rule
        )));
    }
    Ok(ProjectParams {
        fields,
        distinct: items.has_keyword("DISTINCT"),
    })
}

/// Replace sort keys naming a RETURN alias with the aliased expression
fn resolve_aliases(keys: Vec<SortKey>, returned: &ProjectParams) -> Vec<SortKey> {
    keys.into_iter()
        .map(|key| match &key.expr {
            Expr::Field(name) => {
                let aliased = returned
                    .fields
                    .iter()
                    .find(|p| p.alias.as_deref() == Some(name.as_str()));
                match aliased {
                    Some(p) => SortKey {
                        expr: p.expr.clone(),
                        descending: key.descending,
                    },
                    None => key,
                }
            }
            _ => key,
        })
        .collect()
}

fn match_actions(
    clause: &SyntaxNode,
    skip_first: bool,
    ctx: &mut BuildContext,
) -> Result<(Vec<Action>, Vec<Expr>)> {
    let optional = clause.text().starts_with("OPTIONAL");
    let mut actions = Vec::new();
    let mut predicates = Vec::new();
    for pattern in clause.children_by("pattern").skip(usize::from(skip_first)) {
        let built = build_pattern(pattern, optional, ctx)?;
        predicates.extend(built.predicates);
        actions.push(Action::new(ActionKind::Match, Params::Pattern(built.params)));
    }
    if let Some(filter) = clause.child("where_clause") {
        predicates.extend(extract_where_clause(filter, ctx)?);
    }
    Ok((actions, predicates))
}

fn build_match_query(clauses: &[SyntaxNode], ctx: &mut BuildContext) -> Result<Action> {
    let first = &clauses[0];
    let first_pattern = first
        .child("pattern")
        .ok_or_else(|| QueryError::validation("MATCH without a pattern"))?;
    let root_pattern = build_pattern(first_pattern, first.text().starts_with("OPTIONAL"), ctx)?;

    let patterns: Vec<&SyntaxNode> = clauses
        .iter()
        .filter(|c| c.is("match_clause"))
        .flat_map(|c| c.children_by("pattern"))
        .collect();
    let edge_vars = edge_variables(&patterns);

    let mut children = Vec::new();
    let (extra, first_predicates) = match_actions(first, true, ctx)?;
    let mut predicates = root_pattern.predicates;
    predicates.extend(first_predicates);
    children.extend(extra);
    children.extend(Expr::conjoin(predicates).map(where_action));

    let mut returned: Option<ProjectParams> = None;
    let mut tail = Tail::default();

    for clause in &clauses[1..] {
        if returned.is_some() && !matches!(clause.rule, "order_by" | "skip_clause" | "limit_clause") {
            return Err(QueryError::validation(format!(
                "{} after RETURN",
                clause.rule
            )));
        }
        match clause.rule {
            "match_clause" => {
                let (actions, predicates) = match_actions(clause, false, ctx)?;
                children.extend(actions);
                children.extend(Expr::conjoin(predicates).map(where_action));
            }
            "create_clause" => children.extend(create_in_match(clause, ctx)?),
            "merge_clause" => ctx.skip("MERGE after MATCH")?,
            "delete_clause" => children.extend(delete_actions(clause, &edge_vars)?),
            "set_clause" => children.push(set_action(clause, ctx)?),
            "remove_clause" => children.push(Action::new(
                ActionKind::Set,
                Params::Properties(PropertiesParams {
                    keys: clause.children.iter().map(|f| f.text().to_string()).collect(),
                    ..PropertiesParams::default()
                }),
            )),
            "with_clause" => {
                children.push(Action::new(
                    ActionKind::Project,
                    Params::Project(projection(clause, ctx)?),
                ));
                if let Some(filter) = clause.child("where_clause") {
                    children.extend(extract_where_clause(filter, ctx)?.map(where_action));
                }
            }
            "return_clause" => returned = Some(projection(clause, ctx)?),
            "order_by" | "skip_clause" | "limit_clause" => {
                collect_tail(clause, &mut tail, ctx)?;
                // ORDER/SKIP/LIMIT before RETURN belong to the preceding WITH
                if returned.is_none() {
                    children.extend(std::mem::take(&mut tail).into_actions());
                }
            }
            other => {
                return Err(QueryError::validation(format!(
                    "unexpected Cypher clause '{other}'"
                )))
            }
        }
    }

    match returned {
        Some(returned) => {
            let aggregated = returned.distinct
                || returned.fields.iter().any(|p| p.expr.contains_aggregate());
            let return_action = |params: ProjectParams| Action::new(ActionKind::Return, Params::Project(params));
            if aggregated {
                children.push(return_action(returned));
                children.extend(tail.into_actions());
            } else {
                tail.order = resolve_aliases(tail.order, &returned);
                children.extend(tail.into_actions());
                children.push(return_action(returned));
            }
        }
        None => children.extend(tail.into_actions()),
    }

    Ok(Action::new(ActionKind::Match, Params::Pattern(root_pattern.params)).with_children(children))
}

fn assignments_from_properties(
    prefix: &str,
    node: &SyntaxNode,
    ctx: &mut BuildContext,
) -> Result<Vec<Assignment>> {
    let mut out = Vec::new();
    let Some(properties) = node.child("properties") else {
        return Ok(out);
    };
    for property in properties.children_by("property") {
        let Some(value) = property.first() else {
            continue;
        };
        if let Some(expr) = convert_expr(value, ctx)? {
            let path = if prefix.is_empty() {
                property.text().to_string()
            } else {
                format!("{prefix}.{}", property.text())
            };
            out.push(Assignment::new(path, expr));
        }
    }
    Ok(out)
}

fn set_action(clause: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let mut assignments = Vec::new();
    for item in &clause.children {
        match item.rule {
            "set_property" => {
                let Some(value) = item.first() else {
                    continue;
                };
                if let Some(expr) = convert_expr(value, ctx)? {
                    assignments.push(Assignment::new(item.text(), expr));
                }
            }
            "set_merge" => assignments.extend(assignments_from_properties(item.text(), item, ctx)?),
            _ => {}
        }
    }
    Ok(Action::new(
        ActionKind::Set,
        Params::Properties(PropertiesParams {
            assignments,
            ..PropertiesParams::default()
        }),
    ))
}

fn delete_actions(clause: &SyntaxNode, edge_vars: &HashSet<String>) -> Result<Vec<Action>> {
    let mut nodes = Vec::new();
    let mut actions = Vec::new();
    for target in &clause.children {
        if !target.is("field") {
            return Err(QueryError::validation(
                "DELETE targets must be pattern variables",
            ));
        }
        let name = target.text().to_string();
        if edge_vars.contains(&name) {
            actions.push(Action::new(
                ActionKind::DeleteEdge,
                Params::Edge(EdgeParams {
                    from: Some(Expr::Variable(name)),
                    ..EdgeParams::default()
                }),
            ));
        } else {
            nodes.push(Expr::Variable(name));
        }
    }
    if !nodes.is_empty() {
        actions.push(Action::new(
            ActionKind::DetachDelete,
            Params::GraphTarget(GraphTargetParams {
                targets: nodes,
                directed: true,
                ..GraphTargetParams::default()
            }),
        ));
    }
    Ok(actions)
}

/// Node element of a CREATE pattern as a vertex creation
fn create_vertex(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let mut predicates = Vec::new();
    let var = variable(node);
    let properties = property_map(node, None, &mut predicates, ctx)?;
    let labels = labels(node);
    let name = var
        .or_else(|| labels.first().cloned())
        .unwrap_or_else(|| "vertex".to_string());
    Ok(Action::new(
        ActionKind::Create,
        Params::Schema(SchemaParams {
            object: SchemaObject::Vertex,
            name,
            labels,
            properties,
            ..SchemaParams::default()
        }),
    ))
}

/// CREATE after MATCH: relationships between bound variables, or new nodes
fn create_in_match(clause: &SyntaxNode, ctx: &mut BuildContext) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    for pattern in clause.children_by("pattern") {
        let elements = &pattern.children;
        if elements.len() == 1 {
            actions.push(create_vertex(&elements[0], ctx)?);
            continue;
        }
        for window in elements.windows(3).step_by(2) {
            let (left, rel, right) = (&window[0], &window[1], &window[2]);
            let (Some(l), Some(r)) = (variable(left), variable(right)) else {
                return Err(QueryError::validation(
                    "CREATE relationships must connect bound variables",
                ));
            };
            let (from, to) = if rel.text() == "in" { (r, l) } else { (l, r) };
            actions.push(Action::new(
                ActionKind::CreateEdge,
                Params::Edge(EdgeParams {
                    from: Some(Expr::Variable(from)),
                    to: Some(Expr::Variable(to)),
                    label: labels(rel).into_iter().next(),
                    properties: assignments_from_properties("", rel, ctx)?,
                    ..EdgeParams::default()
                }),
            ));
        }
    }
    Ok(actions)
}

// ============================================================================
// CREATE / MERGE queries
// ============================================================================

fn build_write_query(clauses: &[SyntaxNode], ctx: &mut BuildContext) -> Result<Action> {
    let mut actions = Vec::new();
    for clause in clauses {
        match clause.rule {
            "create_clause" => {
                for pattern in clause.children_by("pattern") {
                    if pattern.children.len() != 1 {
                        return Err(QueryError::validation(
                            "CREATE of a relationship requires MATCH to bind its endpoints",
                        ));
                    }
                    actions.push(create_vertex(&pattern.children[0], ctx)?);
                }
            }
            "merge_clause" => actions.push(merge_action(clause, ctx)?),
            "return_clause" => ctx.skip("RETURN after CREATE")?,
            other => {
                return Err(QueryError::validation(format!(
                    "{other} is not supported in a write-only query"
                )))
            }
        }
    }
    Ok(match actions.len() {
        1 => actions.remove(0),
        _ => Action::bare(ActionKind::Pipe).with_children(actions),
    })
}

/// `MERGE (n:Label {key: value})` upserts one vertex keyed on its properties
fn merge_action(clause: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let node = clause
        .first()
        .filter(|p| p.children.len() == 1)
        .and_then(|p| p.first())
        .ok_or_else(|| QueryError::validation("MERGE supports a single node pattern"))?;
    let target = labels(node)
        .into_iter()
        .next()
        .ok_or_else(|| QueryError::validation("MERGE requires a label"))?;
    let assignments = assignments_from_properties("", node, ctx)?;
    let columns: Vec<String> = assignments.iter().map(|a| a.path.clone()).collect();
    let row: Vec<Expr> = assignments.into_iter().map(|a| a.value).collect();
    Ok(Action::new(
        ActionKind::Merge,
        Params::Write(WriteParams {
            target,
            key: columns.clone(),
            columns,
            rows: vec![row],
            ..WriteParams::default()
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::bridge::ParserBridge;
    use crate::format::QueryFormat;
    use quarry_core::{Action, ActionKind, Direction, Expr, PatternElement};

    fn parse(query: &str) -> Action {
        ParserBridge::new()
            .parse(query, QueryFormat::Cypher)
            .unwrap()
            .action
    }

    fn kinds(action: &Action) -> Vec<ActionKind> {
        action.children.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn test_match_where_return() {
        let action = parse("MATCH (a:Person)-[:FOLLOWS]->(b:Person) WHERE a.name = 'Alice' RETURN b.name");
        assert_eq!(action.kind, ActionKind::Match);
        let pattern = action.params.as_pattern().unwrap();
        assert_eq!(pattern.elements.len(), 3);
        match &pattern.elements[1] {
            PatternElement::Edge(edge) => {
                assert_eq!(edge.labels, vec!["FOLLOWS"]);
                assert_eq!(edge.direction, Direction::Out);
            }
            other => panic!("expected edge, got {other:?}"),
        }
        assert_eq!(kinds(&action), vec![ActionKind::Where, ActionKind::Return]);
    }

    #[test]
    fn test_order_goes_before_plain_return() {
        let action = parse("MATCH (n:Person) RETURN n.name AS name ORDER BY name DESC LIMIT 2");
        assert_eq!(
            kinds(&action),
            vec![ActionKind::Order, ActionKind::Limit, ActionKind::Return]
        );
        let order = action.children[0].params.as_order().unwrap();
        assert_eq!(order.keys[0].expr, Expr::field("n.name"));
    }

    #[test]
    fn test_order_goes_after_aggregating_return() {
        let action = parse("MATCH (n:Person) RETURN n.city AS city, count(*) AS c ORDER BY c DESC");
        assert_eq!(kinds(&action), vec![ActionKind::Return, ActionKind::Order]);
    }

    #[test]
    fn test_variable_length_and_properties() {
        let action = parse("MATCH (a {name: 'Alice'})-[r:KNOWS*1..3 {since: 2020}]-(b) RETURN b");
        let pattern = action.params.as_pattern().unwrap();
        match (&pattern.elements[0], &pattern.elements[1]) {
            (PatternElement::Node(a), PatternElement::Edge(r)) => {
                assert_eq!(a.properties["name"], "Alice");
                assert_eq!((r.min_hops, r.max_hops), (1, Some(3)));
                assert_eq!(r.direction, Direction::Both);
                assert_eq!(r.properties["since"], 2020);
            }
            other => panic!("unexpected elements {other:?}"),
        }
    }

    #[test]
    fn test_write_clauses() {
        let action = parse(
            "MATCH (a:Person {name: 'Alice'}), (b:Person {name: 'Bob'}) \
             CREATE (a)-[:KNOWS]->(b) SET a.age = 31 REMOVE a.tmp",
        );
        assert_eq!(
            kinds(&action),
            vec![
                ActionKind::Match,
                ActionKind::CreateEdge,
                ActionKind::Set,
                ActionKind::Set
            ]
        );
        let edge = action.children[1].params.as_edge().unwrap();
        assert_eq!(edge.from, Some(Expr::Variable("a".into())));
        assert_eq!(edge.label.as_deref(), Some("KNOWS"));
    }

    #[test]
    fn test_delete_nodes_and_relationships() {
        let action = parse("MATCH (a)-[r:KNOWS]->(b) DELETE r, b");
        assert_eq!(
            kinds(&action),
            vec![ActionKind::DeleteEdge, ActionKind::DetachDelete]
        );
    }

    #[test]
    fn test_standalone_create() {
        let action = parse("CREATE (n:Person {name: 'Dan', age: 40})");
        assert_eq!(action.kind, ActionKind::Create);
        let schema = action.params.as_schema().unwrap();
        assert_eq!(schema.labels, vec!["Person"]);
        assert_eq!(schema.properties["age"], 40);

        let action = parse("CREATE (a:X), (b:Y)");
        assert_eq!(action.kind, ActionKind::Pipe);

        assert!(ParserBridge::new()
            .parse("CREATE (a)-[:R]->(b)", QueryFormat::Cypher)
            .is_err());
    }

    #[test]
    fn test_merge() {
        let action = parse("MERGE (p:Person {name: 'Eve'})");
        assert_eq!(action.kind, ActionKind::Merge);
        let write = action.params.as_write().unwrap();
        assert_eq!(write.target, "Person");
        assert_eq!(write.key, vec!["name"]);
    }

    #[test]
    fn test_with_projects_before_return() {
        let action = parse("MATCH (n:Person) WITH n.city AS city, count(*) AS c WHERE c > 1 RETURN city");
        assert_eq!(
            kinds(&action),
            vec![ActionKind::Project, ActionKind::Where, ActionKind::Return]
        );
    }

    #[test]
    fn test_clause_after_return_is_rejected() {
        assert!(ParserBridge::new()
            .parse("MATCH (n) RETURN n MATCH (m) RETURN m", QueryFormat::Cypher)
            .is_err());
    }
}

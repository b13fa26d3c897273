//! SQL statements to actions.
//!
//! A SELECT becomes one `SELECT` node whose children follow the clause
//! order: source, joins, WHERE, GROUP, HAVING, windows, ORDER, LIMIT.

use super::extract::{
    extract_alter_action, extract_assignments, extract_create_definition, extract_order_by,
    extract_select_list, extract_table_name, extract_where_clause, require_expr,
};
use super::BuildContext;
use crate::cst::SyntaxNode;
use quarry_core::{
    Action, ActionKind, BindingParams, ColumnDef, Expr, GroupParams, JoinParams, JoinType,
    LimitParams, OrderParams, Params, PredicateParams, Projection, QueryError, Result, SchemaObject,
    SchemaParams, SelectParams, Source, UnionParams, WriteParams,
};

pub(super) fn build(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let action = match node.rule {
        "select_statement" => build_select(node, ctx)?,
        "union" => build_union(node, ctx)?,
        "with_statement" => build_with(node, ctx)?,
        "insert_statement" => build_insert(node, ctx)?,
        "update_statement" => build_update(node, ctx)?,
        "delete_statement" => build_delete(node, ctx)?,
        "create_table" => Action::new(
            ActionKind::Create,
            Params::Schema(extract_create_definition(node)?),
        ),
        "create_index" => build_create_index(node),
        "drop_statement" => build_drop(node)?,
        "alter_statement" => build_alter(node)?,
        other => {
            return Err(QueryError::validation(format!(
                "unexpected SQL statement '{other}'"
            )))
        }
    };
    Ok(match node.span {
        Some(span) => action.with_span(span),
        None => action,
    })
}

fn predicate(kind: ActionKind, predicate: Expr) -> Action {
    Action::new(kind, Params::Predicate(PredicateParams { predicate }))
}

fn where_child(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Option<Action>> {
    match node.child("where_clause") {
        Some(clause) => Ok(extract_where_clause(clause, ctx)?.map(|p| predicate(ActionKind::Where, p))),
        None => Ok(None),
    }
}

fn parse_count(node: &SyntaxNode) -> Result<u64> {
    node.text()
        .parse::<u64>()
        .map_err(|_| QueryError::value(format!("invalid row count '{}'", node.text())))
}

fn build_select(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let select_clause = node
        .child("select_clause")
        .ok_or_else(|| QueryError::validation("SELECT without a select list"))?;
    let mut list = extract_select_list(select_clause, ctx)?;
    if list.fields.is_empty() {
        ctx.warn("every select item was dropped, selecting all fields");
        list.fields.push(Projection::new(Expr::Star));
    }

    let mut params = SelectParams {
        fields: list.fields,
        from: None,
        distinct: list.distinct,
    };
    let mut children = Vec::new();

    if let Some(from) = node.child("from_clause").and_then(SyntaxNode::first) {
        if from.is("subquery") {
            let inner = from
                .first()
                .ok_or_else(|| QueryError::validation("empty subquery"))?;
            children.push(build(inner, ctx)?);
            if let Some(alias) = from.child("alias") {
                params.from = Some(Source {
                    name: alias.text().to_string(),
                    alias: Some(alias.text().to_string()),
                });
            }
        } else {
            params.from = Some(extract_table_name(from));
        }
    }

    for join in node.children_by("join_clause") {
        let target = join
            .child("table_name")
            .map(extract_table_name)
            .ok_or_else(|| QueryError::validation("JOIN without a table"))?;
        let on = match join.child("on") {
            Some(on) => extract_where_clause(on, ctx)?,
            None => None,
        };
        let join_type = match join.text() {
            "LEFT" => JoinType::Left,
            "RIGHT" => JoinType::Right,
            "FULL" => JoinType::Full,
            "CROSS" => JoinType::Cross,
            _ => JoinType::Inner,
        };
        children.push(Action::new(
            ActionKind::Join,
            Params::Join(JoinParams {
                join_type,
                target,
                on,
            }),
        ));
    }

    children.extend(where_child(node, ctx)?);

    if let Some(group) = node.child("group_by") {
        let mut keys = Vec::with_capacity(group.children.len());
        for key in &group.children {
            keys.push(require_expr(key, ctx)?);
        }
        children.push(Action::new(ActionKind::Group, Params::Group(GroupParams { keys })));
    }

    if let Some(having) = node.child("having_clause") {
        children.extend(extract_where_clause(having, ctx)?.map(|p| predicate(ActionKind::Having, p)));
    }

    for window in list.windows {
        children.push(Action::new(ActionKind::Window, Params::Window(window)));
    }

    if let Some(order) = node.child("order_by") {
        let keys = extract_order_by(order, ctx)?;
        if !keys.is_empty() {
            children.push(Action::new(ActionKind::Order, Params::Order(OrderParams { keys })));
        }
    }

    let count = node.child("limit_clause").map(parse_count).transpose()?;
    let offset = node.child("offset_clause").map(parse_count).transpose()?;
    match (count, offset) {
        (Some(count), offset) => children.push(Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams {
                count: Some(count),
                offset: offset.unwrap_or(0),
            }),
        )),
        (None, Some(offset)) => children.push(Action::new(
            ActionKind::Offset,
            Params::Limit(LimitParams {
                count: None,
                offset,
            }),
        )),
        (None, None) => {}
    }

    Ok(Action::new(ActionKind::Select, Params::Select(params)).with_children(children))
}

fn build_union(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let mut children = Vec::with_capacity(2);
    for side in &node.children {
        children.push(build(side, ctx)?);
    }
    Ok(Action::new(
        ActionKind::Union,
        Params::Union(UnionParams {
            distinct: node.text() == "UNION",
        }),
    )
    .with_children(children))
}

/// `WITH a AS (q1), b AS (q2) body` nests as `WITH a [q1, WITH b [q2, body]]`
fn build_with(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let (body, ctes) = node
        .children
        .split_last()
        .ok_or_else(|| QueryError::validation("WITH without a body"))?;

    let mut action = build(body, ctx)?;
    for cte in ctes.iter().rev() {
        let query = cte
            .first()
            .ok_or_else(|| QueryError::validation("empty common table expression"))?;
        action = Action::new(
            ActionKind::With,
            Params::Binding(BindingParams {
                name: cte.text().to_string(),
                value: None,
            }),
        )
        .with_child(build(query, ctx)?)
        .with_child(action);
    }
    Ok(action)
}

fn target_name(node: &SyntaxNode) -> Result<String> {
    node.child("table_name")
        .map(|t| t.text().to_string())
        .ok_or_else(|| QueryError::validation(format!("{} without a table", node.rule)))
}

fn build_insert(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let mut params = WriteParams {
        target: target_name(node)?,
        ..WriteParams::default()
    };
    if let Some(columns) = node.child("column_list") {
        params.columns = columns.children.iter().map(|c| c.text().to_string()).collect();
    }

    let mut children = Vec::new();
    match node.child("values_clause") {
        Some(values) => {
            for row in values.children_by("row") {
                let mut exprs = Vec::with_capacity(row.children.len());
                for value in &row.children {
                    exprs.push(require_expr(value, ctx)?);
                }
                if !params.columns.is_empty() && exprs.len() != params.columns.len() {
                    return Err(QueryError::validation(format!(
                        "INSERT row has {} values for {} columns",
                        exprs.len(),
                        params.columns.len()
                    )));
                }
                params.rows.push(exprs);
            }
        }
        None => {
            let source = node
                .children
                .last()
                .filter(|c| !c.is("table_name") && !c.is("column_list"))
                .ok_or_else(|| QueryError::validation("INSERT without values"))?;
            children.push(build(source, ctx)?);
        }
    }

    Ok(Action::new(ActionKind::Insert, Params::Write(params)).with_children(children))
}

fn build_update(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let assignments = match node.child("set_clause") {
        Some(set) => extract_assignments(set, ctx)?,
        None => Vec::new(),
    };
    if assignments.is_empty() {
        return Err(QueryError::validation("UPDATE without assignments"));
    }
    let params = WriteParams {
        target: target_name(node)?,
        assignments,
        ..WriteParams::default()
    };
    Ok(Action::new(ActionKind::Update, Params::Write(params)).with_children(where_child(node, ctx)?))
}

fn build_delete(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let params = WriteParams {
        target: target_name(node)?,
        ..WriteParams::default()
    };
    Ok(Action::new(ActionKind::Delete, Params::Write(params)).with_children(where_child(node, ctx)?))
}

fn build_create_index(node: &SyntaxNode) -> Action {
    let table = node.child("table_name").map(|t| t.text().to_string());
    let columns: Vec<ColumnDef> = node
        .children_by("column")
        .map(|c| ColumnDef::new(c.text()))
        .collect();
    let name = if node.text().is_empty() {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        format!("idx_{}_{}", table.as_deref().unwrap_or_default(), names.join("_"))
    } else {
        node.text().to_string()
    };
    Action::new(
        ActionKind::Create,
        Params::Schema(SchemaParams {
            object: SchemaObject::Index,
            name,
            columns,
            on: table,
            if_exists: node.has_keyword("IF NOT EXISTS"),
            ..SchemaParams::default()
        }),
    )
}

fn build_drop(node: &SyntaxNode) -> Result<Action> {
    let object = match node.text() {
        "TABLE" => SchemaObject::Collection,
        "INDEX" => SchemaObject::Index,
        "VIEW" => SchemaObject::View,
        other => return Err(QueryError::validation(format!("cannot drop '{other}'"))),
    };
    let name = node
        .child("name")
        .map(|n| n.text().to_string())
        .ok_or_else(|| QueryError::validation("DROP without a name"))?;
    Ok(Action::new(
        ActionKind::Drop,
        Params::Schema(SchemaParams {
            object,
            name,
            if_exists: node.has_keyword("IF EXISTS"),
            ..SchemaParams::default()
        }),
    ))
}

fn build_alter(node: &SyntaxNode) -> Result<Action> {
    let alter = node
        .children_by("alter_action")
        .map(extract_alter_action)
        .collect::<Result<Vec<_>>>()?;
    Ok(Action::new(
        ActionKind::Alter,
        Params::Schema(SchemaParams {
            name: target_name(node)?,
            alter,
            ..SchemaParams::default()
        }),
    ))
}

#[cfg(test)]
mod tests {
    use crate::bridge::ParserBridge;
    use crate::format::QueryFormat;
    use quarry_core::{Action, ActionKind, AlterOp, Expr, JoinType, SchemaObject};
    use test_case::test_case;

    fn parse(sql: &str) -> Action {
        ParserBridge::new().parse(sql, QueryFormat::Sql).unwrap().action
    }

    fn kinds(action: &Action) -> Vec<ActionKind> {
        action.children.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn test_select_with_where_and_limit() {
        let action = parse("SELECT name FROM users WHERE age > 25 LIMIT 2 OFFSET 1");
        let select = action.params.as_select().unwrap();
        assert_eq!(select.fields[0].expr, Expr::field("name"));
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert_eq!(kinds(&action), vec![ActionKind::Where, ActionKind::Limit]);
        let limit = action.children[1].params.as_limit().unwrap();
        assert_eq!((limit.count, limit.offset), (Some(2), 1));
    }

    #[test]
    fn test_clause_order_is_canonical() {
        let action = parse(
            "SELECT dept, COUNT(*) AS n FROM emp e JOIN depts d ON e.dept = d.id \
             WHERE salary > 10 GROUP BY dept HAVING COUNT(*) > 1 ORDER BY n DESC LIMIT 5",
        );
        assert_eq!(
            kinds(&action),
            vec![
                ActionKind::Join,
                ActionKind::Where,
                ActionKind::Group,
                ActionKind::Having,
                ActionKind::Order,
                ActionKind::Limit
            ]
        );
        let join = action.children[0].params.as_join().unwrap();
        assert_eq!(join.join_type, JoinType::Inner);
        assert_eq!(join.target.qualifier(), "d");
    }

    #[test]
    fn test_offset_without_limit() {
        let action = parse("SELECT * FROM users OFFSET 3");
        assert_eq!(kinds(&action), vec![ActionKind::Offset]);
    }

    #[test]
    fn test_subquery_source() {
        let action = parse("SELECT t.name FROM (SELECT * FROM users WHERE age > 30) t");
        assert_eq!(action.children[0].kind, ActionKind::Select);
        assert_eq!(action.params.as_select().unwrap().from.as_ref().unwrap().name, "t");
    }

    #[test]
    fn test_union_and_with() {
        let action = parse("SELECT a FROM x UNION ALL SELECT a FROM y");
        assert_eq!(action.kind, ActionKind::Union);
        assert!(!action.params.as_union().unwrap().distinct);

        let action = parse("WITH old AS (SELECT * FROM users WHERE age > 30) SELECT name FROM old");
        assert_eq!(action.kind, ActionKind::With);
        assert_eq!(action.params.as_binding().unwrap().name, "old");
        assert_eq!(action.children.len(), 2);
    }

    #[test_case("INSERT INTO users (name, age) VALUES ('Dan', 40), ('Eve', 22)", ActionKind::Insert; "insert")]
    #[test_case("UPDATE users SET age = age + 1 WHERE name = 'Bob'", ActionKind::Update; "update")]
    #[test_case("DELETE FROM users WHERE age < 18", ActionKind::Delete; "delete")]
    #[test_case("CREATE TABLE t (id INT PRIMARY KEY)", ActionKind::Create; "create table")]
    #[test_case("CREATE INDEX ON users (age)", ActionKind::Create; "create index")]
    #[test_case("DROP TABLE IF EXISTS t", ActionKind::Drop; "drop")]
    #[test_case("ALTER TABLE t ADD COLUMN x INT", ActionKind::Alter; "alter")]
    fn test_statement_kinds(sql: &str, kind: ActionKind) {
        assert_eq!(parse(sql).kind, kind);
    }

    #[test]
    fn test_insert_rows() {
        let action = parse("INSERT INTO users (name, age) VALUES ('Dan', 40), ('Eve', 22)");
        let write = action.params.as_write().unwrap();
        assert_eq!(write.columns, vec!["name", "age"]);
        assert_eq!(write.rows.len(), 2);
        assert_eq!(write.rows[1][1], Expr::lit(22));
    }

    #[test]
    fn test_insert_arity_mismatch() {
        let err = crate::bridge::ParserBridge::new()
            .parse("INSERT INTO t (a, b) VALUES (1)", QueryFormat::Sql)
            .unwrap_err();
        assert!(err.to_string().contains("1 values for 2 columns"));
    }

    #[test]
    fn test_index_name_is_derived() {
        let action = parse("CREATE INDEX ON users (age)");
        let schema = action.params.as_schema().unwrap();
        assert_eq!(schema.object, SchemaObject::Index);
        assert_eq!(schema.name, "idx_users_age");
        assert_eq!(schema.on.as_deref(), Some("users"));
    }

    #[test]
    fn test_alter_actions() {
        let action = parse("ALTER TABLE t RENAME COLUMN a TO b");
        let schema = action.params.as_schema().unwrap();
        assert_eq!(
            schema.alter,
            vec![AlterOp::RenameColumn {
                from: "a".into(),
                to: "b".into()
            }]
        );
    }
}

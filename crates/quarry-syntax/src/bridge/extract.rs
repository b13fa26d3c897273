//! CST to expression, value and parameter-record conversion shared by the
//! per-format builders.

use super::BuildContext;
use crate::cst::{SyntaxNode, TokenType};
use quarry_core::expr::is_scalar_function;
use quarry_core::{
    AggregateFunc, AlterOp, Assignment, BinaryOp, ColumnDef, Expr, Projection, QueryError,
    Result, SchemaObject, SchemaParams, SortKey, Source, WindowFunction, WindowParams,
};
use serde_json::{Map, Number, Value};

// ============================================================================
// Scalars
// ============================================================================

/// Integer when the text is integral, float otherwise
pub fn number_value(text: &str) -> Result<Value> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| QueryError::value(format!("invalid number '{text}'")))
}

/// Value of a literal leaf (`string`, `number`, `boolean`, `null`)
pub fn literal_value(node: &SyntaxNode) -> Result<Option<Value>> {
    Ok(match node.rule {
        "string" => Some(Value::String(node.text().to_string())),
        "number" => Some(number_value(node.text())?),
        "boolean" => Some(Value::Bool(node.text().eq_ignore_ascii_case("true"))),
        "null" => Some(Value::Null),
        _ => None,
    })
}

/// Constant value of an expression, when it has one
pub fn value_from_expr(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Neg(inner) => match value_from_expr(inner)? {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Value::from(-i)),
                None => n.as_f64().and_then(|f| Number::from_f64(-f)).map(Value::Number),
            },
            _ => None,
        },
        Expr::List(items) => items
            .iter()
            .map(value_from_expr)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Expr::Param(name) => Some(Value::String(format!("${name}"))),
        _ => None,
    }
}

/// Relaxed-JSON CST (`object`, `array`, scalars) to a JSON value.
///
/// `$name` variables and bare enum words become strings.
pub fn json_from_cst(node: &SyntaxNode) -> Result<Value> {
    match node.rule {
        "object" => {
            let mut map = Map::new();
            for member in node.children_by("member") {
                let value = member
                    .first()
                    .ok_or_else(|| QueryError::validation("object member without value"))?;
                map.insert(member.text().to_string(), json_from_cst(value)?);
            }
            Ok(Value::Object(map))
        }
        "array" => node
            .children
            .iter()
            .map(json_from_cst)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        "variable" => Ok(Value::String(format!("${}", node.text()))),
        "enum" => Ok(Value::String(node.text().to_string())),
        _ => literal_value(node)?
            .ok_or_else(|| QueryError::validation(format!("unexpected '{}' in document", node.rule))),
    }
}

// ============================================================================
// Expressions
// ============================================================================

pub fn binary_op(text: &str) -> Option<BinaryOp> {
    Some(match text {
        "=" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "AND" => BinaryOp::And,
        "OR" => BinaryOp::Or,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "CONTAINS" => BinaryOp::Contains,
        "STARTS WITH" => BinaryOp::StartsWith,
        "ENDS WITH" => BinaryOp::EndsWith,
        "=~" => BinaryOp::Regex,
        _ => return None,
    })
}

/// Source-like rendering of an expression CST, kept for raw fallbacks
pub fn cst_text(node: &SyntaxNode) -> String {
    match node.rule {
        "string" => format!("'{}'", node.text().replace('\'', "''")),
        "call" => {
            let args: Vec<String> = node.operands().map(cst_text).collect();
            format!("{}({})", node.text(), args.join(", "))
        }
        "list" => {
            let items: Vec<String> = node.children.iter().map(cst_text).collect();
            format!("[{}]", items.join(", "))
        }
        "not" => format!("NOT {}", node.first().map(cst_text).unwrap_or_default()),
        "neg" => format!("-{}", node.first().map(cst_text).unwrap_or_default()),
        _ if node.children.is_empty() => node.text().to_string(),
        _ => {
            let mut parts: Vec<String> = Vec::new();
            for (i, child) in node.children.iter().enumerate() {
                parts.push(cst_text(child));
                if i == 0 && node.text.is_some() && node.rule != "binary" {
                    parts.push(node.text().to_string());
                }
            }
            parts.join(" ")
        }
    }
}

fn boxed(e: Expr) -> Box<Expr> {
    Box::new(e)
}

/// Convert an expression CST.
///
/// `None` means the construct was dropped in LENIENT mode. A dropped operand
/// of `AND`/`OR` leaves the other operand; any other dropped operand drops
/// the enclosing expression.
pub fn convert_expr(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    if let Some(value) = literal_value(node)? {
        return Ok(Some(Expr::Literal(value)));
    }

    let expr = match node.rule {
        "field" => Expr::Field(node.text().to_string()),
        "parameter" => Expr::Param(node.text().to_string()),
        "variable" => Expr::Variable(node.text().to_string()),
        "star" => Expr::Star,
        "not" => match operand(node, 0, ctx)? {
            Some(e) => Expr::Not(boxed(e)),
            None => return Ok(None),
        },
        "neg" => match operand(node, 0, ctx)? {
            Some(e) => {
                let negated = Expr::Neg(boxed(e));
                match value_from_expr(&negated) {
                    Some(v) => Expr::Literal(v),
                    None => negated,
                }
            }
            None => return Ok(None),
        },
        "binary" => return convert_binary(node, ctx),
        "like" => {
            let (Some(expr), Some(pattern)) = (operand(node, 0, ctx)?, operand(node, 1, ctx)?) else {
                return Ok(None);
            };
            let text = node.text().to_ascii_uppercase();
            Expr::Like {
                expr: boxed(expr),
                pattern: boxed(pattern),
                negated: text.starts_with("NOT"),
                case_insensitive: text.contains("ILIKE"),
            }
        }
        "in" => {
            let Some(expr) = operand(node, 0, ctx)? else {
                return Ok(None);
            };
            let mut list = Vec::with_capacity(node.children.len().saturating_sub(1));
            for item in &node.children[1..] {
                match convert_expr(item, ctx)? {
                    Some(e) => list.push(e),
                    None => return Ok(None),
                }
            }
            Expr::In {
                expr: boxed(expr),
                list,
                negated: node.text().starts_with("NOT"),
            }
        }
        "between" => {
            let (Some(expr), Some(low), Some(high)) = (
                operand(node, 0, ctx)?,
                operand(node, 1, ctx)?,
                operand(node, 2, ctx)?,
            ) else {
                return Ok(None);
            };
            Expr::Between {
                expr: boxed(expr),
                low: boxed(low),
                high: boxed(high),
                negated: node.text().starts_with("NOT"),
            }
        }
        "is_null" => match operand(node, 0, ctx)? {
            Some(e) => Expr::IsNull {
                expr: boxed(e),
                negated: node.text().contains("NOT"),
            },
            None => return Ok(None),
        },
        "list" => {
            let mut items = Vec::with_capacity(node.children.len());
            for item in &node.children {
                match convert_expr(item, ctx)? {
                    Some(e) => items.push(e),
                    None => return Ok(None),
                }
            }
            Expr::List(items)
        }
        "call" => return convert_call(node, ctx),
        other => return ctx.unhandled(&format!("expression '{other}'"), cst_text(node)),
    };
    Ok(Some(expr))
}

/// Convert and require a value; a dropped expression is a validation error
pub fn require_expr(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Expr> {
    convert_expr(node, ctx)?.ok_or_else(|| {
        QueryError::validation(format!("required expression '{}' was dropped", cst_text(node)))
    })
}

fn operand(node: &SyntaxNode, index: usize, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let child = node
        .children
        .get(index)
        .ok_or_else(|| QueryError::validation(format!("malformed '{}' node", node.rule)))?;
    convert_expr(child, ctx)
}

fn convert_binary(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let op_text = node.children.get(1).map(SyntaxNode::text).unwrap_or_default();
    let Some(op) = binary_op(op_text) else {
        return ctx.unhandled(&format!("operator '{op_text}'"), cst_text(node));
    };
    let left = operand(node, 0, ctx)?;
    let right = operand(node, 2, ctx)?;
    Ok(match (left, right) {
        (Some(l), Some(r)) => Some(Expr::binary(op, l, r)),
        (Some(one), None) | (None, Some(one)) if matches!(op, BinaryOp::And | BinaryOp::Or) => {
            Some(one)
        }
        _ => None,
    })
}

fn convert_call(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let name = node.text();
    let distinct = node.has_keyword("DISTINCT");
    let mut args = Vec::new();
    for arg in node.operands() {
        match convert_expr(arg, ctx)? {
            Some(e) => args.push(e),
            None => return Ok(None),
        }
    }

    if let Some(func) = AggregateFunc::from_name(name) {
        let arg = args.into_iter().next().filter(|a| !matches!(a, Expr::Star));
        return Ok(Some(Expr::Aggregate {
            func,
            arg: arg.map(Box::new),
            distinct,
        }));
    }
    if name.eq_ignore_ascii_case("exists") {
        return match args.into_iter().next() {
            Some(arg) => Ok(Some(Expr::Exists(boxed(arg)))),
            None => Err(QueryError::validation("EXISTS requires an argument")),
        };
    }
    if is_scalar_function(name) {
        return Ok(Some(Expr::Call {
            name: name.to_ascii_lowercase(),
            args,
        }));
    }
    ctx.unhandled(&format!("function '{name}'"), cst_text(node))
}

// ============================================================================
// Clause extractors
// ============================================================================

/// Projection list of a select clause
#[derive(Debug, Default)]
pub struct SelectList {
    pub fields: Vec<Projection>,
    /// Window functions; each is projected under its alias
    pub windows: Vec<WindowParams>,
    pub distinct: bool,
}

pub fn extract_select_list(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<SelectList> {
    let mut list = SelectList {
        distinct: node.has_keyword("DISTINCT"),
        ..SelectList::default()
    };

    for item in node.children_by("select_item") {
        let Some(expr_node) = item.first() else {
            continue;
        };
        let alias = item.child("alias").map(|a| a.text().to_string());

        if let Some(over) = item.child("over_clause") {
            let window = extract_window(expr_node, over, alias, ctx)?;
            list.fields
                .push(Projection::new(Expr::Field(window.alias.clone())));
            list.windows.push(window);
            continue;
        }

        if let Some(expr) = convert_expr(expr_node, ctx)? {
            list.fields.push(Projection { expr, alias });
        }
    }
    Ok(list)
}

fn extract_window(
    call: &SyntaxNode,
    over: &SyntaxNode,
    alias: Option<String>,
    ctx: &mut BuildContext,
) -> Result<WindowParams> {
    let function = call
        .is("call")
        .then(|| WindowFunction::from_name(call.text()))
        .flatten()
        .ok_or_else(|| {
            QueryError::validation(format!("'{}' is not a window function", cst_text(call)))
        })?;

    let mut args = call.operands();
    let field = match args.next() {
        Some(arg) if arg.is("field") => Some(arg.text().to_string()),
        _ => None,
    };
    let offset = args
        .next()
        .filter(|a| a.is("number"))
        .and_then(|a| a.text().parse::<u32>().ok())
        .unwrap_or(1);

    let mut partition_by = Vec::new();
    if let Some(partition) = over.child("partition_by") {
        for key in &partition.children {
            partition_by.extend(convert_expr(key, ctx)?);
        }
    }
    let order_by = match over.child("order_by") {
        Some(order) => extract_order_by(order, ctx)?,
        None => Vec::new(),
    };

    Ok(WindowParams {
        function,
        field,
        partition_by,
        order_by,
        offset,
        alias: alias.unwrap_or_else(|| function.name().to_ascii_lowercase()),
    })
}

/// Predicate of a `where_clause` (or `having_clause`, `on`, `filter`)
pub fn extract_where_clause(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    match node.first() {
        Some(expr) => convert_expr(expr, ctx),
        None => Ok(None),
    }
}

pub fn extract_order_by(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Vec<SortKey>> {
    let mut keys = Vec::new();
    for item in node.children_by("order_item") {
        let Some(expr_node) = item.first() else {
            continue;
        };
        if let Some(expr) = convert_expr(expr_node, ctx)? {
            keys.push(SortKey {
                expr,
                descending: item.text().eq_ignore_ascii_case("DESC"),
            });
        }
    }
    Ok(keys)
}

pub fn extract_table_name(node: &SyntaxNode) -> Source {
    Source {
        name: node.text().to_string(),
        alias: node.child("alias").map(|a| a.text().to_string()),
    }
}

/// `SET a = expr, ...` assignments
pub fn extract_assignments(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Vec<Assignment>> {
    let mut out = Vec::new();
    for assignment in node.children_by("assignment") {
        let Some(value) = assignment.first() else {
            continue;
        };
        if let Some(value) = convert_expr(value, ctx)? {
            out.push(Assignment::new(assignment.text(), value));
        }
    }
    Ok(out)
}

fn extract_column(node: &SyntaxNode) -> Result<ColumnDef> {
    let mut column = ColumnDef::new(node.text());
    column.data_type = node.child("data_type").map(|t| t.text().to_string());
    column.primary_key = node.has_keyword("PRIMARY KEY");
    column.nullable = !node.has_keyword("NOT NULL") && !column.primary_key;
    if let Some(default) = node.child("default").and_then(SyntaxNode::first) {
        column.default = literal_value(default)?;
    }
    Ok(column)
}

/// `CREATE TABLE` definition: columns, table-level primary key, guard
pub fn extract_create_definition(node: &SyntaxNode) -> Result<SchemaParams> {
    let mut columns = node
        .children_by("column_def")
        .map(extract_column)
        .collect::<Result<Vec<_>>>()?;

    for key in node.children_by("primary_key") {
        for name in &key.children {
            let column = columns
                .iter_mut()
                .find(|c| c.name == name.text())
                .ok_or_else(|| {
                    QueryError::validation(format!(
                        "primary key column '{}' is not defined",
                        name.text()
                    ))
                })?;
            column.primary_key = true;
            column.nullable = false;
        }
    }

    Ok(SchemaParams {
        object: SchemaObject::Collection,
        name: node.text().to_string(),
        columns,
        if_exists: node.has_keyword("IF NOT EXISTS"),
        ..SchemaParams::default()
    })
}

pub fn extract_alter_action(node: &SyntaxNode) -> Result<AlterOp> {
    let operand = |i: usize| {
        node.children
            .get(i)
            .ok_or_else(|| QueryError::validation(format!("incomplete {}", node.text())))
    };
    Ok(match node.text() {
        "ADD COLUMN" => AlterOp::AddColumn {
            column: extract_column(operand(0)?)?,
        },
        "DROP COLUMN" => AlterOp::DropColumn {
            name: operand(0)?.text().to_string(),
        },
        "RENAME COLUMN" => AlterOp::RenameColumn {
            from: operand(0)?.text().to_string(),
            to: operand(1)?.text().to_string(),
        },
        "RENAME TO" => AlterOp::RenameTo {
            name: operand(0)?.text().to_string(),
        },
        other => {
            return Err(QueryError::validation(format!(
                "unknown ALTER action '{other}'"
            )))
        }
    })
}

/// True for a terminal keyword child
pub fn is_keyword(node: &SyntaxNode) -> bool {
    node.token == Some(TokenType::Keyword)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Grammar, SqlGrammar};
    use quarry_core::ConversionMode;
    use serde_json::json;

    fn where_expr(sql: &str, mode: ConversionMode) -> Result<Option<Expr>> {
        let cst = SqlGrammar.parse(sql).unwrap();
        let clause = cst.child("where_clause").unwrap();
        extract_where_clause(clause, &mut BuildContext::new(mode))
    }

    #[test]
    fn test_where_clause_to_expression() {
        let expr = where_expr(
            "SELECT * FROM t WHERE age > 25 AND name LIKE 'A%'",
            ConversionMode::Strict,
        )
        .unwrap()
        .unwrap();
        assert_eq!(expr.to_string(), "age > 25 AND name LIKE 'A%'");
    }

    #[test]
    fn test_negative_literals_fold() {
        let expr = where_expr("SELECT * FROM t WHERE x = -3", ConversionMode::Strict)
            .unwrap()
            .unwrap();
        assert_eq!(expr, Expr::eq(Expr::field("x"), Expr::lit(-3)));
    }

    #[test]
    fn test_unknown_function_by_mode() {
        let sql = "SELECT * FROM t WHERE soundex(name) = 'x' AND age > 1";
        assert!(where_expr(sql, ConversionMode::Strict).is_err());

        let flexible = where_expr(sql, ConversionMode::Flexible).unwrap().unwrap();
        assert!(flexible.contains_raw());

        let lenient = where_expr(sql, ConversionMode::Lenient).unwrap().unwrap();
        assert_eq!(lenient.to_string(), "age > 1");
    }

    #[test]
    fn test_aggregate_calls() {
        let cst = SqlGrammar
            .parse("SELECT COUNT(*), SUM(DISTINCT amount) AS total FROM t")
            .unwrap();
        let list = extract_select_list(
            cst.child("select_clause").unwrap(),
            &mut BuildContext::new(ConversionMode::Strict),
        )
        .unwrap();
        assert_eq!(list.fields[0].expr, Expr::aggregate(AggregateFunc::Count, None));
        assert_eq!(list.fields[0].output_name(), "count");
        assert!(matches!(
            list.fields[1].expr,
            Expr::Aggregate { func: AggregateFunc::Sum, distinct: true, .. }
        ));
        assert_eq!(list.fields[1].output_name(), "total");
    }

    #[test]
    fn test_window_items_project_their_alias() {
        let cst = SqlGrammar
            .parse("SELECT name, RANK() OVER (PARTITION BY dept ORDER BY salary DESC) AS r FROM e")
            .unwrap();
        let list = extract_select_list(
            cst.child("select_clause").unwrap(),
            &mut BuildContext::new(ConversionMode::Strict),
        )
        .unwrap();
        assert_eq!(list.windows.len(), 1);
        assert_eq!(list.windows[0].function, WindowFunction::Rank);
        assert_eq!(list.windows[0].partition_by, vec![Expr::field("dept")]);
        assert!(list.windows[0].order_by[0].descending);
        assert_eq!(list.fields[1].expr, Expr::field("r"));
    }

    #[test]
    fn test_create_definition() {
        let cst = SqlGrammar
            .parse("CREATE TABLE IF NOT EXISTS users (id INT, name VARCHAR(40) NOT NULL DEFAULT 'x', PRIMARY KEY (id))")
            .unwrap();
        let schema = extract_create_definition(&cst).unwrap();
        assert_eq!(schema.name, "users");
        assert!(schema.if_exists);
        assert!(schema.columns[0].primary_key);
        assert!(!schema.columns[1].nullable);
        assert_eq!(schema.columns[1].default, Some(json!("x")));
    }

    #[test]
    fn test_json_from_cst() {
        let node = crate::grammar::MongoGrammar
            .parse("db.t.find({age: {$gt: 25}, tags: ['a', $x], on: true})")
            .unwrap();
        let doc = json_from_cst(&node.children[1].children[0]).unwrap();
        assert_eq!(doc, json!({"age": {"$gt": 25}, "tags": ["a", "$x"], "on": true}));
    }
}

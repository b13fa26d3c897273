//! MongoDB shell calls to actions.
//!
//! `find` chains become a SELECT, `aggregate` a PIPE headed by a SELECT of
//! the collection, and the write methods INSERT, UPDATE and DELETE. Filter
//! documents become predicates; `'$field'` strings in stages are field
//! references.

use super::extract::json_from_cst;
use super::BuildContext;
use crate::cst::SyntaxNode;
use quarry_core::{
    Action, ActionKind, AggregateFunc, AggregateParams, Assignment, BinaryOp, ExtendParams, Expr,
    LimitParams, OrderParams, Params, PredicateParams, ProjectParams, Projection, QueryError,
    Result, SelectParams, SortKey, Source, SummarizeParams, WriteParams,
};
use serde_json::{Map, Value};

pub(super) fn build(node: &SyntaxNode, ctx: &mut BuildContext) -> Result<Action> {
    let collection = node.child("collection").map(|c| c.text().to_string());
    let calls: Vec<&SyntaxNode> = node.children_by("call").collect();
    let (first, chain) = calls
        .split_first()
        .ok_or_else(|| QueryError::validation("MongoDB query without a method call"))?;
    let args = first
        .children
        .iter()
        .map(json_from_cst)
        .collect::<Result<Vec<_>>>()?;

    let method = first.text();
    let target = || {
        collection
            .clone()
            .ok_or_else(|| QueryError::validation(format!("{method} requires a collection")))
    };

    match method {
        "find" | "findOne" => {
            let mut cursor = Cursor::default();
            if method == "findOne" {
                cursor.count = Some(1);
            }
            for call in chain {
                cursor.apply(call, ctx)?;
            }
            let select = find(collection.as_deref(), &args, &cursor, ctx)?;
            Ok(if cursor.counted {
                count_of(select, None)
            } else {
                select
            })
        }
        "countDocuments" | "count" => {
            no_chain(chain, ctx)?;
            let select = find(collection.as_deref(), &args, &Cursor::default(), ctx)?;
            Ok(count_of(select, None))
        }
        "distinct" => {
            no_chain(chain, ctx)?;
            let field = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| QueryError::validation("distinct requires a field name"))?;
            let filter = args.get(1).map(|f| filter_expr(f, ctx)).transpose()?.flatten();
            Ok(Action::new(
                ActionKind::Select,
                Params::Select(SelectParams {
                    fields: vec![Projection::new(Expr::field(field))],
                    from: collection.clone().map(Source::new),
                    distinct: true,
                }),
            )
            .with_children(filter.map(where_action)))
        }
        "aggregate" => {
            no_chain(chain, ctx)?;
            let stages = match args.first() {
                Some(Value::Array(stages)) => stages.as_slice(),
                Some(other) => {
                    return Err(QueryError::validation(format!(
                        "aggregate expects a pipeline array, got {other}"
                    )))
                }
                None => &[],
            };
            aggregate(collection.as_deref(), stages, ctx)
        }
        "insertOne" | "insertMany" | "insert" => {
            no_chain(chain, ctx)?;
            insert(target()?, args.first(), ctx)
        }
        "updateOne" | "updateMany" | "update" => {
            no_chain(chain, ctx)?;
            update(target()?, &args, ctx)
        }
        "deleteOne" | "deleteMany" | "remove" => {
            no_chain(chain, ctx)?;
            let filter = args.first().map(|f| filter_expr(f, ctx)).transpose()?.flatten();
            Ok(Action::new(
                ActionKind::Delete,
                Params::Write(WriteParams {
                    target: target()?,
                    ..WriteParams::default()
                }),
            )
            .with_children(filter.map(where_action)))
        }
        other => Err(QueryError::validation(format!(
            "unsupported MongoDB method '{other}'"
        ))),
    }
}

fn no_chain(chain: &[&SyntaxNode], ctx: &mut BuildContext) -> Result<()> {
    for call in chain {
        ctx.skip(&format!("chained '{}'", call.text()))?;
    }
    Ok(())
}

fn where_action(predicate: Expr) -> Action {
    Action::new(ActionKind::Where, Params::Predicate(PredicateParams { predicate }))
}

fn count_of(source: Action, alias: Option<String>) -> Action {
    Action::new(
        ActionKind::Count,
        Params::Aggregate(AggregateParams {
            field: None,
            distinct: false,
            alias,
        }),
    )
    .with_child(source)
}

/// `'$name'` as a field reference
fn field_ref(value: &Value) -> Option<&str> {
    value.as_str().and_then(|s| s.strip_prefix('$'))
}

fn operand(value: &Value) -> Expr {
    match field_ref(value) {
        Some(field) => Expr::field(field),
        None => Expr::Literal(value.clone()),
    }
}

fn document<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| QueryError::validation(format!("{what} must be a document, got {value}")))
}

fn as_count(value: &Value, what: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| QueryError::value(format!("{what} must be a non-negative integer")))
}

// ============================================================================
// Filters
// ============================================================================

fn operator(field: &str, op: &str, value: &Value, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let target = Expr::field(field);
    let list = |value: &Value| match value {
        Value::Array(items) => items.iter().cloned().map(Expr::Literal).collect(),
        other => vec![Expr::Literal(other.clone())],
    };
    let binary = |op| Some(Expr::binary(op, target.clone(), Expr::Literal(value.clone())));
    Ok(match op {
        "$eq" => binary(BinaryOp::Eq),
        "$ne" => binary(BinaryOp::Ne),
        "$gt" => binary(BinaryOp::Gt),
        "$gte" => binary(BinaryOp::Ge),
        "$lt" => binary(BinaryOp::Lt),
        "$lte" => binary(BinaryOp::Le),
        "$regex" => binary(BinaryOp::Regex),
        "$in" => Some(Expr::In {
            expr: Box::new(target.clone()),
            list: list(value),
            negated: false,
        }),
        "$nin" => Some(Expr::In {
            expr: Box::new(target.clone()),
            list: list(value),
            negated: true,
        }),
        "$exists" => Some(Expr::IsNull {
            expr: Box::new(target.clone()),
            negated: value != &Value::Bool(false),
        }),
        "$not" => {
            let inner = field_operators(field, document(value, "$not")?, ctx)?;
            inner.map(|e| Expr::Not(Box::new(e)))
        }
        other => {
            return ctx.unhandled(&format!("operator '{other}'"), format!("{{{field}: {{{other}: {value}}}}}"))
        }
    })
}

fn field_operators(field: &str, ops: &Map<String, Value>, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let mut conjuncts = Vec::new();
    let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    for (op, value) in ops {
        match op.as_str() {
            "$options" => {}
            "$regex" if options.contains('i') => {
                let pattern = format!("(?i){}", value.as_str().unwrap_or_default());
                conjuncts.extend(operator(field, op, &Value::String(pattern), ctx)?);
            }
            _ => conjuncts.extend(operator(field, op, value, ctx)?),
        }
    }
    Ok(Expr::conjoin(conjuncts))
}

/// Query document (`{age: {$gt: 25}, $or: [...]}`) to a predicate
pub fn filter_expr(filter: &Value, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let mut conjuncts = Vec::new();
    for (key, value) in document(filter, "filter")? {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                let Value::Array(items) = value else {
                    return Err(QueryError::validation(format!("{key} expects an array")));
                };
                let mut parts = Vec::new();
                for item in items {
                    parts.extend(filter_expr(item, ctx)?);
                }
                let combined = match key.as_str() {
                    "$and" => parts.into_iter().reduce(Expr::and),
                    "$or" => parts.into_iter().reduce(Expr::or),
                    _ => parts
                        .into_iter()
                        .reduce(Expr::or)
                        .map(|e| Expr::Not(Box::new(e))),
                };
                conjuncts.extend(combined);
            }
            op if op.starts_with('$') => {
                conjuncts.extend(ctx.unhandled(&format!("operator '{op}'"), format!("{op}: {value}"))?);
            }
            field => match value {
                Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                    conjuncts.extend(field_operators(field, ops, ctx)?);
                }
                other => conjuncts.push(Expr::eq(Expr::field(field), Expr::Literal(other.clone()))),
            },
        }
    }
    Ok(Expr::conjoin(conjuncts))
}

fn sort_keys(value: &Value) -> Result<Vec<SortKey>> {
    document(value, "sort")?
        .iter()
        .map(|(field, direction)| match direction.as_i64() {
            Some(1) => Ok(SortKey::asc(Expr::field(field.as_str()))),
            Some(-1) => Ok(SortKey::desc(Expr::field(field.as_str()))),
            _ => Err(QueryError::value(format!(
                "sort direction for '{field}' must be 1 or -1"
            ))),
        })
        .collect()
}

// ============================================================================
// find
// ============================================================================

#[derive(Default)]
struct Cursor {
    sort: Vec<SortKey>,
    skip: u64,
    count: Option<u64>,
    counted: bool,
}

impl Cursor {
    fn apply(&mut self, call: &SyntaxNode, ctx: &mut BuildContext) -> Result<()> {
        let arg = call.first().map(json_from_cst).transpose()?;
        match (call.text(), arg) {
            ("sort", Some(spec)) => self.sort = sort_keys(&spec)?,
            ("skip", Some(n)) => self.skip = as_count(&n, "skip")?,
            ("limit", Some(n)) => self.count = Some(as_count(&n, "limit")?),
            ("count", _) => self.counted = true,
            (other, _) => ctx.skip(&format!("cursor method '{other}'"))?,
        }
        Ok(())
    }

    fn actions(&self) -> Vec<Action> {
        let mut out = Vec::new();
        if !self.sort.is_empty() {
            out.push(Action::new(
                ActionKind::Order,
                Params::Order(OrderParams {
                    keys: self.sort.clone(),
                }),
            ));
        }
        match self.count {
            Some(count) => out.push(Action::new(
                ActionKind::Limit,
                Params::Limit(LimitParams {
                    count: Some(count),
                    offset: self.skip,
                }),
            )),
            None if self.skip > 0 => out.push(Action::new(
                ActionKind::Offset,
                Params::Limit(LimitParams {
                    count: None,
                    offset: self.skip,
                }),
            )),
            None => {}
        }
        out
    }
}

/// Inclusion projection; `_id: 0` alone keeps everything
fn projection_fields(spec: Option<&Value>, ctx: &mut BuildContext) -> Result<Vec<Projection>> {
    let mut fields = Vec::new();
    if let Some(spec) = spec {
        for (key, value) in document(spec, "projection")? {
            match value {
                Value::Bool(true) => fields.push(Projection::new(Expr::field(key.as_str()))),
                Value::Number(n) if n.as_f64() != Some(0.0) => {
                    fields.push(Projection::new(Expr::field(key.as_str())))
                }
                Value::String(_) if field_ref(value).is_some() => {
                    fields.push(Projection::aliased(operand(value), key.as_str()))
                }
                _ if key == "_id" => {}
                _ => ctx.skip(&format!("exclusion of '{key}'"))?,
            }
        }
    }
    if fields.is_empty() {
        fields.push(Projection::new(Expr::Star));
    }
    Ok(fields)
}

fn find(
    collection: Option<&str>,
    args: &[Value],
    cursor: &Cursor,
    ctx: &mut BuildContext,
) -> Result<Action> {
    let filter = args.first().map(|f| filter_expr(f, ctx)).transpose()?.flatten();
    let fields = projection_fields(args.get(1), ctx)?;
    let mut children: Vec<Action> = filter.map(where_action).into_iter().collect();
    children.extend(cursor.actions());
    Ok(Action::new(
        ActionKind::Select,
        Params::Select(SelectParams {
            fields,
            from: collection.map(Source::new),
            distinct: false,
        }),
    )
    .with_children(children))
}

// ============================================================================
// aggregate
// ============================================================================

fn accumulator(spec: &Value, ctx: &mut BuildContext) -> Result<Option<Expr>> {
    let doc = document(spec, "accumulator")?;
    let Some((op, arg)) = doc.iter().next() else {
        return Err(QueryError::validation("empty accumulator"));
    };
    let func = match op.as_str() {
        "$sum" if arg.is_number() => {
            // {$sum: 1} counts documents
            return Ok(Some(Expr::aggregate(AggregateFunc::Count, None)));
        }
        "$sum" => AggregateFunc::Sum,
        "$avg" => AggregateFunc::Avg,
        "$min" => AggregateFunc::Min,
        "$max" => AggregateFunc::Max,
        "$push" => AggregateFunc::Collect,
        "$addToSet" => {
            return Ok(Some(Expr::Aggregate {
                func: AggregateFunc::Collect,
                arg: Some(Box::new(operand(arg))),
                distinct: true,
            }))
        }
        other => return ctx.unhandled(&format!("accumulator '{other}'"), spec.to_string()),
    };
    Ok(Some(Expr::aggregate(func, Some(operand(arg)))))
}

fn group_stage(spec: &Value, ctx: &mut BuildContext) -> Result<Action> {
    let doc = document(spec, "$group")?;
    let group_by = match doc.get("_id") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(keys)) => keys.values().map(operand).collect(),
        Some(key) => vec![operand(key)],
    };
    let mut aggregates = Vec::new();
    for (name, acc) in doc.iter().filter(|(k, _)| *k != "_id") {
        if let Some(expr) = accumulator(acc, ctx)? {
            aggregates.push(Projection::aliased(expr, name.as_str()));
        }
    }
    Ok(Action::new(
        ActionKind::Summarize,
        Params::Summarize(SummarizeParams {
            group_by,
            aggregates,
        }),
    ))
}

fn stage(name: &str, spec: &Value, ctx: &mut BuildContext) -> Result<Option<Action>> {
    Ok(Some(match name {
        "$match" => match filter_expr(spec, ctx)? {
            Some(predicate) => where_action(predicate),
            None => return Ok(None),
        },
        "$group" => group_stage(spec, ctx)?,
        "$sort" => Action::new(
            ActionKind::Order,
            Params::Order(OrderParams {
                keys: sort_keys(spec)?,
            }),
        ),
        "$limit" => Action::new(
            ActionKind::Limit,
            Params::Limit(LimitParams {
                count: Some(as_count(spec, "$limit")?),
                offset: 0,
            }),
        ),
        "$skip" => Action::new(
            ActionKind::Offset,
            Params::Limit(LimitParams {
                count: None,
                offset: as_count(spec, "$skip")?,
            }),
        ),
        "$project" => {
            let fields = projection_fields(Some(spec), ctx)?;
            if fields.iter().any(Projection::is_star) {
                return Ok(None);
            }
            Action::new(
                ActionKind::Project,
                Params::Project(ProjectParams {
                    fields,
                    distinct: false,
                }),
            )
        }
        "$addFields" | "$set" => {
            let fields = document(spec, name)?
                .iter()
                .map(|(key, value)| Projection::aliased(operand(value), key.as_str()))
                .collect();
            Action::new(ActionKind::Extend, Params::Extend(ExtendParams { fields }))
        }
        "$count" => {
            let alias = spec
                .as_str()
                .ok_or_else(|| QueryError::validation("$count expects a field name"))?;
            Action::new(
                ActionKind::Count,
                Params::Aggregate(AggregateParams {
                    field: None,
                    distinct: false,
                    alias: Some(alias.to_string()),
                }),
            )
        }
        other => {
            ctx.skip(&format!("stage '{other}'"))?;
            return Ok(None);
        }
    }))
}

fn aggregate(collection: Option<&str>, stages: &[Value], ctx: &mut BuildContext) -> Result<Action> {
    let mut children = vec![Action::new(
        ActionKind::Select,
        Params::Select(SelectParams {
            fields: vec![Projection::new(Expr::Star)],
            from: collection.map(Source::new),
            distinct: false,
        }),
    )];
    for spec in stages {
        let doc = document(spec, "pipeline stage")?;
        let (name, body) = match doc.iter().next() {
            Some(entry) if doc.len() == 1 => entry,
            _ => return Err(QueryError::validation("pipeline stage must have exactly one operator")),
        };
        children.extend(stage(name, body, ctx)?);
    }
    Ok(Action::new(ActionKind::Pipe, Params::None).with_children(children))
}

// ============================================================================
// Writes
// ============================================================================

fn insert(target: String, docs: Option<&Value>, ctx: &mut BuildContext) -> Result<Action> {
    let docs: Vec<&Map<String, Value>> = match docs {
        Some(Value::Array(items)) => items
            .iter()
            .map(|d| document(d, "inserted document"))
            .collect::<Result<_>>()?,
        Some(doc) => vec![document(doc, "inserted document")?],
        None => return Err(QueryError::validation("insert requires a document")),
    };
    let mut columns: Vec<String> = Vec::new();
    for doc in &docs {
        for key in doc.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    if columns.is_empty() {
        ctx.warn("insert of empty documents");
    }
    let rows = docs
        .iter()
        .map(|doc| {
            columns
                .iter()
                .map(|c| Expr::Literal(doc.get(c).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    Ok(Action::new(
        ActionKind::Insert,
        Params::Write(WriteParams {
            target,
            columns,
            rows,
            ..WriteParams::default()
        }),
    ))
}

fn update(target: String, args: &[Value], ctx: &mut BuildContext) -> Result<Action> {
    let filter = args.first().map(|f| filter_expr(f, ctx)).transpose()?.flatten();
    let changes = args
        .get(1)
        .ok_or_else(|| QueryError::validation("update requires an update document"))?;
    let changes = document(changes, "update")?;

    let mut assignments = Vec::new();
    for (op, body) in changes {
        match op.as_str() {
            "$set" => {
                for (key, value) in document(body, "$set")? {
                    assignments.push(Assignment::new(key.as_str(), Expr::Literal(value.clone())));
                }
            }
            "$inc" => {
                for (key, value) in document(body, "$inc")? {
                    assignments.push(Assignment::new(
                        key.as_str(),
                        Expr::binary(BinaryOp::Add, Expr::field(key.as_str()), Expr::Literal(value.clone())),
                    ));
                }
            }
            "$unset" => {
                for key in document(body, "$unset")?.keys() {
                    assignments.push(Assignment::new(key.as_str(), Expr::Literal(Value::Null)));
                }
            }
            other if other.starts_with('$') => ctx.skip(&format!("update operator '{other}'"))?,
            // replacement document
            field => assignments.push(Assignment::new(field, Expr::Literal(body.clone()))),
        }
    }
    if assignments.is_empty() {
        return Err(QueryError::validation("update has no supported changes"));
    }

    Ok(Action::new(
        ActionKind::Update,
        Params::Write(WriteParams {
            target,
            assignments,
            ..WriteParams::default()
        }),
    )
    .with_children(filter.map(where_action)))
}

#[cfg(test)]
mod tests {
    use crate::bridge::ParserBridge;
    use crate::format::QueryFormat;
    use quarry_core::{Action, ActionKind, AggregateFunc, ConversionMode, Expr};

    fn parse(query: &str) -> Action {
        ParserBridge::new()
            .parse(query, QueryFormat::MongoDb)
            .unwrap()
            .action
    }

    #[test]
    fn test_find_chain_is_a_select() {
        let action = parse("db.users.find({age: {$gt: 25}}, {name: 1, _id: 0}).sort({age: -1}).skip(1).limit(2)");
        assert_eq!(action.kind, ActionKind::Select);
        let select = action.params.as_select().unwrap();
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert_eq!(select.fields[0].expr, Expr::field("name"));
        let kinds: Vec<_> = action.children.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Where, ActionKind::Order, ActionKind::Limit]);
        let limit = action.children[2].params.as_limit().unwrap();
        assert_eq!((limit.count, limit.offset), (Some(2), 1));
    }

    #[test]
    fn test_filter_operators() {
        let action = parse("db.users.find({$or: [{city: 'NYC'}, {age: {$gte: 30, $lt: 40}}], name: {$in: ['Ann', 'Bob']}})");
        let filter = action.children[0].params.as_predicate().unwrap();
        assert_eq!(
            filter.predicate.to_string(),
            "(city = 'NYC' OR age >= 30 AND age < 40) AND name IN ('Ann', 'Bob')"
        );
    }

    #[test]
    fn test_aggregate_pipeline() {
        let action = parse(
            "db.orders.aggregate([{$match: {status: 'paid'}}, {$group: {_id: '$city', total: {$sum: '$amount'}, n: {$sum: 1}}}, {$sort: {total: -1}}, {$limit: 3}])",
        );
        assert_eq!(action.kind, ActionKind::Pipe);
        let kinds: Vec<_> = action.children.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Select,
                ActionKind::Where,
                ActionKind::Summarize,
                ActionKind::Order,
                ActionKind::Limit
            ]
        );
        let summarize = action.children[2].params.as_summarize().unwrap();
        assert_eq!(summarize.group_by, vec![Expr::field("city")]);
        assert_eq!(summarize.aggregates[1].expr, Expr::aggregate(AggregateFunc::Count, None));
    }

    #[test]
    fn test_count_documents_wraps_select() {
        let action = parse("db.users.countDocuments({active: true})");
        assert_eq!(action.kind, ActionKind::Count);
        assert_eq!(action.children[0].kind, ActionKind::Select);
    }

    #[test]
    fn test_writes() {
        let insert = parse("db.users.insertMany([{name: 'Dan', age: 40}, {name: 'Eve'}])");
        let write = insert.params.as_write().unwrap();
        assert_eq!(write.columns, vec!["name", "age"]);
        assert_eq!(write.rows.len(), 2);

        let update = parse("db.users.updateMany({name: 'Bob'}, {$set: {city: 'LA'}, $inc: {age: 1}})");
        let write = update.params.as_write().unwrap();
        assert_eq!(write.assignments.len(), 2);
        assert_eq!(write.assignments[1].value.to_string(), "age + 1");

        let delete = parse("db.users.deleteOne({age: {$lt: 18}})");
        assert_eq!(delete.kind, ActionKind::Delete);
        assert_eq!(delete.children[0].kind, ActionKind::Where);
    }

    #[test]
    fn test_unknown_stage_by_mode() {
        let query = "db.users.aggregate([{$unwind: '$tags'}])";
        let strict = ParserBridge::new().with_mode(ConversionMode::Strict);
        assert!(strict.parse(query, QueryFormat::MongoDb).is_err());
        let outcome = ParserBridge::new().parse(query, QueryFormat::MongoDb).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
    }
}

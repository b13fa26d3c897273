//! SQL grammar.
//!
//! Supported statements:
//! - `SELECT [DISTINCT] items [FROM table|subquery] [JOIN ...]* [WHERE] [GROUP BY]
//!   [HAVING] [ORDER BY] [LIMIT] [OFFSET]`, joined with `UNION [ALL]`
//! - `WITH name AS (query), ... query`
//! - `INSERT INTO t [(cols)] VALUES (...), ...` and `INSERT INTO t SELECT ...`
//! - `UPDATE t SET a = expr, ... [WHERE]`, `DELETE FROM t [WHERE]`
//! - `CREATE TABLE`, `CREATE [UNIQUE] INDEX`, `DROP TABLE|INDEX|VIEW`, `ALTER TABLE`
//!
//! Window functions are accepted in the select list: `RANK() OVER (PARTITION
//! BY dept ORDER BY salary DESC) AS r`.

use super::common::{
    dotted, format_errors, ident, integer, kw, kw_node, literal, raw_ident, signed_number_text,
    to_span, Boxed, Extra,
};
use super::expr::expression;
use super::Grammar;
use crate::cst::{SyntaxNode, TokenType};
use crate::format::QueryFormat;
use chumsky::prelude::*;
use quarry_core::Result;

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION",
    "ALL", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS", "ON", "AS", "AND", "OR",
    "NOT", "IN", "IS", "NULL", "LIKE", "ILIKE", "BETWEEN", "DISTINCT", "ASC", "DESC", "INSERT",
    "INTO", "VALUES", "UPDATE", "SET", "DELETE", "CREATE", "TABLE", "INDEX", "DROP", "ALTER",
    "ADD", "COLUMN", "RENAME", "TO", "TRUE", "FALSE", "OVER",
];

/// SQL input grammar
pub struct SqlGrammar;

impl Grammar for SqlGrammar {
    fn format(&self) -> QueryFormat {
        QueryFormat::Sql
    }

    fn parse(&self, input: &str) -> Result<SyntaxNode> {
        sql_parser()
            .parse(input)
            .into_result()
            .map_err(|errs| format_errors(&errs, input))
    }
}

fn sql_parser<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> {
    statement()
        .padded()
        .then_ignore(just(';').padded().or_not())
        .then_ignore(end())
}

fn statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    choice((
        with_statement(),
        query(),
        insert_statement(),
        update_statement(),
        delete_statement(),
        create_table(),
        create_index(),
        drop_statement(),
        alter_statement(),
    ))
    .map_with(|node, e| node.with_span(to_span(e.span())))
}

fn sql_expr<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    expression(RESERVED)
}

fn comma<'src>() -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    just(',').padded().ignored()
}

// ============================================================================
// Queries
// ============================================================================

/// SELECT statements joined by UNION, left-deep
fn query<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    recursive(|query| {
        let select = select_statement(query.boxed()).boxed();
        let union_op = kw("UNION")
            .ignore_then(kw("ALL").or_not())
            .map(|all| if all.is_some() { "UNION ALL" } else { "UNION" });

        select
            .clone()
            .then(union_op.then(select).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                rest.into_iter().fold(first, |left, (op, right)| {
                    SyntaxNode::node("union", vec![left, right]).with_text(op)
                })
            })
    })
}

fn with_statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let cte = ident(RESERVED)
        .padded()
        .then_ignore(kw("AS"))
        .then(query().delimited_by(just('(').padded(), just(')').padded()))
        .map(|(name, body)| SyntaxNode::node("cte", vec![body]).with_text(name));

    kw("WITH")
        .ignore_then(cte.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .then(query())
        .map(|(ctes, body)| {
            let mut children = ctes;
            children.push(body);
            SyntaxNode::node("with_statement", children)
        })
}

fn alias<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    kw("AS")
        .or_not()
        .ignore_then(ident(RESERVED).padded())
        .map(|name| SyntaxNode::ident("alias", name))
}

fn table_name<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    dotted(RESERVED)
        .padded()
        .map(|name| SyntaxNode::node("table_name", Vec::new()).with_text(name))
}

fn table_ref<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    table_name()
        .then(alias().or_not())
        .map(|(mut table, alias)| {
            table.children.extend(alias);
            table
        })
}

fn select_statement<'src>(
    subquery: Boxed<'src, SyntaxNode>,
) -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let select_clause = kw("SELECT")
        .ignore_then(kw_node("DISTINCT").or_not())
        .then(select_item().separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|(distinct, items)| {
            let mut children: Vec<SyntaxNode> = distinct.into_iter().collect();
            children.extend(items);
            SyntaxNode::node("select_clause", children)
        });

    let derived = subquery
        .delimited_by(just('(').padded(), just(')').padded())
        .then(alias().or_not())
        .map(|(query, alias)| {
            let mut children = vec![query];
            children.extend(alias);
            SyntaxNode::node("subquery", children)
        });
    let from_clause = kw("FROM")
        .ignore_then(choice((derived, table_ref())))
        .map(|source| SyntaxNode::node("from_clause", vec![source]));

    let where_clause = kw("WHERE")
        .ignore_then(sql_expr())
        .map(|e| SyntaxNode::node("where_clause", vec![e]));

    let group_by = kw("GROUP")
        .then(kw("BY"))
        .ignore_then(sql_expr().separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|keys| SyntaxNode::node("group_by", keys));

    let having = kw("HAVING")
        .ignore_then(sql_expr())
        .map(|e| SyntaxNode::node("having_clause", vec![e]));

    let limit = kw("LIMIT")
        .ignore_then(integer().padded())
        .map(|n| SyntaxNode::node("limit_clause", Vec::new()).with_text(n.to_string()));

    let offset = kw("OFFSET")
        .ignore_then(integer().padded())
        .map(|n| SyntaxNode::node("offset_clause", Vec::new()).with_text(n.to_string()));

    select_clause
        .then(from_clause.or_not())
        .then(join_clause().repeated().collect::<Vec<_>>())
        .then(where_clause.or_not())
        .then(group_by.or_not())
        .then(having.or_not())
        .then(order_by().or_not())
        .then(limit.or_not())
        .then(offset.or_not())
        .map(
            |((((((((select, from), joins), filter), group), having), order), limit), offset)| {
                let mut children = vec![select];
                children.extend(from);
                children.extend(joins);
                children.extend(filter);
                children.extend(group);
                children.extend(having);
                children.extend(order);
                children.extend(limit);
                children.extend(offset);
                SyntaxNode::node("select_statement", children)
            },
        )
}

fn select_item<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    sql_expr()
        .then(over_clause().or_not())
        .then(alias().or_not())
        .map(|((expr, over), alias)| {
            let mut children = vec![expr];
            children.extend(over);
            children.extend(alias);
            SyntaxNode::node("select_item", children)
        })
}

fn over_clause<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let partition = kw("PARTITION")
        .then(kw("BY"))
        .ignore_then(sql_expr().separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|keys| SyntaxNode::node("partition_by", keys));

    kw("OVER").ignore_then(
        partition
            .or_not()
            .then(order_by().or_not())
            .delimited_by(just('(').padded(), just(')').padded())
            .map(|(partition, order)| {
                let mut children: Vec<SyntaxNode> = partition.into_iter().collect();
                children.extend(order);
                SyntaxNode::node("over_clause", children)
            }),
    )
}

fn order_by<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let direction = choice((kw("ASC").to("ASC"), kw("DESC").to("DESC")));
    let item = sql_expr()
        .then(direction.or_not())
        .map(|(expr, dir)| SyntaxNode::node("order_item", vec![expr]).with_text(dir.unwrap_or("ASC")));

    kw("ORDER")
        .then(kw("BY"))
        .ignore_then(item.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|items| SyntaxNode::node("order_by", items))
}

fn join_clause<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let join_type = choice((
        kw("INNER").to("INNER"),
        kw("LEFT").then(kw("OUTER").or_not()).to("LEFT"),
        kw("RIGHT").then(kw("OUTER").or_not()).to("RIGHT"),
        kw("FULL").then(kw("OUTER").or_not()).to("FULL"),
        kw("CROSS").to("CROSS"),
    ))
    .or_not()
    .map(|t| t.unwrap_or("INNER"));

    join_type
        .then_ignore(kw("JOIN"))
        .then(table_ref())
        .then(kw("ON").ignore_then(sql_expr()).or_not())
        .map(|((join_type, table), on)| {
            let mut children = vec![table];
            children.extend(on.map(|e| SyntaxNode::node("on", vec![e])));
            SyntaxNode::node("join_clause", children).with_text(join_type)
        })
}

// ============================================================================
// Writes
// ============================================================================

fn column_list<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    raw_ident()
        .padded()
        .map(|c| SyntaxNode::ident("column", c))
        .separated_by(comma())
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just('(').padded(), just(')').padded())
        .map(|cols| SyntaxNode::node("column_list", cols))
}

fn insert_statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let row = sql_expr()
        .separated_by(comma())
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just('(').padded(), just(')').padded())
        .map(|values| SyntaxNode::node("row", values));
    let values = kw("VALUES")
        .ignore_then(row.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|rows| SyntaxNode::node("values_clause", rows));

    kw("INSERT")
        .then(kw("INTO"))
        .ignore_then(table_name())
        .then(column_list().or_not())
        .then(choice((values, query())))
        .map(|((table, columns), source)| {
            let mut children = vec![table];
            children.extend(columns);
            children.push(source);
            SyntaxNode::node("insert_statement", children)
        })
}

fn update_statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let assignment = dotted(RESERVED)
        .padded()
        .then_ignore(just('=').padded())
        .then(sql_expr())
        .map(|(path, value)| SyntaxNode::node("assignment", vec![value]).with_text(path));

    kw("UPDATE")
        .ignore_then(table_name())
        .then_ignore(kw("SET"))
        .then(assignment.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .then(kw("WHERE").ignore_then(sql_expr()).or_not())
        .map(|((table, assignments), filter)| {
            let mut children = vec![table, SyntaxNode::node("set_clause", assignments)];
            children.extend(filter.map(|e| SyntaxNode::node("where_clause", vec![e])));
            SyntaxNode::node("update_statement", children)
        })
}

fn delete_statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    kw("DELETE")
        .then(kw("FROM"))
        .ignore_then(table_name())
        .then(kw("WHERE").ignore_then(sql_expr()).or_not())
        .map(|(table, filter)| {
            let mut children = vec![table];
            children.extend(filter.map(|e| SyntaxNode::node("where_clause", vec![e])));
            SyntaxNode::node("delete_statement", children)
        })
}

// ============================================================================
// DDL
// ============================================================================

fn if_not_exists<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    kw("IF")
        .then(kw("NOT"))
        .then(kw("EXISTS"))
        .to(SyntaxNode::keyword("IF NOT EXISTS"))
}

fn data_type<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let size = none_of(")")
        .repeated()
        .delimited_by(just('('), just(')'));
    raw_ident()
        .then(size.or_not())
        .to_slice()
        .padded()
        .map(|t: &str| SyntaxNode::leaf("data_type", TokenType::Identifier, t.to_uppercase()))
}

fn column_def<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let default_value = choice((
        signed_number_text().map(|s: &str| SyntaxNode::leaf("number", TokenType::Number, s)),
        literal(),
    ))
    .padded();

    let constraint = choice((
        kw("NOT").then(kw("NULL")).to(SyntaxNode::keyword("NOT NULL")),
        kw("NULL").to(SyntaxNode::keyword("NULL")),
        kw("PRIMARY").then(kw("KEY")).to(SyntaxNode::keyword("PRIMARY KEY")),
        kw("UNIQUE").to(SyntaxNode::keyword("UNIQUE")),
        kw("DEFAULT")
            .ignore_then(default_value)
            .map(|v| SyntaxNode::node("default", vec![v])),
    ));

    raw_ident()
        .padded()
        .then(data_type().or_not())
        .then(constraint.repeated().collect::<Vec<_>>())
        .map(|((name, ty), constraints)| {
            let mut children: Vec<SyntaxNode> = ty.into_iter().collect();
            children.extend(constraints);
            SyntaxNode::node("column_def", children).with_text(name)
        })
}

fn create_table<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let primary_key = kw("PRIMARY")
        .then(kw("KEY"))
        .ignore_then(column_list())
        .map(|cols| SyntaxNode::node("primary_key", cols.children));

    let element = choice((primary_key, column_def()));

    kw("CREATE")
        .then(kw("TABLE"))
        .ignore_then(if_not_exists().or_not())
        .then(dotted(RESERVED).padded())
        .then(
            element
                .separated_by(comma())
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|((guard, name), elements)| {
            let mut children = elements;
            children.extend(guard);
            SyntaxNode::node("create_table", children).with_text(name)
        })
}

fn create_index<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    kw("CREATE")
        .ignore_then(kw_node("UNIQUE").or_not())
        .then_ignore(kw("INDEX"))
        .then(if_not_exists().or_not())
        .then(ident(RESERVED).padded().or_not())
        .then_ignore(kw("ON"))
        .then(table_name())
        .then(column_list())
        .map(|((((unique, guard), name), table), columns)| {
            let mut children = vec![table];
            children.extend(columns.children);
            children.extend(unique);
            children.extend(guard);
            SyntaxNode::node("create_index", children).with_text(name.unwrap_or_default())
        })
}

fn drop_statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let object = choice((
        kw("TABLE").to("TABLE"),
        kw("INDEX").to("INDEX"),
        kw("VIEW").to("VIEW"),
    ));
    let if_exists = kw("IF").then(kw("EXISTS")).to(SyntaxNode::keyword("IF EXISTS"));

    kw("DROP")
        .ignore_then(object)
        .then(if_exists.or_not())
        .then(dotted(RESERVED).padded())
        .map(|((object, guard), name)| {
            let mut children = vec![SyntaxNode::ident("name", name)];
            children.extend(guard);
            SyntaxNode::node("drop_statement", children).with_text(object)
        })
}

fn alter_statement<'src>() -> impl Parser<'src, &'src str, SyntaxNode, Extra<'src>> + Clone {
    let column = || raw_ident().padded().map(|c| SyntaxNode::ident("column", c));

    let action = choice((
        kw("ADD")
            .then(kw("COLUMN").or_not())
            .ignore_then(column_def())
            .map(|def| SyntaxNode::node("alter_action", vec![def]).with_text("ADD COLUMN")),
        kw("DROP")
            .then(kw("COLUMN").or_not())
            .ignore_then(column())
            .map(|c| SyntaxNode::node("alter_action", vec![c]).with_text("DROP COLUMN")),
        kw("RENAME")
            .then(kw("COLUMN"))
            .ignore_then(column())
            .then_ignore(kw("TO"))
            .then(column())
            .map(|(from, to)| {
                SyntaxNode::node("alter_action", vec![from, to]).with_text("RENAME COLUMN")
            }),
        kw("RENAME")
            .then(kw("TO"))
            .ignore_then(dotted(RESERVED).padded())
            .map(|name| {
                SyntaxNode::node("alter_action", vec![SyntaxNode::ident("name", name)])
                    .with_text("RENAME TO")
            }),
    ));

    kw("ALTER")
        .then(kw("TABLE"))
        .ignore_then(table_name())
        .then(action.separated_by(comma()).at_least(1).collect::<Vec<_>>())
        .map(|(table, actions)| {
            let mut children = vec![table];
            children.extend(actions);
            SyntaxNode::node("alter_statement", children)
        })
}

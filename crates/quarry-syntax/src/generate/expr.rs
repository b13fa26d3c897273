//! Expression rendering in a target language's notation.

use super::style::{ExprNotation, ExprStyle};
use quarry_core::{
    value, ActionKind, BinaryOp, Direction, Expr, NodePattern, PatternElement, Projection,
    QueryError, Result, SortKey,
};
use serde_json::{Map, Value};

/// Renders expressions, literals and patterns for one output style
#[derive(Debug, Clone, Copy)]
pub struct ExprRenderer<'a> {
    style: &'a ExprStyle,
    sorted_keys: bool,
}

impl<'a> ExprRenderer<'a> {
    pub fn new(style: &'a ExprStyle, sorted_keys: bool) -> Self {
        Self { style, sorted_keys }
    }

    pub fn keyword(&self, word: &str) -> String {
        if self.style.upper_keywords {
            word.to_ascii_uppercase()
        } else {
            word.to_ascii_lowercase()
        }
    }

    fn entries<'m>(&self, map: &'m Map<String, Value>) -> Vec<(&'m String, &'m Value)> {
        let mut entries: Vec<_> = map.iter().collect();
        if self.sorted_keys {
            entries.sort_by(|a, b| a.0.cmp(b.0));
        }
        entries
    }

    pub fn literal(&self, v: &Value) -> String {
        match v {
            Value::String(s) => {
                let q = &self.style.quote;
                let escaped = if q == "'" {
                    s.replace('\'', "''")
                } else {
                    s.replace('\\', "\\\\").replace('"', "\\\"")
                };
                format!("{q}{escaped}{q}")
            }
            Value::Null => self.keyword("null"),
            Value::Bool(b) => self.keyword(if *b { "true" } else { "false" }),
            Value::Number(_) => value::normalize_number(v).to_string(),
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(|i| self.literal(i)).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Object(map) => {
                let items: Vec<String> = self
                    .entries(map)
                    .into_iter()
                    .map(|(k, v)| format!("{k}: {}", self.literal(v)))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
        }
    }

    /// Dotted path spelled with the style's separator, no prefix
    pub fn path(&self, path: &str) -> String {
        path.replace('.', &self.style.path_separator)
    }

    pub fn field(&self, path: &str) -> String {
        let path = self.path(path);
        if !self.style.field_prefix.is_empty() && !path.contains(self.style.path_separator.as_str()) {
            format!("{}{path}", self.style.field_prefix)
        } else {
            path
        }
    }

    fn operator(&self, op: BinaryOp) -> String {
        match op {
            BinaryOp::Ne => self.style.not_equal.clone(),
            BinaryOp::And | BinaryOp::Or => self.keyword(op.symbol()),
            BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => op.symbol().to_string(),
            other => other.symbol().to_string(),
        }
    }

    fn operand(&self, e: &Expr, parent: BinaryOp) -> Result<String> {
        let text = self.infix(e)?;
        Ok(match e {
            Expr::Binary { op, .. } if op.precedence() < parent.precedence() => format!("({text})"),
            _ => text,
        })
    }

    fn list(&self, items: &[Expr]) -> Result<String> {
        let items = items.iter().map(|i| self.infix(i)).collect::<Result<Vec<_>>>()?;
        let (open, close) = self.style.list_brackets();
        Ok(format!("{open}{}{close}", items.join(", ")))
    }

    /// Infix text (`age > 25 AND city = 'NYC'`)
    pub fn infix(&self, e: &Expr) -> Result<String> {
        let not = |negated: bool| if negated { format!("{} ", self.keyword("not")) } else { String::new() };
        Ok(match e {
            Expr::Literal(v) => self.literal(v),
            Expr::Field(path) => self.field(path),
            Expr::Variable(name) => format!("${name}"),
            Expr::Param(name) => format!("{}{name}", self.style.param_prefix),
            Expr::Star => self.style.star.clone(),
            Expr::Binary { op, left, right } => {
                let logical = matches!(op, BinaryOp::And | BinaryOp::Or);
                let sep = if logical || self.style.spacing { " " } else { "" };
                format!(
                    "{}{sep}{}{sep}{}",
                    self.operand(left, *op)?,
                    self.operator(*op),
                    self.operand(right, *op)?
                )
            }
            Expr::Not(inner) => format!("{} ({})", self.keyword("not"), self.infix(inner)?),
            Expr::Neg(inner) => format!("-{}", self.infix(inner)?),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => format!(
                "{} {}{} {}",
                self.infix(expr)?,
                not(*negated),
                self.keyword(if *case_insensitive { "ilike" } else { "like" }),
                self.infix(pattern)?
            ),
            Expr::In {
                expr,
                list,
                negated,
            } => format!(
                "{} {}{} {}",
                self.infix(expr)?,
                not(*negated),
                self.keyword("in"),
                self.list(list)?
            ),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => format!(
                "{} {}{} {} {} {}",
                self.infix(expr)?,
                not(*negated),
                self.keyword("between"),
                self.infix(low)?,
                self.keyword("and"),
                self.infix(high)?
            ),
            Expr::IsNull { expr, negated } => format!(
                "{} {} {}{}",
                self.infix(expr)?,
                self.keyword("is"),
                not(*negated),
                self.keyword("null")
            ),
            Expr::Exists(inner) => format!("{}({})", self.keyword("exists"), self.infix(inner)?),
            Expr::Call { name, args } => {
                let args = args.iter().map(|a| self.infix(a)).collect::<Result<Vec<_>>>()?;
                format!("{name}({})", args.join(", "))
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let distinct = if *distinct { format!("{} ", self.keyword("distinct")) } else { String::new() };
                match arg {
                    Some(a) => format!("{}({distinct}{})", func.name(), self.infix(a)?),
                    None => format!("{}(*)", func.name()),
                }
            }
            Expr::List(items) => {
                let items = items.iter().map(|i| self.infix(i)).collect::<Result<Vec<_>>>()?;
                format!("[{}]", items.join(", "))
            }
            Expr::Raw(text) => text.clone(),
        })
    }

    /// Predicate text in the style's notation
    pub fn predicate(&self, e: &Expr) -> Result<String> {
        match self.style.notation {
            ExprNotation::Infix => self.infix(e),
            ExprNotation::Hasura => self.hasura(e),
        }
    }

    pub fn projection(&self, p: &Projection) -> Result<String> {
        let text = self.infix(&p.expr)?;
        Ok(match &p.alias {
            Some(alias) if *alias != p.expr.output_name() => {
                format!("{text} {} {alias}", self.keyword("as"))
            }
            _ => text,
        })
    }

    pub fn sort_key(&self, key: &SortKey) -> Result<String> {
        let text = self.infix(&key.expr)?;
        Ok(match self.style.notation {
            ExprNotation::Hasura => {
                let dir = if key.descending { "desc" } else { "asc" };
                format!("{text}: {dir}")
            }
            ExprNotation::Infix if key.descending => format!("{text} {}", self.keyword("desc")),
            ExprNotation::Infix => text,
        })
    }

    // ------------------------------------------------------------------------
    // Hasura boolean expressions
    // ------------------------------------------------------------------------

    fn hasura_value(&self, e: &Expr) -> Result<String> {
        match e {
            Expr::Literal(v) => Ok(self.literal(v)),
            Expr::Param(name) | Expr::Variable(name) => Ok(format!("${name}")),
            Expr::Neg(inner) => Ok(format!("-{}", self.hasura_value(inner)?)),
            Expr::List(items) => {
                let items = items.iter().map(|i| self.hasura_value(i)).collect::<Result<Vec<_>>>()?;
                Ok(format!("[{}]", items.join(", ")))
            }
            other => Err(unsupported(other)),
        }
    }

    /// `field: {_op: value}` with nested paths as nested objects
    fn hasura_field(&self, path: &str, op: &str, value: String) -> String {
        let mut out = format!("{{{op}: {value}}}");
        let segments: Vec<&str> = path.split('.').collect();
        for (i, seg) in segments.iter().enumerate().rev() {
            out = if i == 0 {
                format!("{seg}: {out}")
            } else {
                format!("{{{seg}: {out}}}")
            };
        }
        out
    }

    fn hasura_entry(&self, e: &Expr) -> Result<String> {
        let field_of = |e: &Expr| match e {
            Expr::Field(path) => Ok(path.clone()),
            other => Err(unsupported(other)),
        };
        match e {
            Expr::Binary { op, left, right } => {
                let name = match op {
                    BinaryOp::Eq => "_eq",
                    BinaryOp::Ne => "_neq",
                    BinaryOp::Gt => "_gt",
                    BinaryOp::Ge => "_gte",
                    BinaryOp::Lt => "_lt",
                    BinaryOp::Le => "_lte",
                    BinaryOp::Regex => "_regex",
                    BinaryOp::And => {
                        let parts = e
                            .conjuncts()
                            .into_iter()
                            .map(|c| self.hasura(c))
                            .collect::<Result<Vec<_>>>()?;
                        return Ok(format!("_and: [{}]", parts.join(", ")));
                    }
                    BinaryOp::Or => {
                        let mut parts = Vec::new();
                        collect_disjuncts(e, &mut parts);
                        let parts = parts
                            .into_iter()
                            .map(|d| self.hasura(d))
                            .collect::<Result<Vec<_>>>()?;
                        return Ok(format!("_or: [{}]", parts.join(", ")));
                    }
                    _ => return Err(unsupported(e)),
                };
                Ok(self.hasura_field(&field_of(left)?, name, self.hasura_value(right)?))
            }
            Expr::Not(inner) => Ok(format!("_not: {}", self.hasura(inner)?)),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let op = match (negated, case_insensitive) {
                    (false, false) => "_like",
                    (true, false) => "_nlike",
                    (false, true) => "_ilike",
                    (true, true) => "_nilike",
                };
                Ok(self.hasura_field(&field_of(expr)?, op, self.hasura_value(pattern)?))
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let op = if *negated { "_nin" } else { "_in" };
                let items = list.iter().map(|i| self.hasura_value(i)).collect::<Result<Vec<_>>>()?;
                Ok(self.hasura_field(&field_of(expr)?, op, format!("[{}]", items.join(", "))))
            }
            Expr::IsNull { expr, negated } => Ok(self.hasura_field(
                &field_of(expr)?,
                "_is_null",
                (!negated).to_string(),
            )),
            other => Err(unsupported(other)),
        }
    }

    /// Hasura object (`{age: {_gt: 25}, city: {_eq: "NYC"}}`)
    pub fn hasura(&self, e: &Expr) -> Result<String> {
        let conjuncts = e.conjuncts();
        let simple = conjuncts.len() > 1
            && conjuncts
                .iter()
                .all(|c| !matches!(c, Expr::Binary { op: BinaryOp::Or, .. }));
        let entries = if simple {
            conjuncts
                .into_iter()
                .map(|c| self.hasura_entry(c))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![self.hasura_entry(e)?]
        };
        let mut entries = entries;
        if self.sorted_keys {
            entries.sort();
        }
        Ok(format!("{{{}}}", entries.join(", ")))
    }

    // ------------------------------------------------------------------------
    // Graph patterns
    // ------------------------------------------------------------------------

    fn node(&self, node: &NodePattern) -> String {
        let mut out = String::from("(");
        out.push_str(node.variable.as_deref().unwrap_or(""));
        for label in &node.labels {
            out.push(':');
            out.push_str(label);
        }
        if !node.properties.is_empty() {
            if out.len() > 1 {
                out.push(' ');
            }
            out.push_str(&self.literal(&Value::Object(node.properties.clone())));
        }
        out.push(')');
        out
    }

    /// Cypher-style pattern text
    pub fn pattern(&self, elements: &[PatternElement]) -> String {
        let mut out = String::new();
        for element in elements {
            match element {
                PatternElement::Node(node) => out.push_str(&self.node(node)),
                PatternElement::Edge(edge) => {
                    let mut inner = edge.variable.clone().unwrap_or_default();
                    if !edge.labels.is_empty() {
                        inner.push(':');
                        inner.push_str(&edge.labels.join("|"));
                    }
                    if edge.is_variable_length() {
                        inner.push('*');
                        match (edge.min_hops, edge.max_hops) {
                            (min, Some(max)) if min == max => inner.push_str(&min.to_string()),
                            (min, Some(max)) => inner.push_str(&format!("{min}..{max}")),
                            (1, None) => {}
                            (min, None) => inner.push_str(&format!("{min}..")),
                        }
                    }
                    if !edge.properties.is_empty() {
                        inner.push(' ');
                        inner.push_str(&self.literal(&Value::Object(edge.properties.clone())));
                    }
                    let body = if inner.is_empty() { String::new() } else { format!("[{inner}]") };
                    let (left, right) = match edge.direction {
                        Direction::Out => ("-", "->"),
                        Direction::In => ("<-", "-"),
                        Direction::Both => ("-", "-"),
                    };
                    out.push_str(&format!("{left}{body}{right}"));
                }
            }
        }
        out
    }
}

fn collect_disjuncts<'e>(e: &'e Expr, out: &mut Vec<&'e Expr>) {
    match e {
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            collect_disjuncts(left, out);
            collect_disjuncts(right, out);
        }
        other => out.push(other),
    }
}

fn unsupported(e: &Expr) -> QueryError {
    QueryError::unsupported(
        ActionKind::Where,
        format!("'{e}' has no equivalent in this output format"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::{AggregateFunc, EdgePattern};
    use serde_json::json;

    fn sql() -> ExprStyle {
        ExprStyle::default()
    }

    fn age_gt(n: i64) -> Expr {
        Expr::binary(BinaryOp::Gt, Expr::field("age"), Expr::lit(n))
    }

    #[test]
    fn test_infix_precedence_and_literals() {
        let style = sql();
        let r = ExprRenderer::new(&style, false);
        let e = Expr::and(
            Expr::or(age_gt(1), Expr::eq(Expr::field("name"), Expr::lit("O'Neil"))),
            Expr::IsNull {
                expr: Box::new(Expr::field("city")),
                negated: true,
            },
        );
        assert_eq!(r.infix(&e).unwrap(), "(age > 1 OR name = 'O''Neil') AND city IS NOT NULL");
    }

    #[test]
    fn test_compact_lowercase_style() {
        let style = ExprStyle {
            spacing: false,
            upper_keywords: false,
            path_separator: "/".into(),
            ..ExprStyle::default()
        };
        let r = ExprRenderer::new(&style, false);
        let e = Expr::and(age_gt(18), Expr::eq(Expr::field("address.city"), Expr::lit("NYC")));
        assert_eq!(r.infix(&e).unwrap(), "age>18 and address/city='NYC'");
    }

    #[test]
    fn test_field_prefix_only_for_bare_fields() {
        let style = ExprStyle {
            field_prefix: "n.".into(),
            ..ExprStyle::default()
        };
        let r = ExprRenderer::new(&style, false);
        assert_eq!(r.field("age"), "n.age");
        assert_eq!(r.field("u.age"), "u.age");
    }

    #[test]
    fn test_hasura_objects() {
        let style = ExprStyle {
            notation: ExprNotation::Hasura,
            quote: "\"".into(),
            upper_keywords: false,
            ..ExprStyle::default()
        };
        let r = ExprRenderer::new(&style, false);
        let e = Expr::and(age_gt(25), Expr::eq(Expr::field("address.city"), Expr::lit("NYC")));
        assert_eq!(
            r.hasura(&e).unwrap(),
            "{age: {_gt: 25}, address: {city: {_eq: \"NYC\"}}}"
        );
        let e = Expr::or(age_gt(1), Expr::Not(Box::new(age_gt(5))));
        assert_eq!(
            r.hasura(&e).unwrap(),
            "{_or: [{age: {_gt: 1}}, {_not: {age: {_gt: 5}}}]}"
        );
        let call = Expr::eq(
            Expr::Call {
                name: "lower".into(),
                args: vec![Expr::field("name")],
            },
            Expr::lit("x"),
        );
        assert!(r.hasura(&call).is_err());
    }

    #[test]
    fn test_projection_alias_and_sort_keys() {
        let style = sql();
        let r = ExprRenderer::new(&style, false);
        let p = Projection::aliased(Expr::aggregate(AggregateFunc::Count, None), "n");
        assert_eq!(r.projection(&p).unwrap(), "COUNT(*) AS n");
        let p = Projection::aliased(Expr::aggregate(AggregateFunc::Count, None), "count");
        assert_eq!(r.projection(&p).unwrap(), "COUNT(*)");
        assert_eq!(r.sort_key(&SortKey::desc(Expr::field("age"))).unwrap(), "age DESC");
    }

    #[test]
    fn test_pattern_text() {
        let style = sql();
        let r = ExprRenderer::new(&style, false);
        let elements = vec![
            PatternElement::Node(NodePattern {
                variable: Some("u".into()),
                labels: vec!["User".into()],
                properties: json!({"name": "Ann"}).as_object().cloned().unwrap_or_default(),
            }),
            PatternElement::Edge(EdgePattern {
                labels: vec!["FOLLOWS".into()],
                min_hops: 1,
                max_hops: Some(3),
                ..EdgePattern::default()
            }),
            PatternElement::Node(NodePattern {
                variable: Some("v".into()),
                ..NodePattern::default()
            }),
        ];
        assert_eq!(r.pattern(&elements), "(u:User {name: 'Ann'})-[:FOLLOWS*1..3]->(v)");
    }
}

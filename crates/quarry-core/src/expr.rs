//! Expression trees carried by predicate, projection and assignment params.

use crate::value;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Binary operators understood by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Contains => "CONTAINS",
            BinaryOp::StartsWith => "STARTS WITH",
            BinaryOp::EndsWith => "ENDS WITH",
            BinaryOp::Regex => "=~",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Operators whose operands may be swapped without changing meaning
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::And | BinaryOp::Or | BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Add | BinaryOp::Mul
        )
    }

    /// The operator with sides swapped (`a < b` == `b > a`)
    pub fn flipped(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            other => other,
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
            _ => 3,
        }
    }
}

/// Aggregate functions usable inside expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Collect => "COLLECT",
        }
    }

    pub fn from_name(name: &str) -> Option<AggregateFunc> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunc::Count),
            "SUM" => Some(AggregateFunc::Sum),
            "AVG" | "AVERAGE" | "MEAN" => Some(AggregateFunc::Avg),
            "MIN" => Some(AggregateFunc::Min),
            "MAX" => Some(AggregateFunc::Max),
            "COLLECT" | "PUSH" => Some(AggregateFunc::Collect),
            _ => None,
        }
    }
}

/// Scalar functions the evaluator implements, upper-case
pub const SCALAR_FUNCTIONS: &[&str] = &[
    "LOWER",
    "UPPER",
    "TRIM",
    "LENGTH",
    "SIZE",
    "ABS",
    "ROUND",
    "FLOOR",
    "CEIL",
    "COALESCE",
    "CONCAT",
    "SUBSTRING",
    "CONTAINS",
    "STARTS_WITH",
    "ENDS_WITH",
    "TOSTRING",
    "TONUMBER",
    "TOINTEGER",
    "TOFLOAT",
    "ID",
    "LABELS",
    "TYPE",
    "KEYS",
];

pub fn is_scalar_function(name: &str) -> bool {
    SCALAR_FUNCTIONS.iter().any(|f| f.eq_ignore_ascii_case(name))
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    /// Dotted field path resolved against the current row
    Field(String),
    /// Name bound by LET/FOR/MATCH
    Variable(String),
    /// Placeholder (`$name`, `?`)
    Param(String),
    /// `*`
    Star,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        case_insensitive: bool,
    },
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// `EXISTS(path)` / field presence
    Exists(Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
    List(Vec<Expr>),
    /// Construct the parser could not map, kept verbatim
    Raw(String),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Expr {
        Expr::Field(path.into())
    }

    pub fn lit(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, left, right)
    }

    pub fn aggregate(func: AggregateFunc, arg: Option<Expr>) -> Expr {
        Expr::Aggregate {
            func,
            arg: arg.map(Box::new),
            distinct: false,
        }
    }

    /// Split a conjunction into its operands
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// Fold predicates back into a left-deep conjunction
    pub fn conjoin(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Field paths referenced anywhere in the tree
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expr::Field(path) = e {
                out.push(path.as_str());
            }
        });
        out
    }

    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    pub fn contains_raw(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if matches!(e, Expr::Raw(_)) {
                found = true;
            }
        });
        found
    }

    /// `field = literal` (either side), used for index matching
    pub fn equality_on(&self) -> Option<(&str, &Value)> {
        match self {
            Expr::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Field(f), Expr::Literal(v)) | (Expr::Literal(v), Expr::Field(f)) => {
                    Some((f.as_str(), v))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Pre-order visit of every sub-expression
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Binary { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expr::Not(e) | Expr::Neg(e) | Expr::Exists(e) => e.visit(f),
            Expr::Like { expr, pattern, .. } => {
                expr.visit(f);
                pattern.visit(f);
            }
            Expr::In { expr, list, .. } => {
                expr.visit(f);
                list.iter().for_each(|e| e.visit(f));
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.visit(f);
                low.visit(f);
                high.visit(f);
            }
            Expr::IsNull { expr, .. } => expr.visit(f),
            Expr::Call { args, .. } | Expr::List(args) => args.iter().for_each(|e| e.visit(f)),
            Expr::Aggregate { arg: Some(a), .. } => a.visit(f),
            _ => {}
        }
    }

    /// Column name used when a projection has no alias.
    ///
    /// Aggregates are named by their lower-case function (`sum`, `count`).
    pub fn output_name(&self) -> String {
        match self {
            Expr::Field(path) => path.clone(),
            Expr::Variable(name) => name.clone(),
            Expr::Aggregate { func, .. } => func.name().to_ascii_lowercase(),
            Expr::Call { name, .. } => name.to_ascii_lowercase(),
            Expr::Literal(v) => value::display(v),
            other => other.to_string(),
        }
    }

    /// Normal form with commutative operands sorted, used for comparisons
    pub fn canonical(&self) -> Expr {
        match self {
            Expr::Binary { op, .. } if matches!(op, BinaryOp::And | BinaryOp::Or) => {
                let mut operands: Vec<Expr> = Vec::new();
                self.flatten(*op, &mut operands);
                let mut operands: Vec<Expr> = operands.iter().map(Expr::canonical).collect();
                operands.sort_by_cached_key(ToString::to_string);
                operands
                    .into_iter()
                    .reduce(|l, r| Expr::binary(*op, l, r))
                    .unwrap_or(Expr::Literal(Value::Null))
            }
            Expr::Binary { op, left, right } => {
                let (l, r) = (left.canonical(), right.canonical());
                if op.is_commutative() && l.to_string() > r.to_string() {
                    Expr::binary(*op, r, l)
                } else {
                    Expr::binary(*op, l, r)
                }
            }
            Expr::Not(e) => Expr::Not(Box::new(e.canonical())),
            Expr::Literal(v) => Expr::Literal(value::normalize_number(v)),
            other => other.clone(),
        }
    }

    fn flatten(&self, target: BinaryOp, out: &mut Vec<Expr>) {
        match self {
            Expr::Binary { op, left, right } if *op == target => {
                left.flatten(target, out);
                right.flatten(target, out);
            }
            other => out.push(other.clone()),
        }
    }

    /// Equality up to commutative operand order and numeric representation
    pub fn structurally_eq(&self, other: &Expr) -> bool {
        self.canonical().to_string() == other.canonical().to_string()
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expr, parent: BinaryOp) -> fmt::Result {
    match e {
        Expr::Binary { op, .. } if op.precedence() < parent.precedence() => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", value::literal_text(v)),
            Expr::Field(path) => f.write_str(path),
            Expr::Variable(name) => write!(f, "${name}"),
            Expr::Param(name) => write!(f, ":{name}"),
            Expr::Star => f.write_str("*"),
            Expr::Binary { op, left, right } => {
                write_operand(f, left, *op)?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, right, *op)
            }
            Expr::Not(e) => write!(f, "NOT ({e})"),
            Expr::Neg(e) => write!(f, "-{e}"),
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} {not}{op} {pattern}")
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let items: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "{expr} {not}IN ({})", items.join(", "))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} {not}BETWEEN {low} AND {high}")
            }
            Expr::IsNull { expr, negated } => {
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} IS {not}NULL")
            }
            Expr::Exists(e) => write!(f, "EXISTS({e})"),
            Expr::Call { name, args } => {
                let items: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{name}({})", items.join(", "))
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                match arg {
                    Some(a) => write!(f, "{}({distinct}{a})", func.name()),
                    None => write!(f, "{}(*)", func.name()),
                }
            }
            Expr::List(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Expr::Raw(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn age_gt(n: i64) -> Expr {
        Expr::binary(BinaryOp::Gt, Expr::field("age"), Expr::lit(n))
    }

    #[test]
    fn test_display_respects_precedence() {
        let e = Expr::and(
            Expr::or(age_gt(1), age_gt(2)),
            Expr::eq(Expr::field("city"), Expr::lit("NYC")),
        );
        assert_eq!(e.to_string(), "(age > 1 OR age > 2) AND city = 'NYC'");
    }

    #[test]
    fn test_conjuncts_flatten() {
        let e = Expr::and(Expr::and(age_gt(1), age_gt(2)), age_gt(3));
        assert_eq!(e.conjuncts().len(), 3);
        let rebuilt = Expr::conjoin(e.conjuncts().into_iter().cloned()).unwrap();
        assert_eq!(rebuilt, e);
    }

    #[test]
    fn test_structural_eq_ignores_and_order() {
        let city = Expr::eq(Expr::field("city"), Expr::lit("NYC"));
        let a = Expr::and(age_gt(18), city.clone());
        let b = Expr::and(city, age_gt(18));
        assert!(a.structurally_eq(&b));
        assert!(!a.structurally_eq(&age_gt(18)));
    }

    #[test]
    fn test_structural_eq_normalizes_numbers() {
        let a = Expr::lit(json!(18));
        let b = Expr::lit(json!(18.0));
        assert!(a.structurally_eq(&b));
    }

    #[test]
    fn test_output_names() {
        assert_eq!(Expr::aggregate(AggregateFunc::Sum, Some(Expr::field("price"))).output_name(), "sum");
        assert_eq!(Expr::aggregate(AggregateFunc::Count, None).output_name(), "count");
        assert_eq!(Expr::field("u.name").output_name(), "u.name");
    }

    #[test]
    fn test_equality_on_either_side() {
        let e = Expr::eq(Expr::lit(3), Expr::field("id"));
        assert_eq!(e.equality_on(), Some(("id", &json!(3))));
        assert!(age_gt(3).equality_on().is_none());
    }

    #[test]
    fn test_referenced_fields() {
        let e = Expr::and(age_gt(1), Expr::eq(Expr::field("a.b"), Expr::field("c")));
        assert_eq!(e.referenced_fields(), vec!["age", "a.b", "c"]);
    }
}

//! Expression evaluation against rows.
//!
//! Comparisons follow three-valued logic: any comparison with null yields
//! null, `AND`/`OR` propagate unknown, and a predicate only keeps a row when
//! it evaluates to a truthy value. Numeric coercion of strings follows the
//! conversion mode.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use quarry_core::expr::is_scalar_function;
use quarry_core::value::{self, as_number, canonical_string, compare, loose_eq, number, truthy};
use quarry_core::{AggregateFunc, BinaryOp, ConversionMode, Expr, QueryError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Compiled LIKE / `=~` patterns, keyed by source
static PATTERN_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

const PATTERN_CACHE_LIMIT: usize = 256;

static EMPTY_BINDINGS: Lazy<Map<String, Value>> = Lazy::new(Map::new);

/// What an expression is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Current row
    pub row: &'a Value,
    /// Rows of the current group, for aggregate calls
    pub group: Option<&'a [Value]>,
    /// LET / FOR / WITH bindings and query parameters
    pub bindings: &'a Map<String, Value>,
    /// Source aliases that may prefix a field path (`u.name`)
    pub qualifiers: &'a [String],
}

impl<'a> Scope<'a> {
    pub fn row(row: &'a Value) -> Self {
        Self {
            row,
            group: None,
            bindings: &EMPTY_BINDINGS,
            qualifiers: &[],
        }
    }

    pub fn with_bindings(mut self, bindings: &'a Map<String, Value>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_group(mut self, group: &'a [Value]) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_qualifiers(mut self, qualifiers: &'a [String]) -> Self {
        self.qualifiers = qualifiers;
        self
    }
}

/// Stateless expression evaluator for one conversion mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    mode: ConversionMode,
}

impl Evaluator {
    pub fn new(mode: ConversionMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    fn coerce(&self) -> bool {
        self.mode.coerces()
    }

    fn strict(&self) -> bool {
        self.mode == ConversionMode::Strict
    }

    /// Resolve a dotted field path.
    ///
    /// The row is tried first, then the path with a known source alias
    /// stripped, then the bindings.
    pub fn lookup(&self, path: &str, scope: &Scope<'_>) -> Option<Value> {
        if let Some(found) = value::get_path(scope.row, path) {
            return Some(found.clone());
        }
        match path.split_once('.') {
            Some((head, rest)) => {
                if scope.qualifiers.iter().any(|q| q == head) {
                    if let Some(found) = value::get_path(scope.row, rest) {
                        return Some(found.clone());
                    }
                }
                scope
                    .bindings
                    .get(head)
                    .and_then(|bound| value::get_path(bound, rest))
                    .cloned()
            }
            None => scope.bindings.get(path).cloned(),
        }
    }

    /// Evaluate a predicate; unknown counts as false
    pub fn test(&self, expr: &Expr, scope: &Scope<'_>) -> Result<bool> {
        Ok(truthy(&self.eval(expr, scope)?))
    }

    pub fn eval(&self, expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field(path) => Ok(self.lookup(path, scope).unwrap_or(Value::Null)),
            Expr::Variable(name) => Ok(scope
                .row
                .get(name)
                .or_else(|| scope.bindings.get(name))
                .cloned()
                .unwrap_or(Value::Null)),
            Expr::Param(name) => {
                let key = name.trim_start_matches(['$', ':']);
                scope
                    .bindings
                    .get(key)
                    .cloned()
                    .ok_or_else(|| QueryError::value(format!("unbound parameter '{name}'")))
            }
            Expr::Star => Ok(scope.row.clone()),
            Expr::Binary { op, left, right } => self.binary(*op, left, right, scope),
            Expr::Not(inner) => Ok(match self.eval(inner, scope)? {
                Value::Null => Value::Null,
                v => Value::Bool(!truthy(&v)),
            }),
            Expr::Neg(inner) => {
                let v = self.eval(inner, scope)?;
                match as_number(&v, self.coerce()) {
                    Some(n) => Ok(number(-n)),
                    None if v.is_null() => Ok(Value::Null),
                    None => self.type_mismatch(format!("cannot negate {}", value::type_name(&v))),
                }
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let v = self.eval(expr, scope)?;
                let p = self.eval(pattern, scope)?;
                let (Value::String(text), Value::String(pattern)) = (&v, &p) else {
                    return Ok(Value::Null);
                };
                let matched = like_matches(text, pattern, *case_insensitive)?;
                Ok(Value::Bool(matched != *negated))
            }
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let v = self.eval(expr, scope)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut found = false;
                for item in list {
                    let candidate = self.eval(item, scope)?;
                    let hit = match &candidate {
                        // `x IN [a, b]` written as a single list literal
                        Value::Array(items) if list.len() == 1 => {
                            items.iter().any(|i| loose_eq(&v, i, self.coerce()))
                        }
                        other => loose_eq(&v, other, self.coerce()),
                    };
                    if hit {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(found != *negated))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = self.eval(expr, scope)?;
                let lo = self.eval(low, scope)?;
                let hi = self.eval(high, scope)?;
                let above = compare(&v, &lo, self.coerce()).map(|o| o != Ordering::Less);
                let below = compare(&v, &hi, self.coerce()).map(|o| o != Ordering::Greater);
                Ok(match (above, below) {
                    (Some(a), Some(b)) => Value::Bool((a && b) != *negated),
                    _ => Value::Null,
                })
            }
            Expr::IsNull { expr, negated } => {
                let v = self.eval(expr, scope)?;
                Ok(Value::Bool(v.is_null() != *negated))
            }
            Expr::Exists(inner) => Ok(Value::Bool(match inner.as_ref() {
                Expr::Field(path) => self.lookup(path, scope).is_some(),
                other => !self.eval(other, scope)?.is_null(),
            })),
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                self.call(name, values)
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => {
                let Some(group) = scope.group else {
                    return Err(QueryError::validation(format!(
                        "{}() used outside of an aggregation",
                        func.name()
                    )));
                };
                let Some(arg) = arg else {
                    return Ok(Value::from(group.len()));
                };
                let mut values = Vec::with_capacity(group.len());
                for row in group {
                    let row_scope = Scope { row, group: None, ..*scope };
                    values.push(self.eval(arg, &row_scope)?);
                }
                aggregate(*func, values, *distinct, self.coerce())
            }
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, scope)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Raw(text) => Err(QueryError::execution(format!(
                "cannot evaluate untranslated expression '{text}'"
            ))),
        }
    }

    fn type_mismatch(&self, message: String) -> Result<Value> {
        if self.strict() {
            Err(QueryError::type_error(message))
        } else {
            Ok(Value::Null)
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope<'_>) -> Result<Value> {
        // AND / OR short-circuit on a decided side
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let l = self.eval(left, scope)?;
            let decided = op == BinaryOp::Or;
            if !l.is_null() && truthy(&l) == decided {
                return Ok(Value::Bool(decided));
            }
            let r = self.eval(right, scope)?;
            if !r.is_null() && truthy(&r) == decided {
                return Ok(Value::Bool(decided));
            }
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            return Ok(Value::Bool(!decided));
        }

        let l = self.eval(left, scope)?;
        let r = self.eval(right, scope)?;
        if op.is_comparison() {
            return self.comparison(op, &l, &r);
        }
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        match op {
            BinaryOp::Add => {
                if let (Value::String(a), Value::String(b)) = (&l, &r) {
                    return Ok(Value::String(format!("{a}{b}")));
                }
                self.arithmetic(op, &l, &r)
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.arithmetic(op, &l, &r)
            }
            BinaryOp::Contains => Ok(Value::Bool(match (&l, &r) {
                (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
                (Value::Array(items), needle) => {
                    items.iter().any(|i| loose_eq(i, needle, self.coerce()))
                }
                _ => return self.type_mismatch(format!("CONTAINS on {}", value::type_name(&l))),
            })),
            BinaryOp::StartsWith | BinaryOp::EndsWith => match (&l, &r) {
                (Value::String(a), Value::String(b)) => Ok(Value::Bool(if op == BinaryOp::StartsWith {
                    a.starts_with(b.as_str())
                } else {
                    a.ends_with(b.as_str())
                })),
                _ => self.type_mismatch(format!("{} on non-strings", op.symbol())),
            },
            BinaryOp::Regex => match (&l, &r) {
                (Value::String(text), Value::String(pattern)) => {
                    Ok(Value::Bool(compiled(pattern, || format!("^(?:{pattern})$"))?.is_match(text)))
                }
                _ => Ok(Value::Null),
            },
            _ => Err(QueryError::execution(format!("unexpected operator {}", op.symbol()))),
        }
    }

    fn comparison(&self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
        if l.is_null() || r.is_null() {
            return Ok(Value::Null);
        }
        let ordering = compare(l, r, self.coerce());
        let Some(ordering) = ordering else {
            let scalars = !l.is_array() && !l.is_object() && !r.is_array() && !r.is_object();
            if scalars && std::mem::discriminant(l) != std::mem::discriminant(r) {
                if self.strict() {
                    return Err(QueryError::type_error(format!(
                        "cannot compare {} with {}",
                        value::type_name(l),
                        value::type_name(r)
                    )));
                }
            }
            // Different composites are unequal; ordering them is unknown
            return Ok(match op {
                BinaryOp::Eq => Value::Bool(false),
                BinaryOp::Ne => Value::Bool(true),
                _ => Value::Null,
            });
        };
        Ok(Value::Bool(match op {
            BinaryOp::Eq => ordering == Ordering::Equal,
            BinaryOp::Ne => ordering != Ordering::Equal,
            BinaryOp::Lt => ordering == Ordering::Less,
            BinaryOp::Le => ordering != Ordering::Greater,
            BinaryOp::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        }))
    }

    fn arithmetic(&self, op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
        let (Some(a), Some(b)) = (as_number(l, self.coerce()), as_number(r, self.coerce())) else {
            return self.type_mismatch(format!(
                "cannot apply {} to {} and {}",
                op.symbol(),
                value::type_name(l),
                value::type_name(r)
            ));
        };
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
                return if self.strict() {
                    Err(QueryError::value("division by zero"))
                } else {
                    Ok(Value::Null)
                };
            }
            BinaryOp::Div => a / b,
            _ => a % b,
        };
        Ok(number(result))
    }

    /// Scalar function call
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let upper = name.to_ascii_uppercase();
        if !is_scalar_function(&upper) {
            return Err(QueryError::validation(format!("unknown function '{name}'")));
        }
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
        let text = |i: usize| args.get(i).and_then(Value::as_str).map(str::to_string);
        let num = |i: usize| args.get(i).and_then(|v| as_number(v, self.coerce()));

        Ok(match upper.as_str() {
            "LOWER" => text(0).map_or(Value::Null, |s| Value::String(s.to_lowercase())),
            "UPPER" => text(0).map_or(Value::Null, |s| Value::String(s.to_uppercase())),
            "TRIM" => text(0).map_or(Value::Null, |s| Value::String(s.trim().to_string())),
            "LENGTH" | "SIZE" => match arg(0) {
                Value::String(s) => Value::from(s.chars().count()),
                Value::Array(items) => Value::from(items.len()),
                Value::Object(map) => Value::from(map.len()),
                _ => Value::Null,
            },
            "ABS" => num(0).map_or(Value::Null, |n| number(n.abs())),
            "ROUND" => match num(0) {
                Some(n) => {
                    let digits = num(1).unwrap_or(0.0) as i32;
                    let factor = 10f64.powi(digits);
                    number((n * factor).round() / factor)
                }
                None => Value::Null,
            },
            "FLOOR" => num(0).map_or(Value::Null, |n| number(n.floor())),
            "CEIL" => num(0).map_or(Value::Null, |n| number(n.ceil())),
            "COALESCE" => args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null),
            "CONCAT" => {
                if args.iter().any(Value::is_null) {
                    Value::Null
                } else {
                    Value::String(args.iter().map(value::display).collect())
                }
            }
            "SUBSTRING" => match (text(0), num(1)) {
                // 1-based start, optional length
                (Some(s), Some(start)) => {
                    let start = (start as i64 - 1).max(0) as usize;
                    let chars = s.chars().skip(start);
                    Value::String(match num(2) {
                        Some(len) => chars.take(len.max(0.0) as usize).collect(),
                        None => chars.collect(),
                    })
                }
                _ => Value::Null,
            },
            "CONTAINS" | "STARTS_WITH" | "ENDS_WITH" => match (text(0), text(1)) {
                (Some(a), Some(b)) => Value::Bool(match upper.as_str() {
                    "CONTAINS" => a.contains(&b),
                    "STARTS_WITH" => a.starts_with(&b),
                    _ => a.ends_with(&b),
                }),
                _ => Value::Null,
            },
            "TOSTRING" => match arg(0) {
                Value::Null => Value::Null,
                v => Value::String(value::display(&v)),
            },
            "TONUMBER" | "TOFLOAT" => as_number(&arg(0), true).map_or(Value::Null, |n| {
                if upper == "TOFLOAT" {
                    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
                } else {
                    number(n)
                }
            }),
            "TOINTEGER" => as_number(&arg(0), true).map_or(Value::Null, |n| Value::from(n.trunc() as i64)),
            "ID" => match arg(0) {
                Value::Object(map) => map.get("id").cloned().unwrap_or(Value::Null),
                other => other,
            },
            "LABELS" => match arg(0) {
                Value::Object(map) => match (map.get("labels"), map.get("label")) {
                    (Some(labels @ Value::Array(_)), _) => labels.clone(),
                    (_, Some(label)) => Value::Array(vec![label.clone()]),
                    _ => Value::Array(Vec::new()),
                },
                _ => Value::Null,
            },
            "TYPE" => match arg(0) {
                Value::Object(map) => map
                    .get("type")
                    .or_else(|| map.get("label"))
                    .cloned()
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
            "KEYS" => match arg(0) {
                Value::Object(map) => Value::Array(map.keys().cloned().map(Value::String).collect()),
                _ => Value::Null,
            },
            _ => Value::Null,
        })
    }
}

/// Compile (or fetch) a regex built from `source` by `render`
fn compiled(source: &str, render: impl FnOnce() -> String) -> Result<Regex> {
    let mut cache = PATTERN_CACHE.lock();
    if let Some(re) = cache.get(source) {
        return Ok(re.clone());
    }
    let re = Regex::new(&render())
        .map_err(|e| QueryError::value(format!("invalid pattern '{source}': {e}")))?;
    if cache.len() >= PATTERN_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(source.to_string(), re.clone());
    Ok(re)
}

/// SQL LIKE: `%` matches any run, `_` one character
pub fn like_matches(text: &str, pattern: &str, case_insensitive: bool) -> Result<bool> {
    let key = format!("{}{pattern}", if case_insensitive { "i:" } else { "s:" });
    let re = compiled(&key, || {
        let mut out = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
        for c in pattern.chars() {
            match c {
                '%' => out.push_str(".*"),
                '_' => out.push('.'),
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }
        out.push('$');
        out
    })?;
    Ok(re.is_match(text))
}

/// Apply an aggregate function to the values of one group.
///
/// Nulls never contribute. With `coerce`, SUM and AVG skip values that fail
/// numeric coercion; without it a non-numeric value is a TYPE error. AVG
/// divides by the number of contributing values. MIN and MAX compare
/// numerically when any value is numeric, otherwise by sort order.
pub fn aggregate(func: AggregateFunc, values: Vec<Value>, distinct: bool, coerce: bool) -> Result<Value> {
    let mut present: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if distinct {
        let mut seen = HashSet::new();
        present.retain(|v| seen.insert(canonical_string(v)));
    }
    let value = match func {
        AggregateFunc::Count => Value::from(present.len()),
        AggregateFunc::Collect => Value::Array(present),
        AggregateFunc::Sum | AggregateFunc::Avg => {
            let mut numbers = Vec::with_capacity(present.len());
            for v in &present {
                match as_number(v, coerce) {
                    Some(n) => numbers.push(n),
                    None if coerce => {}
                    None => {
                        return Err(QueryError::type_error(format!(
                            "{} over non-numeric value {v} ({})",
                            func.name(),
                            value::type_name(v)
                        )))
                    }
                }
            }
            if numbers.is_empty() {
                return Ok(Value::Null);
            }
            let total: f64 = numbers.iter().sum();
            if func == AggregateFunc::Sum {
                number(total)
            } else {
                number(total / numbers.len() as f64)
            }
        }
        AggregateFunc::Min | AggregateFunc::Max => {
            let numeric: Vec<(f64, &Value)> = present
                .iter()
                .filter_map(|v| as_number(v, coerce).map(|n| (n, v)))
                .collect();
            let pick_max = func == AggregateFunc::Max;
            if !numeric.is_empty() {
                let best = numeric.into_iter().reduce(|a, b| {
                    let better = if pick_max { b.0 > a.0 } else { b.0 < a.0 };
                    if better {
                        b
                    } else {
                        a
                    }
                });
                return Ok(best.map_or(Value::Null, |(n, _)| number(n)));
            }
            let best = present.into_iter().reduce(|a, b| {
                let ord = value::sort_cmp(&b, &a, coerce);
                let better = if pick_max {
                    ord == Ordering::Greater
                } else {
                    ord == Ordering::Less
                };
                if better {
                    b
                } else {
                    a
                }
            });
            best.unwrap_or(Value::Null)
        }
    };
    Ok(value)
}

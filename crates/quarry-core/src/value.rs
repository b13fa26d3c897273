//! Helpers over `serde_json::Value`: paths, coercion, ordering and canonical form.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Resolve a dotted path (`a.b.0.c`). Numeric segments index arrays.
///
/// An empty path returns the value itself.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn get_path_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Write `new` at `path`, creating intermediate objects.
///
/// Returns `false` when a segment walks through a scalar or an array index
/// past the end.
pub fn set_path(value: &mut Value, path: &str, new: Value) -> bool {
    if path.is_empty() {
        *value = new;
        return true;
    }
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), new);
                    return true;
                }
                map.entry(segment.to_string()).or_insert(Value::Null)
            }
            Value::Array(items) => {
                let Ok(index) = segment.parse::<usize>() else {
                    return false;
                };
                if last {
                    match index.cmp(&items.len()) {
                        Ordering::Less => items[index] = new,
                        Ordering::Equal => items.push(new),
                        Ordering::Greater => return false,
                    }
                    return true;
                }
                match items.get_mut(index) {
                    Some(next) => next,
                    None => return false,
                }
            }
            _ => return false,
        };
    }
    false
}

/// Remove the value at `path`, returning it.
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let (parent, key) = match path.rsplit_once('.') {
        Some((parent, key)) => (get_path_mut(value, parent)?, key),
        None => (value, path),
    };
    match parent {
        Value::Object(map) => map.remove(key),
        Value::Array(items) => {
            let index = key.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}

/// Numeric view of a value.
///
/// With `coerce`, numeric strings and booleans are converted too.
pub fn as_number(value: &Value, coerce: bool) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if coerce => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) if coerce => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Build a JSON number, preferring an integer representation.
pub fn number(f: f64) -> Value {
    if !f.is_finite() {
        return Value::Null;
    }
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Value::Number(Number::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Integral floats become integers, everything else is unchanged
pub fn normalize_number(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map(number).unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// Compare two values of compatible types. Nulls compare as unknown.
///
/// With `coerce`, a number and a numeric string compare numerically.
pub fn compare(a: &Value, b: &Value, coerce: bool) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) if coerce => {
            as_number(a, true)?.partial_cmp(&as_number(b, true)?)
        }
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            (canonical_string(a) == canonical_string(b)).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

/// Equality with numeric normalization (`1 == 1.0`). Null never equals.
pub fn loose_eq(a: &Value, b: &Value, coerce: bool) -> bool {
    compare(a, b, coerce) == Some(Ordering::Equal)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::String(_) => 1,
        Value::Bool(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

/// Total order for sorting: mixed types by type rank, nulls last.
pub fn sort_cmp(a: &Value, b: &Value, coerce: bool) -> Ordering {
    if coerce {
        if let (Some(x), Some(y)) = (as_number(a, true), as_number(b, true)) {
            if !a.is_boolean() && !b.is_boolean() {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
        }
    }
    match compare(a, b, false) {
        Some(ord) => ord,
        None => match type_rank(a).cmp(&type_rank(b)) {
            Ordering::Equal => canonical_string(a).cmp(&canonical_string(b)),
            other => other,
        },
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Stable text form: sorted keys, integral floats printed as integers.
///
/// Two values are duplicates for DISTINCT iff their canonical strings match.
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(_) => out.push_str(&normalize_number(value).to_string()),
        other => out.push_str(&other.to_string()),
    }
}

/// Plain display: strings without quotes, everything else as JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Literal as written in a query: single-quoted strings with `''` escapes.
pub fn literal_text(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        other => normalize_number(other).to_string(),
    }
}

/// View a value as a row sequence.
///
/// Arrays yield their items; null yields nothing; anything else is a single row.
pub fn as_rows(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Short type name for messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

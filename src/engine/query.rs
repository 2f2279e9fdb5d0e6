use std::cmp::Ordering;

use log::warn;
use regex::RegexBuilder;
use serde_json::{Map, Value};

/// Resolves a dotted field path against a document.
///
/// Walks objects by key. When an intermediate node is a list and the next
/// segment is a non-negative integer literal it indexes into the list;
/// otherwise the remaining path is mapped over every element and the
/// flattened defined results become the value. `None` means the path
/// resolved to nothing (distinct from an explicit JSON `null`).
pub fn resolve_path(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(doc, &segments)
}

fn resolve_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    if segments.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Object(map) => map
            .get(segments[0])
            .and_then(|v| resolve_segments(v, &segments[1..])),
        Value::Array(items) => {
            if let Ok(index) = segments[0].parse::<usize>() {
                items
                    .get(index)
                    .and_then(|v| resolve_segments(v, &segments[1..]))
            } else {
                let mut collected = Vec::new();
                for item in items {
                    match resolve_segments(item, segments) {
                        Some(Value::Array(inner)) => collected.extend(inner),
                        Some(v) => collected.push(v),
                        None => {}
                    }
                }
                if collected.is_empty() {
                    None
                } else {
                    Some(Value::Array(collected))
                }
            }
        }
        _ => None,
    }
}

/// Strict equality with numeric tolerance: `1` and `1.0` are the same value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Evaluates a filter against a document. Top-level `$and`/`$or`/`$nor`/
/// `$not` combine sub-filters; plain field entries are an implicit `$and`.
pub fn matches_filter(doc: &Value, filter: &Map<String, Value>) -> bool {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => subfilters(condition).iter().all(|f| matches_filter(doc, f)),
            "$or" => subfilters(condition).iter().any(|f| matches_filter(doc, f)),
            "$nor" => !subfilters(condition).iter().any(|f| matches_filter(doc, f)),
            "$not" => match condition.as_object() {
                Some(sub) => !matches_filter(doc, sub),
                None => {
                    warn!("$not expects a sub-filter object, ignoring");
                    true
                }
            },
            field => {
                let actual = resolve_path(doc, field);
                match condition {
                    Value::Object(expr) => eval_operator_expr(actual.as_ref(), expr),
                    expected => eval_equality(actual.as_ref(), expected),
                }
            }
        };
        if !ok {
            return false;
        }
    }
    true
}

fn subfilters(condition: &Value) -> Vec<&Map<String, Value>> {
    match condition {
        Value::Array(items) => items.iter().filter_map(|v| v.as_object()).collect(),
        _ => {
            warn!("logical operator expects a list of sub-filters, ignoring");
            Vec::new()
        }
    }
}

/// Equality constraint. A list value matches when it contains the expected
/// scalar; an unresolved path never matches a plain equality.
fn eval_equality(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::Array(items)) => items.iter().any(|v| values_equal(v, expected)),
        Some(v) => values_equal(v, expected),
        None => false,
    }
}

/// Evaluates an operator expression (`{$gte: 5, $lt: 10}`) against a
/// resolved value. All entries must hold.
///
/// With an unresolved value only `$exists` keeps its meaning and `$ne`
/// succeeds; every other operator fails. Unknown operators are logged and
/// skipped so they cannot fail the match.
pub fn eval_operator_expr(actual: Option<&Value>, expr: &Map<String, Value>) -> bool {
    for (op, expected) in expr {
        // $options is consumed by its $regex sibling.
        if op == "$options" {
            continue;
        }
        let ok = match op.as_str() {
            "$eq" => any_matches(actual, |v| values_equal(v, expected)),
            "$ne" => match actual {
                None => true,
                Some(_) => !any_matches(actual, |v| values_equal(v, expected)),
            },
            "$gt" => any_matches(actual, |v| compare_defined(v, expected) == Some(Ordering::Greater)),
            "$gte" => any_matches(actual, |v| {
                matches!(compare_defined(v, expected), Some(Ordering::Greater | Ordering::Equal))
            }),
            "$lt" => any_matches(actual, |v| compare_defined(v, expected) == Some(Ordering::Less)),
            "$lte" => any_matches(actual, |v| {
                matches!(compare_defined(v, expected), Some(Ordering::Less | Ordering::Equal))
            }),
            "$in" => match expected.as_array() {
                Some(set) => any_matches(actual, |v| set.iter().any(|e| values_equal(v, e))),
                None => {
                    warn!("$in expects a list, ignoring");
                    true
                }
            },
            "$nin" => match expected.as_array() {
                Some(set) => match actual {
                    None => false,
                    Some(_) => !any_matches(actual, |v| set.iter().any(|e| values_equal(v, e))),
                },
                None => {
                    warn!("$nin expects a list, ignoring");
                    true
                }
            },
            "$exists" => {
                let wanted = expected.as_bool().unwrap_or(false);
                actual.is_some() == wanted
            }
            "$regex" => eval_regex(actual, expected, expr.get("$options")),
            "$mod" => eval_mod(actual, expected),
            "$not" => match expected.as_object() {
                Some(inner) => actual.is_some() && !eval_operator_expr(actual, inner),
                None => {
                    warn!("$not expects an operator expression, ignoring");
                    true
                }
            },
            other => {
                warn!("unknown filter operator {other}, ignoring");
                true
            }
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Applies `pred` to a scalar, or to every element of a list value. An
/// unresolved value satisfies nothing.
fn any_matches<F: Fn(&Value) -> bool>(actual: Option<&Value>, pred: F) -> bool {
    match actual {
        Some(Value::Array(items)) => items.iter().any(pred),
        Some(v) => pred(v),
        None => false,
    }
}

/// Comparison for filter operators: numbers against numbers, strings
/// against strings. Everything else is incomparable.
fn compare_defined(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

fn eval_regex(actual: Option<&Value>, pattern: &Value, options: Option<&Value>) -> bool {
    let Some(pattern) = pattern.as_str() else {
        warn!("$regex expects a string pattern, ignoring");
        return true;
    };
    let flags = options.and_then(|v| v.as_str()).unwrap_or("");
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build();
    let regex = match regex {
        Ok(r) => r,
        Err(e) => {
            warn!("invalid $regex pattern {pattern:?}: {e}");
            return false;
        }
    };
    // Non-string values match against their JSON text ("3", "null", ...).
    any_matches(actual, |v| match v {
        Value::String(s) => regex.is_match(s),
        other => regex.is_match(&other.to_string()),
    })
}

fn eval_mod(actual: Option<&Value>, expected: &Value) -> bool {
    let parts = match expected.as_array() {
        Some(parts) if parts.len() == 2 => parts,
        _ => {
            warn!("$mod expects [divisor, remainder], ignoring");
            return true;
        }
    };
    let (Some(divisor), Some(remainder)) = (parts[0].as_f64(), parts[1].as_f64()) else {
        warn!("$mod expects numeric [divisor, remainder], ignoring");
        return true;
    };
    if divisor == 0.0 {
        return false;
    }
    any_matches(actual, |v| match v.as_f64() {
        Some(n) => n % divisor == remainder,
        None => false,
    })
}

/// Total ordering used by sort: an unresolved key orders below every
/// defined value, then null, booleans, numbers, strings, lists, maps.
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => {
            let (rx, ry) = (type_rank(x), type_rank(y));
            if rx != ry {
                return rx.cmp(&ry);
            }
            match (x, y) {
                (Value::Bool(p), Value::Bool(q)) => p.cmp(q),
                (Value::Number(_), Value::Number(_)) => x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(Ordering::Equal),
                (Value::String(p), Value::String(q)) => p.cmp(q),
                (Value::Null, Value::Null) => Ordering::Equal,
                _ => x.to_string().cmp(&y.to_string()),
            }
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Stable multi-key sort. Spec entries are visited in the order given; the
/// first discriminating field decides. `1`/`true` ascend, `-1`/`false`
/// descend.
pub fn sort_documents(documents: &mut [Value], spec: &Map<String, Value>) {
    documents.sort_by(|a, b| {
        for (field, direction) in spec {
            let va = resolve_path(a, field);
            let vb = resolve_path(b, field);
            let cmp = compare_for_sort(va.as_ref(), vb.as_ref());
            if cmp != Ordering::Equal {
                return if descending(direction) { cmp.reverse() } else { cmp };
            }
        }
        Ordering::Equal
    });
}

fn descending(direction: &Value) -> bool {
    match direction {
        Value::Number(n) => n.as_f64().unwrap_or(1.0) < 0.0,
        Value::Bool(b) => !b,
        _ => false,
    }
}

/// Applies a projection spec to a document, or element-wise to a list.
///
/// Pure-include specs rebuild the document with only the requested paths;
/// a dotted include lands under its dotted key (`{"a.b": v}`). Pure-exclude
/// specs clone the document and delete the requested paths, walking nested
/// maps but not descending through lists. Mixed specs are unsupported: the
/// document is returned unprojected with a warning.
pub fn project(doc: &Value, fields: &Map<String, Value>) -> Value {
    if let Value::Array(items) = doc {
        return Value::Array(items.iter().map(|d| project(d, fields)).collect());
    }
    if fields.is_empty() {
        return doc.clone();
    }

    let includes = fields.values().filter(|v| inclusive(v)).count();
    if includes != 0 && includes != fields.len() {
        warn!("projection mixes inclusion and exclusion, returning unprojected");
        return doc.clone();
    }

    if includes == fields.len() {
        let mut out = Map::new();
        for path in fields.keys() {
            if let Some(v) = resolve_path(doc, path) {
                out.insert(path.clone(), v);
            }
        }
        Value::Object(out)
    } else {
        let mut out = doc.clone();
        for path in fields.keys() {
            remove_path(&mut out, path);
        }
        out
    }
}

fn inclusive(direction: &Value) -> bool {
    match direction {
        Value::Number(n) => n.as_f64().unwrap_or(0.0) > 0.0,
        Value::Bool(b) => *b,
        _ => false,
    }
}

fn remove_path(doc: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for segment in &segments[..segments.len() - 1] {
        match current.as_object_mut().and_then(|m| m.get_mut(*segment)) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(segments[segments.len() - 1]);
    }
}

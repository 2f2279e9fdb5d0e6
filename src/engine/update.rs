use log::warn;
use serde_json::{Map, Number, Value};

use crate::engine::codec::{FIELD_ID, FIELD_UPDATED_AT};
use crate::engine::query::values_equal;
use crate::{Error, Result};

/// Wraps a replace-fields update (no `$`-prefixed keys) in `$set` so the
/// interpreter only ever sees operator updates. Operator updates pass
/// through unchanged.
pub fn normalize(update: &Map<String, Value>) -> Map<String, Value> {
    if update.keys().any(|k| k.starts_with('$')) {
        update.clone()
    } else {
        let mut wrapped = Map::new();
        wrapped.insert("$set".to_string(), Value::Object(update.clone()));
        wrapped
    }
}

/// Applies a normalized update to a document in place and refreshes
/// `updatedAt` to `now`.
///
/// Dotted paths create intermediate maps as needed. Any operator targeting
/// the `id` field fails with [`Error::IdMutation`], except a `$set` writing
/// the value it already holds.
pub fn apply(doc: &mut Map<String, Value>, update: &Map<String, Value>, now: &str) -> Result<()> {
    for (op, arg) in update {
        let Some(entries) = arg.as_object() else {
            warn!("update operator {op} expects an object argument, ignoring");
            continue;
        };
        for (path, value) in entries {
            guard_id(doc, op, path, value)?;
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$unset" => unset_path(doc, path),
                "$inc" => inc_path(doc, path, value),
                "$push" => push_path(doc, path, value.clone()),
                "$addToSet" => add_to_set(doc, path, value),
                "$pull" => pull_path(doc, path, value),
                other => {
                    warn!("unknown update operator {other}, ignoring");
                }
            }
        }
    }
    doc.insert(FIELD_UPDATED_AT.to_string(), Value::String(now.to_string()));
    Ok(())
}

fn guard_id(doc: &Map<String, Value>, op: &str, path: &str, value: &Value) -> Result<()> {
    if path != FIELD_ID {
        return Ok(());
    }
    if op == "$set" {
        if let Some(current) = doc.get(FIELD_ID) {
            if values_equal(current, value) {
                return Ok(());
            }
        }
    }
    Err(Error::IdMutation)
}

/// Walks to the parent of `path`, creating intermediate maps. A non-map
/// intermediate is replaced by an empty map. Returns the parent map and the
/// leaf key.
fn leaf_entry<'a>(root: &'a mut Map<String, Value>, path: &str) -> (&'a mut Map<String, Value>, String) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path).to_string();
    let mut current = root;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = slot.as_object_mut().unwrap();
    }
    (current, leaf)
}

fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    let (parent, leaf) = leaf_entry(doc, path);
    parent.insert(leaf, value);
}

/// Removes the leaf without creating intermediates along the way.
fn unset_path(doc: &mut Map<String, Value>, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(*segment).and_then(|v| v.as_object_mut()) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(segments[segments.len() - 1]);
}

fn inc_path(doc: &mut Map<String, Value>, path: &str, amount: &Value) {
    let Some(amount) = amount.as_f64() else {
        warn!("$inc expects a numeric amount, ignoring");
        return;
    };
    let (parent, leaf) = leaf_entry(doc, path);
    let current = parent.get(&leaf).and_then(|v| v.as_f64()).unwrap_or(0.0);
    let sum = current + amount;
    let number = if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Number::from(sum as i64)
    } else {
        Number::from_f64(sum).unwrap_or_else(|| Number::from(0))
    };
    parent.insert(leaf, Value::Number(number));
}

fn push_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    let (parent, leaf) = leaf_entry(doc, path);
    match parent.get_mut(&leaf).and_then(|v| v.as_array_mut()) {
        Some(list) => list.push(value),
        None => {
            parent.insert(leaf, Value::Array(vec![value]));
        }
    }
}

fn add_to_set(doc: &mut Map<String, Value>, path: &str, value: &Value) {
    let candidates: Vec<Value> = match value.as_object().and_then(|o| o.get("$each")) {
        Some(Value::Array(each)) => each.clone(),
        Some(other) => vec![other.clone()],
        None => vec![value.clone()],
    };
    let (parent, leaf) = leaf_entry(doc, path);
    if !parent.get(&leaf).map(|v| v.is_array()).unwrap_or(false) {
        parent.insert(leaf.clone(), Value::Array(Vec::new()));
    }
    let list = parent.get_mut(&leaf).and_then(|v| v.as_array_mut()).unwrap();
    for candidate in candidates {
        if !list.iter().any(|v| values_equal(v, &candidate)) {
            list.push(candidate);
        }
    }
}

fn pull_path(doc: &mut Map<String, Value>, path: &str, value: &Value) {
    let (parent, leaf) = leaf_entry(doc, path);
    let Some(list) = parent.get_mut(&leaf).and_then(|v| v.as_array_mut()) else {
        return;
    };
    match value.as_object().and_then(|o| o.get("$in")).and_then(|v| v.as_array()) {
        Some(set) => list.retain(|v| !set.iter().any(|e| values_equal(v, e))),
        None => list.retain(|v| !values_equal(v, value)),
    }
}

use serde_json::Value;

use crate::{Error, Result};

const FILTER_OPERATORS: &[&str] = &[
    "$and", "$or", "$nor", "$not", "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin",
    "$exists", "$regex", "$options", "$mod",
];

const OPTION_KEYS: &[&str] = &[
    "sort", "skip", "limit", "fields", "page", "returnType", "maxReturn",
];

const RETURN_TYPES: &[&str] = &["count", "ids", "documents", "document", "id"];

/// Collection names become file names, so the grammar is strict: 1–64
/// characters of `[A-Za-z0-9_-]`, starting with a letter. That rules out
/// path separators, dots, whitespace and shell-hostile punctuation.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("collection name is empty".into()));
    }
    if name.len() > 64 {
        return Err(Error::Validation(format!(
            "collection name exceeds 64 characters: {name:?}"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() {
        return Err(Error::Validation(format!(
            "collection name must start with a letter: {name:?}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::Validation(format!(
            "collection name may only contain letters, digits, _ and -: {name:?}"
        )));
    }
    Ok(())
}

/// Filters must be a non-null, non-list mapping whose `$`-prefixed keys all
/// belong to the known operator set, recursively.
pub fn validate_filters(filters: &Value) -> Result<()> {
    let map = match filters {
        Value::Object(map) => map,
        other => {
            return Err(Error::Validation(format!(
                "filters must be an object, got {other}"
            )))
        }
    };
    for (key, value) in map {
        if key.starts_with('$') && !FILTER_OPERATORS.contains(&key.as_str()) {
            return Err(Error::Validation(format!("unknown filter operator {key}")));
        }
        validate_filter_value(value)?;
    }
    Ok(())
}

fn validate_filter_value(value: &Value) -> Result<()> {
    match value {
        Value::Object(_) => validate_filters(value),
        Value::Array(items) => {
            for item in items {
                if item.is_object() {
                    validate_filters(item)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Option bags accept a closed key set with per-key shape rules.
pub fn validate_options(options: &Value) -> Result<()> {
    let map = match options {
        Value::Object(map) => map,
        other => {
            return Err(Error::Validation(format!(
                "options must be an object, got {other}"
            )))
        }
    };
    for (key, value) in map {
        match key.as_str() {
            "sort" | "fields" => validate_direction_spec(key, value)?,
            "skip" | "limit" => {
                if value.as_u64().is_none() {
                    return Err(Error::Validation(format!(
                        "{key} must be a non-negative number"
                    )));
                }
            }
            "page" => {
                if !value.as_u64().map(|p| p > 0).unwrap_or(false) {
                    return Err(Error::Validation("page must be a positive number".into()));
                }
            }
            "maxReturn" => {
                if value.as_u64().is_none() {
                    return Err(Error::Validation(
                        "maxReturn must be a non-negative integer".into(),
                    ));
                }
            }
            "returnType" => {
                let valid = value
                    .as_str()
                    .map(|s| RETURN_TYPES.contains(&s))
                    .unwrap_or(false);
                if !valid {
                    return Err(Error::Validation(format!(
                        "returnType must be one of {RETURN_TYPES:?}"
                    )));
                }
            }
            other => {
                return Err(Error::Validation(format!(
                    "unknown option {other}; allowed: {OPTION_KEYS:?}"
                )))
            }
        }
    }
    Ok(())
}

fn validate_direction_spec(key: &str, value: &Value) -> Result<()> {
    let map = value.as_object().ok_or_else(|| {
        Error::Validation(format!("{key} must be an object of field directions"))
    })?;
    for (field, direction) in map {
        let valid = match direction {
            Value::Bool(_) => true,
            Value::Number(n) => matches!(n.as_i64(), Some(1) | Some(-1)),
            _ => false,
        };
        if !valid {
            return Err(Error::Validation(format!(
                "{key}.{field} must be 1, -1, true or false"
            )));
        }
    }
    Ok(())
}

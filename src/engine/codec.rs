use serde_json::{Map, Value};

use crate::{Error, Result};

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";

/// Rebuilds a document in canonical field order: `id` first, then every
/// non-reserved field in ascending lexicographic order, then `createdAt`,
/// then `updatedAt`. Nested values are copied as-is, not reordered.
///
/// The canonical form is the only form written to disk; it keeps file diffs
/// stable across saves.
pub fn canonicalize(doc: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(doc.len());

    if let Some(id) = doc.get(FIELD_ID) {
        out.insert(FIELD_ID.to_string(), id.clone());
    }

    let mut keys: Vec<&String> = doc
        .keys()
        .filter(|k| {
            k.as_str() != FIELD_ID
                && k.as_str() != FIELD_CREATED_AT
                && k.as_str() != FIELD_UPDATED_AT
        })
        .collect();
    keys.sort();

    for key in keys {
        out.insert(key.clone(), doc[key.as_str()].clone());
    }

    if let Some(created) = doc.get(FIELD_CREATED_AT) {
        out.insert(FIELD_CREATED_AT.to_string(), created.clone());
    }
    if let Some(updated) = doc.get(FIELD_UPDATED_AT) {
        out.insert(FIELD_UPDATED_AT.to_string(), updated.clone());
    }

    out
}

/// Serializes a collection to its file form: `[\n`, one compact JSON
/// document per line separated by `,\n`, then `\n]`. The result is both a
/// valid JSON array and line-diff friendly.
pub fn encode_collection(documents: &[Value]) -> Result<String> {
    let mut lines = Vec::with_capacity(documents.len());
    for doc in documents {
        let obj = doc
            .as_object()
            .ok_or_else(|| Error::Internal("collection holds a non-object document".into()))?;
        lines.push(serde_json::to_string(&Value::Object(canonicalize(obj)))?);
    }
    Ok(format!("[\n{}\n]", lines.join(",\n")))
}

/// Parses a collection file. Anything that is not a JSON array of objects
/// is reported as [`Error::CorruptFile`].
pub fn decode_collection(raw: &str) -> Result<Vec<Value>> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|e| Error::CorruptFile(e.to_string()))?;
    let items = match parsed {
        Value::Array(items) => items,
        other => {
            return Err(Error::CorruptFile(format!(
                "expected a JSON array, found {}",
                type_name(&other)
            )))
        }
    };
    for item in &items {
        if !item.is_object() {
            return Err(Error::CorruptFile(format!(
                "expected document objects, found {}",
                type_name(item)
            )));
        }
    }
    Ok(items)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_field_order() {
        let doc = json!({
            "zeta": 1,
            "updatedAt": "2024-01-01T00:00:00Z",
            "id": "doc-1",
            "alpha": {"nested": true},
            "createdAt": "2023-12-31T00:00:00Z",
            "mid": [1, 2]
        });
        let canon = canonicalize(doc.as_object().unwrap());
        let keys: Vec<&str> = canon.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["id", "alpha", "mid", "zeta", "createdAt", "updatedAt"]);
    }

    #[test]
    fn test_canonical_without_reserved_fields() {
        let doc = json!({"b": 2, "a": 1});
        let canon = canonicalize(doc.as_object().unwrap());
        let keys: Vec<&str> = canon.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_encode_one_document_per_line() {
        let docs = vec![json!({"id": "a", "n": 1}), json!({"id": "b", "n": 2})];
        let encoded = encode_collection(&docs).unwrap();
        assert_eq!(encoded, "[\n{\"id\":\"a\",\"n\":1},\n{\"id\":\"b\",\"n\":2}\n]");
        // The wire form must stay parseable as plain JSON.
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_encode_empty_collection() {
        let encoded = encode_collection(&[]).unwrap();
        assert_eq!(encoded, "[\n\n]");
        let parsed: Value = serde_json::from_str(&encoded).unwrap();
        assert!(parsed.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let docs = vec![
            json!({"id": "a", "tags": ["x", "y"], "meta": {"k": null}}),
            json!({"id": "b", "n": 2.5}),
        ];
        let decoded = decode_collection(&encode_collection(&docs).unwrap()).unwrap();
        assert_eq!(decoded, docs);
    }

    #[test]
    fn test_decode_rejects_non_array() {
        assert!(matches!(
            decode_collection("{\"id\": \"a\"}"),
            Err(Error::CorruptFile(_))
        ));
        assert!(matches!(decode_collection("not json"), Err(Error::CorruptFile(_))));
        assert!(matches!(decode_collection("[1, 2]"), Err(Error::CorruptFile(_))));
    }
}

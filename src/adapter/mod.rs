/// Operation routing and response envelopes.
///
/// The adapter maps `(verb, endpoint, payload)` tuples onto cache
/// operations. The same envelope types travel over the wire in remote mode,
/// so both sides of the trait speak one format.
pub mod local;
/// Pre-routing validation of collection names, filters and options.
pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{Error, Result};

pub use local::LocalAdapter;

/// A parsed `/collections/<name>[/<sub>]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub collection: String,
    pub sub: Option<String>,
}

pub fn parse_endpoint(endpoint: &str) -> Result<Endpoint> {
    let mut parts = endpoint.trim_start_matches('/').split('/');
    if parts.next() != Some("collections") {
        return Err(Error::Validation(format!(
            "endpoint must start with /collections, got {endpoint:?}"
        )));
    }
    let collection = match parts.next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(Error::Validation(
                "endpoint is missing a collection name".into(),
            ))
        }
    };
    let sub = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    if parts.next().is_some() {
        return Err(Error::Validation(format!(
            "endpoint has trailing segments: {endpoint:?}"
        )));
    }
    Ok(Endpoint { collection, sub })
}

/// Pagination block attached to find results when `limit` is set. Indices
/// are 1-based inclusive; an empty page reports `0/0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub skip: u64,
    pub total_documents: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
    pub start_index: u64,
    pub end_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindReport {
    pub documents: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InsertReport {
    pub inserted_count: u64,
    pub updated_count: u64,
    pub total_documents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub updated_count: u64,
    pub total_documents: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_documents: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_return: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub collection_name: String,
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropReport {
    pub collection_name: String,
    pub dropped: bool,
}

/// Wraps an operation result into the `{data}` / `{error}` envelope.
pub fn to_envelope(result: Result<Value>) -> Value {
    match result {
        Ok(data) => json!({ "data": data }),
        Err(e) => json!({ "error": { "message": e.to_string(), "code": e.code() } }),
    }
}

/// Unwraps a response envelope, restoring the error kind from its code.
pub fn from_envelope(envelope: Value) -> Result<Value> {
    if let Some(error) = envelope.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        let code = error.get("code").and_then(|c| c.as_u64()).unwrap_or(500);
        return Err(match code {
            400 => Error::Validation(message),
            404 => Error::NotFound(message),
            409 => Error::IdMutation,
            _ => Error::Remote(message),
        });
    }
    match envelope {
        Value::Object(mut map) => map
            .remove("data")
            .ok_or_else(|| Error::Remote("envelope carries neither data nor error".into())),
        _ => Err(Error::Remote("response is not an envelope object".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_variants() {
        let plain = parse_endpoint("/collections/users").unwrap();
        assert_eq!(plain.collection, "users");
        assert_eq!(plain.sub, None);

        let with_sub = parse_endpoint("/collections/users/count").unwrap();
        assert_eq!(with_sub.sub.as_deref(), Some("count"));

        assert!(parse_endpoint("/other/users").is_err());
        assert!(parse_endpoint("/collections").is_err());
        assert!(parse_endpoint("/collections/users/a/b").is_err());
    }

    #[test]
    fn test_envelope_round_trip() {
        let ok = to_envelope(Ok(json!({"n": 1})));
        assert_eq!(from_envelope(ok).unwrap(), json!({"n": 1}));

        let err = to_envelope(Err(Error::NotFound("x".into())));
        assert_eq!(err["error"]["code"], json!(404));
        assert!(matches!(from_envelope(err), Err(Error::NotFound(_))));

        let unexpected = to_envelope(Err(Error::Internal("boom".into())));
        assert_eq!(unexpected["error"]["code"], json!(500));
        assert!(matches!(from_envelope(unexpected), Err(Error::Remote(_))));
    }
}

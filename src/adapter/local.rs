use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::adapter::{
    parse_endpoint, DeleteReport, DropReport, FindReport, InsertReport, Pagination, UpdateReport,
};
use crate::engine::cache::CollectionCache;
use crate::engine::codec::{FIELD_CREATED_AT, FIELD_ID, FIELD_UPDATED_AT};
use crate::engine::{query, update};
use crate::{Datastore, Error, Result, Verb};

/// Embedded-mode adapter: routes the operation set onto the collection
/// cache and owns insert identity, pagination arithmetic and report shapes.
pub struct LocalAdapter {
    cache: Arc<CollectionCache>,
}

impl LocalAdapter {
    pub fn new(cache: Arc<CollectionCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<CollectionCache> {
        &self.cache
    }

    async fn find(&self, name: &str, filters: Map<String, Value>, options: Map<String, Value>) -> Result<Value> {
        let opts = FindOptions::parse(&options);
        let skip = opts.effective_skip();

        let mut matched = self
            .cache
            .read(name, |state| {
                state
                    .documents
                    .iter()
                    .filter(|doc| query::matches_filter(doc, &filters))
                    .cloned()
                    .collect::<Vec<Value>>()
            })
            .await?;

        if let Some(sort) = &opts.sort {
            query::sort_documents(&mut matched, sort);
        }

        let total = matched.len() as u64;
        let sliced: Vec<Value> = match opts.limit {
            Some(limit) => matched
                .into_iter()
                .skip(skip as usize)
                .take(limit as usize)
                .collect(),
            None => matched,
        };

        let documents: Vec<Value> = match &opts.fields {
            Some(fields) => sliced.iter().map(|d| query::project(d, fields)).collect(),
            None => sliced,
        };

        let pagination = opts
            .limit
            .map(|limit| build_pagination(opts.page, limit, skip, total, documents.len() as u64));

        Ok(serde_json::to_value(FindReport { documents, pagination })?)
    }

    async fn count(&self, name: &str, filters: Map<String, Value>) -> Result<Value> {
        let count = self
            .cache
            .read(name, |state| {
                if filters.is_empty() {
                    state.documents.len()
                } else {
                    state
                        .documents
                        .iter()
                        .filter(|doc| query::matches_filter(doc, &filters))
                        .count()
                }
            })
            .await?;
        Ok(json!(count))
    }

    async fn find_by_id(&self, name: &str, id: &str, options: Map<String, Value>) -> Result<Value> {
        let fields = object_option(&options, "fields");
        let doc = self
            .cache
            .read(name, |state| {
                state
                    .id_index
                    .get(id)
                    .map(|&position| state.documents[position].clone())
            })
            .await?;
        Ok(match doc {
            Some(doc) => match fields {
                Some(fields) => query::project(&doc, &fields),
                None => doc,
            },
            None => Value::Null,
        })
    }

    async fn insert(&self, name: &str, payload: &Value) -> Result<Value> {
        let incoming: Vec<Map<String, Value>> = match payload.get("documents") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .cloned()
                        .ok_or_else(|| Error::Validation("documents must be objects".into()))
                })
                .collect::<Result<_>>()?,
            Some(Value::Object(doc)) => vec![doc.clone()],
            _ => {
                return Err(Error::Validation(
                    "insert payload requires a documents object or list".into(),
                ))
            }
        };
        if incoming.is_empty() {
            return Err(Error::Validation("documents is empty".into()));
        }
        for doc in &incoming {
            if let Some(id) = doc.get(FIELD_ID) {
                if !id.is_string() {
                    return Err(Error::Validation("document id must be a string".into()));
                }
            }
        }

        let now = now();
        let multi = incoming.len() >= 2;
        let base = base36(Utc::now().timestamp_millis() as u64);

        let report = self
            .cache
            .update(name, move |state| {
                let mut inserted_ids: Vec<String> = Vec::new();
                let mut updated = 0u64;

                for (index, mut doc) in incoming.into_iter().enumerate() {
                    let id = match doc.get(FIELD_ID).and_then(|v| v.as_str()) {
                        Some(id) => id.to_string(),
                        None if multi => format!("{base}_{}", index + 1),
                        None => random_hex_id(),
                    };

                    match state.id_index.get(&id).copied() {
                        Some(position) => {
                            let existing = state.documents[position].as_object_mut().ok_or_else(
                                || Error::Internal("collection holds a non-object document".into()),
                            )?;
                            merge_upsert(existing, doc, &now);
                            updated += 1;
                        }
                        None => {
                            doc.insert(FIELD_ID.to_string(), Value::String(id.clone()));
                            doc.insert(FIELD_CREATED_AT.to_string(), Value::String(now.clone()));
                            doc.insert(FIELD_UPDATED_AT.to_string(), Value::String(now.clone()));
                            state.documents.push(Value::Object(doc));
                            state.id_index.insert(id.clone(), state.documents.len() - 1);
                            inserted_ids.push(id);
                        }
                    }
                }

                let mut report = InsertReport {
                    inserted_count: inserted_ids.len() as u64,
                    updated_count: updated,
                    total_documents: state.documents.len() as u64,
                    ..Default::default()
                };
                if !inserted_ids.is_empty() {
                    if inserted_ids.len() <= 20 {
                        report.inserted_ids = Some(inserted_ids);
                    } else {
                        report.first_id = inserted_ids.first().cloned();
                        report.last_id = inserted_ids.last().cloned();
                    }
                }
                let mutated = report.inserted_count + report.updated_count > 0;
                Ok((report, mutated))
            })
            .await?;

        Ok(serde_json::to_value(report)?)
    }

    async fn update_many(
        &self,
        name: &str,
        filters: Map<String, Value>,
        update_spec: Map<String, Value>,
        options: Map<String, Value>,
    ) -> Result<Value> {
        let normalized = update::normalize(&update_spec);
        reject_bulk_id_target(&normalized)?;

        let return_type = string_option(&options, "returnType").unwrap_or_else(|| "count".into());
        let max_return = u64_option(&options, "maxReturn").unwrap_or(50);
        let fields = object_option(&options, "fields");
        let collect = return_type != "count";
        let collect_docs = return_type == "documents";
        let now = now();

        let (updated_count, mut ids, mut documents, total) = self
            .cache
            .update(name, move |state| {
                let mut ids: Vec<String> = Vec::new();
                let mut documents: Vec<Value> = Vec::new();
                let mut count = 0u64;

                for doc in state.documents.iter_mut() {
                    if !query::matches_filter(doc, &filters) {
                        continue;
                    }
                    let obj = doc.as_object_mut().ok_or_else(|| {
                        Error::Internal("collection holds a non-object document".into())
                    })?;
                    update::apply(obj, &normalized, &now)?;
                    count += 1;
                    if collect {
                        if let Some(id) = obj.get(FIELD_ID).and_then(|v| v.as_str()) {
                            ids.push(id.to_string());
                        }
                        if collect_docs {
                            documents.push(doc.clone());
                        }
                    }
                }

                let total = state.documents.len() as u64;
                Ok(((count, ids, documents, total), count > 0))
            })
            .await?;

        let mut report = UpdateReport {
            updated_count,
            total_documents: total,
            ..Default::default()
        };
        match return_type.as_str() {
            "ids" => {
                if ids.len() as u64 > max_return {
                    ids.truncate(max_return as usize);
                    report.truncated = Some(true);
                    report.max_return = Some(max_return);
                }
                report.updated_ids = Some(ids);
            }
            "documents" => {
                if documents.len() as u64 > max_return {
                    documents.truncate(max_return as usize);
                    report.truncated = Some(true);
                    report.max_return = Some(max_return);
                }
                if let Some(fields) = &fields {
                    documents = documents.iter().map(|d| query::project(d, fields)).collect();
                }
                report.updated_documents = Some(documents);
            }
            _ => {}
        }
        Ok(serde_json::to_value(report)?)
    }

    async fn update_by_id(
        &self,
        name: &str,
        id: &str,
        update_spec: Map<String, Value>,
        options: Map<String, Value>,
    ) -> Result<Value> {
        let normalized = update::normalize(&update_spec);
        let return_type = string_option(&options, "returnType").unwrap_or_else(|| "count".into());
        let fields = object_option(&options, "fields");
        let now = now();

        let post_image = self
            .cache
            .update_document(name, id, move |mut doc| {
                update::apply(&mut doc, &normalized, &now)?;
                Ok(doc)
            })
            .await?;

        match return_type.as_str() {
            "document" => Ok(match fields {
                Some(fields) => query::project(&post_image, &fields),
                None => post_image,
            }),
            "id" => Ok(json!(id)),
            _ => {
                let total = self.cache.read(name, |s| s.documents.len() as u64).await?;
                Ok(serde_json::to_value(UpdateReport {
                    updated_count: 1,
                    total_documents: total,
                    ..Default::default()
                })?)
            }
        }
    }

    async fn delete_many(&self, name: &str, filters: Map<String, Value>) -> Result<Value> {
        if filters.is_empty() {
            return Err(Error::EmptyDeleteFilter);
        }
        let deleted = self
            .cache
            .update(name, move |state| {
                let before = state.documents.len();
                state
                    .documents
                    .retain(|doc| !query::matches_filter(doc, &filters));
                let deleted = (before - state.documents.len()) as u64;
                if deleted > 0 {
                    state.rebuild_index();
                }
                Ok((deleted, deleted > 0))
            })
            .await?;
        Ok(serde_json::to_value(DeleteReport {
            collection_name: name.to_string(),
            deleted_count: deleted,
        })?)
    }

    async fn delete_by_id(&self, name: &str, id: &str) -> Result<Value> {
        if !self.cache.remove_document(name, id).await? {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(serde_json::to_value(DeleteReport {
            collection_name: name.to_string(),
            deleted_count: 1,
        })?)
    }

    async fn drop(&self, name: &str) -> Result<Value> {
        self.cache.drop_collection(name).await?;
        Ok(serde_json::to_value(DropReport {
            collection_name: name.to_string(),
            dropped: true,
        })?)
    }
}

#[async_trait]
impl Datastore for LocalAdapter {
    async fn execute(&self, verb: Verb, endpoint: &str, payload: Value) -> Result<Value> {
        let parsed = parse_endpoint(endpoint)?;
        let name = parsed.collection.as_str();
        let filters = object_payload(&payload, "filters");
        let options = object_payload(&payload, "options");

        match (verb, parsed.sub.as_deref()) {
            (Verb::Get, None) => self.find(name, filters, options).await,
            (Verb::Get, Some("count")) => self.count(name, filters).await,
            (Verb::Get, Some(id)) => self.find_by_id(name, id, options).await,
            (Verb::Post, None) => self.insert(name, &payload).await,
            (Verb::Patch, None) => {
                let update_spec = required_object(&payload, "update")?;
                self.update_many(name, filters, update_spec, options).await
            }
            (Verb::Patch, Some(id)) => {
                let update_spec = required_object(&payload, "update")?;
                self.update_by_id(name, id, update_spec, options).await
            }
            (Verb::Delete, None) => self.delete_many(name, filters).await,
            (Verb::Delete, Some("drop")) => self.drop(name).await,
            (Verb::Delete, Some(id)) => self.delete_by_id(name, id).await,
            (verb, sub) => Err(Error::Validation(format!(
                "unsupported operation {} on {endpoint:?} (sub {sub:?})",
                verb.as_str()
            ))),
        }
    }
}

struct FindOptions {
    limit: Option<u64>,
    skip: Option<u64>,
    page: Option<u64>,
    sort: Option<Map<String, Value>>,
    fields: Option<Map<String, Value>>,
}

impl FindOptions {
    fn parse(options: &Map<String, Value>) -> Self {
        Self {
            limit: u64_option(options, "limit"),
            skip: u64_option(options, "skip"),
            page: u64_option(options, "page"),
            sort: object_option(options, "sort"),
            fields: object_option(options, "fields"),
        }
    }

    /// `skip` wins when given; otherwise `page` derives it from `limit`.
    fn effective_skip(&self) -> u64 {
        match (self.skip, self.limit, self.page) {
            (Some(skip), _, _) => skip,
            (None, Some(limit), Some(page)) => page.saturating_sub(1) * limit,
            _ => 0,
        }
    }
}

fn build_pagination(page: Option<u64>, limit: u64, skip: u64, total: u64, returned: u64) -> Pagination {
    let page = page.unwrap_or(if limit > 0 { skip / limit + 1 } else { 1 });
    let total_pages = if limit > 0 { total.div_ceil(limit) } else { 0 };
    let has_next = page < total_pages;
    let has_prev = page > 1;
    Pagination {
        page,
        limit,
        skip,
        total_documents: total,
        total_pages,
        has_next,
        has_prev,
        next_page: has_next.then(|| page + 1),
        prev_page: has_prev.then(|| page - 1),
        start_index: if returned == 0 { 0 } else { skip + 1 },
        end_index: if returned == 0 { 0 } else { skip + returned },
    }
}

/// Upsert merge: scalars overwrite, plain maps merge one level deep,
/// `createdAt` survives, `updatedAt` refreshes.
fn merge_upsert(existing: &mut Map<String, Value>, incoming: Map<String, Value>, now: &str) {
    for (key, value) in incoming {
        if key == FIELD_ID || key == FIELD_CREATED_AT || key == FIELD_UPDATED_AT {
            continue;
        }
        let merged = match (existing.get(&key), &value) {
            (Some(Value::Object(current)), Value::Object(new)) => {
                let mut map = current.clone();
                for (k, v) in new {
                    map.insert(k.clone(), v.clone());
                }
                Value::Object(map)
            }
            _ => value,
        };
        existing.insert(key, merged);
    }
    existing.insert(FIELD_UPDATED_AT.to_string(), Value::String(now.to_string()));
}

/// Bulk updates may touch many documents, so any operator aimed at `id`
/// is rejected up front rather than mid-iteration.
fn reject_bulk_id_target(normalized: &Map<String, Value>) -> Result<()> {
    for arg in normalized.values() {
        if let Some(entries) = arg.as_object() {
            if entries.contains_key(FIELD_ID) {
                return Err(Error::IdMutation);
            }
        }
    }
    Ok(())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).expect("base36 digits are ascii")
}

fn random_hex_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn object_payload(payload: &Value, key: &str) -> Map<String, Value> {
    payload
        .get(key)
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}

fn required_object(payload: &Value, key: &str) -> Result<Map<String, Value>> {
    payload
        .get(key)
        .and_then(|v| v.as_object())
        .cloned()
        .ok_or_else(|| Error::Validation(format!("payload requires an {key} object")))
}

fn object_option(options: &Map<String, Value>, key: &str) -> Option<Map<String, Value>> {
    options.get(key).and_then(|v| v.as_object()).cloned()
}

fn string_option(options: &Map<String, Value>, key: &str) -> Option<String> {
    options.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn u64_option(options: &Map<String, Value>, key: &str) -> Option<u64> {
    options.get(key).and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn adapter_in(dir: &std::path::Path) -> LocalAdapter {
        LocalAdapter::new(Arc::new(CollectionCache::new(
            crate::engine::Persistence::new(dir),
        )))
    }

    async fn exec(adapter: &LocalAdapter, verb: Verb, endpoint: &str, payload: Value) -> Result<Value> {
        adapter.execute(verb, endpoint, payload).await
    }

    #[tokio::test]
    async fn test_insert_generates_ids_and_timestamps() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());

        let report = exec(
            &adapter,
            Verb::Post,
            "/collections/items",
            json!({"documents": [{"id": "a", "n": 1}, {"n": 2}]}),
        )
        .await
        .unwrap();
        assert_eq!(report["insertedCount"], json!(2));
        assert_eq!(report["updatedCount"], json!(0));
        assert_eq!(report["totalDocuments"], json!(2));
        let ids = report["insertedIds"].as_array().unwrap();
        assert_eq!(ids[0], json!("a"));
        let generated = ids[1].as_str().unwrap();
        assert!(!generated.is_empty());
        assert_ne!(generated, "a");

        let found = exec(&adapter, Verb::Get, "/collections/items", json!({})).await.unwrap();
        let docs = found["documents"].as_array().unwrap();
        assert_eq!(docs.len(), 2);
        for doc in docs {
            assert_eq!(doc["createdAt"], doc["updatedAt"]);
        }
        assert_eq!(docs[0]["createdAt"], docs[1]["createdAt"]);
    }

    #[tokio::test]
    async fn test_single_insert_without_id_gets_random_hex() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());

        let report = exec(
            &adapter,
            Verb::Post,
            "/collections/items",
            json!({"documents": {"n": 1}}),
        )
        .await
        .unwrap();
        let ids = report["insertedIds"].as_array().unwrap();
        let id = ids[0].as_str().unwrap();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_insert_with_existing_id_upserts() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());

        exec(
            &adapter,
            Verb::Post,
            "/collections/items",
            json!({"documents": {"id": "a", "n": 1, "nested": {"keep": true}}}),
        )
        .await
        .unwrap();
        let created_at = exec(&adapter, Verb::Get, "/collections/items/a", json!({}))
            .await
            .unwrap()["createdAt"]
            .clone();

        let report = exec(
            &adapter,
            Verb::Post,
            "/collections/items",
            json!({"documents": {"id": "a", "n": 2, "extra": true, "nested": {"more": 1}}}),
        )
        .await
        .unwrap();
        assert_eq!(report["insertedCount"], json!(0));
        assert_eq!(report["updatedCount"], json!(1));
        assert_eq!(report["totalDocuments"], json!(1));

        let doc = exec(&adapter, Verb::Get, "/collections/items/a", json!({})).await.unwrap();
        assert_eq!(doc["n"], json!(2));
        assert_eq!(doc["extra"], json!(true));
        // One-level deep merge keeps sibling keys of merged maps.
        assert_eq!(doc["nested"], json!({"keep": true, "more": 1}));
        assert_eq!(doc["createdAt"], created_at);
        assert!(doc["updatedAt"].as_str().unwrap() >= created_at.as_str().unwrap());
    }

    #[tokio::test]
    async fn test_find_pipeline_with_pagination() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(
            &adapter,
            Verb::Post,
            "/collections/scores",
            json!({"documents": [
                {"id": "1", "score": 10},
                {"id": "2", "score": 30},
                {"id": "3", "score": 20}
            ]}),
        )
        .await
        .unwrap();

        let found = exec(
            &adapter,
            Verb::Get,
            "/collections/scores",
            json!({
                "filters": {"score": {"$gte": 15}},
                "options": {"sort": {"score": -1}, "limit": 1, "page": 1, "fields": {"id": 1}}
            }),
        )
        .await
        .unwrap();

        assert_eq!(found["documents"], json!([{"id": "2"}]));
        assert_eq!(
            found["pagination"],
            json!({
                "page": 1, "limit": 1, "skip": 0,
                "totalDocuments": 2, "totalPages": 2,
                "hasNext": true, "hasPrev": false,
                "nextPage": 2, "prevPage": null,
                "startIndex": 1, "endIndex": 1
            })
        );
    }

    #[tokio::test]
    async fn test_pagination_concatenation_is_complete() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        let documents: Vec<Value> = (0..7).map(|i| json!({"id": format!("d{i}"), "n": i})).collect();
        exec(&adapter, Verb::Post, "/collections/c", json!({"documents": documents})).await.unwrap();

        let mut seen = Vec::new();
        let mut page = 1u64;
        loop {
            let found = exec(
                &adapter,
                Verb::Get,
                "/collections/c",
                json!({"options": {"sort": {"n": 1}, "limit": 3, "page": page}}),
            )
            .await
            .unwrap();
            for doc in found["documents"].as_array().unwrap() {
                seen.push(doc["id"].as_str().unwrap().to_string());
            }
            if !found["pagination"]["hasNext"].as_bool().unwrap() {
                break;
            }
            page = found["pagination"]["nextPage"].as_u64().unwrap();
        }
        let expected: Vec<String> = (0..7).map(|i| format!("d{i}")).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_empty_page_reports_zero_indices() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(&adapter, Verb::Post, "/collections/c", json!({"documents": {"id": "a"}})).await.unwrap();

        let found = exec(
            &adapter,
            Verb::Get,
            "/collections/c",
            json!({"options": {"limit": 10, "page": 5}}),
        )
        .await
        .unwrap();
        assert_eq!(found["documents"], json!([]));
        assert_eq!(found["pagination"]["startIndex"], json!(0));
        assert_eq!(found["pagination"]["endIndex"], json!(0));
        assert_eq!(found["pagination"]["hasPrev"], json!(true));
        assert_eq!(found["pagination"]["hasNext"], json!(false));
    }

    #[tokio::test]
    async fn test_count_with_and_without_filter() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(
            &adapter,
            Verb::Post,
            "/collections/c",
            json!({"documents": [{"id": "a", "k": 1}, {"id": "b", "k": 2}]}),
        )
        .await
        .unwrap();

        let all = exec(&adapter, Verb::Get, "/collections/c/count", json!({})).await.unwrap();
        assert_eq!(all, json!(2));
        let some = exec(
            &adapter,
            Verb::Get,
            "/collections/c/count",
            json!({"filters": {"k": {"$gt": 1}}}),
        )
        .await
        .unwrap();
        assert_eq!(some, json!(1));
    }

    #[tokio::test]
    async fn test_find_by_id_returns_null_when_absent() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        let missing = exec(&adapter, Verb::Get, "/collections/c/nope", json!({})).await.unwrap();
        assert_eq!(missing, Value::Null);
    }

    #[tokio::test]
    async fn test_update_many_return_types() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(
            &adapter,
            Verb::Post,
            "/collections/c",
            json!({"documents": [
                {"id": "a", "status": "open", "n": 1},
                {"id": "b", "status": "open", "n": 2},
                {"id": "c", "status": "done", "n": 3}
            ]}),
        )
        .await
        .unwrap();

        let counted = exec(
            &adapter,
            Verb::Patch,
            "/collections/c",
            json!({"filters": {"status": "open"}, "update": {"$inc": {"n": 10}}}),
        )
        .await
        .unwrap();
        assert_eq!(counted["updatedCount"], json!(2));
        assert_eq!(counted["totalDocuments"], json!(3));
        assert!(counted.get("updatedIds").is_none());

        let with_ids = exec(
            &adapter,
            Verb::Patch,
            "/collections/c",
            json!({
                "filters": {"status": "open"},
                "update": {"touched": true},
                "options": {"returnType": "ids", "maxReturn": 1}
            }),
        )
        .await
        .unwrap();
        assert_eq!(with_ids["updatedIds"].as_array().unwrap().len(), 1);
        assert_eq!(with_ids["truncated"], json!(true));
        assert_eq!(with_ids["maxReturn"], json!(1));

        let with_docs = exec(
            &adapter,
            Verb::Patch,
            "/collections/c",
            json!({
                "filters": {"id": "a"},
                "update": {"$set": {"flag": true}},
                "options": {"returnType": "documents", "fields": {"id": 1, "flag": 1}}
            }),
        )
        .await
        .unwrap();
        assert_eq!(with_docs["updatedDocuments"], json!([{"id": "a", "flag": true}]));
    }

    #[tokio::test]
    async fn test_bulk_update_rejects_id_target() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(&adapter, Verb::Post, "/collections/c", json!({"documents": {"id": "a"}})).await.unwrap();

        let err = exec(
            &adapter,
            Verb::Patch,
            "/collections/c",
            json!({"filters": {}, "update": {"$set": {"id": "b"}}}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::IdMutation));
    }

    #[tokio::test]
    async fn test_update_by_id_post_image_and_not_found() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(
            &adapter,
            Verb::Post,
            "/collections/c",
            json!({"documents": {"id": "u", "tags": ["a", "b"]}}),
        )
        .await
        .unwrap();

        let doc = exec(
            &adapter,
            Verb::Patch,
            "/collections/c/u",
            json!({
                "update": {"$addToSet": {"tags": {"$each": ["b", "c"]}}},
                "options": {"returnType": "document"}
            }),
        )
        .await
        .unwrap();
        assert_eq!(doc["tags"], json!(["a", "b", "c"]));

        let missing = exec(
            &adapter,
            Verb::Patch,
            "/collections/c/nope",
            json!({"update": {"$set": {"x": 1}}}),
        )
        .await
        .unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_requires_filter() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(&adapter, Verb::Post, "/collections/c", json!({"documents": {"id": "a", "status": "x"}}))
            .await
            .unwrap();

        let err = exec(&adapter, Verb::Delete, "/collections/c", json!({"filters": {}})).await.unwrap_err();
        assert!(matches!(err, Error::EmptyDeleteFilter));
        // The rejected delete left the collection untouched.
        let count = exec(&adapter, Verb::Get, "/collections/c/count", json!({})).await.unwrap();
        assert_eq!(count, json!(1));

        let none = exec(
            &adapter,
            Verb::Delete,
            "/collections/c",
            json!({"filters": {"status": "missing"}}),
        )
        .await
        .unwrap();
        assert_eq!(none["deletedCount"], json!(0));

        let one = exec(
            &adapter,
            Verb::Delete,
            "/collections/c",
            json!({"filters": {"status": "x"}}),
        )
        .await
        .unwrap();
        assert_eq!(one["deletedCount"], json!(1));
        assert_eq!(one["collectionName"], json!("c"));
    }

    #[tokio::test]
    async fn test_delete_by_id_and_drop() {
        let dir = tempdir().unwrap();
        let adapter = adapter_in(dir.path());
        exec(
            &adapter,
            Verb::Post,
            "/collections/c",
            json!({"documents": [{"id": "a"}, {"id": "b"}]}),
        )
        .await
        .unwrap();

        let removed = exec(&adapter, Verb::Delete, "/collections/c/a", json!({})).await.unwrap();
        assert_eq!(removed["deletedCount"], json!(1));
        let again = exec(&adapter, Verb::Delete, "/collections/c/a", json!({})).await.unwrap_err();
        assert!(matches!(again, Error::NotFound(_)));

        let dropped = exec(&adapter, Verb::Delete, "/collections/c/drop", json!({})).await.unwrap();
        assert_eq!(dropped["dropped"], json!(true));
        let count = exec(&adapter, Verb::Get, "/collections/c/count", json!({})).await.unwrap();
        assert_eq!(count, json!(0));
    }

    #[test]
    fn test_base36_encoding() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        for n in [1u64, 1234, 1_700_000_000_000] {
            assert_eq!(u64::from_str_radix(&base36(n), 36).unwrap(), n);
        }
    }
}

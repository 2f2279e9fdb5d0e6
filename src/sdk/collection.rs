use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::adapter::validate::{validate_filters, validate_options};
use crate::adapter::{DeleteReport, DropReport, FindReport, InsertReport, UpdateReport};
use crate::{Datastore, Error, Result, Verb};

/// Handle to one named collection, embedded or remote.
///
/// All arguments are validated here, before the operation is routed; the
/// adapter behind the [`Datastore`] trait only ever sees well-formed input.
pub struct Collection {
    store: Arc<dyn Datastore>,
    name: String,
}

impl Collection {
    pub(crate) fn new(store: Arc<dyn Datastore>, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self, sub: Option<&str>) -> String {
        match sub {
            Some(sub) => format!("/collections/{}/{}", self.name, sub),
            None => format!("/collections/{}", self.name),
        }
    }

    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Validation("document id is empty".into()));
        }
        if id == "count" || id == "drop" {
            return Err(Error::Validation(format!(
                "{id:?} is a reserved sub-resource and cannot be a document id"
            )));
        }
        if id.contains('/') {
            return Err(Error::Validation("document id may not contain '/'".into()));
        }
        Ok(())
    }

    pub async fn insert(&self, document: Value) -> Result<InsertReport> {
        if !document.is_object() {
            return Err(Error::Validation("document must be an object".into()));
        }
        let data = self
            .store
            .execute(Verb::Post, &self.endpoint(None), json!({ "documents": document }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn insert_many(&self, documents: Vec<Value>) -> Result<InsertReport> {
        if documents.iter().any(|d| !d.is_object()) {
            return Err(Error::Validation("documents must be objects".into()));
        }
        let data = self
            .store
            .execute(Verb::Post, &self.endpoint(None), json!({ "documents": documents }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Typed insert in the manner of the generic get/set helpers.
    pub async fn insert_generic<T: Serialize>(&self, document: &T) -> Result<InsertReport> {
        self.insert(serde_json::to_value(document)?).await
    }

    pub async fn find(&self, filters: Value, options: Value) -> Result<FindReport> {
        validate_filters(&filters)?;
        validate_options(&options)?;
        let data = self
            .store
            .execute(
                Verb::Get,
                &self.endpoint(None),
                json!({ "filters": filters, "options": options }),
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn find_one(&self, filters: Value) -> Result<Option<Value>> {
        let report = self.find(filters, json!({ "limit": 1 })).await?;
        Ok(report.documents.into_iter().next())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        Self::check_id(id)?;
        let data = self
            .store
            .execute(Verb::Get, &self.endpoint(Some(id)), json!({}))
            .await?;
        Ok(match data {
            Value::Null => None,
            doc => Some(doc),
        })
    }

    pub async fn find_by_id_generic<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        match self.find_by_id(id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn update(&self, filters: Value, update: Value, options: Value) -> Result<UpdateReport> {
        validate_filters(&filters)?;
        validate_options(&options)?;
        Self::check_update(&update)?;
        let data = self
            .store
            .execute(
                Verb::Patch,
                &self.endpoint(None),
                json!({ "filters": filters, "update": update, "options": options }),
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn update_by_id(&self, id: &str, update: Value) -> Result<UpdateReport> {
        Self::check_id(id)?;
        Self::check_update(&update)?;
        let data = self
            .store
            .execute(Verb::Patch, &self.endpoint(Some(id)), json!({ "update": update }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Applies an update by id and returns the post-image document.
    pub async fn update_by_id_returning(&self, id: &str, update: Value) -> Result<Value> {
        Self::check_id(id)?;
        Self::check_update(&update)?;
        self.store
            .execute(
                Verb::Patch,
                &self.endpoint(Some(id)),
                json!({ "update": update, "options": { "returnType": "document" } }),
            )
            .await
    }

    pub async fn delete(&self, filters: Value) -> Result<DeleteReport> {
        validate_filters(&filters)?;
        let data = self
            .store
            .execute(Verb::Delete, &self.endpoint(None), json!({ "filters": filters }))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<DeleteReport> {
        Self::check_id(id)?;
        let data = self
            .store
            .execute(Verb::Delete, &self.endpoint(Some(id)), json!({}))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn count(&self, filters: Value) -> Result<u64> {
        validate_filters(&filters)?;
        let data = self
            .store
            .execute(
                Verb::Get,
                &self.endpoint(Some("count")),
                json!({ "filters": filters }),
            )
            .await?;
        data.as_u64()
            .ok_or_else(|| Error::Internal(format!("count returned a non-integer: {data}")))
    }

    pub async fn drop(&self) -> Result<DropReport> {
        let data = self
            .store
            .execute(Verb::Delete, &self.endpoint(Some("drop")), json!({}))
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    fn check_update(update: &Value) -> Result<()> {
        match update.as_object() {
            Some(map) if !map.is_empty() => Self::check_update_map(map),
            _ => Err(Error::Validation("update must be a non-empty object".into())),
        }
    }

    fn check_update_map(map: &Map<String, Value>) -> Result<()> {
        for (key, arg) in map {
            if key.starts_with('$') && !arg.is_object() {
                return Err(Error::Validation(format!(
                    "update operator {key} expects an object argument"
                )));
            }
        }
        Ok(())
    }
}

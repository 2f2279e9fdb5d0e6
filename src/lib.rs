pub mod adapter;
pub mod engine;
pub mod sdk;

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document id is immutable")]
    IdMutation,
    #[error("delete requires a non-empty filter; use drop to clear the collection")]
    EmptyDeleteFilter,
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("corrupt collection file: {0}")]
    CorruptFile(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric code carried by the `{error: {message, code}}` envelope.
    pub fn code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::EmptyDeleteFilter => 400,
            Error::NotFound(_) => 404,
            Error::IdMutation => 409,
            Error::Remote(_) => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Logical operation verbs consumed by the adapter. They mirror the HTTP
/// methods the remote mode puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

/// The operation set shared by the embedded engine and the remote client.
///
/// `endpoint` is `/collections/<name>` optionally followed by a sub-resource
/// (an id, `count`, or `drop`). The payload carries `filters`, `options`,
/// `update` and `documents` keys as the operation requires. On success the
/// returned value is the `data` half of the response envelope.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn execute(&self, verb: Verb, endpoint: &str, payload: Value) -> Result<Value>;
}

/// Construction options for [`sdk::Store::open`].
///
/// With `database_url` unset the store runs embedded against `storage_path`;
/// set it to reach a compatible server in remote mode.
#[derive(Debug, Clone)]
pub struct Options {
    pub storage_path: PathBuf,
    /// Autosave period in milliseconds. `0` disables the background flush.
    pub auto_save_interval_ms: u64,
    pub debug: bool,
    pub database_url: Option<String>,
    pub token: Option<String>,
    pub pool_size: usize,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./storage"),
            auto_save_interval_ms: 5_000,
            debug: false,
            database_url: None,
            token: None,
            pool_size: 4,
            max_retries: 3,
            timeout_ms: 5_000,
        }
    }
}

impl Options {
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn auto_save_interval_ms(mut self, ms: u64) -> Self {
        self.auto_save_interval_ms = ms;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

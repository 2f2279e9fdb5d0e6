/// Public façade for lodestore.
///
/// [`Store::open`] detects the mode: with `database_url` set it connects a
/// [`RemoteClient`] to a compatible server, otherwise it assembles the
/// embedded engine (cache, adapter, autosave) over `storage_path`. Both
/// sides expose the identical operation set, so [`Collection`] handles work
/// the same either way.
pub mod client;
/// Collection handles with pre-routing validation.
pub mod collection;

pub use client::RemoteClient;
pub use collection::Collection;

use std::sync::{Arc, OnceLock};

use log::info;

use crate::adapter::{validate, LocalAdapter};
use crate::engine::{CollectionCache, Persistence};
use crate::{Datastore, Options, Result};

static SIGNAL_HOOK: OnceLock<()> = OnceLock::new();

pub struct Store {
    inner: Arc<dyn Datastore>,
    cache: Option<Arc<CollectionCache>>,
}

impl Store {
    /// Opens a store in embedded or remote mode depending on `options`.
    pub async fn open(options: Options) -> Result<Store> {
        if let Some(url) = &options.database_url {
            let client = RemoteClient::connect(url, &options).await?;
            info!("store in remote mode against {url}");
            return Ok(Store {
                inner: Arc::new(client),
                cache: None,
            });
        }

        let cache = Arc::new(CollectionCache::new(Persistence::new(&options.storage_path)));
        cache.start_autosave(options.auto_save_interval_ms);
        info!("store embedded at {}", options.storage_path.display());
        if options.debug {
            log::debug!(
                "autosave every {} ms, pool size {}, timeout {} ms",
                options.auto_save_interval_ms,
                options.pool_size,
                options.timeout_ms
            );
        }
        Ok(Store {
            inner: Arc::new(LocalAdapter::new(cache.clone())),
            cache: Some(cache),
        })
    }

    /// Returns a handle to the named collection. The name is validated here,
    /// before any routing.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        validate::validate_collection_name(name)?;
        Ok(Collection::new(self.inner.clone(), name))
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        self.inner.clone()
    }

    /// Persists every dirty collection now. No-op in remote mode.
    pub async fn flush(&self) {
        if let Some(cache) = &self.cache {
            cache.save_dirty().await;
        }
    }

    /// Graceful shutdown: stops the autosave loop and drains every dirty
    /// collection. Safe to call more than once.
    pub async fn shutdown(&self) {
        if let Some(cache) = &self.cache {
            cache.flush_all().await;
        }
    }

    /// Binds process termination signals to a flush of all collections.
    /// The hook is installed once per process; later calls are no-ops.
    pub fn register_shutdown_hooks(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut first = false;
        SIGNAL_HOOK.get_or_init(|| first = true);
        if !first {
            return;
        }
        let cache = cache.clone();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("termination signal received, flushing collections");
            cache.flush_all().await;
        });
    }
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

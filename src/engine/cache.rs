use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use log::{debug, error, warn};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::engine::codec::FIELD_ID;
use crate::engine::Persistence;
use crate::{Error, Result};

/// In-memory state of one collection: insertion-ordered documents plus the
/// primary-key index mapping each id to its position.
pub struct CollectionState {
    pub documents: Vec<Value>,
    pub id_index: HashMap<String, usize>,
    pub dirty: bool,
}

impl CollectionState {
    fn empty() -> Self {
        Self {
            documents: Vec::new(),
            id_index: HashMap::new(),
            dirty: false,
        }
    }

    fn from_documents(documents: Vec<Value>) -> Self {
        let mut state = Self {
            documents,
            id_index: HashMap::new(),
            dirty: false,
        };
        state.rebuild_index();
        state
    }

    pub fn rebuild_index(&mut self) {
        self.id_index.clear();
        for (position, doc) in self.documents.iter().enumerate() {
            if let Some(id) = doc.get(FIELD_ID).and_then(|v| v.as_str()) {
                self.id_index.insert(id.to_string(), position);
            }
        }
    }

    /// Re-points index entries for positions at or after `start` following a
    /// splice.
    fn reindex_from(&mut self, start: usize) {
        for (position, doc) in self.documents.iter().enumerate().skip(start) {
            if let Some(id) = doc.get(FIELD_ID).and_then(|v| v.as_str()) {
                self.id_index.insert(id.to_string(), position);
            }
        }
    }
}

/// Per-collection serialization lane. The tokio mutex queues waiters FIFO,
/// which is exactly the ordering contract: operations on one collection
/// observe all operations submitted before them and none submitted after.
struct Lane {
    state: Mutex<Option<CollectionState>>,
}

/// Process-wide collection cache and durability manager.
///
/// Collections load lazily on first access, mutate only inside their lane,
/// and are flushed by the background autosave task or an explicit flush.
pub struct CollectionCache {
    persistence: Arc<Persistence>,
    lanes: StdMutex<HashMap<String, Arc<Lane>>>,
    dirty: StdMutex<HashSet<String>>,
    shutting_down: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    autosave: StdMutex<Option<JoinHandle<()>>>,
}

impl CollectionCache {
    pub fn new(persistence: Persistence) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            persistence: Arc::new(persistence),
            lanes: StdMutex::new(HashMap::new()),
            dirty: StdMutex::new(HashSet::new()),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            autosave: StdMutex::new(None),
        }
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn lane_for(&self, name: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock().unwrap();
        lanes
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Lane {
                    state: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Loads the collection into the locked lane slot if it is not resident
    /// yet. A missing file yields an empty collection; an unparseable file
    /// is logged and survived by starting empty.
    async fn ensure_loaded(&self, name: &str, slot: &mut Option<CollectionState>) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }
        let persistence = self.persistence.clone();
        let owned = name.to_string();
        let loaded = tokio::task::spawn_blocking(move || persistence.load(&owned))
            .await
            .map_err(|e| Error::Internal(format!("load task failed: {e}")))?;
        let state = match loaded {
            Ok(Some(documents)) => {
                debug!("loaded collection {name} ({} documents)", documents.len());
                CollectionState::from_documents(documents)
            }
            Ok(None) => CollectionState::empty(),
            Err(Error::CorruptFile(msg)) => {
                warn!("collection {name} is corrupt, starting empty: {msg}");
                CollectionState::empty()
            }
            Err(e) => return Err(e),
        };
        *slot = Some(state);
        Ok(())
    }

    fn mark_dirty(&self, name: &str, state: &mut CollectionState) {
        state.dirty = true;
        self.dirty.lock().unwrap().insert(name.to_string());
    }

    /// Runs a read-only closure against the collection state. Reads take the
    /// lane too, so they serialize with mutations on the same collection.
    pub async fn read<R>(
        &self,
        name: &str,
        f: impl FnOnce(&CollectionState) -> R,
    ) -> Result<R> {
        let lane = self.lane_for(name);
        let mut guard = lane.state.lock().await;
        self.ensure_loaded(name, &mut guard).await?;
        Ok(f(guard.as_ref().unwrap()))
    }

    /// Runs a mutating closure against the collection state. The closure
    /// returns its result plus whether it changed anything; only a `true`
    /// marks the collection dirty.
    pub async fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut CollectionState) -> Result<(R, bool)>,
    ) -> Result<R> {
        let lane = self.lane_for(name);
        let mut guard = lane.state.lock().await;
        self.ensure_loaded(name, &mut guard).await?;
        let state = guard.as_mut().unwrap();
        let (result, mutated) = f(state)?;
        if mutated {
            self.mark_dirty(name, state);
        }
        Ok(result)
    }

    /// Looks a document up by id, hands a shallow clone to `f`, verifies the
    /// id survived, and writes the result back at the same position.
    pub async fn update_document(
        &self,
        name: &str,
        id: &str,
        f: impl FnOnce(Map<String, Value>) -> Result<Map<String, Value>>,
    ) -> Result<Value> {
        let lane = self.lane_for(name);
        let mut guard = lane.state.lock().await;
        self.ensure_loaded(name, &mut guard).await?;
        let state = guard.as_mut().unwrap();

        let position = *state
            .id_index
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let current = state.documents[position]
            .as_object()
            .cloned()
            .ok_or_else(|| Error::Internal("collection holds a non-object document".into()))?;

        let updated = f(current)?;
        let same_id = updated.get(FIELD_ID).and_then(|v| v.as_str()) == Some(id);
        if !same_id {
            return Err(Error::IdMutation);
        }

        state.documents[position] = Value::Object(updated);
        self.mark_dirty(name, state);
        Ok(state.documents[position].clone())
    }

    /// Splices a document out by id and re-indexes the tail. Returns whether
    /// a removal happened.
    pub async fn remove_document(&self, name: &str, id: &str) -> Result<bool> {
        self.update(name, |state| {
            let Some(position) = state.id_index.remove(id) else {
                return Ok((false, false));
            };
            state.documents.remove(position);
            state.reindex_from(position);
            Ok((true, true))
        })
        .await
    }

    /// Persists one collection if dirty. Takes the lane, so a save queued
    /// behind a mutation sees exactly that mutation's state.
    pub async fn save(&self, name: &str) -> Result<()> {
        let lane = self.lane_for(name);
        let mut guard = lane.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };
        if !state.dirty {
            return Ok(());
        }

        let persistence = self.persistence.clone();
        let owned = name.to_string();
        let documents = state.documents.clone();
        tokio::task::spawn_blocking(move || persistence.save(&owned, &documents))
            .await
            .map_err(|e| Error::Internal(format!("save task failed: {e}")))??;

        state.dirty = false;
        self.dirty.lock().unwrap().remove(name);
        debug!("saved collection {name}");
        Ok(())
    }

    pub fn dirty_snapshot(&self) -> Vec<String> {
        self.dirty.lock().unwrap().iter().cloned().collect()
    }

    /// Saves every dirty collection, each through its own lane. Failures are
    /// logged and do not stop the sweep.
    pub async fn save_dirty(&self) {
        let names = self.dirty_snapshot();
        let saves = names.iter().map(|name| async move {
            if let Err(e) = self.save(name).await {
                error!("failed to save collection {name}: {e}");
            }
        });
        join_all(saves).await;
    }

    /// Starts the background autosave loop. `interval_ms == 0` disables it.
    pub fn start_autosave(self: &Arc<Self>, interval_ms: u64) {
        if interval_ms == 0 {
            return;
        }
        let cache = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let period = std::time::Duration::from_millis(interval_ms);
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it so a fresh store does
            // not save before anything happened.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if cache.is_shutting_down() {
                            break;
                        }
                        cache.save_dirty().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
        *self.autosave.lock().unwrap() = Some(handle);
    }

    /// Graceful shutdown: raises the shutdown flag, stops the autosave loop
    /// and flushes every dirty collection in parallel. Safe to call more
    /// than once.
    pub async fn flush_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.save_dirty().await;
    }

    /// Drops a collection: evicts the in-memory state and deletes the file.
    /// Pending dirty data dies with it; absence of the file is fine.
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        let lane = self.lane_for(name);
        let mut guard = lane.state.lock().await;

        // Late arrivals queued on this lane see an empty, clean collection.
        *guard = Some(CollectionState::empty());
        self.dirty.lock().unwrap().remove(name);
        self.lanes.lock().unwrap().remove(name);

        let persistence = self.persistence.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || persistence.remove(&owned))
            .await
            .map_err(|e| Error::Internal(format!("drop task failed: {e}")))??;
        Ok(())
    }
}

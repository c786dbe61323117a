//! In-memory source fed from code

use crate::core::{ConfigError, ConfigResult, KeyValue, Source, Watcher};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// Updates buffered per watcher before it starts lagging
const UPDATE_CAPACITY: usize = 64;

/// Source holding key/values in memory.
///
/// The initial snapshot is given at construction. [`publish`](Self::publish)
/// pushes a change batch to every active watcher and folds it into the
/// snapshot, so a later `load` sees the published values too.
pub struct MemorySource {
    name: String,
    snapshot: RwLock<Vec<KeyValue>>,
    updates: broadcast::Sender<Vec<KeyValue>>,
}

impl MemorySource {
    /// Create a source with an initial snapshot
    pub fn new(name: impl Into<String>, snapshot: Vec<KeyValue>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            name: name.into(),
            snapshot: RwLock::new(snapshot),
            updates,
        }
    }

    /// Create a source with an empty snapshot
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Publish a change batch; returns the number of watchers it reached.
    ///
    /// Key/values replace snapshot entries with the same key.
    pub fn publish(&self, kvs: Vec<KeyValue>) -> usize {
        {
            let mut snapshot = self.snapshot.write();
            for kv in &kvs {
                match snapshot.iter_mut().find(|existing| existing.key() == kv.key()) {
                    Some(existing) => *existing = kv.clone(),
                    None => snapshot.push(kv.clone()),
                }
            }
        }

        let reached = self.updates.send(kvs).unwrap_or(0);
        tracing::trace!(source = %self.name, watchers = reached, "memory update published");
        reached
    }

    /// Number of active watchers
    pub fn watcher_count(&self) -> usize {
        self.updates.receiver_count()
    }
}

#[async_trait]
impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> ConfigResult<Vec<KeyValue>> {
        Ok(self.snapshot.read().clone())
    }

    async fn watch(&self) -> ConfigResult<Arc<dyn Watcher>> {
        Ok(Arc::new(MemoryWatcher {
            source: self.name.clone(),
            updates: Mutex::new(self.updates.subscribe()),
            cancel: CancellationToken::new(),
        }))
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("keys", &self.snapshot.read().len())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}

struct MemoryWatcher {
    source: String,
    updates: Mutex<broadcast::Receiver<Vec<KeyValue>>>,
    cancel: CancellationToken,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&self) -> ConfigResult<Vec<KeyValue>> {
        let mut updates = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ConfigError::Cancelled),
            updates = self.updates.lock() => updates,
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConfigError::Cancelled),
            update = updates.recv() => match update {
                Ok(kvs) => Ok(kvs),
                Err(broadcast::error::RecvError::Lagged(skipped)) => Err(ConfigError::source_error(
                    format!("watcher lagged behind, {skipped} updates dropped"),
                    self.source.clone(),
                )),
                Err(broadcast::error::RecvError::Closed) => Err(ConfigError::Cancelled),
            },
        }
    }

    async fn stop(&self) -> ConfigResult<()> {
        self.cancel.cancel();
        Ok(())
    }
}

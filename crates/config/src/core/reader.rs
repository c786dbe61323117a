//! Copy-on-write configuration tree reader

use super::{ConfigError, ConfigResult, KeyValue, Reader, Value, path};
use crate::decoders::DecoderRegistry;
use crate::strategies::{MergeFn, ResolveFn, deep_merge, placeholder_resolver};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Default [`Reader`] over a JSON-shaped tree.
///
/// Two trees are kept: the merged tree, which still holds placeholders and is
/// only touched by writers, and the resolved tree, which is published
/// atomically for readers. Writers work on a copy and swap it in on success,
/// so a failed merge or resolve leaves both trees as they were.
pub struct TreeReader {
    decoders: DecoderRegistry,
    merge: MergeFn,
    resolve: ResolveFn,
    merged: Mutex<serde_json::Value>,
    resolved: ArcSwap<serde_json::Value>,
}

impl TreeReader {
    /// Create a reader with explicit decoders and strategies
    pub fn new(decoders: DecoderRegistry, merge: MergeFn, resolve: ResolveFn) -> Self {
        let empty = serde_json::Value::Object(serde_json::Map::new());
        Self {
            decoders,
            merge,
            resolve,
            merged: Mutex::new(empty.clone()),
            resolved: ArcSwap::from_pointee(empty),
        }
    }

    /// Snapshot of the resolved tree
    pub fn snapshot(&self) -> Arc<serde_json::Value> {
        self.resolved.load_full()
    }

    /// Copy of `base` with `kvs` merged in, in order
    fn merged_with(
        &self,
        base: &serde_json::Value,
        kvs: &[KeyValue],
    ) -> ConfigResult<serde_json::Value> {
        let mut working = base.clone();
        for kv in kvs {
            let incoming = self.decode(kv)?;
            (self.merge)(&mut working, incoming)?;
        }
        Ok(working)
    }

    fn decode(&self, kv: &KeyValue) -> ConfigResult<serde_json::Value> {
        if !kv.is_raw() {
            return self.decoders.decode(kv);
        }

        let text = std::str::from_utf8(kv.data())
            .map_err(|e| ConfigError::decode(kv.key(), kv.format(), format!("invalid UTF-8: {e}")))?;
        path::nest(kv.key(), serde_json::Value::String(text.to_string()))
            .ok_or_else(|| ConfigError::merge(kv.key(), "key must be a non-empty dotted path"))
    }
}

impl Default for TreeReader {
    fn default() -> Self {
        Self::new(
            DecoderRegistry::with_defaults(),
            Arc::new(deep_merge),
            Arc::new(placeholder_resolver),
        )
    }
}

impl Reader for TreeReader {
    fn merge(&self, kvs: &[KeyValue]) -> ConfigResult<()> {
        let mut merged = self.merged.lock();
        *merged = self.merged_with(&merged, kvs)?;
        Ok(())
    }

    fn resolve(&self) -> ConfigResult<()> {
        // held across the publish so resolves land in merge order
        let merged = self.merged.lock();
        let mut working = merged.clone();
        (self.resolve)(&mut working)?;
        self.resolved.store(Arc::new(working));
        Ok(())
    }

    fn apply(&self, kvs: &[KeyValue]) -> ConfigResult<()> {
        let mut merged = self.merged.lock();
        let next = self.merged_with(&merged, kvs)?;
        let mut resolved = next.clone();
        (self.resolve)(&mut resolved)?;
        *merged = next;
        self.resolved.store(Arc::new(resolved));
        Ok(())
    }

    fn value(&self, key: &str) -> Option<Value> {
        let tree = self.resolved.load();
        path::get(&tree, key).map(|found| Value::new(key, found.clone()))
    }

    fn source(&self) -> ConfigResult<Vec<u8>> {
        Ok(serde_json::to_vec(&**self.resolved.load())?)
    }
}

impl fmt::Debug for TreeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeReader")
            .field("decoders", &self.decoders)
            .finish_non_exhaustive()
    }
}

//! Core traits for the configuration system

use super::{ConfigResult, KeyValue, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A backing store of configuration data.
///
/// Sources are shared with the orchestrator and never owned by it.
#[async_trait]
pub trait Source: Send + Sync {
    /// Name used in logs and source errors
    fn name(&self) -> &str;

    /// Load the initial snapshot
    async fn load(&self) -> ConfigResult<Vec<KeyValue>>;

    /// Start a watcher streaming subsequent change batches
    async fn watch(&self) -> ConfigResult<Arc<dyn Watcher>>;
}

/// A cancellable stream of change batches from one source.
///
/// Implementations must make `next` return [`ConfigError::Cancelled`] once
/// `stop` has been called. A `next` that never returns after `stop` is still
/// released by the orchestrator, which drops the pending call on close.
///
/// [`ConfigError::Cancelled`]: super::ConfigError::Cancelled
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Wait for the next batch of changed key/values
    async fn next(&self) -> ConfigResult<Vec<KeyValue>>;

    /// Request the watcher to stop; idempotent
    async fn stop(&self) -> ConfigResult<()>;
}

/// Decodes a raw payload of one format into a tree.
pub trait Decoder: Send + Sync {
    /// Decode `data` into a tree
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, String>;
}

impl<F> Decoder for F
where
    F: Fn(&[u8]) -> Result<serde_json::Value, String> + Send + Sync,
{
    fn decode(&self, data: &[u8]) -> Result<serde_json::Value, String> {
        self(data)
    }
}

/// Owns the merged and resolved configuration tree.
///
/// Writes happen from the initial load and from watch tasks; reads happen
/// from arbitrary threads and must never observe a half-applied write.
pub trait Reader: Send + Sync {
    /// Decode and merge a batch of key/values into the tree
    fn merge(&self, kvs: &[KeyValue]) -> ConfigResult<()>;

    /// Rewrite placeholders and publish the resolved tree
    fn resolve(&self) -> ConfigResult<()>;

    /// Merge a batch and publish the resolved result as one step.
    ///
    /// If either step fails the reader is left exactly as it was, so a batch
    /// that cannot be resolved does not poison later batches.
    fn apply(&self, kvs: &[KeyValue]) -> ConfigResult<()>;

    /// Fresh value over the resolved tree at `key`, if present
    fn value(&self, key: &str) -> Option<Value>;

    /// The whole resolved tree as portable bytes
    fn source(&self) -> ConfigResult<Vec<u8>>;
}

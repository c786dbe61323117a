//! Environment variable source

use crate::core::{ConfigError, ConfigResult, KeyValue, Source, Watcher};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Source snapshotting environment variables as raw key/values.
///
/// With a prefix, only variables starting with `PREFIX` followed by the
/// separator are taken and the prefix is stripped. Names are lowercased and
/// the separator becomes a path dot, so `APP_DB_HOST` with prefix `APP` is
/// the key `db.host`. The environment is not watched; its watcher only
/// waits to be stopped.
#[derive(Debug, Clone)]
pub struct EnvSource {
    name: String,
    prefix: Option<String>,
    separator: String,
}

impl EnvSource {
    /// Take every environment variable
    pub fn new() -> Self {
        Self {
            name: "env".to_string(),
            prefix: None,
            separator: "_".to_string(),
        }
    }

    /// Take only variables under `prefix`
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            name: format!("env:{prefix}"),
            prefix: Some(prefix),
            ..Self::new()
        }
    }

    /// Set the separator that maps to a path dot (default `_`)
    #[must_use = "builder methods must be chained or built"]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Map a variable name to a dotted key, or `None` if it is filtered out
    fn key_for(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_uppercase();
        let stripped = match &self.prefix {
            Some(prefix) => name
                .strip_prefix(&prefix.to_ascii_uppercase())?
                .strip_prefix(self.separator.as_str())?,
            None => name.as_str(),
        };

        let key = stripped
            .split(self.separator.as_str())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();
        if key.iter().any(String::is_empty) {
            return None;
        }
        Some(key.join("."))
    }

    fn collect<I>(&self, vars: I) -> Vec<KeyValue>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut kvs: Vec<KeyValue> = vars
            .into_iter()
            .filter_map(|(name, value)| self.key_for(&name).map(|key| KeyValue::raw(key, value)))
            .collect();
        kvs.sort_by(|a, b| a.key().cmp(b.key()));
        kvs
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for EnvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> ConfigResult<Vec<KeyValue>> {
        // non-UTF-8 variables are skipped
        let kvs = self.collect(std::env::vars_os().filter_map(|(name, value)| {
            Some((name.into_string().ok()?, value.into_string().ok()?))
        }));
        if kvs.is_empty() {
            tracing::debug!(source = %self.name, "no environment variables found");
        } else {
            tracing::debug!(source = %self.name, count = kvs.len(), "loaded environment variables");
        }
        Ok(kvs)
    }

    async fn watch(&self) -> ConfigResult<Arc<dyn Watcher>> {
        Ok(Arc::new(EnvWatcher {
            cancel: CancellationToken::new(),
        }))
    }
}

struct EnvWatcher {
    cancel: CancellationToken,
}

#[async_trait]
impl Watcher for EnvWatcher {
    async fn next(&self) -> ConfigResult<Vec<KeyValue>> {
        self.cancel.cancelled().await;
        Err(ConfigError::Cancelled)
    }

    async fn stop(&self) -> ConfigResult<()> {
        self.cancel.cancel();
        Ok(())
    }
}

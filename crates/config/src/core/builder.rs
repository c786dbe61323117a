//! Builder for [`Config`]

use super::{Config, ConfigResult, Decoder, Reader, Source, TreeReader, WatchBackoff};
use crate::decoders::DecoderRegistry;
use crate::strategies::{MergeFn, ResolveFn, deep_merge, placeholder_resolver};
use std::sync::Arc;
use tracing::Dispatch;

/// Builder for [`Config`]
#[must_use = "builder does nothing until build() is called"]
pub struct ConfigBuilder {
    sources: Vec<Arc<dyn Source>>,
    decoders: DecoderRegistry,
    merge: MergeFn,
    resolve: ResolveFn,
    reader: Option<Arc<dyn Reader>>,
    backoff: WatchBackoff,
    dispatch: Option<Dispatch>,
}

impl ConfigBuilder {
    /// Create a builder with default decoders, deep merge, placeholder
    /// resolution and a fixed one second watch backoff
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            decoders: DecoderRegistry::with_defaults(),
            merge: Arc::new(deep_merge),
            resolve: Arc::new(placeholder_resolver),
            reader: None,
            backoff: WatchBackoff::default(),
            dispatch: None,
        }
    }

    /// Add a source; sources are loaded and merged in the order added
    pub fn with_source(mut self, source: impl Source + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Add a source that is shared with other owners
    pub fn with_shared_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    /// Add multiple shared sources
    pub fn with_sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Source>>,
    {
        self.sources.extend(sources);
        self
    }

    /// Register a decoder for a format tag, replacing a built-in one
    pub fn with_decoder(mut self, format: impl AsRef<str>, decoder: impl Decoder + 'static) -> Self {
        self.decoders.register(format, decoder);
        self
    }

    /// Replace the decoder registry
    pub fn with_decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = decoders;
        self
    }

    /// Replace the merge strategy
    pub fn with_merge<F>(mut self, merge: F) -> Self
    where
        F: Fn(&mut serde_json::Value, serde_json::Value) -> ConfigResult<()> + Send + Sync + 'static,
    {
        self.merge = Arc::new(merge);
        self
    }

    /// Replace the resolver strategy
    pub fn with_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&mut serde_json::Value) -> ConfigResult<()> + Send + Sync + 'static,
    {
        self.resolve = Arc::new(resolve);
        self
    }

    /// Use a custom reader; decoders and strategies set on this builder are
    /// then ignored
    pub fn with_reader(mut self, reader: Arc<dyn Reader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Set the retry delay policy for watch tasks
    pub fn with_backoff(mut self, backoff: WatchBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Send this config's logs to `dispatch` instead of the dispatcher that
    /// is current when `build` is called
    pub fn with_dispatch(mut self, dispatch: impl Into<Dispatch>) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    /// Build the config; nothing is loaded until [`Config::load`]
    pub fn build(self) -> Config {
        let reader = self.reader.unwrap_or_else(|| {
            Arc::new(TreeReader::new(self.decoders, self.merge, self.resolve)) as Arc<dyn Reader>
        });
        let dispatch = self
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));
        Config::new(reader, self.sources, self.backoff, dispatch)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("sources", &self.sources.len())
            .field("decoders", &self.decoders)
            .field("custom_reader", &self.reader.is_some())
            .field("backoff", &self.backoff)
            .finish()
    }
}

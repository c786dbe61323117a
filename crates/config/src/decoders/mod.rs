//! Format decoders and the registry that selects them by format tag

mod json;
#[cfg(feature = "toml")]
mod toml;
#[cfg(feature = "yaml")]
mod yaml;

pub use json::JsonDecoder;
#[cfg(feature = "toml")]
pub use self::toml::TomlDecoder;
#[cfg(feature = "yaml")]
pub use yaml::YamlDecoder;

use crate::core::{ConfigError, ConfigResult, Decoder, KeyValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maps format tags to decoders.
///
/// Tags are matched case-insensitively. The registry is fixed once the
/// orchestrator is built.
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    /// Create an empty registry
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Create a registry with every decoder compiled into this build
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("json", JsonDecoder);
        #[cfg(feature = "toml")]
        registry.register("toml", TomlDecoder);
        #[cfg(feature = "yaml")]
        {
            registry.register("yaml", YamlDecoder);
            registry.register("yml", YamlDecoder);
        }
        registry
    }

    /// Register a decoder for `format`, replacing any previous one
    pub fn register(&mut self, format: impl AsRef<str>, decoder: impl Decoder + 'static) {
        self.decoders
            .insert(format.as_ref().to_ascii_lowercase(), Arc::new(decoder));
    }

    /// Check if a decoder is registered for `format`
    pub fn supports(&self, format: &str) -> bool {
        self.decoders.contains_key(&format.to_ascii_lowercase())
    }

    /// Registered format tags, sorted
    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }

    /// Decode a formatted key/value into a tree
    pub fn decode(&self, kv: &KeyValue) -> ConfigResult<serde_json::Value> {
        let decoder = self
            .decoders
            .get(&kv.format().to_ascii_lowercase())
            .ok_or_else(|| ConfigError::unknown_format(kv.key(), kv.format()))?;
        decoder
            .decode(kv.data())
            .map_err(|message| ConfigError::decode(kv.key(), kv.format(), message))
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

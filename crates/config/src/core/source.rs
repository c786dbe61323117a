//! Raw key/value units produced by configuration sources

use bytes::Bytes;
use std::fmt;

/// Format tag for payloads that are placed verbatim as a string leaf.
pub const RAW_FORMAT: &str = "";

/// An immutable unit of raw configuration data produced by a source.
///
/// A key/value with an empty format is a raw leaf: its bytes are placed as a
/// string at the dotted path named by `key`. Any other format selects a
/// decoder and the decoded document is merged at the root of the tree.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyValue {
    key: String,
    data: Bytes,
    format: String,
}

impl KeyValue {
    /// Create a key/value with an explicit format tag
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            format: format.into(),
        }
    }

    /// Create a raw leaf placed as a string at the dotted `key`
    pub fn raw(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Bytes::from(value.into()), RAW_FORMAT)
    }

    /// Key of this unit, unique within its source
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw payload bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Format tag used to select a decoder
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Check if this unit is a raw leaf rather than a document
    pub fn is_raw(&self) -> bool {
        self.format.is_empty()
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // payloads may carry secrets
        f.debug_struct("KeyValue")
            .field("key", &self.key)
            .field("format", &self.format)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Infer a format tag from a file extension, lowercased.
pub fn format_from_extension(path: &std::path::Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

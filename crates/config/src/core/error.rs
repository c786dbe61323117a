//! Configuration error types

use thiserror::Error;

/// Configuration error type
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Key is absent or did not resolve to a value
    #[error("Configuration key not found: {key}")]
    NotFound {
        /// Dotted key that was looked up
        key: String,
    },

    /// Payload could not be decoded, or no decoder is registered for its format
    #[error("Failed to decode '{key}' as '{format}': {message}")]
    Decode {
        /// Key of the offending key/value
        key: String,
        /// Format tag the payload was decoded with
        format: String,
        /// Error message describing the decode failure
        message: String,
    },

    /// Structural conflict while merging two trees
    #[error("Failed to merge configuration at '{path}': {message}")]
    Merge {
        /// Dotted path of the conflict
        path: String,
        /// Error message describing the merge failure
        message: String,
    },

    /// Placeholder reference could not be resolved
    #[error("Failed to resolve '{reference}': {message}")]
    Resolution {
        /// Reference that failed to resolve
        reference: String,
        /// Error message describing the resolution failure
        message: String,
    },

    /// Watcher was stopped deliberately
    #[error("Configuration watcher cancelled")]
    Cancelled,

    /// Opaque failure from a source or watcher transport
    #[error("Configuration source error ({origin}): {message}")]
    Source {
        /// Error message describing the source error
        message: String,
        /// Name of the source
        origin: String,
    },

    /// Value does not have the requested type
    #[error("Configuration type error at '{key}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// Key of the value
        key: String,
        /// Requested type
        expected: String,
        /// Type actually held
        actual: String,
    },

    /// Resolved tree could not be exported or scanned into a target type
    #[error("Configuration serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Operation is not allowed in the current lifecycle state
    #[error("Invalid configuration state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires
        expected: String,
        /// State the orchestrator was in
        actual: String,
    },
}

impl ConfigError {
    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a decode error
    pub fn decode(
        key: impl Into<String>,
        format: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Decode {
            key: key.into(),
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a decode error for a format without a registered decoder
    pub fn unknown_format(key: impl Into<String>, format: impl Into<String>) -> Self {
        let format = format.into();
        Self::Decode {
            key: key.into(),
            message: format!("no decoder registered for format '{format}'"),
            format,
        }
    }

    /// Create a merge error
    pub fn merge(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Merge {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a resolution error
    pub fn resolution(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a source error
    pub fn source_error(message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            origin: origin.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        key: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if the error signals a deliberately stopped watcher
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if the error is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Decode { .. } | Self::TypeMismatch { .. } | Self::Serialization { .. } => {
                ErrorCategory::Format
            }
            Self::Merge { .. } | Self::Resolution { .. } => ErrorCategory::Tree,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Source { .. } => ErrorCategory::Source,
            Self::InvalidState { .. } => ErrorCategory::Lifecycle,
        }
    }
}

/// Error category for grouping errors
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Key lookup miss
    NotFound,
    /// Decoding or serialization of payloads
    Format,
    /// Merge or resolution of the tree
    Tree,
    /// Deliberate watcher cancellation
    Cancelled,
    /// Backing source transport
    Source,
    /// Orchestrator lifecycle misuse
    Lifecycle,
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {err}"))
    }
}

impl From<notify::Error> for ConfigError {
    fn from(err: notify::Error) -> Self {
        Self::source_error(err.to_string(), "notify")
    }
}

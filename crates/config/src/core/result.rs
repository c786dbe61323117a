//! Result type and utilities for configuration operations

use super::error::ConfigError;

/// Standard result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Extension trait for Result types to add configuration-specific utilities
pub trait ConfigResultExt<T> {
    /// Prefix a source error message with context, wrapping other errors as source errors
    fn with_context<F>(self, f: F) -> ConfigResult<T>
    where
        F: FnOnce() -> String;

    /// Convert to option, logging the error if present
    fn log_error(self) -> Option<T>;
}

impl<T> ConfigResultExt<T> for ConfigResult<T> {
    fn with_context<F>(self, f: F) -> ConfigResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            ConfigError::Source { message, origin } => {
                let ctx = f();
                ConfigError::Source {
                    message: format!("{ctx}: {message}"),
                    origin,
                }
            }
            ConfigError::Cancelled => ConfigError::Cancelled,
            other => ConfigError::Source {
                message: format!("{}: {other}", f()),
                origin: "context".to_string(),
            },
        })
    }

    fn log_error(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, category = ?e.category(), "configuration error");
                None
            }
        }
    }
}

/// Collects failures from a sequence of best-effort operations.
///
/// Every failure is kept; `finish` reports the first one.
#[derive(Debug, Default)]
pub struct ConfigResultAggregator {
    errors: Vec<ConfigError>,
}

impl ConfigResultAggregator {
    /// Create a new aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, returning `true` if it succeeded
    pub fn check(&mut self, result: ConfigResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.errors.push(e);
                false
            }
        }
    }

    /// Check if there were any errors
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get all errors in the order they were recorded
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    /// Finish aggregation, returning the first recorded error
    pub fn finish(self) -> ConfigResult<()> {
        match self.errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}

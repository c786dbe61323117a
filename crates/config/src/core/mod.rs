//! Core configuration functionality

pub mod backoff;
pub mod builder;
pub mod config;
pub mod error;
pub mod path;
pub mod reader;
pub mod result;
pub mod source;
pub mod traits;
pub mod value;

// Re-export core types
pub use backoff::WatchBackoff;
pub use builder::ConfigBuilder;
pub use config::{Config, LifecycleState, Observer};
pub use error::{ConfigError, ErrorCategory};
pub use reader::TreeReader;
pub use result::{ConfigResult, ConfigResultAggregator, ConfigResultExt};
pub use source::{KeyValue, RAW_FORMAT, format_from_extension};
pub use value::{Value, ValueKind};

// Re-export core traits
pub use traits::{Decoder, Reader, Source, Watcher};

//! Stratum Config - dynamic multi-source configuration
//!
//! Configuration is assembled from ordered sources (files, environment,
//! in-memory publishers, or your own [`Source`] implementations), merged into
//! one tree, resolved for `${...}` placeholders and kept live: every source
//! is watched and cached values are updated in place, with an optional
//! observer per key.
//!
//! # Example
//!
//! ```rust,no_run
//! use stratum_config::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> ConfigResult<()> {
//!     let config = ConfigBuilder::new()
//!         .with_source(FileSource::new("config.toml"))
//!         .with_source(EnvSource::with_prefix("APP"))
//!         .build();
//!     config.load().await?;
//!
//!     let port = config.value("server.port").int()?;
//!     config.watch("server.port", |key, value| {
//!         println!("{key} changed to {:?}", value.int());
//!     })?;
//!
//!     # let _ = port;
//!     config.close().await
//! }
//! ```

#![deny(unused_must_use)]
#![warn(missing_docs)]

// Core module with main functionality
pub mod core;

// Implementation modules
pub mod decoders;
pub mod sources;
pub mod strategies;

// Re-export main types from core
pub use crate::core::{
    Config, ConfigBuilder, ConfigError, ConfigResult, ConfigResultAggregator, ConfigResultExt,
    ErrorCategory, KeyValue, LifecycleState, Observer, RAW_FORMAT, TreeReader, Value, ValueKind,
    WatchBackoff,
};

// Re-export traits
pub use crate::core::{Decoder, Reader, Source, Watcher};

// Re-export concrete implementations
pub use decoders::DecoderRegistry;
#[cfg(feature = "env")]
pub use sources::EnvSource;
pub use sources::{FileSource, MemorySource};
pub use strategies::{deep_merge, noop_resolver, placeholder_resolver};

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude for common imports
    //!
    //! # Example
    //! ```rust
    //! use stratum_config::prelude::*;
    //! ```

    // Core types
    pub use crate::core::{
        Config, ConfigBuilder, ConfigError, ConfigResult, ConfigResultExt, KeyValue,
        LifecycleState, Value, ValueKind, WatchBackoff,
    };

    // Traits
    pub use crate::core::{Decoder, Reader, Source, Watcher};

    // Sources
    #[cfg(feature = "env")]
    pub use crate::sources::EnvSource;
    pub use crate::sources::{FileSource, MemorySource};

    // Common external types
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
}

//! Built-in configuration sources

#[cfg(feature = "env")]
mod env;
mod file;
mod memory;

#[cfg(feature = "env")]
pub use env::EnvSource;
pub use file::FileSource;
pub use memory::MemorySource;

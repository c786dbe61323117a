//! Pluggable merge and resolve strategies used by the tree reader

mod merge;
mod resolve;

pub use merge::{MergeFn, deep_merge};
pub use resolve::{ResolveFn, noop_resolver, placeholder_resolver};

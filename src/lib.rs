//! Mnemo - Content-addressed function memoization
//!
//! Wraps pure-ish functions so their results are cached on disk, keyed by
//! a digest of their bound arguments. Caching is opt-in per call site,
//! per process, or per environment, and a cache failure never changes what
//! the wrapped function returns.

pub mod backend;
pub mod binding;
pub mod controller;
pub mod error;
pub mod function;
pub mod keys;
pub mod metadata;
pub mod serializer;

pub use backend::{CacheBackend, DiskBackend};
pub use binding::{BoundArgs, CallArgs, Parameter, Signature};
pub use controller::{disable_all_caches, enable_all_caches, CacheController, GlobalEnableScope};
pub use error::{MnemoError, MnemoResult};
pub use function::{CacheScope, CacheableFunction};
pub use keys::{FunctionKey, InputKey};
pub use metadata::EntryMetadata;
pub use serializer::{JsonSerializer, Serializer};

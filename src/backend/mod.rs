//! Storage backends
//!
//! The [`CacheBackend`] trait is the storage contract: anything that can
//! hold named blobs with per-entry metadata can back the engine. The disk
//! implementation lives in [`disk`]; other transports (an object store, a
//! remote blob service) implement the same contract, honoring the same
//! locking and near-atomicity guarantees or explicitly documenting weaker
//! ones.

pub mod disk;
pub mod lock;

pub use disk::DiskBackend;
pub use lock::{LockGuard, LockManager};

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::MnemoResult;
use crate::keys::{FunctionKey, InputKey};
use crate::metadata::EntryMetadata;

/// Storage contract for cache entries
///
/// All operations are keyed by [`InputKey`] unless noted. Implementations
/// must never expose a partially written entry to readers: a reader either
/// sees a complete entry or none at all (modulo the documented
/// staging-to-swap window of the disk backend).
pub trait CacheBackend: Send + Sync {
    /// Whether a complete entry exists for the key
    fn exists(&self, key: &InputKey) -> bool;

    /// All entries stored for a function
    fn list(&self, function_key: &FunctionKey) -> MnemoResult<Vec<InputKey>>;

    /// Remove one entry; absent entries are not an error
    fn evict(&self, key: &InputKey) -> MnemoResult<()>;

    /// Remove every entry of a function
    fn clear(&self, function_key: &FunctionKey) -> MnemoResult<()>;

    /// Bulk-move all entries from one function key to another.
    ///
    /// Assumes both functions use this same backend and location.
    fn adopt(&self, from: &FunctionKey, to: &FunctionKey) -> MnemoResult<()>;

    /// Load an entry's metadata; `InputKeyNotFound` when absent
    fn load_metadata(&self, key: &InputKey) -> MnemoResult<EntryMetadata>;

    /// Read the output bytes named by the given metadata
    fn read_output(&self, metadata: &EntryMetadata, key: &InputKey) -> MnemoResult<Vec<u8>>;

    /// Persist an entry: replaces any prior entry for the key, writes the
    /// output bytes and metadata near-atomically, then touches the entry.
    ///
    /// The sequence is lock-guarded per step, not as a unit: under
    /// concurrent writers to the same key the last writer wins, and no
    /// reader ever observes a truncated file.
    fn write(&self, bytes: &[u8], metadata: &EntryMetadata, key: &InputKey) -> MnemoResult<()>;

    /// Stamp the entry's `last_accessed_at` with the current time
    fn update_last_accessed(&self, key: &InputKey) -> MnemoResult<()>;

    /// When the entry was last read, if ever
    fn last_accessed(&self, key: &InputKey) -> MnemoResult<Option<DateTime<Utc>>>;

    /// Location of the stored output, for callers that want the raw file
    fn output_path(&self, key: &InputKey) -> MnemoResult<PathBuf>;

    /// Read an entry's output bytes, updating `last_accessed_at`.
    ///
    /// Composed of individually lock-guarded steps: touch, load metadata,
    /// read the output file metadata points at.
    fn read(&self, key: &InputKey) -> MnemoResult<Vec<u8>> {
        self.update_last_accessed(key)?;
        let metadata = self.load_metadata(key)?;
        self.read_output(&metadata, key)
    }
}

//! Disk-backed cache storage
//!
//! Layout under the base path:
//!
//! ```text
//! <base>/functions/<function_id>/inputs/<input_id>/metadata.json
//! <base>/functions/<function_id>/inputs/<input_id>/<output_id>.<ext>
//! <base>/locks/<digest-of-entry-path>.lock
//! ```
//!
//! Writes are near-atomic: the entry is staged in a private temporary
//! directory, verified, then swapped into place under the entry lock. A
//! reader never observes a truncated file. The uncovered window is the
//! interval between staging completion and the directory swap; full
//! transactionality across that boundary is out of scope.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backend::lock::LockManager;
use crate::backend::CacheBackend;
use crate::error::{MnemoError, MnemoResult};
use crate::keys::{FunctionKey, InputKey};
use crate::metadata::EntryMetadata;

use chrono::{DateTime, Utc};

/// Environment variable overriding the default cache base path
pub const CACHE_DIR_ENV: &str = "MNEMO_CACHE_DIR";

/// Cache backend storing entries on the local filesystem
#[derive(Debug, Clone)]
pub struct DiskBackend {
    base_path: PathBuf,
    locks: LockManager,
}

impl DiskBackend {
    /// Create a backend at the default location: `MNEMO_CACHE_DIR` if set,
    /// otherwise `.mnemo` under the current directory
    pub fn new() -> Self {
        let base = std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(".mnemo")
            });
        Self::at(base)
    }

    /// Create a backend rooted at an explicit base path
    pub fn at(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let locks = LockManager::new(base_path.join("locks"));
        Self { base_path, locks }
    }

    /// The cache base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn functions_path(&self) -> PathBuf {
        self.base_path.join("functions")
    }

    fn function_path(&self, function_key: &FunctionKey) -> PathBuf {
        self.functions_path().join(&function_key.function_id)
    }

    fn inputs_path(&self, function_key: &FunctionKey) -> PathBuf {
        self.function_path(function_key).join("inputs")
    }

    fn input_path(&self, key: &InputKey) -> PathBuf {
        self.inputs_path(&key.function_key()).join(&key.input_id)
    }

    fn metadata_path(&self, key: &InputKey) -> PathBuf {
        self.input_path(key).join("metadata.json")
    }

    /// Read and parse metadata without taking the entry lock.
    /// Callers hold the lock already, or know no writer can race them.
    fn read_metadata_unlocked(&self, key: &InputKey) -> MnemoResult<EntryMetadata> {
        let path = self.metadata_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MnemoError::InputKeyNotFound(key.clone()));
            }
            Err(e) => {
                return Err(MnemoError::read(
                    format!("reading metadata {}", path.display()),
                    e,
                ));
            }
        };
        serde_json::from_str(&content).map_err(|e| MnemoError::MetadataInvalid {
            path,
            reason: e.to_string(),
        })
    }

    fn write_metadata_file(path: &Path, metadata: &EntryMetadata) -> MnemoResult<()> {
        let content = serde_json::to_vec_pretty(metadata)?;
        fs::write(path, content)
            .map_err(|e| MnemoError::write(format!("writing metadata {}", path.display()), e))
    }

    /// Stage output bytes and metadata in a private temporary directory
    /// under the base path (same filesystem, so the final rename is atomic)
    fn stage_entry(
        &self,
        bytes: &[u8],
        metadata: &EntryMetadata,
    ) -> MnemoResult<tempfile::TempDir> {
        fs::create_dir_all(&self.base_path)
            .map_err(|e| MnemoError::write("creating cache base directory", e))?;

        let staged = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.base_path)
            .map_err(|e| MnemoError::write("creating staging directory", e))?;

        let output_path = staged.path().join(metadata.output_filename());
        fs::write(&output_path, bytes).map_err(|e| {
            MnemoError::write(format!("staging output {}", output_path.display()), e)
        })?;
        Self::write_metadata_file(&staged.path().join("metadata.json"), metadata)?;

        // The staged entry must be well-formed before it replaces anything
        let staged_output_len = fs::metadata(&output_path)
            .map_err(|e| MnemoError::write("verifying staged output", e))?
            .len();
        if staged_output_len as usize != bytes.len() {
            return Err(MnemoError::write(
                "staged output is incomplete",
                std::io::Error::new(std::io::ErrorKind::WriteZero, "short write"),
            ));
        }

        Ok(staged)
    }

    fn copy_tree(from: &Path, to: &Path) -> MnemoResult<()> {
        for entry in WalkDir::new(from) {
            let entry = entry.map_err(|e| MnemoError::Write {
                context: format!("walking {}", from.display()),
                source: e.into(),
            })?;
            let rel = entry
                .path()
                .strip_prefix(from)
                .expect("walkdir yields paths under its root");
            let dest = to.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest).map_err(|e| {
                    MnemoError::write(format!("creating directory {}", dest.display()), e)
                })?;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| {
                        MnemoError::write(format!("creating directory {}", parent.display()), e)
                    })?;
                }
                fs::copy(entry.path(), &dest).map_err(|e| {
                    MnemoError::write(format!("copying to {}", dest.display()), e)
                })?;
            }
        }
        Ok(())
    }
}

impl Default for DiskBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for DiskBackend {
    fn exists(&self, key: &InputKey) -> bool {
        self.metadata_path(key).is_file()
    }

    fn list(&self, function_key: &FunctionKey) -> MnemoResult<Vec<InputKey>> {
        let inputs_path = self.inputs_path(function_key);
        let entries = match fs::read_dir(&inputs_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MnemoError::read(
                    format!("listing {}", inputs_path.display()),
                    e,
                ));
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| MnemoError::read(format!("listing {}", inputs_path.display()), e))?;
            if entry.path().is_dir() {
                keys.push(InputKey::new(
                    function_key.function_id.clone(),
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }
        Ok(keys)
    }

    fn evict(&self, key: &InputKey) -> MnemoResult<()> {
        let input_path = self.input_path(key);
        let _guard = self.locks.acquire(&input_path)?;
        match fs::remove_dir_all(&input_path) {
            Ok(()) => {
                debug!(key = %key, "evicted cache entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MnemoError::write(
                format!("evicting {}", input_path.display()),
                e,
            )),
        }
    }

    fn clear(&self, function_key: &FunctionKey) -> MnemoResult<()> {
        let function_path = self.function_path(function_key);
        match fs::remove_dir_all(&function_path) {
            Ok(()) => {
                debug!(function = %function_key, "cleared function cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MnemoError::write(
                format!("clearing {}", function_path.display()),
                e,
            )),
        }
    }

    fn adopt(&self, from: &FunctionKey, to: &FunctionKey) -> MnemoResult<()> {
        let from_path = self.function_path(from);
        let to_path = self.function_path(to);
        if !from_path.exists() {
            return Err(MnemoError::write(
                format!("adopting cache of {from}"),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "source function has no cache",
                ),
            ));
        }

        Self::copy_tree(&from_path, &to_path)?;
        if let Err(e) = fs::remove_dir_all(&from_path) {
            warn!(from = %from, "failed to remove adopted source cache: {e}");
        }
        debug!(from = %from, to = %to, "adopted function cache");
        Ok(())
    }

    fn load_metadata(&self, key: &InputKey) -> MnemoResult<EntryMetadata> {
        let _guard = self.locks.acquire(&self.input_path(key))?;
        self.read_metadata_unlocked(key)
    }

    fn read_output(&self, metadata: &EntryMetadata, key: &InputKey) -> MnemoResult<Vec<u8>> {
        let input_path = self.input_path(key);
        let _guard = self.locks.acquire(&input_path)?;
        let output_path = input_path.join(metadata.output_filename());
        fs::read(&output_path)
            .map_err(|e| MnemoError::read(format!("reading output {}", output_path.display()), e))
    }

    fn write(&self, bytes: &[u8], metadata: &EntryMetadata, key: &InputKey) -> MnemoResult<()> {
        let staged = self.stage_entry(bytes, metadata)?;
        let input_path = self.input_path(key);

        // Evict-and-swap under the entry lock. Between staging above and
        // this block is the documented non-atomic window.
        {
            let _guard = self.locks.acquire(&input_path)?;
            match fs::remove_dir_all(&input_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(MnemoError::write(
                        format!("evicting {}", input_path.display()),
                        e,
                    ));
                }
            }
            if let Some(parent) = input_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    MnemoError::write(format!("creating directory {}", parent.display()), e)
                })?;
            }
            fs::rename(staged.path(), &input_path).map_err(|e| {
                MnemoError::write(format!("installing entry {}", input_path.display()), e)
            })?;
        }
        // `staged` now points at a moved-away directory; its cleanup on
        // drop is a no-op. On any error path above it removes the staging
        // directory, abandoning the partial entry.

        self.update_last_accessed(key)?;
        debug!(key = %key, output_id = %metadata.output_id, "wrote cache entry");
        Ok(())
    }

    fn update_last_accessed(&self, key: &InputKey) -> MnemoResult<()> {
        let _guard = self.locks.acquire(&self.input_path(key))?;
        let mut metadata = self.read_metadata_unlocked(key)?;
        metadata.last_accessed_at = Some(Utc::now());
        Self::write_metadata_file(&self.metadata_path(key), &metadata)
    }

    fn last_accessed(&self, key: &InputKey) -> MnemoResult<Option<DateTime<Utc>>> {
        Ok(self.load_metadata(key)?.last_accessed_at)
    }

    fn output_path(&self, key: &InputKey) -> MnemoResult<PathBuf> {
        let metadata = self.load_metadata(key)?;
        Ok(self.input_path(key).join(metadata.output_filename()))
    }
}

//! Per-entry advisory locking
//!
//! Each cache entry has a dedicated lock file, named by a digest of the
//! entry's path, under `<base>/locks/`. Acquisition is an exclusive
//! filesystem lock, so cooperating processes and threads serialize their
//! access to one entry while unrelated entries proceed in parallel.
//!
//! Locks are held through an RAII guard and released on every exit path,
//! including panics. Acquisitions must never nest on the same entry within
//! one thread: a second open descriptor would block against the first.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::trace;

use crate::error::{MnemoError, MnemoResult};
use crate::keys::digest_hex;

/// Hands out per-entry advisory locks under a lock directory
#[derive(Debug, Clone)]
pub struct LockManager {
    lock_dir: PathBuf,
}

impl LockManager {
    /// Create a lock manager rooted at the given directory
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
        }
    }

    /// Path of the lock file guarding the given entry path
    pub fn lock_path(&self, entry_path: &Path) -> PathBuf {
        let digest = digest_hex(entry_path.to_string_lossy().as_bytes());
        self.lock_dir.join(format!("{digest}.lock"))
    }

    /// Acquire the exclusive lock for an entry, blocking until available
    pub fn acquire(&self, entry_path: &Path) -> MnemoResult<LockGuard> {
        fs::create_dir_all(&self.lock_dir).map_err(|e| MnemoError::Lock {
            path: self.lock_dir.clone(),
            source: e,
        })?;

        let lock_path = self.lock_path(entry_path);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| MnemoError::Lock {
                path: lock_path.clone(),
                source: e,
            })?;

        file.lock_exclusive().map_err(|e| MnemoError::Lock {
            path: lock_path.clone(),
            source: e,
        })?;

        trace!(lock = %lock_path.display(), "acquired entry lock");
        Ok(LockGuard {
            file,
            path: lock_path,
        })
    }
}

/// Holds an entry lock until dropped
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Release is also implicit on descriptor close; the explicit unlock
        // just makes the window as small as possible.
        let _ = FileExt::unlock(&self.file);
        trace!(lock = %self.path.display(), "released entry lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_name_is_digest_of_entry_path() {
        let manager = LockManager::new("/base/locks");
        let path = manager.lock_path(Path::new("/base/functions/f/inputs/abc"));

        assert!(path.starts_with("/base/locks"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".lock"));
        assert_eq!(name.len(), 64 + ".lock".len());
    }

    #[test]
    fn same_entry_same_lock_file() {
        let manager = LockManager::new("/base/locks");
        let entry = Path::new("/base/functions/f/inputs/abc");
        assert_eq!(manager.lock_path(entry), manager.lock_path(entry));
        assert_ne!(
            manager.lock_path(entry),
            manager.lock_path(Path::new("/base/functions/f/inputs/def"))
        );
    }

    #[test]
    fn acquire_creates_lock_file_and_releases_on_drop() {
        let temp = TempDir::new().unwrap();
        let manager = LockManager::new(temp.path().join("locks"));
        let entry = temp.path().join("entry");

        let lock_path = manager.lock_path(&entry);
        {
            let _guard = manager.acquire(&entry).unwrap();
            assert!(lock_path.exists());
        }

        // Reacquirable after the guard drops
        let _guard = manager.acquire(&entry).unwrap();
    }

    #[test]
    fn different_entries_lock_independently() {
        let temp = TempDir::new().unwrap();
        let manager = LockManager::new(temp.path().join("locks"));

        let _a = manager.acquire(&temp.path().join("a")).unwrap();
        // Holding `a` must not block `b`
        let _b = manager.acquire(&temp.path().join("b")).unwrap();
    }

    #[test]
    fn released_on_panic() {
        let temp = TempDir::new().unwrap();
        let lock_dir = temp.path().join("locks");
        let entry = temp.path().join("entry");

        let manager = LockManager::new(&lock_dir);
        let result = std::panic::catch_unwind(|| {
            let _guard = manager.acquire(&entry).unwrap();
            panic!("mid-operation failure");
        });
        assert!(result.is_err());

        let _guard = LockManager::new(&lock_dir).acquire(&entry).unwrap();
    }
}

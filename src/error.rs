//! Error types for mnemo
//!
//! All modules use `MnemoResult<T>` as their return type. Failures inside
//! the caching path are caught at the orchestrator boundary and downgraded
//! to warnings; only argument-binding failures and the by-id APIs surface
//! errors to callers.

use std::path::PathBuf;
use thiserror::Error;

use crate::keys::InputKey;

/// Result type alias for mnemo operations
pub type MnemoResult<T> = Result<T, MnemoError>;

/// All errors that can occur in mnemo
#[derive(Error, Debug)]
pub enum MnemoError {
    // Key derivation errors
    #[error("failed to derive input key: {reason}")]
    KeyDerivation { reason: String },

    #[error("invalid signature: {reason}")]
    SignatureInvalid { reason: String },

    // Backend errors
    #[error("cache read failed: {context}")]
    Read {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache write failed: {context}")]
    Write {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache metadata at {path}: {reason}")]
    MetadataInvalid { path: PathBuf, reason: String },

    #[error("input key not found in cache: {0}")]
    InputKeyNotFound(InputKey),

    // Lock errors
    #[error("failed to acquire cache lock {path}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("failed to deserialize cached output: {reason}")]
    Load { reason: String },

    #[error("failed to serialize output for caching: {reason}")]
    Dump { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Enablement errors
    #[error("cache is not enabled: {0}")]
    CacheNotEnabled(String),
}

impl MnemoError {
    /// Create a read error with context
    pub fn read(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Read {
            context: context.into(),
            source,
        }
    }

    /// Create a write error with context
    pub fn write(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Write {
            context: context.into(),
            source,
        }
    }

    /// Create a key derivation error
    pub fn key_derivation(reason: impl Into<String>) -> Self {
        Self::KeyDerivation {
            reason: reason.into(),
        }
    }

    /// Whether this error signals a well-formed but absent entry,
    /// as opposed to an I/O or data failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InputKeyNotFound(_))
    }
}

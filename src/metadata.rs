//! Per-entry cache metadata
//!
//! Every cache entry carries a `metadata.json` describing the stored
//! output: content ids, timestamps, the serializer's format tag, and
//! best-effort git provenance of the writing process.

use std::process::Command;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Serializer description stored alongside the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializerInfo {
    /// File extension used to name the output file
    pub extension: String,
}

/// Metadata persisted for one cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Digest of the bound arguments this entry was written for
    pub input_id: String,

    /// Digest of the serialized output bytes
    pub output_id: String,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// Updated on every successful read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Codec used to serialize the output
    pub serializer: SerializerInfo,

    /// Commit hash of the writing process's checkout, if available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,

    /// Whether that checkout had no uncommitted changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_clean: Option<bool>,
}

impl EntryMetadata {
    /// Assemble metadata for a fresh entry, stamping creation time and
    /// best-effort git provenance
    pub fn new(
        input_id: impl Into<String>,
        output_id: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        let provenance = git_provenance();
        Self {
            input_id: input_id.into(),
            output_id: output_id.into(),
            created_at: Utc::now(),
            last_accessed_at: None,
            serializer: SerializerInfo {
                extension: extension.into(),
            },
            git_commit_hash: provenance.commit_hash.clone(),
            git_clean: provenance.clean,
        }
    }

    /// Name of the output file this metadata refers to
    pub fn output_filename(&self) -> String {
        format!("{}.{}", self.output_id, self.serializer.extension)
    }
}

#[derive(Debug, Default)]
struct GitProvenance {
    commit_hash: Option<String>,
    clean: Option<bool>,
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Git state of the current working directory, captured once per process.
/// Absent (not an error) when git is unavailable or this is not a checkout.
fn git_provenance() -> &'static GitProvenance {
    static PROVENANCE: OnceLock<GitProvenance> = OnceLock::new();
    PROVENANCE.get_or_init(|| {
        let commit_hash = git_output(&["rev-parse", "HEAD"]);
        if commit_hash.is_none() {
            debug!("git provenance unavailable, omitting from cache metadata");
        }
        let clean = match &commit_hash {
            Some(_) => git_output(&["status", "--porcelain"]).map(|s| s.is_empty()),
            None => None,
        };
        GitProvenance { commit_hash, clean }
    })
}

//! Cache keys and content digests
//!
//! A cacheable function is identified by a stable `function_id` string;
//! one cached call is identified by that id plus a digest of its bound
//! arguments. Same bound arguments = same entry.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::binding::BoundArgs;
use crate::error::{MnemoError, MnemoResult};

/// Number of hex characters in a short content digest (8 bytes)
pub const SHORT_DIGEST_LEN: usize = 16;

/// Identifies a cacheable function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    /// Stable function identity, default `<module path>:<function name>`
    pub function_id: String,
}

impl FunctionKey {
    /// Create a function key from an identity string
    pub fn new(function_id: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function_id)
    }
}

/// Identifies one cached call of a cacheable function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputKey {
    /// Identity of the function this entry belongs to
    pub function_id: String,
    /// Short digest of the bound-and-defaulted arguments
    pub input_id: String,
}

impl InputKey {
    /// Create an input key from its parts
    pub fn new(function_id: impl Into<String>, input_id: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            input_id: input_id.into(),
        }
    }

    /// The key of the function this entry belongs to
    pub fn function_key(&self) -> FunctionKey {
        FunctionKey::new(self.function_id.clone())
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.function_id, self.input_id)
    }
}

/// Full SHA256 hex digest of arbitrary bytes
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Short content digest: first 8 bytes of SHA256, hex encoded (16 chars)
pub fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..SHORT_DIGEST_LEN / 2])
}

/// Digest of one argument value via its canonical JSON serialization.
///
/// Nested structures (arrays, objects) are supported by serializing before
/// digesting; serde_json objects are ordered maps, so the bytes are stable
/// regardless of insertion order.
fn hash_value(value: &Value) -> MnemoResult<String> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| MnemoError::key_derivation(format!("unhashable argument value: {e}")))?;
    Ok(short_digest(&bytes))
}

/// Derive an `input_id` from bound arguments.
///
/// Arguments whose name satisfies `exclude` never affect the id. The
/// remaining (name, value-digest) pairs are sorted by name, so the result is
/// invariant to call-site argument order and positional/keyword style.
pub fn derive_input_id(
    bound: &BoundArgs,
    exclude: &(dyn Fn(&str) -> bool + Send + Sync),
) -> MnemoResult<String> {
    let mut hashed: Vec<(String, String)> = bound
        .iter()
        .filter(|(name, _)| !exclude(name))
        .map(|(name, value)| Ok((name.to_string(), hash_value(value)?)))
        .collect::<MnemoResult<_>>()?;
    hashed.sort_by(|a, b| a.0.cmp(&b.0));

    let bytes = serde_json::to_vec(&hashed)
        .map_err(|e| MnemoError::key_derivation(format!("failed to encode argument hashes: {e}")))?;
    Ok(short_digest(&bytes))
}

/// Default exclusion predicate: argument names starting with an underscore
/// do not participate in the input id.
pub fn default_exclude(name: &str) -> bool {
    name.starts_with('_')
}

/// Build a function identity string from the invoking module path and a
/// function name: `function_id!(foo)` expands to `"my_crate::my_mod:foo"`.
#[macro_export]
macro_rules! function_id {
    ($name:ident) => {
        concat!(module_path!(), ":", stringify!($name))
    };
}

//! Output serialization contract
//!
//! The engine is agnostic to the concrete codec: it serializes outputs to
//! bytes before writing and deserializes bytes after reading, and uses the
//! codec's format tag to name stored files.

mod json;

pub use json::JsonSerializer;

use crate::error::MnemoResult;

/// Turns an output value into bytes and back
pub trait Serializer<T>: Send + Sync {
    /// Format tag used to name stored output files (file extension)
    fn extension(&self) -> &str;

    /// Serialize a value to bytes
    fn serialize(&self, value: &T) -> MnemoResult<Vec<u8>>;

    /// Deserialize a value from bytes
    fn deserialize(&self, bytes: &[u8]) -> MnemoResult<T>;
}

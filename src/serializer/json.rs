//! JSON codec for cached outputs

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MnemoResult;
use crate::serializer::Serializer;

/// Serializes outputs as pretty-printed JSON, stored as `.json` files
#[derive(Debug)]
pub struct JsonSerializer<T> {
    _output: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    /// Create a JSON serializer
    pub fn new() -> Self {
        Self {
            _output: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Serializer<T> for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn extension(&self) -> &str {
        "json"
    }

    fn serialize(&self, value: &T) -> MnemoResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> MnemoResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip() {
        let serializer = JsonSerializer::<serde_json::Value>::new();
        let value = json!({"a": 1, "nested": [1, 2, 3]});

        let bytes = serializer.serialize(&value).unwrap();
        let back = serializer.deserialize(&bytes).unwrap();

        assert_eq!(back, value);
    }

    #[test]
    fn extension_tag() {
        let serializer = JsonSerializer::<i64>::new();
        assert_eq!(serializer.extension(), "json");
    }

    #[test]
    fn deserialize_garbage_fails() {
        let serializer = JsonSerializer::<i64>::new();
        assert!(serializer.deserialize(b"not json").is_err());
    }
}

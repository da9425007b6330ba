//! Pluggable record serialization.
//!
//! The store treats serialization as an opaque capability: encode a value
//! to bytes, decode bytes back. The same codec also encodes derived keys
//! for secondary-index bucketing, so two structurally equal keys must
//! always encode to the same bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{LarderError, Result};

/// Encodes and decodes values for storage.
pub trait Codec {
    /// Encodes a value to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    /// Decodes a value from bytes.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON codec backed by `serde_json`.
///
/// Note that `serde_json` only accepts string and integer map keys, so a
/// store using this codec needs a string or integer primary-key type;
/// richer key shapes call for a different [`Codec`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| LarderError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| LarderError::Serialization(e.to_string()))
    }
}

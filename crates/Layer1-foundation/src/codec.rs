//! Payload codec
//!
//! Values cross the tier boundary as `serde_json::Value` and are then encoded
//! by a [`Codec`]. The encoded length is the entry's size for every capacity
//! check, so swapping the codec swaps the size accounting with it.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Anything the engine can cache
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Pluggable payload serializer
pub trait Codec: Debug + Send + Sync {
    /// Stored alongside each persistent record
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// Compact JSON encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Payload ready to be stored
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub json: Value,
    pub bytes: Vec<u8>,
}

impl EncodedPayload {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Serialize `value` through `codec`
pub fn encode_payload<V: Serialize>(codec: &dyn Codec, value: &V) -> Result<EncodedPayload> {
    let json = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
    let bytes = codec.encode(&json)?;
    Ok(EncodedPayload { json, bytes })
}

/// Deserialize bytes produced by `encode_payload`
pub fn decode_payload<V: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> Result<V> {
    let json = codec.decode(bytes)?;
    serde_json::from_value(json).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encoded size of `value`, 0 if it cannot be serialized
pub fn estimate_size<V: Serialize>(codec: &dyn Codec, value: &V) -> usize {
    encode_payload(codec, value).map(|p| p.size()).unwrap_or(0)
}

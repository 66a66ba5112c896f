//! Codec Adapters
//!
//! Value codecs (serialization stage of the pipeline) and key codecs
//! (application key to store key).

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::ports::{KeyCodec, ValueCodec};
use crate::error::{Error, Result};

// =============================================================================
// Value Codecs
// =============================================================================

/// JSON serialization via serde_json.
pub struct JsonCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> JsonCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for JsonCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ValueCodec<V> for JsonCodec<V>
where
    V: Serialize + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<V> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Raw bytes, no serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ValueCodec<Bytes> for BytesCodec {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn encode(&self, value: &Bytes) -> Result<Vec<u8>> {
        Ok(value.to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// UTF-8 strings stored as their bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl ValueCodec<String> for StringCodec {
    fn name(&self) -> &'static str {
        "string"
    }

    fn encode(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<String> {
        String::from_utf8(data.to_vec()).map_err(|e| Error::Serialization(e.to_string()))
    }
}

// =============================================================================
// Key Codecs
// =============================================================================

/// Store key from `ToString`, with an optional prefix.
#[derive(Debug, Clone, Default)]
pub struct DisplayKeyCodec {
    prefix: String,
}

impl DisplayKeyCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl<K: ToString> KeyCodec<K> for DisplayKeyCodec {
    fn encode(&self, key: &K) -> Result<String> {
        let raw = key.to_string();
        if raw.is_empty() {
            return Ok(raw);
        }
        Ok(format!("{}{}", self.prefix, raw))
    }
}

/// Store key from the JSON encoding of the key, for structured keys.
#[derive(Debug, Clone, Default)]
pub struct JsonKeyCodec {
    prefix: String,
}

impl JsonKeyCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl<K: Serialize> KeyCodec<K> for JsonKeyCodec {
    fn encode(&self, key: &K) -> Result<String> {
        let raw = serde_json::to_string(key)?;
        Ok(format!("{}{}", self.prefix, raw))
    }
}

//! Value Pipeline
//!
//! Converts application values to the bytes a tier persists and back.
//!
//! ```text
//! write:  value ──serialize──▶ bytes ──compress──▶ stored
//!         None  ──────────────────────────────────▶ sentinel | skip
//! read:   stored == sentinel ─────────────────────▶ CacheValue::empty()
//!         stored ──decompress──▶ bytes ──deserialize──▶ CacheValue::of(v)
//! ```
//!
//! Each call is pure; no state is kept between calls.

use std::sync::Arc;

use bytes::Bytes;

use super::compression::Compressor;
use crate::domain::ports::ValueCodec;
use crate::domain::value::CacheValue;
use crate::error::Result;

/// Default negative-cache sentinel bytes
pub const DEFAULT_NULL_SENTINEL: &[u8] = b"\x00cascache:null\x00";

/// Serialize → compress on write, decompress → deserialize on read.
pub struct ValuePipeline<V> {
    codec: Arc<dyn ValueCodec<V>>,
    compressor: Option<Arc<dyn Compressor>>,
    null_sentinel: Option<Bytes>,
}

impl<V> Clone for ValuePipeline<V> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            compressor: self.compressor.clone(),
            null_sentinel: self.null_sentinel.clone(),
        }
    }
}

impl<V> ValuePipeline<V> {
    /// Pipeline with serialization only
    pub fn new(codec: Arc<dyn ValueCodec<V>>) -> Self {
        Self {
            codec,
            compressor: None,
            null_sentinel: None,
        }
    }

    /// Enable the compression stage
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// Enable negative caching with the default sentinel
    pub fn with_negative_caching(self) -> Self {
        self.with_null_sentinel(Bytes::from_static(DEFAULT_NULL_SENTINEL))
    }

    /// Enable negative caching with a custom sentinel
    pub fn with_null_sentinel(mut self, sentinel: Bytes) -> Self {
        self.null_sentinel = Some(sentinel);
        self
    }

    /// Whether empty values are cached
    pub fn negative_caching(&self) -> bool {
        self.null_sentinel.is_some()
    }

    /// Sentinel bytes, when negative caching is enabled
    pub fn null_sentinel(&self) -> Option<&Bytes> {
        self.null_sentinel.as_ref()
    }

    /// Codec identifier
    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Encode a value for storage.
    ///
    /// Returns `Ok(None)` when there is nothing to store: the value is absent
    /// and negative caching is disabled.
    pub fn encode(&self, value: Option<&V>) -> Result<Option<Bytes>> {
        let Some(value) = value else {
            return Ok(self.null_sentinel.clone());
        };

        let serialized = self.codec.encode(value)?;
        let stored = match &self.compressor {
            Some(compressor) => compressor.compress(&serialized)?,
            None => serialized,
        };
        Ok(Some(Bytes::from(stored)))
    }

    /// Decode stored bytes into a present lookup result.
    pub fn decode(&self, stored: &[u8]) -> Result<CacheValue<V>> {
        if let Some(sentinel) = &self.null_sentinel {
            if stored == sentinel.as_ref() {
                return Ok(CacheValue::empty());
            }
        }

        let value = match &self.compressor {
            Some(compressor) => {
                let raw = compressor.decompress(stored)?;
                self.codec.decode(&raw)?
            }
            None => self.codec.decode(stored)?,
        };
        Ok(CacheValue::of(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::codecs::{JsonCodec, StringCodec};
    use crate::cache::compression::{CompressionAlgorithm, Lz4Compressor};
    use proptest::prelude::*;

    fn json_pipeline() -> ValuePipeline<Vec<u32>> {
        ValuePipeline::new(Arc::new(JsonCodec::new()))
    }

    #[test]
    fn test_absent_without_negative_caching_is_not_stored() {
        let pipeline = json_pipeline();
        assert!(!pipeline.negative_caching());
        assert_eq!(pipeline.encode(None).unwrap(), None);
    }

    #[test]
    fn test_absent_with_negative_caching_stores_sentinel() {
        let pipeline = json_pipeline().with_negative_caching();
        let stored = pipeline.encode(None).unwrap().unwrap();
        assert_eq!(stored.as_ref(), DEFAULT_NULL_SENTINEL);

        let decoded = pipeline.decode(&stored).unwrap();
        assert!(!decoded.has_value());
    }

    #[test]
    fn test_sentinel_never_reaches_the_codec() {
        // The sentinel is neither valid LZ4 nor valid JSON.
        let pipeline = json_pipeline()
            .with_compressor(Arc::new(Lz4Compressor::new()))
            .with_null_sentinel(Bytes::from_static(b"<nil>"));
        let decoded = pipeline.decode(b"<nil>").unwrap();
        assert_eq!(decoded, CacheValue::empty());
    }

    #[test]
    fn test_sentinel_without_negative_caching_is_a_codec_error() {
        let pipeline = json_pipeline();
        assert!(pipeline.decode(DEFAULT_NULL_SENTINEL).unwrap_err().is_codec());
    }

    #[test]
    fn test_compression_stage_applies() {
        let plain = ValuePipeline::new(Arc::new(StringCodec));
        let packed = ValuePipeline::new(Arc::new(StringCodec))
            .with_compressor(CompressionAlgorithm::Lz4.compressor());
        let value = "abc".repeat(200);

        let plain_bytes = plain.encode(Some(&value)).unwrap().unwrap();
        let packed_bytes = packed.encode(Some(&value)).unwrap().unwrap();
        assert!(packed_bytes.len() < plain_bytes.len());
        assert_eq!(packed.decode(&packed_bytes).unwrap().into_value(), Some(value));
    }

    #[test]
    fn test_corrupt_compressed_value_is_codec_error() {
        let pipeline = json_pipeline().with_compressor(Arc::new(Lz4Compressor::new()));
        assert!(pipeline.decode(&[16, 0, 0, 0, 0xff]).unwrap_err().is_codec());
    }

    proptest! {
        #[test]
        fn prop_compressed_json_preserves_values(values in proptest::collection::vec(any::<u32>(), 0..64)) {
            let pipeline = json_pipeline()
                .with_compressor(Arc::new(Lz4Compressor::new()))
                .with_negative_caching();
            let stored = pipeline.encode(Some(&values)).unwrap().unwrap();
            prop_assert_ne!(stored.as_ref(), DEFAULT_NULL_SENTINEL);
            prop_assert_eq!(pipeline.decode(&stored).unwrap().into_value(), Some(values));
        }
    }
}

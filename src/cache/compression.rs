//! Value Compression
//!
//! Optional compression stage of the value pipeline. LZ4 block format with a
//! size prefix, so decompression needs no out-of-band length.
//!
//! # Example
//!
//! ```
//! use cascache::cache::compression::{CompressionAlgorithm, Compressor};
//!
//! let lz4 = CompressionAlgorithm::Lz4.compressor();
//! let data = b"Hello, this is test data that should compress well! Hello, this is test data.";
//!
//! let compressed = lz4.compress(data).unwrap();
//! let restored = lz4.decompress(&compressed).unwrap();
//! assert_eq!(restored.as_slice(), &data[..]);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - fast compression
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Parse a provider id
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(CompressionAlgorithm::None),
            "lz4" => Some(CompressionAlgorithm::Lz4),
            _ => None,
        }
    }

    /// Build the compressor for this algorithm
    pub fn compressor(&self) -> Arc<dyn Compressor> {
        match self {
            CompressionAlgorithm::None => Arc::new(NoopCompressor),
            CompressionAlgorithm::Lz4 => Arc::new(Lz4Compressor::new()),
        }
    }

    /// Get list of available algorithms
    pub fn available_algorithms() -> Vec<Self> {
        vec![Self::None, Self::Lz4]
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Get the algorithm identifier
    fn algorithm(&self) -> CompressionAlgorithm;

    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

// =============================================================================
// No-Op Compressor
// =============================================================================

/// Pass-through compressor (no compression)
pub struct NoopCompressor;

impl Compressor for NoopCompressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::None
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

// =============================================================================
// LZ4 Compressor
// =============================================================================

/// LZ4 compressor (fast compression)
pub struct Lz4Compressor {
    level: Option<i32>,
}

impl Lz4Compressor {
    /// Create new LZ4 compressor in fast mode
    pub fn new() -> Self {
        Self { level: None }
    }

    /// Create with a high-compression level
    pub fn with_level(level: i32) -> Self {
        Self { level: Some(level) }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn algorithm(&self) -> CompressionAlgorithm {
        CompressionAlgorithm::Lz4
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mode = self
            .level
            .map(lz4::block::CompressionMode::HIGHCOMPRESSION);
        lz4::block::compress(data, mode, true).map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_lz4_roundtrip() {
        let compressor = Lz4Compressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert!(compressed.len() < TEST_DATA.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_lz4_high_compression_roundtrip() {
        let compressor = Lz4Compressor::with_level(9);
        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert_eq!(compressor.decompress(&compressed).unwrap(), TEST_DATA);
    }

    #[test]
    fn test_noop_passthrough() {
        let compressor = NoopCompressor;

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert_eq!(compressed, TEST_DATA);
        assert_eq!(compressor.decompress(&compressed).unwrap(), TEST_DATA);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let compressor = Lz4Compressor::new();
        let err = compressor.decompress(&[16, 0, 0, 0, 0xff, 0xff]).unwrap_err();
        assert!(err.is_codec());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::None.name(), "none");
        assert_eq!(CompressionAlgorithm::Lz4.name(), "lz4");
        assert_eq!(CompressionAlgorithm::from_name("LZ4"), Some(CompressionAlgorithm::Lz4));
        assert_eq!(CompressionAlgorithm::from_name("zstd"), None);
    }

    #[test]
    fn test_factory_matches_algorithm() {
        for alg in CompressionAlgorithm::available_algorithms() {
            assert_eq!(alg.compressor().algorithm(), alg);
        }
    }
}

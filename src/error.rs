//! Error types for the cache engine

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// A required argument was missing or empty
    #[error("Invalid argument '{param}' for operation '{operation}'")]
    InvalidArgument {
        param: &'static str,
        operation: &'static str,
    },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Value or key (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Load / Store Errors
    // =========================================================================
    /// The caller-supplied loader failed
    #[error("Loader failed for key {key}: {source}")]
    Load {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A tier store operation failed
    #[error("Store error in {store}: {reason}")]
    Store { store: String, reason: String },

    /// Timed out waiting for the per-key load lock
    #[error("Timed out after {waited:?} waiting for load lock on key {key}")]
    LockTimeout { key: String, waited: Duration },

    // =========================================================================
    // Sync Errors
    // =========================================================================
    /// Publishing or subscribing a sync notification failed
    #[error("Sync transport error: {0}")]
    SyncTransport(String),

    // =========================================================================
    // Wiring Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider id could not be resolved in the registry
    #[error("Unknown {kind} provider: {id}")]
    UnknownProvider { kind: &'static str, id: String },
}

impl Error {
    /// Shorthand for a missing/empty argument
    pub fn invalid_argument(param: &'static str, operation: &'static str) -> Self {
        Error::InvalidArgument { param, operation }
    }

    /// Returns true for serialization and (de)compression failures
    pub fn is_codec(&self) -> bool {
        matches!(
            self,
            Error::Serialization(_)
                | Error::CompressionFailed { .. }
                | Error::DecompressionFailed { .. }
        )
    }

    /// Returns true if the error came from a loader
    pub fn is_load(&self) -> bool {
        matches!(self, Error::Load { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

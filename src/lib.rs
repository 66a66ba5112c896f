//! cascache - Multi-Tier Cache Engine
//!
//! Composes one to three key-value stores (an in-process tier in front of
//! one or two shared tiers) into a single cache that reads fastest-first,
//! promotes hits into faster tiers and writes slowest-first.
//!
//! # Architecture
//!
//! ```text
//! get ─▶ Tier 0 ─miss─▶ Tier 1 ─miss─▶ Tier 2 ─miss─▶ containment ─▶ loader
//!          ▲              │               │                            │
//!          └── promote ───┴───────────────┘      write back ◀─────────┘
//! ```
//!
//! # Features
//!
//! - Single-flight load-through: one loader call per key at a time
//! - Negative caching of confirmed-absent keys behind a sentinel
//! - Penetration guard consulted before any loader runs
//! - Cross-instance invalidation over a publish/subscribe transport
//! - Refresh-ahead of recently read keys
//! - Optional LZ4 value compression
//!
//! # Modules
//!
//! - [`adapters`] - Store, codec, containment and sync adapters
//! - [`cache`] - The tiered cache engine
//! - [`config`] - Declarative cache settings
//! - [`domain`] - Ports, values and sync messages
//! - [`error`] - Error types
//! - [`logging`] - Tracing subscriber setup
//! - [`registry`] - Provider ids resolved into adapters

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod registry;

// Re-export commonly used types
pub use cache::{Cache, CacheBuilder, CompressionAlgorithm, MemoryStore, RefreshConfig};
pub use config::CacheSettings;
pub use domain::ports::{CacheLoader, ContainmentPredicate, KeyCodec, Store, ValueCodec};
pub use domain::{CacheValue, SyncMessage, SyncOp};
pub use error::{Error, Result};
pub use logging::{init_logging, LoggingConfig};
pub use registry::ProviderRegistry;

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

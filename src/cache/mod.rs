//! Tiered Cache Engine
//!
//! Composes one to three stores into a single cache with stampede-protected
//! load-through, refresh-ahead and cross-instance invalidation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              Cache                                        │
//! │   key codec ─▶ refresh tracker ─▶ TieredStore ─▶ value pipeline          │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Tier 0 (in-process)  │ Tier 1 (shared)      │ Tier 2 (shared, durable)  │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌────────────────────┐    │
//! │  │ MemoryStore    │   │ │ Store adapter  │   │ │ Store adapter      │    │
//! │  │ (64-way shard) │   │ │                │   │ │                    │    │
//! │  └────────────────┘   │ └────────────────┘   │ └────────────────────┘    │
//! │         ▲                       │                        │               │
//! │         └──── promotion ────────┴────────────────────────┘               │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  KeyLockRegistry (single-flight)  │  SyncNotifier / SyncConsumer         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Reads promote into every faster tier before returning
//! - Writes, evicts and clears go slowest tier first
//! - One loader call per key at a time within a process
//! - Sync is best-effort; peers only ever evict from their fastest tier

mod builder;
mod entry;
mod guard;
mod levels;
mod manager;
mod metrics;
mod pipeline;
mod refresh;
mod shard;
mod sync;
pub mod compression;
pub mod memory;

pub use builder::{CacheBuilder, CacheConfig};
pub use compression::{CompressionAlgorithm, Compressor, Lz4Compressor, NoopCompressor};
pub use entry::{EntryMetadata, StoredEntry};
pub use guard::{KeyLockRegistry, LockHandle};
pub use levels::{TierLayout, TieredStore};
pub use manager::Cache;
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use pipeline::{ValuePipeline, DEFAULT_NULL_SENTINEL};
pub use refresh::{RefreshConfig, RefreshConsumer, RefreshOutcome, RefreshTracker};
pub use shard::{Shard, ShardedMap};
pub use sync::{SyncConsumer, SyncNotifier};

/// Maximum number of tiers in one cache
pub const MAX_TIERS: usize = 3;

/// Cache line size for alignment (x86-64)
pub const CACHE_LINE_SIZE: usize = 64;

/// Default in-process tier capacity (256MB)
pub const DEFAULT_MEMORY_CAPACITY: u64 = 256 * 1024 * 1024;

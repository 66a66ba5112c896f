//! Infrastructure Adapters
//!
//! Concrete implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  Store │ ValueCodec │ KeyCodec │ Containment │ Sync       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ SharedMemoryStore │ JsonCodec │ DisplayKeyCodec │ KnownKeys│ │
//! │  │ BroadcastBus │ LoggingSyncPublisher │ InMemorySyncCollector│ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cascache::adapters::{BroadcastBus, SharedMemoryStore};
//!
//! // One bus and one shared store model two processes on one remote tier
//! let bus = Arc::new(BroadcastBus::new());
//! let remote = Arc::new(SharedMemoryStore::new("remote"));
//! ```

pub mod broadcast;
pub mod codecs;
pub mod containment;
pub mod event_publisher;
pub mod shared_store;

pub use broadcast::BroadcastBus;
pub use codecs::{BytesCodec, DisplayKeyCodec, JsonCodec, JsonKeyCodec, StringCodec};
pub use containment::{AllowAll, KnownKeys};
pub use event_publisher::{CompositeSyncPublisher, InMemorySyncCollector, LoggingSyncPublisher};
pub use shared_store::{SharedMemoryStore, SharedStoreStats};

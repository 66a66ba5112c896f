//! Domain Layer
//!
//! Value types, sync messages and the ports the cache engine is written
//! against.
//!
//! - [`value`] - `CacheValue`, the present/empty lookup outcome
//! - [`events`] - `SyncMessage`, cross-instance notifications
//! - [`ports`] - Store, loader, codec, containment and sync contracts

pub mod events;
pub mod ports;
pub mod value;

pub use events::{sync_channel, SyncMessage, SyncOp};
pub use ports::{
    CacheLoader, ContainmentPredicate, FnLoader, KeyCodec, MessageHandler, Store, SyncPublisher,
    SyncSubscriber, ValueCodec,
};
pub use value::CacheValue;

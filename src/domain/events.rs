//! Sync Messages
//!
//! Cross-instance notifications raised after a write, evict or clear has been
//! applied to every tier. Peers use them to invalidate their own fast tier.
//!
//! # Wire format
//!
//! Messages travel as JSON:
//!
//! ```text
//! {"origin":"3f1c...","cache":"users","op":"EVICT","keys":["u:1"],"timestamp":"..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Kind of operation a sync message reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOp {
    Put,
    PutAll,
    Evict,
    EvictAll,
    Clear,
}

impl SyncOp {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            SyncOp::Put => "PUT",
            SyncOp::PutAll => "PUT_ALL",
            SyncOp::Evict => "EVICT",
            SyncOp::EvictAll => "EVICT_ALL",
            SyncOp::Clear => "CLEAR",
        }
    }
}

impl std::fmt::Display for SyncOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A cross-instance sync notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Instance that performed the write
    pub origin: Uuid,
    /// Cache the write applies to
    pub cache: String,
    /// Operation kind
    pub op: SyncOp,
    /// Affected store keys (absent for CLEAR)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    /// When the message was produced
    pub timestamp: DateTime<Utc>,
}

impl SyncMessage {
    /// Build a keyed message (PUT, PUT_ALL, EVICT, EVICT_ALL).
    pub fn keyed(origin: Uuid, cache: impl Into<String>, op: SyncOp, keys: Vec<String>) -> Self {
        Self {
            origin,
            cache: cache.into(),
            op,
            keys: Some(keys),
            timestamp: Utc::now(),
        }
    }

    /// Build a CLEAR message.
    pub fn clear(origin: Uuid, cache: impl Into<String>) -> Self {
        Self {
            origin,
            cache: cache.into(),
            op: SyncOp::Clear,
            keys: None,
            timestamp: Utc::now(),
        }
    }

    /// Affected keys, empty for CLEAR.
    pub fn keys(&self) -> &[String] {
        self.keys.as_deref().unwrap_or(&[])
    }

    /// Encode for the transport.
    pub fn to_bytes(&self) -> Result<bytes::Bytes> {
        Ok(bytes::Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode from transport bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Channel a cache publishes on and subscribes to.
///
/// `cascache:<cache>` without an infix, `cascache:<infix>:<cache>` with one.
pub fn sync_channel(infix: Option<&str>, cache_name: &str) -> String {
    match infix {
        Some(infix) if !infix.is_empty() => format!("cascache:{}:{}", infix, cache_name),
        _ => format!("cascache:{}", cache_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_wire_names() {
        let json = serde_json::to_string(&SyncOp::EvictAll).unwrap();
        assert_eq!(json, "\"EVICT_ALL\"");
        assert_eq!(SyncOp::PutAll.to_string(), "PUT_ALL");
    }

    #[test]
    fn test_clear_has_no_keys() {
        let msg = SyncMessage::clear(Uuid::new_v4(), "users");
        assert!(msg.keys.is_none());
        assert!(msg.keys().is_empty());

        let json = String::from_utf8(msg.to_bytes().unwrap().to_vec()).unwrap();
        assert!(!json.contains("keys"));
    }

    #[test]
    fn test_message_survives_transport_encoding() {
        let origin = Uuid::new_v4();
        let msg = SyncMessage::keyed(origin, "users", SyncOp::Evict, vec!["u:1".into()]);

        let decoded = SyncMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.origin, origin);
        assert_eq!(decoded.op, SyncOp::Evict);
        assert_eq!(decoded.keys(), ["u:1".to_string()]);
    }

    #[test]
    fn test_malformed_payload_is_codec_error() {
        let err = SyncMessage::from_bytes(b"not json").unwrap_err();
        assert!(err.is_codec());
    }

    #[test]
    fn test_channel_naming() {
        assert_eq!(sync_channel(None, "users"), "cascache:users");
        assert_eq!(sync_channel(Some(""), "users"), "cascache:users");
        assert_eq!(sync_channel(Some("prod"), "users"), "cascache:prod:users");
    }
}

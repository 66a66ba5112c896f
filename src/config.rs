//! Declarative cache settings
//!
//! Serde records describing a cache by provider ids, parsed from YAML or
//! JSON and resolved through a [`ProviderRegistry`](crate::registry::ProviderRegistry).
//!
//! ```yaml
//! name: users
//! tiers:
//!   - provider: memory
//!     capacity_bytes: 67108864
//!     ttl_ms: 30000
//!   - provider: shared-memory
//!     namespace: redis-main
//! codec: json
//! compression: lz4
//! negative_caching: true
//! sync:
//!   transport: broadcast
//!   infix: prod
//! refresh:
//!   interval_ms: 60000
//!   stop_after_access_ms: 600000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{RefreshConfig, MAX_TIERS};
use crate::error::{Error, Result};

/// One tier, fastest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    /// Store provider id
    pub provider: String,
    /// Sharing scope for shared providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Byte capacity for bounded providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,
    /// Entry time-to-live for providers that support expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl TierSettings {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            namespace: None,
            capacity_bytes: None,
            ttl_ms: None,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

fn default_true() -> bool {
    true
}

/// Cross-instance sync settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Transport provider id
    pub transport: String,
    /// Channel namespace segment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infix: Option<String>,
    #[serde(default = "default_true")]
    pub publish: bool,
    #[serde(default = "default_true")]
    pub subscribe: bool,
}

fn default_sweep_period_ms() -> u64 {
    5_000
}

fn default_max_concurrent() -> usize {
    8
}

/// Refresh-ahead settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSettings {
    pub interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_after_access_ms: Option<u64>,
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl RefreshSettings {
    pub fn to_config(&self) -> RefreshConfig {
        RefreshConfig {
            refresh_interval: Duration::from_millis(self.interval_ms),
            stop_after_access: self.stop_after_access_ms.map(Duration::from_millis),
            sweep_period: Duration::from_millis(self.sweep_period_ms),
            max_concurrent: self.max_concurrent,
        }
    }
}

fn default_compression() -> String {
    "none".to_string()
}

/// A cache described by provider ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub name: String,
    /// Tiers ordered fastest first
    pub tiers: Vec<TierSettings>,
    /// Value codec id; when absent the codec is set on the builder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Compressor id
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default)]
    pub negative_caching: bool,
    /// Bound on the load-lock wait; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_lock_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<RefreshSettings>,
}

impl CacheSettings {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::Config(format!("invalid cache settings: {}", e)))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid cache settings: {}", e)))
    }

    pub fn load_lock_timeout(&self) -> Option<Duration> {
        self.load_lock_timeout_ms.map(Duration::from_millis)
    }

    /// Check structural constraints before wiring
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("cache name must not be empty".into()));
        }
        if self.tiers.is_empty() || self.tiers.len() > MAX_TIERS {
            return Err(Error::Config(format!(
                "cache {} needs between 1 and {} tiers, got {}",
                self.name,
                MAX_TIERS,
                self.tiers.len()
            )));
        }
        if let Some(tier) = self.tiers.iter().find(|t| t.provider.trim().is_empty()) {
            return Err(Error::Config(format!(
                "cache {} has a tier without a provider ({:?})",
                self.name, tier
            )));
        }
        if self.load_lock_timeout_ms == Some(0) {
            return Err(Error::Config("load lock timeout must be non-zero".into()));
        }
        if let Some(refresh) = &self.refresh {
            refresh.to_config().validate()?;
        }
        if let Some(sync) = &self.sync {
            if sync.transport.trim().is_empty() {
                return Err(Error::Config("sync transport must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const YAML: &str = r#"
name: users
tiers:
  - provider: memory
    capacity_bytes: 1048576
    ttl_ms: 30000
  - provider: shared-memory
    namespace: main
codec: json
compression: lz4
negative_caching: true
load_lock_timeout_ms: 2000
sync:
  transport: broadcast
  infix: prod
refresh:
  interval_ms: 60000
  stop_after_access_ms: 600000
"#;

    #[test]
    fn test_parse_yaml() {
        let settings = CacheSettings::from_yaml(YAML).unwrap();
        assert_eq!(settings.name, "users");
        assert_eq!(settings.tiers.len(), 2);
        assert_eq!(settings.tiers[0].ttl(), Some(Duration::from_secs(30)));
        assert_eq!(settings.tiers[1].namespace.as_deref(), Some("main"));
        assert_eq!(settings.compression, "lz4");
        assert_eq!(settings.load_lock_timeout(), Some(Duration::from_secs(2)));

        let sync = settings.sync.as_ref().unwrap();
        assert!(sync.publish && sync.subscribe);

        let refresh = settings.refresh.as_ref().unwrap().to_config();
        assert_eq!(refresh.sweep_period, Duration::from_secs(5));
        assert_eq!(refresh.max_concurrent, 8);
        settings.validate().unwrap();
    }

    #[test]
    fn test_parse_minimal_json() {
        let settings =
            CacheSettings::from_json(r#"{"name":"n","tiers":[{"provider":"memory"}]}"#).unwrap();
        assert_eq!(settings.compression, "none");
        assert!(!settings.negative_caching);
        assert!(settings.sync.is_none());
        settings.validate().unwrap();
    }

    #[test]
    fn test_parse_error_is_config_error() {
        assert_matches!(CacheSettings::from_yaml("name: ["), Err(Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut settings = CacheSettings::from_yaml(YAML).unwrap();
        settings.tiers = (0..4).map(|_| TierSettings::new("memory")).collect();
        assert!(settings.validate().is_err());

        let mut settings = CacheSettings::from_yaml(YAML).unwrap();
        settings.refresh.as_mut().unwrap().interval_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = CacheSettings::from_yaml(YAML).unwrap();
        settings.name = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_roundtrip_yaml() {
        let settings = CacheSettings::from_yaml(YAML).unwrap();
        let text = serde_yaml::to_string(&settings).unwrap();
        assert_eq!(CacheSettings::from_yaml(&text).unwrap(), settings);
    }
}

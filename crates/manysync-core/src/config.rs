use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::cache::{EvictionPolicy, PeerCache};

/// How a received clock updates the record kept for the sending peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptPolicy {
    /// Replace the record with the received clock. Within a batch the last
    /// message from a peer wins.
    Overwrite,
    /// Union the received clock into the record, so records never regress.
    Union,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_hub_receipt")]
    pub receipt: ReceiptPolicy,
    #[serde(default)]
    pub peers: PeerCacheConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            receipt: default_hub_receipt(),
            peers: PeerCacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connection_receipt")]
    pub receipt: ReceiptPolicy,
    #[serde(default)]
    pub peers: PeerCacheConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receipt: default_connection_receipt(),
            peers: PeerCacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCacheConfig {
    /// Maximum tracked peers; unbounded when absent.
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl PeerCacheConfig {
    /// Build an empty cache with these limits.
    #[must_use]
    pub const fn build<V>(&self) -> PeerCache<V> {
        PeerCache::new(self.capacity, self.eviction)
    }
}

impl SyncConfig {
    /// Reject settings that cannot work.
    ///
    /// # Errors
    ///
    /// Returns an error if any peer cache has a capacity of zero.
    pub fn validate(&self) -> Result<()> {
        if self.hub.peers.capacity == Some(0) {
            bail!("hub.peers.capacity must be at least 1");
        }
        if self.connection.peers.capacity == Some(0) {
            bail!("connection.peers.capacity must be at least 1");
        }
        Ok(())
    }
}

/// Parse and validate a TOML config document.
///
/// # Errors
///
/// Returns an error if the text is not valid TOML for [`SyncConfig`] or if
/// validation fails.
pub fn parse_config(text: &str) -> Result<SyncConfig> {
    let config = toml::from_str::<SyncConfig>(text).context("Failed to parse sync config")?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to defaults when the file is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, parsed, or
/// validated.
pub fn load_config(path: &Path) -> Result<SyncConfig> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

const fn default_hub_receipt() -> ReceiptPolicy {
    ReceiptPolicy::Overwrite
}

const fn default_connection_receipt() -> ReceiptPolicy {
    ReceiptPolicy::Union
}

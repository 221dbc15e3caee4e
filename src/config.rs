//! Interface configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::NodeId;

/// Configuration for one OpenLCB interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// The local node identifier, e.g. `"02.01.12.FE.DD.CC"`.
    pub node_id: NodeId,

    /// Gap between consecutive Check-ID frames during alias arbitration.
    #[serde(default = "default_cid_gap", with = "humantime_serde")]
    pub cid_gap: Duration,

    /// Quiet window after the last Check-ID before the alias is reserved.
    #[serde(default = "default_reserve_quiet", with = "humantime_serde")]
    pub reserve_quiet: Duration,

    /// Bound on arbitration restarts after collisions. `None` retries forever.
    #[serde(default)]
    pub arbitration_retry_limit: Option<u32>,

    /// Per-source cap on buffered bytes while reassembling a multi-frame
    /// addressed message.
    #[serde(default = "default_reassembly_cap")]
    pub reassembly_cap: usize,

    /// Messages held while waiting for alias arbitration to finish.
    #[serde(default = "default_send_queue_cap")]
    pub send_queue_cap: usize,
}

fn default_cid_gap() -> Duration {
    Duration::from_micros(250)
}
fn default_reserve_quiet() -> Duration {
    Duration::from_millis(200)
}
fn default_reassembly_cap() -> usize {
    64 * 1024
}
fn default_send_queue_cap() -> usize {
    256
}

impl InterfaceConfig {
    /// Configuration with defaults for `node_id`.
    pub fn for_node(node_id: NodeId) -> Self {
        Self {
            node_id,
            cid_gap: default_cid_gap(),
            reserve_quiet: default_reserve_quiet(),
            arbitration_retry_limit: None,
            reassembly_cap: default_reassembly_cap(),
            send_queue_cap: default_send_queue_cap(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_unknown() {
            return Err(Error::InvalidConfig(
                "node_id must not be the all-zero sentinel".into(),
            ));
        }
        if self.reassembly_cap == 0 {
            return Err(Error::InvalidConfig("reassembly_cap must be positive".into()));
        }
        if self.send_queue_cap == 0 {
            return Err(Error::InvalidConfig("send_queue_cap must be positive".into()));
        }
        if let Some(0) = self.arbitration_retry_limit {
            return Err(Error::InvalidConfig(
                "arbitration_retry_limit must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = InterfaceConfig::for_node(NodeId::from_u64(0x0201_12FE_DDCC));
        config.validate().unwrap();
        assert_eq!(config.cid_gap, Duration::from_micros(250));
        assert_eq!(config.reserve_quiet, Duration::from_millis(200));
        assert_eq!(config.arbitration_retry_limit, None);
    }

    #[test]
    fn rejects_unknown_node_id() {
        let config = InterfaceConfig::for_node(NodeId::UNKNOWN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let config: InterfaceConfig = toml::from_str("node_id = \"02.01.12.FE.DD.CC\"\n").unwrap();
        assert_eq!(config.node_id, NodeId::from_u64(0x0201_12FE_DDCC));
        assert_eq!(config.reassembly_cap, 64 * 1024);
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iface.toml");

        let mut config = InterfaceConfig::for_node(NodeId::from_u64(0x0201_12FE_DDCC));
        config.arbitration_retry_limit = Some(16);
        config.save(&path).unwrap();

        let loaded = InterfaceConfig::load(&path).unwrap();
        assert_eq!(loaded.node_id, config.node_id);
        assert_eq!(loaded.arbitration_retry_limit, Some(16));
        assert_eq!(loaded.reserve_quiet, config.reserve_quiet);
    }

    #[test]
    fn load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "node_id = \"00.00.00.00.00.00\"\n").unwrap();
        assert!(InterfaceConfig::load(&path).is_err());
    }
}

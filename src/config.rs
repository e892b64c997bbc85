//! Node configuration.
//!
//! One struct per concern, each with a sensible `Default`, covering
//! mining/network/sync/store/logging knobs plus the ambient sections
//! (store location, network listen address, discovery/health/sync
//! timing) that a runnable node needs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    pub difficulty: u32,
    pub miner_address: String,
    pub target_block_interval_ms: u64,
    pub mining_reward: Amount,
    pub min_fee: Amount,
    pub max_tx_per_block: usize,
    pub poll_interval_ms: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        MiningConfig {
            difficulty: 2,
            miner_address: crate::hash::encode_address(&[0u8; 20]),
            target_block_interval_ms: 30_000,
            mining_reward: Amount::from_f64(12.5),
            min_fee: Amount::from_f64(0.001),
            max_tx_per_block: 500,
            poll_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub public_url: String,
    pub listen_port: u16,
    pub seeds: Vec<String>,
    pub max_peers: usize,
    pub peer_request_timeout_ms: u64,
    pub discovery_base_interval_ms: u64,
    pub discovery_max_interval_ms: u64,
    pub health_interval_ms: u64,
    pub unhealthy_eviction_threshold: u32,
    pub gossip_fanout_concurrency: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            public_url: "http://localhost:3000".to_string(),
            listen_port: 3000,
            seeds: Vec::new(),
            max_peers: 50,
            peer_request_timeout_ms: 5_000,
            discovery_base_interval_ms: 30_000,
            discovery_max_interval_ms: 300_000,
            health_interval_ms: 30_000,
            unhealthy_eviction_threshold: 3,
            gossip_fanout_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub cooldown_ms: u64,
    pub tick_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            cooldown_ms: 5_000,
            tick_interval_ms: 15_000,
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("./data"))
                .join("ekehi-node"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network_name: String,
    pub token_name: String,
    pub token_symbol: String,
    pub mining: MiningConfig,
    pub network: NetworkConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            network_name: "ekehi".to_string(),
            token_name: "Ekehi".to_string(),
            token_symbol: "EKH".to_string(),
            mining: MiningConfig::default(),
            network: NetworkConfig::default(),
            sync: SyncConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn target_block_interval(&self) -> Duration {
        Duration::from_millis(self.mining.target_block_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.mining.poll_interval_ms)
    }

    pub fn peer_request_timeout(&self) -> Duration {
        Duration::from_millis(self.network.peer_request_timeout_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.network.health_interval_ms)
    }

    pub fn sync_cooldown(&self) -> Duration {
        Duration::from_millis(self.sync.cooldown_ms)
    }

    pub fn sync_tick_interval(&self) -> Duration {
        Duration::from_millis(self.sync.tick_interval_ms)
    }

    /// Layers built-in defaults, an optional config file, and environment
    /// variables (`EKEHI_NODE__...`, double-underscore nested keys), so a
    /// hosting platform can override the public URL or listen port without
    /// a config file.
    pub fn load(config_file: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let defaults = NodeConfig::default();
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?);

        if let Some(path) = config_file {
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("EKEHI_NODE")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build()?;
        Ok(built.try_deserialize()?)
    }

    /// Overrides the public URL, used when the CLI argument is supplied
    /// explicitly (it takes precedence over both file and environment).
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.network.public_url = url.into();
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.network.listen_port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = NodeConfig::default();
        assert!(cfg.mining.difficulty >= 1);
        assert!(cfg.mining.max_tx_per_block > 0);
        assert!(cfg.network.max_peers > 0);
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let cfg = NodeConfig::load(None).expect("defaults always load");
        assert_eq!(cfg.network.listen_port, NodeConfig::default().network.listen_port);
    }

    #[test]
    fn with_public_url_overrides_default() {
        let cfg = NodeConfig::default().with_public_url("http://example.com:4000");
        assert_eq!(cfg.network.public_url, "http://example.com:4000");
    }
}

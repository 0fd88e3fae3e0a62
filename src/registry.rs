//! Chain and channel registry
//!
//! Maps a channel end `(chain, port, channel)` to the channel end on the
//! counterparty chain. Loaded from a JSON document:
//!
//! ```json
//! [
//!   {"chain": "cosmoshub-4", "channels": [
//!     {"channel_id": "channel-141", "counterparty_chain": "osmosis-1",
//!      "counterparty_channel": "channel-0"}
//!   ]}
//! ]
//! ```

use crate::error::{IndexerError, IndexerResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const TRANSFER_PORT: &str = "transfer";

fn transfer_port() -> String {
    TRANSFER_PORT.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    #[serde(default = "transfer_port")]
    pub port_id: String,
    pub counterparty_chain: String,
    pub counterparty_channel: String,
    #[serde(default = "transfer_port")]
    pub counterparty_port: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnd {
    pub chain: String,
    pub port: String,
    pub channel: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: Vec<String>,
    channels: HashMap<(String, String, String), ChannelEnd>,
}

impl ChainRegistry {
    pub fn from_configs(configs: Vec<ChainConfig>) -> Self {
        let mut chains = Vec::with_capacity(configs.len());
        let mut channels = HashMap::new();

        for config in configs {
            for ch in config.channels {
                channels.insert(
                    (config.chain.clone(), ch.port_id, ch.channel_id),
                    ChannelEnd {
                        chain: ch.counterparty_chain,
                        port: ch.counterparty_port,
                        channel: ch.counterparty_channel,
                    },
                );
            }
            if !chains.contains(&config.chain) {
                chains.push(config.chain);
            }
        }

        Self { chains, channels }
    }

    pub fn from_json(json: &str) -> IndexerResult<Self> {
        let configs: Vec<ChainConfig> = serde_json::from_str(json)?;
        Ok(Self::from_configs(configs))
    }

    /// Load the registry file; a missing or malformed file is a configuration error
    pub fn load(path: impl AsRef<Path>) -> IndexerResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            IndexerError::Config(format!("chain registry {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json(&json)
            .map_err(|e| IndexerError::Config(format!("chain registry {}: {}", path.display(), e)))?;

        log::info!(
            "🔗 Loaded chain registry: {} chains, {} channel ends",
            registry.chains.len(),
            registry.channels.len()
        );
        Ok(registry)
    }

    pub fn chains(&self) -> &[String] {
        &self.chains
    }

    /// Counterparty of the channel end `(chain, port, channel)`
    pub fn counterparty(&self, chain: &str, port: &str, channel: &str) -> Option<&ChannelEnd> {
        self.channels
            .get(&(chain.to_string(), port.to_string(), channel.to_string()))
    }
}

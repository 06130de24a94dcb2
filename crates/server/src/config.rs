use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use skirmish::{DEFAULT_TICK_RATE, DiscoveryConfig, HostConfig, PacketLossSimulation};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub timeout_ms: u64,
    pub announce: bool,
    pub discovery: DiscoveryConfig,
    pub packet_loss: PacketLossSimulation,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let host = HostConfig::default();
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: host.max_clients,
            timeout_ms: host.timeout_ms,
            announce: host.announce,
            discovery: host.discovery,
            packet_loss: PacketLossSimulation::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            max_clients: self.max_clients,
            timeout_ms: self.timeout_ms,
            announce: self.announce,
            discovery: self.discovery.clone(),
            ..Default::default()
        }
    }

    pub fn tick_ms(&self) -> u64 {
        (1000 / u64::from(self.tick_rate.max(1))).max(1)
    }
}

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use super::protocol::{
    DEFAULT_BEACON_FREQUENCY, DISCOVERY_GROUP, DISCOVERY_PORT, DROPPED_TIMEOUT_MS,
    LAG_THRESHOLD_MS, MAX_PACKET_SIZE,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub player_name: String,
    pub dropped_timeout_ms: u64,
    pub lag_threshold_ms: u64,
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player_name: String::from("player"),
            dropped_timeout_ms: DROPPED_TIMEOUT_MS,
            lag_threshold_ms: LAG_THRESHOLD_MS,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub max_clients: usize,
    pub timeout_ms: u64,
    pub max_packet_size: usize,
    /// Send discovery beacons from the host socket.
    pub announce: bool,
    pub discovery: DiscoveryConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_clients: 16,
            timeout_ms: DROPPED_TIMEOUT_MS,
            max_packet_size: MAX_PACKET_SIZE,
            announce: true,
            discovery: DiscoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub group: Ipv6Addr,
    pub port: u16,
    /// Beacons per minute.
    pub beacon_frequency: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: DISCOVERY_GROUP,
            port: DISCOVERY_PORT,
            beacon_frequency: DEFAULT_BEACON_FREQUENCY,
        }
    }
}

impl DiscoveryConfig {
    pub fn beacon_interval_ms(&self) -> u64 {
        60_000 / u64::from(self.beacon_frequency.max(1))
    }

    /// A server is forgotten after roughly five missed beacons.
    pub fn server_timeout_ms(&self) -> u64 {
        self.beacon_interval_ms() * 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_timeout_tolerates_five_missed_beacons() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.beacon_interval_ms(), 5_000);
        assert_eq!(config.server_timeout_ms(), 25_000);

        let config = DiscoveryConfig {
            beacon_frequency: 7,
            ..Default::default()
        };
        assert_eq!(config.server_timeout_ms(), 60_000 / 7 * 5);
    }
}

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::common::config::{NetworkConfig, TimingConfig};

/// Complete server configuration loaded from TOML file.
///
/// # Example TOML
///
/// ```toml
/// [server]
/// port = 5001
/// advertise_ip = "192.168.1.20"
///
/// [network]
/// multicast_group = "224.1.1.1"
/// discovery_port = 5010
///
/// [timing]
/// heartbeat_interval_secs = 5
/// grace_period_secs = 20
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Information about THIS server
    pub server: ServerInfo,
    /// Multicast rendezvous settings
    pub network: NetworkConfig,
    /// Discovery, heartbeat and failure detection timers
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Unicast port for client traffic and election tokens
    pub port: u16,
    /// Address peers and clients should reach us at; detected when absent
    pub advertise_ip: Option<IpAddr>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            port: 5001,
            advertise_ip: None,
        }
    }
}

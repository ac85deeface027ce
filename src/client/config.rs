use serde::{Deserialize, Serialize};

use crate::common::config::{NetworkConfig, TimingConfig};

/// Client configuration loaded from TOML file.
///
/// The client uses the same rendezvous group and the same leader-loss
/// threshold as the servers, so both sides give up on a leader together.
///
/// # Example TOML
///
/// ```toml
/// [client]
/// port = 0
///
/// [network]
/// multicast_group = "224.1.1.1"
/// discovery_port = 5010
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub client: ClientInfo,
    pub network: NetworkConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    /// Unicast port for welcomes, relayed messages and notices (0 = ephemeral)
    pub port: u16,
}

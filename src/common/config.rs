//! # Configuration Utilities
//!
//! Shared configuration structures and parsing utilities used by both
//! client and server components. Every field has a default, so a missing
//! section (or a missing file) falls back to the values below.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load a configuration file if one was given, defaults otherwise.
pub fn load_or_default<T>(path: Option<&str>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match path {
        Some(path) => load_config(path),
        None => Ok(T::default()),
    }
}

/// Multicast rendezvous settings shared by servers and clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Multicast group used for discovery, heartbeats and announcements
    pub multicast_group: Ipv4Addr,
    /// Port every member of the group binds for group traffic
    pub discovery_port: u16,
    /// Hop limit for multicast datagrams
    pub multicast_ttl: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::new(224, 1, 1, 1),
            discovery_port: 5010,
            multicast_ttl: 2,
        }
    }
}

impl NetworkConfig {
    /// Destination address for group datagrams.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.multicast_group, self.discovery_port))
    }
}

/// Timer settings for discovery, heartbeats and failure detection.
///
/// All values are fixed wall-clock durations; each subsystem ticks on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How often every server multicasts a discover beacon (seconds)
    pub discovery_interval_secs: u64,
    /// How often the leader multicasts a heartbeat (seconds)
    pub heartbeat_interval_secs: u64,
    /// Heartbeat intervals without a leader signal before the leader is considered lost
    pub missed_heartbeats: u32,
    /// How often the leader-loss check runs (seconds)
    pub monitor_interval_secs: u64,
    /// How often the membership reaper sweeps (seconds)
    pub reaper_interval_secs: u64,
    /// Silence after which a peer record is evicted (seconds)
    pub grace_period_secs: u64,
    /// Time to listen for peers before the first election check (seconds)
    pub startup_discovery_secs: u64,
    /// Upper bound of the random delay added to periodic broadcasts (milliseconds)
    pub jitter_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_interval_secs: 5,
            heartbeat_interval_secs: 5,
            missed_heartbeats: 3,
            monitor_interval_secs: 5,
            reaper_interval_secs: 5,
            grace_period_secs: 20,
            startup_discovery_secs: 10,
            jitter_ms: 250,
        }
    }
}

impl TimingConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Silence after which the leader is declared lost.
    pub fn leader_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.missed_heartbeats
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn startup_discovery(&self) -> Duration {
        Duration::from_secs(self.startup_discovery_secs)
    }

    /// A period plus a random jitter, so peers do not broadcast in lockstep.
    pub fn jittered(&self, period: Duration) -> Duration {
        use rand::Rng;

        if self.jitter_ms == 0 {
            return period;
        }
        let mut rng = rand::thread_rng();
        period + Duration::from_millis(rng.gen_range(0..=self.jitter_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Sample {
        network: NetworkConfig,
        timing: TimingConfig,
    }

    #[test]
    fn test_defaults_match_reference_timings() {
        let timing = TimingConfig::default();
        assert_eq!(timing.leader_timeout(), Duration::from_secs(15));
        assert_eq!(timing.grace_period(), Duration::from_secs(20));
        assert_eq!(
            NetworkConfig::default().group_addr(),
            "224.1.1.1:5010".parse().unwrap()
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[network]\ndiscovery_port = 6010\n\n[timing]\nheartbeat_interval_secs = 1\n",
        )
        .unwrap();

        let sample: Sample = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(sample.network.discovery_port, 6010);
        assert_eq!(sample.network.multicast_group, Ipv4Addr::new(224, 1, 1, 1));
        assert_eq!(sample.timing.leader_timeout(), Duration::from_secs(3));
        assert_eq!(sample.timing.grace_period_secs, 20);
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        let sample: Sample = load_or_default(None).unwrap();
        assert_eq!(sample.timing.discovery_interval_secs, 5);
        assert!(load_config::<Sample>("/nonexistent/lan-chat.toml").is_err());
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let timing = TimingConfig {
            jitter_ms: 50,
            ..TimingConfig::default()
        };
        let base = Duration::from_secs(1);
        for _ in 0..20 {
            let d = timing.jittered(base);
            assert!(d >= base && d <= base + Duration::from_millis(50));
        }
        let flat = TimingConfig {
            jitter_ms: 0,
            ..TimingConfig::default()
        };
        assert_eq!(flat.jittered(base), base);
    }
}

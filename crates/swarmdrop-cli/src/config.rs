//! Configuration system for the SWARMDROP CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use swarmdrop_core::node::{PeerSelection, RetryConfig, SwarmConfig, TransferConfig as Pacing};
use swarmdrop_rendezvous::{DEFAULT_MAX_ROOM_SIZE, DEFAULT_PORT, RendezvousConfig};
use swarmdrop_transport::TcpTransportConfig;

/// SWARMDROP configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Rendezvous server settings
    #[serde(default)]
    pub rendezvous: RendezvousSection,
    /// Signaling client settings
    #[serde(default)]
    pub signaling: SignalingConfig,
    /// Local peer settings
    #[serde(default)]
    pub peer: PeerConfig,
    /// Transfer pacing and reconnect policy
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rendezvous server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendezvousSection {
    /// Listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum members per room
    #[serde(default = "default_max_room_size")]
    pub max_room_size: usize,
}

/// Signaling client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket URL of the rendezvous service
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

/// Local peer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Name announced in handshakes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Partial-mesh cap
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Dial a random subset of room members instead of the first listed
    #[serde(default)]
    pub random_selection: bool,
    /// Address the TCP listener binds to
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// Address advertised to peers (defaults to the listen address)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_ip: Option<String>,
}

/// Transfer pacing and reconnect policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Delay between a file offer and its first chunk
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Delay before replaying the catalogue to a late joiner
    #[serde(default = "default_replay_delay_ms")]
    pub replay_delay_ms: u64,
    /// Pause after every this many chunks (0 disables)
    #[serde(default = "default_pause_every")]
    pub pause_every: u32,
    /// Pause length
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    /// Reconnect attempts after a transport error
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step
    #[serde(default = "default_retry_step_ms")]
    pub retry_step_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_addr() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_max_room_size() -> usize {
    DEFAULT_MAX_ROOM_SIZE
}

fn default_server_url() -> String {
    format!("ws://127.0.0.1:{DEFAULT_PORT}")
}

fn default_max_connections() -> usize {
    swarmdrop_core::node::config::DEFAULT_MAX_CONNECTIONS
}

fn default_listen_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_settle_delay_ms() -> u64 {
    150
}

fn default_replay_delay_ms() -> u64 {
    300
}

fn default_pause_every() -> u32 {
    3
}

fn default_pause_ms() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_step_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RendezvousSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_room_size: default_max_room_size(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            max_connections: default_max_connections(),
            random_selection: false,
            listen_ip: default_listen_ip(),
            advertise_ip: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            replay_delay_ms: default_replay_delay_ms(),
            pause_every: default_pause_every(),
            pause_ms: default_pause_ms(),
            max_retries: default_max_retries(),
            retry_step_ms: default_retry_step_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("swarmdrop/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse the rendezvous bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.rendezvous.bind_addr.parse()?)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_bind_addr()?;
        self.tcp_transport()?;

        if self.rendezvous.max_room_size < 2 {
            anyhow::bail!("Room size must allow at least 2 members");
        }

        let url = &self.signaling.server_url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            anyhow::bail!("Signaling server URL must use ws:// or wss://: {url}");
        }

        if self.peer.max_connections == 0 {
            anyhow::bail!("Max connections must be at least 1");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Rendezvous server configuration, with the port from `PORT` when set
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address cannot be parsed.
    pub fn rendezvous_config(&self) -> anyhow::Result<RendezvousConfig> {
        let mut bind_addr = self.parse_bind_addr()?;
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            bind_addr.set_port(port);
        }
        Ok(RendezvousConfig {
            bind_addr,
            max_room_size: self.rendezvous.max_room_size,
        })
    }

    /// TCP transport configuration for peer links
    ///
    /// # Errors
    ///
    /// Returns an error if an address cannot be parsed.
    pub fn tcp_transport(&self) -> anyhow::Result<TcpTransportConfig> {
        let bind_ip: IpAddr = self.peer.listen_ip.parse()?;
        let advertise_ip = self
            .peer
            .advertise_ip
            .as_deref()
            .map(str::parse::<IpAddr>)
            .transpose()?;
        Ok(TcpTransportConfig {
            bind_ip,
            advertise_ip,
            ..TcpTransportConfig::default()
        })
    }

    /// Swarm node configuration
    #[must_use]
    pub fn swarm_config(&self, is_host: bool) -> SwarmConfig {
        let transfer = &self.transfer;
        SwarmConfig {
            display_name: self.peer.display_name.clone(),
            is_host,
            max_connections: self.peer.max_connections,
            peer_selection: if self.peer.random_selection {
                PeerSelection::Random
            } else {
                PeerSelection::FirstListed
            },
            transfer: Pacing {
                settle_delay: Duration::from_millis(transfer.settle_delay_ms),
                replay_delay: Duration::from_millis(transfer.replay_delay_ms),
                pause_every: transfer.pause_every,
                pause: Duration::from_millis(transfer.pause_ms),
            },
            retry: RetryConfig {
                max_retries: transfer.max_retries,
                step: Duration::from_millis(transfer.retry_step_ms),
            },
            ..SwarmConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rendezvous.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.rendezvous.max_room_size, 20);
        assert_eq!(config.signaling.server_url, "ws://127.0.0.1:3001");
        assert_eq!(config.peer.max_connections, 5);
        assert_eq!(config.transfer.max_retries, 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.signaling.server_url = "http://example.com".to_string();
        assert!(config.validate().is_err());

        config.signaling.server_url = "wss://example.com".to_string();
        config.peer.advertise_ip = Some("not-an-ip".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[peer]\ndisplay_name = \"alice\"\n").unwrap();
        assert_eq!(config.peer.display_name.as_deref(), Some("alice"));
        assert_eq!(config.peer.max_connections, 5);
        assert_eq!(config.transfer.settle_delay_ms, 150);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.rendezvous.bind_addr, deserialized.rendezvous.bind_addr);
        assert_eq!(config.transfer.pause_every, deserialized.transfer.pause_every);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.peer.random_selection = true;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(loaded.peer.random_selection);
    }

    #[test]
    fn test_swarm_config_conversion() {
        let mut config = Config::default();
        config.peer.display_name = Some("bob".to_string());
        config.peer.random_selection = true;
        config.transfer.retry_step_ms = 250;

        let swarm = config.swarm_config(true);
        assert!(swarm.is_host);
        assert_eq!(swarm.display_name.as_deref(), Some("bob"));
        assert_eq!(swarm.peer_selection, PeerSelection::Random);
        assert_eq!(swarm.retry.step, Duration::from_millis(250));
        assert_eq!(swarm.transfer.replay_delay, Duration::from_millis(300));
    }

    #[test]
    fn test_tcp_transport_conversion() {
        let mut config = Config::default();
        config.peer.listen_ip = "0.0.0.0".to_string();
        config.peer.advertise_ip = Some("192.168.1.20".to_string());

        let tcp = config.tcp_transport().unwrap();
        assert!(tcp.bind_ip.is_unspecified());
        assert_eq!(tcp.advertise_ip, Some("192.168.1.20".parse().unwrap()));
    }
}

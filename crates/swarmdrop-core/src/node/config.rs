//! Swarm configuration

use std::time::Duration;

/// Maximum simultaneously connected peer transports
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Swarm configuration
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Local peer id (`None` = generate a random one)
    pub peer_id: Option<String>,

    /// Display name sent in handshakes (`None` = "Host" / "Peer-xxxx")
    pub display_name: Option<String>,

    /// Whether this node is the room's host
    pub is_host: bool,

    /// Maximum connected transports (partial mesh cap)
    pub max_connections: usize,

    /// Which listed peers to dial on room join
    pub peer_selection: PeerSelection,

    /// Send pacing
    pub transfer: TransferConfig,

    /// Reconnect policy
    pub retry: RetryConfig,

    /// Stats tick interval
    pub stats_interval: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            display_name: None,
            is_host: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            peer_selection: PeerSelection::FirstListed,
            transfer: TransferConfig::default(),
            retry: RetryConfig::default(),
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl SwarmConfig {
    /// Configuration for the node sharing files
    #[must_use]
    pub fn host() -> Self {
        Self {
            is_host: true,
            ..Self::default()
        }
    }

    /// Display name to announce for `peer_id`
    #[must_use]
    pub fn handshake_name(&self, peer_id: &str) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ if self.is_host => "Host".to_string(),
            _ => fallback_name(peer_id),
        }
    }
}

/// `Peer-xxxx` name derived from a peer id
#[must_use]
pub fn fallback_name(peer_id: &str) -> String {
    let prefix: String = peer_id.chars().take(4).collect();
    format!("Peer-{prefix}")
}

/// Partial-mesh peer selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerSelection {
    /// The first peers in the room's join order
    #[default]
    FirstListed,
    /// A uniformly random subset
    Random,
}

/// Send pacing configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Wait between announcing a file and pushing its chunks
    pub settle_delay: Duration,

    /// Wait before replaying the catalogue to a late joiner
    pub replay_delay: Duration,

    /// Yield after every this many chunks
    pub pause_every: u32,

    /// Length of the cooperative pause
    pub pause: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(150),
            replay_delay: Duration::from_millis(300),
            pause_every: 3,
            pause: Duration::from_millis(5),
        }
    }
}

impl TransferConfig {
    /// Whether to pause after sending chunk `index`
    #[must_use]
    pub fn pauses_after(&self, index: u32) -> bool {
        self.pause_every > 0 && index % self.pause_every == 0
    }
}

/// Reconnect policy with linear backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after consecutive errors
    pub max_retries: u32,

    /// Backoff step; retry `n` (0-based) waits `step * (n + 1)`
    pub step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            step: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1)
    }
}

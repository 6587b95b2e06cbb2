//! Node configuration.

use lamport_core::{CoreError, PeerAddress, PeerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default liveness probe timeout
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3000;

/// When a node answers a REQUEST
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// Reply as soon as the request is queued
    Immediate,
    /// Hold the reply while our own pending request has priority, send it on release
    #[default]
    Deferred,
}

impl fmt::Display for ReplyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

impl FromStr for ReplyPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "deferred" => Ok(Self::Deferred),
            other => Err(CoreError::Validation {
                field: "reply_policy".to_string(),
                reason: format!("unknown policy '{}'", other),
            }),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address advertised to other peers
    pub address: PeerAddress,
    /// Liveness probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Artificial delay before every outbound protocol message
    pub message_delay_ms: u64,
    /// Reply discipline
    pub reply_policy: ReplyPolicy,
}

impl NodeConfig {
    /// Create a new node config
    #[must_use]
    pub fn new(address: PeerAddress) -> Self {
        Self {
            address,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            message_delay_ms: 0,
            reply_policy: ReplyPolicy::default(),
        }
    }

    /// Set probe timeout
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    /// Set initial message delay
    #[must_use]
    pub fn with_message_delay(mut self, delay_ms: u64) -> Self {
        self.message_delay_ms = delay_ms;
        self
    }

    /// Set reply policy
    #[must_use]
    pub fn with_reply_policy(mut self, policy: ReplyPolicy) -> Self {
        self.reply_policy = policy;
        self
    }

    /// Id derived from the advertised address
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_address(&self.address)
    }

    /// Probe timeout as a duration
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// How long a dead node stalls an inbound call before failing it
    ///
    /// Twice the probe timeout, so a probe against a dead node always
    /// times out.
    #[must_use]
    pub fn dead_delay(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.saturating_mul(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = NodeConfig::new(PeerAddress::new("127.0.0.1", 2010));
        assert_eq!(config.probe_timeout_ms, 3000);
        assert_eq!(config.message_delay_ms, 0);
        assert_eq!(config.reply_policy, ReplyPolicy::Deferred);
    }

    #[test]
    fn test_config_builder() {
        let config = NodeConfig::new(PeerAddress::new("127.0.0.1", 2010))
            .with_probe_timeout(150)
            .with_message_delay(20)
            .with_reply_policy(ReplyPolicy::Immediate);

        assert_eq!(config.probe_timeout(), Duration::from_millis(150));
        assert_eq!(config.dead_delay(), Duration::from_millis(300));
        assert_eq!(config.message_delay_ms, 20);
        assert_eq!(config.reply_policy, ReplyPolicy::Immediate);
    }

    #[test]
    fn test_peer_id_follows_address() {
        let address = PeerAddress::new("127.0.0.1", 2010);
        let config = NodeConfig::new(address.clone());
        assert_eq!(config.peer_id(), PeerId::from_address(&address));
    }

    #[test]
    fn test_reply_policy_parse() {
        assert_eq!("Immediate".parse::<ReplyPolicy>().unwrap(), ReplyPolicy::Immediate);
        assert_eq!("deferred".parse::<ReplyPolicy>().unwrap(), ReplyPolicy::Deferred);
        assert!("eager".parse::<ReplyPolicy>().is_err());
        assert_eq!(ReplyPolicy::Immediate.to_string(), "immediate");
    }
}

//! Link timers configuration.

use serde::Deserialize;
use std::time::Duration;

/// Keepalive and handshake timers for server links.
///
/// A link is pinged after `ping_interval` seconds without traffic and closed
/// with "ping timeout" if nothing arrives within a further `ping_timeout`.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Seconds of silence before sending PING (default: 90).
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Seconds to wait after PING before closing the link (default: 120).
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    /// Seconds allowed for the peer's INTRODUCE to arrive (default: 30).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
}

impl LimitsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval.max(1))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            ping_timeout: default_ping_timeout(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    90
}

fn default_ping_timeout() -> u64 {
    120
}

fn default_handshake_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_correct() {
        let limits = LimitsConfig::default();
        assert_eq!(limits.ping_interval, 90);
        assert_eq!(limits.ping_timeout, 120);
        assert_eq!(limits.handshake_timeout, 30);
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let limits: LimitsConfig = toml::from_str("ping_interval = 5").unwrap();
        assert_eq!(limits.ping_interval(), Duration::from_secs(5));
        assert_eq!(limits.ping_timeout(), Duration::from_secs(120));
    }
}

//! Keep-alive arithmetic. Clients ping after a fraction of the negotiated
//! interval; servers allow half again as long before declaring the peer
//! dead.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle percentage of the keep-alive interval after which the client
    /// emits a PINGREQ.
    pub ping_interval_percent: u8,
    /// Inbound-silence percentage after which the server disconnects the
    /// client. The protocol mandates 150.
    pub timeout_percent: u8,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_percent: 75,
            timeout_percent: 150,
        }
    }
}

impl KeepaliveConfig {
    #[must_use]
    pub const fn new(ping_interval_percent: u8, timeout_percent: u8) -> Self {
        Self {
            ping_interval_percent,
            timeout_percent,
        }
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ping_interval(&self, keepalive: Duration) -> Duration {
        let millis = keepalive.as_millis() as u64;
        Duration::from_millis(millis * u64::from(self.ping_interval_percent) / 100)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn timeout_duration(&self, keepalive: Duration) -> Duration {
        let millis = keepalive.as_millis() as u64;
        Duration::from_millis(millis * u64::from(self.timeout_percent) / 100)
    }
}

/// True when the peer has been silent past the configured timeout and the
/// outstanding ping was never answered.
#[must_use]
pub fn is_keepalive_timeout(
    time_since_last_ping: Duration,
    pong_received: bool,
    keepalive: Duration,
    timeout_percent: u8,
) -> bool {
    let timeout = KeepaliveConfig::new(0, timeout_percent).timeout_duration(keepalive);
    !pong_received && time_since_last_ping > timeout
}

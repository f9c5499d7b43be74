//! Tunables shared by the processors and the server.

use std::time::Duration;

use crate::lorawan::NetId;

/// Default time frames are collected from multiple gateways.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(200);
/// Default delay between a join-request and its join-accept (RX1 of the join).
pub const DEFAULT_JOIN_ACCEPT_DELAY: Duration = Duration::from_secs(5);
/// Default number of concurrent workers per pipeline.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Network server configuration.
///
/// ```
/// use std::time::Duration;
///
/// use loraserver::{ServerConfig, lorawan::NetId};
///
/// let config = ServerConfig::new(NetId::new([0, 0, 0x13]))
///     .with_dedup_window(Duration::ZERO)
///     .with_max_in_flight(0);
/// assert_eq!(config.max_in_flight(), 1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    net_id: NetId,
    dedup_window: Duration,
    join_accept_delay: Duration,
    rx2_data_rate: u8,
    max_in_flight: usize,
}

impl ServerConfig {
    /// Configuration for `net_id` with default timings and limits.
    #[must_use]
    pub fn new(net_id: NetId) -> Self {
        Self {
            net_id,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            join_accept_delay: DEFAULT_JOIN_ACCEPT_DELAY,
            rx2_data_rate: 0,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Set how long duplicate receptions of a frame are collected.
    /// `Duration::ZERO` processes each frame as soon as it arrives.
    #[must_use]
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    #[must_use]
    pub fn with_join_accept_delay(mut self, delay: Duration) -> Self {
        self.join_accept_delay = delay;
        self
    }

    /// Set the data rate announced for the second receive window.
    #[must_use]
    pub fn with_rx2_data_rate(mut self, data_rate: u8) -> Self {
        self.rx2_data_rate = data_rate & 0x0f;
        self
    }

    /// Bound the number of concurrent workers per pipeline; clamped to at least one.
    #[must_use]
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }

    #[must_use]
    pub fn net_id(&self) -> NetId { self.net_id }

    #[must_use]
    pub fn dedup_window(&self) -> Duration { self.dedup_window }

    #[must_use]
    pub fn join_accept_delay(&self) -> Duration { self.join_accept_delay }

    #[must_use]
    pub fn rx2_data_rate(&self) -> u8 { self.rx2_data_rate }

    #[must_use]
    pub fn max_in_flight(&self) -> usize { self.max_in_flight }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::new(NetId::new([0, 0, 1]));
        assert_eq!(config.dedup_window(), Duration::from_millis(200));
        assert_eq!(config.join_accept_delay(), Duration::from_secs(5));
        assert_eq!(config.max_in_flight(), 256);
        assert_eq!(config.rx2_data_rate(), 0);
    }

    #[test]
    fn rx2_data_rate_is_limited_to_four_bits() {
        let config = ServerConfig::new(NetId::default()).with_rx2_data_rate(0x1f);
        assert_eq!(config.rx2_data_rate(), 0x0f);
    }
}

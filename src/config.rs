//! Timeouts and limits shared across the client core.

use std::time::Duration;

/// Tunable deadlines and limits.
///
/// The defaults are the protocol's customary values; embedders override
/// individual fields with struct-update syntax:
///
/// ```
/// use bittide::Config;
/// use std::time::Duration;
///
/// let config = Config {
///     dial_timeout: Duration::from_secs(5),
///     ..Config::default()
/// };
/// assert_eq!(config.idle_timeout, Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP connect deadline for outbound peer connections.
    pub dial_timeout: Duration,
    /// Deadline for the full handshake exchange.
    pub handshake_timeout: Duration,
    /// A session whose inbound side is silent this long is dead.
    pub idle_timeout: Duration,
    /// Outbound silence after which a keep-alive is written.
    pub keep_alive_interval: Duration,
    /// Whole-request deadline for tracker announces.
    pub tracker_timeout: Duration,
    /// Largest accepted message frame (payload + id).
    pub max_frame_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(120),
            keep_alive_interval: Duration::from_secs(120),
            tracker_timeout: Duration::from_secs(30),
            max_frame_len: 16 * 1024 * 1024 + 9,
        }
    }
}

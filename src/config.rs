//! Configuration for the call client.

use std::time::Duration;

/// Tunables for a call session. The defaults match what the hosted
/// coordinator expects; embedders usually only override `coordinator_url`.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Coordinator websocket endpoint.
    pub coordinator_url: String,
    /// Upper bound on initial join attempts before giving up.
    pub max_join_retries: u32,
    /// Timeout for a single coordinator request/response round trip.
    pub request_timeout: Duration,
    /// Base interval between heartbeat pings.
    pub ping_interval: Duration,
    /// Random extra delay added to each ping, spreading load on the server.
    pub ping_jitter: Duration,
    /// Debounce window for batched ancillary reporting (stats etc.).
    pub debounce_window: Duration,
    /// How long the reconnect loop keeps trying before declaring the call
    /// unrecoverable. Zero means no limit.
    pub disconnection_timeout: Duration,
    /// Fallback fast-reconnect deadline used until the SFU announces one.
    pub fast_reconnect_deadline: Duration,
    /// Interval between stats snapshots pushed through the batcher.
    /// Zero disables stats reporting.
    pub stats_interval: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "wss://video.example.com/ws/connect".to_string(),
            max_join_retries: 3,
            request_timeout: Duration::from_secs(10),
            // 25s +/- jitter keeps us inside the server's 35s idle cutoff
            ping_interval: Duration::from_secs(25),
            ping_jitter: Duration::from_secs(5),
            debounce_window: Duration::from_millis(1200),
            disconnection_timeout: Duration::from_secs(120),
            fast_reconnect_deadline: Duration::from_secs(10),
            stats_interval: Duration::from_secs(8),
        }
    }
}

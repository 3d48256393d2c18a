use serde::Deserialize;

use crate::constants::DEFAULT_LISTENER_BUFFER;

/// Watch hub tuning.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct WatchConfig {
    /// Capacity of each subscriber's event queue. Dispatch applies
    /// backpressure instead of dropping, so slow listeners stall their
    /// connection rather than lose events.
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,

    /// Rebuild state via list-and-diff when a resume token has expired.
    /// When disabled an expired token tears the connection down instead.
    #[serde(default = "default_resync_on_expired")]
    pub resync_on_expired: bool,
}

impl WatchConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listener_buffer == 0 {
            return Err("watch.listener_buffer must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            listener_buffer: default_listener_buffer(),
            resync_on_expired: default_resync_on_expired(),
        }
    }
}

fn default_listener_buffer() -> usize {
    DEFAULT_LISTENER_BUFFER
}
fn default_resync_on_expired() -> bool {
    true
}

use std::time::Duration;

use pixelchat_media::DEFAULT_MAX_DIMENSION;

use crate::connection::ReconnectPolicy;

const MAX_IMAGE_DIMENSION_VAR: &str = "PIXELCHAT_MAX_IMAGE_DIMENSION";
const TYPING_TIMEOUT_VAR: &str = "PIXELCHAT_TYPING_TIMEOUT_MS";
const JOIN_TIMEOUT_VAR: &str = "PIXELCHAT_JOIN_TIMEOUT_MS";

/// Tunables for a room session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Caps attachment pixel dimensions
    pub max_image_dimension: u32,
    /// Typing peers silent for longer than this are evicted
    pub typing_timeout: Duration,
    /// How long to wait for the server to acknowledge a join, and for the
    /// transport to take queued commands after leaving
    pub join_timeout: Duration,
    /// Used by [`spawn_connection`](crate::spawn_connection) when the socket drops
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            typing_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `PIXELCHAT_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(max) = parse_var(&lookup, MAX_IMAGE_DIMENSION_VAR).filter(|&max| max > 0) {
            config.max_image_dimension =
                u32::try_from(max).unwrap_or(config.max_image_dimension);
        }
        if let Some(ms) = parse_var(&lookup, TYPING_TIMEOUT_VAR) {
            config.typing_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, JOIN_TIMEOUT_VAR) {
            config.join_timeout = Duration::from_millis(ms);
        }

        config
    }

    /// How often stale typing peers are looked for
    pub(crate) fn typing_sweep_interval(&self) -> Duration {
        (self.typing_timeout / 2).max(Duration::from_millis(100))
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Ignoring invalid configuration value");
            None
        }
    }
}

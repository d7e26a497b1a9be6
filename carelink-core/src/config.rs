//! Timeout configuration for live sessions

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing knobs for the live session bridge and the session store
///
/// All values are seconds. Defaults match the original deployment: a long
/// setup window for slow mobile connections, an hour of idle tolerance for
/// long conversations, and a one-minute resumption window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// How long a new connection may take to send its setup frame
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// How long a session may sit with no frames in either direction
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// How long a saved resumption handle stays usable
    #[serde(default = "default_resume_window_secs")]
    pub resume_window_secs: u64,

    /// Interval between keepalive frames sent while a session is active
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
}

fn default_handshake_timeout_secs() -> u64 {
    600
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

fn default_resume_window_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            resume_window_secs: default_resume_window_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl LiveConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn resume_window(&self) -> Duration {
        Duration::from_secs(self.resume_window_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_deployment_values() {
        let config = LiveConfig::default();
        assert_eq!(config.handshake_timeout(), Duration::from_secs(600));
        assert_eq!(config.idle_timeout(), Duration::from_secs(3600));
        assert_eq!(config.resume_window(), Duration::from_secs(60));
        assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
    }

    #[test]
    fn deserialize_fills_missing_fields_with_defaults() {
        let config: LiveConfig = serde_json::from_str(r#"{"resume_window_secs": 120}"#).unwrap();
        assert_eq!(config.resume_window_secs, 120);
        assert_eq!(config.handshake_timeout_secs, 600);
        assert_eq!(config.keepalive_interval_secs, 30);
    }
}

//! Peer configuration, loaded from TOML with defaults.

use crate::error::WireError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Maximum single frame size on stream transports (16 MB).
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Default deadline for reply-expecting calls.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Configuration for a [`Peer`](crate::Peer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Human-readable label attached to this peer's log lines.
    pub node_name: String,
    /// Deadline for reply-expecting calls, in milliseconds.
    /// `None` or `0` waits forever.
    pub call_timeout_ms: Option<u64>,
    /// Largest frame accepted by stream transports.
    pub max_message_size: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            node_name: "portal-node".to_string(),
            call_timeout_ms: Some(DEFAULT_CALL_TIMEOUT_MS),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl PeerConfig {
    /// Parse a config from TOML. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, WireError> {
        toml::from_str(contents).map_err(|e| WireError::Config(e.to_string()))
    }

    /// Call deadline as a [`Duration`].
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Builder-style override of the call deadline.
    ///
    /// Sub-millisecond deadlines round up to 1 ms; only `None` or a zero
    /// duration disables the deadline.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| {
            let ms = t.as_nanos().div_ceil(1_000_000);
            u64::try_from(ms).unwrap_or(u64::MAX)
        });
        self
    }
}

/// Load a peer configuration from a TOML file.
///
/// A missing path, an unreadable file or a parse failure all yield the
/// defaults; failures are logged.
pub fn load_config(path: Option<&Path>) -> PeerConfig {
    let Some(path) = path else {
        return PeerConfig::default();
    };

    match std::fs::read_to_string(path) {
        Ok(contents) => match PeerConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to parse config, using defaults"
                );
                PeerConfig::default()
            }
        },
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to read config file, using defaults"
            );
            PeerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.node_name, "portal-node");
        assert_eq!(config.call_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PeerConfig::from_toml_str("node_name = \"worker\"").unwrap();
        assert_eq!(config.node_name, "worker");
        assert_eq!(config.call_timeout_ms, Some(DEFAULT_CALL_TIMEOUT_MS));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let config = PeerConfig::from_toml_str("call_timeout_ms = 0").unwrap();
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn test_short_timeout_is_not_disabled() {
        let config = PeerConfig::default().with_call_timeout(Some(Duration::from_micros(300)));
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(1)));

        let config = PeerConfig::default().with_call_timeout(Some(Duration::from_micros(1500)));
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(2)));

        let config = PeerConfig::default().with_call_timeout(None);
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PeerConfig::from_toml_str("call_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, WireError::Config(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portal.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "node_name = \"host\"").unwrap();
        writeln!(f, "call_timeout_ms = 250").unwrap();
        writeln!(f, "max_message_size = 1024").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.node_name, "host");
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_message_size, 1024);
    }

    #[test]
    fn test_load_config_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("nope.toml")));
        assert_eq!(config, PeerConfig::default());
    }
}

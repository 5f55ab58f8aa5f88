use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default base URL of the vision backend.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:5000";
/// Default Engine.IO mount path.
pub const DEFAULT_CHANNEL_PATH: &str = "/socket.io/";
/// Default MJPEG route on the backend.
pub const DEFAULT_STREAM_PATH: &str = "/video_feed";

/// Reconnection behavior for the event channel.
///
/// The defaults match the stock Socket.IO client: reconnect forever, starting
/// at one second and doubling up to five seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// `None` retries without limit.
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            initial_delay_ms: 1_000,
            max_delay_ms: 5_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn allows(&self, attempts: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Backoff before the given (zero-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let delay = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms.max(self.initial_delay_ms));
        Duration::from_millis(delay)
    }
}

/// Settings for the real-time event channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub endpoint: String,
    pub path: String,
    pub namespace: String,
    /// Extra slack on top of the server's ping interval before a poll is
    /// considered dead. `None` uses the server's ping timeout.
    pub poll_grace_ms: Option<u64>,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            path: DEFAULT_CHANNEL_PATH.into(),
            namespace: "/".into(),
            poll_grace_ms: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ChannelConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

/// Settings for the MJPEG image stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// `None` waits on the stream request indefinitely.
    pub connect_timeout_ms: Option<u64>,
    pub max_frame_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: None,
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

/// Everything a live view needs to attach to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub channel: ChannelConfig,
    pub stream: StreamConfig,
    /// Full URL of the image stream. `None` derives it from the channel endpoint.
    pub stream_url: Option<String>,
    pub stream_enabled: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            stream: StreamConfig::default(),
            stream_url: None,
            stream_enabled: true,
        }
    }
}

impl IngestConfig {
    pub fn resolved_stream_url(&self) -> String {
        self.stream_url.clone().unwrap_or_else(|| {
            format!(
                "{}{}",
                self.channel.endpoint.trim_end_matches('/'),
                DEFAULT_STREAM_PATH
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(5_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(5_000));
    }

    #[test]
    fn reconnect_attempt_limits() {
        let unlimited = ReconnectPolicy::default();
        assert!(unlimited.allows(10_000));

        let bounded = ReconnectPolicy {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert!(bounded.allows(1));
        assert!(!bounded.allows(2));
        assert!(!ReconnectPolicy::disabled().allows(0));
    }

    #[test]
    fn stream_url_follows_endpoint() {
        let mut config = IngestConfig::default();
        config.channel.endpoint = "http://10.0.0.2:5000/".into();
        assert_eq!(config.resolved_stream_url(), "http://10.0.0.2:5000/video_feed");

        config.stream_url = Some("http://cam/feed".into());
        assert_eq!(config.resolved_stream_url(), "http://cam/feed");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"channel":{"endpoint":"http://x:1"}}"#).unwrap();
        assert_eq!(config.channel.endpoint, "http://x:1");
        assert_eq!(config.channel.path, DEFAULT_CHANNEL_PATH);
        assert!(config.channel.reconnect.enabled);
        assert!(config.stream.connect_timeout().is_none());
    }
}

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::media::{CandidateFilter, WebRtcConfig};
use crate::transport::RetryPolicy;

pub const DEFAULT_SIGNALING_URL: &str = "wss://pi4b.localhost.direct:8765";

/// Panel client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Signaling websocket of the SIP bridge
    pub signaling_url: String,
    /// Address prefixes whose local candidates are never forwarded
    pub private_prefixes: Vec<String>,
    pub poll_interval: Duration,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub stun_urls: Vec<String>,
    pub recv_audio: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("signaling url must use ws:// or wss://, got {0:?}")]
    SignalingScheme(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            private_prefixes: vec!["172.".to_string()],
            poll_interval: Duration::from_secs(5),
            retry_attempts: 10,
            retry_base_delay: Duration::from_millis(100),
            stun_urls: Vec::new(),
            recv_audio: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            signaling_url: env::var("PANEL_SIGNALING_URL").unwrap_or(defaults.signaling_url),
            private_prefixes: env_list("PANEL_PRIVATE_PREFIXES")
                .unwrap_or(defaults.private_prefixes),
            poll_interval: env_parse::<u64>("PANEL_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            retry_attempts: env_parse("PANEL_RETRY_ATTEMPTS").unwrap_or(defaults.retry_attempts),
            retry_base_delay: env_parse::<u64>("PANEL_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            stun_urls: env_list("PANEL_STUN_URLS").unwrap_or(defaults.stun_urls),
            recv_audio: env::var("PANEL_RECV_AUDIO")
                .map(|value| crate::telemetry::is_truthy(&value))
                .unwrap_or(defaults.recv_audio),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(ConfigError::SignalingScheme(self.signaling_url.clone()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll interval"));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Zero("retry attempts"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: self.retry_base_delay,
        }
    }

    pub fn candidate_filter(&self) -> CandidateFilter {
        CandidateFilter::new(self.private_prefixes.iter().cloned())
    }

    pub fn webrtc(&self) -> WebRtcConfig {
        WebRtcConfig {
            ice_servers: self.stun_urls.clone(),
            recv_audio: self.recv_audio,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}

/// Comma separated list; an empty value yields an empty list.
fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
}

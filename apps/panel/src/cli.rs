use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "panel",
    about = "Door-panel client for the interslug SIP/WebRTC bridge",
    version
)]
pub struct Cli {
    #[arg(
        long = "url",
        value_name = "URL",
        help = "Signaling websocket of the bridge (overrides PANEL_SIGNALING_URL)"
    )]
    pub signaling_url: Option<String>,

    #[arg(
        long = "private-prefix",
        value_name = "PREFIX",
        help = "Drop local ICE candidates starting with PREFIX (repeatable)"
    )]
    pub private_prefixes: Vec<String>,

    #[arg(long = "poll-interval-ms", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long = "stun", value_name = "URL", help = "STUN server url (repeatable)")]
    pub stun_urls: Vec<String>,

    #[arg(
        long = "recv-audio",
        help = "Offer a receive-only audio transceiver from the first offer"
    )]
    pub recv_audio: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "PANEL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "PANEL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

impl Cli {
    /// Applies flags on top of an environment-derived config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.signaling_url {
            config.signaling_url = url.clone();
        }
        if !self.private_prefixes.is_empty() {
            config.private_prefixes = self.private_prefixes.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if !self.stun_urls.is_empty() {
            config.stun_urls = self.stun_urls.clone();
        }
        if self.recv_audio {
            config.recv_audio = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "panel",
            "--url",
            "ws://10.0.0.2:8765",
            "--private-prefix",
            "10.",
            "--private-prefix",
            "172.",
            "--recv-audio",
            "--log-level",
            "debug",
        ])
        .expect("parse");
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(config.signaling_url, "ws://10.0.0.2:8765");
        assert_eq!(config.private_prefixes, vec!["10.", "172."]);
        assert!(config.recv_audio);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(cli.logging.to_config().level, LogLevel::Debug);
    }
}

use std::num::NonZeroUsize;
use std::sync::Arc;

use envconfig::Envconfig;
use loader_core::notify::{LogNotifier, Notifier, SlackNotifier};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "handlers.json")]
    pub handlers_path: String,

    #[envconfig(default = "./data/source")]
    pub source_root: String,

    #[envconfig(default = "./data/destination")]
    pub destination_root: String,

    /// Projection batches allowed to run at once across every handler.
    #[envconfig(default = "16")]
    pub max_concurrent_batches: NonZeroUsize,

    #[envconfig(default = "info")]
    pub log_level: String,

    #[envconfig(default = "false")]
    pub pretty_logging: bool,

    #[envconfig(nested = true)]
    pub slack: SlackConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Envconfig, Clone)]
pub struct SlackConfig {
    pub slack_token: Option<String>,

    pub slack_channel: Option<String>,

    pub slack_username: Option<String>,

    pub slack_icon_emoji: Option<String>,
}

impl SlackConfig {
    /// The notifier every handler reports to: Slack when both a token and a channel are set,
    /// log lines otherwise.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        let (Some(token), Some(channel)) = (&self.slack_token, &self.slack_channel) else {
            return Arc::new(LogNotifier);
        };

        let mut notifier = SlackNotifier::new(channel, token);
        if let Some(username) = &self.slack_username {
            notifier = notifier.username(username);
        }
        if let Some(icon_emoji) = &self.slack_icon_emoji {
            notifier = notifier.icon_emoji(icon_emoji);
        }
        Arc::new(notifier)
    }

    pub fn is_enabled(&self) -> bool {
        self.slack_token.is_some() && self.slack_channel.is_some()
    }
}

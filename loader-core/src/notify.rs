use std::time;

use anyhow::{bail, Context, Error};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::event::Event;

/// The outcome of one handler processing one event, handed to the handler's notifier exactly once.
#[derive(Debug, Clone, Copy)]
pub struct Outcome<'a> {
    pub event: &'a Event,
    pub handler: &'a str,
    pub error: Option<&'a PipelineError>,
    pub rows_loaded: usize,
    pub elapsed: time::Duration,
}

impl Outcome<'_> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Reports outcomes to some external sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, outcome: &Outcome<'_>) -> Result<(), Error>;
}

/// Reports outcomes as log lines.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, outcome: &Outcome<'_>) -> Result<(), Error> {
        match outcome.error {
            None => info!(
                handler = outcome.handler,
                rows = outcome.rows_loaded,
                "{} handler successfully loaded {}",
                outcome.handler,
                outcome.event.name
            ),
            Some(e) => error!(
                handler = outcome.handler,
                kind = e.kind(),
                "{} handler failed to load {}: {}",
                outcome.handler,
                outcome.event.name,
                e
            ),
        }
        Ok(())
    }
}

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Posts outcomes to a Slack channel through `chat.postMessage`.
///
/// Requires a bot token. Recommended scopes are `chat:write`, `chat:write.customize` and
/// `chat:write.public`.
pub struct SlackNotifier {
    channel: String,
    token: String,
    icon_emoji: Option<String>,
    username: Option<String>,
    api_url: String,
    client: reqwest::Client,
}

#[derive(Serialize, Debug)]
struct SlackMessage<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<&'a str>,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

#[derive(Deserialize, Debug)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackNotifier {
    pub fn new(channel: &str, token: &str) -> Self {
        Self {
            channel: channel.to_owned(),
            token: token.to_owned(),
            icon_emoji: None,
            username: None,
            api_url: SLACK_POST_MESSAGE_URL.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    pub fn icon_emoji(mut self, icon_emoji: &str) -> Self {
        self.icon_emoji = Some(icon_emoji.to_owned());
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_owned());
        self
    }

    pub fn api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.to_owned();
        self
    }

    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn text(outcome: &Outcome<'_>) -> String {
        match outcome.error {
            None => format!(
                ":white_check_mark: {} handler successfully loaded {}",
                outcome.handler, outcome.event.name
            ),
            Some(e) => format!(
                ":x: {} handler failed to load {}: {}",
                outcome.handler, outcome.event.name, e
            ),
        }
    }

    async fn post_message(&self, message: &SlackMessage<'_>) -> Result<(), Error> {
        debug!("posting slack message: {:?}", message);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(message)
            .send()
            .await
            .context("failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read response body")?;

        if status.is_client_error() || status.is_server_error() {
            bail!("slack request failed with status code {} ({})", status, body);
        }

        let response: SlackResponse =
            serde_json::from_str(&body).context("failed to unmarshal response body")?;
        if !response.ok {
            bail!(
                "failed to send message: {}",
                response.error.unwrap_or_default()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, outcome: &Outcome<'_>) -> Result<(), Error> {
        let message = SlackMessage {
            channel: &self.channel,
            icon_emoji: self.icon_emoji.as_deref(),
            text: Self::text(outcome),
            username: self.username.as_deref(),
        };

        self.post_message(&message)
            .await
            .context("slack postMessage failed")
    }
}

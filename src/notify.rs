//! Policy violation notifications
//!
//! The gateway hands a [`NotificationMessage`] to the [`Dispatcher`], which
//! spawns the send and returns straight away. Delivery failures are logged
//! and otherwise ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::{NotificationRoute, SlackConfig};

const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub text: String,
    pub channel: String,
    pub icon: Option<String>,
}

impl NotificationMessage {
    /// Builds the message for a route, filling `{name}` placeholders in its
    /// template from `vars`.
    pub fn from_route(route: &NotificationRoute, vars: &[(&str, &str)]) -> Self {
        Self {
            text: render_template(&route.message, vars),
            channel: route.channel.clone(),
            icon: route.icon.clone(),
        }
    }
}

/// Replaces each `{key}` in `template` in one pass, so substituted values are
/// never expanded again. Unknown placeholders are left as is.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut text = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v, close))
        });

        match value {
            Some((v, close)) => {
                text.push_str(v);
                rest = &after[close + 1..];
            }
            None => {
                text.push('{');
                rest = after;
            }
        }
    }

    text.push_str(rest);
    text
}

/// Delivers a message to a chat channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_emoji: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
}

/// Posts messages through Slack's `chat.postMessage`.
pub struct SlackNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
    username: Option<String>,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::ConfigError("Slack token is not set".to_string()))?;

        let api_base = match (&config.api_base, &config.team) {
            (Some(base), _) => base.trim_end_matches('/').to_string(),
            (None, Some(team)) if !team.is_empty() => format!("https://{}.slack.com/api", team),
            _ => SLACK_API_BASE.to_string(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs()))
            .build()?;

        Ok(Self {
            client,
            api_base,
            token,
            username: config.username.clone(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        let icon = message.icon.as_deref();
        // Slack takes `:emoji:` names and image URLs in separate fields.
        let (icon_emoji, icon_url) = match icon {
            Some(i) if i.starts_with(':') => (Some(i), None),
            Some(i) => (None, Some(i)),
            None => (None, None),
        };
        let body = PostMessage {
            channel: &message.channel,
            text: &message.text,
            username: self.username.as_deref(),
            icon_emoji,
            icon_url,
        };

        let response: SlackResponse = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.ok {
            Ok(())
        } else {
            Err(GatewayError::NotificationRejected(
                response.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Writes notifications to the log. Used when no Slack token is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        info!(channel = %message.channel, "Notification: {}", message.text);
        Ok(())
    }
}

/// Fire-and-forget front for a [`Notifier`].
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Slack when a token is configured, the log otherwise.
    pub fn from_config(config: &SlackConfig) -> Result<Self> {
        if config.has_token() {
            Ok(Self::new(Arc::new(SlackNotifier::new(config)?)))
        } else {
            warn!("No Slack token configured; policy notifications will only be logged");
            Ok(Self::new(Arc::new(LogNotifier)))
        }
    }

    /// Spawns the send. Must be called from within a tokio runtime.
    pub fn dispatch(&self, message: NotificationMessage) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            match notifier.send(&message).await {
                Ok(()) => debug!(channel = %message.channel, "Notification delivered"),
                Err(e) => warn!(channel = %message.channel, "Notification dispatch failed: {}", e),
            }
        })
    }
}

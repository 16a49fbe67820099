pub mod api;
pub mod auth;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod notify;
pub mod policy;
pub mod webhook;
pub mod window;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use error::{GatewayError, Result};
use gateway::WebhookGateway;
use policy::BranchingRules;
use window::DeploymentWindowConfig;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_SLACK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DEPLOYMENT_CHANNEL: &str = "#deployments";
const DEFAULT_GITHUB_CHANNEL: &str = "#github";
const DEFAULT_DEPLOYMENT_MESSAGE: &str =
    "Deployment blocked: deployments are only allowed between {from}:00 and {to}:59.";
const DEFAULT_BRANCHING_MESSAGE: &str =
    "Push to `{branch}` rejected: branch name does not follow the naming convention ({checks}).";

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub deployment: DeploymentConfig,
    pub github: GithubConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    pub log_directory: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            log_directory: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeploymentConfig {
    pub webhook_secret: String,
    #[serde(flatten)]
    pub window: DeploymentWindowConfig,
    #[serde(default = "NotificationRoute::deployment")]
    pub notification: NotificationRoute,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    pub webhook_secret: String,
    #[serde(default)]
    pub branching: BranchingRules,
    #[serde(default = "NotificationRoute::branching")]
    pub notification: NotificationRoute,
}

/// Where and how a policy failure of one kind is reported.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NotificationRoute {
    pub channel: String,
    pub message: String,
    pub icon: Option<String>,
}

impl NotificationRoute {
    fn deployment() -> Self {
        Self {
            channel: DEFAULT_DEPLOYMENT_CHANNEL.to_string(),
            message: DEFAULT_DEPLOYMENT_MESSAGE.to_string(),
            icon: None,
        }
    }

    fn branching() -> Self {
        Self {
            channel: DEFAULT_GITHUB_CHANNEL.to_string(),
            message: DEFAULT_BRANCHING_MESSAGE.to_string(),
            icon: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SlackConfig {
    pub token: Option<String>,
    pub team: Option<String>,
    pub username: Option<String>,
    /// Overrides the API base URL derived from `team`.
    pub api_base: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl SlackConfig {
    /// Returns true if a usable (non-empty) token is set.
    pub fn has_token(&self) -> bool {
        self.token.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_SLACK_TIMEOUT_SECS)
    }
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

impl GatewayConfig {
    /// Load and validate the configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: GatewayConfig = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup using the
    /// environment variable names. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| GatewayError::ConfigError(format!("{} is not set", key)))
        };
        let hour = |key: &str| -> Result<u32> {
            let raw = required(key)?;
            raw.trim().parse::<u32>().map_err(|e| {
                GatewayError::ConfigError(format!("{} must be an hour (0-23), got '{}': {}", key, raw, e))
            })
        };

        let route = |channel: &str, message: &str, icon: &str, default: NotificationRoute| {
            NotificationRoute {
                channel: get(channel).unwrap_or(default.channel),
                message: get(message).unwrap_or(default.message),
                icon: get(icon),
            }
        };

        let config = GatewayConfig {
            server: ServerConfig {
                bind_address: get("BIND_ADDRESS").unwrap_or_else(default_bind_address),
                log_directory: get("LOG_DIRECTORY").map(PathBuf::from),
            },
            deployment: DeploymentConfig {
                webhook_secret: required("DEPLOYMENT_WEBHOOK_SECRET")?,
                window: DeploymentWindowConfig {
                    from_hour: hour("DEPLOYMENT_HOUR_FROM")?,
                    to_hour: hour("DEPLOYMENT_HOUR_TO")?,
                },
                notification: route(
                    "SLACK_DEPLOYMENT_CHANNEL",
                    "SLACK_DEPLOYMENT_MESSAGE",
                    "SLACK_DEPLOYMENT_ICON",
                    NotificationRoute::deployment(),
                ),
            },
            github: GithubConfig {
                webhook_secret: required("GITHUB_WEBHOOK_SECRET")?,
                branching: BranchingRules::default(),
                notification: route(
                    "SLACK_GITHUB_CHANNEL",
                    "SLACK_GITHUB_BRANCHING_MESSAGE",
                    "SLACK_GITHUB_ICON",
                    NotificationRoute::branching(),
                ),
            },
            slack: SlackConfig {
                token: get("SLACK_TOKEN"),
                team: get("SLACK_TEAM"),
                username: get("SLACK_USERNAME"),
                api_base: get("SLACK_API_BASE"),
                timeout_secs: None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the components rely on but do not enforce.
    pub fn validate(&self) -> Result<()> {
        if self.deployment.webhook_secret.is_empty() {
            return Err(GatewayError::ConfigError(
                "deployment webhook secret must not be empty".to_string(),
            ));
        }
        if self.github.webhook_secret.is_empty() {
            return Err(GatewayError::ConfigError(
                "github webhook secret must not be empty".to_string(),
            ));
        }
        self.deployment.window.validate()?;
        if self.github.branching.prefixes.is_empty() {
            return Err(GatewayError::ConfigError(
                "at least one workflow branch prefix is required".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct AppState {
    pub gateway: WebhookGateway,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(gateway: WebhookGateway) -> Self {
        Self {
            gateway,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

use std::io;

/// Custom error type for webhook_policy_gate operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid deployment window: from_hour {from_hour} / to_hour {to_hour}")]
    InvalidWindow { from_hour: u32, to_hour: u32 },

    #[error("Notification request failed: {0}")]
    NotificationTransport(#[from] reqwest::Error),

    #[error("Notification rejected by Slack: {0}")]
    NotificationRejected(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

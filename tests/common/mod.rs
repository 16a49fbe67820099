//! Shared fixtures for router tests

use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use webhook_policy_gate::api::create_router;
use webhook_policy_gate::error::Result;
use webhook_policy_gate::gateway::WebhookGateway;
use webhook_policy_gate::notify::{Dispatcher, NotificationMessage, Notifier};
use webhook_policy_gate::window::FixedClock;
use webhook_policy_gate::{AppState, GatewayConfig};

pub const DEPLOY_SECRET: &str = "d3pl0y";
pub const GITHUB_SECRET: &str = "g1thub";

/// Forwards every notification into a channel the test can read.
pub struct ChannelNotifier(mpsc::UnboundedSender<NotificationMessage>);

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        let _ = self.0.send(message.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub notifications: mpsc::UnboundedReceiver<NotificationMessage>,
}

impl TestApp {
    pub async fn next_notification(&mut self) -> NotificationMessage {
        tokio::time::timeout(Duration::from_secs(1), self.notifications.recv())
            .await
            .expect("notification not dispatched")
            .expect("notification channel closed")
    }

    pub async fn assert_no_notification(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            self.notifications.try_recv().is_err(),
            "unexpected notification"
        );
    }
}

pub fn test_config() -> GatewayConfig {
    let vars = [
        ("DEPLOYMENT_WEBHOOK_SECRET", DEPLOY_SECRET),
        ("GITHUB_WEBHOOK_SECRET", GITHUB_SECRET),
        ("DEPLOYMENT_HOUR_FROM", "8"),
        ("DEPLOYMENT_HOUR_TO", "18"),
        ("SLACK_DEPLOYMENT_MESSAGE", "Deployment blocked outside {from}-{to}"),
        ("SLACK_GITHUB_BRANCHING_MESSAGE", "Branch {branch} breaks the convention: {checks}"),
    ];
    GatewayConfig::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .expect("test config is valid")
}

/// Router whose clock is pinned to `hour`.
pub fn test_app(hour: u32) -> TestApp {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(Arc::new(ChannelNotifier(tx)));
    let gateway = WebhookGateway::new(test_config(), dispatcher).with_clock(FixedClock(hour));

    TestApp {
        router: create_router(Arc::new(AppState::new(gateway))),
        notifications: rx,
    }
}

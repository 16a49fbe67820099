//! Per-event orchestration: authenticate, evaluate policy, notify, decide.

use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::GatewayConfig;
use crate::auth::authenticate;
use crate::notify::{Dispatcher, NotificationMessage};
use crate::policy::PushPolicy;
use crate::webhook::{EventKind, Payload, PushPayload, WebhookEvent};
use crate::window::{Clock, LocalClock, hour_in_window};

/// Why an event was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Route token did not match the secret for the event kind.
    Unauthenticated,
    /// The delivery is not something the checks can evaluate.
    Malformed(String),
    /// A policy check failed; a notification was dispatched.
    PolicyViolation(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }

    /// Every rejection maps to 404, whatever its cause.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Decision::Accepted => StatusCode::OK,
            Decision::Rejected(_) => StatusCode::NOT_FOUND,
        }
    }
}

pub struct WebhookGateway {
    config: Arc<GatewayConfig>,
    clock: Arc<dyn Clock>,
    push_policy: PushPolicy,
    dispatcher: Dispatcher,
}

impl WebhookGateway {
    pub fn new(config: GatewayConfig, dispatcher: Dispatcher) -> Self {
        let push_policy = PushPolicy::new(config.github.branching.clone());
        Self {
            config: Arc::new(config),
            clock: Arc::new(LocalClock),
            push_policy,
            dispatcher,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_push_policy(mut self, push_policy: PushPolicy) -> Self {
        self.push_policy = push_policy;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Checks a route token against the secret for `kind`.
    pub fn authenticate(&self, kind: EventKind, token: &str) -> bool {
        let expected = match kind {
            EventKind::Deployment => &self.config.deployment.webhook_secret,
            EventKind::Push => &self.config.github.webhook_secret,
        };
        authenticate(token, expected)
    }

    /// Evaluates one event, starting with its token. Any notification is
    /// dispatched before this returns, without waiting for delivery.
    pub fn handle(&self, event: &WebhookEvent) -> Decision {
        if !self.authenticate(event.kind, &event.token) {
            warn!(kind = %event.kind, "Webhook token mismatch, rejecting");
            return Decision::Rejected(Rejection::Unauthenticated);
        }
        self.handle_authenticated(event)
    }

    /// Evaluates an event whose token the caller has already checked with
    /// [`WebhookGateway::authenticate`].
    pub fn handle_authenticated(&self, event: &WebhookEvent) -> Decision {
        match event.kind {
            EventKind::Deployment => self.handle_deployment(),
            EventKind::Push => self.handle_push(event),
        }
    }

    fn handle_deployment(&self) -> Decision {
        let window = &self.config.deployment.window;
        let hour = self.clock.current_hour();

        if hour_in_window(hour, window) {
            info!(hour, "Deployment inside window, allowing");
            return Decision::Accepted;
        }

        info!(
            hour,
            from_hour = window.from_hour,
            to_hour = window.to_hour,
            "Deployment outside window, blocking"
        );
        let from = window.from_hour.to_string();
        let to = window.to_hour.to_string();
        let message = NotificationMessage::from_route(
            &self.config.deployment.notification,
            &[("from", from.as_str()), ("to", to.as_str())],
        );
        self.dispatcher.dispatch(message);
        Decision::Rejected(Rejection::PolicyViolation(
            "deployment outside permitted window".to_string(),
        ))
    }

    fn handle_push(&self, event: &WebhookEvent) -> Decision {
        let github_event = event.github_event();
        if github_event != Some("push") {
            info!("Not a push delivery; received {:?}", github_event);
            return Decision::Rejected(Rejection::Malformed(format!(
                "unexpected event {:?}",
                github_event
            )));
        }

        let Payload::Json(value) = &event.payload else {
            info!("Push delivery is not JSON, rejecting");
            return Decision::Rejected(Rejection::Malformed("body is not JSON".to_string()));
        };

        let Some(payload) = PushPayload::from_json(value) else {
            info!("Push body is not a JSON object, rejecting");
            return Decision::Rejected(Rejection::Malformed("body is not an object".to_string()));
        };

        let result = self.push_policy.validate(&payload);
        if result.passed {
            debug!(branch = ?result.branch, "Push passed all checks");
            return Decision::Accepted;
        }

        let reason = result.failure_reason.clone().unwrap_or_default();
        if result.is_malformed() {
            info!("Push payload malformed: {}", reason);
            return Decision::Rejected(Rejection::Malformed(reason));
        }

        let branch = result.branch.as_deref().unwrap_or_default();
        info!(branch, "Push rejected: {}", reason);
        let checks = result.violation_summary();
        let message = NotificationMessage::from_route(
            &self.config.github.notification,
            &[("branch", branch), ("checks", checks.as_str())],
        );
        self.dispatcher.dispatch(message);
        Decision::Rejected(Rejection::PolicyViolation(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::notify::Notifier;
    use crate::policy::BranchingRules;
    use crate::window::{DeploymentWindowConfig, FixedClock};
    use crate::{DeploymentConfig, GithubConfig, NotificationRoute, ServerConfig, SlackConfig};
    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::http::HeaderMap;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const DEPLOY_SECRET: &str = "deploy-hash";
    const GITHUB_SECRET: &str = "github-hash";

    struct ChannelNotifier(mpsc::UnboundedSender<NotificationMessage>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn send(&self, message: &NotificationMessage) -> Result<()> {
            let _ = self.0.send(message.clone());
            Ok(())
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig {
            server: ServerConfig::default(),
            deployment: DeploymentConfig {
                webhook_secret: DEPLOY_SECRET.to_string(),
                window: DeploymentWindowConfig {
                    from_hour: 8,
                    to_hour: 18,
                },
                notification: NotificationRoute {
                    channel: "#deployments".to_string(),
                    message: "Deployments only between {from} and {to}".to_string(),
                    icon: None,
                },
            },
            github: GithubConfig {
                webhook_secret: GITHUB_SECRET.to_string(),
                branching: BranchingRules::default(),
                notification: NotificationRoute {
                    channel: "#github".to_string(),
                    message: "Branch {branch} rejected: {checks}".to_string(),
                    icon: None,
                },
            },
            slack: SlackConfig::default(),
        }
    }

    fn gateway(hour: u32) -> (WebhookGateway, mpsc::UnboundedReceiver<NotificationMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(Arc::new(ChannelNotifier(tx)));
        (
            WebhookGateway::new(config(), dispatcher).with_clock(FixedClock(hour)),
            rx,
        )
    }

    fn deployment(token: &str) -> WebhookEvent {
        WebhookEvent::new(
            EventKind::Deployment,
            token,
            HeaderMap::new(),
            Payload::Json(json!({})),
        )
    }

    fn push(payload: Payload) -> WebhookEvent {
        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Event", "push".parse().unwrap());
        WebhookEvent::new(EventKind::Push, GITHUB_SECRET, headers, payload)
    }

    async fn next_notification(
        rx: &mut mpsc::UnboundedReceiver<NotificationMessage>,
    ) -> NotificationMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("notification not dispatched")
            .expect("channel closed")
    }

    async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<NotificationMessage>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "unexpected notification");
    }

    #[tokio::test]
    async fn deployment_inside_window_is_accepted() {
        let (gateway, mut rx) = gateway(10);
        let decision = gateway.handle(&deployment(DEPLOY_SECRET));
        assert_eq!(decision, Decision::Accepted);
        assert_eq!(decision.status_code(), StatusCode::OK);
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn deployment_outside_window_is_blocked_and_notified() {
        let (gateway, mut rx) = gateway(20);
        let decision = gateway.handle(&deployment(DEPLOY_SECRET));
        assert!(matches!(
            decision,
            Decision::Rejected(Rejection::PolicyViolation(_))
        ));
        assert_eq!(decision.status_code(), StatusCode::NOT_FOUND);

        let message = next_notification(&mut rx).await;
        assert_eq!(message.channel, "#deployments");
        assert_eq!(message.text, "Deployments only between 8 and 18");
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn wrong_token_is_rejected_silently() {
        let (gateway, mut rx) = gateway(20);
        assert_eq!(
            gateway.handle(&deployment("DEPLOY-HASH")),
            Decision::Rejected(Rejection::Unauthenticated)
        );
        // Tokens are per event kind.
        assert_eq!(
            gateway.handle(&deployment(GITHUB_SECRET)),
            Decision::Rejected(Rejection::Unauthenticated)
        );
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn valid_workflow_branch_is_accepted() {
        let (gateway, mut rx) = gateway(3);
        let event = push(Payload::Json(json!({"ref": "refs/heads/feature-42"})));
        assert_eq!(gateway.handle(&event), Decision::Accepted);
        // Resubmitting yields the same outcome.
        assert_eq!(gateway.handle(&event), Decision::Accepted);
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn bad_branch_is_rejected_with_one_notification() {
        let (gateway, mut rx) = gateway(10);
        let event = push(Payload::Json(json!({"ref": "refs/heads/bugfix-1"})));
        let decision = gateway.handle(&event);
        assert!(matches!(
            decision,
            Decision::Rejected(Rejection::PolicyViolation(_))
        ));

        let message = next_notification(&mut rx).await;
        assert_eq!(message.channel, "#github");
        assert!(message.text.contains("bugfix-1"));
        assert!(message.text.contains("branch-naming"));
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn missing_ref_is_malformed_without_notification() {
        let (gateway, mut rx) = gateway(10);
        let event = push(Payload::Json(json!({"commits": []})));
        assert_eq!(
            gateway.handle(&event),
            Decision::Rejected(Rejection::Malformed("missing ref".to_string()))
        );
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn non_push_deliveries_are_malformed() {
        let (gateway, mut rx) = gateway(10);

        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Event", "ping".parse().unwrap());
        let ping = WebhookEvent::new(
            EventKind::Push,
            GITHUB_SECRET,
            headers,
            Payload::Json(json!({"ref": "refs/heads/feature-1"})),
        );
        assert!(matches!(
            gateway.handle(&ping),
            Decision::Rejected(Rejection::Malformed(_))
        ));

        let raw = push(Payload::Raw(Bytes::from_static(b"ref=refs/heads/feature-1")));
        assert!(matches!(
            gateway.handle(&raw),
            Decision::Rejected(Rejection::Malformed(_))
        ));

        let not_object = push(Payload::Json(json!(["refs/heads/feature-1"])));
        assert!(matches!(
            gateway.handle(&not_object),
            Decision::Rejected(Rejection::Malformed(_))
        ));
        assert_silent(&mut rx).await;
    }

    struct RequireCommits;

    impl crate::policy::PushCheck for RequireCommits {
        fn name(&self) -> &'static str {
            "commits"
        }

        fn check(&self, payload: &PushPayload) -> crate::policy::CheckOutcome {
            if payload.commits.is_empty() {
                crate::policy::CheckOutcome::Violated(vec!["no commits".to_string()])
            } else {
                crate::policy::CheckOutcome::Passed
            }
        }
    }

    #[tokio::test]
    async fn extra_push_checks_are_reported_by_name() {
        let (gateway, mut rx) = gateway(10);
        let gateway = gateway.with_push_policy(
            PushPolicy::new(BranchingRules::default()).with_check(RequireCommits),
        );

        let event = push(Payload::Json(json!({"ref": "refs/heads/feature-7"})));
        assert!(matches!(
            gateway.handle(&event),
            Decision::Rejected(Rejection::PolicyViolation(_))
        ));
        let message = next_notification(&mut rx).await;
        assert_eq!(message.text, "Branch feature-7 rejected: commits: no commits");

        let event = push(Payload::Json(json!({
            "ref": "refs/heads/feature-7",
            "commits": [{"id": "abc", "added": ["README.md"]}]
        })));
        assert_eq!(gateway.handle(&event), Decision::Accepted);
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn non_string_ref_is_a_missing_ref() {
        let (gateway, mut rx) = gateway(10);
        let event = push(Payload::Json(json!({"ref": 5})));
        assert_eq!(
            gateway.handle(&event),
            Decision::Rejected(Rejection::Malformed("missing ref".to_string()))
        );
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn reserved_commit_fields_do_not_block_valid_branches() {
        let (gateway, mut rx) = gateway(10);
        for body in [
            json!({"ref": "refs/heads/feature-42", "commits": null}),
            json!({"ref": "refs/heads/feature-42", "commits": [{"id": 1}]}),
            json!({"ref": "refs/heads/feature-42", "commits": [{"added": null}]}),
        ] {
            let event = push(Payload::Json(body.clone()));
            assert_eq!(gateway.handle(&event), Decision::Accepted, "{}", body);
        }
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn handle_authenticated_skips_the_token_check() {
        let (gateway, _rx) = gateway(10);
        let event = deployment("not-the-secret");
        assert_eq!(
            gateway.handle(&event),
            Decision::Rejected(Rejection::Unauthenticated)
        );
        assert_eq!(gateway.handle_authenticated(&event), Decision::Accepted);
    }

    #[tokio::test]
    async fn push_checks_ignore_the_deployment_window() {
        let (gateway, _rx) = gateway(23);
        let event = push(Payload::Json(json!({"ref": "refs/heads/master"})));
        assert_eq!(gateway.handle(&event), Decision::Accepted);
    }
}

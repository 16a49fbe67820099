//! Webhook related structures

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde_json::Value;
use std::fmt;

/// Header GitHub uses to name the sub-event of a delivery.
pub const GITHUB_EVENT_HEADER: &str = "X-GitHub-Event";

const REFS_HEADS: &str = "refs/heads/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Deployment,
    Push,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Deployment => write!(f, "deployment"),
            EventKind::Push => write!(f, "push"),
        }
    }
}

/// Request body as handed over by the router.
#[derive(Debug, Clone)]
pub enum Payload {
    Json(Value),
    Raw(Bytes),
}

/// One inbound delivery, already classified by the route it arrived on.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: EventKind,
    pub token: String,
    pub headers: HeaderMap,
    pub payload: Payload,
}

impl WebhookEvent {
    pub fn new(kind: EventKind, token: impl Into<String>, headers: HeaderMap, payload: Payload) -> Self {
        Self {
            kind,
            token: token.into(),
            headers,
            payload,
        }
    }

    /// Value of the `X-GitHub-Event` header, if present and valid UTF-8.
    pub fn github_event(&self) -> Option<&str> {
        self.headers
            .get(GITHUB_EVENT_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

/// The fields of a GitHub push payload the policy checks read.
#[derive(Debug, Clone, Default)]
pub struct PushPayload {
    pub git_ref: Option<String>,
    pub commits: Vec<Commit>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    pub id: Option<String>,
    pub message: Option<String>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
}

impl Commit {
    /// Entries that are not objects yield `None`; fields of the wrong type
    /// read as absent.
    fn from_json(value: &Value) -> Option<Self> {
        let commit = value.as_object()?;
        let text = |key: &str| commit.get(key).and_then(Value::as_str).map(String::from);
        let paths = |key: &str| -> Vec<String> {
            commit
                .get(key)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        };

        Some(Self {
            id: text("id"),
            message: text("message"),
            added: paths("added"),
            modified: paths("modified"),
        })
    }
}

impl PushPayload {
    /// Reads a push body. Returns `None` unless the body is a JSON object.
    /// A `ref` that is not a string reads as missing; `commits` entries of
    /// the wrong shape are skipped.
    pub fn from_json(value: &Value) -> Option<Self> {
        let body = value.as_object()?;
        let git_ref = body.get("ref").and_then(Value::as_str).map(String::from);
        let commits = body
            .get("commits")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Commit::from_json)
            .collect();

        Some(Self { git_ref, commits })
    }

    pub fn with_ref(git_ref: impl Into<String>) -> Self {
        Self {
            git_ref: Some(git_ref.into()),
            commits: Vec::new(),
        }
    }

    /// Branch name with the `refs/heads/` prefix stripped. `None` when the
    /// payload carries no `ref`.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .as_deref()
            .map(|r| r.strip_prefix(REFS_HEADS).unwrap_or(r))
    }
}

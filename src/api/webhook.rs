//! Webhook handlers for deployment triggers and GitHub pushes

use axum::{
    body::{Body, Bytes},
    extract::{Path, State as AxumState},
    http::{HeaderMap, StatusCode, header},
};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::SharedState;
use crate::webhook::{EventKind, Payload, WebhookEvent};

/// Largest body accepted from either service.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// POST /deployment/{token}
pub async fn handle_deployment(
    AxumState(state): AxumState<SharedState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    receive(state, EventKind::Deployment, token, headers, body).await
}

/// POST /github/{token}
pub async fn handle_github(
    AxumState(state): AxumState<SharedState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    receive(state, EventKind::Push, token, headers, body).await
}

async fn receive(
    state: SharedState,
    kind: EventKind,
    token: String,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    let span = info_span!("webhook", request_id = %Uuid::now_v7(), %kind);

    async move {
        // The body is left unread until the token checks out.
        if !state.gateway.authenticate(kind, &token) {
            warn!("Webhook token mismatch, rejecting");
            return StatusCode::NOT_FOUND;
        }

        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(b) => b,
            Err(e) => {
                info!("Could not read request body: {}", e);
                return StatusCode::NOT_FOUND;
            }
        };

        let payload = read_payload(&headers, bytes);
        let event = WebhookEvent::new(kind, token, headers, payload);
        let decision = state.gateway.handle_authenticated(&event);

        info!(accepted = decision.is_accepted(), "Webhook handled");
        decision.status_code()
    }
    .instrument(span)
    .await
}

/// JSON bodies with a JSON content type become structured payloads; anything
/// else is passed on as raw bytes.
fn read_payload(headers: &HeaderMap, bytes: Bytes) -> Payload {
    if !is_json(headers) {
        return Payload::Raw(bytes);
    }
    match serde_json::from_slice(&bytes) {
        Ok(value) => Payload::Json(value),
        Err(e) => {
            info!("Could not parse JSON body: {:?}", e);
            Payload::Raw(bytes)
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

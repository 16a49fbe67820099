//! API module for all HTTP handlers
//!
//! The two webhook endpoints carry their secret as the last path segment.

pub mod handlers;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

// Re-export handlers
pub use handlers::root;
pub use webhook::{handle_deployment, handle_github};

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/deployment/{token}", routing::post(handle_deployment))
        .route("/github/{token}", routing::post(handle_github))
        .with_state(state)
}

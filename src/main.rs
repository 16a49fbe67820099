use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use webhook_policy_gate::api::create_router;
use webhook_policy_gate::error::GatewayError;
use webhook_policy_gate::gateway::WebhookGateway;
use webhook_policy_gate::logging::setup_logging;
use webhook_policy_gate::notify::Dispatcher;
use webhook_policy_gate::{AppState, GatewayConfig};

const DEFAULT_CONFIG_PATH: &str = "gateway_config.toml";

/// Reads `GATEWAY_CONFIG` (or the default file when it exists), falling back
/// to environment variables.
fn load_config() -> Result<GatewayConfig, GatewayError> {
    match std::env::var("GATEWAY_CONFIG") {
        Ok(path) => GatewayConfig::from_file(path),
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            GatewayConfig::from_file(DEFAULT_CONFIG_PATH)
        }
        Err(_) => GatewayConfig::from_env(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = match setup_logging(config.server.log_directory.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    let dispatcher = match Dispatcher::from_config(&config.slack) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to set up notifications: {}", e);
            std::process::exit(1);
        }
    };

    let bind_address = config.server.bind_address.clone();
    info!(
        "Deployments permitted between {}:00 and {}:59",
        config.deployment.window.from_hour, config.deployment.window.to_hour
    );

    let state = Arc::new(AppState::new(WebhookGateway::new(config, dispatcher)));
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", bind_address, e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", bind_address);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
}

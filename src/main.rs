use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use request_relay::auth::AuthStore;
use request_relay::config;
use request_relay::dispatch::{self, WebhookPayload};
use request_relay::handlers;
use request_relay::message_config::{self, ConfigStore};
use request_relay::overseerr::Overseerr;
use request_relay::telegram::{Telegram, Update};
use request_relay::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Fail fast on missing secrets/URLs, before binding any listener.
    let s = match config::init() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "fatal: startup configuration is incomplete");
            std::process::exit(1);
        }
    };

    let telegram = Telegram::new()?;
    let overseerr = Overseerr::new()?;
    let auth = AuthStore::load(&s.admins_file, &s.users_file);
    let msg_config = Arc::new(ConfigStore::load(&s.message_config_file));

    let (notify_tx, notify_rx) = mpsc::channel::<WebhookPayload>(s.queue_capacity);

    let state = Arc::new(AppState {
        telegram,
        overseerr,
        auth,
        msg_config: msg_config.clone(),
        notify_tx,
    });

    // Poll the message configuration file for changes
    message_config::spawn_reload_task(msg_config);

    // Start chat update listener
    let (update_tx, update_rx) = mpsc::channel::<Update>(100);
    let state_clone = state.clone();
    tokio::spawn(async move {
        state_clone.telegram.listen(update_tx).await;
    });

    // Start command/callback handler
    let state_clone = state.clone();
    tokio::spawn(async move {
        handlers::handle_updates(state_clone, update_rx).await;
    });

    // Start notification dispatcher
    let state_clone = state.clone();
    tokio::spawn(async move {
        dispatch::run_dispatcher(state_clone, notify_rx).await;
    });

    let app = Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&s.listen_addr).await?;
    tracing::info!("Listening on {}", s.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

/// Inbound webhook: bearer check first, then route by notification type. The
/// sender always gets an immediate acknowledgment; only a failed enqueue
/// surfaces as an error.
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, &'static str) {
    let expected = format!("Bearer {}", config::settings().webhook_secret);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let payload: WebhookPayload = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook body, ignoring");
            return (StatusCode::OK, "OK");
        }
    };

    let notification_type = payload.notification_type.as_deref().unwrap_or("none");
    tracing::info!(notification_type, "received webhook notification");

    match notification_type {
        "TEST_NOTIFICATION" => (StatusCode::OK, "Test notification received!"),
        "MEDIA_PENDING" => match state.notify_tx.try_send(payload) {
            Ok(()) => (StatusCode::OK, "OK"),
            Err(e) => {
                tracing::error!(error = %e, "failed to enqueue notification");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error processing notification")
            }
        },
        _ => {
            tracing::info!(notification_type, "unhandled webhook event");
            (StatusCode::OK, "OK")
        }
    }
}

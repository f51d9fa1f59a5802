pub mod auth;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod message_config;
pub mod overseerr;
pub mod render;
pub mod telegram;

use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared state handed to every handler.
pub struct AppState {
    pub telegram: telegram::Telegram,
    pub overseerr: overseerr::Overseerr,
    pub auth: auth::AuthStore,
    pub msg_config: Arc<message_config::ConfigStore>,
    /// Webhook-to-dispatcher handoff; the HTTP handler enqueues and returns.
    pub notify_tx: mpsc::Sender<dispatch::WebhookPayload>,
}

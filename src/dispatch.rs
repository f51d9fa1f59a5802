use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::message_config::Field;
use crate::overseerr::MediaKind;
use crate::render;
use crate::telegram::approval_keyboard;
use crate::AppState;

/// Inbound webhook body, normalized with best-effort field presence. The
/// payload schema varies slightly across deployed senders, so ids arrive as
/// either numbers or strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookPayload {
    pub notification_type: Option<String>,
    pub media: Option<WebhookMedia>,
    pub image: Option<String>,
    pub request: Option<WebhookRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookMedia {
    pub media_type: Option<String>,
    #[serde(rename = "tmdbId")]
    pub tmdb_id: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookRequest {
    pub request_id: Option<Value>,
    #[serde(rename = "requestedBy_username")]
    pub requested_by_username: Option<String>,
}

fn value_as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Drain the webhook-to-dispatcher queue for the lifetime of the process.
pub async fn run_dispatcher(state: Arc<AppState>, mut rx: mpsc::Receiver<WebhookPayload>) {
    while let Some(event) = rx.recv().await {
        dispatch_notification(&state, event).await;
    }
    tracing::info!("notification queue closed, dispatcher stopping");
}

/// Parse → enrich → render → deliver. An enrichment miss drops the
/// notification (logged, not retried); a missing request id is tolerated and
/// leaves the buttons carrying an unusable key.
pub async fn dispatch_notification(state: &AppState, event: WebhookPayload) {
    let media = event.media.unwrap_or_default();
    let kind = media.media_type.as_deref().and_then(MediaKind::parse);
    let tmdb_id = media.tmdb_id.as_ref().and_then(value_as_i64);
    let poster_url = event.image.filter(|u| !u.is_empty());

    let request = event.request.unwrap_or_default();
    let requester = request.requested_by_username;
    let request_id = request.request_id.as_ref().and_then(value_as_string);

    let Some(kind) = kind else {
        tracing::error!(
            media_type = media.media_type.as_deref().unwrap_or("none"),
            "unrecognized media kind, dropping notification"
        );
        return;
    };

    let Some(details) = state.overseerr.media_details(Some(kind), tmdb_id).await else {
        tracing::error!(?tmdb_id, "could not fetch media details, dropping notification");
        return;
    };

    // One configuration snapshot for the whole render, so a racing reload
    // cannot tear a single message.
    let config = state.msg_config.snapshot();
    let mut text = render::render_message(&config, &details, kind, requester.as_deref());

    let request_key = request_id.as_deref().unwrap_or("unknown");
    let keyboard = approval_keyboard(request_key);

    let picture_enabled = config.is_field_enabled(Field::Picture);
    let chat_id = state.telegram.chat_id;

    let delivery = match &poster_url {
        Some(url) if picture_enabled => {
            state
                .telegram
                .send_photo(chat_id, url, &text, Some(keyboard))
                .await
        }
        _ => {
            if picture_enabled && poster_url.is_none() {
                text = format!("{} {}", render::picture_fallback_emoji(&config), text);
            }
            state
                .telegram
                .send_message(chat_id, &text, Some(keyboard))
                .await
        }
    };

    match delivery {
        Ok(message_id) => {
            tracing::info!(request_id = request_key, message_id, "notification delivered");
        }
        Err(e) => {
            tracing::error!(request_id = request_key, error = %e, "failed to deliver notification");
        }
    }
}

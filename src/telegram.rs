use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::settings;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    /// "private", "group", "supergroup" or "channel".
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<Value>,
    description: Option<String>,
}

/// Approve/deny control pair keyed by request id.
pub fn approval_keyboard(request_id: &str) -> Value {
    json!({
        "inline_keyboard": [[
            { "text": "✅ Approve", "callback_data": format!("approve_{request_id}") },
            { "text": "❌ Deny", "callback_data": format!("deny_{request_id}") }
        ]]
    })
}

#[derive(Clone)]
pub struct Telegram {
    client: Client,
    base_url: String,
    /// The sole notification delivery target.
    pub chat_id: i64,
}

impl Telegram {
    pub fn new() -> Result<Self> {
        let s = settings();
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: format!("https://api.telegram.org/bot{}", s.telegram_bot_token),
            chat_id: s.telegram_chat_id,
        })
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("{} returned undecodable body ({}): {}", method, status, e))?;

        if !body.ok {
            return Err(anyhow!(
                "{} failed: {} {}",
                method,
                status,
                body.description.unwrap_or_default()
            ));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    fn message_id(result: &Value) -> Result<i64> {
        result["message_id"]
            .as_i64()
            .ok_or_else(|| anyhow!("response missing message_id"))
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<Value>,
    ) -> Result<i64> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup;
        }
        let result = self.call("sendMessage", payload).await?;
        Self::message_id(&result)
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo_url: &str,
        caption: &str,
        reply_markup: Option<Value>,
    ) -> Result<i64> {
        let mut payload = json!({
            "chat_id": chat_id,
            "photo": photo_url,
            "caption": caption,
            "parse_mode": "Markdown",
        });
        if let Some(markup) = reply_markup {
            payload["reply_markup"] = markup;
        }
        let result = self.call("sendPhoto", payload).await?;
        Self::message_id(&result)
    }

    /// Edit a text message in place. Omitting reply_markup removes the buttons.
    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        self.call(
            "editMessageText",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": text,
                "parse_mode": "Markdown",
            }),
        )
        .await?;
        Ok(())
    }

    /// Edit a photo message's caption in place, removing the buttons.
    pub async fn edit_message_caption(
        &self,
        chat_id: i64,
        message_id: i64,
        caption: &str,
    ) -> Result<()> {
        self.call(
            "editMessageCaption",
            json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "caption": caption,
                "parse_mode": "Markdown",
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        self.call(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await?;
        Ok(())
    }

    /// Acknowledge a button press, optionally with a popup alert.
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
            payload["show_alert"] = json!(show_alert);
        }
        self.call("answerCallbackQuery", payload).await?;
        Ok(())
    }

    /// Long-poll getUpdates for the lifetime of the process, forwarding every
    /// update to the handler channel. Transport errors are logged and retried
    /// after a short pause.
    pub async fn listen(&self, tx: mpsc::Sender<Update>) {
        let s = settings();
        let mut offset: i64 = 0;

        loop {
            let payload = json!({
                "offset": offset,
                "timeout": s.poll_timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            });

            let updates = match self.call("getUpdates", payload).await {
                Ok(result) => match serde_json::from_value::<Vec<Update>>(result) {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable getUpdates batch, skipping");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "getUpdates failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if tx.send(update).await.is_err() {
                    tracing::error!("update handler channel closed, stopping listener");
                    return;
                }
            }
        }
    }
}

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

use crate::auth::LoginOutcome;
use crate::config::settings;
use crate::overseerr::Action;
use crate::telegram::{CallbackQuery, Message, Update};
use crate::AppState;

/// Drain the chat update channel for the lifetime of the process.
pub async fn handle_updates(state: Arc<AppState>, mut rx: mpsc::Receiver<Update>) {
    while let Some(update) = rx.recv().await {
        if let Some(query) = update.callback_query {
            handle_callback(&state, query).await;
        } else if let Some(message) = update.message {
            handle_message(&state, message).await;
        }
    }
    tracing::info!("update channel closed, handler stopping");
}

async fn handle_message(state: &AppState, message: Message) {
    let Some(text) = message.text.clone() else { return };
    let text = text.trim();
    if !text.starts_with('/') {
        return;
    }

    let mut words = text.split_whitespace();
    let command = words.next().unwrap_or("");
    // Group chats address commands as /cmd@botname.
    let command = command.split('@').next().unwrap_or(command);
    let args: Vec<&str> = words.collect();

    match command {
        "/login" => login_command(state, &message, &args).await,
        "/logout" => logout_command(state, &message).await,
        "/add" => add_by_reply_command(state, &message).await,
        "/adduser" => adduser_command(state, &message, &args).await,
        "/removeuser" => removeuser_command(state, &message, &args).await,
        "/listusers" => listusers_command(state, &message).await,
        "/listadmins" => listadmins_command(state, &message).await,
        "/health" => {
            reply(state, &message, "Bot is running and healthy!").await;
        }
        "/reloadconfig" => reloadconfig_command(state, &message).await,
        "/configstatus" => configstatus_command(state, &message).await,
        "/generatehash" => generatehash_command(state, &message, &args).await,
        _ => {}
    }
}

async fn reply(state: &AppState, message: &Message, text: &str) {
    if let Err(e) = state
        .telegram
        .send_message(message.chat.id, text, None)
        .await
    {
        tracing::error!(chat_id = message.chat.id, error = %e, "failed to send reply");
    }
}

/// Admin gate shared by the restricted commands. Sends the denial and
/// reports false for non-admins.
async fn require_admin(state: &AppState, message: &Message, denial: &str) -> bool {
    let Some(from) = &message.from else { return false };
    if state.auth.is_admin(from.id).await {
        return true;
    }
    reply(state, message, denial).await;
    false
}

async fn login_command(state: &AppState, message: &Message, args: &[&str]) {
    let Some(from) = &message.from else { return };

    if state.auth.is_rate_limited(from.id) {
        reply(
            state,
            message,
            "❌ Too many failed login attempts. Please try again in 5 minutes.",
        )
        .await;
        return;
    }

    if message.chat.kind != "private" {
        reply(
            state,
            message,
            "For security, please use the /login command in a private message to the bot.",
        )
        .await;
        return;
    }

    let supplied = args.join(" ");
    let outcome = state
        .auth
        .attempt_login(from.id, &supplied, &settings().admin_password_hash)
        .await;

    let text = match outcome {
        LoginOutcome::Accepted => {
            "✅ You are now an admin! You can now use admin commands in the group channel."
        }
        LoginOutcome::BadPassword => "❌ Incorrect password.",
        LoginOutcome::RateLimited => {
            "❌ Too many failed login attempts. Please try again in 5 minutes."
        }
    };
    reply(state, message, text).await;
}

async fn logout_command(state: &AppState, message: &Message) {
    let Some(from) = &message.from else { return };

    let text = match state.auth.remove_admin(from.id).await {
        Ok(true) => "✅ You have been logged out as admin.",
        Ok(false) => match state.auth.remove_user(from.id).await {
            Ok(true) => "✅ You have been logged out as user.",
            Ok(false) => "You are not logged in.",
            Err(e) => {
                tracing::error!(user_id = from.id, error = %e, "failed to persist user removal");
                "❌ Failed to update the user list."
            }
        },
        Err(e) => {
            tracing::error!(user_id = from.id, error = %e, "failed to persist admin removal");
            "❌ Failed to update the admin list."
        }
    };
    reply(state, message, text).await;
}

async fn add_by_reply_command(state: &AppState, message: &Message) {
    if !require_admin(state, message, "❌ Only admins can use this command.").await {
        return;
    }

    let replied_user = message
        .reply_to_message
        .as_ref()
        .and_then(|m| m.from.clone());
    let Some(user) = replied_user else {
        reply(
            state,
            message,
            "Usage: Reply to a user's message with the /add command to add them.",
        )
        .await;
        return;
    };

    if state.auth.is_user(user.id).await {
        let text = format!("✅ User {} is already an authorized user.", user.first_name);
        reply(state, message, &text).await;
        return;
    }

    let text = match state.auth.add_user(user.id).await {
        Ok(_) => format!("✅ User {} ({}) has been added.", user.first_name, user.id),
        Err(e) => {
            tracing::error!(user_id = user.id, error = %e, "failed to persist new user");
            "❌ Failed to update the user list.".to_string()
        }
    };
    reply(state, message, &text).await;
}

async fn adduser_command(state: &AppState, message: &Message, args: &[&str]) {
    if !require_admin(state, message, "❌ Only admins can add users.").await {
        return;
    }

    let Some(id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        reply(state, message, "Usage: /adduser <user_id>").await;
        return;
    };

    let text = match state.auth.add_user(id).await {
        Ok(_) => format!("✅ User {id} added."),
        Err(e) => {
            tracing::error!(user_id = id, error = %e, "failed to persist new user");
            "❌ Failed to update the user list.".to_string()
        }
    };
    reply(state, message, &text).await;
}

async fn removeuser_command(state: &AppState, message: &Message, args: &[&str]) {
    if !require_admin(state, message, "❌ Only admins can remove users.").await {
        return;
    }

    let Some(id) = args.first().and_then(|a| a.parse::<i64>().ok()) else {
        reply(state, message, "Usage: /removeuser <user_id>").await;
        return;
    };

    let text = match state.auth.remove_user(id).await {
        Ok(true) => format!("✅ User {id} removed."),
        Ok(false) => "User not found.".to_string(),
        Err(e) => {
            tracing::error!(user_id = id, error = %e, "failed to persist user removal");
            "❌ Failed to update the user list.".to_string()
        }
    };
    reply(state, message, &text).await;
}

async fn listusers_command(state: &AppState, message: &Message) {
    if !require_admin(state, message, "❌ Only admins can list users.").await {
        return;
    }
    let ids = state.auth.list_users().await;
    let listing = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
    reply(state, message, &format!("Users: {listing}")).await;
}

async fn listadmins_command(state: &AppState, message: &Message) {
    if !require_admin(state, message, "❌ Only admins can list admins.").await {
        return;
    }
    let ids = state.auth.list_admins().await;
    let listing = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
    reply(state, message, &format!("Admins: {listing}")).await;
}

async fn reloadconfig_command(state: &AppState, message: &Message) {
    if !require_admin(state, message, "❌ Only admins can reload the configuration.").await {
        return;
    }
    let text = match state.msg_config.reload() {
        Ok(()) => "✅ Message configuration reloaded successfully!".to_string(),
        Err(e) => format!("❌ Error reloading configuration: {e}"),
    };
    reply(state, message, &text).await;
}

async fn configstatus_command(state: &AppState, message: &Message) {
    if !require_admin(state, message, "❌ Only admins can view configuration status.").await {
        return;
    }

    let config = state.msg_config.snapshot();
    let enabled = config
        .enabled_fields_in_order()
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ");
    let enabled = if enabled.is_empty() { "None".to_string() } else { enabled };
    let path = state.msg_config.path();

    let text = format!(
        "*Configuration Status:*\n\n\
         *Enabled Fields:* {enabled}\n\
         *Debug Mode:* {}\n\
         *Auto Reload:* {}\n\
         *Config File:* {}\n\
         *File Exists:* {}",
        if config.is_debug_mode() { "On" } else { "Off" },
        if config.settings.auto_reload_config { "On" } else { "Off" },
        path.display(),
        if path.exists() { "Yes" } else { "No" },
    );
    reply(state, message, &text).await;
}

async fn generatehash_command(state: &AppState, message: &Message, args: &[&str]) {
    if message.chat.kind != "private" {
        reply(
            state,
            message,
            "For security, please send this command as a private message to the bot.",
        )
        .await;
        return;
    }
    if args.is_empty() {
        reply(state, message, "Usage: /generatehash <your-password>").await;
        return;
    }

    let password = args.join(" ");
    let text = match crate::auth::generate_password_hash(&password) {
        Ok(hash) => format!(
            "Your secure password hash is:\n\n`{hash}`\n\n\
             Copy this entire hash and set it as the `RR_ADMIN_PASSWORD_HASH` \
             environment variable for the bot, then restart it."
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to generate password hash");
            "❌ Failed to generate a password hash.".to_string()
        }
    };
    reply(state, message, &text).await;
}

fn parse_callback_data(data: &str) -> Option<(Action, &str)> {
    if let Some(id) = data.strip_prefix("approve_") {
        Some((Action::Approve, id))
    } else if let Some(id) = data.strip_prefix("deny_") {
        Some((Action::Deny, id))
    } else {
        None
    }
}

/// What a button press should do, decided before any transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDecision {
    /// Unparseable payload: acknowledge and stop.
    Ignore,
    /// Presser is in neither identity set: notify, and leave the request
    /// service untouched.
    Reject,
    Resolve { action: Action, request_id: String },
}

pub fn decide_callback(data: Option<&str>, authorized: bool) -> CallbackDecision {
    let Some((action, request_id)) = data.and_then(parse_callback_data) else {
        return CallbackDecision::Ignore;
    };
    if !authorized {
        return CallbackDecision::Reject;
    }
    CallbackDecision::Resolve {
        action,
        request_id: request_id.to_string(),
    }
}

/// How the request message is mutated once the approval call has settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionUpdate {
    /// Success: remove the request message and announce the outcome.
    Replace { announcement: String },
    /// Failure on a photo message: rewrite the caption, dropping the keyboard.
    EditCaption { text: String },
    /// Failure on a text message: rewrite the text, dropping the keyboard.
    EditText { text: String },
    /// Failure with no message attached: nothing to mutate.
    Leave,
}

/// `message_has_caption` is `None` when the press carried no message at all.
pub fn resolution_update(
    action: Action,
    success: bool,
    title: &str,
    requester: &str,
    actor: &str,
    message_has_caption: Option<bool>,
) -> ResolutionUpdate {
    if success {
        let icon = match action {
            Action::Approve => "✅",
            Action::Deny => "❌",
        };
        return ResolutionUpdate::Replace {
            announcement: format!(
                "{icon} *{title}* (requested by {requester}) was {} by {actor}.",
                action.past_tense()
            ),
        };
    }

    let verb = match action {
        Action::Approve => "approve",
        Action::Deny => "deny",
    };
    let text = format!(
        "❌ Failed to {verb} *{title}*. There might be an issue with the request service."
    );
    match message_has_caption {
        Some(true) => ResolutionUpdate::EditCaption { text },
        Some(false) => ResolutionUpdate::EditText { text },
        None => ResolutionUpdate::Leave,
    }
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*([^*]+)\*").expect("valid regex"))
}

/// Best-effort recovery of the title and original requester from the
/// previously rendered message text. A "Title:" marker wins over the first
/// bold span; nothing recognizable yields generic placeholders.
pub fn extract_context(text: &str) -> (String, String) {
    let mut marker_title: Option<String> = None;
    let mut bold_title: Option<String> = None;
    let mut requester: Option<String> = None;

    for line in text.lines() {
        if marker_title.is_none() {
            if let Some((_, rest)) = line.split_once("Title:") {
                let cleaned = rest.trim().trim_matches('*').trim();
                if !cleaned.is_empty() {
                    marker_title = Some(cleaned.to_string());
                }
            }
        }
        if bold_title.is_none() {
            if let Some(caps) = bold_re().captures(line) {
                let span = caps[1].trim();
                // Bold field labels ("*Synopsis:*") are not titles.
                if !span.is_empty() && !span.ends_with(':') && !span.contains("Title:") {
                    bold_title = Some(span.to_string());
                }
            }
        }
        if requester.is_none() {
            if let Some((_, rest)) = line.split_once("Requested by:") {
                let cleaned = rest.trim().trim_matches('*').trim();
                if !cleaned.is_empty() {
                    requester = Some(cleaned.to_string());
                }
            }
        }
    }

    (
        marker_title
            .or(bold_title)
            .unwrap_or_else(|| "The request".to_string()),
        requester.unwrap_or_else(|| "Unknown".to_string()),
    )
}

/// Button-press round trip: authorize, recover context, call the approval
/// API, mutate the message to a terminal state. The decision logic lives in
/// `decide_callback`/`resolution_update`; this function only performs the
/// chosen transport calls, so the approval client is reachable from the
/// `Resolve` arm alone.
pub async fn handle_callback(state: &AppState, query: CallbackQuery) {
    let authorized = state.auth.is_authorized(query.from.id).await;

    let (action, request_id) = match decide_callback(query.data.as_deref(), authorized) {
        CallbackDecision::Ignore => {
            let _ = state.telegram.answer_callback_query(&query.id, None, false).await;
            return;
        }
        CallbackDecision::Reject => {
            let _ = state
                .telegram
                .answer_callback_query(
                    &query.id,
                    Some("You are not authorized to approve or deny requests."),
                    true,
                )
                .await;
            let chat_id = query
                .message
                .as_ref()
                .map_or(state.telegram.chat_id, |m| m.chat.id);
            let _ = state
                .telegram
                .send_message(
                    chat_id,
                    &format!(
                        "{} is not authorized to approve or deny requests.",
                        query.from.first_name
                    ),
                    None,
                )
                .await;
            return;
        }
        CallbackDecision::Resolve { action, request_id } => (action, request_id),
    };

    let _ = state.telegram.answer_callback_query(&query.id, None, false).await;

    let (title, original_requester) = query
        .message
        .as_ref()
        .and_then(|m| m.caption.as_deref().or(m.text.as_deref()))
        .map(extract_context)
        .unwrap_or_else(|| ("The request".to_string(), "Unknown".to_string()));

    let success = state.overseerr.resolve_request(&request_id, action).await;
    let actor = &query.from.first_name;

    let update = resolution_update(
        action,
        success,
        &title,
        &original_requester,
        actor,
        query.message.as_ref().map(|m| m.caption.is_some()),
    );

    match update {
        ResolutionUpdate::Replace { announcement } => {
            if let Some(message) = &query.message {
                if let Err(e) = state
                    .telegram
                    .delete_message(message.chat.id, message.message_id)
                    .await
                {
                    tracing::warn!(message_id = message.message_id, error = %e,
                        "failed to delete resolved request message");
                }
            }
            let _ = state
                .telegram
                .send_message(state.telegram.chat_id, &announcement, None)
                .await;
            tracing::info!(request_id = %request_id, action = action.api_verb(), actor = %actor, "request resolved");
        }
        // Editing without a reply markup removes the buttons.
        ResolutionUpdate::EditCaption { text } => {
            if let Some(message) = &query.message {
                if let Err(e) = state
                    .telegram
                    .edit_message_caption(message.chat.id, message.message_id, &text)
                    .await
                {
                    tracing::error!(message_id = message.message_id, error = %e,
                        "failed to mark request message as failed");
                }
            }
        }
        ResolutionUpdate::EditText { text } => {
            if let Some(message) = &query.message {
                if let Err(e) = state
                    .telegram
                    .edit_message_text(message.chat.id, message.message_id, &text)
                    .await
                {
                    tracing::error!(message_id = message.message_id, error = %e,
                        "failed to mark request message as failed");
                }
            }
        }
        ResolutionUpdate::Leave => {}
    }
}

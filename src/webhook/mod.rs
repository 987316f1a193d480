use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::channels::{Attachment, AttachmentKind, Destination, MessageContent, OutboundMessage};
use crate::shared::models::UserProfile;
use crate::shared::state::AppState;
use crate::stats;
use crate::tickets::{RoutingAction, RoutingError, StoreError};

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl TelegramUser {
    fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            first_name: Some(self.first_name.clone()),
            last_name: self.last_name.clone(),
            language_code: self.language_code.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramDocument {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/telegram", post(handle_webhook))
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> StatusCode {
    debug!("Telegram webhook received: update_id={}", update.update_id);

    if let Some(message) = update.message.or(update.edited_message) {
        match process_message(&state, &message).await {
            Ok(()) => {}
            // The platform retries on 5xx; only a dead store warrants that.
            Err(RoutingError::Store(StoreError::Unavailable(e))) => {
                error!("Store unavailable while routing update: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            Err(e) => {
                error!("Failed to process Telegram message: {}", e);
            }
        }
    }

    StatusCode::OK
}

async fn process_message(
    state: &Arc<AppState>,
    message: &TelegramMessage,
) -> Result<(), RoutingError> {
    let Some(from) = &message.from else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }

    if message.chat.id == state.config.telegram.support_group_id {
        process_staff_message(state, message, from).await
    } else if message.chat.chat_type == "private" {
        process_user_message(state, message, from).await
    } else {
        debug!("Ignoring message from unrelated chat {}", message.chat.id);
        Ok(())
    }
}

async fn process_user_message(
    state: &Arc<AppState>,
    message: &TelegramMessage,
    from: &TelegramUser,
) -> Result<(), RoutingError> {
    let profile = from.profile();
    let text = message.text.as_deref().or(message.caption.as_deref());

    if let Some(text) = text {
        let trimmed = text.trim();
        if trimmed.starts_with("/start") {
            state.store.upsert_user(&profile)?;
            notify_user(state, from.id, &welcome_text(&profile)).await;
            return Ok(());
        }
        if let Some(rest) = trimmed.strip_prefix("/feedback") {
            return process_feedback(state, &profile, rest).await;
        }
        if looks_like_email(trimmed) {
            if let Some(ticket_id) = state.router.attach_contact_email(from.id, trimmed)? {
                info!("Attached contact email to ticket #{}", ticket_id);
                notify_user(
                    state,
                    from.id,
                    &format!("📧 Email saved for ticket #{ticket_id}. We'll use it if we can't reach you here."),
                )
                .await;
                return Ok(());
            }
        }
    }

    let content = extract_content(message);
    match state.router.route_user_message(&profile, content, None).await {
        Ok(result) => {
            if result.action == RoutingAction::Created {
                let hours = state.config.support.urgent_threshold_hours;
                notify_user(
                    state,
                    from.id,
                    &format!(
                        "✅ Your request #{} has been received!\n\
                         ⏱ We aim to reply within {hours} hours, right here in this chat.\n\
                         💬 Keep writing — further messages are added to the same request.",
                        result.ticket_id
                    ),
                )
                .await;
            }
            Ok(())
        }
        Err(RoutingError::InvalidContent) => {
            notify_user(
                state,
                from.id,
                "Please describe your issue in text, or attach a photo or document.",
            )
            .await;
            Ok(())
        }
        Err(RoutingError::UserBlocked(_)) => {
            notify_user(
                state,
                from.id,
                "⏳ You can't contact support right now. Please try again later.",
            )
            .await;
            Ok(())
        }
        Err(other) => Err(other),
    }
}

async fn process_feedback(
    state: &Arc<AppState>,
    profile: &UserProfile,
    args: &str,
) -> Result<(), RoutingError> {
    match parse_feedback(args) {
        Some((rating, comment)) => {
            match state.router.record_feedback(profile, rating, comment).await {
                Ok(()) => {
                    let stars = "⭐".repeat(rating as usize);
                    notify_user(
                        state,
                        profile.id,
                        &format!("✅ Thanks for the feedback! {stars} ({rating}/5)"),
                    )
                    .await;
                    Ok(())
                }
                Err(RoutingError::InvalidContent) => {
                    notify_user(state, profile.id, "Ratings go from 1 to 5.").await;
                    Ok(())
                }
                Err(other) => Err(other),
            }
        }
        None => {
            notify_user(
                state,
                profile.id,
                "Usage: /feedback <1-5> [comment]\nExample: /feedback 5 great event!",
            )
            .await;
            Ok(())
        }
    }
}

async fn process_staff_message(
    state: &Arc<AppState>,
    message: &TelegramMessage,
    from: &TelegramUser,
) -> Result<(), RoutingError> {
    let Some(role) = state.config.telegram.staff_role(from.id) else {
        warn!(
            "Message in support group from unlisted user {}; ignoring",
            from.id
        );
        return Ok(());
    };

    match message.message_thread_id {
        Some(thread_id) => {
            let text = message.text.as_deref().map(str::trim);
            if text == Some("/close") {
                return process_close(state, thread_id, from.id).await;
            }

            let content = extract_content(message);
            match state
                .router
                .route_staff_reply(thread_id, from.id, content, role)
                .await
            {
                Ok(_) => Ok(()),
                Err(RoutingError::TicketAlreadyClosed(ticket_id)) => {
                    notify_thread(
                        state,
                        thread_id,
                        &format!(
                            "⚠️ Ticket #{ticket_id} is closed; the reply was not delivered. \
                             A new message from the user will open a fresh ticket."
                        ),
                    )
                    .await;
                    Ok(())
                }
                Err(RoutingError::UnknownThread(_)) => {
                    notify_thread(
                        state,
                        thread_id,
                        "⚠️ Orphaned reply: this thread is not linked to any ticket.",
                    )
                    .await;
                    Ok(())
                }
                Err(RoutingError::InvalidContent) => Ok(()),
                Err(other) => Err(other),
            }
        }
        None => process_admin_command(state, message, from).await,
    }
}

async fn process_close(
    state: &Arc<AppState>,
    thread_id: i64,
    staff_id: i64,
) -> Result<(), RoutingError> {
    match state.router.resolve_thread(thread_id) {
        Ok(ticket) => {
            let transitioned = state.router.close_ticket(ticket.id, staff_id).await?;
            let notice = if transitioned {
                format!("✅ Ticket #{} closed.", ticket.id)
            } else {
                format!("Ticket #{} was already closed.", ticket.id)
            };
            notify_thread(state, thread_id, &notice).await;
            Ok(())
        }
        Err(RoutingError::UnknownThread(_)) => {
            notify_thread(
                state,
                thread_id,
                "⚠️ This thread is not linked to any ticket.",
            )
            .await;
            Ok(())
        }
        Err(other) => Err(other),
    }
}

async fn process_admin_command(
    state: &Arc<AppState>,
    message: &TelegramMessage,
    from: &TelegramUser,
) -> Result<(), RoutingError> {
    let Some(text) = message.text.as_deref().map(str::trim) else {
        return Ok(());
    };
    if !state.config.telegram.is_admin(from.id) {
        return Ok(());
    }

    if text == "/stats" {
        match stats::collect(state) {
            Ok(collected) => notify_general(state, &stats::render(&collected)).await,
            Err(e) => {
                error!("Stats command failed: {}", e);
                notify_general(state, "⚠️ Stats are unavailable right now.").await;
            }
        }
    } else if let Some(raw) = text.strip_prefix("/block ") {
        match raw.trim().parse::<i64>() {
            Ok(user_id) => {
                state.policy.block(user_id).await;
                notify_general(state, &format!("🔒 User {user_id} blocked.")).await;
            }
            Err(_) => notify_general(state, "Usage: /block <user_id>").await,
        }
    } else if let Some(raw) = text.strip_prefix("/unblock ") {
        match raw.trim().parse::<i64>() {
            Ok(user_id) => {
                let removed = state.policy.unblock(user_id).await;
                let notice = if removed {
                    format!("🔓 User {user_id} unblocked.")
                } else {
                    format!("User {user_id} was not blocked.")
                };
                notify_general(state, &notice).await;
            }
            Err(_) => notify_general(state, "Usage: /unblock <user_id>").await,
        }
    }
    Ok(())
}

fn extract_content(message: &TelegramMessage) -> MessageContent {
    let text = message
        .text
        .clone()
        .or_else(|| message.caption.clone())
        .filter(|t| !t.trim().is_empty());

    // Telegram lists photo renditions smallest first; forward the largest.
    let attachment = if let Some(photo) = message.photo.as_ref().and_then(|sizes| sizes.last()) {
        Some(Attachment {
            file_id: photo.file_id.clone(),
            kind: AttachmentKind::Photo,
        })
    } else {
        message.document.as_ref().map(|doc| Attachment {
            file_id: doc.file_id.clone(),
            kind: AttachmentKind::Document,
        })
    };

    MessageContent { text, attachment }
}

fn welcome_text(profile: &UserProfile) -> String {
    format!(
        "🎵 Welcome to the festival support bot, {}!\n\n\
         Send a message here and the support team will get back to you.\n\
         You can attach photos or documents.\n\n\
         💭 /feedback <1-5> [comment] — rate the event",
        profile.display_name()
    )
}

fn looks_like_email(text: &str) -> bool {
    if text.split_whitespace().count() != 1 {
        return false;
    }
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn parse_feedback(args: &str) -> Option<(i32, Option<String>)> {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (rating_part, comment_part) = match trimmed.split_once(char::is_whitespace) {
        Some((rating, comment)) => (rating, Some(comment.trim())),
        None => (trimmed, None),
    };
    let rating = rating_part.parse::<i32>().ok()?;
    let comment = comment_part
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Some((rating, comment))
}

async fn notify_user(state: &Arc<AppState>, user_id: i64, text: &str) {
    if let Err(e) = state
        .messaging
        .send(Destination::User(user_id), &OutboundMessage::text(text))
        .await
    {
        error!("Notice to user {} failed: {}", user_id, e);
    }
}

async fn notify_thread(state: &Arc<AppState>, thread_id: i64, text: &str) {
    if let Err(e) = state
        .messaging
        .send(
            Destination::StaffThread(thread_id),
            &OutboundMessage::text(text),
        )
        .await
    {
        error!("Notice to thread {} failed: {}", thread_id, e);
    }
}

async fn notify_general(state: &Arc<AppState>, text: &str) {
    if let Err(e) = state
        .messaging
        .send(Destination::StaffGeneral, &OutboundMessage::text(text))
        .await
    {
        error!("Notice to support group failed: {}", e);
    }
}

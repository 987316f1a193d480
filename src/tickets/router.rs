use std::sync::Arc;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::channels::{Destination, MessageContent, MessagingPort, OutboundMessage};
use crate::config::SupportConfig;
use crate::notify::{NotificationEvent, NotificationQueue};
use crate::policy::{PolicyRejection, UserPolicy};
use crate::shared::models::{ResponderRole, SupportTicket, UserProfile};

use super::registry::ThreadRegistry;
use super::store::{NewResponse, StaffAppend, StoreError, TicketStore};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("message carries no usable content")]
    InvalidContent,
    #[error("user {0} is not allowed to contact support")]
    UserBlocked(i64),
    #[error("no ticket is mapped to thread {0}")]
    UnknownThread(i64),
    #[error("ticket #{0} is closed")]
    TicketAlreadyClosed(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingAction {
    /// A new ticket (and staff thread) was created for this message.
    Created,
    /// The message was appended to an existing open ticket and forwarded.
    Forwarded,
    /// The message raced a concurrent close and reopened the ticket.
    Reopened,
}

#[derive(Debug, Clone, Copy)]
pub struct RoutingResult {
    pub ticket_id: i32,
    pub action: RoutingAction,
    /// Whether the outbound forward was delivered. Persistence always
    /// precedes delivery, so a `false` here never means lost state.
    pub delivered: bool,
}

/// The dispatcher between end-user private messages and staff-side threads.
/// Holds the store as source of truth, the registry as its cache, and the
/// messaging port for outbound sends. Persist-then-send throughout: no
/// outbound traffic before the corresponding state change is durable.
pub struct MessageRouter {
    store: Arc<dyn TicketStore>,
    registry: Arc<ThreadRegistry>,
    messaging: Arc<dyn MessagingPort>,
    policy: Arc<UserPolicy>,
    notifications: Arc<NotificationQueue>,
    settings: SupportConfig,
}

impl MessageRouter {
    pub fn new(
        store: Arc<dyn TicketStore>,
        registry: Arc<ThreadRegistry>,
        messaging: Arc<dyn MessagingPort>,
        policy: Arc<UserPolicy>,
        notifications: Arc<NotificationQueue>,
        settings: SupportConfig,
    ) -> Self {
        Self {
            store,
            registry,
            messaging,
            policy,
            notifications,
            settings,
        }
    }

    pub async fn route_user_message(
        &self,
        profile: &UserProfile,
        content: MessageContent,
        contact_email: Option<String>,
    ) -> Result<RoutingResult, RoutingError> {
        self.store.upsert_user(profile)?;

        if let Err(rejection) = self.policy.check_inbound(profile.id).await {
            match rejection {
                PolicyRejection::Blocked => {
                    warn!("Dropped message from blocked user {}", profile.id)
                }
                PolicyRejection::RateLimited => {
                    warn!("Rate limited user {}", profile.id)
                }
            }
            return Err(RoutingError::UserBlocked(profile.id));
        }

        if content.is_empty() || content.text_len() > self.settings.max_message_length {
            return Err(RoutingError::InvalidContent);
        }

        let response = Self::user_response(profile.id, &content);

        match self.current_open_ticket(profile.id)? {
            Some(ticket) => {
                let outcome = self.store.append_user_response(ticket.id, &response)?;
                if outcome.reopened {
                    warn!(
                        "Ticket #{} reopened: user message raced its closure",
                        outcome.ticket.id
                    );
                    self.registry.register(
                        outcome.ticket.id,
                        outcome.ticket.user_id,
                        outcome.ticket.thread_id,
                    );
                }
                if let Some(email) = contact_email.as_deref() {
                    self.store.set_contact_email(outcome.ticket.id, email)?;
                }
                let delivered = self.forward_to_thread(&outcome.ticket, profile, &content).await;
                Ok(RoutingResult {
                    ticket_id: outcome.ticket.id,
                    action: if outcome.reopened {
                        RoutingAction::Reopened
                    } else {
                        RoutingAction::Forwarded
                    },
                    delivered,
                })
            }
            None => {
                let ticket =
                    self.store
                        .create_ticket(profile.id, contact_email.as_deref(), &response)?;
                self.registry.register(ticket.id, ticket.user_id, None);
                info!("Created ticket #{} for user {}", ticket.id, profile.id);

                let delivered = self.forward_to_thread(&ticket, profile, &content).await;

                self.notifications.push(NotificationEvent::TicketOpened {
                    ticket_id: ticket.id,
                    user_name: profile.display_name(),
                    contact_email: ticket.email.clone(),
                    excerpt: Self::excerpt(&content),
                });

                Ok(RoutingResult {
                    ticket_id: ticket.id,
                    action: RoutingAction::Created,
                    delivered,
                })
            }
        }
    }

    pub async fn route_staff_reply(
        &self,
        thread_id: i64,
        staff_id: i64,
        content: MessageContent,
        role: ResponderRole,
    ) -> Result<RoutingResult, RoutingError> {
        if content.is_empty() || content.text_len() > self.settings.max_message_length {
            return Err(RoutingError::InvalidContent);
        }

        let ticket = self.resolve_thread(thread_id)?;

        let response = NewResponse {
            author_id: staff_id,
            role,
            text: content.text.clone(),
            attachment_file_id: content.attachment.as_ref().map(|a| a.file_id.clone()),
            kind: content.kind(),
            thread_message_id: None,
        };

        match self.store.append_staff_response(ticket.id, &response)? {
            StaffAppend::Closed => Err(RoutingError::TicketAlreadyClosed(ticket.id)),
            StaffAppend::Appended { ticket, .. } => {
                let text = match content.text.as_deref() {
                    Some(text) => format!("💬 Support: {text}"),
                    None => "💬 Support sent you an attachment".to_string(),
                };
                let message = OutboundMessage {
                    text,
                    attachment: content.attachment.clone(),
                };
                let delivered = match self
                    .messaging
                    .send(Destination::User(ticket.user_id), &message)
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        error!(
                            "Delivery to user {} failed for ticket #{}: {}",
                            ticket.user_id, ticket.id, e
                        );
                        false
                    }
                };
                Ok(RoutingResult {
                    ticket_id: ticket.id,
                    action: RoutingAction::Forwarded,
                    delivered,
                })
            }
        }
    }

    /// Idempotent close. Returns whether this call performed the transition.
    pub async fn close_ticket(&self, ticket_id: i32, closed_by: i64) -> Result<bool, RoutingError> {
        let transitioned = self.store.close_ticket(ticket_id)?;
        if !transitioned {
            debug!("Ticket #{} already closed; close is a no-op", ticket_id);
            return Ok(false);
        }

        self.registry.unregister(ticket_id);
        info!("Ticket #{} closed by {}", ticket_id, closed_by);

        if let Some(ticket) = self.store.ticket_by_id(ticket_id)? {
            let text = format!(
                "✅ Ticket #{ticket_id} is closed.\n\
                 Thanks for reaching out! If anything else comes up, just send a new message.\n\
                 💭 You can rate our support with /feedback 1-5."
            );
            if let Err(e) = self
                .messaging
                .send(Destination::User(ticket.user_id), &OutboundMessage::text(text))
                .await
            {
                error!("Closure notice for ticket #{} failed: {}", ticket_id, e);
            }
        }
        Ok(true)
    }

    /// Resolves a staff thread to its ticket: registry first, one rebuild on
    /// miss, then the store directly (closed tickets remain resolvable for
    /// audit even though the active index forgot them).
    pub fn resolve_thread(&self, thread_id: i64) -> Result<SupportTicket, RoutingError> {
        let ticket_id = match self.registry.resolve_by_thread(thread_id) {
            Some(id) => Some(id),
            None => {
                warn!(
                    "Registry miss for thread {}; rebuilding from store",
                    thread_id
                );
                self.registry.rebuild(self.store.as_ref())?;
                self.registry.resolve_by_thread(thread_id)
            }
        };

        match ticket_id {
            Some(id) => self
                .store
                .ticket_by_id(id)?
                .ok_or(RoutingError::UnknownThread(thread_id)),
            None => self
                .store
                .ticket_by_thread(thread_id)?
                .ok_or(RoutingError::UnknownThread(thread_id)),
        }
    }

    pub async fn record_feedback(
        &self,
        profile: &UserProfile,
        rating: i32,
        comment: Option<String>,
    ) -> Result<(), RoutingError> {
        if !(1..=5).contains(&rating) {
            return Err(RoutingError::InvalidContent);
        }
        self.store.upsert_user(profile)?;
        self.store
            .add_feedback(profile.id, rating, None, comment.as_deref())?;
        self.notifications.push(NotificationEvent::Feedback {
            user_id: profile.id,
            user_name: profile.display_name(),
            rating,
            comment,
        });
        Ok(())
    }

    /// Attaches a contact email to the user's open ticket, if any.
    pub fn attach_contact_email(
        &self,
        user_id: i64,
        email: &str,
    ) -> Result<Option<i32>, RoutingError> {
        match self.current_open_ticket(user_id)? {
            Some(ticket) => {
                self.store.set_contact_email(ticket.id, email)?;
                Ok(Some(ticket.id))
            }
            None => Ok(None),
        }
    }

    fn current_open_ticket(&self, user_id: i64) -> Result<Option<SupportTicket>, StoreError> {
        if let Some(ticket_id) = self.registry.resolve_by_user(user_id) {
            if let Some(ticket) = self.store.ticket_by_id(ticket_id)? {
                if ticket.is_open() {
                    return Ok(Some(ticket));
                }
                // Stale cache entry; fall through to the store.
                self.registry.unregister(ticket_id);
            }
        }
        let ticket = self.store.open_ticket_for_user(user_id)?;
        if let Some(ticket) = &ticket {
            self.registry
                .register(ticket.id, ticket.user_id, ticket.thread_id);
        }
        Ok(ticket)
    }

    /// Forwards a user message into the ticket's staff thread, creating the
    /// thread on first need. Returns whether the forward was delivered;
    /// failures are logged and retried implicitly by the next message.
    async fn forward_to_thread(
        &self,
        ticket: &SupportTicket,
        profile: &UserProfile,
        content: &MessageContent,
    ) -> bool {
        let thread_id = match ticket.thread_id {
            Some(thread_id) => thread_id,
            None => {
                let title = format!("#{} · {}", ticket.id, profile.display_name());
                match self.messaging.create_thread(&title).await {
                    Ok(thread_id) => {
                        let header = self.send_thread_header(thread_id, ticket, profile).await;
                        if let Err(e) = self.store.set_thread(ticket.id, thread_id, header) {
                            error!(
                                "Failed to persist thread {} for ticket #{}: {}",
                                thread_id, ticket.id, e
                            );
                        }
                        self.registry
                            .register(ticket.id, ticket.user_id, Some(thread_id));
                        thread_id
                    }
                    Err(e) => {
                        error!(
                            "Failed to create staff thread for ticket #{}: {}",
                            ticket.id, e
                        );
                        return false;
                    }
                }
            }
        };

        let text = match content.text.as_deref() {
            Some(text) => format!("👤 {}: {}", profile.display_name(), text),
            None => format!("👤 {} sent an attachment", profile.display_name()),
        };
        let message = OutboundMessage {
            text,
            attachment: content.attachment.clone(),
        };
        match self
            .messaging
            .send(Destination::StaffThread(thread_id), &message)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(
                    "Delivery to thread {} failed for ticket #{}: {}",
                    thread_id, ticket.id, e
                );
                false
            }
        }
    }

    async fn send_thread_header(
        &self,
        thread_id: i64,
        ticket: &SupportTicket,
        profile: &UserProfile,
    ) -> Option<i64> {
        let mut header = format!(
            "🆕 Ticket #{}\nFrom: {}",
            ticket.id,
            profile.display_name()
        );
        if let Some(username) = &profile.username {
            header.push_str(&format!(" (@{username})"));
        }
        if let Some(email) = &ticket.email {
            header.push_str(&format!("\nContact: {email}"));
        }
        header.push_str("\nReply in this thread to answer. Use /close when resolved.");

        match self
            .messaging
            .send(Destination::StaffThread(thread_id), &OutboundMessage::text(header))
            .await
        {
            Ok(delivery) => delivery.message_id,
            Err(e) => {
                error!("Thread header for ticket #{} failed: {}", ticket.id, e);
                None
            }
        }
    }

    fn user_response(author_id: i64, content: &MessageContent) -> NewResponse {
        NewResponse {
            author_id,
            role: ResponderRole::User,
            text: content.text.clone(),
            attachment_file_id: content.attachment.as_ref().map(|a| a.file_id.clone()),
            kind: content.kind(),
            thread_message_id: None,
        }
    }

    fn excerpt(content: &MessageContent) -> String {
        match content.text.as_deref() {
            Some(text) if text.chars().count() > 200 => {
                let cut: String = text.chars().take(200).collect();
                format!("{cut}…")
            }
            Some(text) => text.to_string(),
            None => format!("[{}]", content.kind()),
        }
    }
}

use std::sync::Arc;

use crate::channels::MessagingPort;
use crate::config::AppConfig;
use crate::notify::NotificationQueue;
use crate::policy::UserPolicy;
use crate::tickets::{MessageRouter, ThreadRegistry, TicketStore};

/// Shared application state handed to the axum handlers and background
/// services. Everything routing-related lives behind the router; the rest
/// is exposed for the operational query surface and admin commands.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TicketStore>,
    pub registry: Arc<ThreadRegistry>,
    pub router: Arc<MessageRouter>,
    pub policy: Arc<UserPolicy>,
    pub messaging: Arc<dyn MessagingPort>,
    pub notifications: Arc<NotificationQueue>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config.server)
            .field("registry_len", &self.registry.len())
            .field("queued_notifications", &self.notifications.len())
            .finish()
    }
}

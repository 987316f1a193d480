pub mod email;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::channels::{Destination, MessagingPort, OutboundMessage};
use crate::config::EmailConfig;

/// Event produced by the transactional core, delivered best-effort.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    Escalation {
        event_id: Uuid,
        ticket_id: i32,
        user_name: String,
        waiting: Duration,
    },
    Feedback {
        user_id: i64,
        user_name: String,
        rating: i32,
        comment: Option<String>,
    },
    TicketOpened {
        ticket_id: i32,
        user_name: String,
        contact_email: Option<String>,
        excerpt: String,
    },
}

/// Bounded fan-out queue between the router/monitor and the dispatcher.
/// On overflow the oldest event is dropped and counted; ticket state is
/// never blocked on notification delivery.
#[derive(Debug)]
pub struct NotificationQueue {
    inner: Mutex<VecDeque<NotificationEvent>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: NotificationEvent) {
        {
            let mut queue = self
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if queue.len() >= self.capacity {
                queue.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("Notification queue full; dropped oldest event ({} total)", total);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> NotificationEvent {
        loop {
            if let Some(event) = self
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains the queue and forwards each event to the configured sinks: staff
/// workspace alert, support mailbox, feedback channel. Sink failures are
/// logged and never propagate back to ticket state.
pub struct NotificationDispatcher {
    queue: Arc<NotificationQueue>,
    messaging: Arc<dyn MessagingPort>,
    email: EmailConfig,
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<NotificationQueue>,
        messaging: Arc<dyn MessagingPort>,
        email: EmailConfig,
    ) -> Self {
        Self {
            queue,
            messaging,
            email,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Notification dispatcher started");
        loop {
            tokio::select! {
                event = self.queue.pop() => self.dispatch(event).await,
                _ = shutdown.changed() => break,
            }
        }
        info!("Notification dispatcher stopped");
    }

    async fn dispatch(&self, event: NotificationEvent) {
        match event {
            NotificationEvent::Escalation {
                event_id,
                ticket_id,
                user_name,
                waiting,
            } => {
                let hours = waiting.num_minutes() as f64 / 60.0;
                let alert = format!(
                    "🚨 Ticket #{ticket_id} from {user_name} has waited {hours:.1}h for a reply"
                );
                self.alert_staff(&alert).await;
                if self.email.is_configured() {
                    if let Err(e) =
                        email::send_escalation_email(&self.email, ticket_id, &user_name, waiting)
                    {
                        error!("Escalation email for ticket #{} failed: {}", ticket_id, e);
                    }
                }
                debug!("Escalation event {} dispatched", event_id);
            }
            NotificationEvent::Feedback {
                user_id,
                user_name,
                rating,
                comment,
            } => {
                let stars = "⭐".repeat(rating.clamp(1, 5) as usize);
                let mut text = format!("💭 Feedback from {user_name} ({user_id}): {stars} {rating}/5");
                if let Some(comment) = comment {
                    text.push_str(&format!("\n{comment}"));
                }
                if let Err(e) = self
                    .messaging
                    .send(Destination::FeedbackChannel, &OutboundMessage::text(&text))
                    .await
                {
                    debug!("Feedback channel delivery skipped: {}", e);
                    self.alert_staff(&text).await;
                }
            }
            NotificationEvent::TicketOpened {
                ticket_id,
                user_name,
                contact_email,
                excerpt,
            } => {
                if self.email.is_configured() {
                    if let Err(e) = email::send_new_ticket_email(
                        &self.email,
                        ticket_id,
                        &user_name,
                        contact_email.as_deref(),
                        &excerpt,
                    ) {
                        error!("New-ticket email for #{} failed: {}", ticket_id, e);
                    }
                }
            }
        }
    }

    async fn alert_staff(&self, text: &str) {
        if let Err(e) = self
            .messaging
            .send(Destination::StaffGeneral, &OutboundMessage::text(text))
            .await
        {
            error!("Staff alert delivery failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: i32) -> NotificationEvent {
        NotificationEvent::TicketOpened {
            ticket_id: n,
            user_name: "u".into(),
            contact_email: None,
            excerpt: String::new(),
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let queue = NotificationQueue::new(2);
        queue.push(event(1));
        queue.push(event(2));
        queue.push(event(3));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 1);

        match queue.pop().await {
            NotificationEvent::TicketOpened { ticket_id, .. } => assert_eq!(ticket_id, 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(NotificationQueue::new(8));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(event(9));
        match waiter.await.expect("waiter task") {
            NotificationEvent::TicketOpened { ticket_id, .. } => assert_eq!(ticket_id, 9),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

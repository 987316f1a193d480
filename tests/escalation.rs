//! SLA escalation behavior: urgency detection, cool-down idempotence and
//! the answered-ticket exclusion, driven with a pinned clock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use festbot::config::SupportConfig;
use festbot::notify::{NotificationEvent, NotificationQueue};
use festbot::shared::models::ResponderRole;
use festbot::shared::test_utils::MemoryTicketStore;
use festbot::tickets::{EscalationMonitor, NewResponse, TicketStore};

fn support_config() -> SupportConfig {
    SupportConfig {
        urgent_threshold_hours: 2,
        escalation_cooldown_minutes: 60,
        sweep_interval_secs: 300,
        max_message_length: 4000,
        notification_queue_capacity: 64,
    }
}

fn user_message(author_id: i64, text: &str) -> NewResponse {
    NewResponse {
        author_id,
        role: ResponderRole::User,
        text: Some(text.into()),
        attachment_file_id: None,
        kind: "text",
        thread_message_id: None,
    }
}

fn staff_message(author_id: i64, text: &str) -> NewResponse {
    NewResponse {
        author_id,
        role: ResponderRole::Staff,
        text: Some(text.into()),
        attachment_file_id: None,
        kind: "text",
        thread_message_id: None,
    }
}

#[tokio::test]
async fn stale_ticket_escalates_once_per_cooldown() {
    let store = Arc::new(MemoryTicketStore::new());
    let queue = Arc::new(NotificationQueue::new(16));
    let now = Utc::now();

    store.freeze_now(now - Duration::hours(3));
    let ticket = store
        .create_ticket(1, None, &user_message(1, "no one answers"))
        .expect("create");
    store.thaw();

    let monitor = EscalationMonitor::new(
        Arc::clone(&store) as Arc<dyn TicketStore>,
        Arc::clone(&queue),
        support_config(),
    );

    // Three hours without an answer: urgent, exactly one event.
    assert_eq!(monitor.sweep(now).expect("sweep"), 1);
    match queue.pop().await {
        NotificationEvent::Escalation {
            ticket_id, waiting, ..
        } => {
            assert_eq!(ticket_id, ticket.id);
            assert!(waiting >= Duration::hours(3));
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Within the cool-down window nothing is re-emitted.
    assert_eq!(monitor.sweep(now + Duration::minutes(10)).expect("sweep"), 0);
    assert!(queue.is_empty());

    // Still unanswered after the window: flagged again.
    assert_eq!(monitor.sweep(now + Duration::minutes(61)).expect("sweep"), 1);
}

#[tokio::test]
async fn answered_ticket_is_never_flagged() {
    let store = Arc::new(MemoryTicketStore::new());
    let queue = Arc::new(NotificationQueue::new(16));
    let now = Utc::now();

    store.freeze_now(now - Duration::hours(3));
    let ticket = store
        .create_ticket(2, None, &user_message(2, "question"))
        .expect("create");

    store.freeze_now(now - Duration::minutes(10));
    store
        .append_staff_response(ticket.id, &staff_message(555, "answer"))
        .expect("staff reply");
    store.thaw();

    let monitor = EscalationMonitor::new(
        Arc::clone(&store) as Arc<dyn TicketStore>,
        Arc::clone(&queue),
        support_config(),
    );

    assert_eq!(monitor.sweep(now).expect("sweep"), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn closed_ticket_is_not_swept() {
    let store = Arc::new(MemoryTicketStore::new());
    let queue = Arc::new(NotificationQueue::new(16));
    let now = Utc::now();

    store.freeze_now(now - Duration::hours(5));
    let ticket = store
        .create_ticket(3, None, &user_message(3, "old question"))
        .expect("create");
    store.thaw();
    store.close_ticket(ticket.id).expect("close");

    let monitor = EscalationMonitor::new(
        Arc::clone(&store) as Arc<dyn TicketStore>,
        Arc::clone(&queue),
        support_config(),
    );

    assert_eq!(monitor.sweep(now).expect("sweep"), 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn urgency_clears_after_answer_and_returns_after_new_message() {
    let store = Arc::new(MemoryTicketStore::new());
    let queue = Arc::new(NotificationQueue::new(16));
    let now = Utc::now();

    store.freeze_now(now - Duration::hours(6));
    let ticket = store
        .create_ticket(4, None, &user_message(4, "first"))
        .expect("create");
    store.thaw();

    let monitor = EscalationMonitor::new(
        Arc::clone(&store) as Arc<dyn TicketStore>,
        Arc::clone(&queue),
        support_config(),
    );
    assert_eq!(monitor.sweep(now - Duration::hours(3)).expect("sweep"), 1);
    queue.pop().await;

    // Staff answers; the ticket is no longer owed a reply.
    store.freeze_now(now - Duration::hours(3));
    store
        .append_staff_response(ticket.id, &staff_message(555, "answer"))
        .expect("reply");
    assert_eq!(monitor.sweep(now - Duration::hours(2)).expect("sweep"), 0);

    // The user follows up and is ignored past the threshold again; the
    // cool-down from the first escalation has long expired.
    store.freeze_now(now - Duration::minutes(150));
    store
        .append_user_response(ticket.id, &user_message(4, "still there?"))
        .expect("append");
    store.thaw();

    assert_eq!(monitor.sweep(now).expect("sweep"), 1);
    match queue.pop().await {
        NotificationEvent::Escalation { ticket_id, .. } => assert_eq!(ticket_id, ticket.id),
        other => panic!("unexpected event: {other:?}"),
    }
}

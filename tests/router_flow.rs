//! End-to-end routing behavior over the in-memory store and a capture
//! messaging port: ticket lifecycle, thread mapping, the close/reopen
//! tie-break and concurrent access.

use std::collections::HashSet;
use std::sync::Arc;

use festbot::channels::{Destination, MessageContent, MessagingPort};
use festbot::config::{RateLimitConfig, SupportConfig};
use festbot::notify::NotificationQueue;
use festbot::policy::UserPolicy;
use festbot::shared::models::{ResponderRole, UserProfile};
use festbot::shared::test_utils::{MemoryTicketStore, MockMessaging};
use festbot::tickets::{
    MessageRouter, NewResponse, RoutingAction, RoutingError, ThreadRegistry, TicketStore,
};

fn support_config() -> SupportConfig {
    SupportConfig {
        urgent_threshold_hours: 2,
        escalation_cooldown_minutes: 60,
        sweep_interval_secs: 300,
        max_message_length: 4000,
        notification_queue_capacity: 64,
    }
}

struct Harness {
    store: Arc<MemoryTicketStore>,
    registry: Arc<ThreadRegistry>,
    messaging: Arc<MockMessaging>,
    router: Arc<MessageRouter>,
}

fn harness() -> Harness {
    harness_with_policy(RateLimitConfig {
        messages_per_hour: 1000,
        burst: 1000,
        enabled: false,
        blocked_user_ids: Vec::new(),
    })
}

fn harness_with_policy(rate_limit: RateLimitConfig) -> Harness {
    let store = Arc::new(MemoryTicketStore::new());
    let registry = Arc::new(ThreadRegistry::new());
    let messaging = Arc::new(MockMessaging::new());
    let queue = Arc::new(NotificationQueue::new(64));
    let policy = Arc::new(UserPolicy::new(&rate_limit));

    let store_dyn: Arc<dyn TicketStore> = Arc::clone(&store) as Arc<dyn TicketStore>;
    let messaging_dyn: Arc<dyn MessagingPort> = Arc::clone(&messaging) as Arc<dyn MessagingPort>;

    let router = Arc::new(MessageRouter::new(
        store_dyn,
        Arc::clone(&registry),
        messaging_dyn,
        policy,
        queue,
        support_config(),
    ));

    Harness {
        store,
        registry,
        messaging,
        router,
    }
}

fn profile(id: i64) -> UserProfile {
    UserProfile {
        id,
        username: Some(format!("user{id}")),
        first_name: Some(format!("User{id}")),
        last_name: None,
        language_code: Some("en".into()),
    }
}

fn text(t: &str) -> MessageContent {
    MessageContent::text(t)
}

#[tokio::test]
async fn sequential_messages_share_one_open_ticket() {
    let h = harness();
    let user = profile(1);

    let first = h
        .router
        .route_user_message(&user, text("first"), None)
        .await
        .expect("first message");
    assert_eq!(first.action, RoutingAction::Created);

    for msg in ["second", "third"] {
        let result = h
            .router
            .route_user_message(&user, text(msg), None)
            .await
            .expect("follow-up");
        assert_eq!(result.action, RoutingAction::Forwarded);
        assert_eq!(result.ticket_id, first.ticket_id);
    }

    assert_eq!(h.store.open_ticket_count().expect("count"), 1);
    let responses = h
        .store
        .responses_for_ticket(first.ticket_id)
        .expect("responses");
    let texts: Vec<_> = responses
        .iter()
        .map(|r| r.message_text.clone().unwrap_or_default())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn staff_reply_updates_sla_timestamps_and_reaches_user() {
    let h = harness();
    let user = profile(2);

    let created = h
        .router
        .route_user_message(&user, text("help!"), None)
        .await
        .expect("create");

    let ticket = h
        .store
        .ticket_by_id(created.ticket_id)
        .expect("lookup")
        .expect("ticket");
    let thread_id = ticket.thread_id.expect("thread created");

    let reply = h
        .router
        .route_staff_reply(thread_id, 555, text("on it"), ResponderRole::Staff)
        .await
        .expect("staff reply");
    assert_eq!(reply.action, RoutingAction::Forwarded);
    assert!(reply.delivered);

    let ticket = h
        .store
        .ticket_by_id(created.ticket_id)
        .expect("lookup")
        .expect("ticket");
    let answered = ticket.last_staff_response_at.expect("answered");
    assert!(answered >= ticket.last_user_message_at);
    assert!(!ticket.awaiting_staff());

    let to_user = h.messaging.sent_to(Destination::User(user.id));
    assert!(to_user.iter().any(|m| m.text.contains("on it")));
}

#[tokio::test]
async fn reply_to_unmapped_thread_is_unknown() {
    let h = harness();
    let err = h
        .router
        .route_staff_reply(99999, 555, text("hello?"), ResponderRole::Staff)
        .await
        .expect_err("must fail");
    assert!(matches!(err, RoutingError::UnknownThread(99999)));
}

#[tokio::test]
async fn reply_to_closed_ticket_is_rejected() {
    let h = harness();
    let user = profile(3);

    let created = h
        .router
        .route_user_message(&user, text("hi"), None)
        .await
        .expect("create");
    let thread_id = h
        .store
        .ticket_by_id(created.ticket_id)
        .expect("lookup")
        .expect("ticket")
        .thread_id
        .expect("thread");

    assert!(h
        .router
        .close_ticket(created.ticket_id, 555)
        .await
        .expect("close"));

    let err = h
        .router
        .route_staff_reply(thread_id, 555, text("too late"), ResponderRole::Staff)
        .await
        .expect_err("closed");
    assert!(matches!(err, RoutingError::TicketAlreadyClosed(id) if id == created.ticket_id));

    // Nothing was appended by the rejected reply.
    let responses = h
        .store
        .responses_for_ticket(created.ticket_id)
        .expect("responses");
    assert_eq!(responses.len(), 1);
}

#[tokio::test]
async fn close_is_idempotent() {
    let h = harness();
    let user = profile(4);

    let created = h
        .router
        .route_user_message(&user, text("hi"), None)
        .await
        .expect("create");

    assert!(h
        .router
        .close_ticket(created.ticket_id, 555)
        .await
        .expect("first close"));
    let notices_after_first = h.messaging.sent_to(Destination::User(user.id)).len();

    assert!(!h
        .router
        .close_ticket(created.ticket_id, 555)
        .await
        .expect("second close"));
    // No duplicate closure notice.
    assert_eq!(
        h.messaging.sent_to(Destination::User(user.id)).len(),
        notices_after_first
    );

    let ticket = h
        .store
        .ticket_by_id(created.ticket_id)
        .expect("lookup")
        .expect("ticket");
    assert!(!ticket.is_open());
}

#[tokio::test]
async fn message_after_close_starts_a_new_ticket() {
    let h = harness();
    let user = profile(5);

    let first = h
        .router
        .route_user_message(&user, text("where is the medical tent?"), None)
        .await
        .expect("create");
    let thread_id = h
        .store
        .ticket_by_id(first.ticket_id)
        .expect("lookup")
        .expect("ticket")
        .thread_id
        .expect("thread");

    h.router
        .route_staff_reply(thread_id, 555, text("Near the main stage."), ResponderRole::Staff)
        .await
        .expect("reply");
    h.router
        .close_ticket(first.ticket_id, 555)
        .await
        .expect("close");

    let followup = h
        .router
        .route_user_message(&user, text("thanks, one more thing"), None)
        .await
        .expect("follow-up");
    assert_eq!(followup.action, RoutingAction::Created);
    assert_ne!(followup.ticket_id, first.ticket_id);

    let old = h
        .store
        .ticket_by_id(first.ticket_id)
        .expect("lookup")
        .expect("ticket");
    assert!(!old.is_open());
}

#[tokio::test]
async fn close_racing_user_message_reopens() {
    // The tie-break: a close persisted between thread resolution and the
    // message append must not swallow the message; the append transaction
    // observes the closed status and reopens.
    let h = harness();
    let user = profile(6);

    let created = h
        .router
        .route_user_message(&user, text("hi"), None)
        .await
        .expect("create");

    // Close lands first (e.g. from a concurrent staff action).
    assert!(h.store.close_ticket(created.ticket_id).expect("close"));

    let outcome = h
        .store
        .append_user_response(
            created.ticket_id,
            &NewResponse {
                author_id: user.id,
                role: ResponderRole::User,
                text: Some("are you still there?".into()),
                attachment_file_id: None,
                kind: "text",
                thread_message_id: None,
            },
        )
        .expect("append");

    assert!(outcome.reopened);
    assert!(outcome.ticket.is_open());
    assert!(outcome.ticket.closed_at.is_none());
    let responses = h
        .store
        .responses_for_ticket(created.ticket_id)
        .expect("responses");
    assert_eq!(responses.len(), 2);
}

#[tokio::test]
async fn registry_rebuild_round_trips() {
    let h = harness();

    for id in 10..13 {
        h.router
            .route_user_message(&profile(id), text("hello"), None)
            .await
            .expect("create");
    }
    let closed = h
        .store
        .open_ticket_for_user(12)
        .expect("lookup")
        .expect("ticket");
    h.router.close_ticket(closed.id, 555).await.expect("close");

    let open = h.store.open_tickets().expect("open tickets");
    assert_eq!(open.len(), 2);

    // Simulated restart: a cold registry rebuilt from the store must answer
    // identically to the live one for all open tickets.
    let rebuilt = ThreadRegistry::new();
    rebuilt
        .rebuild(h.store.as_ref() as &dyn TicketStore)
        .expect("rebuild");

    for ticket in &open {
        let thread_id = ticket.thread_id.expect("thread");
        assert_eq!(
            rebuilt.resolve_by_thread(thread_id),
            h.registry.resolve_by_thread(thread_id)
        );
        assert_eq!(
            rebuilt.resolve_by_user(ticket.user_id),
            h.registry.resolve_by_user(ticket.user_id)
        );
    }
    assert_eq!(rebuilt.resolve_by_user(12), None);
}

#[tokio::test]
async fn blocked_user_creates_no_ticket() {
    let h = harness_with_policy(RateLimitConfig {
        messages_per_hour: 1000,
        burst: 1000,
        enabled: true,
        blocked_user_ids: vec![66],
    });

    let err = h
        .router
        .route_user_message(&profile(66), text("let me in"), None)
        .await
        .expect_err("blocked");
    assert!(matches!(err, RoutingError::UserBlocked(66)));
    assert_eq!(h.store.open_ticket_count().expect("count"), 0);
}

#[tokio::test]
async fn empty_content_is_rejected() {
    let h = harness();
    let err = h
        .router
        .route_user_message(&profile(7), MessageContent::default(), None)
        .await
        .expect_err("empty");
    assert!(matches!(err, RoutingError::InvalidContent));
    assert_eq!(h.store.open_ticket_count().expect("count"), 0);
}

#[tokio::test]
async fn delivery_failure_never_loses_state() {
    let h = harness();
    let user = profile(8);

    h.messaging.set_fail_thread_creation(true);
    h.messaging.set_fail_sends(true);

    let created = h
        .router
        .route_user_message(&user, text("anyone home?"), None)
        .await
        .expect("persisted despite dead channel");
    assert_eq!(created.action, RoutingAction::Created);
    assert!(!created.delivered);

    let ticket = h
        .store
        .ticket_by_id(created.ticket_id)
        .expect("lookup")
        .expect("ticket");
    assert!(ticket.is_open());
    assert!(ticket.thread_id.is_none());

    // Channel recovers; the next message binds the staff thread.
    h.messaging.set_fail_thread_creation(false);
    h.messaging.set_fail_sends(false);

    let next = h
        .router
        .route_user_message(&user, text("hello again"), None)
        .await
        .expect("forwarded");
    assert_eq!(next.ticket_id, created.ticket_id);
    assert!(next.delivered);

    let ticket = h
        .store
        .ticket_by_id(created.ticket_id)
        .expect("lookup")
        .expect("ticket");
    assert!(ticket.thread_id.is_some());
}

#[tokio::test]
async fn concurrent_tickets_stay_isolated() {
    let h = harness();

    let mut creators = Vec::new();
    for id in 100..200 {
        let router = Arc::clone(&h.router);
        creators.push(tokio::spawn(async move {
            router
                .route_user_message(&profile(id), text(&format!("msg from {id}")), None)
                .await
                .expect("create")
        }));
    }
    for task in creators {
        task.await.expect("task");
    }

    assert_eq!(h.store.open_ticket_count().expect("count"), 100);

    let mut ticket_ids = HashSet::new();
    let mut repliers = Vec::new();
    for id in 100..200 {
        let ticket = h
            .store
            .open_ticket_for_user(id)
            .expect("lookup")
            .expect("ticket");
        assert!(ticket_ids.insert(ticket.id), "duplicate ticket for {id}");
        let thread_id = ticket.thread_id.expect("thread");

        let router = Arc::clone(&h.router);
        repliers.push(tokio::spawn(async move {
            router
                .route_staff_reply(thread_id, 555, text(&format!("re {id}")), ResponderRole::Staff)
                .await
                .expect("reply")
        }));
    }
    for task in repliers {
        task.await.expect("task");
    }

    for id in 100..200 {
        let ticket = h
            .store
            .open_ticket_for_user(id)
            .expect("lookup")
            .expect("ticket");
        let responses = h.store.responses_for_ticket(ticket.id).expect("responses");
        assert_eq!(responses.len(), 2, "user {id}");
        assert_eq!(responses[0].author_id, id);
        assert_eq!(
            responses[0].message_text.as_deref(),
            Some(format!("msg from {id}").as_str())
        );
        assert_eq!(
            responses[1].message_text.as_deref(),
            Some(format!("re {id}").as_str())
        );
    }
}

#[tokio::test]
async fn concurrent_appends_serialize_on_one_ticket() {
    let h = harness();
    let user = profile(9);

    let created = h
        .router
        .route_user_message(&user, text("first"), None)
        .await
        .expect("create");

    let mut tasks = Vec::new();
    for n in 0..50 {
        let router = Arc::clone(&h.router);
        let user = user.clone();
        tasks.push(tokio::spawn(async move {
            router
                .route_user_message(&user, text(&format!("follow-up {n}")), None)
                .await
                .expect("append")
        }));
    }
    for task in tasks {
        let result = task.await.expect("task");
        assert_eq!(result.ticket_id, created.ticket_id);
    }

    let responses = h
        .store
        .responses_for_ticket(created.ticket_id)
        .expect("responses");
    assert_eq!(responses.len(), 51);

    // A valid serialization: ids are unique and ordering by (created_at, id)
    // is what the history reports.
    let mut ids: Vec<i32> = responses.iter().map(|r| r.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 51);
    let mut sorted = responses.clone();
    sorted.sort_by_key(|r| (r.created_at, r.id));
    assert_eq!(
        sorted.iter().map(|r| r.id).collect::<Vec<_>>(),
        responses.iter().map(|r| r.id).collect::<Vec<_>>()
    );

    assert_eq!(h.store.open_ticket_count().expect("count"), 1);
}

//! In-memory doubles for the store and messaging boundaries. Used by unit
//! and integration tests; never wired into the production binary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channels::{
    ChannelError, DeliveryResult, Destination, MessagingPort, OutboundMessage,
};
use crate::shared::models::{
    SupportResponse, SupportTicket, User, UserProfile, STATUS_CLOSED, STATUS_OPEN,
};
use crate::tickets::store::{
    AppendOutcome, NewResponse, StaffAppend, StoreError, TicketStore,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<i64, User>,
    tickets: Vec<SupportTicket>,
    responses: Vec<SupportResponse>,
    feedback: Vec<(i64, i32, Option<String>, DateTime<Utc>)>,
    next_ticket_id: i32,
    next_response_id: i32,
    /// Fixed clock for deterministic SLA tests; None means wall clock.
    frozen_now: Option<DateTime<Utc>>,
}

/// Coarse-lock in-memory implementation of `TicketStore`. The single mutex
/// serializes all mutations, which satisfies the per-ticket serialization
/// contract the Postgres store provides with row locks.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    state: Mutex<MemoryState>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pins "now" for subsequent mutations, letting tests age tickets.
    pub fn freeze_now(&self, now: DateTime<Utc>) {
        self.lock().frozen_now = Some(now);
    }

    pub fn thaw(&self) {
        self.lock().frozen_now = None;
    }

    fn now(state: &MemoryState) -> DateTime<Utc> {
        state.frozen_now.unwrap_or_else(Utc::now)
    }

    fn insert_response(
        state: &mut MemoryState,
        ticket_id: i32,
        response: &NewResponse,
        created_at: DateTime<Utc>,
    ) -> SupportResponse {
        state.next_response_id += 1;
        let row = SupportResponse {
            id: state.next_response_id,
            ticket_id,
            author_id: response.author_id,
            role: response.role as i32,
            message_text: response.text.clone(),
            attachment_file_id: response.attachment_file_id.clone(),
            kind: response.kind.to_string(),
            thread_message_id: response.thread_message_id,
            created_at,
        };
        state.responses.push(row.clone());
        row
    }

    fn awaiting_reply(ticket: &SupportTicket, cutoff: DateTime<Utc>) -> bool {
        ticket.is_open() && ticket.awaiting_staff() && ticket.last_user_message_at < cutoff
    }
}

impl TicketStore for MemoryTicketStore {
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);
        match state.users.get_mut(&profile.id) {
            Some(user) => {
                user.username = profile.username.clone();
                user.first_name = profile.first_name.clone();
                user.last_name = profile.last_name.clone();
                user.language_code = profile.language_code.clone();
                user.last_activity = now;
            }
            None => {
                state.users.insert(
                    profile.id,
                    User {
                        id: profile.id,
                        username: profile.username.clone(),
                        first_name: profile.first_name.clone(),
                        last_name: profile.last_name.clone(),
                        language_code: profile.language_code.clone(),
                        created_at: now,
                        last_activity: now,
                    },
                );
            }
        }
        Ok(())
    }

    fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.get(&user_id).cloned())
    }

    fn open_ticket_for_user(&self, user_id: i64) -> Result<Option<SupportTicket>, StoreError> {
        let state = self.lock();
        Ok(state
            .tickets
            .iter()
            .filter(|t| t.user_id == user_id && t.is_open())
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    fn ticket_by_thread(&self, thread_id: i64) -> Result<Option<SupportTicket>, StoreError> {
        let state = self.lock();
        Ok(state
            .tickets
            .iter()
            .filter(|t| t.thread_id == Some(thread_id))
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    fn ticket_by_id(&self, ticket_id: i32) -> Result<Option<SupportTicket>, StoreError> {
        let state = self.lock();
        Ok(state.tickets.iter().find(|t| t.id == ticket_id).cloned())
    }

    fn open_tickets(&self) -> Result<Vec<SupportTicket>, StoreError> {
        let state = self.lock();
        Ok(state
            .tickets
            .iter()
            .filter(|t| t.is_open())
            .cloned()
            .collect())
    }

    fn create_ticket(
        &self,
        user_id: i64,
        email: Option<&str>,
        first: &NewResponse,
    ) -> Result<SupportTicket, StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);

        for ticket in state.tickets.iter_mut() {
            if ticket.user_id == user_id && ticket.is_open() {
                ticket.status = STATUS_CLOSED.to_string();
                ticket.closed_at = Some(now);
                ticket.updated_at = now;
            }
        }

        state.next_ticket_id += 1;
        let ticket = SupportTicket {
            id: state.next_ticket_id,
            user_id,
            email: email.map(str::to_string),
            status: STATUS_OPEN.to_string(),
            thread_id: None,
            initial_message_id: None,
            closed_at: None,
            last_user_message_at: now,
            last_staff_response_at: None,
            created_at: now,
            updated_at: now,
        };
        state.tickets.push(ticket.clone());
        Self::insert_response(&mut state, ticket.id, first, now);
        Ok(ticket)
    }

    fn append_user_response(
        &self,
        ticket_id: i32,
        response: &NewResponse,
    ) -> Result<AppendOutcome, StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);
        if !state.tickets.iter().any(|t| t.id == ticket_id) {
            return Err(StoreError::NotFound);
        }
        let inserted = Self::insert_response(&mut state, ticket_id, response, now);

        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or(StoreError::NotFound)?;

        let reopened = !ticket.is_open();
        if reopened {
            ticket.status = STATUS_OPEN.to_string();
            ticket.closed_at = None;
        }
        ticket.last_user_message_at = now;
        ticket.updated_at = now;

        Ok(AppendOutcome {
            ticket: ticket.clone(),
            response: inserted,
            reopened,
        })
    }

    fn append_staff_response(
        &self,
        ticket_id: i32,
        response: &NewResponse,
    ) -> Result<StaffAppend, StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);

        let is_open = state
            .tickets
            .iter()
            .find(|t| t.id == ticket_id)
            .map(|t| t.is_open())
            .ok_or(StoreError::NotFound)?;
        if !is_open {
            return Ok(StaffAppend::Closed);
        }

        let inserted = Self::insert_response(&mut state, ticket_id, response, now);
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or(StoreError::NotFound)?;
        ticket.last_staff_response_at = Some(now);
        ticket.updated_at = now;

        Ok(StaffAppend::Appended {
            ticket: ticket.clone(),
            response: inserted,
        })
    }

    fn set_thread(
        &self,
        ticket_id: i32,
        thread_id: i64,
        initial_message_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or(StoreError::NotFound)?;
        ticket.thread_id = Some(thread_id);
        ticket.initial_message_id = initial_message_id;
        ticket.updated_at = now;
        Ok(())
    }

    fn set_contact_email(&self, ticket_id: i32, email: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or(StoreError::NotFound)?;
        ticket.email = Some(email.to_string());
        ticket.updated_at = now;
        Ok(())
    }

    fn close_ticket(&self, ticket_id: i32) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);
        let ticket = state
            .tickets
            .iter_mut()
            .find(|t| t.id == ticket_id)
            .ok_or(StoreError::NotFound)?;
        if !ticket.is_open() {
            return Ok(false);
        }
        ticket.status = STATUS_CLOSED.to_string();
        ticket.closed_at = Some(now);
        ticket.updated_at = now;
        Ok(true)
    }

    fn responses_for_ticket(&self, ticket_id: i32) -> Result<Vec<SupportResponse>, StoreError> {
        let state = self.lock();
        let mut responses: Vec<SupportResponse> = state
            .responses
            .iter()
            .filter(|r| r.ticket_id == ticket_id)
            .cloned()
            .collect();
        responses.sort_by_key(|r| (r.created_at, r.id));
        Ok(responses)
    }

    fn tickets_awaiting_reply(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SupportTicket>, StoreError> {
        let state = self.lock();
        let mut tickets: Vec<SupportTicket> = state
            .tickets
            .iter()
            .filter(|t| Self::awaiting_reply(t, cutoff))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.last_user_message_at);
        Ok(tickets)
    }

    fn add_feedback(
        &self,
        user_id: i64,
        rating: i32,
        _category: Option<&str>,
        comment: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let now = Self::now(&state);
        state
            .feedback
            .push((user_id, rating, comment.map(str::to_string), now));
        Ok(())
    }

    fn open_ticket_count(&self) -> Result<i64, StoreError> {
        Ok(self.lock().tickets.iter().filter(|t| t.is_open()).count() as i64)
    }

    fn urgent_ticket_count(&self, cutoff: DateTime<Utc>) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .tickets
            .iter()
            .filter(|t| Self::awaiting_reply(t, cutoff))
            .count() as i64)
    }

    fn total_user_count(&self) -> Result<i64, StoreError> {
        Ok(self.lock().users.len() as i64)
    }

    fn recent_feedback_count(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .feedback
            .iter()
            .filter(|(_, _, _, at)| *at > since)
            .count() as i64)
    }
}

/// Messaging port that records every send and mints sequential thread
/// handles. Optionally fails all sends to exercise persist-then-send.
#[derive(Debug, Default)]
pub struct MockMessaging {
    pub sent: Mutex<Vec<(Destination, OutboundMessage)>>,
    next_thread_id: AtomicI64,
    fail_sends: std::sync::atomic::AtomicBool,
    fail_thread_creation: std::sync::atomic::AtomicBool,
}

impl MockMessaging {
    pub fn new() -> Self {
        Self {
            next_thread_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_thread_creation(&self, fail: bool) {
        self.fail_thread_creation.store(fail, Ordering::Relaxed);
    }

    pub fn sent_to(&self, destination: Destination) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(dest, _)| *dest == destination)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl MessagingPort for MockMessaging {
    async fn send(
        &self,
        destination: Destination,
        message: &OutboundMessage,
    ) -> Result<DeliveryResult, ChannelError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err("simulated delivery failure".into());
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push((destination, message.clone()));
        Ok(DeliveryResult {
            message_id: Some(sent.len() as i64),
        })
    }

    async fn create_thread(&self, _title: &str) -> Result<i64, ChannelError> {
        if self.fail_thread_creation.load(Ordering::Relaxed) {
            return Err("simulated topic creation failure".into());
        }
        Ok(self.next_thread_id.fetch_add(1, Ordering::Relaxed))
    }
}

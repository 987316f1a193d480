use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel::PgConnection;
use thiserror::Error;

use crate::shared::models::{
    NewFeedbackRow, NewResponseRow, NewTicketRow, ResponderRole, SupportResponse, SupportTicket,
    User, UserProfile, STATUS_CLOSED, STATUS_OPEN,
};
use crate::shared::schema::{feedback, support_responses, support_tickets, users};
use crate::shared::utils::DbPool;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record not found")]
    NotFound,
    #[error("query failed: {0}")]
    Query(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => StoreError::NotFound,
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// A response about to be appended to a ticket.
#[derive(Debug, Clone)]
pub struct NewResponse {
    pub author_id: i64,
    pub role: ResponderRole,
    pub text: Option<String>,
    pub attachment_file_id: Option<String>,
    pub kind: &'static str,
    pub thread_message_id: Option<i64>,
}

impl NewResponse {
    fn as_row(&self, ticket_id: i32, created_at: DateTime<Utc>) -> NewResponseRow<'_> {
        NewResponseRow {
            ticket_id,
            author_id: self.author_id,
            role: self.role as i32,
            message_text: self.text.as_deref(),
            attachment_file_id: self.attachment_file_id.as_deref(),
            kind: self.kind,
            thread_message_id: self.thread_message_id,
            created_at,
        }
    }
}

/// Result of appending a user message to an existing ticket.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub ticket: SupportTicket,
    pub response: SupportResponse,
    /// The ticket was closed when the append was persisted; the same
    /// transaction reopened it so the message is not silently dropped.
    pub reopened: bool,
}

/// Result of appending a staff reply.
#[derive(Debug, Clone)]
pub enum StaffAppend {
    Appended {
        ticket: SupportTicket,
        response: SupportResponse,
    },
    /// The ticket was closed when the write was attempted; nothing was
    /// persisted. Reopening on the staff path is an explicit operation.
    Closed,
}

/// Transactional access to tickets, responses, users and feedback. Every
/// mutation of a single ticket is serialized by the implementation (row
/// locks in Postgres, a coarse lock in the in-memory test store).
pub trait TicketStore: Send + Sync {
    fn ping(&self) -> Result<(), StoreError>;

    fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError>;
    fn user(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    fn open_ticket_for_user(&self, user_id: i64) -> Result<Option<SupportTicket>, StoreError>;
    fn ticket_by_thread(&self, thread_id: i64) -> Result<Option<SupportTicket>, StoreError>;
    fn ticket_by_id(&self, ticket_id: i32) -> Result<Option<SupportTicket>, StoreError>;
    fn open_tickets(&self) -> Result<Vec<SupportTicket>, StoreError>;

    /// Creates a ticket with its first response in one transaction. Any
    /// still-open ticket of the same user is closed first, so the
    /// single-open-ticket invariant holds even under races.
    fn create_ticket(
        &self,
        user_id: i64,
        email: Option<&str>,
        first: &NewResponse,
    ) -> Result<SupportTicket, StoreError>;

    fn append_user_response(
        &self,
        ticket_id: i32,
        response: &NewResponse,
    ) -> Result<AppendOutcome, StoreError>;

    fn append_staff_response(
        &self,
        ticket_id: i32,
        response: &NewResponse,
    ) -> Result<StaffAppend, StoreError>;

    fn set_thread(
        &self,
        ticket_id: i32,
        thread_id: i64,
        initial_message_id: Option<i64>,
    ) -> Result<(), StoreError>;

    fn set_contact_email(&self, ticket_id: i32, email: &str) -> Result<(), StoreError>;

    /// Conditional close; returns whether this call performed the
    /// open → closed transition.
    fn close_ticket(&self, ticket_id: i32) -> Result<bool, StoreError>;

    fn responses_for_ticket(&self, ticket_id: i32) -> Result<Vec<SupportResponse>, StoreError>;

    /// Open tickets where the user spoke last and has been waiting since
    /// before `cutoff`.
    fn tickets_awaiting_reply(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SupportTicket>, StoreError>;

    fn add_feedback(
        &self,
        user_id: i64,
        rating: i32,
        category: Option<&str>,
        comment: Option<&str>,
    ) -> Result<(), StoreError>;

    fn open_ticket_count(&self) -> Result<i64, StoreError>;
    fn urgent_ticket_count(&self, cutoff: DateTime<Utc>) -> Result<i64, StoreError>;
    fn total_user_count(&self) -> Result<i64, StoreError>;
    fn recent_feedback_count(&self, since: DateTime<Utc>) -> Result<i64, StoreError>;
}

/// Postgres-backed store over an r2d2 pool.
pub struct PgTicketStore {
    pool: DbPool,
}

impl PgTicketStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(
        &self,
    ) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<PgConnection>>, StoreError>
    {
        self.pool
            .get()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl TicketStore for PgTicketStore {
    fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn upsert_user(&self, profile: &UserProfile) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let now = Utc::now();
        diesel::insert_into(users::table)
            .values((
                users::id.eq(profile.id),
                users::username.eq(profile.username.as_deref()),
                users::first_name.eq(profile.first_name.as_deref()),
                users::last_name.eq(profile.last_name.as_deref()),
                users::language_code.eq(profile.language_code.as_deref()),
                users::created_at.eq(now),
                users::last_activity.eq(now),
            ))
            .on_conflict(users::id)
            .do_update()
            .set((
                users::username.eq(excluded(users::username)),
                users::first_name.eq(excluded(users::first_name)),
                users::last_name.eq(excluded(users::last_name)),
                users::language_code.eq(excluded(users::language_code)),
                users::last_activity.eq(now),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    fn user(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn()?;
        let user = users::table
            .find(user_id)
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    fn open_ticket_for_user(&self, user_id: i64) -> Result<Option<SupportTicket>, StoreError> {
        let mut conn = self.conn()?;
        let ticket = support_tickets::table
            .filter(support_tickets::user_id.eq(user_id))
            .filter(support_tickets::status.eq(STATUS_OPEN))
            .order(support_tickets::created_at.desc())
            .first::<SupportTicket>(&mut conn)
            .optional()?;
        Ok(ticket)
    }

    fn ticket_by_thread(&self, thread_id: i64) -> Result<Option<SupportTicket>, StoreError> {
        let mut conn = self.conn()?;
        let ticket = support_tickets::table
            .filter(support_tickets::thread_id.eq(thread_id))
            .order(support_tickets::created_at.desc())
            .first::<SupportTicket>(&mut conn)
            .optional()?;
        Ok(ticket)
    }

    fn ticket_by_id(&self, ticket_id: i32) -> Result<Option<SupportTicket>, StoreError> {
        let mut conn = self.conn()?;
        let ticket = support_tickets::table
            .find(ticket_id)
            .first::<SupportTicket>(&mut conn)
            .optional()?;
        Ok(ticket)
    }

    fn open_tickets(&self) -> Result<Vec<SupportTicket>, StoreError> {
        let mut conn = self.conn()?;
        let tickets = support_tickets::table
            .filter(support_tickets::status.eq(STATUS_OPEN))
            .order(support_tickets::created_at.asc())
            .load::<SupportTicket>(&mut conn)?;
        Ok(tickets)
    }

    fn create_ticket(
        &self,
        user_id: i64,
        email: Option<&str>,
        first: &NewResponse,
    ) -> Result<SupportTicket, StoreError> {
        let mut conn = self.conn()?;
        let ticket = conn.transaction::<SupportTicket, diesel::result::Error, _>(|conn| {
            let now = Utc::now();

            diesel::update(
                support_tickets::table
                    .filter(support_tickets::user_id.eq(user_id))
                    .filter(support_tickets::status.eq(STATUS_OPEN)),
            )
            .set((
                support_tickets::status.eq(STATUS_CLOSED),
                support_tickets::closed_at.eq(now),
                support_tickets::updated_at.eq(now),
            ))
            .execute(conn)?;

            let ticket: SupportTicket = diesel::insert_into(support_tickets::table)
                .values(NewTicketRow {
                    user_id,
                    email,
                    status: STATUS_OPEN,
                    last_user_message_at: now,
                    created_at: now,
                    updated_at: now,
                })
                .get_result(conn)?;

            diesel::insert_into(support_responses::table)
                .values(first.as_row(ticket.id, now))
                .execute(conn)?;

            Ok(ticket)
        })?;
        Ok(ticket)
    }

    fn append_user_response(
        &self,
        ticket_id: i32,
        response: &NewResponse,
    ) -> Result<AppendOutcome, StoreError> {
        let mut conn = self.conn()?;
        let outcome = conn.transaction::<AppendOutcome, diesel::result::Error, _>(|conn| {
            let ticket: SupportTicket = support_tickets::table
                .find(ticket_id)
                .for_update()
                .first(conn)?;
            let now = Utc::now();

            let inserted: SupportResponse = diesel::insert_into(support_responses::table)
                .values(response.as_row(ticket_id, now))
                .get_result(conn)?;

            let reopened = !ticket.is_open();
            let ticket: SupportTicket = if reopened {
                diesel::update(support_tickets::table.find(ticket_id))
                    .set((
                        support_tickets::status.eq(STATUS_OPEN),
                        support_tickets::closed_at.eq(None::<DateTime<Utc>>),
                        support_tickets::last_user_message_at.eq(now),
                        support_tickets::updated_at.eq(now),
                    ))
                    .get_result(conn)?
            } else {
                diesel::update(support_tickets::table.find(ticket_id))
                    .set((
                        support_tickets::last_user_message_at.eq(now),
                        support_tickets::updated_at.eq(now),
                    ))
                    .get_result(conn)?
            };

            Ok(AppendOutcome {
                ticket,
                response: inserted,
                reopened,
            })
        })?;
        Ok(outcome)
    }

    fn append_staff_response(
        &self,
        ticket_id: i32,
        response: &NewResponse,
    ) -> Result<StaffAppend, StoreError> {
        let mut conn = self.conn()?;
        let appended = conn.transaction::<StaffAppend, diesel::result::Error, _>(|conn| {
            let ticket: SupportTicket = support_tickets::table
                .find(ticket_id)
                .for_update()
                .first(conn)?;
            if !ticket.is_open() {
                return Ok(StaffAppend::Closed);
            }
            let now = Utc::now();

            let inserted: SupportResponse = diesel::insert_into(support_responses::table)
                .values(response.as_row(ticket_id, now))
                .get_result(conn)?;

            let ticket: SupportTicket = diesel::update(support_tickets::table.find(ticket_id))
                .set((
                    support_tickets::last_staff_response_at.eq(now),
                    support_tickets::updated_at.eq(now),
                ))
                .get_result(conn)?;

            Ok(StaffAppend::Appended {
                ticket,
                response: inserted,
            })
        })?;
        Ok(appended)
    }

    fn set_thread(
        &self,
        ticket_id: i32,
        thread_id: i64,
        initial_message_id: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        diesel::update(support_tickets::table.find(ticket_id))
            .set((
                support_tickets::thread_id.eq(thread_id),
                support_tickets::initial_message_id.eq(initial_message_id),
                support_tickets::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    fn set_contact_email(&self, ticket_id: i32, email: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        diesel::update(support_tickets::table.find(ticket_id))
            .set((
                support_tickets::email.eq(email),
                support_tickets::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    fn close_ticket(&self, ticket_id: i32) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let now = Utc::now();
        let affected = diesel::update(
            support_tickets::table
                .filter(support_tickets::id.eq(ticket_id))
                .filter(support_tickets::status.eq(STATUS_OPEN)),
        )
        .set((
            support_tickets::status.eq(STATUS_CLOSED),
            support_tickets::closed_at.eq(now),
            support_tickets::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
        Ok(affected > 0)
    }

    fn responses_for_ticket(&self, ticket_id: i32) -> Result<Vec<SupportResponse>, StoreError> {
        let mut conn = self.conn()?;
        let responses = support_responses::table
            .filter(support_responses::ticket_id.eq(ticket_id))
            .order((support_responses::created_at.asc(), support_responses::id.asc()))
            .load::<SupportResponse>(&mut conn)?;
        Ok(responses)
    }

    fn tickets_awaiting_reply(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SupportTicket>, StoreError> {
        let mut conn = self.conn()?;
        let tickets = support_tickets::table
            .filter(support_tickets::status.eq(STATUS_OPEN))
            .filter(
                support_tickets::last_staff_response_at
                    .is_null()
                    .or(support_tickets::last_user_message_at
                        .nullable()
                        .gt(support_tickets::last_staff_response_at)),
            )
            .filter(support_tickets::last_user_message_at.lt(cutoff))
            .order(support_tickets::last_user_message_at.asc())
            .load::<SupportTicket>(&mut conn)?;
        Ok(tickets)
    }

    fn add_feedback(
        &self,
        user_id: i64,
        rating: i32,
        category: Option<&str>,
        comment: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        diesel::insert_into(feedback::table)
            .values(NewFeedbackRow {
                user_id,
                category,
                rating,
                comment,
                created_at: Utc::now(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    fn open_ticket_count(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let count = support_tickets::table
            .filter(support_tickets::status.eq(STATUS_OPEN))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }

    fn urgent_ticket_count(&self, cutoff: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let count = support_tickets::table
            .filter(support_tickets::status.eq(STATUS_OPEN))
            .filter(
                support_tickets::last_staff_response_at
                    .is_null()
                    .or(support_tickets::last_user_message_at
                        .nullable()
                        .gt(support_tickets::last_staff_response_at)),
            )
            .filter(support_tickets::last_user_message_at.lt(cutoff))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }

    fn total_user_count(&self) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let count = users::table.count().get_result(&mut conn)?;
        Ok(count)
    }

    fn recent_feedback_count(&self, since: DateTime<Utc>) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let count = feedback::table
            .filter(feedback::created_at.gt(since))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }
}

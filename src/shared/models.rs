use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

pub use super::schema;
pub use super::schema::{feedback, support_responses, support_tickets, users};

pub const STATUS_OPEN: &str = "open";
pub const STATUS_CLOSED: &str = "closed";

/// Who authored a support response. Stored as an Int4 column so new roles
/// can be added without a schema migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponderRole {
    User = 0,
    Staff = 1,
    Admin = 2,
}

impl ResponderRole {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::User),
            1 => Some(Self::Staff),
            2 => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn is_staff_side(self) -> bool {
        matches!(self, Self::Staff | Self::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl User {
    /// Display name used in staff-side thread titles and alerts.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self
                .username
                .clone()
                .unwrap_or_else(|| format!("User {}", self.id)),
        }
    }
}

/// Inbound identity as delivered by the messaging platform.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            _ => self
                .username
                .clone()
                .unwrap_or_else(|| format!("User {}", self.id)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = support_tickets)]
pub struct SupportTicket {
    pub id: i32,
    pub user_id: i64,
    pub email: Option<String>,
    pub status: String,
    pub thread_id: Option<i64>,
    pub initial_message_id: Option<i64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_user_message_at: DateTime<Utc>,
    pub last_staff_response_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupportTicket {
    pub fn is_open(&self) -> bool {
        self.status == STATUS_OPEN
    }

    /// The user spoke last (or was never answered); the basis for SLA
    /// computation.
    pub fn awaiting_staff(&self) -> bool {
        match self.last_staff_response_at {
            None => true,
            Some(answered) => self.last_user_message_at > answered,
        }
    }

    /// How long the user has been waiting, measured from the later of the
    /// last user message and ticket creation.
    pub fn waiting_since(&self) -> DateTime<Utc> {
        self.last_user_message_at.max(self.created_at)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = support_tickets)]
pub struct NewTicketRow<'a> {
    pub user_id: i64,
    pub email: Option<&'a str>,
    pub status: &'a str,
    pub last_user_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = support_responses)]
pub struct SupportResponse {
    pub id: i32,
    pub ticket_id: i32,
    pub author_id: i64,
    pub role: i32,
    pub message_text: Option<String>,
    pub attachment_file_id: Option<String>,
    pub kind: String,
    pub thread_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl SupportResponse {
    pub fn responder_role(&self) -> Option<ResponderRole> {
        ResponderRole::from_i32(self.role)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = support_responses)]
pub struct NewResponseRow<'a> {
    pub ticket_id: i32,
    pub author_id: i64,
    pub role: i32,
    pub message_text: Option<&'a str>,
    pub attachment_file_id: Option<&'a str>,
    pub kind: &'a str,
    pub thread_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = feedback)]
pub struct Feedback {
    pub id: i32,
    pub user_id: i64,
    pub category: Option<String>,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = feedback)]
pub struct NewFeedbackRow<'a> {
    pub user_id: i64,
    pub category: Option<&'a str>,
    pub rating: i32,
    pub comment: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_i32() {
        for role in [ResponderRole::User, ResponderRole::Staff, ResponderRole::Admin] {
            assert_eq!(ResponderRole::from_i32(role as i32), Some(role));
        }
        assert_eq!(ResponderRole::from_i32(7), None);
    }

    #[test]
    fn display_name_prefers_full_name() {
        let profile = UserProfile {
            id: 42,
            username: Some("ann".into()),
            first_name: Some("Ann".into()),
            last_name: Some("Lee".into()),
            ..Default::default()
        };
        assert_eq!(profile.display_name(), "Ann Lee");

        let bare = UserProfile {
            id: 42,
            ..Default::default()
        };
        assert_eq!(bare.display_name(), "User 42");
    }
}

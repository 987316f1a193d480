//! Read-only operational query surface consumed by health checks and
//! reporting. Never drives ticket state transitions.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{Duration, Utc};
use log::error;
use serde::Serialize;

use crate::shared::state::AppState;
use crate::tickets::StoreError;

#[derive(Debug, Serialize)]
pub struct SupportStats {
    pub open_tickets: i64,
    pub urgent_tickets: i64,
    pub total_users: i64,
    pub feedback_24h: i64,
    pub dropped_notifications: u64,
}

pub fn collect(state: &AppState) -> Result<SupportStats, StoreError> {
    let now = Utc::now();
    let urgent_cutoff = now - state.config.support.urgent_threshold();
    Ok(SupportStats {
        open_tickets: state.store.open_ticket_count()?,
        urgent_tickets: state.store.urgent_ticket_count(urgent_cutoff)?,
        total_users: state.store.total_user_count()?,
        feedback_24h: state.store.recent_feedback_count(now - Duration::hours(24))?,
        dropped_notifications: state.notifications.dropped_count(),
    })
}

/// Plain-text rendering for the staff /stats command.
pub fn render(stats: &SupportStats) -> String {
    format!(
        "📊 Support status\n\
         Open tickets: {}\n\
         Urgent (unanswered): {}\n\
         Known users: {}\n\
         Feedback in 24h: {}\n\
         Dropped notifications: {}",
        stats.open_tickets,
        stats.urgent_tickets,
        stats.total_users,
        stats.feedback_24h,
        stats.dropped_notifications,
    )
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/support/stats", get(support_stats))
}

async fn support_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SupportStats>, (StatusCode, String)> {
    collect(&state).map(Json).map_err(|e| {
        error!("Stats query failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Stats error: {e}"))
    })
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    if let Err(e) = state.store.ping() {
        error!("Health check: store unreachable: {}", e);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "error",
                "database": "unreachable",
            })),
        );
    }

    let mut warnings: Vec<String> = Vec::new();
    match collect(&state) {
        Ok(stats) => {
            if stats.urgent_tickets > 10 {
                warnings.push(format!("Many urgent tickets: {}", stats.urgent_tickets));
            }
            if stats.open_tickets > 50 {
                warnings.push(format!("Many open tickets: {}", stats.open_tickets));
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": if warnings.is_empty() { "healthy" } else { "degraded" },
                    "database": "ok",
                    "open_tickets": stats.open_tickets,
                    "urgent_tickets": stats.urgent_tickets,
                    "warnings": warnings,
                })),
            )
        }
        Err(e) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "degraded",
                "database": "ok",
                "warnings": [format!("Support health query failed: {e}")],
            })),
        ),
    }
}

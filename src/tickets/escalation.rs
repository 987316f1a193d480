use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use uuid::Uuid;

use crate::config::SupportConfig;
use crate::notify::{NotificationEvent, NotificationQueue};

use super::store::{StoreError, TicketStore};

/// Periodic sweep over open tickets that computes SLA breaches and emits
/// escalation events. Read-only with respect to ticket state; skipping a
/// cycle is harmless because every sweep recomputes from current timestamps.
pub struct EscalationMonitor {
    store: Arc<dyn TicketStore>,
    notifications: Arc<NotificationQueue>,
    settings: SupportConfig,
    /// Ticket id -> time of the last emitted escalation, for the cool-down.
    last_emitted: Mutex<HashMap<i32, DateTime<Utc>>>,
}

impl EscalationMonitor {
    pub fn new(
        store: Arc<dyn TicketStore>,
        notifications: Arc<NotificationQueue>,
        settings: SupportConfig,
    ) -> Self {
        Self {
            store,
            notifications,
            settings,
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.settings.sweep_interval_secs));
        info!(
            "Escalation monitor started (threshold {}h, sweep every {}s)",
            self.settings.urgent_threshold_hours, self.settings.sweep_interval_secs
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()) {
                        error!("Escalation sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Escalation monitor stopped");
    }

    /// One evaluation pass. Public so tests can drive it with a fixed clock.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = now - self.settings.urgent_threshold();
        let urgent = self.store.tickets_awaiting_reply(cutoff)?;
        let cooldown = self.settings.escalation_cooldown();

        let mut emitted = 0;
        {
            let mut last_emitted = self
                .last_emitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            for ticket in &urgent {
                let within_cooldown = last_emitted
                    .get(&ticket.id)
                    .map_or(false, |last| now - *last < cooldown);
                if within_cooldown {
                    continue;
                }

                let user_name = self
                    .store
                    .user(ticket.user_id)
                    .ok()
                    .flatten()
                    .map(|u| u.display_name())
                    .unwrap_or_else(|| format!("User {}", ticket.user_id));

                self.notifications.push(NotificationEvent::Escalation {
                    event_id: Uuid::new_v4(),
                    ticket_id: ticket.id,
                    user_name,
                    waiting: now - ticket.waiting_since(),
                });
                last_emitted.insert(ticket.id, now);
                emitted += 1;
            }

            // Forget cool-down entries for tickets that are no longer urgent
            // (answered or closed); they may escalate afresh later.
            let urgent_ids: std::collections::HashSet<i32> =
                urgent.iter().map(|t| t.id).collect();
            last_emitted.retain(|id, last| urgent_ids.contains(id) || now - *last < cooldown);
        }

        if emitted > 0 {
            info!("Escalation sweep flagged {} ticket(s) urgent", emitted);
        } else {
            debug!("Escalation sweep: nothing urgent");
        }
        Ok(emitted)
    }
}

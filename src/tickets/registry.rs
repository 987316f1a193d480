use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use log::info;

use super::store::{StoreError, TicketStore};

#[derive(Debug, Default)]
struct RegistryIndex {
    by_thread: HashMap<i64, i32>,
    by_user: HashMap<i64, i32>,
    /// Reverse entries for O(1) unregister: ticket -> (user, thread).
    tickets: HashMap<i32, (i64, Option<i64>)>,
}

/// In-memory index from thread handles and user ids to the currently open
/// ticket. A cache over the store, never a source of truth: it starts empty
/// and can be rebuilt from open tickets at any time.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    inner: RwLock<RegistryIndex>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_by_thread(&self, thread_id: i64) -> Option<i32> {
        self.read().by_thread.get(&thread_id).copied()
    }

    /// Open ticket currently routing this user's messages.
    pub fn resolve_by_user(&self, user_id: i64) -> Option<i32> {
        self.read().by_user.get(&user_id).copied()
    }

    /// Registers (or re-registers) an open ticket. The thread handle may be
    /// absent while staff-side thread creation is still pending.
    pub fn register(&self, ticket_id: i32, user_id: i64, thread_id: Option<i64>) {
        let mut index = self.write();
        if let Some((old_user, old_thread)) = index.tickets.remove(&ticket_id) {
            index.by_user.remove(&old_user);
            if let Some(old_thread) = old_thread {
                index.by_thread.remove(&old_thread);
            }
        }
        index.by_user.insert(user_id, ticket_id);
        if let Some(thread_id) = thread_id {
            index.by_thread.insert(thread_id, ticket_id);
        }
        index.tickets.insert(ticket_id, (user_id, thread_id));
    }

    /// Drops a ticket from active routing. Closed tickets stay resolvable
    /// through the store for audit purposes; only the cache forgets them.
    pub fn unregister(&self, ticket_id: i32) {
        let mut index = self.write();
        if let Some((user_id, thread_id)) = index.tickets.remove(&ticket_id) {
            index.by_user.remove(&user_id);
            if let Some(thread_id) = thread_id {
                index.by_thread.remove(&thread_id);
            }
        }
    }

    /// Replaces the whole index with the store's open tickets. Returns how
    /// many tickets were loaded.
    pub fn rebuild(&self, store: &dyn TicketStore) -> Result<usize, StoreError> {
        let open = store.open_tickets()?;
        let mut fresh = RegistryIndex::default();
        for ticket in &open {
            fresh.by_user.insert(ticket.user_id, ticket.id);
            if let Some(thread_id) = ticket.thread_id {
                fresh.by_thread.insert(thread_id, ticket.id);
            }
            fresh.tickets.insert(ticket.id, (ticket.user_id, ticket.thread_id));
        }
        let count = fresh.tickets.len();
        *self.write() = fresh;
        info!("Thread registry rebuilt with {} open tickets", count);
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.read().tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryIndex> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryIndex> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_resolve_unregister() {
        let registry = ThreadRegistry::new();
        registry.register(7, 100, Some(555));

        assert_eq!(registry.resolve_by_thread(555), Some(7));
        assert_eq!(registry.resolve_by_user(100), Some(7));

        registry.unregister(7);
        assert_eq!(registry.resolve_by_thread(555), None);
        assert_eq!(registry.resolve_by_user(100), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn late_thread_binding() {
        let registry = ThreadRegistry::new();
        registry.register(3, 42, None);
        assert_eq!(registry.resolve_by_user(42), Some(3));
        assert_eq!(registry.resolve_by_thread(900), None);

        registry.register(3, 42, Some(900));
        assert_eq!(registry.resolve_by_thread(900), Some(3));
        assert_eq!(registry.len(), 1);
    }
}

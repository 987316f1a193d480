//! Inbound user policy: suppression set plus per-user rate limiting with
//! the governor library. The router consumes the verdict; it owns no policy
//! logic itself.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use log::info;
use tokio::sync::RwLock;

use crate::config::RateLimitConfig;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyRejection {
    Blocked,
    RateLimited,
}

impl std::fmt::Display for PolicyRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "user is blocked"),
            Self::RateLimited => write!(f, "message rate limit exceeded"),
        }
    }
}

pub struct UserPolicy {
    enabled: bool,
    quota: Quota,
    blocked: RwLock<HashSet<i64>>,
    limiters: RwLock<HashMap<i64, Arc<Limiter>>>,
    cleanup_threshold: usize,
}

impl UserPolicy {
    pub fn new(config: &RateLimitConfig) -> Self {
        let quota = Quota::per_hour(
            NonZeroU32::new(config.messages_per_hour).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN));

        Self {
            enabled: config.enabled,
            quota,
            blocked: RwLock::new(config.blocked_user_ids.iter().copied().collect()),
            limiters: RwLock::new(HashMap::new()),
            cleanup_threshold: 10000,
        }
    }

    /// Verdict for one inbound message from `user_id`.
    pub async fn check_inbound(&self, user_id: i64) -> Result<(), PolicyRejection> {
        if self.blocked.read().await.contains(&user_id) {
            return Err(PolicyRejection::Blocked);
        }
        if !self.enabled {
            return Ok(());
        }

        let limiter = {
            let limiters = self.limiters.read().await;
            limiters.get(&user_id).cloned()
        };

        let limiter = match limiter {
            Some(limiter) => limiter,
            None => {
                let mut limiters = self.limiters.write().await;
                if limiters.len() > self.cleanup_threshold {
                    limiters.clear();
                }
                limiters
                    .entry(user_id)
                    .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
                    .clone()
            }
        };

        if limiter.check().is_ok() {
            Ok(())
        } else {
            Err(PolicyRejection::RateLimited)
        }
    }

    pub async fn block(&self, user_id: i64) {
        self.blocked.write().await.insert(user_id);
        info!("User {} added to the suppression set", user_id);
    }

    pub async fn unblock(&self, user_id: i64) -> bool {
        let removed = self.blocked.write().await.remove(&user_id);
        if removed {
            info!("User {} removed from the suppression set", user_id);
        }
        removed
    }

    pub async fn is_blocked(&self, user_id: i64) -> bool {
        self.blocked.read().await.contains(&user_id)
    }
}

impl std::fmt::Debug for UserPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPolicy")
            .field("enabled", &self.enabled)
            .field("cleanup_threshold", &self.cleanup_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            messages_per_hour: 20,
            burst,
            enabled,
            blocked_user_ids: vec![666],
        }
    }

    #[tokio::test]
    async fn seeded_block_list_applies() {
        let policy = UserPolicy::new(&config(true, 5));
        assert_eq!(
            policy.check_inbound(666).await,
            Err(PolicyRejection::Blocked)
        );
        assert!(policy.unblock(666).await);
        assert!(policy.check_inbound(666).await.is_ok());
    }

    #[tokio::test]
    async fn burst_exhaustion_rate_limits() {
        let policy = UserPolicy::new(&config(true, 2));
        assert!(policy.check_inbound(1).await.is_ok());
        assert!(policy.check_inbound(1).await.is_ok());
        assert_eq!(
            policy.check_inbound(1).await,
            Err(PolicyRejection::RateLimited)
        );
        // Other users are unaffected.
        assert!(policy.check_inbound(2).await.is_ok());
    }

    #[tokio::test]
    async fn disabled_limiter_still_blocks() {
        let policy = UserPolicy::new(&config(false, 1));
        for _ in 0..10 {
            assert!(policy.check_inbound(1).await.is_ok());
        }
        policy.block(1).await;
        assert_eq!(policy.check_inbound(1).await, Err(PolicyRejection::Blocked));
    }
}

//! Per-key minimum-interval admission control.
//!
//! State is in memory and per process: several server instances each gate
//! independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Clone, Default)]
pub struct RateGate {
    last_allowed: Arc<Mutex<HashMap<String, Instant>>>,
}

impl RateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit the call and record it if more than `min_interval` has passed
    /// since the last admitted call for `key`. Rejected calls are not recorded.
    /// A zero interval disables the gate.
    pub async fn allow(&self, key: &str, min_interval: Duration) -> bool {
        if min_interval.is_zero() {
            return true;
        }
        let now = Instant::now();
        let mut last_allowed = self.last_allowed.lock().await;

        match last_allowed.get_mut(key) {
            Some(last) if now.duration_since(*last) <= min_interval => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                last_allowed.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget keys whose last admitted call is older than `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut last_allowed = self.last_allowed.lock().await;
        let now = Instant::now();
        let before = last_allowed.len();
        last_allowed.retain(|_, last| now.duration_since(*last) < max_idle);
        let evicted = before - last_allowed.len();
        if evicted > 0 {
            tracing::debug!(evicted, "purged idle rate gate keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_millis(1000);

    #[tokio::test(start_paused = true)]
    async fn test_allow_then_block_then_allow() {
        let gate = RateGate::new();
        assert!(gate.allow("k", SECOND).await);
        assert!(!gate.allow("k", SECOND).await);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!gate.allow("k", SECOND).await);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(gate.allow("k", SECOND).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_calls_do_not_extend_window() {
        let gate = RateGate::new();
        assert!(gate.allow("k", SECOND).await);
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!gate.allow("k", SECOND).await);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(gate.allow("k", SECOND).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let gate = RateGate::new();
        assert!(gate.allow("1:pull", SECOND).await);
        assert!(gate.allow("1:push", SECOND).await);
        assert!(gate.allow("2:pull", SECOND).await);
        assert!(!gate.allow("1:pull", SECOND).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_always_allows() {
        let gate = RateGate::new();
        assert!(gate.allow("k", Duration::ZERO).await);
        assert!(gate.allow("k", Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_stale() {
        let gate = RateGate::new();
        assert!(gate.allow("old", SECOND).await);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(gate.allow("fresh", SECOND).await);

        gate.purge_stale(Duration::from_secs(30)).await;

        let map = gate.last_allowed.lock().await;
        assert!(!map.contains_key("old"));
        assert!(map.contains_key("fresh"));
    }
}

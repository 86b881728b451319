//! Per-object retry delays
//!
//! Each consecutive failure for the same object doubles the delay, up to
//! a cap. A success forgets the object.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use pko_core::ObjectKey;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(10);
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `key` and return how long to wait before retrying.
    pub fn next(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        let delay = self
            .initial
            .saturating_mul(2u32.saturating_pow(*count))
            .min(self.max);
        *count = count.saturating_add(1);
        delay
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let backoff = Backoff::default();
        let key = ObjectKey::new(Some("apps"), "web");

        let delays: Vec<u64> = (0..7).map(|_| backoff.next(&key).as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 300, 300]);
        assert_eq!(backoff.failures(&key), 7);

        for _ in 0..40 {
            backoff.next(&key);
        }
        assert_eq!(backoff.next(&key), MAX_BACKOFF);
    }

    #[test]
    fn test_reset_and_keys_are_independent() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        let web = ObjectKey::new(Some("apps"), "web");
        let db = ObjectKey::new(Some("apps"), "db");

        backoff.next(&web);
        backoff.next(&web);
        assert_eq!(backoff.next(&db), Duration::from_secs(1));

        backoff.reset(&web);
        assert_eq!(backoff.failures(&web), 0);
        assert_eq!(backoff.next(&web), Duration::from_secs(1));
        assert_eq!(backoff.failures(&db), 1);
    }
}

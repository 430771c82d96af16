use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

pub const MAX_FAILED_ATTEMPTS: u32 = 5;
pub const ATTEMPT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
struct AttemptWindow {
    failures: u32,
    started_at: Instant,
}

impl AttemptWindow {
    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.started_at) >= window
    }
}

/// Fixed-window counter of failed credential checks, keyed by client IP.
///
/// Windows start at the first failure and never slide; once `window` has
/// elapsed the key is evaluated fresh. State lives in this process only.
#[derive(Clone)]
pub struct AttemptLimiter {
    windows: Arc<Mutex<HashMap<String, AttemptWindow>>>,
    max_failures: u32,
    window: Duration,
}

impl Default for AttemptLimiter {
    fn default() -> Self {
        Self::new(MAX_FAILED_ATTEMPTS, ATTEMPT_WINDOW)
    }
}

impl AttemptLimiter {
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_failures,
            window,
        }
    }

    /// True when `key` has used up its failures for the current window.
    pub fn is_blocked(&self, key: &str, now: Instant) -> bool {
        let windows = self.lock();
        match windows.get(key) {
            Some(entry) if !entry.expired(now, self.window) => entry.failures >= self.max_failures,
            _ => false,
        }
    }

    /// Records one failure and returns the failure count of the active window.
    pub fn record_failure(&self, key: &str, now: Instant) -> u32 {
        let mut windows = self.lock();
        let entry = windows
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expired(now, self.window) {
                    *entry = AttemptWindow {
                        failures: 0,
                        started_at: now,
                    };
                }
            })
            .or_insert(AttemptWindow {
                failures: 0,
                started_at: now,
            });
        entry.failures = entry.failures.saturating_add(1);
        entry.failures
    }

    pub fn clear(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Drops every window that has already expired. Returns how many were removed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, entry| !entry.expired(now, self.window));
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AttemptWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_failures_within_window() {
        let limiter = AttemptLimiter::default();
        let start = Instant::now();

        for attempt in 1..=MAX_FAILED_ATTEMPTS {
            assert!(!limiter.is_blocked("10.0.0.1", start));
            assert_eq!(limiter.record_failure("10.0.0.1", start), attempt);
        }

        assert!(limiter.is_blocked("10.0.0.1", start + Duration::from_secs(60)));
        assert!(!limiter.is_blocked("10.0.0.2", start));
    }

    #[test]
    fn window_resets_after_it_elapses() {
        let limiter = AttemptLimiter::default();
        let start = Instant::now();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            limiter.record_failure("10.0.0.1", start);
        }

        let later = start + ATTEMPT_WINDOW;
        assert!(!limiter.is_blocked("10.0.0.1", later));
        assert_eq!(limiter.record_failure("10.0.0.1", later), 1);
        assert!(!limiter.is_blocked("10.0.0.1", later));
    }

    #[test]
    fn window_is_fixed_from_first_failure() {
        let limiter = AttemptLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();
        limiter.record_failure("ip", start);
        limiter.record_failure("ip", start + Duration::from_secs(9));
        assert!(limiter.is_blocked("ip", start + Duration::from_secs(9)));
        assert!(!limiter.is_blocked("ip", start + Duration::from_secs(10)));
    }

    #[test]
    fn clear_forgets_failures() {
        let limiter = AttemptLimiter::default();
        let now = Instant::now();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            limiter.record_failure("ip", now);
        }
        limiter.clear("ip");
        assert!(!limiter.is_blocked("ip", now));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn prune_removes_only_expired_windows() {
        let limiter = AttemptLimiter::new(5, Duration::from_secs(30));
        let start = Instant::now();
        limiter.record_failure("old", start);
        limiter.record_failure("fresh", start + Duration::from_secs(20));

        let removed = limiter.prune(start + Duration::from_secs(31));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}

//! Fixed-window rate limiter for per-source request budgets.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::time::{Duration, Instant};

/// Requests allowed per window for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateBudget {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Permit,
    Deny { retry_after: Duration },
}

impl RateDecision {
    pub fn is_permit(&self) -> bool {
        matches!(self, RateDecision::Permit)
    }
}

/// Rate limit status for a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub used: u32,
    pub remaining: u32,
    pub resets_in_ms: u64,
}

#[derive(Debug)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Per-source request windows.
///
/// Each source has an independent window `(count, resets_at)`. The budget is
/// passed on every call so configuration changes take effect on the next
/// check without rebuilding the limiter.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and consume one request from `source`'s budget.
    ///
    /// A denied attempt does not count against the window.
    pub fn allow(&self, source: &str, budget: &RateBudget) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        match windows.get_mut(source) {
            Some(window) if now < window.resets_at => {
                if window.count < budget.max_requests {
                    window.count += 1;
                    RateDecision::Permit
                } else {
                    RateDecision::Deny {
                        retry_after: window.resets_at - now,
                    }
                }
            }
            _ => {
                if budget.max_requests == 0 {
                    return RateDecision::Deny {
                        retry_after: budget.window,
                    };
                }
                windows.insert(
                    source.to_string(),
                    Window {
                        count: 1,
                        resets_at: now + budget.window,
                    },
                );
                RateDecision::Permit
            }
        }
    }

    /// Current usage for `source` under `budget`.
    pub fn status(&self, source: &str, budget: &RateBudget) -> RateLimitStatus {
        let now = Instant::now();
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        match windows.get(source) {
            Some(window) if now < window.resets_at => RateLimitStatus {
                used: window.count,
                remaining: budget.max_requests.saturating_sub(window.count),
                resets_in_ms: (window.resets_at - now).as_millis() as u64,
            },
            _ => RateLimitStatus {
                used: 0,
                remaining: budget.max_requests,
                resets_in_ms: 0,
            },
        }
    }

    /// Forget a source's window.
    pub fn reset(&self, source: &str) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn budget(n: u32) -> RateBudget {
        RateBudget::new(n, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_n_plus_one_yields_one_denial() {
        let limiter = RateLimiter::new();
        let b = budget(5);

        let decisions: Vec<_> = (0..6).map(|_| limiter.allow("src", &b)).collect();
        let denials = decisions.iter().filter(|d| !d.is_permit()).count();

        assert_eq!(denials, 1);
        assert!(!decisions[5].is_permit());
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let limiter = RateLimiter::new();
        let b = budget(1);
        assert!(limiter.allow("a", &b).is_permit());
        assert!(!limiter.allow("a", &b).is_permit());
        assert!(limiter.allow("b", &b).is_permit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_expiry() {
        let limiter = RateLimiter::new();
        let b = budget(2);
        assert!(limiter.allow("src", &b).is_permit());
        assert!(limiter.allow("src", &b).is_permit());

        match limiter.allow("src", &b) {
            RateDecision::Deny { retry_after } => {
                assert!(retry_after <= Duration::from_secs(60));
                assert!(retry_after > Duration::from_secs(59));
            }
            RateDecision::Permit => panic!("Expected denial"),
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow("src", &b).is_permit());
        assert_eq!(limiter.status("src", &b).used, 1);
    }

    #[tokio::test]
    async fn test_denial_does_not_consume() {
        let limiter = RateLimiter::new();
        let b = budget(1);
        limiter.allow("src", &b);
        limiter.allow("src", &b);
        limiter.allow("src", &b);
        assert_eq!(limiter.status("src", &b).used, 1);
        assert_eq!(limiter.status("src", &b).remaining, 0);
    }

    #[tokio::test]
    async fn test_budget_change_applies_to_open_window() {
        let limiter = RateLimiter::new();
        assert!(limiter.allow("src", &budget(1)).is_permit());
        assert!(!limiter.allow("src", &budget(1)).is_permit());
        assert!(limiter.allow("src", &budget(3)).is_permit());
    }

    #[tokio::test]
    async fn test_zero_budget_always_denies() {
        let limiter = RateLimiter::new();
        assert!(!limiter.allow("src", &budget(0)).is_permit());
        assert_eq!(limiter.status("src", &budget(0)).used, 0);
    }

    #[tokio::test]
    async fn test_reset_and_status() {
        let limiter = RateLimiter::new();
        let b = budget(3);
        assert_eq!(limiter.status("src", &b).remaining, 3);
        limiter.allow("src", &b);
        assert_eq!(limiter.status("src", &b).remaining, 2);
        limiter.reset("src");
        assert_eq!(limiter.status("src", &b).used, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new());
        let b = budget(10);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.allow("src", &b) }));
        }

        let mut permits = 0;
        for h in handles {
            if h.await.unwrap().is_permit() {
                permits += 1;
            }
        }
        assert_eq!(permits, 10);
    }
}

//! Failed-decryption throttling.
//!
//! Attempts are kept per resolved target path for `window`. Once
//! `max_attempts` failures sit inside the window, further attempts are
//! refused until `lockout` has passed since the most recent one.
//!
//! State is in-memory and per service instance; it does not survive a
//! restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sealbox_core::config::RateLimitConfig;
use sealbox_core::SealError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Locked { remaining: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allowed)
    }

    /// `Err(RateLimited)` when locked, with the wait rounded up to whole seconds.
    pub fn into_result(self) -> Result<(), SealError> {
        match self {
            RateDecision::Allowed => Ok(()),
            RateDecision::Locked { remaining } => Err(SealError::RateLimited {
                remaining_secs: ceil_secs(remaining),
            }),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[derive(Debug)]
pub struct RateLimiter {
    max_attempts: usize,
    lockout: Duration,
    window: Duration,
    attempts: HashMap<PathBuf, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            lockout: Duration::from_secs(config.lockout_secs),
            window: Duration::from_secs(config.window_secs),
            attempts: HashMap::new(),
        }
    }

    pub fn check(&mut self, target: &Path) -> RateDecision {
        self.check_at(target, Instant::now())
    }

    pub fn record_failure(&mut self, target: &Path) {
        self.record_failure_at(target, Instant::now());
    }

    pub fn clear(&mut self, target: &Path) {
        self.attempts.remove(&key(target));
    }

    fn check_at(&mut self, target: &Path, now: Instant) -> RateDecision {
        let key = key(target);
        let Some(attempts) = self.attempts.get_mut(&key) else {
            return RateDecision::Allowed;
        };

        let window = self.window;
        attempts.retain(|t| now.saturating_duration_since(*t) < window);
        if attempts.is_empty() {
            self.attempts.remove(&key);
            return RateDecision::Allowed;
        }

        if attempts.len() >= self.max_attempts {
            if let Some(latest) = attempts.iter().max() {
                let since = now.saturating_duration_since(*latest);
                if let Some(remaining) = self.lockout.checked_sub(since).filter(|r| !r.is_zero()) {
                    tracing::warn!(
                        file = %key.display(),
                        attempts = attempts.len(),
                        remaining_secs = ceil_secs(remaining),
                        "decryption rate limited"
                    );
                    return RateDecision::Locked { remaining };
                }
            }
        }
        RateDecision::Allowed
    }

    fn record_failure_at(&mut self, target: &Path, now: Instant) {
        self.attempts.entry(key(target)).or_default().push(now);
    }
}

/// Resolved form of the target so aliases share one attempt record.
fn key(target: &Path) -> PathBuf {
    target.canonicalize().unwrap_or_else(|_| target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig::default())
    }

    #[test]
    fn test_fresh_target_allowed() {
        assert_eq!(limiter().check(Path::new("/tmp/x.age")), RateDecision::Allowed);
    }

    #[test]
    fn test_three_failures_lock_out() {
        let mut rl = limiter();
        let target = Path::new("/nonexistent/secret.age");
        let t0 = Instant::now();
        for i in 0..3 {
            rl.record_failure_at(target, t0 + Duration::from_secs(i));
        }

        match rl.check_at(target, t0 + Duration::from_secs(5)) {
            RateDecision::Locked { remaining } => {
                assert_eq!(remaining, Duration::from_secs(27));
            }
            other => panic!("expected lockout, got {other:?}"),
        }
        // lockout counts from the latest attempt (t0 + 2s)
        assert!(rl.check_at(target, t0 + Duration::from_secs(32)).is_allowed());
    }

    #[test]
    fn test_two_failures_still_allowed() {
        let mut rl = limiter();
        let target = Path::new("/nonexistent/secret.age");
        let t0 = Instant::now();
        rl.record_failure_at(target, t0);
        rl.record_failure_at(target, t0);
        assert!(rl.check_at(target, t0 + Duration::from_secs(1)).is_allowed());
    }

    #[test]
    fn test_old_attempts_pruned() {
        let mut rl = limiter();
        let target = Path::new("/nonexistent/secret.age");
        let t0 = Instant::now();
        for _ in 0..3 {
            rl.record_failure_at(target, t0);
        }
        assert!(rl.check_at(target, t0 + Duration::from_secs(301)).is_allowed());
        assert!(rl.attempts.is_empty());
    }

    #[test]
    fn test_clear_resets() {
        let mut rl = limiter();
        let target = Path::new("/nonexistent/secret.age");
        for _ in 0..3 {
            rl.record_failure(target);
        }
        assert!(!rl.check(target).is_allowed());
        rl.clear(target);
        assert!(rl.check(target).is_allowed());
    }

    #[test]
    fn test_targets_are_independent() {
        let mut rl = limiter();
        for _ in 0..3 {
            rl.record_failure(Path::new("/nonexistent/a.age"));
        }
        assert!(!rl.check(Path::new("/nonexistent/a.age")).is_allowed());
        assert!(rl.check(Path::new("/nonexistent/b.age")).is_allowed());
    }

    #[test]
    fn test_locked_maps_to_rate_limited() {
        let decision = RateDecision::Locked {
            remaining: Duration::from_millis(12_300),
        };
        match decision.into_result() {
            Err(SealError::RateLimited { remaining_secs }) => assert_eq!(remaining_secs, 13),
            other => panic!("unexpected {other:?}"),
        }
    }
}

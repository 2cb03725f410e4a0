// src/backoff.rs - Shared retry/backoff policy
//
// Slicing retries, poll-error delays and snapshot retries all share this
// one policy; only the (base, cap, max_attempts) tuning differs per call
// site, so divergent retry semantics cannot creep in.

use std::future::Future;
use std::time::Duration;

/// Exponential backoff with a hard cap.
///
/// `delay_for(n)` = min(base * multiplier^(n-1), cap) for attempt n >= 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: f64, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            multiplier,
            cap,
            max_attempts,
        }
    }

    /// Delay before the given attempt. Attempt numbering starts at 1;
    /// an attempt of 0 is treated as 1 so callers can pass a raw retry
    /// counter without an off-by-one dance.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let factor = self.multiplier.powi(attempt as i32 - 1);
        let delay = self.base.as_secs_f64() * factor;
        if delay >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// True once the attempt counter has used up the configured budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            multiplier: 2.0,
            cap: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

/// Runs a fallible async operation under the policy, sleeping the policy
/// delay between attempts. Used for one-shot retrying calls (camera
/// snapshots, artifact downloads); the slicing queue drives its own
/// retries through the persisted job instead.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if policy.is_exhausted(attempt) => {
                tracing::warn!("{} failed permanently after {} attempts: {}", what, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what,
                    attempt,
                    policy.max_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), 2.0, Duration::from_secs(10), 5);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[test]
    fn delay_is_monotone() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), 1.7, Duration::from_secs(30), 8);
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let d = policy.delay_for(attempt);
            assert!(d >= previous, "delay shrank at attempt {attempt}");
            assert!(d <= Duration::from_secs(30));
            previous = d;
        }
    }

    #[test]
    fn attempt_zero_is_treated_as_one() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(0), policy.delay_for(1));
    }

    #[test]
    fn exhaustion() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(8), 3);
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[tokio::test]
    async fn with_backoff_gives_up_after_max_attempts() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(4), 3);
        let mut calls = 0u32;
        let result: Result<(), String> = with_backoff(&policy, "always-fails", || {
            calls += 1;
            async move { Err("boom".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn with_backoff_stops_on_first_success() {
        let policy = BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(4), 5);
        let mut calls = 0u32;
        let result: Result<u32, String> = with_backoff(&policy, "flaky", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 { Err("not yet".to_string()) } else { Ok(n) }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }
}

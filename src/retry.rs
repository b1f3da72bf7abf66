//! Bounded retry loops with an injectable sleeper.
//!
//! Readiness checks and filesystem-settle waits all boil down to "poll this
//! condition every N milliseconds, for at most M seconds". This module
//! centralizes that loop so the bound is explicit and so tests can swap the
//! real clock out for a no-op sleeper and run deterministically.

use async_trait::async_trait;
use std::time::Duration;

/// Something that can pause the current task.
///
/// Production code uses [`TokioSleeper`]; unit tests inject a sleeper that
/// returns immediately so polling loops complete without wall-clock delays.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// The default sleeper, backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A bounded polling policy: try every `interval` for at most `max_wait`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total time budget for the poll.
    pub max_wait: Duration,
    /// Pause between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Create a policy from a total budget and a per-attempt interval.
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait, interval }
    }

    /// Number of attempts this policy allows, always at least one.
    pub fn attempts(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let attempts = self.max_wait.as_millis() / interval;
        (attempts as u32).max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(10),
            interval: Duration::from_millis(100),
        }
    }
}

/// Poll `op` under `policy` until it yields `Some`, sleeping between
/// attempts via `sleeper`.
///
/// Returns `None` when every attempt came up empty. The operation itself is
/// responsible for being cheap; the bound here is on attempt count, derived
/// from the policy, so a mock sleeper still terminates.
pub async fn poll_until<T, F, Fut>(policy: &RetryPolicy, sleeper: &dyn Sleeper, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let attempts = policy.attempts();
    for attempt in 0..attempts {
        if let Some(value) = op().await {
            return Some(value);
        }
        // No sleep after the final attempt
        if attempt + 1 < attempts {
            sleeper.sleep(policy.interval).await;
        }
    }
    None
}

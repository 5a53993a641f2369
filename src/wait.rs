//! Bounded polling for conditions that become true out of band
//!
//! The backend provisions volumes asynchronously; the only signal that a
//! volume is ready is its directory showing up under the mount root. This
//! module polls for such a condition with a fixed interval and gives up
//! after a deadline. Dropping the returned future cancels the wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// How often and how long to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl WaitPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Upper bound on the number of times the condition is evaluated
    pub fn max_checks(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let polls = self.timeout.as_nanos() / self.interval.as_nanos();
        u32::try_from(polls).unwrap_or(u32::MAX).saturating_add(1)
    }
}

/// The condition did not hold before the deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("condition not met after {checks} checks in {waited:?}")]
pub struct WaitTimedOut {
    pub checks: u32,
    pub waited: Duration,
}

/// Poll `check` until it returns true.
///
/// The condition is evaluated immediately, then once per `policy.interval`,
/// at most `policy.max_checks()` times and never after `policy.timeout` has
/// elapsed. Returns the number of checks it took.
pub async fn wait_until<F, Fut>(policy: WaitPolicy, mut check: F) -> Result<u32, WaitTimedOut>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    // No representable deadline means only `max_checks` bounds the wait
    let deadline = started.checked_add(policy.timeout);
    let max_checks = policy.max_checks();
    let mut checks = 0u32;

    loop {
        checks += 1;
        if check().await {
            return Ok(checks);
        }

        let now = Instant::now();
        let past_deadline = match (deadline, now.checked_add(policy.interval)) {
            (Some(deadline), Some(next)) => next > deadline,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if checks >= max_checks || past_deadline {
            return Err(WaitTimedOut {
                checks,
                waited: now - started,
            });
        }

        trace!(checks, "condition not met, sleeping {:?}", policy.interval);
        tokio::time::sleep(policy.interval).await;
    }
}

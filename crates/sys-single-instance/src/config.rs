//! Retry bounds for the polling loops.
//!
//! These fix the worst-case latency of a second start: a publisher waits at
//! most `lock.budget() + consume.budget()` before giving up on the handoff.

use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Upper bound on the time spent sleeping: there is no pause after the
    /// last attempt.
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }

    /// Calls `step` up to `attempts` times, sleeping between tries,
    /// until it yields `Some`.
    pub(crate) fn poll<T, E>(
        &self,
        mut step: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        for attempt in 0..self.attempts {
            if let Some(value) = step()? {
                return Ok(Some(value));
            }
            if attempt + 1 < self.attempts {
                thread::sleep(self.interval);
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Acquiring the handoff writer lock.
    pub lock: RetryPolicy,
    /// Waiting for the owner to consume a published payload.
    pub consume: RetryPolicy,
    /// Stale-claim removals tolerated in one `acquire` before giving up.
    pub reclaim_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            lock: RetryPolicy::new(10, Duration::from_millis(100)),
            consume: RetryPolicy::new(20, Duration::from_millis(50)),
            reclaim_attempts: 5,
        }
    }
}

// Licensed under the Apache-2.0 license

use core::time::Duration;

/// A oneshot timer driven by the caller's monotonic clock.
///
/// The timer owns no thread or interrupt. The event loop passes the current
/// uptime to `poll()`, which reports the expiry exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneShotTimer {
    deadline: Option<Duration>,
}

impl OneShotTimer {
    /// Creates a new `OneShotTimer` instance.
    ///
    /// The timer starts in an idle state and must be scheduled using `schedule()`.
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Arms the timer to fire `after` from `now`.
    ///
    /// If the timer is already armed, the previous deadline is **replaced**.
    ///
    /// # Parameters
    /// - `now`: Current uptime.
    /// - `after`: Delay until expiry.
    pub fn schedule(&mut self, now: Duration, after: Duration) {
        self.deadline = Some(now.saturating_add(after));
    }

    /// Cancels the timer, if armed.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left until expiry, `None` when idle.
    pub fn remaining(&self, now: Duration) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_sub(now))
    }

    /// Returns `true` once when `now` has reached the deadline, then goes
    /// idle.
    pub fn poll(&mut self, now: Duration) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

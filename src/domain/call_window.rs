//! Report submission window per membership.
//!
//! A report is accepted only when at least [`COOLDOWN_SECS`] have elapsed
//! since the last accepted one *and* the elapsed time falls inside the first
//! [`ACCEPTANCE_SLOT_SECS`] seconds of a cooldown period. The second rule
//! opens a short recurring slot after every 12-second boundary rather than
//! leaving the endpoint open once the cooldown has passed.

/// Minimum number of seconds between two accepted reports.
pub const COOLDOWN_SECS: i64 = 12;

/// Width of the recurring acceptance slot, in seconds past a boundary.
pub const ACCEPTANCE_SLOT_SECS: i64 = 2;

/// Reason a report was refused by the [`CallWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// The cooldown since the last report has not elapsed.
    #[error("Too many requests")]
    TooManyRequests,
    /// The cooldown elapsed but the current acceptance slot has closed.
    #[error("Window passed")]
    WindowPassed,
}

/// Cooldown policy applied before report ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallWindow {
    cooldown_secs: i64,
    slot_secs: i64,
}

impl CallWindow {
    /// Creates a window with a custom cooldown and slot width.
    ///
    /// A non-positive cooldown is clamped to one second.
    #[must_use]
    pub fn new(cooldown_secs: i64, slot_secs: i64) -> Self {
        Self {
            cooldown_secs: cooldown_secs.max(1),
            slot_secs,
        }
    }

    /// Decides whether a report may be accepted at `now`, given the
    /// `last_call` timestamp of the membership (both Unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::TooManyRequests`] inside the cooldown and
    /// [`RateLimitError::WindowPassed`] outside the acceptance slot.
    pub fn check(&self, last_call: i64, now: i64) -> Result<(), RateLimitError> {
        let elapsed = now.saturating_sub(last_call);
        if elapsed < self.cooldown_secs {
            return Err(RateLimitError::TooManyRequests);
        }
        if elapsed % self.cooldown_secs > self.slot_secs {
            return Err(RateLimitError::WindowPassed);
        }
        Ok(())
    }
}

impl Default for CallWindow {
    fn default() -> Self {
        Self::new(COOLDOWN_SECS, ACCEPTANCE_SLOT_SECS)
    }
}

//! The recovery ladder for forum exchanges.
//!
//! Failed exchanges are retried at escalating levels of desperation:
//! first with a fresh security token, then after a full re-login, and
//! after that the failure is surfaced as terminal. The ladder is a
//! small explicit state machine so the policy is testable in isolation
//! and retrying never recurses.

/// What to do before re-attempting a failed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Refresh the lightweight security token and retry.
    RefreshToken,
    /// Perform a full re-login and retry.
    Relogin,
    /// Stop retrying; surface a terminal transfer error.
    GiveUp,
}

/// Tracks how desperate we are about one logical operation.
#[derive(Debug, Default)]
pub struct RetryLadder {
    failures: u8,
}

impl RetryLadder {
    /// A fresh ladder; the operation has not failed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { failures: 0 }
    }

    /// Records a failure and returns the recovery to apply before the
    /// next attempt.
    pub const fn next_recovery(&mut self) -> Recovery {
        let recovery = match self.failures {
            0 => Recovery::RefreshToken,
            1 => Recovery::Relogin,
            _ => Recovery::GiveUp,
        };
        self.failures = self.failures.saturating_add(1);
        recovery
    }

    /// Number of failures recorded so far.
    #[must_use]
    pub const fn failures(&self) -> u8 {
        self.failures
    }
}

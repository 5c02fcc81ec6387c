//! Attempt limits with cooldown, shared by login and every dataset kind.
//!
//! # Tracker States
//!
//! ```text
//! READY (attempts < max) --[max consecutive failures]--> HALTED (rejecting)
//!   ^                                                        |
//!   +----------[success, cooldown elapsed, or reset]---------+
//! ```
//!
//! Unlike a circuit breaker there is no probing state: once the cooldown
//! elapses the counter is zeroed and the operation gets a full budget again.
//! The transition is lazy and happens on the next [`AttemptTracker::maybe_heal`].

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// Retry ceiling and cooldown for one kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of consecutive failures before the operation is halted.
    pub max_attempts: u32,

    /// Time after the halt before the counter self-resets.
    pub cooldown: TimeDelta,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: TimeDelta::hours(6),
        }
    }
}

/// Current state of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Attempts are allowed.
    Ready,
    /// The retry ceiling was hit; attempts are rejected until cooldown.
    Halted,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptState::Ready => write!(f, "ready"),
            AttemptState::Halted => write!(f, "halted"),
        }
    }
}

/// Consecutive-failure counter plus the time the ceiling was hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptTracker {
    pub attempts: u32,
    pub halted_at: Option<DateTime<Utc>>,
}

impl AttemptTracker {
    pub fn state(&self, policy: &RetryPolicy) -> AttemptState {
        if self.attempts >= policy.max_attempts {
            AttemptState::Halted
        } else {
            AttemptState::Ready
        }
    }

    pub fn is_halted(&self, policy: &RetryPolicy) -> bool {
        self.state(policy) == AttemptState::Halted
    }

    /// Zeroes the counter if the cooldown since the halt has elapsed.
    ///
    /// Returns true if the tracker was healed.
    pub fn maybe_heal(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
        match self.halted_at {
            Some(halted_at) if now >= halted_at + policy.cooldown => {
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Records the halt time unless one is already recorded.
    pub fn mark_halted(&mut self, now: DateTime<Utc>) {
        self.halted_at.get_or_insert(now);
    }

    /// Counts one failure. Returns true if this failure hit the ceiling.
    pub fn record_failure(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= policy.max_attempts && self.halted_at.is_none() {
            self.halted_at = Some(now);
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.halted_at = None;
    }

    /// When the halt will self-heal, if halted.
    pub fn retry_at(&self, policy: &RetryPolicy) -> Option<DateTime<Utc>> {
        self.halted_at.map(|t| t + policy.cooldown)
    }
}

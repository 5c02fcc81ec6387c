use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{DatasetKind, SessionState};
use crate::policy::{AttemptTracker, RetryPolicy};

/// Process-wide operational state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    pub logged_in: bool,
    pub online: bool,
    /// Last error message; cleared on the next success.
    pub errors: Option<String>,
    /// Description of the most recent state-changing operation.
    pub last_action: String,
    pub session_state: SessionState,
    pub login: AttemptTracker,
    pub scrape: BTreeMap<DatasetKind, AttemptTracker>,
}

impl Status {
    /// Fresh status with a zeroed scrape counter for each kind.
    pub fn new(kinds: &[DatasetKind]) -> Self {
        Self {
            scrape: kinds
                .iter()
                .map(|&k| (k, AttemptTracker::default()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn login_attempts(&self) -> u32 {
        self.login.attempts
    }

    pub fn scrape_attempts(&self, kind: DatasetKind) -> u32 {
        self.scrape.get(&kind).map_or(0, |t| t.attempts)
    }

    pub fn scrape_tracker_mut(&mut self, kind: DatasetKind) -> &mut AttemptTracker {
        self.scrape.entry(kind).or_default()
    }

    /// Most recent active halt timestamp across login and every dataset kind.
    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        std::iter::once(&self.login)
            .chain(self.scrape.values())
            .filter_map(|t| t.halted_at)
            .max()
    }

    /// Names of the operations currently halted ("login", "gps", "alarm").
    pub fn halted(&self) -> Vec<String> {
        let mut halted = Vec::new();
        if self.login.halted_at.is_some() {
            halted.push("login".to_string());
        }
        for (kind, tracker) in &self.scrape {
            if tracker.halted_at.is_some() {
                halted.push(kind.to_string());
            }
        }
        halted
    }

    /// When each halted operation will self-heal, keyed like [`Status::halted`].
    pub fn retry_times(
        &self,
        login_policy: &RetryPolicy,
        scrape_policy: &RetryPolicy,
    ) -> BTreeMap<String, DateTime<Utc>> {
        let login = self
            .login
            .retry_at(login_policy)
            .map(|at| ("login".to_string(), at));
        let scrape = self
            .scrape
            .iter()
            .filter_map(|(kind, t)| t.retry_at(scrape_policy).map(|at| (kind.to_string(), at)));
        login.into_iter().chain(scrape).collect()
    }

    pub fn record_action(&mut self, action: impl Into<String>) {
        self.last_action = action.into();
    }

    /// Resets every tracker whose cooldown has elapsed.
    ///
    /// Returns the names of the operations that were healed.
    pub fn heal(
        &mut self,
        login_policy: &RetryPolicy,
        scrape_policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut healed = Vec::new();
        if self.login.maybe_heal(login_policy, now) {
            healed.push("login".to_string());
            if self.session_state == SessionState::Halted {
                self.session_state = SessionState::LoggedOut;
            }
        }
        for (kind, tracker) in self.scrape.iter_mut() {
            if tracker.maybe_heal(scrape_policy, now) {
                healed.push(kind.to_string());
            }
        }
        healed
    }

    /// Clears every counter and halt timestamp.
    pub fn clear_attempts(&mut self) {
        self.login.reset();
        for tracker in self.scrape.values_mut() {
            tracker.reset();
        }
        if self.session_state == SessionState::Halted {
            self.session_state = SessionState::LoggedOut;
        }
    }
}

/// Synchronized holder for [`Status`].
///
/// Every mutation goes through [`StatusStore::update`], which applies the
/// whole closure under one write lock, so readers never observe a
/// partially-applied batch of field changes.
#[derive(Debug, Clone)]
pub struct StatusStore {
    inner: Arc<RwLock<Status>>,
}

impl StatusStore {
    pub fn new(status: Status) -> Self {
        Self {
            inner: Arc::new(RwLock::new(status)),
        }
    }

    /// Consistent point-in-time copy.
    pub fn read(&self) -> Status {
        self.read_inner().clone()
    }

    /// Atomically applies `mutator` to the status and returns its result.
    pub fn update<R>(&self, mutator: impl FnOnce(&mut Status) -> R) -> R {
        let mut status = self.write_inner();
        mutator(&mut status)
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Status> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned status lock");
            poisoned.into_inner()
        })
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Status> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned status lock");
            poisoned.into_inner()
        })
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(Status::new(&DatasetKind::ALL))
    }
}

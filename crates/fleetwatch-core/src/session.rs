use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Settings;
use crate::error::AppError;
use crate::models::SessionState;
use crate::policy::RetryPolicy;
use crate::status::StatusStore;
use crate::traits::{Credentials, RemoteSession};

struct ActiveSession<H> {
    handle: H,
    id: Uuid,
    established_at: DateTime<Utc>,
}

/// Owns the single remote session handle and the login retry budget.
///
/// Not synchronized on its own: the orchestrator keeps it behind the op lock.
pub struct SessionManager<R: RemoteSession> {
    remote: R,
    credentials: Credentials,
    policy: RetryPolicy,
    max_age: TimeDelta,
    timeout: Duration,
    status: StatusStore,
    clock: Arc<dyn Clock>,
    active: Option<ActiveSession<R::Handle>>,
}

impl<R: RemoteSession> SessionManager<R> {
    pub fn new(remote: R, settings: &Settings, status: StatusStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            credentials: settings.credentials(),
            policy: settings.login_policy(),
            max_age: settings.session_max_age(),
            timeout: settings.login_timeout(),
            status,
            clock,
            active: None,
        }
    }

    /// Returns a live handle, logging in first if needed.
    ///
    /// A fresh handle is returned without contacting the remote site. Otherwise
    /// the previous handle is released and one authentication attempt is made,
    /// unless the login budget is exhausted.
    pub async fn ensure_session(&mut self) -> Result<&R::Handle, AppError> {
        let now = self.clock.now();
        let policy = self.policy;
        self.status.update(|s| {
            if s.login.maybe_heal(&policy, now) {
                tracing::info!("Login cooldown elapsed, attempts reset");
                if s.session_state == SessionState::Halted {
                    s.session_state = SessionState::LoggedOut;
                }
            }
        });

        if !self.is_fresh(now) {
            self.establish().await?;
        }

        match self.active.as_ref() {
            Some(active) => Ok(&active.handle),
            None => Err(AppError::TransportError("session unavailable".into())),
        }
    }

    /// Whether a live handle is currently held.
    pub fn has_session(&self) -> bool {
        self.active.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Drops the current handle after a failure that makes it untrustworthy.
    pub async fn invalidate(&mut self) {
        if self.release_active().await {
            self.status.update(|s| {
                s.logged_in = false;
                s.session_state = SessionState::LoggedOut;
                s.record_action("Session invalidated");
            });
        }
    }

    /// Releases the handle for shutdown.
    pub async fn release(&mut self) {
        if self.release_active().await {
            self.status.update(|s| {
                s.logged_in = false;
                s.session_state = SessionState::LoggedOut;
                s.record_action("Session released");
            });
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match &self.active {
            Some(active) if now - active.established_at < self.max_age => true,
            Some(active) => {
                tracing::info!(session_id = %active.id, "Session expired, re-authenticating");
                false
            }
            None => false,
        }
    }

    async fn establish(&mut self) -> Result<(), AppError> {
        let policy = self.policy;
        let now = self.clock.now();
        let halted = self.status.update(|s| {
            if s.login.is_halted(&policy) {
                s.login.mark_halted(now);
                s.logged_in = false;
                s.session_state = SessionState::Halted;
                s.errors = Some(AppError::MaxLoginAttemptsExceeded.to_string());
                s.record_action("Login halted due to failures");
                true
            } else {
                s.session_state = SessionState::Authenticating;
                false
            }
        });
        if halted {
            tracing::warn!("Max login attempts reached, login halted");
            self.release_active().await;
            return Err(AppError::MaxLoginAttemptsExceeded);
        }

        self.release_active().await;

        let result = match tokio::time::timeout(
            self.timeout,
            self.remote.authenticate(&self.credentials),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        };
        let finished_at = self.clock.now();

        match result {
            Ok(handle) => {
                let id = Uuid::new_v4();
                self.status.update(|s| {
                    s.logged_in = true;
                    s.online = true;
                    s.errors = None;
                    s.login.record_success();
                    s.session_state = SessionState::LoggedIn;
                    s.record_action("Login successful");
                });
                tracing::info!(session_id = %id, "Login successful");
                self.active = Some(ActiveSession {
                    handle,
                    id,
                    established_at: finished_at,
                });
                Ok(())
            }
            Err(e) => {
                let (attempts, newly_halted) = self.status.update(|s| {
                    let newly_halted = s.login.record_failure(&policy, finished_at);
                    s.logged_in = false;
                    s.online = !e.is_offline();
                    s.errors = Some(e.to_string());
                    s.session_state = if s.login.is_halted(&policy) {
                        SessionState::Halted
                    } else {
                        SessionState::LoggedOut
                    };
                    s.record_action("Login failed");
                    (s.login.attempts, newly_halted)
                });
                tracing::warn!(
                    error = %e,
                    attempts,
                    max_attempts = policy.max_attempts,
                    "Login failed"
                );
                if newly_halted {
                    tracing::warn!(cooldown = %policy.cooldown, "Login halted until cooldown elapses");
                }
                Err(e)
            }
        }
    }

    /// Releases the held handle, if any. Returns true if one was released.
    async fn release_active(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                tracing::debug!(session_id = %active.id, "Releasing session");
                self.remote.release(active.handle).await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ManualClock, MockRemoteSession, test_settings};

    fn manager(
        remote: &MockRemoteSession,
        clock: &ManualClock,
    ) -> (SessionManager<MockRemoteSession>, StatusStore) {
        let status = StatusStore::default();
        let manager = SessionManager::new(
            remote.clone(),
            &test_settings(),
            status.clone(),
            Arc::new(clock.clone()),
        );
        (manager, status)
    }

    fn rejected() -> Result<(), AppError> {
        Err(AppError::AuthenticationFailed("dashboard marker not found".into()))
    }

    #[tokio::test]
    async fn test_successful_login_updates_status() {
        let remote = MockRemoteSession::new();
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        let handle = manager.ensure_session().await.unwrap();
        assert_eq!(handle.id, 1);

        let s = status.read();
        assert!(s.logged_in);
        assert!(s.online);
        assert!(s.errors.is_none());
        assert_eq!(s.login_attempts(), 0);
        assert_eq!(s.last_action, "Login successful");
        assert_eq!(s.session_state, SessionState::LoggedIn);
        assert!(manager.session_id().is_some());
    }

    #[tokio::test]
    async fn test_fresh_session_is_reused() {
        let remote = MockRemoteSession::new();
        let clock = ManualClock::fixed();
        let (mut manager, _) = manager(&remote, &clock);

        manager.ensure_session().await.unwrap();
        clock.advance(TimeDelta::minutes(30));
        let handle = manager.ensure_session().await.unwrap();

        assert_eq!(handle.id, 1);
        assert_eq!(remote.auth_calls(), 1);
    }

    #[tokio::test]
    async fn test_expired_session_is_released_before_reauth() {
        let remote = MockRemoteSession::new();
        let clock = ManualClock::fixed();
        let (mut manager, _) = manager(&remote, &clock);

        manager.ensure_session().await.unwrap();
        clock.advance(TimeDelta::minutes(61));
        let handle = manager.ensure_session().await.unwrap();

        assert_eq!(handle.id, 2);
        assert_eq!(remote.auth_calls(), 2);
        assert_eq!(remote.released(), vec![1]);
    }

    #[tokio::test]
    async fn test_failures_below_ceiling_are_counted() {
        let remote = MockRemoteSession::new().with_auth_results(vec![rejected(), rejected()]);
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        for n in 1..=2 {
            let err = manager.ensure_session().await.unwrap_err();
            assert!(matches!(err, AppError::AuthenticationFailed(_)));

            let s = status.read();
            assert_eq!(s.login_attempts(), n);
            assert!(!s.logged_in);
            assert!(s.last_failure_time().is_none());
        }
        assert!(status.read().online);
        assert!(!manager.has_session());
    }

    #[tokio::test]
    async fn test_ceiling_halts_without_calling_remote() {
        let remote =
            MockRemoteSession::new().with_auth_results(vec![rejected(), rejected(), rejected()]);
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        for _ in 0..3 {
            manager.ensure_session().await.unwrap_err();
        }
        let s = status.read();
        assert_eq!(s.login_attempts(), 3);
        assert!(!s.logged_in);
        assert!(s.errors.is_some());
        assert_eq!(s.last_failure_time(), Some(clock.now()));
        assert_eq!(s.session_state, SessionState::Halted);

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, AppError::MaxLoginAttemptsExceeded));
        assert_eq!(remote.auth_calls(), 3);
        assert_eq!(
            status.read().errors.as_deref(),
            Some("Max login attempts reached")
        );
    }

    #[tokio::test]
    async fn test_cooldown_heals_and_retries() {
        let remote =
            MockRemoteSession::new().with_auth_results(vec![rejected(), rejected(), rejected()]);
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);
        for _ in 0..3 {
            manager.ensure_session().await.unwrap_err();
        }

        clock.advance(TimeDelta::hours(5));
        assert!(matches!(
            manager.ensure_session().await.unwrap_err(),
            AppError::MaxLoginAttemptsExceeded
        ));
        assert_eq!(remote.auth_calls(), 3);

        clock.advance(TimeDelta::hours(1));
        manager.ensure_session().await.unwrap();

        let s = status.read();
        assert_eq!(remote.auth_calls(), 4);
        assert_eq!(s.login_attempts(), 0);
        assert!(s.last_failure_time().is_none());
        assert!(s.logged_in);
    }

    #[tokio::test]
    async fn test_transport_failure_marks_offline() {
        let remote = MockRemoteSession::new()
            .with_auth_results(vec![Err(AppError::TransportError("chrome exited".into()))]);
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        manager.ensure_session().await.unwrap_err();

        let s = status.read();
        assert!(!s.online);
        assert_eq!(s.login_attempts(), 1);
        assert!(s.errors.unwrap().contains("chrome exited"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_rejection_is_reported_as_authentication_failure() {
        // Launch and form filling eat into the budget before the browser's own
        // navigation wait runs out and reports the rejection.
        let settings = test_settings();
        let remote = MockRemoteSession::new().with_auth_results(vec![rejected()]);
        remote.set_auth_delay(Some(settings.navigation_timeout() + Duration::from_secs(2)));
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        let err = manager.ensure_session().await.unwrap_err();

        assert!(matches!(err, AppError::AuthenticationFailed(_)), "got {err:?}");
        let s = status.read();
        assert!(s.online);
        assert_eq!(s.login_attempts(), 1);
        assert_eq!(s.last_action, "Login failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_timeout_is_counted_failure() {
        let settings = test_settings();
        let remote = MockRemoteSession::new();
        remote.set_auth_delay(Some(settings.login_timeout() + Duration::from_secs(1)));
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        let err = manager.ensure_session().await.unwrap_err();

        assert!(matches!(err, AppError::Timeout(100)), "got {err:?}");
        {
            let s = status.read();
            assert_eq!(s.login_attempts(), 1);
            assert!(!s.online);
            assert!(!s.logged_in);
            assert_eq!(
                s.errors.as_deref(),
                Some("Request timed out after 100 seconds")
            );
            assert_eq!(s.session_state, SessionState::LoggedOut);
        }
        assert!(!manager.has_session());

        remote.set_auth_delay(None);
        manager.ensure_session().await.unwrap();

        let s = status.read();
        assert_eq!(remote.auth_calls(), 2);
        assert_eq!(s.login_attempts(), 0);
        assert!(s.online);
        assert!(s.logged_in);
    }

    #[tokio::test]
    async fn test_success_after_failures_resets_counter() {
        let remote = MockRemoteSession::new().with_auth_results(vec![rejected(), rejected()]);
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        manager.ensure_session().await.unwrap_err();
        manager.ensure_session().await.unwrap_err();
        manager.ensure_session().await.unwrap();

        let s = status.read();
        assert_eq!(s.login_attempts(), 0);
        assert!(s.errors.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_releases_handle() {
        let remote = MockRemoteSession::new();
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        manager.ensure_session().await.unwrap();
        manager.invalidate().await;

        assert!(!manager.has_session());
        assert_eq!(remote.released(), vec![1]);
        assert!(!status.read().logged_in);
        assert_eq!(status.read().session_state, SessionState::LoggedOut);

        let handle = manager.ensure_session().await.unwrap();
        assert_eq!(handle.id, 2);
    }

    #[tokio::test]
    async fn test_release_without_session_is_noop() {
        let remote = MockRemoteSession::new();
        let clock = ManualClock::fixed();
        let (mut manager, status) = manager(&remote, &clock);

        manager.release().await;

        assert!(remote.released().is_empty());
        assert_eq!(status.read().last_action, "");
    }
}

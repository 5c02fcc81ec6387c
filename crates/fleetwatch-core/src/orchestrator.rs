//! Entry point tying session, scrape, cache and status together.
//!
//! Every use of the remote session handle goes through the op lock: the
//! periodic cycle and on-demand refreshes serialize on it, while status and
//! cache reads never take it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::cache::DataCache;
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::error::AppError;
use crate::models::{DatasetKind, Snapshot};
use crate::poller::{Poller, PollerHandle, PollerReporter};
use crate::policy::RetryPolicy;
use crate::scrape::{RefreshOutcome, ScrapeCoordinator};
use crate::session::SessionManager;
use crate::status::{Status, StatusStore};
use crate::traits::RemoteSession;

/// Result of one login + scrape cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Set when no session could be obtained; no dataset was attempted then.
    pub session_error: Option<AppError>,
    /// Per-kind outcome, in refresh order.
    pub outcomes: Vec<(DatasetKind, Result<RefreshOutcome, AppError>)>,
}

impl CycleReport {
    pub fn refreshed(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.refreshed()
    }

    pub fn is_success(&self) -> bool {
        self.session_error.is_none() && self.failed() == 0
    }
}

trait Engine: Send + Sync {
    fn run(&self, kinds: Vec<DatasetKind>) -> BoxFuture<'_, CycleReport>;
    fn release(&self) -> BoxFuture<'_, ()>;
}

struct EngineState<R: RemoteSession> {
    session: SessionManager<R>,
    scraper: ScrapeCoordinator<R>,
    status: StatusStore,
}

impl<R: RemoteSession> EngineState<R> {
    async fn run_cycle(&mut self, kinds: &[DatasetKind]) -> CycleReport {
        let handle = match self.session.ensure_session().await {
            Ok(handle) => handle,
            Err(e) => {
                return CycleReport {
                    session_error: Some(e),
                    outcomes: Vec::new(),
                };
            }
        };

        let mut outcomes = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let result = self.scraper.refresh(kind, handle).await;
            outcomes.push((kind, result));
        }

        // A later kind's success must not hide an earlier kind's failure.
        if let Some(e) = outcomes.iter().rev().find_map(|(_, r)| r.as_ref().err()) {
            let message = e.to_string();
            self.status.update(|s| s.errors = Some(message));
        }

        if outcomes
            .iter()
            .any(|(_, r)| r.as_ref().is_err_and(AppError::invalidates_session))
        {
            tracing::info!("Transport failure during scrape, dropping session");
            self.session.invalidate().await;
        }

        CycleReport {
            session_error: None,
            outcomes,
        }
    }
}

struct LockedEngine<R: RemoteSession> {
    state: Mutex<EngineState<R>>,
}

impl<R: RemoteSession> Engine for LockedEngine<R> {
    fn run(&self, kinds: Vec<DatasetKind>) -> BoxFuture<'_, CycleReport> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.run_cycle(&kinds).await
        })
    }

    fn release(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.session.release().await;
        })
    }
}

/// Shared handle to the session & scrape orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn Engine>,
    status: StatusStore,
    cache: DataCache,
    kinds: Arc<[DatasetKind]>,
    login_policy: RetryPolicy,
    scrape_policy: RetryPolicy,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new<R: RemoteSession>(remote: R, settings: &Settings) -> Self {
        Self::with_clock(remote, settings, Arc::new(SystemClock))
    }

    pub fn with_clock<R: RemoteSession>(
        remote: R,
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let kinds = settings.kinds();
        let status = StatusStore::new(Status::new(&kinds));
        let cache = DataCache::new();
        let session = SessionManager::new(remote.clone(), settings, status.clone(), clock.clone());
        let scraper = ScrapeCoordinator::new(
            remote,
            settings,
            status.clone(),
            cache.clone(),
            clock.clone(),
        );

        Self {
            engine: Arc::new(LockedEngine {
                state: Mutex::new(EngineState {
                    session,
                    scraper,
                    status: status.clone(),
                }),
            }),
            status,
            cache,
            kinds: kinds.into(),
            login_policy: settings.login_policy(),
            scrape_policy: settings.scrape_policy(),
            poll_interval: settings.poll_interval(),
            clock,
        }
    }

    /// Configured dataset kinds, in refresh order.
    pub fn kinds(&self) -> &[DatasetKind] {
        &self.kinds
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Point-in-time status. Expired halts are healed first.
    pub fn status(&self) -> Status {
        let now = self.clock.now();
        let (login_policy, scrape_policy) = (self.login_policy, self.scrape_policy);
        self.status.update(|s| {
            for name in s.heal(&login_policy, &scrape_policy, now) {
                tracing::info!(operation = %name, "Cooldown elapsed, attempts reset");
            }
            s.clone()
        })
    }

    /// When each halted operation in `status` will be retried.
    pub fn retry_times(&self, status: &Status) -> BTreeMap<String, DateTime<Utc>> {
        status.retry_times(&self.login_policy, &self.scrape_policy)
    }

    pub fn snapshot(&self, kind: DatasetKind) -> Option<Arc<Snapshot>> {
        self.cache.get(kind)
    }

    /// Whether scraping of `kind` is currently halted.
    pub fn scrape_halted(&self, kind: DatasetKind) -> bool {
        self.status()
            .scrape
            .get(&kind)
            .is_some_and(|t| t.is_halted(&self.scrape_policy))
    }

    /// Runs one login + scrape cycle over every configured kind.
    pub async fn run_cycle(&self) -> CycleReport {
        self.engine.run(self.kinds.to_vec()).await
    }

    /// Runs an on-demand cycle for one kind, or for all of them.
    pub async fn refresh(&self, kind: Option<DatasetKind>) -> Result<CycleReport, AppError> {
        let kinds = match kind {
            Some(kind) if self.kinds.contains(&kind) => vec![kind],
            Some(kind) => {
                return Err(AppError::InvalidInput(format!(
                    "dataset '{kind}' is not configured"
                )));
            }
            None => self.kinds.to_vec(),
        };
        Ok(self.engine.run(kinds).await)
    }

    /// Clears every attempt counter and halt timestamp.
    pub fn reset(&self) {
        self.status.update(|s| {
            s.clear_attempts();
            s.record_action("Attempt counters reset");
        });
        tracing::info!("Attempt counters reset");
    }

    /// Spawns the background poller.
    pub fn start<PR: PollerReporter + 'static>(&self, reporter: PR) -> PollerHandle {
        Poller::new(self.clone(), self.poll_interval).spawn(reporter)
    }

    /// Releases the remote session. Waits for an in-flight cycle to finish.
    pub async fn shutdown(&self) {
        self.engine.release().await;
    }
}

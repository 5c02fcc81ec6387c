use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::DataCache;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::AppError;
use crate::models::{DatasetKind, DatasetSchema, ParsedRows, Row, SessionState, Snapshot};
use crate::policy::RetryPolicy;
use crate::status::StatusStore;
use crate::traits::RemoteSession;

/// Summary of one successful dataset refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub kind: DatasetKind,
    /// Number of records now cached.
    pub records: usize,
    /// Rows dropped because they did not match the schema.
    pub dropped: usize,
    /// Whether the data differs from the previous snapshot.
    pub changed: bool,
}

/// Fetches dataset tables through a live session and publishes snapshots.
///
/// Each dataset kind has its own attempt tracker; failures of one kind never
/// touch the counter or cache entry of another.
pub struct ScrapeCoordinator<R: RemoteSession> {
    remote: R,
    schemas: Vec<DatasetSchema>,
    policy: RetryPolicy,
    timeout: Duration,
    status: StatusStore,
    cache: DataCache,
    clock: Arc<dyn Clock>,
}

impl<R: RemoteSession> ScrapeCoordinator<R> {
    pub fn new(
        remote: R,
        settings: &Settings,
        status: StatusStore,
        cache: DataCache,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            schemas: settings.schemas(),
            policy: settings.scrape_policy(),
            timeout: settings.presence_timeout(),
            status,
            cache,
            clock,
        }
    }

    pub fn schema(&self, kind: DatasetKind) -> Option<&DatasetSchema> {
        self.schemas.iter().find(|s| s.kind == kind)
    }

    /// Refreshes one dataset kind.
    ///
    /// Fails with [`AppError::MaxScrapeAttemptsExceeded`] without contacting
    /// the remote site while the kind is halted. On any other failure the
    /// previous snapshot stays in place.
    pub async fn refresh(
        &self,
        kind: DatasetKind,
        handle: &R::Handle,
    ) -> Result<RefreshOutcome, AppError> {
        let schema = self
            .schema(kind)
            .ok_or_else(|| AppError::ConfigError(format!("dataset '{kind}' is not configured")))?;

        let now = self.clock.now();
        let policy = self.policy;
        let halted = self.status.update(|s| {
            let tracker = s.scrape_tracker_mut(kind);
            if tracker.maybe_heal(&policy, now) {
                tracing::info!(%kind, "Scrape cooldown elapsed, attempts reset");
            }
            let halted = tracker.is_halted(&policy);
            if halted {
                tracker.mark_halted(now);
                s.errors = Some(AppError::MaxScrapeAttemptsExceeded(kind).to_string());
                s.record_action("Scraping halted due to failures");
            } else {
                s.session_state = SessionState::Scraping;
            }
            halted
        });
        if halted {
            tracing::debug!(%kind, "Scraping halted, skipping");
            return Err(AppError::MaxScrapeAttemptsExceeded(kind));
        }

        let fetched = match tokio::time::timeout(
            self.timeout,
            self.remote.fetch_rows(handle, &schema.view_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        };
        let scraped_at = self.clock.now();

        match fetched.and_then(|rows| parse_table(schema, &rows)) {
            Ok(parsed) => {
                let records = parsed.records.len();
                let changed = self
                    .cache
                    .commit(Snapshot::new(kind, parsed.records, scraped_at));
                self.status.update(|s| {
                    s.scrape_tracker_mut(kind).record_success();
                    s.errors = None;
                    s.online = true;
                    s.session_state = SessionState::LoggedIn;
                    s.record_action(format!("{} data extracted successfully", kind.label()));
                });
                tracing::info!(
                    %kind,
                    records,
                    dropped = parsed.rejected,
                    changed,
                    "Dataset refreshed"
                );
                Ok(RefreshOutcome {
                    kind,
                    records,
                    dropped: parsed.rejected,
                    changed,
                })
            }
            Err(e) => {
                let (attempts, newly_halted) = self.status.update(|s| {
                    let tracker = s.scrape_tracker_mut(kind);
                    let newly_halted = tracker.record_failure(&policy, scraped_at);
                    let attempts = tracker.attempts;
                    s.errors = Some(e.to_string());
                    if e.is_offline() {
                        s.online = false;
                    }
                    s.session_state = SessionState::LoggedIn;
                    s.record_action(format!("{} data extraction failed", kind.label()));
                    (attempts, newly_halted)
                });
                tracing::warn!(
                    %kind,
                    error = %e,
                    attempts,
                    max_attempts = policy.max_attempts,
                    "Dataset refresh failed"
                );
                if newly_halted {
                    tracing::warn!(%kind, cooldown = %policy.cooldown, "Scraping halted until cooldown elapses");
                }
                Err(e)
            }
        }
    }
}

/// Applies the schema to a fetched table.
///
/// A table without data rows is [`AppError::EmptyTable`]; a table whose rows
/// were all rejected is [`AppError::NoValidRows`].
fn parse_table(schema: &DatasetSchema, rows: &[Row]) -> Result<ParsedRows, AppError> {
    if rows.iter().all(|r| r.is_empty()) {
        return Err(AppError::EmptyTable {
            view_id: schema.view_id.clone(),
        });
    }
    let parsed = schema.parse_rows(rows);
    if parsed.records.is_empty() {
        return Err(AppError::NoValidRows {
            kind: schema.kind,
            rejected: parsed.rejected,
        });
    }
    Ok(parsed)
}

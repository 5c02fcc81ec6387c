//! Test utilities: scripted remote session, manual clock and reporters.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::clock::Clock;
use crate::config::Settings;
use crate::error::AppError;
use crate::models::Row;
use crate::poller::{PollerEvent, PollerReporter};
use crate::traits::{Credentials, RemoteSession};

// ---------------------------------------------------------------------------
// MockRemoteSession
// ---------------------------------------------------------------------------

/// Handle issued by [`MockRemoteSession`]; ids count up from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle {
    pub id: u32,
}

/// Scripted remote session.
///
/// `authenticate` pops the next scripted result (success when the queue is
/// empty). `fetch_rows` pops the next result queued for the view id (an empty
/// table when nothing is queued).
#[derive(Clone, Default)]
pub struct MockRemoteSession {
    auth_results: Arc<Mutex<Vec<Result<(), AppError>>>>,
    fetch_results: Arc<Mutex<HashMap<String, Vec<Result<Vec<Row>, AppError>>>>>,
    fetch_delay: Arc<Mutex<Option<Duration>>>,
    auth_delay: Arc<Mutex<Option<Duration>>>,
    auth_calls: Arc<AtomicUsize>,
    fetch_calls: Arc<Mutex<Vec<(u32, String)>>>,
    released: Arc<Mutex<Vec<u32>>>,
    next_id: Arc<AtomicU32>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockRemoteSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues authentication outcomes, consumed in order.
    pub fn with_auth_results(self, results: Vec<Result<(), AppError>>) -> Self {
        self.auth_results.lock().unwrap().extend(results);
        self
    }

    pub fn push_auth(&self, result: Result<(), AppError>) {
        self.auth_results.lock().unwrap().push(result);
    }

    /// Queues one `fetch_rows` outcome for `view_id`.
    pub fn push_rows(&self, view_id: &str, result: Result<Vec<Row>, AppError>) {
        self.fetch_results
            .lock()
            .unwrap()
            .entry(view_id.to_string())
            .or_default()
            .push(result);
    }

    /// Makes every `fetch_rows` call sleep before answering.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Makes every `authenticate` call sleep before answering. The scripted
    /// result is only consumed once the sleep completes.
    pub fn set_auth_delay(&self, delay: Option<Duration>) {
        *self.auth_delay.lock().unwrap() = delay;
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    /// Handle ids used for fetches of `view_id`, in call order.
    pub fn fetch_calls(&self, view_id: &str) -> Vec<u32> {
        self.fetch_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, v)| v == view_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn total_fetch_calls(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }

    pub fn released(&self) -> Vec<u32> {
        self.released.lock().unwrap().clone()
    }

    /// Highest number of remote calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteSession for MockRemoteSession {
    type Handle = MockHandle;

    async fn authenticate(&self, _credentials: &Credentials) -> Result<MockHandle, AppError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.auth_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut results = self.auth_results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        };
        next.map(|()| MockHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn fetch_rows(&self, handle: &MockHandle, view_id: &str) -> Result<Vec<Row>, AppError> {
        self.enter();
        self.fetch_calls
            .lock()
            .unwrap()
            .push((handle.id, view_id.to_string()));

        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut results = self.fetch_results.lock().unwrap();
            match results.get_mut(view_id) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Ok(Vec::new()),
            }
        };
        self.exit();
        next
    }

    async fn release(&self, handle: MockHandle) {
        self.released.lock().unwrap().push(handle.id);
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock starting at 2024-05-01 08:00 UTC.
    pub fn fixed() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records a short name for every poller event.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == name).count()
    }
}

impl PollerReporter for MockReporter {
    fn report(&self, event: PollerEvent<'_>) {
        let name = match event {
            PollerEvent::Started { .. } => "started",
            PollerEvent::CycleStarted { .. } => "cycle_started",
            PollerEvent::SessionUnavailable { .. } => "session_unavailable",
            PollerEvent::DatasetRefreshed { .. } => "dataset_refreshed",
            PollerEvent::DatasetFailed { .. } => "dataset_failed",
            PollerEvent::CycleCompleted { .. } => "cycle_completed",
            PollerEvent::Stopped { .. } => "stopped",
        };
        self.events.lock().unwrap().push(name.to_string());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Settings pointing at a fake portal with the default limits.
pub fn test_settings() -> Settings {
    let mut settings = Settings::new("fleet-admin", "secret", "https://portal.example.com/login");
    settings.poll_interval_seconds = 1;
    settings
}

/// A well-formed GPS row.
pub fn gps_row(n: u32) -> Row {
    [
        format!("Truck {n}"),
        format!("86000{n}"),
        "Moving".to_string(),
        "54 km/h".to_string(),
        "NE".to_string(),
        "2024-05-01 08:00:00".to_string(),
        format!("{n} Harbour Road"),
    ]
    .to_vec()
}

/// A well-formed alarm row.
pub fn alarm_row(n: u32) -> Row {
    [
        format!("Truck {n}"),
        format!("86000{n}"),
        "Overspeed".to_string(),
        "2024-05-01 08:01:00".to_string(),
        "2024-05-01 08:00:30".to_string(),
        "GT06".to_string(),
        "Handle".to_string(),
    ]
    .to_vec()
}

/// A row with too few cells for either default schema.
pub fn malformed_row() -> Row {
    vec!["Truck 9".to_string(), "broken".to_string()]
}

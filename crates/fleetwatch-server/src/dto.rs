use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetwatch_core::models::Record;
use fleetwatch_core::{AppError, CycleReport, DatasetKind, Status};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub logged_in: bool,
    pub online: bool,
    pub errors: Option<String>,
    pub login_attempts: u32,
    /// Consecutive failures per dataset kind.
    pub scrape_attempts: BTreeMap<String, u32>,
    pub last_action: String,
    /// Most recent active halt, if any operation is halted.
    pub last_failure_time: Option<DateTime<Utc>>,
    pub session_state: String,
    /// Halted operations ("login", "gps", "alarm").
    pub halted: Vec<String>,
    /// When each halted operation resumes on its own.
    pub retry_at: BTreeMap<String, DateTime<Utc>>,
}

impl StatusResponse {
    pub fn new(status: Status, retry_at: BTreeMap<String, DateTime<Utc>>) -> Self {
        Self {
            logged_in: status.logged_in,
            online: status.online,
            login_attempts: status.login_attempts(),
            scrape_attempts: status
                .scrape
                .iter()
                .map(|(kind, tracker)| (kind.to_string(), tracker.attempts))
                .collect(),
            last_failure_time: status.last_failure_time(),
            session_state: status.session_state.to_string(),
            halted: status.halted(),
            retry_at,
            errors: status.errors,
            last_action: status.last_action,
        }
    }
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

/// Records of one dataset kind plus the reason they are missing or stale.
#[derive(Debug, Default)]
pub struct DatasetView {
    pub records: Option<Vec<Record>>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct GpsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_data: Option<Vec<BTreeMap<String, String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DatasetView> for GpsResponse {
    fn from(view: DatasetView) -> Self {
        Self {
            gps_data: view.records,
            error: view.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AlarmResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_data: Option<Vec<BTreeMap<String, String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DatasetView> for AlarmResponse {
    fn from(view: DatasetView) -> Self {
        Self {
            alarm_data: view.records,
            error: view.error,
        }
    }
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RefreshQuery {
    /// Dataset kind to refresh ("gps" or "alarm"); all kinds when omitted.
    pub kind: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RefreshEntry {
    pub kind: String,
    /// "ok" or "error".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshEntry {
    fn failed(kind: DatasetKind, error: &AppError) -> Self {
        Self {
            kind: kind.to_string(),
            status: "error".to_string(),
            records: None,
            dropped: None,
            changed: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RefreshResponse {
    /// Set when no session could be obtained; no dataset was attempted then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_error: Option<String>,
    pub results: Vec<RefreshEntry>,
}

impl From<CycleReport> for RefreshResponse {
    fn from(report: CycleReport) -> Self {
        let results = report
            .outcomes
            .iter()
            .map(|(kind, result)| match result {
                Ok(outcome) => RefreshEntry {
                    kind: kind.to_string(),
                    status: "ok".to_string(),
                    records: Some(outcome.records),
                    dropped: Some(outcome.dropped),
                    changed: Some(outcome.changed),
                    error: None,
                },
                Err(e) => RefreshEntry::failed(*kind, e),
            })
            .collect();
        Self {
            session_error: report.session_error.map(|e| e.to_string()),
            results,
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

/// One table row as scraped: the text of each cell, in column order.
pub type Row = Vec<String>;

/// A parsed dataset record: column name → raw cell text.
pub type Record = BTreeMap<String, String>;

/// Named category of scraped data. Each kind has its own schema,
/// attempt counter, halt timestamp and cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Gps,
    Alarm,
}

impl DatasetKind {
    /// Every kind, in the fixed order the poller refreshes them.
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Gps, DatasetKind::Alarm];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Gps => "gps",
            DatasetKind::Alarm => "alarm",
        }
    }

    /// Human-readable name used in status messages.
    pub fn label(&self) -> &'static str {
        match self {
            DatasetKind::Gps => "GPS",
            DatasetKind::Alarm => "Alarm",
        }
    }

    /// Key under which the records are returned by the HTTP API.
    pub fn data_key(&self) -> &'static str {
        match self {
            DatasetKind::Gps => "gps_data",
            DatasetKind::Alarm => "alarm_data",
        }
    }

    /// Id of the dashboard element that contains this kind's table.
    pub fn default_view_id(&self) -> &'static str {
        match self {
            DatasetKind::Gps => "divDevicesListInfo",
            DatasetKind::Alarm => "divExceptionMessageDivInfo",
        }
    }

    pub fn default_columns(&self) -> &'static [&'static str] {
        match self {
            DatasetKind::Gps => &[
                "target_name",
                "id_no",
                "device_status",
                "speed",
                "direction",
                "position_time",
                "address",
            ],
            DatasetKind::Alarm => &[
                "target_name",
                "id_no",
                "alarm_type",
                "alarm_time",
                "position_time",
                "device_type",
                "operate",
            ],
        }
    }

    pub fn default_schema(&self) -> DatasetSchema {
        DatasetSchema {
            kind: *self,
            view_id: self.default_view_id().to_string(),
            columns: self
                .default_columns()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gps" => Ok(DatasetKind::Gps),
            "alarm" | "alarms" => Ok(DatasetKind::Alarm),
            _ => Err(format!("Unknown dataset kind: {}", s)),
        }
    }
}

/// Fixed positional column mapping for one dataset kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSchema {
    pub kind: DatasetKind,
    pub view_id: String,
    pub columns: Vec<String>,
}

/// Result of applying a schema to a batch of rows.
#[derive(Debug, Clone, Default)]
pub struct ParsedRows {
    pub records: Vec<Record>,
    /// Rows dropped because their cell count did not match the schema.
    pub rejected: usize,
}

impl DatasetSchema {
    /// Map one row to a record, positionally.
    pub fn parse_row(&self, row: &[String]) -> Result<Record, AppError> {
        if row.len() != self.columns.len() {
            return Err(AppError::ScrapeParseMismatch {
                kind: self.kind,
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        Ok(self
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect())
    }

    /// Map every row, dropping mismatched ones. Rows without any cells
    /// (header rows) are skipped without being counted as rejected.
    pub fn parse_rows(&self, rows: &[Row]) -> ParsedRows {
        let mut parsed = ParsedRows::default();
        for row in rows.iter().filter(|r| !r.is_empty()) {
            match self.parse_row(row) {
                Ok(record) => parsed.records.push(record),
                Err(e) => {
                    tracing::debug!(kind = %self.kind, error = %e, "Dropping row");
                    parsed.rejected += 1;
                }
            }
        }
        parsed
    }
}

/// The latest complete record set for one dataset kind.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub kind: DatasetKind,
    pub records: Vec<Record>,
    /// SHA-256 of the serialized records (for change detection)
    pub data_hash: String,
    pub scraped_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(kind: DatasetKind, records: Vec<Record>, scraped_at: DateTime<Utc>) -> Self {
        let serialized = serde_json::to_string(&records).unwrap_or_default();
        Self {
            kind,
            data_hash: compute_hash(&serialized),
            records,
            scraped_at,
        }
    }
}

/// Coarse state of the orchestrator, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    LoggedOut,
    Authenticating,
    LoggedIn,
    Scraping,
    Halted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::LoggedOut => write!(f, "logged_out"),
            SessionState::Authenticating => write!(f, "authenticating"),
            SessionState::LoggedIn => write!(f, "logged_in"),
            SessionState::Scraping => write!(f, "scraping"),
            SessionState::Halted => write!(f, "halted"),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

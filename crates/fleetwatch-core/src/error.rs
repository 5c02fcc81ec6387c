use thiserror::Error;

use crate::models::DatasetKind;

/// Application-wide error types for fleetwatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// The remote session layer could not be reached or started.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Credentials were rejected or the post-login marker never appeared.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Login is halted by policy until the cooldown elapses.
    #[error("Max login attempts reached")]
    MaxLoginAttemptsExceeded,

    /// Scraping of one dataset kind is halted by policy until the cooldown elapses.
    #[error("Max scrape attempts reached")]
    MaxScrapeAttemptsExceeded(DatasetKind),

    /// A table row did not have the column count expected for its dataset kind.
    #[error("Row shape mismatch for {kind}: expected {expected} cells, got {actual}")]
    ScrapeParseMismatch {
        kind: DatasetKind,
        expected: usize,
        actual: usize,
    },

    /// Page navigation or element lookup failed.
    #[error("Navigation error: {0}")]
    NavigationError(String),

    /// The table for a view was present but had no data rows.
    #[error("Table '{view_id}' is empty")]
    EmptyTable { view_id: String },

    /// Every row of the table was rejected by the dataset schema.
    #[error("No valid {kind} rows ({rejected} rejected)")]
    NoValidRows { kind: DatasetKind, rejected: usize },

    /// Remote call timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// A caller-supplied value was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if the failure means the live session can no longer be trusted.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, AppError::TransportError(_))
    }

    /// Returns true if the remote site itself could not be reached.
    pub fn is_offline(&self) -> bool {
        matches!(self, AppError::TransportError(_) | AppError::Timeout(_))
    }

    /// Returns true for policy halts.
    pub fn is_halt(&self) -> bool {
        matches!(
            self,
            AppError::MaxLoginAttemptsExceeded | AppError::MaxScrapeAttemptsExceeded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_errors() {
        assert!(AppError::TransportError("chrome exited".into()).is_offline());
        assert!(AppError::Timeout(30).is_offline());
        assert!(!AppError::AuthenticationFailed("bad password".into()).is_offline());
        assert!(
            !AppError::EmptyTable {
                view_id: "divDevicesListInfo".into()
            }
            .is_offline()
        );
    }

    #[test]
    fn test_session_invalidation() {
        assert!(AppError::TransportError("cdp closed".into()).invalidates_session());
        assert!(!AppError::Timeout(10).invalidates_session());
        assert!(!AppError::NavigationError("no table".into()).invalidates_session());
    }

    #[test]
    fn test_halt_messages_match_api_contract() {
        assert_eq!(
            AppError::MaxLoginAttemptsExceeded.to_string(),
            "Max login attempts reached"
        );
        assert_eq!(
            AppError::MaxScrapeAttemptsExceeded(DatasetKind::Alarm).to_string(),
            "Max scrape attempts reached"
        );
        assert!(AppError::MaxLoginAttemptsExceeded.is_halt());
    }
}

use std::fmt;
use std::future::Future;

use crate::error::AppError;
use crate::models::Row;

/// Login and password for the remote dashboard.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated access to the remote dashboard.
///
/// Implementations own every site-specific navigation detail. The orchestrator
/// guarantees that at most one handle is alive at a time and that a handle is
/// never driven by two callers concurrently.
pub trait RemoteSession: Send + Sync + Clone + 'static {
    /// One live authenticated connection.
    type Handle: Send + Sync + 'static;

    /// Opens a session and logs in. Succeeds only once the post-login page is observed.
    fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Handle, AppError>> + Send;

    /// Returns the cell text of every row of the table inside `view_id`.
    fn fetch_rows(
        &self,
        handle: &Self::Handle,
        view_id: &str,
    ) -> impl Future<Output = Result<Vec<Row>, AppError>> + Send;

    /// Tears the session down. Must never fail.
    fn release(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("fleet-admin", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("fleet-admin"));
        assert!(!debug.contains("hunter2"));
    }
}

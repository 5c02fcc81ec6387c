use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use url::Url;

use crate::error::AppError;
use crate::models::{DatasetKind, DatasetSchema};
use crate::policy::RetryPolicy;
use crate::traits::Credentials;

/// Upper bound on the cooldown, ten years.
const MAX_RETRY_AFTER_HOURS: u32 = 24 * 365 * 10;

/// Upper bound on the navigation and presence timeouts, one hour.
const MAX_TIMEOUT_SECONDS: u64 = 60 * 60;

/// Time allowed for the browser to start before the login form is reached.
const LAUNCH_ALLOWANCE: Duration = Duration::from_secs(30);

/// Elements waited for during login: toggle, username, password, submit.
const LOGIN_FORM_ELEMENTS: u32 = 4;

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_after_hours() -> u32 {
    6
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_navigation_timeout_seconds() -> u64 {
    30
}

fn default_presence_timeout_seconds() -> u64 {
    10
}

fn default_session_max_age_minutes() -> u32 {
    60
}

fn default_headless() -> bool {
    true
}

fn default_datasets() -> Vec<DatasetSettings> {
    DatasetKind::ALL
        .iter()
        .map(|&kind| DatasetSettings {
            kind,
            view_id: None,
            columns: None,
        })
        .collect()
}

/// Per-kind overrides of the built-in table schema.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatasetSettings {
    pub kind: DatasetKind,
    #[serde(default)]
    pub view_id: Option<String>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl DatasetSettings {
    pub fn schema(&self) -> DatasetSchema {
        let mut schema = self.kind.default_schema();
        if let Some(view_id) = &self.view_id {
            schema.view_id = view_id.clone();
        }
        if let Some(columns) = &self.columns {
            schema.columns = columns.clone();
        }
        schema
    }
}

/// Service configuration, read from a JSON file (usually `config.json`).
///
/// `login`, `password` and `url_login` are required, either in the file or via
/// `FLEETWATCH_LOGIN`, `FLEETWATCH_PASSWORD` and `FLEETWATCH_URL_LOGIN`.
#[derive(Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub url_login: String,
    #[serde(default = "default_max_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_scrape_attempts: u32,
    #[serde(default = "default_retry_after_hours")]
    pub retry_after_hours: u32,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_navigation_timeout_seconds")]
    pub navigation_timeout_seconds: u64,
    #[serde(default = "default_presence_timeout_seconds")]
    pub presence_timeout_seconds: u64,
    #[serde(default = "default_session_max_age_minutes")]
    pub session_max_age_minutes: u32,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_datasets")]
    pub datasets: Vec<DatasetSettings>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("url_login", &self.url_login)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("max_scrape_attempts", &self.max_scrape_attempts)
            .field("retry_after_hours", &self.retry_after_hours)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field("navigation_timeout_seconds", &self.navigation_timeout_seconds)
            .field("presence_timeout_seconds", &self.presence_timeout_seconds)
            .field("session_max_age_minutes", &self.session_max_age_minutes)
            .field("headless", &self.headless)
            .field("datasets", &self.datasets)
            .finish()
    }
}

impl Settings {
    /// Settings with every optional field at its default.
    pub fn new(
        login: impl Into<String>,
        password: impl Into<String>,
        url_login: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            url_login: url_login.into(),
            max_login_attempts: default_max_attempts(),
            max_scrape_attempts: default_max_attempts(),
            retry_after_hours: default_retry_after_hours(),
            poll_interval_seconds: default_poll_interval_seconds(),
            navigation_timeout_seconds: default_navigation_timeout_seconds(),
            presence_timeout_seconds: default_presence_timeout_seconds(),
            session_max_age_minutes: default_session_max_age_minutes(),
            headless: default_headless(),
            datasets: default_datasets(),
        }
    }

    /// Read, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let mut settings = Self::parse(&raw)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse the JSON document without validating it.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid config JSON: {e}")))
    }

    /// Apply `FLEETWATCH_*` overrides for the credentials and login URL.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(login) = lookup("FLEETWATCH_LOGIN") {
            self.login = login;
        }
        if let Some(password) = lookup("FLEETWATCH_PASSWORD") {
            self.password = password;
        }
        if let Some(url_login) = lookup("FLEETWATCH_URL_LOGIN") {
            self.url_login = url_login;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.login.trim().is_empty() {
            return Err(AppError::ConfigError("login is required".into()));
        }
        if self.password.is_empty() {
            return Err(AppError::ConfigError("password is required".into()));
        }

        let url = Url::parse(&self.url_login).map_err(|e| {
            AppError::ConfigError(format!("Invalid url_login '{}': {e}", self.url_login))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "url_login scheme '{}' is not allowed (only http/https)",
                url.scheme()
            )));
        }

        for (name, value) in [
            ("max_login_attempts", u64::from(self.max_login_attempts)),
            ("max_scrape_attempts", u64::from(self.max_scrape_attempts)),
            ("poll_interval_seconds", self.poll_interval_seconds),
            ("navigation_timeout_seconds", self.navigation_timeout_seconds),
            ("presence_timeout_seconds", self.presence_timeout_seconds),
            ("session_max_age_minutes", u64::from(self.session_max_age_minutes)),
        ] {
            if value == 0 {
                return Err(AppError::ConfigError(format!("{name} must be at least 1")));
            }
        }

        for (name, value) in [
            ("navigation_timeout_seconds", self.navigation_timeout_seconds),
            ("presence_timeout_seconds", self.presence_timeout_seconds),
        ] {
            if value > MAX_TIMEOUT_SECONDS {
                return Err(AppError::ConfigError(format!(
                    "{name} must be at most {MAX_TIMEOUT_SECONDS}"
                )));
            }
        }

        if self.retry_after_hours > MAX_RETRY_AFTER_HOURS {
            return Err(AppError::ConfigError(format!(
                "retry_after_hours must be at most {MAX_RETRY_AFTER_HOURS}"
            )));
        }

        if self.datasets.is_empty() {
            return Err(AppError::ConfigError(
                "at least one dataset must be configured".into(),
            ));
        }
        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            if !seen.insert(dataset.kind) {
                return Err(AppError::ConfigError(format!(
                    "dataset '{}' is configured twice",
                    dataset.kind
                )));
            }
            if dataset.columns.as_ref().is_some_and(|c| c.is_empty()) {
                return Err(AppError::ConfigError(format!(
                    "dataset '{}' has an empty column list",
                    dataset.kind
                )));
            }
            if dataset.view_id.as_ref().is_some_and(|v| v.trim().is_empty()) {
                return Err(AppError::ConfigError(format!(
                    "dataset '{}' has an empty view_id",
                    dataset.kind
                )));
            }
        }

        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.login, &self.password)
    }

    pub fn login_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_login_attempts,
            cooldown: self.cooldown(),
        }
    }

    pub fn scrape_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_scrape_attempts,
            cooldown: self.cooldown(),
        }
    }

    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.retry_after_hours.min(MAX_RETRY_AFTER_HOURS)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_seconds)
    }

    /// Overall budget for one authentication: browser launch, the login form
    /// elements (each bounded by the presence timeout) and the wait for the
    /// post-login page (bounded by the navigation timeout).
    pub fn login_timeout(&self) -> Duration {
        self.presence_timeout()
            .saturating_mul(LOGIN_FORM_ELEMENTS)
            .saturating_add(self.navigation_timeout())
            .saturating_add(LAUNCH_ALLOWANCE)
    }

    pub fn session_max_age(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.session_max_age_minutes))
    }

    /// Schemas of the configured dataset kinds, in refresh order.
    pub fn schemas(&self) -> Vec<DatasetSchema> {
        self.datasets.iter().map(DatasetSettings::schema).collect()
    }

    pub fn kinds(&self) -> Vec<DatasetKind> {
        self.datasets.iter().map(|d| d.kind).collect()
    }
}

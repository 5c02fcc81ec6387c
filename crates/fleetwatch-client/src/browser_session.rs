use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use fleetwatch_core::config::Settings;
use fleetwatch_core::error::AppError;
use fleetwatch_core::models::Row;
use fleetwatch_core::traits::{Credentials, RemoteSession};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::table::parse_table_rows;

const POLL_STEP: Duration = Duration::from_millis(250);
const FAR_FUTURE: Duration = Duration::from_secs(24 * 60 * 60);

/// CSS selectors of the login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSelectors {
    /// Tab that switches the form to account/password login.
    pub login_toggle: String,
    pub username: String,
    pub password: String,
    pub submit: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            login_toggle: "#changBar0".to_string(),
            username: r#"[name="txtUserName"]"#.to_string(),
            password: r#"[name="txtAccountPassword"]"#.to_string(),
            submit: "#btnLogin".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserSessionConfig {
    pub url_login: String,
    pub selectors: LoginSelectors,
    /// Substring of the page URL that proves the login went through.
    pub success_marker: String,
    pub navigation_timeout: Duration,
    pub presence_timeout: Duration,
    pub headless: bool,
}

impl BrowserSessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            url_login: settings.url_login.clone(),
            selectors: LoginSelectors::default(),
            success_marker: "dashboard".to_string(),
            navigation_timeout: settings.navigation_timeout(),
            presence_timeout: settings.presence_timeout(),
            headless: settings.headless,
        }
    }
}

/// One logged-in Chromium instance and its dashboard tab.
pub struct BrowserHandle {
    browser: Browser,
    page: Page,
    events: JoinHandle<()>,
}

impl BrowserHandle {
    /// Whether the CDP connection has gone away.
    fn disconnected(&self) -> bool {
        self.events.is_finished()
    }
}

/// Remote session driving headless Chromium over the Chrome DevTools Protocol.
///
/// Every [`RemoteSession::authenticate`] call launches a fresh browser process
/// and logs in through the portal form; [`RemoteSession::release`] closes it.
#[derive(Debug, Clone)]
pub struct BrowserSession {
    config: Arc<BrowserSessionConfig>,
}

impl BrowserSession {
    pub fn new(config: BrowserSessionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }
        if self.config.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::TransportError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::TransportError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok((browser, events))
    }

    async fn login(&self, browser: &Browser, credentials: &Credentials) -> Result<Page, AppError> {
        let url = self.config.url_login.as_str();
        let selectors = &self.config.selectors;
        let timeout = self.config.presence_timeout;

        let page = browser
            .new_page(url)
            .await
            .map_err(|e| AppError::TransportError(format!("Failed to open {url}: {e}")))?;

        wait_for_element(&page, &selectors.login_toggle, timeout)
            .await?
            .click()
            .await
            .map_err(|e| nav_error("login toggle", e))?;

        let username = wait_for_element(&page, &selectors.username, timeout).await?;
        username
            .click()
            .await
            .map_err(|e| nav_error("username field", e))?
            .type_str(&credentials.login)
            .await
            .map_err(|e| nav_error("username field", e))?;

        let password = wait_for_element(&page, &selectors.password, timeout).await?;
        password
            .click()
            .await
            .map_err(|e| nav_error("password field", e))?
            .type_str(&credentials.password)
            .await
            .map_err(|e| nav_error("password field", e))?;

        wait_for_element(&page, &selectors.submit, timeout)
            .await?
            .click()
            .await
            .map_err(|e| nav_error("login button", e))?;

        self.wait_for_marker(&page).await?;
        Ok(page)
    }

    async fn wait_for_marker(&self, page: &Page) -> Result<(), AppError> {
        let marker = self.config.success_marker.as_str();
        let deadline = deadline_after(self.config.navigation_timeout);
        let mut last_url = None;

        loop {
            if let Ok(Some(url)) = page.url().await {
                if url.contains(marker) {
                    tracing::debug!(%url, "Post-login page reached");
                    return Ok(());
                }
                last_url = Some(url);
            }
            if Instant::now() >= deadline {
                return Err(AppError::AuthenticationFailed(format!(
                    "'{marker}' page not reached (last url: {})",
                    last_url.as_deref().unwrap_or("unknown")
                )));
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    async fn shut_down(mut browser: Browser, events: JoinHandle<()>) {
        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "Browser close failed");
        }
        if let Err(e) = browser.wait().await {
            tracing::debug!(error = %e, "Browser wait failed");
        }
        events.abort();
    }
}

impl RemoteSession for BrowserSession {
    type Handle = BrowserHandle;

    async fn authenticate(&self, credentials: &Credentials) -> Result<BrowserHandle, AppError> {
        let (browser, events) = self.launch().await?;

        match self.login(&browser, credentials).await {
            Ok(page) => Ok(BrowserHandle {
                browser,
                page,
                events,
            }),
            Err(e) => {
                Self::shut_down(browser, events).await;
                Err(e)
            }
        }
    }

    async fn fetch_rows(
        &self,
        handle: &BrowserHandle,
        view_id: &str,
    ) -> Result<Vec<Row>, AppError> {
        if handle.disconnected() {
            return Err(AppError::TransportError("browser connection closed".into()));
        }

        let selector = format!("#{view_id}");
        let waited = wait_for_element(&handle.page, &selector, self.config.presence_timeout).await;
        let element = match waited {
            Ok(element) => element,
            Err(_) if handle.disconnected() => {
                return Err(AppError::TransportError("browser connection closed".into()));
            }
            Err(e) => return Err(e),
        };

        let html = element
            .outer_html()
            .await
            .map_err(|e| nav_error(view_id, e))?
            .unwrap_or_default();
        tracing::debug!(%view_id, bytes = html.len(), "Read table markup");

        parse_table_rows(&html)
    }

    async fn release(&self, handle: BrowserHandle) {
        let BrowserHandle {
            browser,
            page,
            events,
        } = handle;
        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Page close failed");
        }
        Self::shut_down(browser, events).await;
    }
}

/// Polls for `selector` until it appears or `timeout` elapses.
async fn wait_for_element(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, AppError> {
    let deadline = deadline_after(timeout);
    loop {
        match page.find_element(selector).await {
            Ok(element) => return Ok(element),
            Err(e) if Instant::now() >= deadline => {
                return Err(AppError::NavigationError(format!(
                    "'{selector}' not found within {}s: {e}",
                    timeout.as_secs()
                )));
            }
            Err(_) => tokio::time::sleep(POLL_STEP).await,
        }
    }
}

/// `now + timeout`, saturating to a day out when the sum is not representable.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn nav_error(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::NavigationError(format!("{what}: {e}"))
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// The snap wrapper at `/snap/bin/chromium` strips unknown CLI flags, so the
/// binary inside the snap is preferred. `CHROME_BIN` overrides everything;
/// `None` lets `chromiumoxide` do its own lookup.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let mut settings = Settings::new("user", "pw", "https://portal.example.com/login");
        settings.presence_timeout_seconds = 4;
        settings.headless = false;

        let config = BrowserSessionConfig::from_settings(&settings);

        assert_eq!(config.url_login, "https://portal.example.com/login");
        assert_eq!(config.presence_timeout, Duration::from_secs(4));
        assert_eq!(config.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.success_marker, "dashboard");
        assert!(!config.headless);
    }

    #[test]
    fn test_default_selectors_target_portal_form() {
        let selectors = LoginSelectors::default();
        assert_eq!(selectors.login_toggle, "#changBar0");
        assert_eq!(selectors.username, r#"[name="txtUserName"]"#);
        assert_eq!(selectors.password, r#"[name="txtAccountPassword"]"#);
        assert_eq!(selectors.submit, "#btnLogin");
    }

    #[test]
    fn test_deadline_after_saturates() {
        let before = Instant::now();

        assert!(deadline_after(Duration::from_secs(5)) >= before + Duration::from_secs(5));
        assert!(deadline_after(Duration::MAX) >= before + FAR_FUTURE);
    }

    #[test]
    fn test_chrome_bin_override() {
        let exe = std::env::current_exe().unwrap();
        // SAFETY: single-threaded test body; no other test reads CHROME_BIN.
        unsafe { std::env::set_var("CHROME_BIN", &exe) };
        assert_eq!(find_chrome_binary(), Some(exe));
        unsafe { std::env::remove_var("CHROME_BIN") };
    }
}

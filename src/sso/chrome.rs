//! Chrome DevTools Protocol backed browser sessions.
//!
//! Each session is its own browser process with a throwaway profile
//! directory, so no cookie ever outlives the login that produced it.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BrowserConfig;
use crate::error::{Error, Result};
use crate::sso::{BrowserCookie, BrowserLauncher, BrowserSession};

fn cdp_error(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Browser(format!("{context}: {err}"))
}

/// A CDP command timeout during navigation is a navigation timeout.
fn navigation_error(err: CdpError, timeout: Duration) -> Error {
    match err {
        CdpError::Timeout => Error::NavigationTimeout(timeout),
        other => cdp_error("Navigation failed", other),
    }
}

/// Launches a fresh headless Chrome per login.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    config: BrowserConfig,
    navigation_timeout: Duration,
}

impl ChromeLauncher {
    /// `navigation_timeout` also bounds each CDP command.
    pub fn new(config: BrowserConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            navigation_timeout,
        }
    }

    fn executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.executable {
            return Ok(path.clone());
        }
        find_chrome().ok_or_else(|| {
            Error::Browser(
                "Chrome/Chromium not found. Install it or set CHROME_EXECUTABLE_PATH.".to_string(),
            )
        })
    }

    fn cdp_config(&self, profile_dir: &TempDir) -> Result<CdpConfig> {
        let mut builder = CdpConfig::builder()
            .chrome_executable(self.executable()?)
            .user_data_dir(profile_dir.path())
            .request_timeout(self.navigation_timeout)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");

        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox().arg("--disable-setuid-sandbox");
        }

        builder
            .build()
            .map_err(|e| cdp_error("Failed to configure browser", e))
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let profile_dir = tempfile::Builder::new()
            .prefix("efbridge-profile-")
            .tempdir()
            .map_err(|e| cdp_error("Failed to create browser profile dir", e))?;

        let config = self.cdp_config(&profile_dir)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| cdp_error("Failed to launch browser", e))?;

        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(cdp_error("Failed to open page", err));
            }
        };

        info!(profile = %profile_dir.path().display(), "launched headless browser");

        Ok(Box::new(ChromeSession {
            browser,
            page,
            handler_task,
            profile_dir,
            navigation_timeout: self.navigation_timeout,
        }))
    }
}

/// A single Chrome process with one page.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    profile_dir: TempDir,
    navigation_timeout: Duration,
}

/// Tracks requests between `requestWillBeSent` and `loadingFinished` or
/// `loadingFailed`.
///
/// The three events arrive on separate channels, so a request can be seen
/// completing before it is seen starting. Completed ids are remembered and
/// never count as in flight again. Redirects reuse their request id.
#[derive(Debug, Default)]
struct InFlightRequests {
    pending: HashSet<String>,
    completed: HashSet<String>,
}

impl InFlightRequests {
    fn started(&mut self, id: &str) {
        if !self.completed.contains(id) {
            self.pending.insert(id.to_string());
        }
    }

    fn ended(&mut self, id: &str) {
        self.pending.remove(id);
        self.completed.insert(id.to_string());
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Wait until no request has been in flight for `idle`, or every stream ends.
async fn wait_for_network_idle<S, F, X>(
    mut started: S,
    mut finished: F,
    mut failed: X,
    idle: Duration,
) where
    S: Stream<Item = String> + Unpin,
    F: Stream<Item = String> + Unpin,
    X: Stream<Item = String> + Unpin,
{
    let mut requests = InFlightRequests::default();
    loop {
        // Starts are drained first so buffered events settle in order.
        tokio::select! {
            biased;
            Some(id) = started.next() => requests.started(&id),
            Some(id) = finished.next() => requests.ended(&id),
            Some(id) = failed.next() => requests.ended(&id),
            _ = tokio::time::sleep(idle), if requests.is_idle() => {
                debug!("network idle");
                return;
            }
            else => return,
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str, idle: Duration) -> Result<()> {
        // Listeners go up before navigation so no early request is missed.
        let sent = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| cdp_error("Failed to watch requests", e))?;
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| cdp_error("Failed to watch requests", e))?;
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| cdp_error("Failed to watch requests", e))?;

        self.page
            .goto(url)
            .await
            .map_err(|e| navigation_error(e, self.navigation_timeout))?;

        wait_for_network_idle(
            sent.map(|event| event.request_id.inner().clone()),
            finished.map(|event| event.request_id.inner().clone()),
            failed.map(|event| event.request_id.inner().clone()),
            idle,
        )
        .await;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| cdp_error("Failed to read cookies", e))?;

        Ok(cookies
            .into_iter()
            .map(|cookie| BrowserCookie {
                name: cookie.name,
                value: cookie.value,
                domain: cookie.domain,
            })
            .collect())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| cdp_error("Failed to build script evaluation", e))?;

        self.page
            .evaluate_expression(params)
            .await
            .map_err(|e| cdp_error("Script evaluation failed", e))?
            .into_value::<Value>()
            .map_err(|e| cdp_error("Script returned an unreadable value", e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromeSession {
            mut browser,
            page,
            handler_task,
            profile_dir,
            ..
        } = *self;

        drop(page);
        let closed = browser.close().await;
        let _ = browser.wait().await;
        handler_task.abort();

        if let Err(err) = profile_dir.close() {
            debug!(error = %err, "failed to remove browser profile dir");
        }

        closed
            .map(|_| ())
            .map_err(|e| cdp_error("Failed to close browser", e))
    }
}

/// Find Chrome/Chromium executable.
fn find_chrome() -> Option<PathBuf> {
    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}

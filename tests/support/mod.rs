#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use efbridge::config::{IdentityConfig, PlatformConfig, SsoConfig};
use efbridge::identity::IdentityClient;
use efbridge::login::LoginPipeline;
use efbridge::platform::PlatformClient;
use efbridge::sso::{BrowserCookie, BrowserLauncher, BrowserSession, SsoBridge};
use efbridge::{Error, Result};
use serde_json::{json, Value};

/// Counters shared by every session a [`FakeBrowser`] launches.
#[derive(Debug, Default)]
pub struct BrowserStats {
    launched: AtomicUsize,
    closed: AtomicUsize,
    urls: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
}

impl BrowserStats {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone)]
pub enum Navigation {
    Settles,
    Hangs,
    Fails(String),
}

/// Deterministic stand-in for a real browser.
#[derive(Debug, Clone)]
pub struct FakeBrowser {
    pub stats: Arc<BrowserStats>,
    navigation: Navigation,
    cookies: Vec<BrowserCookie>,
    /// Number of cookie reads that see an empty jar before `cookies` appear.
    empty_polls: usize,
    script_reply: Value,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self {
            stats: Arc::new(BrowserStats::default()),
            navigation: Navigation::Settles,
            cookies: Vec::new(),
            empty_polls: 0,
            script_reply: levels_reply(200, json!({ "levels": [] })),
        }
    }
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, cookie: BrowserCookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    pub fn with_session_cookie(self, access: &str, account: &str) -> Self {
        self.with_cookie(sso_cookie(access, account))
    }

    pub fn cookies_after(mut self, empty_polls: usize) -> Self {
        self.empty_polls = empty_polls;
        self
    }

    pub fn with_navigation(mut self, navigation: Navigation) -> Self {
        self.navigation = navigation;
        self
    }

    pub fn with_script_reply(mut self, reply: Value) -> Self {
        self.script_reply = reply;
        self
    }

    pub fn launcher(&self) -> Arc<dyn BrowserLauncher> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            browser: self.clone(),
            polls: AtomicUsize::new(0),
        }))
    }
}

struct FakeSession {
    browser: FakeBrowser,
    polls: AtomicUsize,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&self, url: &str, _idle: Duration) -> Result<()> {
        self.browser.stats.urls.lock().unwrap().push(url.to_string());
        match &self.browser.navigation {
            Navigation::Settles => Ok(()),
            Navigation::Hangs => std::future::pending().await,
            Navigation::Fails(message) => Err(Error::Browser(message.clone())),
        }
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>> {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst);
        if seen < self.browser.empty_polls {
            return Ok(Vec::new());
        }
        Ok(self.browser.cookies.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.browser
            .stats
            .scripts
            .lock()
            .unwrap()
            .push(script.to_string());
        Ok(self.browser.script_reply.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.browser.stats.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The cookie the platform's redirect chain leaves behind.
pub fn sso_cookie(access: &str, account: &str) -> BrowserCookie {
    let payload = json!({ "access": access, "account": account, "refresh": "r" }).to_string();
    BrowserCookie::new("efid_tokens", urlencoding::encode(&payload).into_owned())
}

/// What the in-page levels script resolves to.
pub fn levels_reply(status: u16, body: Value) -> Value {
    json!({
        "ok": (200..300).contains(&status),
        "status": status,
        "body": body.to_string(),
    })
}

/// SSO timing tight enough for tests.
pub fn fast_sso_config() -> SsoConfig {
    SsoConfig {
        navigation_timeout: Duration::from_millis(200),
        network_idle: Duration::from_millis(1),
        settle_timeout: Duration::from_millis(100),
        poll_interval: Duration::from_millis(10),
        ..SsoConfig::default()
    }
}

pub fn platform_client(base_url: &str) -> PlatformClient {
    PlatformClient::new(PlatformConfig::default()).with_base_url(base_url)
}

pub fn pipeline(identity_url: &str, platform_url: &str, browser: &FakeBrowser) -> LoginPipeline {
    let identity = IdentityClient::new(IdentityConfig::default()).with_base_url(identity_url);
    let platform = platform_client(platform_url);
    let bridge = SsoBridge::new(browser.launcher(), fast_sso_config(), platform.base_url());
    LoginPipeline::new(identity, bridge, platform)
}

//! SSO bridge: completes the platform's OAuth2 redirect chain in a real
//! browser and harvests the session cookie it leaves behind.
//!
//! The platform only sets its session cookie as a side effect of
//! browser-executed redirects, so there is no pure REST path to a session.
//! The browser is abstracted behind [`BrowserLauncher`] / [`BrowserSession`];
//! the Chrome implementation lives in [`chrome`] and tests use a fake.
//!
//! Every login gets a fresh session and that session is closed on every
//! exit path of [`SsoBridge::establish`].

#[cfg(feature = "chrome")]
pub mod chrome;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SsoConfig;
use crate::credentials::{SessionTokens, UpgradedToken};
use crate::error::{Error, Result};

const INITIATE_PATH: &str = "/login/v1/login/oauth2/initiate";

/// A cookie as read from a browser session's jar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
        }
    }
}

/// Creates isolated browser sessions, one per login attempt.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>>;
}

/// One isolated automation context: its own cookie jar and navigation state.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate to `url` and return once no request has been in flight for `idle`.
    ///
    /// The caller bounds the whole call with the navigation timeout.
    async fn navigate(&self, url: &str, idle: Duration) -> Result<()>;

    /// Current contents of the cookie jar.
    async fn cookies(&self) -> Result<Vec<BrowserCookie>>;

    /// Evaluate a script in the page context, awaiting a returned promise.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Tear the session down. Called exactly once per launched session.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Work that must run inside the still-open session once tokens are known.
#[async_trait]
pub trait SessionTask: Send + Sync {
    type Output: Send;

    async fn run(&self, session: &dyn BrowserSession, tokens: &SessionTokens)
        -> Result<Self::Output>;
}

/// A [`SessionTask`] that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFollowUp;

#[async_trait]
impl SessionTask for NoFollowUp {
    type Output = ();

    async fn run(&self, _session: &dyn BrowserSession, _tokens: &SessionTokens) -> Result<()> {
        Ok(())
    }
}

/// Drives the redirect-based SSO handshake.
#[derive(Clone)]
pub struct SsoBridge {
    launcher: Arc<dyn BrowserLauncher>,
    config: SsoConfig,
    platform_base_url: String,
}

impl SsoBridge {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        config: SsoConfig,
        platform_base_url: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            config,
            platform_base_url: platform_base_url.into(),
        }
    }

    /// URL that starts the OAuth2 flow with `token` as the identity hint.
    pub fn initiation_url(&self, token: &UpgradedToken) -> String {
        format!(
            "{}{INITIATE_PATH}?state={}&initiator={}&prompt={}&domain_hint={}&partnerCode={}&sso_token_hint={}",
            self.platform_base_url.trim_end_matches('/'),
            self.config.state,
            self.config.initiator,
            self.config.prompt,
            self.config.domain_hint,
            self.config.partner_code,
            urlencoding::encode(token.expose()),
        )
    }

    /// Run the handshake and return only the session tokens.
    pub async fn handshake(&self, token: &UpgradedToken) -> Result<SessionTokens> {
        self.establish(token, &NoFollowUp)
            .await
            .map(|(tokens, ())| tokens)
    }

    /// Run the handshake, then `task` inside the same browser session.
    ///
    /// The session is closed before this returns, whatever the outcome.
    pub async fn establish<T: SessionTask>(
        &self,
        token: &UpgradedToken,
        task: &T,
    ) -> Result<(SessionTokens, T::Output)> {
        let session = self.launcher.launch().await?;
        debug!("browser session launched");

        let outcome = self.drive(session.as_ref(), token, task).await;

        if let Err(err) = session.close().await {
            warn!(error = %err, "failed to close browser session");
        } else {
            debug!("browser session closed");
        }

        outcome
    }

    async fn drive<T: SessionTask>(
        &self,
        session: &dyn BrowserSession,
        token: &UpgradedToken,
        task: &T,
    ) -> Result<(SessionTokens, T::Output)> {
        let url = self.initiation_url(token);
        let started = Instant::now();

        tokio::time::timeout(
            self.config.navigation_timeout,
            session.navigate(&url, self.config.network_idle),
        )
        .await
        .map_err(|_| Error::NavigationTimeout(self.config.navigation_timeout))??;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sso redirect chain settled"
        );

        let cookie = self.wait_for_cookie(session).await?;
        let tokens = SessionTokens::from_cookie_value(&cookie.value)?;
        debug!(account = %tokens.account(), "materialized session tokens");

        let output = task.run(session, &tokens).await?;
        Ok((tokens, output))
    }

    /// Poll the cookie jar until the session cookie shows up or the settle
    /// window closes. Cookies can land after the last request finishes.
    async fn wait_for_cookie(&self, session: &dyn BrowserSession) -> Result<BrowserCookie> {
        let name = &self.config.cookie_name;
        let deadline = Instant::now() + self.config.settle_timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let found = session
                .cookies()
                .await?
                .into_iter()
                .find(|cookie| cookie.name == *name);

            if let Some(cookie) = found {
                debug!(polls, domain = %cookie.domain, "found sso cookie");
                return Ok(cookie);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(polls, cookie = %name, "sso cookie never appeared");
                return Err(Error::SsoCookieMissing(name.clone()));
            }

            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

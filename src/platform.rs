//! Learning platform API calls made with an established session.
//!
//! The levels listing runs inside the browser session that produced the
//! tokens. Changing level and fetching tasks are direct REST calls made
//! with a token pair the caller kept from an earlier login.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::config::PlatformConfig;
use crate::credentials::SessionTokens;
use crate::error::{Error, Result};
use crate::sso::{BrowserSession, SessionTask};

const LEVELS_PATH: &str = "/wl/api/change-level/levels";
const STUDY_PLAN_PATH: &str = "/wl/api/study-plan/study-plan";

const LEVELS_CORRELATION_ID: &str = "EN-XS3EHEBXam436Y0HX3";
const TASKS_CORRELATION_ID: &str = "R3Dq5eAUEUoCWiANsW5XL";

/// Course and level the caller wants to act on.
///
/// Values are forwarded with their JSON type intact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSelection {
    pub course_id: Value,
    pub level_id: Value,
}

impl LevelSelection {
    pub fn new(course_id: impl Into<Value>, level_id: impl Into<Value>) -> Self {
        Self {
            course_id: course_id.into(),
            level_id: level_id.into(),
        }
    }
}

/// Render a JSON scalar the way it would appear in a URL.
fn query_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Client for the platform's authenticated REST API.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    client: Client,
    config: PlatformConfig,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Override API base URL (useful for tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// The levels listing, to be run inside an open browser session.
    pub fn levels_query(&self) -> LevelsQuery {
        LevelsQuery {
            url: format!(
                "{}?locale={}",
                self.url(LEVELS_PATH),
                urlencoding::encode(&self.config.locale)
            ),
        }
    }

    /// Move the study plan to another level. Returns the provider JSON verbatim.
    pub async fn change_level(
        &self,
        tokens: &SessionTokens,
        selection: &LevelSelection,
    ) -> Result<Value> {
        let response = self
            .client
            .put(self.url(STUDY_PLAN_PATH))
            .timeout(self.config.request_timeout)
            .header("Authorization", tokens.bearer())
            .header("x-ef-access", tokens.account())
            .header("Content-Type", "application/json")
            .json(selection)
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(provider_failure("change_level", response).await);
        }

        info!(level = %query_text(&selection.level_id), "changed study level");
        read_json(response).await
    }

    /// Fetch the study plan tasks for a level. Returns the `children` field,
    /// or `None` when the plan has none.
    pub async fn fetch_tasks(
        &self,
        tokens: &SessionTokens,
        selection: &LevelSelection,
    ) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.url(STUDY_PLAN_PATH))
            .timeout(self.config.request_timeout)
            .query(&[
                ("locale", self.config.locale.clone()),
                ("clientTimezone", self.config.client_timezone.clone()),
                ("courseId", query_text(&selection.course_id)),
                ("levelId", query_text(&selection.level_id)),
            ])
            .header("accept", "application/json")
            .header("authorization", tokens.bearer())
            .header("x-ef-access", tokens.account())
            .header("x-ef-correlation-id", TASKS_CORRELATION_ID)
            .send()
            .await
            .map_err(transport_failure)?;

        if !response.status().is_success() {
            return Err(provider_failure("fetch_tasks", response).await);
        }

        let mut plan = read_json(response).await?;
        Ok(plan.get_mut("children").map(Value::take))
    }
}

fn transport_failure(err: reqwest::Error) -> Error {
    error!(error = %err, "platform request did not complete");
    Error::Downstream {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

/// Build the error for a non-2xx reply, keeping the provider status and its
/// `error` message when it sent one.
async fn provider_failure(operation: &'static str, response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    error!(operation, status, body = %body, "platform rejected request");

    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|payload| {
            payload
                .get("error")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("Request failed with status code {status}"));

    Error::Downstream {
        status: Some(status),
        message,
    }
}

/// Successful bodies are returned as JSON, or as a JSON string when the
/// provider sent something else.
async fn read_json(response: Response) -> Result<Value> {
    let body = response.text().await.map_err(transport_failure)?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
}

/// Lists the available levels from inside the authenticated page.
#[derive(Debug, Clone)]
pub struct LevelsQuery {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ScriptReply {
    ok: bool,
    status: u16,
    #[serde(default)]
    body: String,
}

impl LevelsQuery {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Page script issuing the request. Values are embedded as JSON string
    /// literals, so tokens cannot break out of the script.
    pub fn script(&self, tokens: &SessionTokens) -> String {
        let literal = |s: &str| Value::String(s.to_string()).to_string();
        format!(
            r#"(async () => {{
  const r = await fetch({url}, {{
    method: 'GET',
    headers: {{
      'accept': 'application/json',
      'authorization': {bearer},
      'x-ef-access': {account},
      'x-ef-correlation-id': {correlation}
    }}
  }});
  return {{ ok: r.ok, status: r.status, body: await r.text() }};
}})()"#,
            url = literal(&self.url),
            bearer = literal(&tokens.bearer()),
            account = literal(tokens.account()),
            correlation = literal(LEVELS_CORRELATION_ID),
        )
    }
}

#[async_trait]
impl SessionTask for LevelsQuery {
    type Output = Value;

    async fn run(&self, session: &dyn BrowserSession, tokens: &SessionTokens) -> Result<Value> {
        let raw = session.evaluate(&self.script(tokens)).await?;
        let reply: ScriptReply = serde_json::from_value(raw)
            .map_err(|e| Error::LevelsQuery(format!("Resposta inesperada do navegador: {e}")))?;

        if !reply.ok {
            return Err(Error::LevelsQuery(format!(
                "Falha ao buscar níveis: {} - {}",
                reply.status, reply.body
            )));
        }

        serde_json::from_str(&reply.body)
            .map_err(|e| Error::LevelsQuery(format!("Resposta de níveis inválida: {e}")))
    }
}

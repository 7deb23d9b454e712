//! HTTP surface: health, login, change level and tasks.
//!
//! Handlers validate input before touching the network, then hand off to
//! the pipeline or the platform client. Failures always render as
//! `{"error": "..."}`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::credentials::{IdentityCredential, SessionTokens};
use crate::error::Error;
use crate::identity::IdentityClient;
use crate::login::{LoginPipeline, ACCESS_ACCOUNT_FIELD, ACCESS_TOKEN_FIELD};
use crate::platform::{LevelSelection, PlatformClient};
use crate::sso::{BrowserLauncher, SsoBridge};

const LOGIN_FIELDS_MESSAGE: &str = "Informe ra e password.";
const DOWNSTREAM_FIELDS_MESSAGE: &str =
    "Campos obrigatórios: levelId, courseId, efAccessToken, efAccessAccount.";

/// Shared, immutable handler state.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<LoginPipeline>,
    platform: PlatformClient,
    port: u16,
}

impl AppState {
    pub fn new(pipeline: LoginPipeline, platform: PlatformClient, port: u16) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            platform,
            port,
        }
    }

    /// Wire up every client from configuration.
    pub fn from_config(config: &Config, launcher: Arc<dyn BrowserLauncher>) -> Self {
        let identity = IdentityClient::new(config.identity.clone());
        let platform = PlatformClient::new(config.platform.clone());
        let bridge = SsoBridge::new(launcher, config.sso.clone(), platform.base_url());
        let pipeline = LoginPipeline::new(identity, bridge, platform.clone());
        Self::new(pipeline, platform, config.server.port)
    }
}

/// Error body with the status it should be sent with.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Validation messages go out bare; everything else gets the route prefix.
    fn from_error(prefix: &str, err: &Error) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match err {
            Error::Validation(message) => message.clone(),
            other => format!("{prefix}: {other}"),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/change-level", put(change_level))
        .route("/api/tasks", post(tasks))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "port": state.port }))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    const PREFIX: &str = "Erro no processo de login";

    let body = body_or_empty(payload);
    let credential = match (truthy_text(&body, "ra"), truthy_text(&body, "password")) {
        (Some(ra), Some(password)) => IdentityCredential::new(ra, password),
        _ => {
            return Err(ApiError::from_error(
                PREFIX,
                &Error::Validation(LOGIN_FIELDS_MESSAGE.to_string()),
            ))
        }
    };

    match state.pipeline.login(&credential).await {
        Ok(outcome) => Ok(Json(outcome.into_body())),
        Err(err) => {
            tracing::error!(route = "login", stage = err.kind(), error = %err, "request failed");
            Err(ApiError::from_error(PREFIX, &err))
        }
    }
}

async fn change_level(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    const PREFIX: &str = "Erro ao mudar de nível";

    let (tokens, selection) =
        downstream_context(&body_or_empty(payload)).map_err(|e| ApiError::from_error(PREFIX, &e))?;

    state
        .platform
        .change_level(&tokens, &selection)
        .await
        .map(Json)
        .map_err(|err| {
            tracing::error!(route = "change-level", error = %err, "request failed");
            ApiError::from_error(PREFIX, &err)
        })
}

async fn tasks(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    const PREFIX: &str = "Erro ao buscar tasks";

    let (tokens, selection) =
        downstream_context(&body_or_empty(payload)).map_err(|e| ApiError::from_error(PREFIX, &e))?;

    match state.platform.fetch_tasks(&tokens, &selection).await {
        Ok(Some(tasks)) => Ok(Json(json!({ "tasks": tasks }))),
        Ok(None) => Ok(Json(json!({}))),
        Err(err) => {
            tracing::error!(route = "tasks", error = %err, "request failed");
            Err(ApiError::from_error(PREFIX, &err))
        }
    }
}

/// Unreadable or non-object bodies count as having no fields.
fn body_or_empty(payload: Result<Json<Value>, JsonRejection>) -> Value {
    match payload {
        Ok(Json(body @ Value::Object(_))) => body,
        Ok(_) => json!({}),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "ignoring unreadable request body");
            json!({})
        }
    }
}

/// JavaScript truthiness: null, false, 0 and "" all count as missing.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn truthy_value(body: &Value, field: &str) -> Option<Value> {
    body.get(field).filter(|v| truthy(v)).cloned()
}

/// A truthy scalar rendered as text. Arrays and objects are rejected.
fn truthy_text(body: &Value, field: &str) -> Option<String> {
    match truthy_value(body, field)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Token pair and level selection from a change-level or tasks body.
fn downstream_context(body: &Value) -> Result<(SessionTokens, LevelSelection), Error> {
    let missing = || Error::Validation(DOWNSTREAM_FIELDS_MESSAGE.to_string());

    let level_id = truthy_value(body, "levelId").ok_or_else(missing)?;
    let course_id = truthy_value(body, "courseId").ok_or_else(missing)?;
    let access = truthy_text(body, ACCESS_TOKEN_FIELD).ok_or_else(missing)?;
    let account = truthy_text(body, ACCESS_ACCOUNT_FIELD).ok_or_else(missing)?;
    let tokens = SessionTokens::new(access, account).ok_or_else(missing)?;

    Ok((tokens, LevelSelection::new(course_id, level_id)))
}

//! Identity provider client: credential exchange and token upgrade.
//!
//! Both calls are single requests with no retry. The provider answers with
//! JSON carrying either the token or a `message` explaining the refusal.

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::IdentityConfig;
use crate::credentials::{AuthToken, IdentityCredential, UpgradedToken};
use crate::error::{Error, Result};

const REGISTRATION_PATH: &str = "/registration/edusp";
const TOKEN_GENERATE_PATH: &str = "/mas/external-auth/seducsp_token/generate";

/// Fields the provider may send back on either endpoint.
#[derive(Debug, Default, Deserialize)]
struct ProviderReply {
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the identity provider REST API.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: Client,
    config: IdentityConfig,
}

impl IdentityClient {
    pub fn new(config: IdentityConfig) -> Self {
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

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Exchange a user id and password for an identity auth token.
    pub async fn exchange_credentials(&self, credential: &IdentityCredential) -> Result<AuthToken> {
        #[derive(Serialize)]
        struct Request<'a> {
            realm: &'a str,
            platform: &'a str,
            id: &'a str,
            password: &'a str,
        }

        debug!(id = %credential.id, "exchanging credentials with identity provider");

        let response = self
            .client
            .post(self.url(REGISTRATION_PATH))
            .header("Content-Type", "application/json")
            .header("x-api-platform", &self.config.platform)
            .header("x-api-realm", &self.config.realm)
            .json(&Request {
                realm: &self.config.realm,
                platform: &self.config.platform,
                id: &credential.id,
                password: credential.secret(),
            })
            .send()
            .await
            .map_err(|e| Error::AuthExchange(e.to_string()))?;

        let (status, reply) = read_reply(response).await.map_err(Error::AuthExchange)?;
        if !status.is_success() {
            return Err(Error::AuthExchange(refusal_message(status, reply.message)));
        }

        let token = reply
            .auth_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                Error::AuthExchange(
                    reply
                        .message
                        .unwrap_or_else(|| "Token de autenticação não encontrado.".to_string()),
                )
            })?;

        info!(id = %credential.id, "identity provider accepted credentials");
        Ok(AuthToken::new(token))
    }

    /// Exchange an identity auth token for the client-scoped SSO token.
    pub async fn upgrade_token(&self, auth_token: &AuthToken) -> Result<UpgradedToken> {
        let response = self
            .client
            .get(self.url(TOKEN_GENERATE_PATH))
            .query(&[("card_label", self.config.card_label.as_str())])
            .header("Accept", "application/json")
            .header("x-api-key", auth_token.expose())
            .header("x-api-platform", &self.config.platform)
            .header("x-api-realm", &self.config.realm)
            .send()
            .await
            .map_err(|e| Error::TokenUpgrade(e.to_string()))?;

        let (status, reply) = read_reply(response).await.map_err(Error::TokenUpgrade)?;
        if !status.is_success() {
            return Err(Error::TokenUpgrade(refusal_message(status, reply.message)));
        }

        let token = reply.token.filter(|token| !token.is_empty()).ok_or_else(|| {
            Error::TokenUpgrade(
                reply
                    .message
                    .unwrap_or_else(|| "Token JWT não encontrado.".to_string()),
            )
        })?;

        info!(card = %self.config.card_label, "upgraded identity token");
        Ok(UpgradedToken::new(token))
    }
}

/// Read status and body. A non-JSON body on an error status still yields
/// the status, so the caller can fall back to the status text.
async fn read_reply(response: Response) -> std::result::Result<(StatusCode, ProviderReply), String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read identity provider response: {e}"))?;

    match serde_json::from_str::<ProviderReply>(&body) {
        Ok(reply) => Ok((status, reply)),
        Err(_) if !status.is_success() => Ok((status, ProviderReply::default())),
        Err(e) => Err(format!("Invalid identity provider response: {e}")),
    }
}

fn refusal_message(status: StatusCode, message: Option<String>) -> String {
    message
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string())
        })
}

//! The login pipeline: credentials in, session tokens and levels out.
//!
//! Stages run strictly in order and the first failure ends the attempt.
//! Nothing is retried and nothing is kept once the outcome is returned.

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::credentials::{IdentityCredential, SessionTokens};
use crate::error::Result;
use crate::identity::IdentityClient;
use crate::platform::PlatformClient;
use crate::sso::SsoBridge;

/// Wire names for the token pair.
pub const ACCESS_TOKEN_FIELD: &str = "efAccessToken";
pub const ACCESS_ACCOUNT_FIELD: &str = "efAccessAccount";

/// What a successful login hands back to the caller.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: SessionTokens,
    /// Levels listing as returned by the platform.
    pub levels: Value,
}

impl LoginOutcome {
    /// Response body: the levels payload with the token pair merged in.
    ///
    /// Object payloads are flattened into the body and the token fields
    /// always win. Any other payload lands under `levels`.
    pub fn into_body(self) -> Value {
        let mut body = match self.levels {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("levels".to_string(), other);
                map
            }
        };
        body.insert(
            ACCESS_TOKEN_FIELD.to_string(),
            Value::String(self.tokens.access().to_string()),
        );
        body.insert(
            ACCESS_ACCOUNT_FIELD.to_string(),
            Value::String(self.tokens.account().to_string()),
        );
        Value::Object(body)
    }
}

/// Runs credential exchange, token upgrade and the SSO bridge in sequence.
#[derive(Clone)]
pub struct LoginPipeline {
    identity: IdentityClient,
    bridge: SsoBridge,
    platform: PlatformClient,
}

impl LoginPipeline {
    pub fn new(identity: IdentityClient, bridge: SsoBridge, platform: PlatformClient) -> Self {
        Self {
            identity,
            bridge,
            platform,
        }
    }

    pub async fn login(&self, credential: &IdentityCredential) -> Result<LoginOutcome> {
        let started = Instant::now();
        let result = self.run(credential).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(id = %credential.id, elapsed_ms, "login completed"),
            Err(err) => warn!(
                id = %credential.id,
                elapsed_ms,
                stage = err.kind(),
                error = %err,
                "login failed"
            ),
        }
        result
    }

    async fn run(&self, credential: &IdentityCredential) -> Result<LoginOutcome> {
        let auth_token = self.identity.exchange_credentials(credential).await?;
        let upgraded = self.identity.upgrade_token(&auth_token).await?;
        drop(auth_token);

        let (tokens, levels) = self
            .bridge
            .establish(&upgraded, &self.platform.levels_query())
            .await?;

        Ok(LoginOutcome { tokens, levels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tokens() -> SessionTokens {
        SessionTokens::new("acc", "acct").unwrap()
    }

    #[test]
    fn object_levels_are_flattened() {
        let body = LoginOutcome {
            tokens: tokens(),
            levels: json!({"levels": [{"id": 1}], "currentLevel": 1}),
        }
        .into_body();

        assert_eq!(
            body,
            json!({
                "efAccessToken": "acc",
                "efAccessAccount": "acct",
                "levels": [{"id": 1}],
                "currentLevel": 1
            })
        );
    }

    #[test]
    fn token_fields_win_over_payload() {
        let body = LoginOutcome {
            tokens: tokens(),
            levels: json!({"efAccessToken": "spoofed"}),
        }
        .into_body();
        assert_eq!(body["efAccessToken"], "acc");
    }

    #[test]
    fn array_levels_are_nested() {
        let body = LoginOutcome {
            tokens: tokens(),
            levels: json!([{"id": 1}, {"id": 2}]),
        }
        .into_body();
        assert_eq!(body["levels"], json!([{"id": 1}, {"id": 2}]));
        assert_eq!(body["efAccessAccount"], "acct");
    }
}

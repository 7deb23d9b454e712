//! The access/account pair harvested from the SSO cookie.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Access token and account identifier for the platform's authenticated API.
///
/// Both fields are non-empty whenever a value of this type exists.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    access: String,
    account: String,
}

impl SessionTokens {
    /// Build a pair from caller-supplied values, rejecting empty fields.
    pub fn new(access: impl Into<String>, account: impl Into<String>) -> Option<Self> {
        let access = access.into();
        let account = account.into();
        if access.is_empty() || account.is_empty() {
            return None;
        }
        Some(Self { access, account })
    }

    /// Parse the raw `efid_tokens` cookie value.
    ///
    /// The value is percent-encoded JSON carrying at least `access` and
    /// `account`. Anything short of both fields being non-empty strings
    /// is an error.
    pub fn from_cookie_value(raw: &str) -> Result<Self> {
        let decoded = urlencoding::decode(raw)
            .map_err(|e| Error::SessionParse(format!("cookie is not valid UTF-8: {e}")))?;

        let payload: Value = serde_json::from_str(&decoded)
            .map_err(|e| Error::SessionParse(format!("cookie is not valid JSON: {e}")))?;

        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match (field("access"), field("account")) {
            (Some(access), Some(account)) => Ok(Self { access, account }),
            (None, _) => Err(Error::SessionParse("missing access token".to_string())),
            (_, None) => Err(Error::SessionParse("missing account".to_string())),
        }
    }

    pub fn access(&self) -> &str {
        &self.access
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access)
    }
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

//! Credentials flowing through a login.
//!
//! Everything issued before the session cookie is read is held as a
//! [`SecretString`] so it cannot end up in logs by accident. The
//! [`SessionTokens`] pair is the only artifact handed back to callers.

mod session;

pub use session::SessionTokens;

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// A user identifier (`ra`) and password, as supplied by the caller.
pub struct IdentityCredential {
    pub id: String,
    secret: SecretString,
}

impl IdentityCredential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        let secret: String = secret.into();
        Self {
            id: id.into(),
            secret: SecretString::from(secret),
        }
    }

    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCredential")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Short-lived token issued by the identity provider's registration endpoint.
#[derive(Debug)]
pub struct AuthToken(SecretString);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self(SecretString::from(token))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Client-scoped signed token used as the SSO hint.
#[derive(Debug)]
pub struct UpgradedToken(SecretString);

impl UpgradedToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token: String = token.into();
        Self(SecretString::from(token))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

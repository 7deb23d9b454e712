use std::time::Duration;

/// Every way a bridged request can fail.
///
/// Most pipeline variants surface as a 500 on the wire, but they stay
/// distinct so logs and tests can tell the stages apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or empty caller-supplied fields.
    #[error("{0}")]
    Validation(String),

    /// The identity provider rejected the credential exchange.
    #[error("{0}")]
    AuthExchange(String),

    /// The identity provider refused to issue the client-scoped token.
    #[error("{0}")]
    TokenUpgrade(String),

    /// The browser could not be launched or driven.
    #[error("Falha no navegador: {0}")]
    Browser(String),

    #[error("Tempo limite de navegação excedido ({}s)", .0.as_secs())]
    NavigationTimeout(Duration),

    #[error("Cookie '{0}' não encontrado. Login SSO falhou.")]
    SsoCookieMissing(String),

    #[error("Não foi possível obter tokens EF: {0}")]
    SessionParse(String),

    /// The in-browser levels query failed.
    #[error("{0}")]
    LevelsQuery(String),

    /// A platform REST call failed. `status` is absent when no response arrived.
    #[error("{message}")]
    Downstream { status: Option<u16>, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status this error maps to on the wire.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Downstream {
                status: Some(status),
                ..
            } => *status,
            _ => 500,
        }
    }

    /// Short tag naming the failing stage, for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::AuthExchange(_) => "auth_exchange",
            Error::TokenUpgrade(_) => "token_upgrade",
            Error::Browser(_) => "browser",
            Error::NavigationTimeout(_) => "navigation_timeout",
            Error::SsoCookieMissing(_) => "sso_cookie_missing",
            Error::SessionParse(_) => "session_parse",
            Error::LevelsQuery(_) => "levels_query",
            Error::Downstream { .. } => "downstream",
        }
    }
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::duration::deserialize_duration;

const DEFAULT_PORT: u16 = 3000;

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Identity provider (credential exchange and token upgrade).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub base_url: String,
    pub realm: String,
    pub platform: String,
    /// Client card the upgraded token is scoped to.
    pub card_label: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: "https://edusp-api.ip.tv".to_string(),
            realm: "edusp".to_string(),
            platform: "webclient".to_string(),
            card_label: "SPeak".to_string(),
        }
    }
}

/// Learning platform REST API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub base_url: String,
    pub locale: String,
    pub client_timezone: String,

    /// Timeout for the direct REST calls (change level, tasks).
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "https://learn.corporate.ef.com".to_string(),
            locale: "en".to_string(),
            client_timezone: "America/Sao_Paulo".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// OAuth2/SSO initiation parameters and handshake timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    pub state: String,
    pub initiator: String,
    pub prompt: String,
    pub domain_hint: String,
    pub partner_code: String,

    /// Cookie the redirect chain deposits the session payload in.
    pub cookie_name: String,

    /// Upper bound for navigating and reaching network idle.
    #[serde(deserialize_with = "deserialize_duration")]
    pub navigation_timeout: Duration,

    /// How long the network must stay quiet to count as idle.
    #[serde(deserialize_with = "deserialize_duration")]
    pub network_idle: Duration,

    /// How long to keep polling the cookie jar after navigation settles.
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle_timeout: Duration,

    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            state: "/".to_string(),
            initiator: "SCHOOL_WEB".to_string(),
            prompt: "login".to_string(),
            domain_hint: "saopaulo".to_string(),
            partner_code: "SANP-J04NSMP9".to_string(),
            cookie_name: "efid_tokens".to_string(),
            navigation_timeout: Duration::from_secs(120),
            network_idle: Duration::from_millis(500),
            settle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Headless browser launch settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chrome/Chromium binary. Auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Pass `--no-sandbox`, needed in most containers.
    pub no_sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            no_sandbox: true,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub identity: IdentityConfig,
    pub platform: PlatformConfig,
    pub sso: SsoConfig,
    pub browser: BrowserConfig,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply process environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// `SERVER_PORT` wins over `PORT`. `CHROME_EXECUTABLE_PATH` wins over
    /// `PUPPETEER_EXECUTABLE_PATH`. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = non_empty("SERVER_PORT").or_else(|| non_empty("PORT")) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid port in environment: {port:?}"))?;
        }

        if let Some(path) =
            non_empty("CHROME_EXECUTABLE_PATH").or_else(|| non_empty("PUPPETEER_EXECUTABLE_PATH"))
        {
            self.browser.executable = Some(PathBuf::from(path));
        }

        Ok(())
    }
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./efbridge.toml` if it exists in current directory
/// 2. `~/.config/efbridge/efbridge.toml` (XDG config directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("efbridge.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("efbridge").join("efbridge.toml");
    }

    local_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_wire_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.identity.card_label, "SPeak");
        assert_eq!(config.sso.cookie_name, "efid_tokens");
        assert_eq!(config.sso.partner_code, "SANP-J04NSMP9");
        assert_eq!(config.sso.navigation_timeout, Duration::from_secs(120));
        assert_eq!(config.platform.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [sso]
            settle_timeout = "2s"
            poll_interval = "100ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.sso.settle_timeout, Duration::from_secs(2));
        assert_eq!(config.sso.poll_interval, Duration::from_millis(100));
        assert_eq!(config.sso.initiator, "SCHOOL_WEB");
    }

    #[test]
    fn server_port_wins_over_port() {
        let env: HashMap<&str, &str> = [("SERVER_PORT", "4000"), ("PORT", "5000")].into();
        let mut config = Config::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let env: HashMap<&str, &str> = [("SERVER_PORT", ""), ("PORT", "5000")].into();
        let mut config = Config::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 5000);
        assert!(config.browser.executable.is_none());
    }

    #[test]
    fn invalid_port_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_env_with(|k| (k == "PORT").then(|| "abc".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn legacy_executable_variable_is_honored() {
        let mut config = Config::default();
        config
            .apply_env_with(|k| {
                (k == "PUPPETEER_EXECUTABLE_PATH").then(|| "/usr/bin/chromium".to_string())
            })
            .unwrap();
        assert_eq!(
            config.browser.executable,
            Some(PathBuf::from("/usr/bin/chromium"))
        );
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("efbridge.toml");
        std::fs::write(&path, "[platform]\nlocale = \"pt\"\n").unwrap();

        let config = Config::load_or_default(&path).unwrap();
        assert_eq!(config.platform.locale, "pt");

        let missing = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(missing.platform.locale, "en");
    }
}

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_GAMES_KEY: &str = "games_data";
pub const DEFAULT_STEAM_API_BASE: &str = "https://store.steampowered.com";

/// Where the games document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackendKind {
    Memory,
    File(PathBuf),
    Redis(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,

    // Admin
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub api_secret: Option<String>,

    // Store
    pub store: StoreBackendKind,
    pub games_key: String,
    pub seed_defaults: bool,
    pub store_timeout: Duration,

    // Metadata lookup
    pub steam_lookup: bool,
    pub steam_api_base: String,
    pub steam_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            admin_username: None,
            admin_password: None,
            api_secret: None,
            store: StoreBackendKind::Memory,
            games_key: DEFAULT_GAMES_KEY.to_string(),
            seed_defaults: false,
            store_timeout: Duration::from_millis(2_000),
            steam_lookup: true,
            steam_api_base: DEFAULT_STEAM_API_BASE.to_string(),
            steam_timeout: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let store = match (get("REDIS_URL"), get("PERSIST_PATH")) {
            (Some(url), _) => StoreBackendKind::Redis(url),
            (None, Some(path)) => StoreBackendKind::File(PathBuf::from(path)),
            (None, None) => StoreBackendKind::Memory,
        };

        Ok(Config {
            host: get("HOST").unwrap_or(defaults.host),
            port: match get("PORT") {
                Some(port) => port.trim().parse().context("PORT must be a port number")?,
                None => defaults.port,
            },
            admin_username: get("ADMIN_USERNAME"),
            admin_password: get("ADMIN_PASSWORD"),
            api_secret: get("API_SECRET"),
            store,
            games_key: get("GAMES_KEY").unwrap_or(defaults.games_key),
            seed_defaults: get("SEED_DEFAULTS").map_or(defaults.seed_defaults, |v| flag(&v)),
            store_timeout: match get("STORE_TIMEOUT_MS") {
                Some(ms) => Duration::from_millis(
                    ms.trim()
                        .parse()
                        .context("STORE_TIMEOUT_MS must be a number of milliseconds")?,
                ),
                None => defaults.store_timeout,
            },
            steam_lookup: get("STEAM_LOOKUP").map_or(defaults.steam_lookup, |v| flag(&v)),
            steam_api_base: get("STEAM_API_BASE").unwrap_or(defaults.steam_api_base),
            steam_timeout: match get("STEAM_TIMEOUT_MS") {
                Some(ms) => Duration::from_millis(
                    ms.trim()
                        .parse()
                        .context("STEAM_TIMEOUT_MS must be a number of milliseconds")?,
                ),
                None => defaults.steam_timeout,
            },
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.games_key.trim().is_empty() {
            anyhow::bail!("GAMES_KEY is empty");
        }
        if self.signing_secret().is_none() {
            tracing::warn!("Neither API_SECRET nor ADMIN_PASSWORD is set; admin login is disabled");
        }
        if self.admin_username.is_none() {
            tracing::warn!("ADMIN_USERNAME is not set; any username is accepted at login");
        }
        if matches!(self.store, StoreBackendKind::Redis(_)) && self.store_timeout.is_zero() {
            tracing::warn!("STORE_TIMEOUT_MS is 0; every redis call will time out");
        }
        if self.steam_lookup && self.steam_timeout.is_zero() {
            tracing::warn!("STEAM_TIMEOUT_MS is 0; every metadata lookup will time out");
        }
        Ok(())
    }

    /// Token signing key: `API_SECRET`, falling back to the admin password.
    pub fn signing_secret(&self) -> Option<String> {
        self.api_secret.clone().or_else(|| self.admin_password.clone())
    }

    /// Password expected at login: the admin password, else the signing secret.
    pub fn login_password(&self) -> Option<&str> {
        self.admin_password
            .as_deref()
            .or(self.api_secret.as_deref())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn flag(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_memory_store() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.store, StoreBackendKind::Memory);
        assert_eq!(config.games_key, DEFAULT_GAMES_KEY);
        assert_eq!(config.port, 3000);
        assert!(config.steam_lookup);
        assert!(!config.seed_defaults);
        assert_eq!(config.signing_secret(), None);
    }

    #[test]
    fn redis_wins_over_file() {
        let config = config_from(&[
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("PERSIST_PATH", "/tmp/games.json"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreBackendKind::Redis("redis://127.0.0.1/".into()));

        let config = config_from(&[("REDIS_URL", "  "), ("PERSIST_PATH", "/tmp/games.json")]).unwrap();
        assert_eq!(config.store, StoreBackendKind::File("/tmp/games.json".into()));
    }

    #[test]
    fn signing_secret_falls_back_to_admin_password() {
        let config = config_from(&[("ADMIN_PASSWORD", "pw")]).unwrap();
        assert_eq!(config.signing_secret().as_deref(), Some("pw"));
        assert_eq!(config.login_password(), Some("pw"));

        let config = config_from(&[("ADMIN_PASSWORD", "pw"), ("API_SECRET", "sig")]).unwrap();
        assert_eq!(config.signing_secret().as_deref(), Some("sig"));
        assert_eq!(config.login_password(), Some("pw"));
    }

    #[test]
    fn parses_flags_and_numbers() {
        let config = config_from(&[
            ("SEED_DEFAULTS", "Yes"),
            ("STEAM_LOOKUP", "off"),
            ("STEAM_TIMEOUT_MS", "250"),
            ("STORE_TIMEOUT_MS", "750"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert!(config.seed_defaults);
        assert!(!config.steam_lookup);
        assert_eq!(config.steam_timeout, Duration::from_millis(250));
        assert_eq!(config.store_timeout, Duration::from_millis(750));
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("STORE_TIMEOUT_MS", "soon")]).is_err());
    }
}

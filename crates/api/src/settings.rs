//! Server configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! TOML file (`config/budget-tracker.toml` or `$BUDGET_CONFIG`), then
//! `BUDGET__*` environment variables, e.g. `BUDGET__SERVER__PORT=9000`.

use alerting::AlertConfig;
use auth::SharedKey;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/budget-tracker";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub alerts: AlertConfig,
    pub auth: AuthSettings,
    pub logging: LoggingSettings,
    /// First tenant created at startup when the repository is empty
    pub bootstrap: Option<BootstrapSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Lifetime of cached reference lists
    pub ttl_seconds: u64,
    /// How often expired entries are swept
    pub purge_interval_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 3,
            purge_interval_seconds: 60,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub session_ttl_hours: i64,
    /// Key the identity provider presents in `x-issuer-key` when opening
    /// sessions. Unset disables `POST /sessions`.
    pub issuer_key: Option<String>,
    /// Key required in `x-operator-key` to clear the cache of every
    /// organization
    pub operator_key: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_ttl_hours: auth::DEFAULT_SESSION_TTL_HOURS,
            issuer_key: None,
            operator_key: None,
        }
    }
}

impl AuthSettings {
    pub fn issuer_key(&self) -> Option<SharedKey> {
        self.issuer_key.as_deref().and_then(SharedKey::new)
    }

    pub fn operator_key(&self) -> Option<SharedKey> {
        self.operator_key.as_deref().and_then(SharedKey::new)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info,tower_http=info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapSettings {
    pub organization: String,
    pub admin_email: String,
    pub admin_name: String,
}

impl Settings {
    /// Load settings from the config file and environment
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("BUDGET_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("BUDGET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.address(), "0.0.0.0:8080");
        assert_eq!(settings.cache.ttl(), Duration::from_secs(3));
        assert_eq!(settings.alerts.expiry_window_days, 30);
        assert_eq!(settings.alerts.max_per_category, 5);
        assert!(settings.bootstrap.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does/not/exist").unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.auth.session_ttl_hours, 12);
    }

    #[test]
    fn test_purge_interval_is_never_zero() {
        let cache = CacheSettings {
            ttl_seconds: 3,
            purge_interval_seconds: 0,
        };
        assert_eq!(cache.purge_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_blank_keys_are_unset() {
        let auth = AuthSettings {
            issuer_key: Some("  ".to_string()),
            operator_key: Some("ops".to_string()),
            ..AuthSettings::default()
        };
        assert!(auth.issuer_key().is_none());
        assert!(auth.operator_key().is_some_and(|key| key.matches("ops")));
        assert!(AuthSettings::default().issuer_key().is_none());
    }
}

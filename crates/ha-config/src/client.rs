//! Connection and cache settings for the control client

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration file name inside the configuration directory
pub const CONFIG_FILE: &str = "ha-control.yaml";

/// Environment variable overriding `url`
pub const ENV_URL: &str = "HA_URL";

/// Environment variable overriding `token`
pub const ENV_TOKEN: &str = "HA_TOKEN";

/// Settings as written in the file, all optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    url: Option<String>,
    token: Option<String>,
    cache_ttl_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    confirm_writes: Option<bool>,
    settle_delay_ms: Option<u64>,
}

/// Resolved client configuration
///
/// Precedence is environment, then file, then defaults.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Home Assistant instance
    pub url: String,
    /// Long-lived access token
    pub token: SecretString,
    /// How long a fetched snapshot stays fresh
    pub cache_ttl: Duration,
    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
    /// Read entities back after each command
    pub confirm_writes: bool,
    /// Wait between a command and its read-back
    pub settle_delay: Duration,
}

impl ClientConfig {
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

    /// Configuration with defaults for everything but the connection
    pub fn new(url: impl Into<String>, token: SecretString) -> Self {
        Self {
            url: url.into(),
            token,
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            confirm_writes: true,
            settle_delay: Self::DEFAULT_SETTLE_DELAY,
        }
    }

    /// Load from `config_dir` using the process environment
    ///
    /// The file is optional when `HA_URL` and `HA_TOKEN` are both set.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        Self::load_with(config_dir, YamlLoader::new(config_dir)?)
    }

    /// Load from `config_dir` with a prepared loader
    pub fn load_with(config_dir: &Path, loader: YamlLoader) -> ConfigResult<Self> {
        let path = config_dir.join(CONFIG_FILE);
        let raw = if path.exists() {
            let value = loader.load_file(&path)?;
            if value.is_null() {
                RawConfig::default()
            } else {
                serde_yaml::from_value(value).map_err(|source| ConfigError::ParseYaml {
                    path: path.clone(),
                    source,
                })?
            }
        } else {
            debug!(path = %path.display(), "No configuration file, using environment only");
            RawConfig::default()
        };

        let config = Self::resolve(raw, &loader)?;
        info!(url = %config.url, ttl_secs = config.cache_ttl.as_secs(), "Configuration loaded");
        Ok(config)
    }

    fn resolve(raw: RawConfig, loader: &YamlLoader) -> ConfigResult<Self> {
        let url = loader
            .env_var(ENV_URL)
            .or(raw.url)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| missing("url", ENV_URL))?;
        let token = loader
            .env_var(ENV_TOKEN)
            .or(raw.token)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| missing("token", ENV_TOKEN))?;

        let cache_ttl = raw
            .cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_CACHE_TTL);
        if cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "cache_ttl_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let request_timeout = raw
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(Self::DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            url,
            token: SecretString::from(token),
            cache_ttl,
            request_timeout,
            confirm_writes: raw.confirm_writes.unwrap_or(true),
            settle_delay: raw
                .settle_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(Self::DEFAULT_SETTLE_DELAY),
        })
    }
}

fn missing(key: &str, env: &str) -> ConfigError {
    ConfigError::MissingValue {
        key: key.to_string(),
        file: CONFIG_FILE.to_string(),
        env: env.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Secrets;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn loader_with_env(dir: &Path, env: &[(&str, &str)]) -> YamlLoader {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        YamlLoader::with_secrets(Secrets::load(dir).unwrap()).with_env(move |var| env.get(var).cloned())
    }

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_load_full_file_with_secret() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "secrets.yaml", "ha_token: abc123\n");
        write(
            dir.path(),
            CONFIG_FILE,
            r#"
url: homeassistant.local:8123
token: !secret ha_token
cache_ttl_secs: 60
request_timeout_secs: 5
confirm_writes: false
settle_delay_ms: 250
"#,
        );

        let config = ClientConfig::load_with(dir.path(), loader_with_env(dir.path(), &[])).unwrap();
        assert_eq!(config.url, "homeassistant.local:8123");
        assert_eq!(config.token.expose_secret(), "abc123");
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(!config.confirm_writes);
        assert_eq!(config.settle_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "url: http://ha:8123\ntoken: t\n");

        let config = ClientConfig::load_with(dir.path(), loader_with_env(dir.path(), &[])).unwrap();
        assert_eq!(config.cache_ttl, ClientConfig::DEFAULT_CACHE_TTL);
        assert_eq!(config.request_timeout, ClientConfig::DEFAULT_REQUEST_TIMEOUT);
        assert!(config.confirm_writes);
        assert_eq!(config.settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "url: http://file:8123\ntoken: file-token\n");

        let loader = loader_with_env(dir.path(), &[(ENV_URL, "http://env:8123"), (ENV_TOKEN, "env-token")]);
        let config = ClientConfig::load_with(dir.path(), loader).unwrap();
        assert_eq!(config.url, "http://env:8123");
        assert_eq!(config.token.expose_secret(), "env-token");
    }

    #[test]
    fn test_environment_only() {
        let dir = TempDir::new().unwrap();
        let loader = loader_with_env(dir.path(), &[(ENV_URL, "ha.local"), (ENV_TOKEN, "t")]);
        let config = ClientConfig::load_with(dir.path(), loader).unwrap();
        assert_eq!(config.url, "ha.local");
    }

    #[test]
    fn test_missing_token() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "url: http://ha:8123\n");

        let err = ClientConfig::load_with(dir.path(), loader_with_env(dir.path(), &[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue { ref key, .. } if key == "token"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "url: u\ntoken: t\ncache_ttl_secs: 0\n");

        let err = ClientConfig::load_with(dir.path(), loader_with_env(dir.path(), &[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "cache_ttl_secs"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), CONFIG_FILE, "url: u\ntoken: t\nttl: 5\n");

        let err = ClientConfig::load_with(dir.path(), loader_with_env(dir.path(), &[])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseYaml { .. }));
    }

    #[test]
    fn test_debug_hides_token() {
        let config = ClientConfig::new("http://ha", SecretString::from("hidden-token".to_string()));
        assert!(!format!("{config:?}").contains("hidden-token"));
    }
}

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::services::retention_service::{RetentionPolicy, DEFAULT_RETENTION};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub retention: RetentionSection,
    pub alerts: AlertsSection,
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("backups.db"),
        }
    }
}

/// Empty token disables the check entirely.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthSection {
    pub api_token: String,
}

/// Retention counts keyed by storage-target name. Values are kept as raw
/// TOML so a misconfigured entry degrades to the default for that target
/// instead of failing the whole config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSection {
    pub default: i64,
    #[serde(flatten)]
    pub rules: HashMap<String, toml::Value>,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            default: DEFAULT_RETENTION,
            rules: HashMap::new(),
        }
    }
}

impl RetentionSection {
    pub fn policy(&self) -> RetentionPolicy {
        let mut resolved = HashMap::new();
        for (target, value) in &self.rules {
            match parse_count(value) {
                Some(count) => {
                    resolved.insert(target.clone(), count);
                }
                None => {
                    warn!(
                        target = %target,
                        value = %value,
                        default = self.default,
                        "unparseable retention count, using default"
                    );
                }
            }
        }
        RetentionPolicy::with_rules(self.default, resolved)
    }
}

fn parse_count(value: &toml::Value) -> Option<i64> {
    match value {
        toml::Value::Integer(i) => Some(*i),
        toml::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AlertsSection {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub summaries_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            summaries_ttl_secs: 30,
        }
    }
}

impl AppConfig {
    /// Reads the TOML config. A missing file is not an error: the service
    /// runs on defaults, mirroring how deployments start before any policy
    /// is written.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment variables override file values.
    pub fn apply_env(&mut self) {
        if let Ok(db) = env::var("MONITOR_DB") {
            if !db.is_empty() {
                self.database.path = PathBuf::from(db);
            }
        }
        if let Ok(token) = env::var("MONITOR_API_TOKEN") {
            self.auth.api_token = token.trim().to_string();
        }
        if let Ok(addr) = env::var("LISTEN_ADDR") {
            if !addr.is_empty() {
                self.server.listen_addr = addr;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            listen_addr = "127.0.0.1:8080"

            [database]
            path = "/var/lib/proxmon/backups.db"

            [auth]
            api_token = "secret"

            [retention]
            default = 14
            nas1 = 7
            tape = "60"
            broken = "lots"

            [alerts]
            webhook_url = "https://hooks.example/alert"

            [cache]
            summaries_ttl_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(cfg.auth.api_token, "secret");
        assert_eq!(cfg.cache.summaries_ttl_secs, 10);

        let policy = cfg.retention.policy();
        assert_eq!(policy.limit_for("NAS1"), 7);
        assert_eq!(policy.limit_for("tape"), 60);
        // Unparseable value falls back to the section default.
        assert_eq!(policy.limit_for("broken"), 14);
        assert_eq!(policy.limit_for("unlisted"), 14);
    }

    #[test]
    fn defaults_when_sections_are_missing() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.listen_addr, "0.0.0.0:5000");
        assert_eq!(cfg.auth.api_token, "");
        assert_eq!(cfg.retention.default, DEFAULT_RETENTION);
        assert!(cfg.alerts.webhook_url.is_none());
        assert_eq!(cfg.cache.summaries_ttl_secs, 30);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/proxmon.toml")).unwrap();
        assert_eq!(cfg.retention.default, DEFAULT_RETENTION);
    }
}

//! Configuration loading and persistence.
//!
//! Reads and writes the client configuration file. The session token is never
//! written to disk; it comes from `SECVISION_TOKEN` or the command line.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::{ChatSettings, Endpoint, ReconnectPolicy};
use crate::constants::{
    DEFAULT_WS_HOST, DEFAULT_WS_PORT, KEEPALIVE_INTERVAL, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_DELAY_MS,
};
use crate::protocol::PeerId;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the realtime chat client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Host of the realtime server.
    pub ws_host: String,
    /// Port of the realtime server.
    pub ws_port: u16,
    /// Use `wss://`.
    pub secure: bool,
    /// Profile to connect as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perfil_id: Option<PeerId>,
    /// Session token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Automatic reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Base reconnection delay in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Cap for a single reconnection delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Seconds between keepalive pings; 0 disables them.
    pub keepalive_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_host: DEFAULT_WS_HOST.to_string(),
            ws_port: DEFAULT_WS_PORT,
            secure: false,
            perfil_id: None,
            token: String::new(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: RECONNECT_BASE_DELAY_MS,
            reconnect_max_delay_ms: RECONNECT_MAX_DELAY_MS,
            keepalive_interval_secs: KEEPALIVE_INTERVAL.as_secs(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `SECVISION_CONFIG_DIR` overrides the platform config directory
    /// (`~/.config/secvision` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("SECVISION_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("secvision")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from_path(&path).unwrap_or_else(|e| {
            log::debug!("[Config] Using defaults: {:#}", e);
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads a configuration file without applying overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `SECVISION_*` overrides using `lookup` to read variables.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SECVISION_WS_HOST") {
            self.ws_host = host;
        }

        if let Some(port) = lookup("SECVISION_WS_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.ws_port = port,
                Err(_) => log::warn!("[Config] Ignoring invalid SECVISION_WS_PORT={}", port),
            }
        }

        if let Some(secure) = lookup("SECVISION_WS_SECURE") {
            self.secure = matches!(secure.as_str(), "1" | "true" | "yes");
        }

        if let Some(perfil) = lookup("SECVISION_PERFIL_ID") {
            match perfil.parse::<PeerId>() {
                Ok(id) => self.perfil_id = Some(id),
                Err(_) => log::warn!("[Config] Ignoring invalid SECVISION_PERFIL_ID={}", perfil),
            }
        }

        // Token from env var only
        if let Some(token) = lookup("SECVISION_TOKEN") {
            self.token = token;
        }
    }

    /// Persists the current configuration to the config directory.
    /// Note: the token is NOT saved.
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Writes the configuration to `path` with owner-only permissions.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Realtime server address.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.ws_host.clone(),
            port: self.ws_port,
            secure: self.secure,
        }
    }

    /// Backoff used after the socket drops.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
        }
    }

    /// Settings handed to [`ChatService::new`](crate::chat::ChatService::new).
    #[must_use]
    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            endpoint: self.endpoint(),
            reconnect: self.reconnect_policy(),
        }
    }

    /// Keepalive period, or `None` when disabled.
    #[must_use]
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0)
            .then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Whether a session token is configured.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ws_host, "localhost");
        assert_eq!(config.ws_port, 8000);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.keepalive_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.chat_settings(), ChatSettings::default());
    }

    #[test]
    fn test_config_serialization_excludes_token() {
        let config = Config {
            token: "secret_token".to_string(),
            ..Config::default()
        };
        let json = serde_json::to_string(&config).unwrap();

        assert!(!json.contains("secret_token"));
        assert!(!json.contains("\"token\""));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"ws_host":"10.0.0.5","perfil_id":"12"}"#).unwrap();
        assert_eq!(config.ws_host, "10.0.0.5");
        assert_eq!(config.perfil_id, Some(PeerId(12)));
        assert_eq!(config.ws_port, 8000);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            ws_host: "vision.local".to_string(),
            perfil_id: Some(PeerId(3)),
            token: "not-saved".to_string(),
            ..Config::default()
        };

        config.save_to_path(&path).unwrap();
        let loaded = Config::load_from_path(&path).unwrap();

        assert_eq!(loaded.ws_host, "vision.local");
        assert_eq!(loaded.perfil_id, Some(PeerId(3)));
        assert!(loaded.token.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_restricts_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        Config::default().save_to_path(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_path(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("SECVISION_WS_HOST", "192.168.1.20"),
            ("SECVISION_WS_PORT", "9000"),
            ("SECVISION_WS_SECURE", "true"),
            ("SECVISION_PERFIL_ID", "7"),
            ("SECVISION_TOKEN", "abc"),
        ]));

        assert_eq!(
            config.endpoint().url(PeerId(7), &config.token),
            "wss://192.168.1.20:9000/ws/notificaciones/7/?token=abc"
        );
        assert_eq!(config.perfil_id, Some(PeerId(7)));
        assert!(config.has_token());
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("SECVISION_WS_PORT", "not-a-port"),
            ("SECVISION_PERFIL_ID", "abc"),
        ]));

        assert_eq!(config.ws_port, 8000);
        assert_eq!(config.perfil_id, None);
    }

    #[test]
    fn test_keepalive_zero_disables() {
        let config = Config {
            keepalive_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.keepalive_interval(), None);
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let config = Config {
            max_reconnect_attempts: 2,
            reconnect_base_delay_ms: 100,
            reconnect_max_delay_ms: 250,
            ..Config::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
    }
}

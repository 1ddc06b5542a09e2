//! Configuration management for Campus Chat

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "chat.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub server: ServerConfig,
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Path prefix of the REST API, e.g. "/api".
    pub api_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub notification_timeout_ms: u64,
    pub refresh_debounce_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            use_tls: false,
            api_prefix: "/api".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            notification_timeout_ms: 5_000,
            refresh_debounce_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl ChatConfig {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(data_dir)?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(data_dir.join(CONFIG_FILE), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::Config("server.host is empty".to_string()));
        }
        url::Url::parse(&self.http_url())?;
        url::Url::parse(&self.ws_url())?;
        Ok(())
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.server.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server.host, self.server.port)
    }

    pub fn ws_url(&self) -> String {
        let scheme = if self.server.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}/ws", scheme, self.server.host, self.server.port)
    }

    /// Base URL for REST calls, including the API prefix.
    pub fn api_url(&self) -> String {
        let prefix = self.server.api_prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix.starts_with('/') {
            format!("{}{}", self.http_url(), prefix)
        } else {
            format!("{}/{}", self.http_url(), prefix)
        }
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.notification_timeout_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.refresh_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timing.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let mut config = ChatConfig::default();
        config.server.host = "lms.example.org".to_string();
        config.server.port = 8443;
        config.server.use_tls = true;

        assert_eq!(config.http_url(), "https://lms.example.org:8443");
        assert_eq!(config.ws_url(), "wss://lms.example.org:8443/ws");
        assert_eq!(config.api_url(), "https://lms.example.org:8443/api");

        config.server.api_prefix = "v2/".to_string();
        assert_eq!(config.api_url(), "https://lms.example.org:8443/v2");
    }

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.notification_timeout(), Duration::from_secs(5));
        assert_eq!(config.refresh_debounce(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ChatConfig =
            serde_json::from_str(r#"{ "server": { "host": "10.0.0.2" } }"#).unwrap();
        assert_eq!(config.server.host, "10.0.0.2");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.timing.refresh_debounce_ms, 500);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("campus-chat-{}", uuid::Uuid::new_v4()));
        let mut config = ChatConfig::default();
        config.timing.notification_timeout_ms = 3_000;
        config.save(&dir).unwrap();

        let loaded = ChatConfig::load(&dir).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_host_rejected() {
        let mut config = ChatConfig::default();
        config.server.host = "  ".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}

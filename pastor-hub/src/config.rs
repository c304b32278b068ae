use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pastor_core::FarmId;
use serde::Deserialize;
use thiserror::Error;

use crate::cooldown::CooldownMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub mqtt: Option<MqttConfig>,
    pub push: PushConfig,
    pub ingest: IngestConfig,
    pub cooldown: CooldownConfig,
    pub orders: OrdersConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 10001)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM bundle; enables TLS when set.
    pub ca_cert: Option<PathBuf>,
    pub keep_alive_secs: u64,
    pub subscribe: Vec<String>,
    pub reconnect_delay_secs: u64,
    pub connect_timeout_secs: u64,
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            client_id: "pastor-hub".to_string(),
            username: None,
            password: None,
            ca_cert: None,
            keep_alive_secs: 30,
            subscribe: vec!["nodes/#".to_string()],
            reconnect_delay_secs: 5,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub kind: PushKind,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub topic: String,
    pub title: String,
    pub timeout_secs: u64,
}

impl PushConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            kind: PushKind::Log,
            endpoint: None,
            token: None,
            topic: "alerts_all".to_string(),
            title: "oPastor Alerta".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub default_farm_id: Option<FarmId>,
    pub breach_contact_phone: Option<String>,
    pub batch_timeout_secs: u64,
    pub treat_missing_as_inside: bool,
}

impl IngestConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_farm_id: None,
            breach_contact_phone: None,
            batch_timeout_secs: 30,
            treat_missing_as_inside: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub mode: CooldownMode,
    pub window_secs: u64,
}

impl CooldownConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            mode: CooldownMode::Enforce,
            window_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    pub dedupe_window_secs: u64,
}

impl OrdersConfig {
    pub fn dedupe_window(&self) -> Duration {
        Duration::from_secs(self.dedupe_window_secs)
    }
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            dedupe_window_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(matches!(config.registry, RegistryConfig::Memory));
        assert!(config.mqtt.is_none());
        assert_eq!(config.cooldown.mode, CooldownMode::Enforce);
        assert_eq!(config.cooldown.window(), Duration::from_secs(600));
        assert_eq!(config.orders.dedupe_window(), Duration::from_secs(600));
        assert!(config.ingest.treat_missing_as_inside);
    }

    #[test]
    fn full_file() {
        let config = Config::parse(
            r#"
            [server]
            http_addr = "127.0.0.1:8080"

            [registry]
            type = "sqlite"
            path = "/var/lib/pastor/hub.db"

            [mqtt]
            host = "broker.example.net"
            username = "hub"
            password = "secret"

            [push]
            kind = "http"
            endpoint = "https://push.example.net/send"
            timeout_secs = 3

            [ingest]
            default_farm_id = "9d97817a-4c54-4c1b-9f83-92df8fa1737a"
            breach_contact_phone = "+351000000000"

            [cooldown]
            mode = "pass_through"
            window_secs = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.server.http_addr.port(), 8080);
        assert!(matches!(config.registry, RegistryConfig::Sqlite { .. }));

        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.port, 8883);
        assert_eq!(mqtt.subscribe, vec!["nodes/#".to_string()]);
        assert_eq!(mqtt.reconnect_delay(), Duration::from_secs(5));

        assert!(matches!(config.push.kind, PushKind::Http));
        assert_eq!(config.push.timeout(), Duration::from_secs(3));
        assert_eq!(
            config.ingest.default_farm_id,
            Some(FarmId::from("9d97817a-4c54-4c1b-9f83-92df8fa1737a"))
        );
        assert_eq!(config.cooldown.mode, CooldownMode::PassThrough);
        assert_eq!(config.cooldown.window_secs, 120);
    }
}

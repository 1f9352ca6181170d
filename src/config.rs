use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Port every node listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 2048;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Name this node is known by in the host table.
    pub host_name: String,
    pub bind_ip: String,
    pub port: u16,
    /// Peers known at startup, in addition to ourselves.
    pub hosts: Vec<String>,
    /// Overrides the throttle of every workload when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pace_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspend_timeout_ms: Option<u64>,
}

/// `HOSTNAME` is rarely exported, so fall back to the name the system
/// was given.  Empty when neither is available.
fn system_host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_name: system_host_name(),
            bind_ip: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            hosts: Vec::new(),
            pace_ms: None,
            suspend_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("wanderer.toml"))
                .merge(Json::file("wanderer.json"))
                .merge(Env::prefixed("WANDERER_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Peers dial us by this name, so a placeholder would strand them.
        if config.host_name.trim().is_empty() {
            anyhow::bail!("host_name is not set: export HOSTNAME or set WANDERER_HOST_NAME");
        }
        // Surface a bad bind address at startup rather than at bind time.
        config.listen_addr()?;

        Ok(config)
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind_ip, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))
    }

    pub fn pace(&self) -> Option<Duration> {
        self.pace_ms.map(Duration::from_millis)
    }

    pub fn suspend_timeout(&self) -> Option<Duration> {
        self.suspend_timeout_ms.map(Duration::from_millis)
    }
}

//! Core configuration types and loading.

use meshirc_proto::Casemapping;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::limits::LimitsConfig;
use super::links::LinkBlock;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// Server-to-server listener.
    pub listen: ListenConfig,
    /// Link timers.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Link blocks for server peering.
    #[serde(default)]
    pub links: Vec<LinkBlock>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// The link block for `name`, if configured.
    pub fn link(&self, name: &str) -> Option<&LinkBlock> {
        self.links.iter().find(|l| l.is_for(name))
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "irc.example.net").
    pub name: String,
    /// Server description.
    #[serde(default)]
    pub description: String,
    /// Network name (e.g., "ExampleNet").
    pub network: String,
    /// Case mapping for nicknames and channel names: "rfc1459" or "ascii".
    #[serde(default = "default_casemapping")]
    pub casemapping: String,
    /// Network-affecting extensions (mode sets) beyond `core`.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Prometheus metrics HTTP port. Unset or 0 disables the endpoint.
    pub metrics_port: Option<u16>,
}

impl ServerConfig {
    /// Parsed case mapping; `None` if the configured name is unknown.
    pub fn casemapping(&self) -> Option<Casemapping> {
        Casemapping::from_name(&self.casemapping)
    }
}

fn default_casemapping() -> String {
    Casemapping::default().name().to_string()
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to accept server links on (e.g., "0.0.0.0:7000").
    pub address: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
name = "a.example.net"
description = "Server A"
network = "ExampleNet"
extensions = ["halfop"]
metrics_port = 9100

[listen]
address = "127.0.0.1:7000"

[limits]
ping_interval = 30

[[links]]
name = "b.example.net"
hostname = "127.0.0.1"
port = 7001
send_password = "a-to-b"
receive_password = "b-to-a"
autoconnect = true
"#;

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.name, "a.example.net");
        assert_eq!(config.server.casemapping(), Some(Casemapping::Rfc1459));
        assert_eq!(config.server.extensions, vec!["halfop"]);
        assert_eq!(config.limits.ping_interval, 30);
        assert_eq!(config.limits.ping_timeout, 120);
        assert_eq!(config.links.len(), 1);
        assert!(config.links[0].autoconnect);
        assert!(config.link("B.EXAMPLE.NET").is_some());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.listen.address.port(), 7000);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[server]\nname = ").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}

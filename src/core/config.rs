//! Static daemon configuration.
//!
//! Everything here is fixed for the lifetime of the process: sockets,
//! driver selection, file locations. Tunable values (gains, setpoints,
//! the readout interval) live in the runtime settings store instead and
//! change over the intercom.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub readout: ReadoutConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pids: PidsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address. Unset means the host's outbound interface.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadoutConfig {
    /// Initial readout interval; `SET readoutInterval` overrides it.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoConfig {
    /// `null` or `simulated`.
    #[serde(default = "default_driver")]
    pub driver: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite file. Unset disables persistence.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Lines kept for `GET log`.
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PidsConfig {
    /// Loop ids to register at startup; settings keys live under
    /// `pid<id>/`.
    #[serde(default = "default_pid_ids")]
    pub ids: Vec<String>,
}

fn default_port() -> u16 {
    22001
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_driver() -> String {
    "simulated".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_buffer() -> usize {
    256
}

fn default_settings_file() -> String {
    "data/settings.json".to_string()
}

fn default_pid_ids() -> Vec<String> {
    vec!["0".to_string(), "1".to_string()]
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
        }
    }
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_buffer: default_log_buffer(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
        }
    }
}

impl Default for PidsConfig {
    fn default() -> Self {
        Self {
            ids: default_pid_ids(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(raw).context("invalid config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(host) = &self.listener.host {
            host.parse::<IpAddr>()
                .with_context(|| format!("listener.host '{host}' is not an IP address"))?;
        }
        if self.readout.interval_ms == 0 {
            bail!("readout.interval_ms must be positive");
        }
        if !matches!(self.io.driver.as_str(), "null" | "simulated") {
            bail!("io.driver must be 'null' or 'simulated'");
        }
        if self.telemetry.log_buffer == 0 {
            bail!("telemetry.log_buffer must be positive");
        }
        if self.pids.ids.is_empty() {
            bail!("pids.ids must name at least one loop");
        }
        if self
            .pids
            .ids
            .iter()
            .any(|id| id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            bail!("pids.ids must be non-empty alphanumeric names");
        }
        Ok(())
    }

    /// Parsed listener host, `None` for auto-detect. Only valid after
    /// `validate`, which checks the address syntax.
    pub fn listener_host(&self) -> Option<IpAddr> {
        self.listener
            .host
            .as_ref()
            .and_then(|host| host.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.listener.port, 22001);
        assert_eq!(config.readout.interval_ms, 5000);
        assert_eq!(config.io.driver, "simulated");
        assert_eq!(config.database.path, None);
        assert_eq!(config.pids.ids, vec!["0", "1"]);
        assert_eq!(config.listener_host(), None);
    }

    #[test]
    fn full_config_parses() {
        let config = Config::from_toml(
            r#"
            [listener]
            host = "127.0.0.1"
            port = 22010

            [readout]
            interval_ms = 1000

            [io]
            driver = "null"

            [database]
            path = "/var/lib/thermod/data.sqlite"

            [telemetry]
            log_level = "debug"
            log_buffer = 64

            [paths]
            settings_file = "/var/lib/thermod/settings.json"

            [pids]
            ids = ["0"]
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.port, 22010);
        assert_eq!(
            config.listener_host(),
            Some("127.0.0.1".parse::<IpAddr>().unwrap())
        );
        assert_eq!(config.io.driver, "null");
        assert_eq!(config.pids.ids, vec!["0"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("[listener]\nhost = \"not-an-ip\"").is_err());
        assert!(Config::from_toml("[readout]\ninterval_ms = 0").is_err());
        assert!(Config::from_toml("[io]\ndriver = \"steam\"").is_err());
        assert!(Config::from_toml("[pids]\nids = []").is_err());
        assert!(Config::from_toml("[pids]\nids = [\"a/b\"]").is_err());
        assert!(Config::from_toml("[surprise]\nkey = 1").is_err());
    }
}

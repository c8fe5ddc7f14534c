//! Configuration for the apguard daemon.
//!
//! TOML file at the platform config path, overlaid with `APGUARD_`
//! environment variables (nested keys split on `__`, e.g.
//! `APGUARD_DOH__DNSMASQ_DIR`), and translation to the runtime types
//! `apguard_core::EngineConfig`, `ProcessBackendConfig`, and
//! `apguard_api::TransportConfig`.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use apguard_api::{TlsMode, TransportConfig};
use apguard_core::{EngineConfig, ProcessBackendConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerSection,
    pub bus: BusSection,
    pub ssid: SsidSection,
    pub doh: DohSection,
    pub conntrack: ConntrackSection,
    pub inventory: InventorySection,
    pub logging: LoggingSection,
}

/// Access-point controller REST endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerSection {
    /// Base URL (e.g., "http://127.0.0.1:8841/v1").
    pub url: String,

    /// Bearer token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Request timeout, seconds.
    pub timeout: u64,

    /// Skip TLS verification.
    pub insecure: bool,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8841/v1".into(),
            token: None,
            token_env: None,
            timeout: 10,
            insecure: false,
            ca_cert: None,
        }
    }
}

/// Pub/sub bridge.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BusSection {
    pub url: String,
    pub enabled: bool,
    /// Maximum reconnect backoff, seconds.
    pub max_backoff: u64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8841/v1/bus".into(),
            enabled: true,
            max_backoff: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SsidSection {
    /// Full station resync period, seconds. 0 disables.
    pub resync_interval: u64,
    /// Delay before handling a station join, seconds.
    pub join_delay: u64,
}

impl Default for SsidSection {
    fn default() -> Self {
        Self {
            resync_interval: 60,
            join_delay: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DohSection {
    /// Feature flag name.
    pub feature: String,
    pub dnsmasq_dir: PathBuf,
    /// Holds the proxy config, server selections, and scope settings.
    pub state_dir: PathBuf,
    /// `apply_doh(recheck = true)` period, seconds. 0 disables.
    pub refresh_interval: u64,
    /// Proxy listen address; dnsmasq forwards to it.
    pub listen: String,
    pub wan_tag: String,
    pub default_servers: Vec<String>,
    pub known_servers: Vec<String>,
    pub start_command: Vec<String>,
    pub stop_command: Vec<String>,
    pub restart_command: Vec<String>,
    /// Restarts dnsmasq after directive changes.
    pub dns_restart_command: Vec<String>,
    /// Quiet period before a dnsmasq restart, milliseconds.
    pub restart_debounce_ms: u64,
}

impl Default for DohSection {
    fn default() -> Self {
        Self {
            feature: "doh".into(),
            dnsmasq_dir: PathBuf::from("/etc/apguard/dnsmasq"),
            state_dir: PathBuf::from("/var/lib/apguard"),
            refresh_interval: 24 * 60 * 60,
            listen: "127.0.0.1:8854".into(),
            wan_tag: "wan_default".into(),
            default_servers: vec!["cloudflare".into()],
            known_servers: vec![
                "cloudflare".into(),
                "google".into(),
                "quad9-doh-ip4-port443-filter-pri".into(),
            ],
            start_command: vec!["systemctl".into(), "start".into(), "dnscrypt-proxy".into()],
            stop_command: vec!["systemctl".into(), "stop".into(), "dnscrypt-proxy".into()],
            restart_command: vec![
                "systemctl".into(),
                "restart".into(),
                "dnscrypt-proxy".into(),
            ],
            dns_restart_command: vec!["systemctl".into(), "restart".into(), "dnsmasq".into()],
            restart_debounce_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConntrackSection {
    /// Extra addresses treated as the appliance's own.
    pub local_addresses: Vec<IpAddr>,
    /// JSON-lines output for translated connection logs.
    pub sink_path: PathBuf,
}

impl Default for ConntrackSection {
    fn default() -> Self {
        Self {
            local_addresses: Vec::new(),
            sink_path: PathBuf::from("/var/log/apguard/conn.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InventorySection {
    pub path: PathBuf,
}

impl Default for InventorySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/apguard/inventory.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive used when neither `-v` nor `RUST_LOG` is set.
    pub level: String,
    pub json: bool,
    /// Daily-rolling log file; stderr only when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            file: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "apguard", "apguard").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("apguard");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` + environment. A missing file yields
/// defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("APGUARD_").split("__"));

    let config: Config = figment.extract()?;
    validate(&config)?;
    Ok(config)
}

/// Render a config as TOML.
pub fn to_toml(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Check fields that deserialize fine but cannot be used.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    config
        .controller
        .url
        .parse::<url::Url>()
        .map_err(|e| invalid("controller.url", format!("{e}: {}", config.controller.url)))?;

    let bus: url::Url = config
        .bus
        .url
        .parse()
        .map_err(|e| invalid("bus.url", format!("{e}: {}", config.bus.url)))?;
    if !matches!(bus.scheme(), "ws" | "wss") {
        return Err(invalid(
            "bus.url",
            format!("expected ws:// or wss://, got {}", bus.scheme()),
        ));
    }

    parse_listen(&config.doh)?;
    if config.doh.feature.trim().is_empty() {
        return Err(invalid("doh.feature", "must not be empty"));
    }
    if config.controller.timeout == 0 {
        return Err(invalid("controller.timeout", "must be at least 1 second"));
    }
    Ok(())
}

fn parse_listen(doh: &DohSection) -> Result<SocketAddr, ConfigError> {
    doh.listen
        .parse()
        .map_err(|e| invalid("doh.listen", format!("{e}: {}", doh.listen)))
}

// ── Translation ─────────────────────────────────────────────────────

/// Resolve the controller token: `token_env` first, then plaintext.
pub fn resolve_token(controller: &ControllerSection) -> Option<SecretString> {
    if let Some(ref env_name) = controller.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }
    controller.token.clone().map(SecretString::from)
}

pub fn to_transport_config(config: &Config) -> TransportConfig {
    let c = &config.controller;
    let tls = if c.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = c.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    TransportConfig {
        tls,
        timeout: Duration::from_secs(c.timeout),
        token: resolve_token(c),
    }
}

pub fn to_engine_config(config: &Config) -> EngineConfig {
    EngineConfig {
        resync_interval: Duration::from_secs(config.ssid.resync_interval),
        join_delay: Duration::from_secs(config.ssid.join_delay),
        doh_refresh_interval: Duration::from_secs(config.doh.refresh_interval),
        feature: config.doh.feature.clone(),
        dnsmasq_dir: config.doh.dnsmasq_dir.clone(),
        wan_tag: config.doh.wan_tag.clone(),
        doh_state_file: Some(config.doh.state_dir.join("doh_settings.json")),
    }
}

pub fn to_backend_config(config: &Config) -> Result<ProcessBackendConfig, ConfigError> {
    let doh = &config.doh;
    Ok(ProcessBackendConfig {
        config_path: doh.state_dir.join("dnscrypt-proxy.toml"),
        state_path: doh.state_dir.join("doh_servers.json"),
        listen: parse_listen(doh)?,
        default_servers: doh.default_servers.clone(),
        known_servers: doh.known_servers.clone(),
        start_command: doh.start_command.clone(),
        stop_command: doh.stop_command.clone(),
        restart_command: doh.restart_command.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.ssid.resync_interval, 60);
        assert_eq!(config.ssid.join_delay, 5);
        assert_eq!(config.doh.refresh_interval, 86_400);
        assert_eq!(config.doh.wan_tag, "wan_default");
    }

    #[test]
    fn file_overrides_defaults_per_field() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[controller]
url = "https://10.0.0.1:8841/v1"
token = "s3cret"

[ssid]
join_delay = 2

[doh]
dnsmasq_dir = "/tmp/dnsmasq"
listen = "127.0.0.1:5353"
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.controller.url, "https://10.0.0.1:8841/v1");
        assert_eq!(config.ssid.join_delay, 2);
        assert_eq!(config.ssid.resync_interval, 60);

        let engine = to_engine_config(&config);
        assert_eq!(engine.join_delay, Duration::from_secs(2));
        assert_eq!(engine.dnsmasq_dir, PathBuf::from("/tmp/dnsmasq"));

        let backend = to_backend_config(&config).unwrap();
        assert_eq!(backend.listen.port(), 5353);
        assert!(to_transport_config(&config).token.is_some());
    }

    #[test]
    fn bad_bus_scheme_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[bus]\nurl = \"http://127.0.0.1/bus\"\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "bus.url"));
    }

    #[test]
    fn bad_listen_address_is_rejected() {
        let config = Config {
            doh: DohSection {
                listen: "localhost".into(),
                ..DohSection::default()
            },
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rendered_toml_loads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = Config::default();
        config.logging.json = true;
        std::fs::write(&path, to_toml(&config).unwrap()).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), config);
    }
}

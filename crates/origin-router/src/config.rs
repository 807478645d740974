//! Configuration types and loading logic.

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use router_tracing::TracingConfig;
use serde::{Deserialize, Serialize};

/// Top-level router configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Dispatch listener: every request here is routed by peer address.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Administrative API listener.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_address")]
    pub listen_address: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Outbound client used by proxy routes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Longest silence allowed between reads from a backend. Resets on
    /// every chunk, so a response that keeps streaming is never cut off.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Where routes survive restarts.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ListenOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<ListenOverride>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListenOverride {
    pub listen_address: String,
}

impl CliOverrides {
    /// `--port` / `--admin-port` bind every interface on the given port.
    pub fn from_ports(port: Option<u16>, admin_port: Option<u16>) -> Self {
        Self {
            server: port.map(|p| ListenOverride {
                listen_address: format!("0.0.0.0:{p}"),
            }),
            admin: admin_port.map(|p| ListenOverride {
                listen_address: format!("0.0.0.0:{p}"),
            }),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_address() -> String {
    "0.0.0.0:7676".to_string()
}

fn default_true() -> bool {
    true
}

fn default_read_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/routes.json")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_address: default_admin_address(),
            enabled: default_true(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file, environment variables and
    /// command-line overrides.
    ///
    /// Priority (highest to lowest):
    /// 1. Command-line overrides
    /// 2. Environment variables (ROUTER_ prefix, __ for nesting)
    /// 3. TOML config file (a missing file is skipped)
    /// 4. Defaults
    pub fn load(config_path: &str, overrides: &CliOverrides) -> anyhow::Result<Self> {
        Ok(Self::figment(config_path, overrides).extract()?)
    }

    fn figment(config_path: &str, overrides: &CliOverrides) -> Figment {
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("ROUTER_").split("__"))
            .merge(Serialized::defaults(overrides))
    }
}

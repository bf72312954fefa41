//! TOML configuration for circuitcheck.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a usable configuration. The config file path can be given on
//! the command line or through the `CIRCUITCHECK_CONFIG` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::convert::SpeedUnit;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "circuitcheck.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a verification run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitCheckConfig {
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub iperf3: Iperf3Config,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where the active configuration came from.
///
/// Loading happens before the run log exists, so the outcome is kept here
/// and reported through [`ConfigOrigin::log`] once logging is up.
#[derive(Debug, Default)]
pub struct ConfigOrigin {
    /// File the configuration was read from; `None` means built-in defaults.
    pub path: Option<PathBuf>,
    /// Config files that were found but could not be loaded.
    pub rejected: Vec<(PathBuf, String)>,
}

impl ConfigOrigin {
    pub fn log(&self) {
        for (path, error) in &self.rejected {
            warn!(path = %path.display(), %error, "config file could not be loaded, skipped");
        }
        match &self.path {
            Some(path) => info!(path = %path.display(), "loaded configuration"),
            None => info!("no usable config file, using compiled-in defaults"),
        }
    }
}

impl CircuitCheckConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `CIRCUITCHECK_CONFIG` environment variable.
    /// 2. `circuitcheck.toml` in the working directory.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> (Self, ConfigOrigin) {
        let env_path = std::env::var_os("CIRCUITCHECK_CONFIG").map(PathBuf::from);
        Self::load_first(env_path, Path::new(DEFAULT_CONFIG_FILE))
    }

    fn load_first(env_path: Option<PathBuf>, local: &Path) -> (Self, ConfigOrigin) {
        let mut origin = ConfigOrigin::default();

        let candidates = env_path
            .into_iter()
            .chain(local.exists().then(|| local.to_path_buf()));
        for path in candidates {
            match Self::load(&path) {
                Ok(config) => {
                    origin.path = Some(path);
                    return (config, origin);
                }
                Err(e) => {
                    // The run log does not exist yet.
                    eprintln!("warning: {e:#}, trying fallback");
                    origin.rejected.push((path, format!("{e:#}")));
                }
            }
        }

        (Self::default(), origin)
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Where the contractual speed of a site is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedSource {
    /// `cf_speed` custom field on the site itself.
    Site,
    /// `cf_speed` on the circuit whose `cf_site` points at the site.
    Circuit,
}

/// Inventory (NetBox) API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Base URL, e.g. `https://netbox.example.net`.
    pub url: String,
    /// Read-only API token.
    pub token: String,
    /// Set to `false` for self-signed inventory deployments.
    pub verify_tls: bool,
    /// Extra attempts after the first failed request.
    pub repeat_counter: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    /// Unit of the `cf_speed` custom field.
    pub speed_unit: SpeedUnit,
    pub speed_source: SpeedSource,
    pub filter: DeviceFilter,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            token: String::new(),
            verify_tls: false,
            repeat_counter: 3,
            retry_delay_ms: 1000,
            speed_unit: SpeedUnit::Mbps,
            speed_source: SpeedSource::Site,
            filter: DeviceFilter::default(),
        }
    }
}

impl InventoryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Fixed predicate selecting the firewalls to test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    pub region_id: u32,
    pub status: String,
    pub role_id: u32,
    pub manufacturer_id: u32,
    /// Tenant excluded from the batch (`tenant_id__n`).
    pub exclude_tenant_id: u32,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            region_id: 1,
            status: "active".to_string(),
            role_id: 4,
            manufacturer_id: 2,
            exclude_tenant_id: 6,
        }
    }
}

impl DeviceFilter {
    /// Query parameters in the inventory API's filter syntax.
    pub fn query_params(&self) -> Vec<(String, String)> {
        vec![
            ("region_id".to_string(), self.region_id.to_string()),
            ("status".to_string(), self.status.clone()),
            ("role_id".to_string(), self.role_id.to_string()),
            ("manufacturer_id".to_string(), self.manufacturer_id.to_string()),
            ("tenant_id__n".to_string(), self.exclude_tenant_id.to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Iperf3
// ---------------------------------------------------------------------------

/// The local iperf3 server every device connects back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Iperf3Config {
    /// Path (or bare command name resolved via `$PATH`) to the iperf3 binary.
    pub path: String,
    /// Address the server binds to; devices are told to connect here, so it
    /// must be reachable from every firewall under test.
    pub address: String,
    pub port: u16,
}

impl Default for Iperf3Config {
    fn default() -> Self {
        Self {
            path: "iperf3".to_string(),
            address: "127.0.0.1".to_string(),
            port: 5201,
        }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// Remote session settings for the firewalls under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub ssh_path: String,
    /// Used to feed the password to ssh when one is exported.
    pub sshpass_path: String,
    pub ssh_port: u16,
    pub username_env: String,
    pub password_env: String,
    pub connect_timeout_sec: u64,
    /// Upper bound for a single command on the device.
    pub command_timeout_sec: u64,
    /// Devices addressed from this range are tested from their loopback.
    pub loopback_prefix: String,
    /// Optional ssh client config file.
    pub ssh_config_file: Option<PathBuf>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ssh_path: "ssh".to_string(),
            sshpass_path: "sshpass".to_string(),
            ssh_port: 22,
            username_env: "USER".to_string(),
            password_env: "PASSWORD".to_string(),
            connect_timeout_sec: 10,
            command_timeout_sec: 60,
            loopback_prefix: "10.52.22.".to_string(),
            ssh_config_file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Timing of the per-target server/client lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wait between lifecycle steps so the server can bind and listen.
    pub settle_delay_ms: u64,
    /// Bound on joining each of the two processes.
    pub join_timeout_sec: u64,
    /// Time a terminated process gets between SIGTERM and SIGKILL.
    pub terminate_grace_sec: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3000,
            join_timeout_sec: 240,
            terminate_grace_sec: 5,
        }
    }
}

impl OrchestratorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_sec)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_sec)
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Run-scoped directories, relative to the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds `output.log`.
    pub output_run: PathBuf,
    /// Holds one measurement file per device, named by IP.
    pub output_files: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_run: PathBuf::from("output/run"),
            output_files: PathBuf::from("output/files"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

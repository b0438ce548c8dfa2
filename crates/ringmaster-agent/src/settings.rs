//! Agent settings and per-host overrides
//!
//! Agent settings come from an optional TOML file overlaid by `RINGMASTER_*`
//! environment variables. Host overrides come from a separate INI file that
//! operators drop on a node to pin its ring1 parameters.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use ringmaster_common::{HaError, Result};
use ringmaster_corosync::{
    DEFAULT_IFCFG_DIR, DEFAULT_TRANSPORT_CONFIG, Ipv4Net, Ring1Request, TransportSettings,
};
use ringmaster_pacemaker::BootstrapSettings;
use ringmaster_pacemaker::fencing::{DEFAULT_FENCE_AGENT, FENCE_PRIMITIVE};

pub const DEFAULT_SETTINGS_FILE: &str = "/etc/ringmaster/agent.toml";
pub const DEFAULT_HOST_OVERRIDES_FILE: &str = "/etc/ringmaster.cfg";
pub const ENV_PREFIX: &str = "RINGMASTER";

fn config_error(e: config::ConfigError) -> HaError {
    HaError::configuration(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSettings {
    /// URL of the management server; ring0 is the interface routing to it
    pub manager_url: String,
    pub corosync_config: PathBuf,
    pub persist_ifcfg: bool,
    pub ifcfg_dir: PathBuf,
    pub host_overrides_file: PathBuf,
    pub fence_primitive: String,
    pub fence_agent: String,
    pub propose_window_secs: u64,
    pub discover_window_min_secs: u64,
    pub discover_window_max_secs: u64,
    pub leader_poll_attempts: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            manager_url: String::new(),
            corosync_config: PathBuf::from(DEFAULT_TRANSPORT_CONFIG),
            persist_ifcfg: true,
            ifcfg_dir: PathBuf::from(DEFAULT_IFCFG_DIR),
            host_overrides_file: PathBuf::from(DEFAULT_HOST_OVERRIDES_FILE),
            fence_primitive: FENCE_PRIMITIVE.to_string(),
            fence_agent: DEFAULT_FENCE_AGENT.to_string(),
            propose_window_secs: 10,
            discover_window_min_secs: 5,
            discover_window_max_secs: 20,
            leader_poll_attempts: 120,
        }
    }
}

impl AgentSettings {
    /// Load from `path` (or the default file, if present) and the process
    /// environment. An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::from(Path::new(DEFAULT_SETTINGS_FILE))
                .format(FileFormat::Toml)
                .required(false),
        };
        let settings: AgentSettings = Config::builder()
            .add_source(file)
            .add_source(env.try_parsing(true))
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.discover_window_min_secs > self.discover_window_max_secs {
            return Err(HaError::configuration(format!(
                "discover window {}..{}s is empty",
                self.discover_window_min_secs, self.discover_window_max_secs
            )));
        }
        if self.leader_poll_attempts == 0 {
            return Err(HaError::configuration("leader_poll_attempts must be at least 1"));
        }
        if self.fence_primitive.trim().is_empty() || self.fence_agent.trim().is_empty() {
            return Err(HaError::configuration("fence primitive and agent must be set"));
        }
        Ok(())
    }

    /// The management URL, which only the corosync action needs
    pub fn require_manager_url(&self) -> Result<&str> {
        if self.manager_url.trim().is_empty() {
            return Err(HaError::configuration(format!(
                "manager_url is not set (use {} or {}_MANAGER_URL)",
                DEFAULT_SETTINGS_FILE, ENV_PREFIX
            )));
        }
        Ok(&self.manager_url)
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            config_path: self.corosync_config.clone(),
            ifcfg_dir: self.persist_ifcfg.then(|| self.ifcfg_dir.clone()),
            propose_window: Duration::from_secs(self.propose_window_secs),
            discover_window_secs: self.discover_window_min_secs..=self.discover_window_max_secs,
        }
    }

    pub fn bootstrap_settings(&self) -> BootstrapSettings {
        BootstrapSettings {
            fence_primitive: self.fence_primitive.clone(),
            fence_agent: self.fence_agent.clone(),
            leader_poll_attempts: self.leader_poll_attempts,
            ..Default::default()
        }
    }
}

/// `[corosync]` section as written by operators; everything is a string
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawHostOverrides {
    corosync: RawCorosyncSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCorosyncSection {
    mcast_port: Option<String>,
    ring1_iface: Option<String>,
    ring1_ipaddr: Option<String>,
    ring1_netmask: Option<String>,
}

/// Validated per-host transport overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcast_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ring1_iface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ring1_ipaddr: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ring1_netmask: Option<Ipv4Addr>,
}

impl HostOverrides {
    /// Read the overrides file. A missing file means no overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawHostOverrides = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(false))
            .build()
            .map_err(config_error)?
            .try_deserialize()
            .map_err(config_error)?;
        Self::from_raw(raw.corosync)
    }

    fn from_raw(raw: RawCorosyncSection) -> Result<Self> {
        let mcast_port = non_empty(raw.mcast_port)
            .map(|v| parse_port(&v))
            .transpose()?;
        let ring1_ipaddr = non_empty(raw.ring1_ipaddr)
            .map(|v| parse_addr("ring1_ipaddr", &v))
            .transpose()?;
        let ring1_netmask = non_empty(raw.ring1_netmask)
            .map(|v| parse_netmask(&v))
            .transpose()?;
        Ok(Self {
            mcast_port,
            ring1_iface: non_empty(raw.ring1_iface),
            ring1_ipaddr,
            ring1_netmask,
        })
    }

    /// Values set in `other` win
    pub fn merged_with(self, other: HostOverrides) -> Self {
        Self {
            mcast_port: other.mcast_port.or(self.mcast_port),
            ring1_iface: other.ring1_iface.or(self.ring1_iface),
            ring1_ipaddr: other.ring1_ipaddr.or(self.ring1_ipaddr),
            ring1_netmask: other.ring1_netmask.or(self.ring1_netmask),
        }
    }

    pub fn ring1_request(&self) -> Ring1Request {
        Ring1Request {
            device: self.ring1_iface.clone(),
            address: self.ring1_ipaddr,
            netmask: self.ring1_netmask,
            mcast_port: self.mcast_port,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_port(value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(HaError::configuration(format!("invalid mcast_port: {}", value))),
    }
}

fn parse_addr(key: &str, value: &str) -> Result<Ipv4Addr> {
    value
        .parse()
        .map_err(|_| HaError::configuration(format!("invalid {}: {}", key, value)))
}

fn parse_netmask(value: &str) -> Result<Ipv4Addr> {
    let netmask = parse_addr("ring1_netmask", value)?;
    Ipv4Net::prefix_from_netmask(netmask)?;
    Ok(netmask)
}

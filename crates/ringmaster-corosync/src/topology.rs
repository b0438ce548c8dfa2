//! Ring topology planning
//!
//! ring0 always rides on the interface used to reach the management
//! endpoint. ring1 goes on a private "shadow" subnet that cannot overlap
//! ring0, either on a device the operator names or on the first unconfigured
//! ethernet device with physical link.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use ringmaster_common::{CommandRunner, HaError, Result};

use crate::config_file::write_ifcfg;
use crate::interface::{InterfaceProbe, Ipv4Net, RingInterface};

static ROUTE_DEV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dev\s+(\S+)").expect("Invalid regex pattern"));

/// ring0 networks larger than this cannot be shadowed inside 10.0.0.0/8
pub const MIN_RING0_PREFIX_LEN: u8 = 9;

const TEN_SLASH_EIGHT: Ipv4Net = Ipv4Net {
    addr: Ipv4Addr::new(10, 0, 0, 0),
    prefix_len: 8,
};

const TEN_UPPER_HALF: Ipv4Net = Ipv4Net {
    addr: Ipv4Addr::new(10, 128, 0, 0),
    prefix_len: 9,
};

/// Operator-supplied ring1 settings, any of which may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ring1Request {
    pub device: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub mcast_port: Option<u16>,
}

/// Fully specified ring1: no planning, no negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualRing1Config {
    pub device: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub port: u16,
}

/// ring1 address known, device and port still to be discovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoDetectedRing1Config {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ring1Config {
    Manual(ManualRing1Config),
    AutoDetected(AutoDetectedRing1Config),
}

impl Ring1Config {
    /// Decide once, from the request and ring0, how ring1 will be built.
    ///
    /// Missing address and netmask are generated from ring0. A device plus
    /// a port selects the manual path; anything else auto-detects.
    pub fn resolve(request: &Ring1Request, ring0: &RingInterface) -> Result<Self> {
        let (address, prefix_len) = match (request.address, request.netmask) {
            (None, None) => derive_ring1_address(ring0)?,
            (Some(address), Some(netmask)) => (address, Ipv4Net::prefix_from_netmask(netmask)?),
            (Some(address), None) => (address, ring0.require_ipv4()?.prefix_len),
            (None, Some(netmask)) => {
                let (address, _) = derive_ring1_address(ring0)?;
                (address, Ipv4Net::prefix_from_netmask(netmask)?)
            }
        };

        match (&request.device, request.mcast_port) {
            (Some(device), Some(port)) => Ok(Ring1Config::Manual(ManualRing1Config {
                device: device.clone(),
                address,
                prefix_len,
                port,
            })),
            _ => Ok(Ring1Config::AutoDetected(AutoDetectedRing1Config {
                address,
                prefix_len,
            })),
        }
    }
}

/// Given ring0's network, pick a network of the same size in 10.0.0.0/8 that
/// cannot overlap it.
pub fn derive_ring1_subnet(network: Ipv4Addr, prefix_len: u8) -> Ipv4Net {
    let ring0 = Ipv4Net {
        addr: network,
        prefix_len,
    };
    let inside_ten = prefix_len >= TEN_SLASH_EIGHT.prefix_len
        && TEN_SLASH_EIGHT.contains(ring0.network());
    let shadow = if inside_ten && TEN_UPPER_HALF.contains(ring0.network()) {
        Ipv4Addr::new(10, 0, 0, 0)
    } else if inside_ten {
        TEN_UPPER_HALF.addr
    } else {
        Ipv4Addr::new(10, 0, 0, 0)
    };
    Ipv4Net {
        addr: shadow,
        prefix_len,
    }
}

/// ring1 address: ring0's host bits placed into the shadow subnet
pub fn derive_ring1_address(ring0: &RingInterface) -> Result<(Ipv4Addr, u8)> {
    let net = ring0.require_ipv4()?;
    let subnet = derive_ring1_subnet(net.network(), net.prefix_len);
    let host_bits = u32::from(net.addr) & u32::from(net.hostmask());
    let address = Ipv4Addr::from(host_bits | u32::from(subnet.addr));
    info!("Chose {}/{} for ring1 address", address, subnet.prefix_len);
    Ok((address, subnet.prefix_len))
}

/// Reject ring0 networks too large to shadow
pub fn check_ring0(ring0: &RingInterface) -> Result<()> {
    let net = ring0.require_ipv4()?;
    if net.prefix_len < MIN_RING0_PREFIX_LEN {
        return Err(HaError::configuration(format!(
            "Network on {} cannot be bigger than /{} (/{})",
            ring0.name, MIN_RING0_PREFIX_LEN, net.prefix_len
        )));
    }
    Ok(())
}

/// Resolve the host part of the management URL to an IPv4 address
pub fn resolve_endpoint(manager_url: &str) -> Result<Ipv4Addr> {
    let url = url::Url::parse(manager_url)
        .map_err(|e| HaError::configuration(format!("invalid manager url {}: {}", manager_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| HaError::configuration(format!("manager url {} has no host", manager_url)))?;
    let port = url.port_or_known_default().unwrap_or(443);
    (host, port)
        .to_socket_addrs()?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| HaError::configuration(format!("{} has no IPv4 address", host)))
}

/// Extract the egress device from `ip route get` output
pub fn parse_route_device(route: &str) -> Option<String> {
    ROUTE_DEV
        .captures(route)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Discovers and addresses ring interfaces on this host
pub struct RingTopologyPlanner<'a> {
    runner: &'a dyn CommandRunner,
    probe: &'a dyn InterfaceProbe,
    ifcfg_dir: Option<PathBuf>,
}

impl<'a> RingTopologyPlanner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, probe: &'a dyn InterfaceProbe) -> Self {
        Self {
            runner,
            probe,
            ifcfg_dir: None,
        }
    }

    /// Persist address assignments as ifcfg files in `dir`
    pub fn with_ifcfg_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ifcfg_dir = Some(dir.into());
        self
    }

    /// ring0 is the device the kernel routes management traffic through
    pub fn detect_ring0(&self, manager: Ipv4Addr) -> Result<RingInterface> {
        let manager = manager.to_string();
        let route = self.runner.try_run("ip", &["route", "get", &manager])?;
        let device = parse_route_device(&route).ok_or_else(|| {
            HaError::configuration(format!("Unable to find ring0 dev in {}", route.trim()))
        })?;
        info!("Chose {} for corosync ring0", device);
        RingInterface::probe(self.probe, &device, 0)
    }

    /// Bring up the operator-named ring1 device with the given settings
    pub fn manual_ring1(&self, config: &ManualRing1Config) -> Result<RingInterface> {
        debug!("Creating ring1 device for {}", config.device);
        let mut ring1 = RingInterface::probe(self.probe, &config.device, 1)?;
        let net = Ipv4Net::new(config.address, config.prefix_len)?;
        self.set_address(&mut ring1, net)?;
        ring1.mcast_port = Some(config.port);
        Ok(ring1)
    }

    /// Every ethernet-like device on the host
    pub fn all_interfaces(&self) -> Result<Vec<RingInterface>> {
        let mut interfaces = Vec::new();
        for device in self.probe.devices()? {
            let iface = RingInterface::probe(self.probe, &device, 0)?;
            if iface.is_ethernet_candidate() {
                interfaces.push(iface);
            }
        }
        Ok(interfaces)
    }

    /// Find the device that carries (or should carry) the ring1 address.
    ///
    /// If no device holds `config.address` yet, the first device with link
    /// and no address gets it, using ring0's prefix length.
    pub fn detect_ring1(
        &self,
        ring0: &RingInterface,
        config: &AutoDetectedRing1Config,
    ) -> Result<RingInterface> {
        let mut interfaces = self.all_interfaces()?;

        if !interfaces
            .iter()
            .any(|iface| iface.address() == Some(config.address))
        {
            let prefix_len = ring0.require_ipv4()?.prefix_len;
            if let Some(iface) = interfaces
                .iter_mut()
                .find(|iface| iface.ipv4.is_none() && iface.has_link)
            {
                info!("Chose {} for corosync ring1", iface.name);
                self.set_address(iface, Ipv4Net::new(config.address, prefix_len)?)?;
            }
        }

        let mut ring1 = interfaces
            .into_iter()
            .find(|iface| iface.address() == Some(config.address))
            .ok_or_else(|| HaError::configuration("Failed to detect ring1 interface"))?;
        ring1.ring_number = 1;
        Ok(ring1)
    }

    /// Make `net` the device's only IPv4 address and bring it up.
    /// Re-running with the address already present only refreshes.
    pub fn set_address(&self, iface: &mut RingInterface, net: Ipv4Net) -> Result<()> {
        if iface.ipv4 != Some(net) {
            if let Some(previous) = iface.ipv4 {
                info!("Replacing {} on {}", previous, iface.name);
                self.runner
                    .try_run("ip", &["-4", "addr", "flush", "dev", &iface.name])?;
            }
            let cidr = net.to_string();
            self.runner
                .try_run("ip", &["addr", "add", &cidr, "dev", &iface.name])?;
        }
        self.runner
            .try_run("ip", &["link", "set", &iface.name, "up"])?;
        info!("Set {} ({}) up", iface.name, net);
        iface.refresh(self.probe)?;
        if iface.ipv4 != Some(net) {
            // The probe reports the primary address, which may lag behind
            debug!("{} reports {:?}, using {}", iface.name, iface.ipv4, net);
            iface.ipv4 = Some(net);
        }

        if let Some(dir) = &self.ifcfg_dir {
            write_ifcfg(dir, iface)?;
        }
        Ok(())
    }
}

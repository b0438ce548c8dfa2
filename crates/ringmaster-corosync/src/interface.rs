//! Heartbeat ring interfaces
//!
//! A `RingInterface` is one network path carrying corosync traffic. It is
//! built from a snapshot of the host interface (address, link, hardware
//! address) and carries the ring-level settings derived from it.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use if_addrs::IfAddr;
use serde::Serialize;
use tracing::debug;

use ringmaster_common::{HaError, Result};

/// Hardware addresses that never carry a heartbeat ring (loopback, IPoIB)
pub const HWADDR_BLACKLIST: &[&str] = &["00:00:00:00:00:00", "80:00:00:48:fe:80"];

/// An IPv4 address together with its prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Ipv4Net {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Net {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(HaError::configuration(format!(
                "invalid prefix length /{}",
                prefix_len
            )));
        }
        Ok(Self { addr, prefix_len })
    }

    /// Prefix length of a contiguous netmask such as 255.255.0.0
    pub fn prefix_from_netmask(netmask: Ipv4Addr) -> Result<u8> {
        let bits = u32::from(netmask);
        let prefix = bits.leading_ones();
        if bits.checked_shl(prefix).unwrap_or(0) != 0 {
            return Err(HaError::configuration(format!(
                "netmask {} is not contiguous",
                netmask
            )));
        }
        Ok(prefix as u8)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_bits(self.prefix_len))
    }

    pub fn hostmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(!mask_bits(self.prefix_len))
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & mask_bits(self.prefix_len))
    }

    /// Highest address inside the network
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network()) | !mask_bits(self.prefix_len))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_bits(self.prefix_len) == u32::from(self.network())
    }

    /// True if the two networks share any address
    pub fn overlaps(&self, other: &Ipv4Net) -> bool {
        self.contains(other.network()) || other.contains(self.network())
    }
}

impl std::fmt::Display for Ipv4Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

fn mask_bits(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

/// Snapshot of a host network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub ipv4: Option<Ipv4Net>,
    pub mac_address: String,
    pub has_link: bool,
}

/// Source of host interface information
pub trait InterfaceProbe: Send + Sync {
    /// All network device names on the host
    fn devices(&self) -> Result<Vec<String>>;

    /// Current state of one device
    fn info(&self, device: &str) -> Result<InterfaceInfo>;
}

/// `InterfaceProbe` reading `if-addrs` and sysfs
#[derive(Debug, Clone)]
pub struct SystemInterfaceProbe {
    sysfs_net: PathBuf,
}

impl Default for SystemInterfaceProbe {
    fn default() -> Self {
        Self {
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }
}

impl SystemInterfaceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_attr(&self, device: &str, attr: &str) -> Option<String> {
        fs::read_to_string(self.sysfs_net.join(device).join(attr))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn ipv4_for(device: &str) -> Result<Option<Ipv4Net>> {
        let addrs = if_addrs::get_if_addrs()?;
        for iface in addrs {
            if iface.name != device {
                continue;
            }
            if let IfAddr::V4(v4) = iface.addr {
                let prefix = Ipv4Net::prefix_from_netmask(v4.netmask)?;
                return Ok(Some(Ipv4Net::new(v4.ip, prefix)?));
            }
        }
        Ok(None)
    }
}

impl InterfaceProbe for SystemInterfaceProbe {
    fn devices(&self) -> Result<Vec<String>> {
        let mut devices = Vec::new();
        for entry in fs::read_dir(&self.sysfs_net)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                devices.push(name.to_string());
            }
        }
        devices.sort();
        Ok(devices)
    }

    fn info(&self, device: &str) -> Result<InterfaceInfo> {
        if !Path::new(&self.sysfs_net).join(device).exists() {
            return Err(HaError::configuration(format!(
                "no such network device: {}",
                device
            )));
        }
        // carrier reads fail with EINVAL while the device is down
        let has_link = self.read_attr(device, "carrier").as_deref() == Some("1");
        Ok(InterfaceInfo {
            name: device.to_string(),
            ipv4: Self::ipv4_for(device)?,
            mac_address: self.read_attr(device, "address").unwrap_or_default(),
            has_link,
        })
    }
}

/// One heartbeat network path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingInterface {
    pub name: String,
    pub ring_number: u8,
    pub ipv4: Option<Ipv4Net>,
    pub mac_address: String,
    pub has_link: bool,
    /// Unassigned until negotiated or supplied
    pub mcast_port: Option<u16>,
}

impl RingInterface {
    pub fn from_info(info: InterfaceInfo, ring_number: u8) -> Self {
        Self {
            name: info.name,
            ring_number,
            ipv4: info.ipv4,
            mac_address: info.mac_address,
            has_link: info.has_link,
            mcast_port: None,
        }
    }

    /// Probe `device` and wrap it as ring `ring_number`
    pub fn probe(probe: &dyn InterfaceProbe, device: &str, ring_number: u8) -> Result<Self> {
        Ok(Self::from_info(probe.info(device)?, ring_number))
    }

    /// Re-read address, hardware address and link from the host
    pub fn refresh(&mut self, probe: &dyn InterfaceProbe) -> Result<()> {
        let info = probe.info(&self.name)?;
        debug!("Refreshed {}: {:?}", self.name, info);
        self.ipv4 = info.ipv4;
        self.mac_address = info.mac_address;
        self.has_link = info.has_link;
        Ok(())
    }

    /// Multicast group for this ring: `226.94.<ring>.1`
    pub fn mcast_addr(&self) -> Ipv4Addr {
        Ipv4Addr::new(226, 94, self.ring_number, 1)
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.addr)
    }

    pub fn prefix_len(&self) -> Option<u8> {
        self.ipv4.map(|net| net.prefix_len)
    }

    pub fn netmask(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.netmask())
    }

    pub fn hostmask(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.hostmask())
    }

    /// Network address, used as corosync's `bindnetaddr`
    pub fn network(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.network())
    }

    /// Whether this device may carry a heartbeat ring at all
    pub fn is_ethernet_candidate(&self) -> bool {
        !HWADDR_BLACKLIST.contains(&self.mac_address.to_lowercase().as_str())
    }

    /// Require an address, naming the device in the error
    pub fn require_ipv4(&self) -> Result<Ipv4Net> {
        self.ipv4.ok_or_else(|| {
            HaError::configuration(format!("{} has no IPv4 address", self.name))
        })
    }
}

//! End-to-end ring planning and config writing against scripted host state

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ringmaster_common::testing::ScriptedRunner;
use ringmaster_common::{CommandOutput, HaError, Result};
use ringmaster_corosync::{
    CaptureSession, InterfaceInfo, InterfaceProbe, Ipv4Net, PacketCapture, Ring1Request,
    RingInterface, TransportConfigurator, TransportSettings,
};
use tempfile::TempDir;

// ============================================================================
// Host fakes
// ============================================================================

#[derive(Default)]
struct Host {
    devices: Mutex<HashMap<String, InterfaceInfo>>,
}

impl Host {
    fn new(devices: Vec<InterfaceInfo>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices.into_iter().map(|d| (d.name.clone(), d)).collect()),
        })
    }

    /// Apply `ip addr add <cidr> dev <dev>` to the device table
    fn ip_addr_add(&self, cidr: &str, device: &str) {
        let (addr, prefix) = cidr.split_once('/').unwrap();
        let net = Ipv4Net::new(addr.parse().unwrap(), prefix.parse().unwrap()).unwrap();
        if let Some(info) = self.devices.lock().unwrap().get_mut(device) {
            info.ipv4 = Some(net);
        }
    }
}

impl InterfaceProbe for Host {
    fn devices(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.devices.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn info(&self, device: &str) -> Result<InterfaceInfo> {
        self.devices
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .ok_or_else(|| HaError::configuration(format!("no such device {}", device)))
    }
}

/// Replays one scripted port list per capture session, recording devices
struct Wire {
    sessions: Mutex<VecDeque<Vec<u16>>>,
    opened_on: Mutex<Vec<String>>,
}

impl Wire {
    fn new(sessions: Vec<Vec<u16>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            opened_on: Mutex::new(Vec::new()),
        }
    }
}

struct Replay(VecDeque<u16>);

impl CaptureSession for Replay {
    fn next_port(&mut self) -> Result<Option<u16>> {
        Ok(self.0.pop_front())
    }
}

impl PacketCapture for Wire {
    fn open(&self, iface: &RingInterface, _window: Duration) -> Result<Box<dyn CaptureSession>> {
        self.opened_on.lock().unwrap().push(iface.name.clone());
        let ports = self.sessions.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(Replay(ports.into())))
    }
}

fn device(name: &str, ipv4: Option<(&str, u8)>, mac: &str, link: bool) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        ipv4: ipv4.map(|(a, p)| Ipv4Net::new(a.parse().unwrap(), p).unwrap()),
        mac_address: mac.to_string(),
        has_link: link,
    }
}

fn runner_for(host: Arc<Host>, ring0_dev: &'static str) -> ScriptedRunner {
    ScriptedRunner::new(move |argv| match (argv[0].as_str(), argv[1].as_str()) {
        ("ip", "route") => CommandOutput::success(format!(
            "{} via 192.168.1.1 dev {} src 192.168.1.37 uid 0\n    cache\n",
            argv[3], ring0_dev
        )),
        ("ip", "addr") => {
            host.ip_addr_add(&argv[3], &argv[5]);
            CommandOutput::success("")
        }
        _ => CommandOutput::success(""),
    })
}

fn settings(dir: &TempDir) -> TransportSettings {
    TransportSettings {
        config_path: dir.path().join("corosync.conf"),
        ifcfg_dir: Some(dir.path().to_path_buf()),
        propose_window: Duration::from_secs(1),
        discover_window_secs: 1..=1,
    }
}

const MANAGER: Ipv4Addr = Ipv4Addr::new(10, 20, 30, 40);

// ============================================================================
// Auto-detected ring1
// ============================================================================

#[test]
fn test_auto_detected_ring1_joins_existing_peer_port() {
    let dir = TempDir::new().unwrap();
    let host = Host::new(vec![
        device("eth0", Some(("192.168.1.37", 24)), "52:54:00:00:00:01", true),
        device("eth1", None, "52:54:00:00:00:02", true),
        device("ib0", None, "80:00:00:48:fe:80", true),
    ]);
    let runner = runner_for(host.clone(), "eth0");
    // nothing heard while proposing, then a peer shows up on 4401
    let wire = Wire::new(vec![vec![], vec![4401]]);
    let transport = TransportConfigurator::new(&runner, host.as_ref(), &wire, settings(&dir));

    let rings = transport
        .configure(MANAGER, &Ring1Request::default())
        .unwrap();

    assert_eq!(rings.len(), 2);
    assert_eq!(rings[0].name, "eth0");
    assert_eq!(rings[1].name, "eth1");
    assert_eq!(rings[1].address(), Some(Ipv4Addr::new(10, 0, 0, 37)));
    assert_eq!(rings[0].mcast_port, Some(4401));
    assert_eq!(rings[1].mcast_port, Some(4401));
    assert_eq!(*wire.opened_on.lock().unwrap(), vec!["eth1", "eth1"]);

    let conf = fs::read_to_string(dir.path().join("corosync.conf")).unwrap();
    assert!(conf.contains("bindnetaddr: 192.168.1.0"));
    assert!(conf.contains("bindnetaddr: 10.0.0.0"));
    assert_eq!(conf.matches("mcastport: 4401").count(), 2);

    let ifcfg = fs::read_to_string(dir.path().join("ifcfg-eth1")).unwrap();
    assert!(ifcfg.contains("IPADDR=10.0.0.37\n"));
    assert!(ifcfg.contains("NETMASK=255.255.255.0\n"));

    // the service is left for the caller
    assert!(!runner.ran("systemctl"));
}

#[test]
fn test_reconfigure_keeps_previous_config() {
    let dir = TempDir::new().unwrap();
    let host = Host::new(vec![
        device("eth0", Some(("192.168.1.37", 24)), "52:54:00:00:00:01", true),
        device("eth1", Some(("10.0.0.37", 24)), "52:54:00:00:00:02", true),
    ]);
    let runner = runner_for(host.clone(), "eth0");
    let wire = Wire::new(vec![vec![], vec![4401], vec![], vec![4403]]);
    let transport = TransportConfigurator::new(&runner, host.as_ref(), &wire, settings(&dir));

    transport.configure(MANAGER, &Ring1Request::default()).unwrap();
    transport.configure(MANAGER, &Ring1Request::default()).unwrap();

    let current = fs::read_to_string(dir.path().join("corosync.conf")).unwrap();
    let previous = fs::read_to_string(dir.path().join("corosync.conf.old")).unwrap();
    assert!(current.contains("mcastport: 4403"));
    assert!(previous.contains("mcastport: 4401"));
    // the address was already present both times
    assert!(!runner.ran("ip addr add"));
}

#[test]
fn test_ring0_network_too_large() {
    let dir = TempDir::new().unwrap();
    let host = Host::new(vec![
        device("eth0", Some(("10.1.2.3", 8)), "52:54:00:00:00:01", true),
        device("eth1", None, "52:54:00:00:00:02", true),
    ]);
    let runner = runner_for(host.clone(), "eth0");
    let wire = Wire::new(vec![]);
    let transport = TransportConfigurator::new(&runner, host.as_ref(), &wire, settings(&dir));

    let err = transport
        .configure(MANAGER, &Ring1Request::default())
        .unwrap_err();
    assert!(matches!(err, HaError::Configuration(_)));
    assert!(!dir.path().join("corosync.conf").exists());
    assert!(wire.opened_on.lock().unwrap().is_empty());
}

// ============================================================================
// Manual ring1
// ============================================================================

#[test]
fn test_manual_ring1_skips_negotiation() {
    let dir = TempDir::new().unwrap();
    let host = Host::new(vec![
        device("eth0", Some(("192.168.1.37", 24)), "52:54:00:00:00:01", true),
        device("eth2", None, "52:54:00:00:00:03", false),
    ]);
    let runner = runner_for(host.clone(), "eth0");
    let wire = Wire::new(vec![]);
    let transport = TransportConfigurator::new(&runner, host.as_ref(), &wire, settings(&dir));

    let request = Ring1Request {
        device: Some("eth2".to_string()),
        address: Some(Ipv4Addr::new(172, 16, 0, 5)),
        netmask: Some(Ipv4Addr::new(255, 255, 0, 0)),
        mcast_port: Some(5405),
    };
    let rings = transport.configure(MANAGER, &request).unwrap();

    assert_eq!(rings[1].name, "eth2");
    assert_eq!(rings[1].prefix_len(), Some(16));
    assert_eq!(rings[0].mcast_port, Some(5405));
    assert!(wire.opened_on.lock().unwrap().is_empty());
    assert!(runner.ran("ip addr add 172.16.0.5/16 dev eth2"));
}

//! Agent actions against a scripted host

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ringmaster_agent::{Agent, AgentSettings, HostOverrides};
use ringmaster_common::testing::{RecordingSleeper, ScriptedRunner};
use ringmaster_common::{CommandOutput, HaError, Result};
use ringmaster_corosync::{
    CaptureSession, InterfaceInfo, InterfaceProbe, Ipv4Net, PacketCapture, RingInterface,
};
use tempfile::TempDir;

// ============================================================================
// Fakes
// ============================================================================

struct Host {
    devices: Mutex<HashMap<String, InterfaceInfo>>,
}

impl Host {
    fn two_nics() -> Arc<Self> {
        let devices = [
            ("eth0", Some(Ipv4Net::new(Ipv4Addr::new(192, 168, 1, 37), 24).unwrap())),
            ("eth1", None),
        ];
        Arc::new(Self {
            devices: Mutex::new(
                devices
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, ipv4))| {
                        let info = InterfaceInfo {
                            name: name.to_string(),
                            ipv4,
                            mac_address: format!("52:54:00:00:00:0{}", i + 1),
                            has_link: true,
                        };
                        (name.to_string(), info)
                    })
                    .collect(),
            ),
        })
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

/// Every capture window passes in silence
struct QuietWire;

struct Silence;

impl CaptureSession for Silence {
    fn next_port(&mut self) -> Result<Option<u16>> {
        Ok(None)
    }
}

impl PacketCapture for QuietWire {
    fn open(&self, _iface: &RingInterface, _window: Duration) -> Result<Box<dyn CaptureSession>> {
        Ok(Box::new(Silence))
    }
}

/// Single node cluster with pacemaker running
fn single_node_runner(host: Arc<Host>) -> ScriptedRunner {
    ScriptedRunner::new(move |argv| {
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["ip", "route", "get", dst] => {
                CommandOutput::success(format!("{} via 192.168.1.1 dev eth0 src 192.168.1.37\n", dst))
            }
            ["ip", "addr", "add", cidr, "dev", dev] => {
                let (addr, prefix) = cidr.split_once('/').unwrap();
                let net = Ipv4Net::new(addr.parse().unwrap(), prefix.parse().unwrap()).unwrap();
                if let Some(info) = host.devices.lock().unwrap().get_mut(*dev) {
                    info.ipv4 = Some(net);
                }
                CommandOutput::success("")
            }
            ["crm_node", "-l"] => CommandOutput::success("1 node1 member\n"),
            _ => CommandOutput::success(""),
        }
    })
}

fn settings(dir: &TempDir) -> AgentSettings {
    AgentSettings {
        manager_url: "https://manager.example.com/".to_string(),
        corosync_config: dir.path().join("corosync.conf"),
        ifcfg_dir: dir.path().to_path_buf(),
        host_overrides_file: dir.path().join("ringmaster.cfg"),
        propose_window_secs: 0,
        discover_window_min_secs: 0,
        discover_window_max_secs: 0,
        ..Default::default()
    }
}

// ============================================================================
// Corosync
// ============================================================================

#[test]
fn test_configure_corosync_stops_pacemaker_before_restart() {
    let dir = TempDir::new().unwrap();
    let host = Host::two_nics();
    let runner = single_node_runner(host.clone());
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(&runner, &sleeper, host.as_ref(), &QuietWire, settings(&dir));

    let rings = agent
        .configure_corosync_via(Ipv4Addr::new(10, 20, 30, 40), HostOverrides::default())
        .unwrap();

    assert_eq!(rings[1].name, "eth1");
    assert_eq!(rings[0].mcast_port, rings[1].mcast_port);
    assert!(dir.path().join("corosync.conf").exists());
    assert!(dir.path().join("ifcfg-eth1").exists());

    let printed = serde_json::to_value(&rings).unwrap();
    assert_eq!(printed[1]["name"], "eth1");
    assert_eq!(printed[1]["ring_number"], 1);
    assert_eq!(printed[1]["ipv4"]["addr"], "10.0.0.37");
    assert_eq!(printed[1]["ipv4"]["prefix_len"], 24);
    assert_eq!(printed[0]["mcast_port"], printed[1]["mcast_port"]);

    let erase = runner.position("cibadmin -f -E").unwrap();
    let stop = runner.position("systemctl stop pacemaker").unwrap();
    let restart = runner.position("systemctl restart corosync").unwrap();
    let enable = runner.position("systemctl enable corosync").unwrap();
    assert!(erase < stop && stop < restart && restart < enable);
}

#[test]
fn test_configure_corosync_with_host_file_and_cli() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("ringmaster.cfg"),
        "[corosync]\nmcast_port = 4400\nring1_iface = eth0\nring1_ipaddr = 10.42.42.10\nring1_netmask = 255.255.0.0\n",
    )
    .unwrap();
    let host = Host::two_nics();
    let runner = single_node_runner(host.clone());
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(&runner, &sleeper, host.as_ref(), &QuietWire, settings(&dir));

    let cli = HostOverrides {
        ring1_iface: Some("eth1".to_string()),
        ..Default::default()
    };
    let rings = agent
        .configure_corosync_via(Ipv4Addr::new(10, 20, 30, 40), cli)
        .unwrap();

    assert_eq!(rings[1].name, "eth1");
    assert_eq!(rings[1].mcast_port, Some(4400));
    assert_eq!(rings[0].mcast_port, Some(4400));
    assert!(runner.ran("ip addr add 10.42.42.10/16 dev eth1"));

    let conf = fs::read_to_string(dir.path().join("corosync.conf")).unwrap();
    assert!(conf.contains("bindnetaddr: 10.42.0.0"));
}

#[test]
fn test_configure_corosync_requires_manager_url() {
    let dir = TempDir::new().unwrap();
    let host = Host::two_nics();
    let runner = single_node_runner(host.clone());
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(
        &runner,
        &sleeper,
        host.as_ref(),
        &QuietWire,
        AgentSettings {
            manager_url: String::new(),
            ..settings(&dir)
        },
    );

    assert!(agent.configure_corosync(HostOverrides::default()).is_err());
    assert!(runner.calls().is_empty());
}

#[test]
fn test_unconfigure_corosync() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("corosync.conf"), "totem {}\n").unwrap();
    let host = Host::two_nics();
    let runner = single_node_runner(host.clone());
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(&runner, &sleeper, host.as_ref(), &QuietWire, settings(&dir));

    agent.unconfigure_corosync().unwrap();
    assert!(!dir.path().join("corosync.conf").exists());
}

// ============================================================================
// Pacemaker, fencing and nodes
// ============================================================================

#[test]
fn test_configure_pacemaker_uses_configured_agent() {
    let dir = TempDir::new().unwrap();
    let host = Host::two_nics();
    let runner = ScriptedRunner::new(|argv| match argv.join(" ").as_str() {
        "crm status" => CommandOutput::success("Current DC: node1 - partition with quorum\n"),
        "crm_node -l" => CommandOutput::success("1 node1 member\n"),
        _ => CommandOutput::success(""),
    });
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(
        &runner,
        &sleeper,
        host.as_ref(),
        &QuietWire,
        AgentSettings {
            fence_agent: "stonith:fence_virsh".to_string(),
            ..settings(&dir)
        },
    );

    let report = agent.configure_pacemaker().unwrap();
    assert!(report.properties_applied);
    assert!(runner.ran("crm -F configure primitive st-fencing stonith:fence_virsh"));
}

#[test]
fn test_configure_fencing_for_node() {
    let dir = TempDir::new().unwrap();
    let host = Host::two_nics();
    let runner = ScriptedRunner::new(|argv| match argv[0].as_str() {
        "cibadmin" => CommandOutput::success("<nodes><node id=\"1\" uname=\"node1\"/></nodes>"),
        _ => CommandOutput::success(""),
    });
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(&runner, &sleeper, host.as_ref(), &QuietWire, settings(&dir));

    agent
        .configure_fencing_for("node1", r#"[{"agent": "fence_apc", "port": 7}]"#)
        .unwrap();

    assert!(runner.ran("crm_attribute --type nodes --node node1 --name fence_0_agent --update fence_apc"));
    assert!(runner.ran("crm_attribute --type nodes --node node1 --name fence_0_port --update 7"));
    assert!(agent.configure_fencing_for("node1", "{not json").is_err());
}

#[test]
fn test_delete_node() {
    let dir = TempDir::new().unwrap();
    let host = Host::two_nics();
    let runner = ScriptedRunner::new(|argv| match argv.join(" ").as_str() {
        "crm_node -l" => CommandOutput::success("1 node1 member\n2 node2 lost\n"),
        _ => CommandOutput::success(""),
    });
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(&runner, &sleeper, host.as_ref(), &QuietWire, settings(&dir));

    agent.delete_node("node2").unwrap();
    assert!(runner.ran("crm_node --force -R 2"));
    assert_eq!(runner.count("cibadmin"), 2);
}

#[test]
fn test_host_corosync_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("ringmaster.cfg"),
        "[corosync]\nmcast_port = 4400\nring1_iface = eth1\n",
    )
    .unwrap();
    let host = Host::two_nics();
    let runner = ScriptedRunner::always_ok();
    let sleeper = RecordingSleeper::new();
    let agent = Agent::new(&runner, &sleeper, host.as_ref(), &QuietWire, settings(&dir));

    let overrides = agent.host_corosync_config().unwrap();
    assert_eq!(
        serde_json::to_value(&overrides).unwrap(),
        serde_json::json!({"mcast_port": 4400, "ring1_iface": "eth1"})
    );
}

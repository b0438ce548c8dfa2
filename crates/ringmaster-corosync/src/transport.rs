//! Heartbeat transport actions: plan both rings, write the config, and
//! manage the corosync service.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use ringmaster_common::{CommandRunner, Result, ServiceAction, TRANSPORT_SERVICE, service};

use crate::capture::PacketCapture;
use crate::config_file::{
    DEFAULT_TRANSPORT_CONFIG, remove_transport_config, render_transport_config,
    write_transport_config,
};
use crate::interface::{InterfaceProbe, RingInterface};
use crate::negotiate::{DEFAULT_DISCOVER_WINDOW_SECS, DEFAULT_PROPOSE_WINDOW, McastPortNegotiator};
use crate::topology::{Ring1Config, Ring1Request, RingTopologyPlanner, check_ring0};

/// Where the transport config lives and how long negotiation listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub config_path: PathBuf,
    /// `None` skips ifcfg persistence
    pub ifcfg_dir: Option<PathBuf>,
    pub propose_window: Duration,
    pub discover_window_secs: RangeInclusive<u64>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_TRANSPORT_CONFIG),
            ifcfg_dir: None,
            propose_window: DEFAULT_PROPOSE_WINDOW,
            discover_window_secs: DEFAULT_DISCOVER_WINDOW_SECS,
        }
    }
}

pub struct TransportConfigurator<'a> {
    runner: &'a dyn CommandRunner,
    probe: &'a dyn InterfaceProbe,
    capture: &'a dyn PacketCapture,
    settings: TransportSettings,
}

impl<'a> TransportConfigurator<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        probe: &'a dyn InterfaceProbe,
        capture: &'a dyn PacketCapture,
        settings: TransportSettings,
    ) -> Self {
        Self {
            runner,
            probe,
            capture,
            settings,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn planner(&self) -> RingTopologyPlanner<'a> {
        let planner = RingTopologyPlanner::new(self.runner, self.probe);
        match &self.settings.ifcfg_dir {
            Some(dir) => planner.with_ifcfg_dir(dir.clone()),
            None => planner,
        }
    }

    /// Detect ring0, build ring1 and settle on one multicast port for both
    pub fn plan_rings(&self, manager: Ipv4Addr, request: &Ring1Request) -> Result<Vec<RingInterface>> {
        let planner = self.planner();
        let mut ring0 = planner.detect_ring0(manager)?;
        check_ring0(&ring0)?;

        let ring1 = match Ring1Config::resolve(request, &ring0)? {
            Ring1Config::Manual(config) => planner.manual_ring1(&config)?,
            Ring1Config::AutoDetected(config) => {
                let mut ring1 = planner.detect_ring1(&ring0, &config)?;
                McastPortNegotiator::new(self.capture)
                    .with_windows(
                        self.settings.propose_window,
                        self.settings.discover_window_secs.clone(),
                    )
                    .negotiate(&mut ring1)?;
                ring1
            }
        };

        ring0.mcast_port = ring1.mcast_port;
        Ok(vec![ring0, ring1])
    }

    /// Plan the rings and write the transport config. The service is left
    /// alone; callers stop the resource manager before `start`.
    pub fn configure(&self, manager: Ipv4Addr, request: &Ring1Request) -> Result<Vec<RingInterface>> {
        let rings = self.plan_rings(manager, request)?;
        let content = render_transport_config(&rings)?;
        write_transport_config(&self.settings.config_path, &content)?;
        Ok(rings)
    }

    /// Restart the transport and enable it at boot
    pub fn start(&self) -> Result<()> {
        service(self.runner, ServiceAction::Restart, TRANSPORT_SERVICE)?;
        service(self.runner, ServiceAction::Enable, TRANSPORT_SERVICE)?;
        info!("Started {}", TRANSPORT_SERVICE);
        Ok(())
    }

    /// Stop and disable the transport, then drop its config
    pub fn unconfigure(&self) -> Result<()> {
        service(self.runner, ServiceAction::Stop, TRANSPORT_SERVICE)?;
        service(self.runner, ServiceAction::Disable, TRANSPORT_SERVICE)?;
        remove_transport_config(&self.settings.config_path)?;
        info!("Unconfigured {}", TRANSPORT_SERVICE);
        Ok(())
    }
}

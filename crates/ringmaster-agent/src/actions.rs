//! The actions the agent exposes, composed from the corosync and pacemaker
//! crates.

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use tracing::info;

use ringmaster_common::{CommandRunner, Sleeper, local_node_name};
use ringmaster_corosync::{
    InterfaceProbe, PacketCapture, RingInterface, TransportConfigurator, resolve_endpoint,
};
use ringmaster_pacemaker::{
    BootstrapReport, CibAdmin, CibFenceAttributes, NodeRegistry, ResourceManager,
    configure_fencing, parse_fencing_agents, unconfigure_fencing,
};

use crate::settings::{AgentSettings, HostOverrides};

/// Host collaborators plus settings; one per invocation
pub struct Agent<'a> {
    runner: &'a dyn CommandRunner,
    sleeper: &'a dyn Sleeper,
    probe: &'a dyn InterfaceProbe,
    capture: &'a dyn PacketCapture,
    settings: AgentSettings,
}

impl<'a> Agent<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        sleeper: &'a dyn Sleeper,
        probe: &'a dyn InterfaceProbe,
        capture: &'a dyn PacketCapture,
        settings: AgentSettings,
    ) -> Self {
        Self {
            runner,
            sleeper,
            probe,
            capture,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn transport(&self) -> TransportConfigurator<'a> {
        TransportConfigurator::new(
            self.runner,
            self.probe,
            self.capture,
            self.settings.transport_settings(),
        )
    }

    fn resource_manager(&self) -> ResourceManager<'a> {
        ResourceManager::new(self.runner, self.sleeper, self.settings.bootstrap_settings())
    }

    /// Overrides from the host file with `cli` applied on top
    pub fn host_overrides(&self, cli: HostOverrides) -> Result<HostOverrides> {
        let path = &self.settings.host_overrides_file;
        let file = HostOverrides::load(path)
            .with_context(|| format!("Failed to read host overrides from {}", path.display()))?;
        Ok(file.merged_with(cli))
    }

    pub fn configure_corosync(&self, cli: HostOverrides) -> Result<Vec<RingInterface>> {
        let url = self.settings.require_manager_url()?;
        let manager =
            resolve_endpoint(url).with_context(|| format!("Failed to resolve {}", url))?;
        self.configure_corosync_via(manager, cli)
    }

    /// Configure the transport with ring0 on the route to `manager`
    pub fn configure_corosync_via(
        &self,
        manager: Ipv4Addr,
        cli: HostOverrides,
    ) -> Result<Vec<RingInterface>> {
        let overrides = self.host_overrides(cli)?;
        let transport = self.transport();
        let rings = transport
            .configure(manager, &overrides.ring1_request())
            .context("Failed to configure corosync rings")?;

        // corosync cannot be restarted underneath a running pacemaker
        self.resource_manager()
            .unconfigure()
            .context("Failed to stop pacemaker")?;
        transport.start().context("Failed to start corosync")?;

        for ring in &rings {
            info!(
                "ring{}: {} {} mcastport {}",
                ring.ring_number,
                ring.name,
                ring.ipv4.map(|net| net.to_string()).unwrap_or_default(),
                ring.mcast_port.unwrap_or_default()
            );
        }
        Ok(rings)
    }

    pub fn unconfigure_corosync(&self) -> Result<()> {
        self.transport()
            .unconfigure()
            .context("Failed to unconfigure corosync")
    }

    pub fn configure_pacemaker(&self) -> Result<BootstrapReport> {
        self.resource_manager()
            .configure()
            .context("Failed to configure pacemaker")
    }

    pub fn unconfigure_pacemaker(&self) -> Result<()> {
        self.resource_manager()
            .unconfigure()
            .context("Failed to unconfigure pacemaker")
    }

    /// Replace this node's fence agents with the JSON array `agents`
    pub fn configure_fencing(&self, agents: &str) -> Result<()> {
        let node = local_node_name()?;
        self.configure_fencing_for(&node, agents)
    }

    pub fn configure_fencing_for(&self, node: &str, agents: &str) -> Result<()> {
        let agents = parse_fencing_agents(agents)?;
        let cib = CibAdmin::new(self.runner, self.sleeper);
        let store = CibFenceAttributes::new(self.runner, &cib);
        configure_fencing(&store, node, &agents)
            .with_context(|| format!("Failed to configure fencing on {}", node))
    }

    pub fn unconfigure_fencing(&self) -> Result<()> {
        unconfigure_fencing(self.runner, &self.settings.fence_primitive)
            .context("Failed to unconfigure fencing")
    }

    pub fn delete_node(&self, name: &str) -> Result<()> {
        let cib = CibAdmin::new(self.runner, self.sleeper);
        NodeRegistry::new(self.runner)
            .remove_node(&cib, name)
            .with_context(|| format!("Failed to delete node {}", name))
    }

    pub fn host_corosync_config(&self) -> Result<HostOverrides> {
        self.host_overrides(HostOverrides::default())
    }
}

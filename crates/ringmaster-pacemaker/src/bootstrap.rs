// Resource manager bootstrap
// Brings pacemaker up on top of a running transport and applies cluster-wide
// policy. Several nodes may run this at once; the fencing primitive is the
// rendezvous that decides which of them applies the properties.

use std::time::Duration;

use tracing::{debug, info, warn};

use ringmaster_common::{
    CommandRunner, HaError, RESOURCE_MANAGER_SERVICE, Result, ServiceAction, Sleeper,
    TRANSPORT_SERVICE, service, service_running,
};

use crate::cib::CibAdmin;
use crate::fencing::{DEFAULT_FENCE_AGENT, FENCE_PRIMITIVE, reset_fencing_primitive};
use crate::membership::{NodeRegistry, cluster_reachable};

/// Window within which resource monitor failures are counted
pub const RESOURCE_FAILURE_WINDOW: &str = "20m";
/// Monitor failures within the window before a resource migrates
pub const RESOURCE_MIGRATION_THRESHOLD: u32 = 3;
pub const RESOURCE_STICKINESS: u32 = 1000;

/// Bootstrap progress, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootstrapState {
    Unconfigured,
    TransportReady,
    ResourceManagerStarting,
    WaitingForLeader,
    LeaderElected,
    FencingReset,
    FencingPrimitiveCreateAttempted,
    PropertiesSet,
    Ready,
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BootstrapState::Unconfigured => "UNCONFIGURED",
            BootstrapState::TransportReady => "TRANSPORT_READY",
            BootstrapState::ResourceManagerStarting => "RESOURCE_MANAGER_STARTING",
            BootstrapState::WaitingForLeader => "WAITING_FOR_LEADER",
            BootstrapState::LeaderElected => "LEADER_ELECTED",
            BootstrapState::FencingReset => "FENCING_RESET",
            BootstrapState::FencingPrimitiveCreateAttempted => "FENCING_PRIMITIVE_CREATE_ATTEMPTED",
            BootstrapState::PropertiesSet => "PROPERTIES_SET",
            BootstrapState::Ready => "READY",
        };
        write!(f, "{}", name)
    }
}

/// What the cluster does when it loses quorum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumPolicy {
    Ignore,
    Stop,
}

impl QuorumPolicy {
    /// Two-node clusters can never keep quorum through a failure
    pub fn for_cluster_size(nodes: usize) -> Self {
        if nodes > 2 {
            QuorumPolicy::Stop
        } else {
            QuorumPolicy::Ignore
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuorumPolicy::Ignore => "ignore",
            QuorumPolicy::Stop => "stop",
        }
    }
}

/// Result of trying to create the fencing primitive
#[derive(Debug)]
pub enum PrimitiveCreation {
    Created,
    /// Creation failed but a primitive of that name exists; another node
    /// won the race.
    AlreadyExists,
    Failed(HaError),
}

/// Outcome of a successful bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    pub quorum_policy: QuorumPolicy,
    /// False when another node created the fencing primitive first and is
    /// trusted to apply the properties
    pub properties_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSettings {
    pub fence_primitive: String,
    pub fence_agent: String,
    pub leader_poll_attempts: u32,
    pub leader_poll_interval: Duration,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            fence_primitive: FENCE_PRIMITIVE.to_string(),
            fence_agent: DEFAULT_FENCE_AGENT.to_string(),
            leader_poll_attempts: 120,
            leader_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Value of the `Current DC:` line of `crm status`, if a leader is elected
pub fn elected_leader(status: &str) -> Option<&str> {
    status.lines().find_map(|line| {
        let dc = line.strip_prefix("Current DC:")?.trim();
        match dc.split_whitespace().next() {
            None | Some("NONE") => None,
            Some(_) => Some(dc),
        }
    })
}

pub struct ResourceManager<'a> {
    runner: &'a dyn CommandRunner,
    sleeper: &'a dyn Sleeper,
    settings: BootstrapSettings,
    state: BootstrapState,
}

impl<'a> ResourceManager<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        sleeper: &'a dyn Sleeper,
        settings: BootstrapSettings,
    ) -> Self {
        Self {
            runner,
            sleeper,
            settings,
            state: BootstrapState::Unconfigured,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn advance(&mut self, next: BootstrapState) {
        debug!("Bootstrap {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run the full bootstrap from a configured transport to a ready cluster
    pub fn configure(&mut self) -> Result<BootstrapReport> {
        self.state = BootstrapState::Unconfigured;

        self.ensure_transport()?;
        self.advance(BootstrapState::TransportReady);

        self.advance(BootstrapState::ResourceManagerStarting);
        service(self.runner, ServiceAction::Restart, RESOURCE_MANAGER_SERVICE)?;

        self.advance(BootstrapState::WaitingForLeader);
        let leader = self.wait_for_leader()?;
        info!("Cluster leader elected: {}", leader);

        self.advance(BootstrapState::LeaderElected);
        service(self.runner, ServiceAction::Enable, RESOURCE_MANAGER_SERVICE)?;

        let quorum_policy =
            QuorumPolicy::for_cluster_size(NodeRegistry::new(self.runner).node_count()?);

        reset_fencing_primitive(self.runner, &self.settings.fence_primitive)?;
        self.advance(BootstrapState::FencingReset);

        let creation = self.create_fencing_primitive()?;
        self.advance(BootstrapState::FencingPrimitiveCreateAttempted);
        match creation {
            PrimitiveCreation::Created => {}
            PrimitiveCreation::AlreadyExists => {
                info!(
                    "{} already exists; another node is configuring the cluster",
                    self.settings.fence_primitive
                );
                return Ok(BootstrapReport {
                    quorum_policy,
                    properties_applied: false,
                });
            }
            PrimitiveCreation::Failed(e) => return Err(e),
        }

        self.apply_properties(quorum_policy)?;
        self.advance(BootstrapState::PropertiesSet);

        self.advance(BootstrapState::Ready);
        info!("Cluster configured, no-quorum-policy={}", quorum_policy.as_str());
        Ok(BootstrapReport {
            quorum_policy,
            properties_applied: true,
        })
    }

    /// Transport must be running; one restart is attempted if it is not
    fn ensure_transport(&self) -> Result<()> {
        if service_running(self.runner, TRANSPORT_SERVICE)? {
            return Ok(());
        }
        warn!("{} is not running, restarting it", TRANSPORT_SERVICE);
        service(self.runner, ServiceAction::Restart, TRANSPORT_SERVICE)?;
        service(self.runner, ServiceAction::Status, TRANSPORT_SERVICE)
    }

    fn wait_for_leader(&self) -> Result<String> {
        let attempts = self.settings.leader_poll_attempts;
        for attempt in 1..=attempts {
            let status = self.runner.run("crm", &["status"])?;
            if let Some(leader) = elected_leader(&status.stdout) {
                return Ok(leader.to_string());
            }
            debug!("No cluster leader yet (attempt {}/{})", attempt, attempts);
            if attempt < attempts {
                self.sleeper.sleep(self.settings.leader_poll_interval);
            }
        }
        Err(HaError::Timeout(format!(
            "Failed to start {}: no leader after {} attempts",
            RESOURCE_MANAGER_SERVICE, attempts
        )))
    }

    /// Create the fencing primitive. On failure, an existing primitive of
    /// the same name counts as a lost race; its definition is not compared.
    pub fn create_fencing_primitive(&self) -> Result<PrimitiveCreation> {
        let primitive = self.settings.fence_primitive.as_str();
        let created = self.runner.try_run(
            "crm",
            &["-F", "configure", "primitive", primitive, &self.settings.fence_agent],
        );
        let err = match created {
            Ok(_) => return Ok(PrimitiveCreation::Created),
            Err(e) => e,
        };
        let shown = self.runner.run("crm", &["resource", "show", primitive])?;
        if shown.is_success() {
            Ok(PrimitiveCreation::AlreadyExists)
        } else {
            Ok(PrimitiveCreation::Failed(err))
        }
    }

    fn apply_properties(&self, quorum_policy: QuorumPolicy) -> Result<()> {
        let properties = [
            format!("no-quorum-policy=\"{}\"", quorum_policy.as_str()),
            "symmetric-cluster=\"true\"".to_string(),
            "cluster-infrastructure=\"openais\"".to_string(),
            "stonith-enabled=\"true\"".to_string(),
        ];
        for property in &properties {
            self.runner
                .try_run("crm", &["configure", "property", property])?;
        }

        let defaults = [
            format!("resource-stickiness={}", RESOURCE_STICKINESS),
            format!("failure-timeout={}", RESOURCE_FAILURE_WINDOW),
            format!("migration-threshold={}", RESOURCE_MIGRATION_THRESHOLD),
        ];
        for default in &defaults {
            self.runner
                .try_run("crm", &["configure", "rsc_defaults", default])?;
        }
        Ok(())
    }

    /// Stop the resource manager and disable it at boot. The last node in
    /// the cluster also wipes the CIB. Does nothing if the resource manager
    /// is not answering.
    pub fn unconfigure(&self) -> Result<()> {
        if !cluster_reachable(self.runner)? {
            debug!("{} not running; nothing to unconfigure", RESOURCE_MANAGER_SERVICE);
            return Ok(());
        }
        if NodeRegistry::new(self.runner).node_count()? < 2 {
            info!("Last node in the cluster, erasing the CIB");
            CibAdmin::new(self.runner, self.sleeper).erase()?;
        }
        service(self.runner, ServiceAction::Stop, RESOURCE_MANAGER_SERVICE)?;
        service(self.runner, ServiceAction::Disable, RESOURCE_MANAGER_SERVICE)?;
        Ok(())
    }
}

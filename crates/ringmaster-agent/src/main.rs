//! ringmaster-agent - bootstrap corosync and pacemaker on this node

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use ringmaster_agent::{Agent, AgentSettings, HostOverrides, LoggingConfig, init_logging};
use ringmaster_common::{SystemCommandRunner, ThreadSleeper};
use ringmaster_corosync::{RawSocketCapture, SystemInterfaceProbe};

#[derive(Parser)]
#[command(name = "ringmaster-agent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Agent settings file (TOML)
    #[arg(short, long, global = true, env = "RINGMASTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan both heartbeat rings, write corosync.conf and start corosync;
    /// prints the planned rings as JSON
    ConfigureCorosync {
        /// Device to carry ring1
        #[arg(long)]
        ring1_iface: Option<String>,
        /// ring1 IPv4 address
        #[arg(long)]
        ring1_ipaddr: Option<Ipv4Addr>,
        /// ring1 netmask, e.g. 255.255.0.0
        #[arg(long)]
        ring1_netmask: Option<Ipv4Addr>,
        /// Multicast port shared by both rings
        #[arg(long)]
        mcast_port: Option<u16>,
    },
    /// Stop corosync and remove its configuration
    UnconfigureCorosync,
    /// Start pacemaker and apply cluster policy
    ConfigurePacemaker,
    /// Stop pacemaker; the last node also erases the CIB
    UnconfigurePacemaker,
    /// Replace this node's fence agents
    ConfigureFencing {
        /// JSON array of agent attribute objects
        agents: String,
    },
    /// Remove the fencing primitive when this is the last node
    UnconfigureFencing,
    /// Remove a node from the cluster
    DeleteNode {
        name: String,
    },
    /// Print this host's corosync overrides as JSON
    HostCorosyncConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig::from_env().with_verbosity(cli.verbose);
    let _logging_guard = init_logging(&logging)?;

    let settings = AgentSettings::load(cli.config.as_deref())?;

    let runner = SystemCommandRunner::new();
    let sleeper = ThreadSleeper;
    let probe = SystemInterfaceProbe::new();
    let capture = RawSocketCapture::new();
    let agent = Agent::new(&runner, &sleeper, &probe, &capture, settings);

    match cli.command {
        Commands::ConfigureCorosync {
            ring1_iface,
            ring1_ipaddr,
            ring1_netmask,
            mcast_port,
        } => {
            let cli_overrides = HostOverrides {
                mcast_port,
                ring1_iface,
                ring1_ipaddr,
                ring1_netmask,
            };
            let rings = agent.configure_corosync(cli_overrides)?;
            println!("{}", serde_json::to_string_pretty(&rings)?);
        }
        Commands::UnconfigureCorosync => agent.unconfigure_corosync()?,
        Commands::ConfigurePacemaker => {
            let report = agent.configure_pacemaker()?;
            if !report.properties_applied {
                info!("Cluster properties left to the node that created the fencing primitive");
            }
        }
        Commands::UnconfigurePacemaker => agent.unconfigure_pacemaker()?,
        Commands::ConfigureFencing { agents } => agent.configure_fencing(&agents)?,
        Commands::UnconfigureFencing => agent.unconfigure_fencing()?,
        Commands::DeleteNode { name } => agent.delete_node(&name)?,
        Commands::HostCorosyncConfig => {
            let overrides = agent.host_corosync_config()?;
            println!("{}", serde_json::to_string_pretty(&overrides)?);
        }
    }
    Ok(())
}

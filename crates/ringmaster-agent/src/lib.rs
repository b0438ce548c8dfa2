//! Ringmaster Agent - per-node cluster bootstrap actions
//!
//! Wires the host (commands, interfaces, packet capture) into the corosync
//! and pacemaker crates and loads the agent's settings.

pub mod actions;
pub mod logging;
pub mod settings;

pub use actions::Agent;
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use settings::{AgentSettings, HostOverrides};

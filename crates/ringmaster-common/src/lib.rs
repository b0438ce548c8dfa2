//! Ringmaster Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all Ringmaster components:
//! - Error type and result alias
//! - The external command seam
//! - Context traits for dependency injection
//! - Service names and other shared constants

pub mod command;
pub mod error;
pub mod traits;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use error::{HaError, Result};
pub use traits::*;
pub use utils::local_node_name;

/// Heartbeat transport service
pub const TRANSPORT_SERVICE: &str = "corosync";

/// Cluster resource manager service
pub const RESOURCE_MANAGER_SERVICE: &str = "pacemaker";

/// Service control actions issued through `systemctl`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Status,
    Restart,
    Stop,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Status => "is-active",
            ServiceAction::Restart => "restart",
            ServiceAction::Stop => "stop",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        }
    }
}

impl std::fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Run a service action, requiring success
pub fn service(runner: &dyn CommandRunner, action: ServiceAction, name: &str) -> Result<()> {
    runner.try_run("systemctl", &[action.as_str(), name])?;
    Ok(())
}

/// Run a service status check; `false` when the service is not running
pub fn service_running(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    let output = runner.run("systemctl", &[ServiceAction::Status.as_str(), name])?;
    Ok(output.is_success())
}

//! Ringmaster Pacemaker - cluster resource manager bootstrap
//!
//! - Retrying CIB transactions (`cib`)
//! - Node registry queries and node removal (`membership`)
//! - Fence agent attributes and the fencing primitive (`fencing`)
//! - The bootstrap sequence and teardown (`bootstrap`)

pub mod bootstrap;
pub mod cib;
pub mod fencing;
pub mod membership;

pub use bootstrap::{
    BootstrapReport, BootstrapSettings, BootstrapState, PrimitiveCreation, QuorumPolicy,
    ResourceManager,
};
pub use cib::{CibAdmin, ConfigTransaction};
pub use fencing::{
    CibFenceAttributes, FenceAttributeStore, FencingAgentSpec, configure_fencing,
    parse_fencing_agents, unconfigure_fencing,
};
pub use membership::{ClusterNode, NodeRegistry};

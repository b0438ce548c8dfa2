//! Ringmaster Corosync - redundant heartbeat ring setup
//!
//! This crate covers everything up to a running heartbeat transport:
//! - Ring interface model and host probing
//! - ring0/ring1 topology planning and addressing
//! - Multicast port negotiation over passive packet capture
//! - corosync.conf rendering and atomic writes

pub mod capture;
pub mod config_file;
pub mod interface;
pub mod negotiate;
pub mod topology;
pub mod transport;

pub use capture::{CONTROL_PORT, CaptureFilter, CaptureSession, PacketCapture, RawSocketCapture};
pub use config_file::{
    DEFAULT_IFCFG_DIR, DEFAULT_TRANSPORT_CONFIG, render_transport_config, write_ifcfg,
    write_transport_config,
};
pub use interface::{InterfaceInfo, InterfaceProbe, Ipv4Net, RingInterface, SystemInterfaceProbe};
pub use negotiate::{McastPortNegotiator, PortPool};
pub use topology::{
    AutoDetectedRing1Config, ManualRing1Config, Ring1Config, Ring1Request, RingTopologyPlanner,
    derive_ring1_address, derive_ring1_subnet, resolve_endpoint,
};
pub use transport::{TransportConfigurator, TransportSettings};

//! Passive observation of multicast heartbeat traffic
//!
//! A capture session joins the ring's multicast group through a socket bound
//! to the control port, then reads raw IPv4/UDP datagrams on the ring device
//! and reports the destination port of every datagram addressed to the
//! group. Sessions are bounded by a window and cannot be cancelled early
//! except by the caller dropping them.

use std::io::Read;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use ringmaster_common::{HaError, Result};

use crate::interface::RingInterface;

/// Fixed port the negotiating socket binds to when joining the group
pub const CONTROL_PORT: u16 = 52122;

const IPPROTO_UDP: u8 = 17;
/// Source and destination ports lead the UDP header
const UDP_PORTS_LEN: usize = 4;
const MIN_IPV4_HEADER_LEN: usize = 20;

/// Enough for the largest IPv4 header plus the UDP ports
const SNAPLEN: usize = 128;

/// Shortest read timeout handed to the socket; a zero `timeval` blocks forever
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Traffic of interest: UDP addressed to one multicast group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFilter {
    pub group: Ipv4Addr,
}

impl CaptureFilter {
    pub fn for_ring(iface: &RingInterface) -> Self {
        Self {
            group: iface.mcast_addr(),
        }
    }
}

impl std::fmt::Display for CaptureFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host {} and udp", self.group)
    }
}

/// Opens bounded capture sessions on a ring device
pub trait PacketCapture: Send + Sync {
    fn open(&self, iface: &RingInterface, window: Duration) -> Result<Box<dyn CaptureSession>>;
}

/// A running capture
pub trait CaptureSession {
    /// Destination port of the next matching datagram, or `None` once the
    /// window has closed.
    fn next_port(&mut self) -> Result<Option<u16>>;
}

/// Destination port of an IPv4/UDP datagram addressed to the filter's group.
///
/// `Ok(None)` for well-formed traffic the filter excludes; an error for
/// anything that cannot be decoded.
pub fn decode_udp_destination(packet: &[u8], filter: &CaptureFilter) -> Result<Option<u16>> {
    if packet.len() < MIN_IPV4_HEADER_LEN {
        return Err(HaError::capture(format!(
            "Error decoding network packet: {} bytes is shorter than an IPv4 header",
            packet.len()
        )));
    }
    let version = packet[0] >> 4;
    if version != 4 {
        return Err(HaError::capture(format!(
            "Error decoding network packet: IP version {}",
            version
        )));
    }
    let header_len = usize::from(packet[0] & 0x0f) * 4;
    if header_len < MIN_IPV4_HEADER_LEN {
        return Err(HaError::capture(format!(
            "Error decoding network packet: header length {}",
            header_len
        )));
    }
    if packet[9] != IPPROTO_UDP {
        return Ok(None);
    }
    let destination = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    if destination != filter.group {
        return Ok(None);
    }
    let udp = packet.get(header_len..).unwrap_or_default();
    if udp.len() < UDP_PORTS_LEN {
        return Err(HaError::capture(
            "Error decoding network packet: truncated UDP header",
        ));
    }
    Ok(Some(u16::from_be_bytes([udp[2], udp[3]])))
}

/// `PacketCapture` over a raw IPv4/UDP socket bound to the ring device
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSocketCapture;

impl RawSocketCapture {
    pub fn new() -> Self {
        Self
    }

    /// Join the ring's group on the control port so the kernel delivers
    /// its traffic to this host.
    fn subscribe(iface: &RingInterface) -> Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| HaError::capture(format!("Error opening multicast socket: {}", e)))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| HaError::capture(format!("Error configuring multicast socket: {}", e)))?;
        let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, CONTROL_PORT);
        socket
            .bind(&bind.into())
            .map_err(|e| HaError::capture(format!("Error binding {}: {}", bind, e)))?;
        let local = iface.address().unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket
            .join_multicast_v4(&iface.mcast_addr(), &local)
            .map_err(|e| {
                HaError::capture(format!(
                    "Error joining {} on {}: {}",
                    iface.mcast_addr(),
                    iface.name,
                    e
                ))
            })?;
        Ok(socket)
    }
}

impl PacketCapture for RawSocketCapture {
    fn open(&self, iface: &RingInterface, window: Duration) -> Result<Box<dyn CaptureSession>> {
        let membership = Self::subscribe(iface)?;
        let filter = CaptureFilter::for_ring(iface);

        let raw = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))
            .map_err(|e| HaError::capture(format!("Error opening capture: {}", e)))?;
        raw.bind_device(Some(iface.name.as_bytes())).map_err(|e| {
            HaError::capture(format!(
                "Error applying filter '{}' on {}: {}",
                filter, iface.name, e
            ))
        })?;
        debug!("Starting packet capture on {}:{}", iface.name, filter.group);

        Ok(Box::new(RawSocketSession {
            _membership: membership,
            socket: raw,
            filter,
            deadline: Instant::now() + window,
        }))
    }
}

/// Time left before `deadline`, or `None` once less than
/// `MIN_READ_TIMEOUT` remains
fn read_timeout(deadline: Instant, now: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(now);
    (remaining >= MIN_READ_TIMEOUT).then_some(remaining)
}

struct RawSocketSession {
    // Held so the group stays joined for the life of the session
    _membership: Socket,
    socket: Socket,
    filter: CaptureFilter,
    deadline: Instant,
}

impl CaptureSession for RawSocketSession {
    fn next_port(&mut self) -> Result<Option<u16>> {
        let mut buf = [0u8; SNAPLEN];
        loop {
            let Some(timeout) = read_timeout(self.deadline, Instant::now()) else {
                return Ok(None);
            };
            self.socket
                .set_read_timeout(Some(timeout))
                .map_err(|e| HaError::capture(format!("Error arming capture timeout: {}", e)))?;
            let len = match self.socket.read(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(HaError::capture(format!(
                        "Error reading from the network: {}",
                        e
                    )));
                }
            };
            if let Some(port) = decode_udp_destination(&buf[..len], &self.filter)? {
                return Ok(Some(port));
            }
        }
    }
}

//! Multicast port negotiation
//!
//! Peers agree on one multicast port without a coordinator. A node first
//! listens for a while and proposes a random odd port nobody was seen
//! using, then listens again (for a randomized window) and adopts the port
//! of any peer already broadcasting.
//!
//! This is best-effort convergence, not consensus: two nodes that start
//! within the same window and never overhear each other before committing
//! can end up on different ports.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use ringmaster_common::{HaError, Result};

use crate::capture::PacketCapture;
use crate::interface::RingInterface;

/// Default listen window before proposing a port
pub const DEFAULT_PROPOSE_WINDOW: Duration = Duration::from_secs(10);

/// Discovery window bounds in seconds; randomized per run to reduce races
pub const DEFAULT_DISCOVER_WINDOW_SECS: RangeInclusive<u64> = 5..=20;

/// Odd ports not yet seen carrying traffic
#[derive(Debug, Clone)]
pub struct PortPool {
    available: BTreeSet<u16>,
}

impl Default for PortPool {
    fn default() -> Self {
        Self {
            available: (1..=u16::MAX).step_by(2).collect(),
        }
    }
}

impl PortPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `port` as claimed by some peer
    pub fn remove(&mut self, port: u16) {
        self.available.remove(&port);
    }

    pub fn contains(&self, port: u16) -> bool {
        self.available.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    /// Uniformly random port from what is left
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u16> {
        if self.available.is_empty() {
            return None;
        }
        let idx = rng.random_range(0..self.available.len());
        self.available.iter().nth(idx).copied()
    }
}

/// Runs the propose-then-discover protocol over a packet capture
pub struct McastPortNegotiator<'a> {
    capture: &'a dyn PacketCapture,
    propose_window: Duration,
    discover_window_secs: RangeInclusive<u64>,
}

impl<'a> McastPortNegotiator<'a> {
    pub fn new(capture: &'a dyn PacketCapture) -> Self {
        Self {
            capture,
            propose_window: DEFAULT_PROPOSE_WINDOW,
            discover_window_secs: DEFAULT_DISCOVER_WINDOW_SECS,
        }
    }

    pub fn with_windows(
        mut self,
        propose_window: Duration,
        discover_window_secs: RangeInclusive<u64>,
    ) -> Self {
        self.propose_window = propose_window;
        self.discover_window_secs = discover_window_secs;
        self
    }

    /// Watch the ring for `window` and pick a random odd port nobody used
    pub fn propose_port(&self, iface: &RingInterface, window: Duration) -> Result<u16> {
        let mut pool = PortPool::new();
        let mut session = self.capture.open(iface, window)?;
        while let Some(port) = session.next_port()? {
            debug!("Saw traffic on mcast port {} ({})", port, iface.name);
            pool.remove(port);
        }
        pool.choose(&mut rand::rng()).ok_or_else(|| {
            HaError::configuration(format!("no free multicast port on {}", iface.name))
        })
    }

    /// Adopt the port of the first peer traffic seen within `window`;
    /// otherwise leave `iface.mcast_port` untouched.
    pub fn discover_existing_port(&self, iface: &mut RingInterface, window: Duration) -> Result<()> {
        let mut session = self.capture.open(iface, window)?;
        match session.next_port()? {
            Some(port) => {
                debug!("Sniffed multicast traffic on {}", port);
                iface.mcast_port = Some(port);
            }
            None => debug!(
                "Timed out after {} seconds, sniffed: 0",
                window.as_secs()
            ),
        }
        Ok(())
    }

    /// Propose a port, then defer to any peer already broadcasting
    pub fn negotiate(&self, iface: &mut RingInterface) -> Result<u16> {
        let proposed = self.propose_port(iface, self.propose_window)?;
        iface.mcast_port = Some(proposed);
        info!("Proposing {} for multicast port", proposed);

        let secs = rand::rng().random_range(self.discover_window_secs.clone());
        self.discover_existing_port(iface, Duration::from_secs(secs))?;

        let decided = iface.mcast_port.unwrap_or(proposed);
        info!("Decided on {} for multicast port", decided);
        Ok(decided)
    }
}

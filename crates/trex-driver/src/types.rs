//! Types shared between the driver layer and the port core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a physical port.
///
/// Port ids are dense, starting at zero, and double as the index into the
/// port registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(u8);

impl PortId {
    /// Creates a port id.
    pub const fn new(id: u8) -> Self {
        PortId(id)
    }

    /// Returns the raw id.
    pub const fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the id as an index into a port array.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u8> for PortId {
    fn from(id: u8) -> Self {
        PortId(id)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Port speed in Mbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortSpeed(u32);

impl PortSpeed {
    /// 1 Gigabit Ethernet
    pub const GE_1: Self = PortSpeed(1_000);
    /// 10 Gigabit Ethernet
    pub const GE_10: Self = PortSpeed(10_000);
    /// 100 Gigabit Ethernet
    pub const GE_100: Self = PortSpeed(100_000);

    /// Creates a new port speed from Mbps.
    pub const fn from_mbps(mbps: u32) -> Self {
        PortSpeed(mbps)
    }

    /// Returns the speed in Mbps.
    pub const fn as_mbps(&self) -> u32 {
        self.0
    }

    /// Returns the speed in Gbps.
    pub const fn as_gbps(&self) -> u32 {
        self.0 / 1_000
    }
}

impl fmt::Display for PortSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= 1_000 && self.0 % 1_000 == 0 {
            write!(f, "{} Gbps", self.as_gbps())
        } else {
            write!(f, "{} Mbps", self.0)
        }
    }
}

/// Static properties reported by the driver for one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortProperties {
    /// Driver name (e.g. "net_ixgbe").
    pub driver: String,
    /// Link speed.
    pub speed: PortSpeed,
}

/// Physical link state as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    /// Returns true if the link is up.
    pub const fn is_up(&self) -> bool {
        matches!(self, LinkState::Up)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Up => write!(f, "up"),
            LinkState::Down => write!(f, "down"),
        }
    }
}

/// Asynchronous link notification delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    pub port: PortId,
    pub state: LinkState,
}

/// Raw counters read from the NIC.
///
/// Packet and byte counts are cumulative since the driver started; rates are
/// the driver's current estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCounters {
    pub opackets: u64,
    pub obytes: u64,
    pub ipackets: u64,
    pub ibytes: u64,
    pub oerrors: u64,
    pub ierrors: u64,
    pub tx_pps: u64,
    pub tx_bps: u64,
    pub rx_pps: u64,
    pub rx_bps: u64,
}

/// One compiled stream inside a [`TxProgram`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEntry {
    pub stream_id: u32,
    /// Frame to transmit, without FCS.
    pub packet: Vec<u8>,
    /// Packets per second.
    pub pps: f64,
    /// Total packets to send, `None` for continuous streams.
    pub total_pkts: Option<u64>,
    /// True if this entry starts when the program starts.
    pub self_start: bool,
    /// Gap before the first packet, in microseconds.
    pub isg_usec: f64,
    /// Stream to chain to once this one finishes.
    pub next_stream_id: Option<u32>,
}

/// Executable transmit program handed to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxProgram {
    pub port: PortId,
    pub entries: Vec<TxEntry>,
}

impl TxProgram {
    pub fn new(port: PortId, entries: Vec<TxEntry>) -> Self {
        Self { port, entries }
    }

    /// Sum of the rates of the entries that start on their own.
    pub fn start_pps(&self) -> f64 {
        self.entries
            .iter()
            .filter(|e| e.self_start)
            .map(|e| e.pps)
            .sum()
    }

    /// Average frame length of the self-starting entries, weighted by rate.
    pub fn start_avg_packet_len(&self) -> f64 {
        let pps = self.start_pps();
        if pps <= 0.0 {
            return 0.0;
        }
        let bytes: f64 = self
            .entries
            .iter()
            .filter(|e| e.self_start)
            .map(|e| e.pps * e.packet.len() as f64)
            .sum();
        bytes / pps
    }
}

//! Stream definitions, the per-port stream table and the compiler contract.
//!
//! A [`Stream`] is what the remote API loads onto a port: one frame plus the
//! rate and burst shape it is sent with. Streams are staged in the port's
//! [`StreamTable`] and turned into an executable [`trex_driver::TxProgram`]
//! by a [`StreamCompiler`] when traffic starts.

mod compiler;
mod table;

pub use compiler::{BasicStreamCompiler, CompileError, StreamCompiler, MAX_PACKET_LEN, MIN_PACKET_LEN};
pub use table::{StreamTable, StreamTableError};

use serde::{Deserialize, Serialize};

/// Transmit mode of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TxMode {
    /// Send forever at `pps`.
    Continuous { pps: f64 },
    /// Send `total_pkts` packets at `pps`, then finish.
    SingleBurst { pps: f64, total_pkts: u64 },
    /// Send `count` bursts of `pkts_per_burst`, `ibg_usec` apart.
    MultiBurst {
        pps: f64,
        pkts_per_burst: u64,
        ibg_usec: f64,
        count: u64,
    },
}

impl TxMode {
    /// Packets per second of this mode.
    pub fn pps(&self) -> f64 {
        match self {
            TxMode::Continuous { pps }
            | TxMode::SingleBurst { pps, .. }
            | TxMode::MultiBurst { pps, .. } => *pps,
        }
    }

    /// Total packets sent, `None` for continuous streams.
    pub fn total_pkts(&self) -> Option<u64> {
        match self {
            TxMode::Continuous { .. } => None,
            TxMode::SingleBurst { total_pkts, .. } => Some(*total_pkts),
            TxMode::MultiBurst {
                pkts_per_burst,
                count,
                ..
            } => Some(pkts_per_burst.saturating_mul(*count)),
        }
    }
}

/// A packet-generation definition staged on a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    /// Stream id, unique within a port.
    pub id: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Starts with the port rather than being chained from another stream.
    #[serde(default = "default_true")]
    pub self_start: bool,
    /// Inter-stream gap in microseconds.
    #[serde(default)]
    pub isg_usec: f64,
    /// Stream to start when this one finishes.
    #[serde(default)]
    pub next_stream_id: Option<u32>,
    /// Frame bytes, without FCS.
    pub packet: Vec<u8>,
    pub mode: TxMode,
}

fn default_true() -> bool {
    true
}

impl Stream {
    /// Creates an enabled, self-starting continuous stream.
    pub fn continuous(id: u32, packet: Vec<u8>, pps: f64) -> Self {
        Self {
            id,
            enabled: true,
            self_start: true,
            isg_usec: 0.0,
            next_stream_id: None,
            packet,
            mode: TxMode::Continuous { pps },
        }
    }

    /// Creates an enabled, self-starting single-burst stream.
    pub fn single_burst(id: u32, packet: Vec<u8>, pps: f64, total_pkts: u64) -> Self {
        Self {
            mode: TxMode::SingleBurst { pps, total_pkts },
            ..Self::continuous(id, packet, pps)
        }
    }

    /// Chains this stream to `next`.
    pub fn with_next(mut self, next: u32) -> Self {
        self.next_stream_id = Some(next);
        self
    }

    /// Marks the stream as started only through chaining.
    pub fn chained_only(mut self) -> Self {
        self.self_start = false;
        self
    }
}

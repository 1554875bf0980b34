//! Aggregated per-port counters.

use serde::{Deserialize, Serialize};
use trex_driver::PortCounters;

/// Snapshot of a port's TX/RX counters.
///
/// Only the owning port refreshes this, by pulling counters from the driver.
/// The last refresh wins; no history is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub tx_pps: u64,
    pub tx_bps: u64,
    pub total_tx_pkts: u64,
    pub total_tx_bytes: u64,

    pub rx_pps: u64,
    pub rx_bps: u64,
    pub total_rx_pkts: u64,
    pub total_rx_bytes: u64,

    pub tx_rx_errors: u64,
}

impl PortStats {
    /// Zeroes the instantaneous rates, keeping cumulative counters.
    pub fn clear_rates(&mut self) {
        self.tx_pps = 0;
        self.tx_bps = 0;
        self.rx_pps = 0;
        self.rx_bps = 0;
    }

    /// Renders the snapshot the way the remote API reports it.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl From<PortCounters> for PortStats {
    fn from(c: PortCounters) -> Self {
        Self {
            tx_pps: c.tx_pps,
            tx_bps: c.tx_bps,
            total_tx_pkts: c.opackets,
            total_tx_bytes: c.obytes,
            rx_pps: c.rx_pps,
            rx_bps: c.rx_bps,
            total_rx_pkts: c.ipackets,
            total_rx_bytes: c.ibytes,
            tx_rx_errors: c.oerrors.saturating_add(c.ierrors),
        }
    }
}

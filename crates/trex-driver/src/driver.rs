//! The driver-layer trait consumed by the port core.

use async_trait::async_trait;

use crate::error::DriverResult;
use crate::types::{LinkState, PortCounters, PortId, PortProperties, TxProgram};

/// Packet I/O backend for a set of physical ports.
///
/// One driver instance serves every port of the system; each call names the
/// port it acts on. Transmit, halt and counter reads may block on the NIC and
/// are therefore async. Implementations must tolerate concurrent calls for
/// different ports.
///
/// A call that returns `Ok` is the driver's confirmation: the port core only
/// commits a state transition after the corresponding call has returned.
#[async_trait]
pub trait PortDriver: Send + Sync {
    /// Returns the driver name and link speed of a port.
    fn properties(&self, port: PortId) -> PortProperties;

    /// Returns the current physical link state of a port.
    fn link_state(&self, port: PortId) -> LinkState;

    /// Starts executing a compiled transmit program on a port.
    async fn begin_transmit(&self, port: PortId, program: &TxProgram) -> DriverResult<()>;

    /// Halts any transmission on a port.
    async fn halt_transmit(&self, port: PortId) -> DriverResult<()>;

    /// Reads the current NIC counters of a port.
    async fn read_counters(&self, port: PortId) -> DriverResult<PortCounters>;
}

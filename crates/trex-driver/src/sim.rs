//! In-memory driver used when no NIC is attached.
//!
//! `SimDriver` keeps per-port link state, the running program and a set of
//! counters. While a port transmits, every counter read advances the TX
//! counters by one second of the program's self-starting rate, which keeps
//! the numbers deterministic for tests. Failures can be injected one call at
//! a time, and an artificial latency lets callers exercise deadlines.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::driver::PortDriver;
use crate::error::{DriverError, DriverResult};
use crate::types::{LinkEvent, LinkState, PortCounters, PortId, PortProperties, PortSpeed, TxProgram};

/// Default driver name reported by [`SimDriver`].
pub const SIM_DRIVER_NAME: &str = "sim";

#[derive(Debug)]
struct SimPort {
    link: LinkState,
    program: Option<TxProgram>,
    counters: PortCounters,
    transmitted: Vec<TxProgram>,
    halts: usize,
    fail_transmit: Option<DriverError>,
    fail_halt: Option<DriverError>,
    fail_read: Option<DriverError>,
}

impl SimPort {
    fn new() -> Self {
        Self {
            link: LinkState::Up,
            program: None,
            counters: PortCounters::default(),
            transmitted: Vec::new(),
            halts: 0,
            fail_transmit: None,
            fail_halt: None,
            fail_read: None,
        }
    }

    /// Advances TX counters by one second of the running program.
    fn tick(&mut self) {
        match &self.program {
            Some(program) => {
                let pkts = program.start_pps().round() as u64;
                let bytes = (program.start_pps() * program.start_avg_packet_len()).round() as u64;
                self.counters.opackets += pkts;
                self.counters.obytes += bytes;
                self.counters.tx_pps = pkts;
                self.counters.tx_bps = bytes * 8;
            }
            None => {
                self.counters.tx_pps = 0;
                self.counters.tx_bps = 0;
            }
        }
    }
}

/// Simulated driver for a fixed number of ports.
pub struct SimDriver {
    properties: PortProperties,
    ports: Vec<Mutex<SimPort>>,
    latency: Mutex<Option<Duration>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
}

impl SimDriver {
    /// Creates a simulated driver with `port_count` ports, all link up.
    pub fn new(port_count: u8) -> Self {
        Self::with_properties(
            port_count,
            PortProperties {
                driver: SIM_DRIVER_NAME.to_string(),
                speed: PortSpeed::GE_10,
            },
        )
    }

    /// Creates a simulated driver reporting the given properties for every port.
    pub fn with_properties(port_count: u8, properties: PortProperties) -> Self {
        Self {
            properties,
            ports: (0..port_count).map(|_| Mutex::new(SimPort::new())).collect(),
            latency: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    /// Number of ports this driver serves.
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Delays every async driver call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Returns a receiver for link notifications raised by [`SimDriver::set_link`].
    ///
    /// Only the most recent subscriber receives events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LinkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock() = Some(tx);
        rx
    }

    /// Changes the link state of a port and notifies the subscriber.
    ///
    /// Losing the link drops any running program.
    pub fn set_link(&self, port: PortId, state: LinkState) -> DriverResult<()> {
        {
            let mut p = self.port(port)?.lock();
            p.link = state;
            if !state.is_up() {
                p.program = None;
            }
        }
        debug!(port = %port, link = %state, "sim link change");
        if let Some(tx) = self.events.lock().as_ref() {
            // A closed receiver just means nobody listens any more.
            let _ = tx.send(LinkEvent { port, state });
        }
        Ok(())
    }

    /// Overwrites the counters of a port.
    pub fn set_counters(&self, port: PortId, counters: PortCounters) -> DriverResult<()> {
        self.port(port)?.lock().counters = counters;
        Ok(())
    }

    /// Makes the next `begin_transmit` on `port` fail with `error`.
    pub fn fail_next_transmit(&self, port: PortId, error: DriverError) -> DriverResult<()> {
        self.port(port)?.lock().fail_transmit = Some(error);
        Ok(())
    }

    /// Makes the next `halt_transmit` on `port` fail with `error`.
    pub fn fail_next_halt(&self, port: PortId, error: DriverError) -> DriverResult<()> {
        self.port(port)?.lock().fail_halt = Some(error);
        Ok(())
    }

    /// Makes the next `read_counters` on `port` fail with `error`.
    pub fn fail_next_read(&self, port: PortId, error: DriverError) -> DriverResult<()> {
        self.port(port)?.lock().fail_read = Some(error);
        Ok(())
    }

    /// Returns true if a program is running on the port.
    pub fn is_transmitting(&self, port: PortId) -> bool {
        self.port(port)
            .map(|p| p.lock().program.is_some())
            .unwrap_or(false)
    }

    /// Every program accepted by `begin_transmit` on the port, oldest first.
    pub fn transmitted_programs(&self, port: PortId) -> Vec<TxProgram> {
        self.port(port)
            .map(|p| p.lock().transmitted.clone())
            .unwrap_or_default()
    }

    /// Number of successful `halt_transmit` calls on the port.
    pub fn halt_count(&self, port: PortId) -> usize {
        self.port(port).map(|p| p.lock().halts).unwrap_or(0)
    }

    fn port(&self, port: PortId) -> DriverResult<&Mutex<SimPort>> {
        self.ports
            .get(port.index())
            .ok_or(DriverError::InvalidPort { port })
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PortDriver for SimDriver {
    fn properties(&self, _port: PortId) -> PortProperties {
        self.properties.clone()
    }

    fn link_state(&self, port: PortId) -> LinkState {
        self.port(port)
            .map(|p| p.lock().link)
            .unwrap_or(LinkState::Down)
    }

    async fn begin_transmit(&self, port: PortId, program: &TxProgram) -> DriverResult<()> {
        self.delay().await;
        let mut p = self.port(port)?.lock();
        if let Some(err) = p.fail_transmit.take() {
            return Err(err);
        }
        if !p.link.is_up() {
            return Err(DriverError::LinkDown);
        }
        p.program = Some(program.clone());
        p.transmitted.push(program.clone());
        debug!(port = %port, entries = program.entries.len(), "sim transmit started");
        Ok(())
    }

    async fn halt_transmit(&self, port: PortId) -> DriverResult<()> {
        self.delay().await;
        let mut p = self.port(port)?.lock();
        if let Some(err) = p.fail_halt.take() {
            return Err(err);
        }
        p.program = None;
        p.halts += 1;
        debug!(port = %port, "sim transmit halted");
        Ok(())
    }

    async fn read_counters(&self, port: PortId) -> DriverResult<PortCounters> {
        self.delay().await;
        let mut p = self.port(port)?.lock();
        if let Some(err) = p.fail_read.take() {
            return Err(err);
        }
        p.tick();
        Ok(p.counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxEntry;
    use pretty_assertions::assert_eq;

    fn program(port: PortId) -> TxProgram {
        TxProgram::new(
            port,
            vec![TxEntry {
                stream_id: 1,
                packet: vec![0; 64],
                pps: 100.0,
                total_pkts: None,
                self_start: true,
                isg_usec: 0.0,
                next_stream_id: None,
            }],
        )
    }

    #[tokio::test]
    async fn test_transmit_advances_counters() {
        let drv = SimDriver::new(2);
        let port = PortId::new(1);

        drv.begin_transmit(port, &program(port)).await.unwrap();
        assert!(drv.is_transmitting(port));

        let c = drv.read_counters(port).await.unwrap();
        assert_eq!(c.opackets, 100);
        assert_eq!(c.obytes, 6400);
        assert_eq!(c.tx_bps, 51_200);

        let c = drv.read_counters(port).await.unwrap();
        assert_eq!(c.opackets, 200);

        drv.halt_transmit(port).await.unwrap();
        let c = drv.read_counters(port).await.unwrap();
        assert_eq!(c.opackets, 200);
        assert_eq!(c.tx_pps, 0);
        assert_eq!(drv.halt_count(port), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let drv = SimDriver::new(1);
        let port = PortId::new(0);
        drv.fail_next_transmit(port, DriverError::busy("ring full")).unwrap();

        let err = drv.begin_transmit(port, &program(port)).await.unwrap_err();
        assert_eq!(err, DriverError::busy("ring full"));
        assert!(!drv.is_transmitting(port));

        drv.begin_transmit(port, &program(port)).await.unwrap();
        assert_eq!(drv.transmitted_programs(port).len(), 1);
    }

    #[tokio::test]
    async fn test_link_down_stops_and_notifies() {
        let drv = SimDriver::new(1);
        let port = PortId::new(0);
        let mut rx = drv.subscribe();

        drv.begin_transmit(port, &program(port)).await.unwrap();
        drv.set_link(port, LinkState::Down).unwrap();

        assert!(!drv.is_transmitting(port));
        assert_eq!(drv.link_state(port), LinkState::Down);
        assert_eq!(rx.recv().await, Some(LinkEvent { port, state: LinkState::Down }));

        let err = drv.begin_transmit(port, &program(port)).await.unwrap_err();
        assert_eq!(err, DriverError::LinkDown);
    }

    #[tokio::test]
    async fn test_invalid_port() {
        let drv = SimDriver::new(1);
        let err = drv.halt_transmit(PortId::new(4)).await.unwrap_err();
        assert_eq!(err, DriverError::InvalidPort { port: PortId::new(4) });
        assert_eq!(drv.link_state(PortId::new(4)), LinkState::Down);
    }
}

//! Port registry: the fixed set of ports, and its process-wide instance.
//!
//! A [`PortRegistry`] owns every [`StatelessPort`]. Its port array is built
//! once and never changes, so lookups need no locking. The process-wide
//! instance goes through [`configure`] exactly once; every accessor fails
//! with [`StatelessError::NotConfigured`] before that.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trex_driver::{LinkEvent, PortDriver, PortId, SimDriver};

use crate::config::StatelessConfig;
use crate::error::{Result, StatelessError};
use crate::port::{LinkTransition, PortSettings, PortStats, StatelessPort};
use crate::stream::{BasicStreamCompiler, StreamCompiler};

static REGISTRY: OnceCell<PortRegistry> = OnceCell::new();

/// Fixed-size collection of ports, indexed by port id.
pub struct PortRegistry {
    ports: Vec<StatelessPort>,
}

impl PortRegistry {
    pub fn builder(port_count: u8) -> PortRegistryBuilder {
        PortRegistryBuilder {
            port_count,
            driver: None,
            compiler: None,
            settings: PortSettings::default(),
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Looks up a port, failing with `OutOfRange` if `id >= port_count`.
    pub fn port(&self, id: u8) -> Result<&StatelessPort> {
        self.ports
            .get(usize::from(id))
            .ok_or(StatelessError::OutOfRange {
                id,
                count: self.ports.len(),
            })
    }

    pub fn ports(&self) -> impl Iterator<Item = &StatelessPort> {
        self.ports.iter()
    }

    /// Routes link notifications to their ports until the sender side closes.
    ///
    /// Returns the number of events that changed a port state.
    pub async fn dispatch_link_events(&self, mut rx: mpsc::UnboundedReceiver<LinkEvent>) -> usize {
        let mut applied = 0;
        while let Some(event) = rx.recv().await {
            let port = match self.port(event.port.as_u8()) {
                Ok(port) => port,
                Err(e) => {
                    warn!(port = %event.port, error = %e, "dropping link event");
                    continue;
                }
            };
            let transition = port.handle_link_event(event.state).await;
            debug!(port = %event.port, link = %event.state, ?transition, "link event");
            if transition != LinkTransition::Unchanged {
                applied += 1;
            }
        }
        debug!(applied, "link event channel closed");
        applied
    }

    /// Refreshes stats on every port, each under its configured deadline.
    pub async fn update_all_stats(&self) -> Vec<(PortId, Result<PortStats>)> {
        let mut results = Vec::with_capacity(self.ports.len());
        for port in &self.ports {
            let result = port.update_stats_within(None).await;
            if let Err(e) = &result {
                warn!(port = %port.id(), error = %e, "stats refresh failed");
            }
            results.push((port.id(), result));
        }
        results
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .field("port_count", &self.ports.len())
            .finish()
    }
}

/// Builder for [`PortRegistry`].
///
/// Defaults to a [`SimDriver`] and the [`BasicStreamCompiler`].
pub struct PortRegistryBuilder {
    port_count: u8,
    driver: Option<Arc<dyn PortDriver>>,
    compiler: Option<Arc<dyn StreamCompiler>>,
    settings: PortSettings,
}

impl PortRegistryBuilder {
    pub fn driver(mut self, driver: Arc<dyn PortDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn compiler(mut self, compiler: Arc<dyn StreamCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn settings(mut self, settings: PortSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Applies the per-port settings from a daemon configuration.
    pub fn config(self, config: &StatelessConfig) -> Self {
        let settings = config.port_settings();
        self.settings(settings)
    }

    pub fn build(self) -> PortRegistry {
        let port_count = self.port_count;
        let driver = self
            .driver
            .unwrap_or_else(|| Arc::new(SimDriver::new(port_count)) as Arc<dyn PortDriver>);
        let compiler = self
            .compiler
            .unwrap_or_else(|| Arc::new(BasicStreamCompiler) as Arc<dyn StreamCompiler>);

        let ports = (0..port_count)
            .map(|id| {
                StatelessPort::new(
                    PortId::new(id),
                    Arc::clone(&driver),
                    Arc::clone(&compiler),
                    self.settings,
                )
            })
            .collect();
        PortRegistry { ports }
    }
}

// ============ Process-wide instance ============

/// Configures the process-wide registry with `port_count` simulated ports.
///
/// Fails with `AlreadyConfigured` on every call after the first successful
/// one, whatever the argument.
pub fn configure(port_count: u8) -> Result<()> {
    configure_with(PortRegistry::builder(port_count).build())
}

/// Installs a fully built registry as the process-wide instance.
pub fn configure_with(registry: PortRegistry) -> Result<()> {
    let count = registry.port_count();
    REGISTRY.set(registry).map_err(|_| {
        warn!("configure refused, registry already configured");
        StatelessError::AlreadyConfigured
    })?;
    info!(port_count = count, "stateless registry configured");
    Ok(())
}

/// Returns the process-wide registry.
pub fn get_instance() -> Result<&'static PortRegistry> {
    REGISTRY.get().ok_or(StatelessError::NotConfigured)
}

/// Number of configured ports, 0 before configuration.
pub fn get_port_count() -> usize {
    REGISTRY.get().map_or(0, PortRegistry::port_count)
}

/// Looks up a port of the process-wide registry.
pub fn get_port_by_id(id: u8) -> Result<&'static StatelessPort> {
    get_instance()?.port(id)
}

//! The stateless port: traffic state machine plus ownership guard.
//!
//! All mutable port data sits behind one async mutex, so every mutating
//! operation on a port (including the driver and compiler calls it makes)
//! is serialized. Ports never share a lock with each other.
//!
//! Driver calls are awaited while the lock is held. A state transition is
//! only committed after the driver has confirmed, so dropping an operation
//! half way (for instance on a caller deadline) leaves the port in its
//! previous state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use trex_driver::{DriverError, LinkState, PortDriver, PortId, PortProperties};

use super::owner::{OwnerHandler, OwnerPolicy, Ownership};
use super::state::{LinkTransition, PortState};
use super::stats::PortStats;
use crate::error::{Result, StatelessError};
use crate::stream::{Stream, StreamCompiler, StreamTable, StreamTableError};

/// Per-port behaviour knobs, taken from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSettings {
    /// Ownership handling when a transmitting port is forced down.
    pub owner_policy: OwnerPolicy,
    /// Deadline applied to owner-gated `start_traffic_as`.
    pub start_timeout: Option<Duration>,
    /// Deadline applied to `update_stats_within` callers that pass none.
    pub stats_timeout: Option<Duration>,
}

#[derive(Debug)]
struct PortInner {
    state: PortState,
    owner: Option<Ownership>,
    last_handler: Option<OwnerHandler>,
    streams: StreamTable,
    stats: PortStats,
}

/// One physical port managed by the stateless core.
pub struct StatelessPort {
    id: PortId,
    driver: Arc<dyn PortDriver>,
    compiler: Arc<dyn StreamCompiler>,
    settings: PortSettings,
    inner: Mutex<PortInner>,
}

impl StatelessPort {
    /// Creates a port, taking its initial state from the driver's link state.
    pub fn new(
        id: PortId,
        driver: Arc<dyn PortDriver>,
        compiler: Arc<dyn StreamCompiler>,
        settings: PortSettings,
    ) -> Self {
        let state = match driver.link_state(id) {
            LinkState::Up => PortState::Idle,
            LinkState::Down => PortState::Down,
        };
        debug!(port = %id, state = %state, "port created");
        Self {
            id,
            driver,
            compiler,
            settings,
            inner: Mutex::new(PortInner {
                state,
                owner: None,
                last_handler: None,
                streams: StreamTable::new(),
                stats: PortStats::default(),
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    /// Returns the driver name and speed of the port.
    pub fn get_properties(&self) -> PortProperties {
        self.driver.properties(self.id)
    }

    // ============ State ============

    pub async fn get_state(&self) -> PortState {
        self.inner.lock().await.state
    }

    pub async fn get_state_as_string(&self) -> &'static str {
        self.get_state().await.as_str()
    }

    // ============ Ownership ============

    /// Current owner identity, `None` if the port is free.
    pub async fn get_owner(&self) -> Option<String> {
        self.inner.lock().await.owner.as_ref().map(|o| o.owner.clone())
    }

    /// Current owner handler, `None` if the port is free.
    pub async fn get_owner_handler(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .owner
            .as_ref()
            .map(|o| o.handler.as_str().to_string())
    }

    pub async fn is_free_to_acquire(&self) -> bool {
        self.inner.lock().await.owner.is_none()
    }

    /// Makes `identity` the owner and returns a fresh handler.
    ///
    /// Overwrites any current owner. Use [`StatelessPort::acquire`] to
    /// refuse when the port is already taken.
    pub async fn set_owner(&self, identity: &str) -> Result<String> {
        validate_owner(identity)?;
        let mut inner = self.inner.lock().await;
        Ok(self.assign_owner(&mut *inner, identity))
    }

    /// Releases the port.
    ///
    /// A transmitting port is stopped first so that no traffic runs without
    /// an owner. If that halt fails and the port is still transmitting, the
    /// driver error is returned and the owner is kept.
    pub async fn clear_owner(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.release_locked(&mut *inner).await
    }

    /// True iff the port is owned and `token` is the current handler.
    pub async fn verify_owner_handler(&self, token: &str) -> bool {
        let inner = self.inner.lock().await;
        verify(&*inner, token)
    }

    /// Acquires the port for `owner`.
    ///
    /// Fails with `PortBusy` if somebody else holds it, unless `force` is set.
    #[instrument(skip(self), fields(port = %self.id))]
    pub async fn acquire(&self, owner: &str, force: bool) -> Result<String> {
        validate_owner(owner)?;
        let mut inner = self.inner.lock().await;
        if let Some(current) = &inner.owner {
            if !force {
                warn!(current = %current.owner, "acquire refused, port is owned");
                return Err(StatelessError::PortBusy {
                    port: self.id,
                    owner: current.owner.clone(),
                });
            }
            warn!(current = %current.owner, "forcing acquire");
        }
        Ok(self.assign_owner(&mut *inner, owner))
    }

    /// Releases the port if `handler` belongs to the current owner.
    #[instrument(skip(self, handler), fields(port = %self.id))]
    pub async fn release(&self, handler: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.authorize(&*inner, handler)?;
        self.release_locked(&mut *inner).await
    }

    // ============ Streams ============

    /// Snapshot of the stream table.
    pub async fn get_stream_table(&self) -> StreamTable {
        self.inner.lock().await.streams.clone()
    }

    pub async fn stream_count(&self) -> usize {
        self.inner.lock().await.streams.len()
    }

    pub async fn get_stream(&self, stream_id: u32) -> Result<Stream> {
        let inner = self.inner.lock().await;
        inner
            .streams
            .get_stream(stream_id)
            .cloned()
            .map_err(|e| self.not_found(e))
    }

    /// Stages a stream, replacing any stream with the same id.
    pub async fn add_stream(&self, stream: Stream) -> Result<Option<Stream>> {
        let mut inner = self.inner.lock().await;
        self.add_stream_locked(&mut *inner, stream)
    }

    pub async fn remove_stream(&self, stream_id: u32) -> Result<Stream> {
        let mut inner = self.inner.lock().await;
        self.remove_stream_locked(&mut *inner, stream_id)
    }

    pub async fn remove_all_streams(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        self.remove_all_locked(&mut *inner)
    }

    /// Owner-gated [`StatelessPort::add_stream`].
    pub async fn add_stream_as(&self, handler: &str, stream: Stream) -> Result<Option<Stream>> {
        let mut inner = self.inner.lock().await;
        self.authorize(&*inner, handler)?;
        self.add_stream_locked(&mut *inner, stream)
    }

    /// Owner-gated [`StatelessPort::remove_stream`].
    pub async fn remove_stream_as(&self, handler: &str, stream_id: u32) -> Result<Stream> {
        let mut inner = self.inner.lock().await;
        self.authorize(&*inner, handler)?;
        self.remove_stream_locked(&mut *inner, stream_id)
    }

    /// Owner-gated [`StatelessPort::remove_all_streams`].
    pub async fn remove_all_streams_as(&self, handler: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        self.authorize(&*inner, handler)?;
        self.remove_all_locked(&mut *inner)
    }

    // ============ Traffic ============

    /// Compiles the staged streams and starts transmitting them.
    ///
    /// Legal only from `Idle` on an owned port. On any failure the port
    /// stays in its previous state, except for fatal driver errors which
    /// force it down.
    #[instrument(skip(self), fields(port = %self.id))]
    pub async fn start_traffic(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut *inner).await
    }

    /// Halts transmission. A no-op when the port is not transmitting.
    #[instrument(skip(self), fields(port = %self.id))]
    pub async fn stop_traffic(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut *inner).await
    }

    /// [`StatelessPort::start_traffic`] bounded by `timeout`.
    ///
    /// On expiry the port is left as it was (never half-started) and the
    /// driver is told to halt in case it had already begun.
    pub async fn start_traffic_within(&self, timeout: Duration) -> Result<()> {
        self.start_with_deadline(Some(timeout), self.start_traffic())
            .await
    }

    /// Owner-gated start, bounded by the configured start deadline.
    #[instrument(skip(self, handler), fields(port = %self.id))]
    pub async fn start_traffic_as(&self, handler: &str) -> Result<()> {
        let op = async {
            let mut inner = self.inner.lock().await;
            self.authorize(&*inner, handler)?;
            self.start_locked(&mut *inner).await
        };
        self.start_with_deadline(self.settings.start_timeout, op)
            .await
    }

    /// Owner-gated stop.
    #[instrument(skip(self, handler), fields(port = %self.id))]
    pub async fn stop_traffic_as(&self, handler: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.authorize(&*inner, handler)?;
        self.stop_locked(&mut *inner).await
    }

    // ============ Stats ============

    /// Last stats snapshot.
    pub async fn get_stats(&self) -> PortStats {
        self.inner.lock().await.stats
    }

    /// Pulls fresh counters from the driver and stores them.
    ///
    /// A `Down` port is not polled: its rates drop to zero and the
    /// cumulative counters keep their last value.
    pub async fn update_stats(&self) -> Result<PortStats> {
        let mut inner = self.inner.lock().await;
        if inner.state == PortState::Down {
            inner.stats.clear_rates();
            return Ok(inner.stats);
        }

        match self.driver.read_counters(self.id).await {
            Ok(counters) => {
                inner.stats = PortStats::from(counters);
                debug!(port = %self.id, tx_pps = inner.stats.tx_pps, rx_pps = inner.stats.rx_pps, "stats updated");
                Ok(inner.stats)
            }
            Err(source) => Err(self.driver_failure(&mut *inner, source).await),
        }
    }

    /// [`StatelessPort::update_stats`] bounded by `timeout`, or by the
    /// configured stats deadline when `timeout` is `None`.
    pub async fn update_stats_within(&self, timeout: Option<Duration>) -> Result<PortStats> {
        match timeout.or(self.settings.stats_timeout) {
            None => self.update_stats().await,
            Some(limit) => match tokio::time::timeout(limit, self.update_stats()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(port = %self.id, ?limit, "stats refresh timed out");
                    Err(StatelessError::Timeout {
                        port: self.id,
                        operation: "update stats",
                    })
                }
            },
        }
    }

    // ============ Link events ============

    /// Applies a link notification from the driver layer.
    pub async fn handle_link_event(&self, link: LinkState) -> LinkTransition {
        let mut inner = self.inner.lock().await;
        match (link, inner.state) {
            (LinkState::Up, PortState::Down) => {
                inner.state = PortState::Idle;
                info!(port = %self.id, "link up, port idle");
                LinkTransition::Up
            }
            (LinkState::Down, PortState::Idle) => {
                inner.state = PortState::Down;
                inner.stats.clear_rates();
                info!(port = %self.id, "link down, port down");
                LinkTransition::Down
            }
            (LinkState::Down, PortState::Transmitting) => {
                self.force_down(&mut *inner, &DriverError::LinkDown)
            }
            _ => LinkTransition::Unchanged,
        }
    }

    // ============ Internals (lock held) ============

    fn assign_owner(&self, inner: &mut PortInner, identity: &str) -> String {
        let handler = OwnerHandler::generate_distinct(inner.last_handler.as_ref());
        let token = handler.as_str().to_string();
        inner.last_handler = Some(handler.clone());
        inner.owner = Some(Ownership {
            owner: identity.to_string(),
            handler,
        });
        info!(port = %self.id, owner = %identity, "port acquired");
        token
    }

    fn authorize(&self, inner: &PortInner, handler: &str) -> Result<()> {
        if verify(inner, handler) {
            Ok(())
        } else {
            warn!(port = %self.id, "rejected invalid owner handler");
            Err(StatelessError::InvalidHandler { port: self.id })
        }
    }

    async fn release_locked(&self, inner: &mut PortInner) -> Result<()> {
        let stopped = self.stop_locked(inner).await;
        // A failed halt that left the port transmitting keeps its owner.
        if inner.state == PortState::Transmitting {
            return stopped;
        }
        if let Some(prev) = inner.owner.take() {
            info!(port = %self.id, owner = %prev.owner, "port released");
        }
        stopped
    }

    fn add_stream_locked(&self, inner: &mut PortInner, stream: Stream) -> Result<Option<Stream>> {
        self.ensure_not_transmitting(inner, "add stream")?;
        let id = stream.id;
        let replaced = inner.streams.add_stream(stream);
        debug!(port = %self.id, stream = id, replaced = replaced.is_some(), "stream added");
        Ok(replaced)
    }

    fn remove_stream_locked(&self, inner: &mut PortInner, stream_id: u32) -> Result<Stream> {
        self.ensure_not_transmitting(inner, "remove stream")?;
        let stream = inner
            .streams
            .remove_stream(stream_id)
            .map_err(|e| self.not_found(e))?;
        debug!(port = %self.id, stream = stream_id, "stream removed");
        Ok(stream)
    }

    fn remove_all_locked(&self, inner: &mut PortInner) -> Result<usize> {
        self.ensure_not_transmitting(inner, "remove streams")?;
        Ok(inner.streams.remove_all_streams())
    }

    fn ensure_not_transmitting(&self, inner: &PortInner, operation: &'static str) -> Result<()> {
        if inner.state == PortState::Transmitting {
            warn!(port = %self.id, operation, "refused while transmitting");
            return Err(StatelessError::bad_state(self.id, inner.state, operation));
        }
        Ok(())
    }

    async fn start_locked(&self, inner: &mut PortInner) -> Result<()> {
        if inner.state != PortState::Idle {
            warn!(port = %self.id, state = %inner.state, "start traffic refused");
            return Err(StatelessError::bad_state(self.id, inner.state, "start traffic"));
        }
        if inner.owner.is_none() {
            return Err(StatelessError::NotOwned { port: self.id });
        }
        if inner.streams.is_empty() {
            return Err(StatelessError::NoStreams { port: self.id });
        }

        let program = self
            .compiler
            .compile(self.id, inner.streams.streams())
            .map_err(|source| {
                warn!(port = %self.id, error = %source, "stream compilation failed");
                StatelessError::CompileFailed {
                    port: self.id,
                    source,
                }
            })?;

        if let Err(source) = self.driver.begin_transmit(self.id, &program).await {
            return Err(self.driver_failure(inner, source).await);
        }

        inner.state = PortState::Transmitting;
        info!(port = %self.id, streams = program.entries.len(), "traffic started");
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut PortInner) -> Result<()> {
        if inner.state != PortState::Transmitting {
            debug!(port = %self.id, state = %inner.state, "stop traffic: not transmitting");
            return Ok(());
        }

        if let Err(source) = self.driver.halt_transmit(self.id).await {
            return Err(self.driver_failure(inner, source).await);
        }

        inner.state = PortState::Idle;
        inner.stats.clear_rates();
        info!(port = %self.id, "traffic stopped");
        Ok(())
    }

    /// Converts a driver error, forcing the port down first if it is fatal.
    ///
    /// A transmitting port whose link is still up is told to halt, so the
    /// NIC never keeps sending behind a `Down` port.
    async fn driver_failure(&self, inner: &mut PortInner, source: DriverError) -> StatelessError {
        if source.is_fatal() && inner.state != PortState::Down {
            if inner.state == PortState::Transmitting && source != DriverError::LinkDown {
                self.halt_after_fault().await;
            }
            self.force_down(inner, &source);
        } else {
            warn!(port = %self.id, error = %source, "driver call failed");
        }
        StatelessError::driver(self.id, source)
    }

    async fn halt_after_fault(&self) {
        match self.driver.halt_transmit(self.id).await {
            Ok(()) => info!(port = %self.id, "traffic halted after driver fault"),
            Err(e) => error!(port = %self.id, error = %e, "halt after driver fault failed"),
        }
    }

    fn force_down(&self, inner: &mut PortInner, reason: &DriverError) -> LinkTransition {
        let was_transmitting = inner.state == PortState::Transmitting;
        inner.state = PortState::Down;
        inner.stats.clear_rates();

        let owner_released = was_transmitting
            && self.settings.owner_policy == OwnerPolicy::Release
            && inner.owner.take().is_some();

        error!(
            port = %self.id,
            reason = %reason,
            was_transmitting,
            owner_released,
            "port forced down"
        );
        LinkTransition::ForcedDown { owner_released }
    }

    async fn start_with_deadline<F>(&self, limit: Option<Duration>, op: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let Some(limit) = limit else {
            return op.await;
        };
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(port = %self.id, ?limit, "start traffic timed out");
                self.abandon_start(limit).await;
                Err(StatelessError::Timeout {
                    port: self.id,
                    operation: "start traffic",
                })
            }
        }
    }

    /// Tells the driver to halt after an abandoned start, unless a start
    /// that did complete is now running. The halt gets the same deadline.
    async fn abandon_start(&self, limit: Duration) {
        let inner = self.inner.lock().await;
        if inner.state == PortState::Transmitting {
            return;
        }
        match tokio::time::timeout(limit, self.driver.halt_transmit(self.id)).await {
            Ok(Ok(())) => debug!(port = %self.id, "halted after abandoned start"),
            Ok(Err(e)) => warn!(port = %self.id, error = %e, "halt after abandoned start failed"),
            Err(_) => warn!(port = %self.id, "halt after abandoned start timed out"),
        }
    }

    fn not_found(&self, e: StreamTableError) -> StatelessError {
        match e {
            StreamTableError::NotFound { stream_id } => StatelessError::StreamNotFound {
                port: self.id,
                stream_id,
            },
        }
    }
}

fn verify(inner: &PortInner, token: &str) -> bool {
    inner
        .owner
        .as_ref()
        .is_some_and(|o| o.handler.matches(token))
}

fn validate_owner(identity: &str) -> Result<()> {
    if identity.trim().is_empty() {
        return Err(StatelessError::InvalidOwner);
    }
    Ok(())
}

impl std::fmt::Debug for StatelessPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelessPort")
            .field("id", &self.id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BasicStreamCompiler;
    use pretty_assertions::assert_eq;
    use trex_driver::{PortCounters, SimDriver};

    const P0: PortId = PortId::new(0);

    fn setup(settings: PortSettings) -> (Arc<SimDriver>, StatelessPort) {
        let driver = Arc::new(SimDriver::new(1));
        let port = StatelessPort::new(
            P0,
            driver.clone(),
            Arc::new(BasicStreamCompiler),
            settings,
        );
        (driver, port)
    }

    fn stream(id: u32) -> Stream {
        Stream::continuous(id, vec![0u8; 64], 1000.0)
    }

    async fn owned_with_stream(port: &StatelessPort) -> String {
        let token = port.set_owner("alice").await.unwrap();
        port.add_stream(stream(1)).await.unwrap();
        token
    }

    #[tokio::test]
    async fn test_initial_state_follows_link() {
        let (_, port) = setup(PortSettings::default());
        assert_eq!(port.get_state().await, PortState::Idle);
        assert_eq!(port.get_state_as_string().await, "IDLE");

        let driver = Arc::new(SimDriver::new(1));
        driver.set_link(P0, LinkState::Down).unwrap();
        let port = StatelessPort::new(P0, driver, Arc::new(BasicStreamCompiler), PortSettings::default());
        assert_eq!(port.get_state().await, PortState::Down);
    }

    #[tokio::test]
    async fn test_set_owner_and_verify() {
        let (_, port) = setup(PortSettings::default());
        assert!(port.is_free_to_acquire().await);
        assert_eq!(port.get_owner().await, None);

        let token = port.set_owner("alice").await.unwrap();
        assert!(!port.is_free_to_acquire().await);
        assert_eq!(port.get_owner().await.as_deref(), Some("alice"));
        assert_eq!(port.get_owner_handler().await.as_deref(), Some(token.as_str()));
        assert!(port.verify_owner_handler(&token).await);
        assert!(!port.verify_owner_handler("bogus").await);
        assert!(!port.verify_owner_handler("").await);
    }

    #[tokio::test]
    async fn test_clear_owner_invalidates_token() {
        let (_, port) = setup(PortSettings::default());
        let token = port.set_owner("alice").await.unwrap();
        port.clear_owner().await.unwrap();

        assert!(port.is_free_to_acquire().await);
        assert_eq!(port.get_owner_handler().await, None);
        assert!(!port.verify_owner_handler(&token).await);
    }

    #[tokio::test]
    async fn test_reacquire_yields_new_token() {
        let (_, port) = setup(PortSettings::default());
        let first = port.set_owner("alice").await.unwrap();
        let second = port.set_owner("alice").await.unwrap();
        assert_ne!(first, second);
        assert!(!port.verify_owner_handler(&first).await);
        assert!(port.verify_owner_handler(&second).await);
    }

    #[tokio::test]
    async fn test_empty_owner_rejected() {
        let (_, port) = setup(PortSettings::default());
        let err = port.set_owner("  ").await.unwrap_err();
        assert!(matches!(err, StatelessError::InvalidOwner));
        assert!(port.is_free_to_acquire().await);
    }

    #[tokio::test]
    async fn test_owner_named_none_is_an_owner() {
        let (_, port) = setup(PortSettings::default());
        port.set_owner("none").await.unwrap();
        assert!(!port.is_free_to_acquire().await);
    }

    #[tokio::test]
    async fn test_start_without_streams() {
        let (driver, port) = setup(PortSettings::default());
        port.set_owner("alice").await.unwrap();

        let err = port.start_traffic().await.unwrap_err();
        assert!(matches!(err, StatelessError::NoStreams { .. }));
        assert_eq!(port.get_state().await, PortState::Idle);
        assert!(driver.transmitted_programs(P0).is_empty());
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;

        port.start_traffic().await.unwrap();
        assert_eq!(port.get_state().await, PortState::Transmitting);
        assert!(driver.is_transmitting(P0));

        port.stop_traffic().await.unwrap();
        assert_eq!(port.get_state().await, PortState::Idle);
        assert!(!driver.is_transmitting(P0));
        assert_eq!(driver.halt_count(P0), 1);

        // Second stop is a no-op and does not reach the driver.
        port.stop_traffic().await.unwrap();
        assert_eq!(driver.halt_count(P0), 1);
    }

    #[tokio::test]
    async fn test_start_while_transmitting() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();

        let err = port.start_traffic().await.unwrap_err();
        assert!(matches!(
            err,
            StatelessError::BadStateForOp {
                state: PortState::Transmitting,
                ..
            }
        ));
        assert_eq!(driver.transmitted_programs(P0).len(), 1);
    }

    #[tokio::test]
    async fn test_start_while_down() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        driver.set_link(P0, LinkState::Down).unwrap();
        port.handle_link_event(LinkState::Down).await;

        let err = port.start_traffic().await.unwrap_err();
        assert!(matches!(err, StatelessError::BadStateForOp { state: PortState::Down, .. }));
        assert_eq!(port.get_state().await, PortState::Down);
    }

    #[tokio::test]
    async fn test_start_requires_owner() {
        let (_, port) = setup(PortSettings::default());
        port.add_stream(stream(1)).await.unwrap();

        let err = port.start_traffic().await.unwrap_err();
        assert!(matches!(err, StatelessError::NotOwned { .. }));
        assert_eq!(port.get_state().await, PortState::Idle);
    }

    #[tokio::test]
    async fn test_compile_failure_preserves_state() {
        let (driver, port) = setup(PortSettings::default());
        port.set_owner("alice").await.unwrap();
        port.add_stream(Stream::continuous(1, vec![0u8; 4], 10.0)).await.unwrap();

        let err = port.start_traffic().await.unwrap_err();
        assert!(matches!(err, StatelessError::CompileFailed { .. }));
        assert_eq!(err.kind(), "compile_failed");
        assert_eq!(port.get_state().await, PortState::Idle);
        assert!(driver.transmitted_programs(P0).is_empty());
    }

    #[tokio::test]
    async fn test_non_fatal_driver_error_keeps_state() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        driver.fail_next_transmit(P0, DriverError::busy("tx ring full")).unwrap();

        let err = port.start_traffic().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(port.get_state().await, PortState::Idle);

        port.start_traffic().await.unwrap();
        assert_eq!(port.get_state().await, PortState::Transmitting);
    }

    #[tokio::test]
    async fn test_fatal_driver_error_forces_down() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        driver.fail_next_transmit(P0, DriverError::hardware("pci error")).unwrap();

        let err = port.start_traffic().await.unwrap_err();
        assert!(matches!(err, StatelessError::Driver { .. }));
        assert_eq!(port.get_state().await, PortState::Down);
        assert_eq!(port.get_owner().await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_fatal_read_while_transmitting_halts_nic() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();
        driver.fail_next_read(P0, DriverError::hardware("dma stall")).unwrap();

        let err = port.update_stats().await.unwrap_err();
        assert!(matches!(err, StatelessError::Driver { .. }));
        assert_eq!(port.get_state().await, PortState::Down);
        assert!(!driver.is_transmitting(P0));
        assert_eq!(driver.halt_count(P0), 1);
    }

    #[tokio::test]
    async fn test_fatal_link_error_skips_halt() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();
        driver.fail_next_read(P0, DriverError::LinkDown).unwrap();

        assert!(port.update_stats().await.is_err());
        assert_eq!(port.get_state().await, PortState::Down);
        assert_eq!(driver.halt_count(P0), 0);
    }

    #[tokio::test]
    async fn test_stream_mutation_refused_while_transmitting() {
        let (_, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();

        assert!(matches!(
            port.add_stream(stream(2)).await.unwrap_err(),
            StatelessError::BadStateForOp { .. }
        ));
        assert!(matches!(
            port.remove_stream(1).await.unwrap_err(),
            StatelessError::BadStateForOp { .. }
        ));
        assert!(matches!(
            port.remove_all_streams().await.unwrap_err(),
            StatelessError::BadStateForOp { .. }
        ));
        assert_eq!(port.stream_count().await, 1);
    }

    #[tokio::test]
    async fn test_stream_lookup() {
        let (_, port) = setup(PortSettings::default());
        port.add_stream(stream(1)).await.unwrap();
        port.add_stream(stream(2)).await.unwrap();

        assert_eq!(port.get_stream(2).await.unwrap().id, 2);
        assert!(matches!(
            port.get_stream(9).await.unwrap_err(),
            StatelessError::StreamNotFound { stream_id: 9, .. }
        ));
        assert_eq!(port.get_stream_table().await.stream_ids(), vec![1, 2]);
        assert_eq!(port.remove_all_streams().await.unwrap(), 2);
        assert_eq!(port.stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_stats() {
        let (driver, port) = setup(PortSettings::default());
        driver
            .set_counters(
                P0,
                PortCounters {
                    opackets: 100,
                    ipackets: 90,
                    oerrors: 1,
                    ierrors: 2,
                    ..Default::default()
                },
            )
            .unwrap();

        let stats = port.update_stats().await.unwrap();
        assert_eq!(stats.total_tx_pkts, 100);
        assert_eq!(stats.total_rx_pkts, 90);
        assert_eq!(stats.tx_rx_errors, 3);
        assert_eq!(port.get_stats().await, stats);
    }

    #[tokio::test]
    async fn test_update_stats_while_down() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();
        let before = port.update_stats().await.unwrap();
        assert!(before.tx_pps > 0);

        driver.set_link(P0, LinkState::Down).unwrap();
        port.handle_link_event(LinkState::Down).await;
        driver.fail_next_read(P0, DriverError::hardware("must not be read")).unwrap();

        let stats = port.update_stats().await.unwrap();
        assert_eq!(stats.tx_pps, 0);
        assert_eq!(stats.tx_bps, 0);
        assert_eq!(stats.total_tx_pkts, before.total_tx_pkts);
    }

    #[tokio::test]
    async fn test_link_transitions() {
        let (_, port) = setup(PortSettings::default());
        assert_eq!(port.handle_link_event(LinkState::Up).await, LinkTransition::Unchanged);
        assert_eq!(port.handle_link_event(LinkState::Down).await, LinkTransition::Down);
        assert_eq!(port.handle_link_event(LinkState::Down).await, LinkTransition::Unchanged);
        assert_eq!(port.handle_link_event(LinkState::Up).await, LinkTransition::Up);
        assert_eq!(port.get_state().await, PortState::Idle);
    }

    #[tokio::test]
    async fn test_forced_down_retains_owner() {
        let (_, port) = setup(PortSettings::default());
        let token = owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();

        let transition = port.handle_link_event(LinkState::Down).await;
        assert_eq!(transition, LinkTransition::ForcedDown { owner_released: false });
        assert_eq!(port.get_state().await, PortState::Down);
        assert!(port.verify_owner_handler(&token).await);
    }

    #[tokio::test]
    async fn test_forced_down_releases_owner() {
        let (_, port) = setup(PortSettings {
            owner_policy: OwnerPolicy::Release,
            ..Default::default()
        });
        let token = owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();

        let transition = port.handle_link_event(LinkState::Down).await;
        assert_eq!(transition, LinkTransition::ForcedDown { owner_released: true });
        assert!(port.is_free_to_acquire().await);
        assert!(!port.verify_owner_handler(&token).await);
    }

    #[tokio::test]
    async fn test_clear_owner_stops_traffic() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();

        port.clear_owner().await.unwrap();
        assert_eq!(port.get_state().await, PortState::Idle);
        assert!(!driver.is_transmitting(P0));
        assert!(port.is_free_to_acquire().await);
    }

    #[tokio::test]
    async fn test_clear_owner_halt_failure() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        port.start_traffic().await.unwrap();

        driver.fail_next_halt(P0, DriverError::busy("draining")).unwrap();
        assert!(port.clear_owner().await.is_err());
        assert_eq!(port.get_state().await, PortState::Transmitting);
        assert!(!port.is_free_to_acquire().await);

        driver.fail_next_halt(P0, DriverError::hardware("dead")).unwrap();
        assert!(port.clear_owner().await.is_err());
        assert_eq!(port.get_state().await, PortState::Down);
        assert!(port.is_free_to_acquire().await);
    }

    #[tokio::test]
    async fn test_acquire_busy_and_force() {
        let (_, port) = setup(PortSettings::default());
        let alice = port.acquire("alice", false).await.unwrap();

        let err = port.acquire("bob", false).await.unwrap_err();
        assert!(matches!(err, StatelessError::PortBusy { ref owner, .. } if owner == "alice"));
        assert!(port.verify_owner_handler(&alice).await);

        let bob = port.acquire("bob", true).await.unwrap();
        assert_eq!(port.get_owner().await.as_deref(), Some("bob"));
        assert!(!port.verify_owner_handler(&alice).await);
        assert!(port.verify_owner_handler(&bob).await);
    }

    #[tokio::test]
    async fn test_gated_operations() {
        let (_, port) = setup(PortSettings::default());
        let token = port.acquire("alice", false).await.unwrap();

        let err = port.add_stream_as("wrong", stream(1)).await.unwrap_err();
        assert!(matches!(err, StatelessError::InvalidHandler { .. }));
        assert_eq!(port.stream_count().await, 0);

        port.add_stream_as(&token, stream(1)).await.unwrap();
        assert!(matches!(
            port.start_traffic_as("wrong").await.unwrap_err(),
            StatelessError::InvalidHandler { .. }
        ));
        assert_eq!(port.get_state().await, PortState::Idle);

        port.start_traffic_as(&token).await.unwrap();
        assert!(port.stop_traffic_as("wrong").await.is_err());
        assert_eq!(port.get_state().await, PortState::Transmitting);
        port.stop_traffic_as(&token).await.unwrap();

        port.remove_stream_as(&token, 1).await.unwrap();
        assert_eq!(port.remove_all_streams_as(&token).await.unwrap(), 0);

        assert!(port.release("wrong").await.is_err());
        port.release(&token).await.unwrap();
        assert!(port.is_free_to_acquire().await);
        assert!(matches!(
            port.release(&token).await.unwrap_err(),
            StatelessError::InvalidHandler { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_leaves_idle() {
        let (driver, port) = setup(PortSettings::default());
        owned_with_stream(&port).await;
        driver.set_latency(Some(Duration::from_secs(10)));

        let err = port
            .start_traffic_within(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, StatelessError::Timeout { .. }));
        assert_eq!(port.get_state().await, PortState::Idle);
        assert!(!driver.is_transmitting(P0));
        assert!(driver.transmitted_programs(P0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_timeout() {
        let (driver, port) = setup(PortSettings::default());
        driver.set_latency(Some(Duration::from_secs(10)));

        let err = port
            .update_stats_within(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, StatelessError::Timeout { operation: "update stats", .. }));

        driver.set_latency(None);
        assert!(port.update_stats_within(None).await.is_ok());
    }
}

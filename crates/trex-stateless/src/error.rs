//! Error types for the stateless port core.
//!
//! Every failing operation returns one of these; the API layer relays
//! [`StatelessError::kind`] together with the display message.

use thiserror::Error;
use trex_driver::{DriverError, PortId};

use crate::port::PortState;
use crate::stream::CompileError;

/// Result type alias for stateless operations.
pub type Result<T> = std::result::Result<T, StatelessError>;

/// Errors that can occur in the stateless port core.
#[derive(Debug, Error)]
pub enum StatelessError {
    /// The port registry was accessed before `configure`.
    #[error("stateless object is not configured")]
    NotConfigured,

    /// `configure` was called a second time.
    #[error("stateless object is already configured")]
    AlreadyConfigured,

    /// Port id outside `0..count`.
    #[error("port id {id} out of range (port count is {count})")]
    OutOfRange {
        /// The requested id.
        id: u8,
        /// The configured port count.
        count: usize,
    },

    /// Operation not allowed in the current port state.
    #[error("port {port}: cannot {operation} while {state}")]
    BadStateForOp {
        port: PortId,
        state: PortState,
        /// The refused operation (e.g. "start traffic").
        operation: &'static str,
    },

    /// `start_traffic` with an empty stream table.
    #[error("port {port}: no streams loaded")]
    NoStreams { port: PortId },

    /// The stream compiler rejected the staged streams.
    #[error("port {port}: failed to compile streams: {source}")]
    CompileFailed {
        port: PortId,
        #[source]
        source: CompileError,
    },

    /// No stream with this id on the port.
    #[error("port {port}: stream {stream_id} not found")]
    StreamNotFound { port: PortId, stream_id: u32 },

    /// Traffic cannot run on a port nobody owns.
    #[error("port {port} has no owner")]
    NotOwned { port: PortId },

    /// Acquire without force on a port someone else owns.
    #[error("port {port} is owned by '{owner}'")]
    PortBusy { port: PortId, owner: String },

    /// The presented handler does not match the current owner's.
    #[error("port {port}: invalid owner handler")]
    InvalidHandler { port: PortId },

    /// Owner identities cannot be empty.
    #[error("owner identity cannot be empty")]
    InvalidOwner,

    /// The driver layer failed.
    #[error("port {port}: driver error: {source}")]
    Driver {
        port: PortId,
        #[source]
        source: DriverError,
    },

    /// A deadline imposed by the caller expired.
    #[error("port {port}: {operation} timed out")]
    Timeout {
        port: PortId,
        operation: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl StatelessError {
    /// Creates a bad-state error.
    pub fn bad_state(port: PortId, state: PortState, operation: &'static str) -> Self {
        Self::BadStateForOp {
            port,
            state,
            operation,
        }
    }

    /// Creates a driver error.
    pub fn driver(port: PortId, source: DriverError) -> Self {
        Self::Driver { port, source }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::AlreadyConfigured => "already_configured",
            Self::OutOfRange { .. } => "out_of_range",
            Self::BadStateForOp { .. } => "bad_state_for_op",
            Self::NoStreams { .. } => "no_streams",
            Self::CompileFailed { .. } => "compile_failed",
            Self::StreamNotFound { .. } => "stream_not_found",
            Self::NotOwned { .. } => "not_owned",
            Self::PortBusy { .. } => "port_busy",
            Self::InvalidHandler { .. } => "invalid_handler",
            Self::InvalidOwner => "invalid_owner",
            Self::Driver { .. } => "driver",
            Self::Timeout { .. } => "timeout",
            Self::Config { .. } => "config",
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BadStateForOp { .. } | Self::PortBusy { .. } | Self::Timeout { .. } => true,
            Self::Driver { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

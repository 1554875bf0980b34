//! Driver error types.
//!
//! Every call into the driver layer returns a [`DriverResult`]. The port core
//! uses [`DriverError::is_fatal`] to decide whether a failure leaves the port
//! usable or forces it down.

use thiserror::Error;

use crate::types::PortId;

/// Error type for driver-layer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The physical link is down; nothing can be sent or received.
    #[error("link is down")]
    LinkDown,

    /// The NIC reported a hardware or I/O failure.
    #[error("hardware failure: {message}")]
    Hardware { message: String },

    /// The NIC queue is busy; the request may succeed later.
    #[error("driver busy: {message}")]
    Busy { message: String },

    /// The driver has no port with this id.
    #[error("invalid port {port}")]
    InvalidPort { port: PortId },
}

impl DriverError {
    /// Creates a hardware failure error.
    pub fn hardware(message: impl Into<String>) -> Self {
        DriverError::Hardware {
            message: message.into(),
        }
    }

    /// Creates a busy error.
    pub fn busy(message: impl Into<String>) -> Self {
        DriverError::Busy {
            message: message.into(),
        }
    }

    /// Returns true if the port can no longer carry traffic after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::LinkDown | DriverError::Hardware { .. })
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Busy { .. })
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

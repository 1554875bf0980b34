//! Stateless port - per-port traffic state machine and ownership guard.
//!
//! Each [`StatelessPort`] tracks:
//! - Traffic state (DOWN → IDLE → TRANSMITTING)
//! - The current owner and the handler token proving ownership
//! - The staged stream table
//! - The last stats snapshot pulled from the driver
//!
//! # Architecture
//!
//! ```text
//!   remote API
//!       │  handler token
//!       ▼
//!  StatelessPort ──> StreamCompiler (streams → TxProgram)
//!       │
//!       └──> PortDriver (begin/halt transmit, counters, link state)
//! ```

mod owner;
#[allow(clippy::module_inception)]
mod port;
mod state;
mod stats;

pub use owner::{OwnerHandler, OwnerPolicy, Ownership, HANDLER_BYTES};
pub use port::{PortSettings, StatelessPort};
pub use state::{LinkTransition, PortState};
pub use stats::PortStats;

//! TRex stateless port core
//!
//! Tracks, for every physical port, who owns it, what traffic state it is
//! in, which streams are staged on it and its last counters. Clients acquire
//! a port, receive a handler token, load streams and start/stop traffic;
//! the core enforces that only the owner acts on a port and that traffic
//! operations only happen from valid states.
//!
//! - [`stream`]: stream definitions, the per-port stream table and the
//!   compiler contract
//! - [`port`]: the per-port state machine and ownership guard
//! - [`registry`]: the fixed port array and its process-wide instance
//! - [`config`]: TOML configuration for the daemon
//!
//! # Example
//!
//! ```ignore
//! use trex_stateless::{configure, get_port_by_id, Stream};
//!
//! configure(4)?;
//! let port = get_port_by_id(2)?;
//! let token = port.acquire("alice", false).await?;
//! port.add_stream_as(&token, Stream::continuous(1, frame, 1000.0)).await?;
//! port.start_traffic_as(&token).await?;
//! ```

pub mod config;
pub mod error;
pub mod port;
pub mod registry;
pub mod stream;

pub use config::{load_config, StatelessConfig};
pub use error::{Result, StatelessError};
pub use port::{
    LinkTransition, OwnerPolicy, PortSettings, PortState, PortStats, StatelessPort,
};
pub use registry::{
    configure, configure_with, get_instance, get_port_by_id, get_port_count, PortRegistry,
    PortRegistryBuilder,
};
pub use stream::{
    BasicStreamCompiler, CompileError, Stream, StreamCompiler, StreamTable, StreamTableError,
    TxMode,
};

//! Driver-layer contract for the TRex stateless port core.
//!
//! The port core never touches a NIC directly. Everything it needs from the
//! packet I/O layer goes through the [`PortDriver`] trait defined here:
//!
//! - [`types`]: port ids, speeds, link state, counters and the compiled
//!   [`TxProgram`] a driver executes
//! - [`error`]: the [`DriverError`] taxonomy
//! - [`driver`]: the [`PortDriver`] trait
//! - [`sim`]: [`SimDriver`], an in-memory implementation with failure
//!   injection, used by tests and by the daemon when no hardware is present
//!
//! # Example
//!
//! ```ignore
//! use trex_driver::{PortDriver, PortId, SimDriver};
//!
//! let driver = SimDriver::new(4);
//! let counters = driver.read_counters(PortId::new(0)).await?;
//! ```

pub mod driver;
pub mod error;
pub mod sim;
pub mod types;

pub use driver::PortDriver;
pub use error::{DriverError, DriverResult};
pub use sim::{SimDriver, SIM_DRIVER_NAME};
pub use types::{
    LinkEvent, LinkState, PortCounters, PortId, PortProperties, PortSpeed, TxEntry, TxProgram,
};

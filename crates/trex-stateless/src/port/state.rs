//! Port state machine states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Traffic state of a stateless port.
///
/// - `Down`: link is down, the port cannot be used
/// - `Idle`: link is up, nothing is being sent
/// - `Transmitting`: a compiled program is running on the NIC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortState {
    #[default]
    Down,
    Idle,
    Transmitting,
}

impl PortState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PortState::Down => "DOWN",
            PortState::Idle => "IDLE",
            PortState::Transmitting => "TRANSMITTING",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effect of a link notification on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// The event did not change the port state.
    Unchanged,
    /// `Down` -> `Idle`.
    Up,
    /// `Idle` -> `Down`.
    Down,
    /// The port was forced `Down` while transmitting or after a fatal
    /// driver error.
    ForcedDown {
        /// True if the owner was cleared as part of the transition.
        owner_released: bool,
    },
}

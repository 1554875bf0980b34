//! Port ownership: owner identity, handler tokens and the forced-down policy.
//!
//! A handler is a bearer credential. Whoever presents the exact string is
//! treated as the owner; there is no expiry and no further identity check.
//! Handlers carry 128 bits from the OS random source and are redacted from
//! `Debug` output so they do not end up in logs.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of random bytes in a handler.
pub const HANDLER_BYTES: usize = 16;

/// Opaque token proving ownership of a port.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnerHandler(String);

impl OwnerHandler {
    /// Draws a fresh handler from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; HANDLER_BYTES];
        OsRng.fill_bytes(&mut bytes);
        OwnerHandler(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Draws a fresh handler that differs from `previous`.
    pub fn generate_distinct(previous: Option<&OwnerHandler>) -> Self {
        loop {
            let handler = Self::generate();
            if previous != Some(&handler) {
                return handler;
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a presented token without short-circuiting on the
    /// first differing byte.
    pub fn matches(&self, token: &str) -> bool {
        let ours = self.0.as_bytes();
        let theirs = token.as_bytes();
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(theirs)
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl fmt::Debug for OwnerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OwnerHandler(<redacted>)")
    }
}

/// Current owner of a port.
///
/// Owner and handler live together so one can never exist without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub owner: String,
    pub handler: OwnerHandler,
}

/// What happens to ownership when a transmitting port is forced down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerPolicy {
    /// The owner keeps the port and can restart traffic once the link is back.
    #[default]
    Retain,
    /// The port is released and must be acquired again.
    Release,
}

impl fmt::Display for OwnerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerPolicy::Retain => write!(f, "retain"),
            OwnerPolicy::Release => write!(f, "release"),
        }
    }
}

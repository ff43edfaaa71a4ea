//! # Reentrancy Guard
//!
//! Balance-mutating entry points (mint, redeem, allocate, harvest, collect)
//! take the guard on entry and release it on exit. A second entry while the
//! guard is held, for instance a strategy calling back into the vault from
//! inside `deposit`, is refused instead of observing half-applied state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when an entry point is re-entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reentrant call")]
pub struct GuardError;

/// A non-reentrant lock flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReentrancyGuard {
    entered: bool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self { entered: false }
    }

    /// Takes the guard. Fails if it is already held.
    pub fn enter(&mut self) -> Result<(), GuardError> {
        if self.entered {
            return Err(GuardError);
        }
        self.entered = true;
        Ok(())
    }

    /// Releases the guard.
    pub fn exit(&mut self) {
        self.entered = false;
    }

    pub fn is_entered(&self) -> bool {
        self.entered
    }
}

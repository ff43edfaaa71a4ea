//! Token swaps used to turn strategy rewards into the primary stable.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use crate::address::Address;
use crate::config::WAD;
use crate::math::{self, MathError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("no route from {from} to {to}")]
    NoRoute { from: Address, to: Address },

    #[error("swap from {from} to {to} was rejected")]
    Rejected { from: Address, to: Address },

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Exchanges one token for another.
pub trait Swapper: Send + Sync + std::fmt::Debug {
    /// Swaps `amount` of `from` and returns the amount of `to` received.
    fn swap(&mut self, from: &Address, to: &Address, amount: u128) -> Result<u128, SwapError>;

    /// What `swap` would return right now, without trading.
    fn quote(&self, from: &Address, to: &Address, amount: u128) -> Result<u128, SwapError>;
}

#[derive(Debug, Default)]
struct RateTable {
    /// Output raw units per input raw unit, WAD.
    rates: BTreeMap<(Address, Address), u128>,
    rejecting: BTreeSet<Address>,
}

/// Swaps at configured fixed rates. Clones share the rate table.
#[derive(Debug, Clone, Default)]
pub struct FixedRateSwapper {
    table: Arc<RwLock<RateTable>>,
}

impl FixedRateSwapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `from -> to` rate: raw output units per raw input unit, WAD.
    pub fn set_rate(&self, from: Address, to: Address, rate: u128) {
        self.table.write().rates.insert((from, to), rate);
    }

    /// Makes swaps out of `token` fail (or work again).
    pub fn set_rejecting(&self, token: Address, rejecting: bool) {
        let mut table = self.table.write();
        if rejecting {
            table.rejecting.insert(token);
        } else {
            table.rejecting.remove(&token);
        }
    }
}

impl Swapper for FixedRateSwapper {
    fn swap(&mut self, from: &Address, to: &Address, amount: u128) -> Result<u128, SwapError> {
        self.quote(from, to, amount)
    }

    fn quote(&self, from: &Address, to: &Address, amount: u128) -> Result<u128, SwapError> {
        if from == to {
            return Ok(amount);
        }
        let table = self.table.read();
        if table.rejecting.contains(from) {
            return Err(SwapError::Rejected {
                from: *from,
                to: *to,
            });
        }
        let rate = table
            .rates
            .get(&(*from, *to))
            .copied()
            .ok_or(SwapError::NoRoute {
                from: *from,
                to: *to,
            })?;
        Ok(math::mul_div(amount, rate, WAD)?)
    }
}

//! USD price feeds.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::address::Address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("no price available for {0}")]
    PriceUnavailable(Address),
}

/// Supplies the USD price of an asset with 8 decimal places.
pub trait PriceOracle: Send + Sync + std::fmt::Debug {
    fn price(&self, asset: &Address) -> Result<u128, OracleError>;
}

/// An oracle serving whatever prices it was last given. Clones share the
/// same price table.
#[derive(Debug, Clone, Default)]
pub struct FixedPriceOracle {
    prices: Arc<RwLock<BTreeMap<Address, u128>>>,
}

impl FixedPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the price of `asset` (8 decimals).
    pub fn set_price(&self, asset: Address, price: u128) {
        self.prices.write().insert(asset, price);
    }
}

impl PriceOracle for FixedPriceOracle {
    fn price(&self, asset: &Address) -> Result<u128, OracleError> {
        self.prices
            .read()
            .get(asset)
            .copied()
            .ok_or(OracleError::PriceUnavailable(*asset))
    }
}

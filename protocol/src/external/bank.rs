//! Custody of assets held outside the protocol.
//!
//! The vault tracks its own holdings internally. The bank is the boundary
//! with everyone else: it debits a depositor on mint, credits a redeemer on
//! redeem, and pays harvest fees out to their recipients.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

use crate::address::Address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankError {
    #[error("{holder} holds {available} of {asset}, {requested} requested")]
    InsufficientFunds {
        holder: Address,
        asset: Address,
        available: u128,
        requested: u128,
    },

    /// The token refused the transfer without reverting.
    #[error("transfer of {asset} was rejected")]
    TransferRejected { asset: Address },

    #[error("balance overflow")]
    Overflow,
}

/// Moves assets between external holders and the protocol.
pub trait AssetBank: Send + Sync + std::fmt::Debug {
    /// Takes `amount` of `asset` from `from` into protocol custody.
    fn pull(&mut self, from: &Address, asset: &Address, amount: u128) -> Result<(), BankError>;

    /// Releases `amount` of `asset` from protocol custody to `to`.
    fn push(&mut self, to: &Address, asset: &Address, amount: u128) -> Result<(), BankError>;

    /// External balance of `holder`.
    fn balance_of(&self, holder: &Address, asset: &Address) -> u128;
}

#[derive(Debug, Default)]
struct BankState {
    balances: BTreeMap<(Address, Address), u128>,
    rejecting: BTreeSet<Address>,
}

/// In-memory balances. Clones share state, so a test can keep a handle
/// after giving the vault its own.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBank {
    state: Arc<Mutex<BankState>>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gives `holder` `amount` of `asset` out of thin air.
    pub fn credit(&self, holder: Address, asset: Address, amount: u128) {
        let mut state = self.state.lock();
        let balance = state.balances.entry((holder, asset)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Makes every transfer of `asset` return "false" (or work again).
    pub fn set_rejecting(&self, asset: Address, rejecting: bool) {
        let mut state = self.state.lock();
        if rejecting {
            state.rejecting.insert(asset);
        } else {
            state.rejecting.remove(&asset);
        }
    }
}

impl AssetBank for InMemoryBank {
    fn pull(&mut self, from: &Address, asset: &Address, amount: u128) -> Result<(), BankError> {
        let mut state = self.state.lock();
        if state.rejecting.contains(asset) {
            return Err(BankError::TransferRejected { asset: *asset });
        }
        let available = state.balances.get(&(*from, *asset)).copied().unwrap_or(0);
        if available < amount {
            return Err(BankError::InsufficientFunds {
                holder: *from,
                asset: *asset,
                available,
                requested: amount,
            });
        }
        state.balances.insert((*from, *asset), available - amount);
        Ok(())
    }

    fn push(&mut self, to: &Address, asset: &Address, amount: u128) -> Result<(), BankError> {
        let mut state = self.state.lock();
        if state.rejecting.contains(asset) {
            return Err(BankError::TransferRejected { asset: *asset });
        }
        let balance = state.balances.entry((*to, *asset)).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(BankError::Overflow)?;
        Ok(())
    }

    fn balance_of(&self, holder: &Address, asset: &Address) -> u128 {
        self.state
            .lock()
            .balances
            .get(&(*holder, *asset))
            .copied()
            .unwrap_or(0)
    }
}

//! # Dripper
//!
//! Smooths harvested yield into the vault. Funds sent here are released
//! linearly over `drip_duration` seconds from the last collection, so a
//! large harvest raises the value of a unit gradually instead of in one
//! step.
//!
//! Time is passed in explicitly as Unix seconds. Nothing here runs in the
//! background; every call recomputes what is releasable from elapsed time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use cash_protocol::access::AccessError;
use cash_protocol::external::{AssetBank, BankError};
use cash_protocol::ledger::RebaseOutcome;
use cash_protocol::math::{self, MathError};
use cash_protocol::Address;

use crate::error::ErrorKind;
use crate::vault::{Vault, VaultError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DripError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error("token transfer failed: {0}")]
    Transfer(#[from] BankError),

    #[error("duration must be non-zero")]
    ZeroDuration,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("dripper holds {available} of {asset}, {requested} requested")]
    InsufficientBalance {
        asset: Address,
        available: u128,
        requested: u128,
    },
}

impl DripError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DripError::Access(_) => ErrorKind::AccessDenied,
            DripError::Vault(err) => err.kind(),
            DripError::Math(_) => ErrorKind::Arithmetic,
            DripError::Transfer(_) => ErrorKind::PartialExternalFailure,
            DripError::ZeroDuration | DripError::ZeroAmount | DripError::InsufficientBalance { .. } => {
                ErrorKind::InvalidInput
            }
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Drip state for one asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DripState {
    /// Release window in seconds. Zero means dripping has not been set up
    /// and nothing is releasable.
    pub duration: u64,
    /// Unix seconds of the last collection.
    pub last_collect: u64,
    /// Raw units held and not yet released.
    pub balance: u128,
}

impl DripState {
    /// Releasable amount at `now`: the full balance once the window has
    /// passed, otherwise `balance * elapsed / duration`.
    pub fn releasable(&self, now: u64) -> Result<u128, MathError> {
        if self.duration == 0 || self.balance == 0 {
            return Ok(0);
        }
        let elapsed = now.saturating_sub(self.last_collect);
        if elapsed >= self.duration {
            return Ok(self.balance);
        }
        let slice = math::mul_div(self.balance, elapsed as u128, self.duration as u128)?;
        Ok(slice.min(self.balance))
    }
}

/// Outcome of [`Dripper::collect_and_rebase`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DripReport {
    /// `(asset, raw amount)` released to the vault.
    pub collected: Vec<(Address, u128)>,
    pub rebase: RebaseOutcome,
}

// ---------------------------------------------------------------------------
// Dripper
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Dripper {
    address: Address,
    drips: BTreeMap<Address, DripState>,
    bank: Box<dyn AssetBank>,
}

impl Dripper {
    pub fn new(address: Address, bank: Box<dyn AssetBank>) -> Self {
        Self {
            address,
            drips: BTreeMap::new(),
            bank,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn state(&self, asset: &Address) -> Option<&DripState> {
        self.drips.get(asset)
    }

    /// Raw units of `asset` held.
    pub fn balance(&self, asset: &Address) -> u128 {
        self.drips.get(asset).map_or(0, |d| d.balance)
    }

    /// What `collect` would release for `asset` at `now`.
    pub fn available(&self, asset: &Address, now: u64) -> Result<u128, DripError> {
        match self.drips.get(asset) {
            Some(state) => Ok(state.releasable(now)?),
            None => Ok(0),
        }
    }

    /// Sets the release window for `asset`. Anything already releasable
    /// under the old window is collected first, and the new window starts
    /// at `now`.
    pub fn set_drip_duration(
        &mut self,
        vault: &mut Vault,
        caller: &Address,
        asset: &Address,
        seconds: u64,
        now: u64,
    ) -> Result<(), DripError> {
        vault.access().require_governor(caller)?;
        if seconds == 0 {
            return Err(DripError::ZeroDuration);
        }
        if self.drips.get(asset).is_some_and(|d| d.duration > 0) {
            self.collect(vault, asset, now)?;
        }
        let state = self.drips.entry(*asset).or_default();
        state.duration = seconds;
        state.last_collect = now;
        info!(asset = %asset, seconds, "drip duration set");
        Ok(())
    }

    /// Takes custody of funds handed over by the harvester.
    pub(crate) fn receive(&mut self, asset: &Address, amount: u128) -> Result<(), DripError> {
        let state = self.drips.entry(*asset).or_default();
        state.balance = state.balance.checked_add(amount).ok_or(MathError::Overflow)?;
        debug!(asset = %asset, amount, balance = state.balance, "dripper funded");
        Ok(())
    }

    /// Pulls `amount` of `asset` from an outside holder into the drip.
    pub fn fund(&mut self, from: &Address, asset: &Address, amount: u128) -> Result<(), DripError> {
        if amount == 0 {
            return Err(DripError::ZeroAmount);
        }
        self.bank.pull(from, asset, amount)?;
        self.receive(asset, amount)
    }

    /// Moves the releasable slice of `asset` into the vault.
    pub fn collect(&mut self, vault: &mut Vault, asset: &Address, now: u64) -> Result<u128, DripError> {
        let Some(state) = self.drips.get(asset) else {
            return Ok(0);
        };
        if state.duration == 0 {
            return Ok(0);
        }
        let amount = state.releasable(now)?;
        if amount > 0 {
            vault.receive_yield(asset, amount)?;
        }
        if let Some(state) = self.drips.get_mut(asset) {
            // A slice that rounds to zero keeps accruing from the old mark.
            if amount > 0 || state.balance == 0 {
                state.last_collect = now;
            }
            state.balance -= amount;
        }
        info!(asset = %asset, amount, "dripper collected");
        Ok(amount)
    }

    /// `(asset, amount)` every collection would release at `now` if
    /// `incoming` were received first.
    pub fn preview_release(
        &self,
        now: u64,
        incoming: &[(Address, u128)],
    ) -> Result<Vec<(Address, u128)>, DripError> {
        let mut drips = self.drips.clone();
        for (asset, amount) in incoming {
            let state = drips.entry(*asset).or_default();
            state.balance = state.balance.checked_add(*amount).ok_or(MathError::Overflow)?;
        }
        let mut released = Vec::new();
        for (asset, state) in &drips {
            let amount = state.releasable(now)?;
            if amount > 0 {
                released.push((*asset, amount));
            }
        }
        Ok(released)
    }

    /// Fails with whatever [`collect_and_rebase`](Self::collect_and_rebase)
    /// would fail with at `now` after receiving `incoming`, without moving
    /// funds or touching the collection marks.
    pub(crate) fn check_collect_and_rebase(
        &self,
        vault: &Vault,
        now: u64,
        incoming: &[(Address, u128)],
    ) -> Result<(), DripError> {
        vault.access().require_rebase_caller(&self.address)?;
        let released = self.preview_release(now, incoming)?;
        vault.preview_rebase(&released)?;
        Ok(())
    }

    /// Collects every asset into the vault and rebases as a Rebase Manager.
    /// Refused up front, with nothing collected, if the rebase would fail.
    pub fn collect_and_rebase(&mut self, vault: &mut Vault, now: u64) -> Result<DripReport, DripError> {
        self.check_collect_and_rebase(vault, now, &[])?;
        let assets: Vec<Address> = self.drips.keys().copied().collect();
        let mut collected = Vec::new();
        for asset in assets {
            let amount = self.collect(vault, &asset, now)?;
            if amount > 0 {
                collected.push((asset, amount));
            }
        }
        let rebase = vault.rebase(&self.address)?;
        Ok(DripReport { collected, rebase })
    }

    /// Sends held funds to the governor.
    pub fn transfer_token(
        &mut self,
        vault: &Vault,
        caller: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<(), DripError> {
        vault.access().require_governor(caller)?;
        let available = self.balance(asset);
        if available < amount {
            return Err(DripError::InsufficientBalance {
                asset: *asset,
                available,
                requested: amount,
            });
        }
        self.bank.push(&vault.access().governor(), asset, amount)?;
        if let Some(state) = self.drips.get_mut(asset) {
            state.balance -= amount;
        }
        info!(asset = %asset, amount, "dripper funds recovered");
        Ok(())
    }
}

//! # Wrapped CASH
//!
//! A non-rebasing, share-based wrapper around the unit token. The wrapper
//! holds units as a rebasing contract account, so every rebase grows the
//! units behind each share while share balances stay fixed.
//!
//! Conversions round in the wrapper's favour: deposits and redemptions
//! round down, mints and withdrawals round up.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

use cash_protocol::access::AccessError;
use cash_protocol::config::WAD;
use cash_protocol::external::{AssetBank, BankError};
use cash_protocol::math::{self, MathError};
use cash_protocol::Address;

use crate::error::ErrorKind;
use crate::vault::{Vault, VaultError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WrapError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error("token transfer failed: {0}")]
    Transfer(#[from] BankError),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("{account} holds {available} shares, {requested} requested")]
    InsufficientShares {
        account: Address,
        available: u128,
        requested: u128,
    },

    #[error("cannot collect unit token")]
    CannotCollectUnitToken,
}

impl WrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WrapError::Access(_) => ErrorKind::AccessDenied,
            WrapError::Vault(err) => err.kind(),
            WrapError::Math(_) => ErrorKind::Arithmetic,
            WrapError::Transfer(_) => ErrorKind::PartialExternalFailure,
            WrapError::ZeroAmount | WrapError::InsufficientShares { .. } => ErrorKind::InvalidInput,
            WrapError::CannotCollectUnitToken => ErrorKind::PolicyViolation,
        }
    }
}

/// Share-side summary for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperSnapshot {
    pub total_shares: u128,
    pub total_assets: u128,
    /// Units per share, WAD. One before the first deposit.
    pub share_price: u128,
}

#[derive(Debug)]
pub struct WrappedCash {
    address: Address,
    shares: BTreeMap<Address, u128>,
    total_shares: u128,
    bank: Box<dyn AssetBank>,
}

impl WrappedCash {
    /// Registers the wrapper as a contract holder and opts it into rebasing.
    pub fn new(vault: &mut Vault, address: Address, bank: Box<dyn AssetBank>) -> Result<Self, WrapError> {
        vault.register_contract(address)?;
        vault.rebase_opt_in(&address)?;
        info!(wrapper = %address, "wrapper created");
        Ok(Self {
            address,
            shares: BTreeMap::new(),
            total_shares: 0,
            bank,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    pub fn share_balance(&self, account: &Address) -> u128 {
        self.shares.get(account).copied().unwrap_or(0)
    }

    /// Units held by the wrapper.
    pub fn total_assets(&self, vault: &Vault) -> u128 {
        vault.balance_of(&self.address)
    }

    pub fn convert_to_shares(&self, vault: &Vault, units: u128) -> Result<u128, WrapError> {
        self.to_shares(vault, units, false)
    }

    pub fn convert_to_assets(&self, vault: &Vault, shares: u128) -> Result<u128, WrapError> {
        self.to_assets(vault, shares, false)
    }

    pub fn snapshot(&self, vault: &Vault) -> Result<WrapperSnapshot, WrapError> {
        Ok(WrapperSnapshot {
            total_shares: self.total_shares,
            total_assets: self.total_assets(vault),
            share_price: self.to_assets(vault, WAD, false)?,
        })
    }

    // -- Share Operations ---------------------------------------------------

    /// Wraps `units` from `owner`. Returns shares issued.
    pub fn deposit(&mut self, vault: &mut Vault, owner: &Address, units: u128) -> Result<u128, WrapError> {
        if units == 0 {
            return Err(WrapError::ZeroAmount);
        }
        let shares = self.to_shares(vault, units, false)?;
        if shares == 0 {
            return Err(WrapError::ZeroAmount);
        }
        vault.transfer(owner, &self.address, units)?;
        self.issue(owner, shares)?;
        info!(owner = %owner, units, shares, "wrapped");
        Ok(shares)
    }

    /// Issues exactly `shares` to `owner`. Returns units pulled.
    pub fn mint(&mut self, vault: &mut Vault, owner: &Address, shares: u128) -> Result<u128, WrapError> {
        if shares == 0 {
            return Err(WrapError::ZeroAmount);
        }
        let units = self.to_assets(vault, shares, true)?;
        vault.transfer(owner, &self.address, units)?;
        self.issue(owner, shares)?;
        info!(owner = %owner, units, shares, "wrapped");
        Ok(units)
    }

    /// Unwraps exactly `units` to `owner`. Returns shares burned.
    pub fn withdraw(&mut self, vault: &mut Vault, owner: &Address, units: u128) -> Result<u128, WrapError> {
        if units == 0 {
            return Err(WrapError::ZeroAmount);
        }
        let shares = self.to_shares(vault, units, true)?;
        self.burn(owner, shares)?;
        if let Err(err) = vault.transfer(&self.address, owner, units) {
            self.issue(owner, shares)?;
            return Err(err.into());
        }
        info!(owner = %owner, units, shares, "unwrapped");
        Ok(shares)
    }

    /// Burns `shares` from `owner`. Returns units paid out.
    pub fn redeem(&mut self, vault: &mut Vault, owner: &Address, shares: u128) -> Result<u128, WrapError> {
        if shares == 0 {
            return Err(WrapError::ZeroAmount);
        }
        let units = self.to_assets(vault, shares, false)?;
        self.burn(owner, shares)?;
        if units > 0 {
            if let Err(err) = vault.transfer(&self.address, owner, units) {
                self.issue(owner, shares)?;
                return Err(err.into());
            }
        }
        info!(owner = %owner, units, shares, "unwrapped");
        Ok(units)
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, shares: u128) -> Result<(), WrapError> {
        if shares == 0 {
            return Err(WrapError::ZeroAmount);
        }
        self.burn(from, shares)?;
        self.issue(to, shares)
    }

    /// Sends a stray token held by the wrapper to the governor. The unit
    /// token itself backs the shares and never leaves this way.
    pub fn transfer_token(
        &mut self,
        vault: &Vault,
        caller: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<(), WrapError> {
        vault.access().require_governor(caller)?;
        if *asset == vault.unit_token() {
            return Err(WrapError::CannotCollectUnitToken);
        }
        let governor = vault.access().governor();
        self.bank.pull(&self.address, asset, amount)?;
        self.bank.push(&governor, asset, amount)?;
        info!(asset = %asset, amount, "wrapper funds recovered");
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    fn to_shares(&self, vault: &Vault, units: u128, round_up: bool) -> Result<u128, WrapError> {
        let assets = self.total_assets(vault);
        if self.total_shares == 0 || assets == 0 {
            return Ok(units);
        }
        Ok(if round_up {
            math::mul_div_up(units, self.total_shares, assets)?
        } else {
            math::mul_div(units, self.total_shares, assets)?
        })
    }

    fn to_assets(&self, vault: &Vault, shares: u128, round_up: bool) -> Result<u128, WrapError> {
        if self.total_shares == 0 {
            return Ok(shares);
        }
        let assets = self.total_assets(vault);
        Ok(if round_up {
            math::mul_div_up(shares, assets, self.total_shares)?
        } else {
            math::mul_div(shares, assets, self.total_shares)?
        })
    }

    fn issue(&mut self, to: &Address, shares: u128) -> Result<(), WrapError> {
        let total = self.total_shares.checked_add(shares).ok_or(MathError::Overflow)?;
        let entry = self.shares.entry(*to).or_insert(0);
        *entry = entry.checked_add(shares).ok_or(MathError::Overflow)?;
        self.total_shares = total;
        Ok(())
    }

    fn burn(&mut self, from: &Address, shares: u128) -> Result<(), WrapError> {
        let available = self.share_balance(from);
        if available < shares {
            return Err(WrapError::InsufficientShares {
                account: *from,
                available,
                requested: shares,
            });
        }
        self.shares.insert(*from, available - shares);
        self.total_shares -= shares;
        Ok(())
    }
}

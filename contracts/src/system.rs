//! # CASH Protocol
//!
//! Wires the vault, harvester, dripper and wrapper into one deployable
//! system and runs the payout: harvest every reward strategy, split fees,
//! drip yield into the vault, rebase, and advance the schedule.
//!
//! The components borrow each other per call rather than holding
//! references, so the facade is the only owner. Calls that span components
//! go through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use cash_protocol::access::AccessError;
use cash_protocol::config::{HarvesterConfig, VaultConfig};
use cash_protocol::external::{AssetBank, PriceOracle, Swapper};
use cash_protocol::Address;

use crate::dripper::{DripError, DripReport, Dripper};
use crate::error::ErrorKind;
use crate::harvester::{FeeSplit, HarvestAllReport, HarvestError, HarvestReport, Harvester};
use crate::value_checker::{ValueCheckError, ValueDelta, ValueSnapshot, VaultValueChecker};
use crate::vault::{Vault, VaultError, VaultParams};
use crate::wrapped::{WrapError, WrappedCash};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Harvest(#[from] HarvestError),

    #[error(transparent)]
    Drip(#[from] DripError),

    #[error(transparent)]
    Wrap(#[from] WrapError),

    #[error(transparent)]
    ValueCheck(#[from] ValueCheckError),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::Access(_) => ErrorKind::AccessDenied,
            ProtocolError::Vault(err) => err.kind(),
            ProtocolError::Harvest(err) => err.kind(),
            ProtocolError::Drip(err) => err.kind(),
            ProtocolError::Wrap(err) => err.kind(),
            ProtocolError::ValueCheck(err) => err.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Where each component lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAddresses {
    pub vault: Address,
    pub unit_token: Address,
    pub harvester: Address,
    pub dripper: Address,
    pub wrapper: Address,
}

impl Default for ProtocolAddresses {
    fn default() -> Self {
        Self {
            vault: Address::from_label("cash.vault"),
            unit_token: Address::from_label("cash.token"),
            harvester: Address::from_label("cash.harvester"),
            dripper: Address::from_label("cash.dripper"),
            wrapper: Address::from_label("cash.wrapped"),
        }
    }
}

/// Everything needed to deploy a [`CashProtocol`].
#[derive(Debug)]
pub struct ProtocolParams<B> {
    pub addresses: ProtocolAddresses,
    pub governor: Address,
    pub vault_config: VaultConfig,
    pub harvester_config: HarvesterConfig,
    pub oracle: Box<dyn PriceOracle>,
    pub swapper: Box<dyn Swapper>,
    /// Shared by every component. Clones must share balances.
    pub bank: B,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Outcome of one payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutReport {
    pub harvest: HarvestAllReport,
    pub drip: DripReport,
    pub next_payout_time: u64,
}

// ---------------------------------------------------------------------------
// CashProtocol
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CashProtocol {
    addresses: ProtocolAddresses,
    vault: Vault,
    harvester: Harvester,
    dripper: Dripper,
    wrapper: WrappedCash,
    value_checker: VaultValueChecker,
}

impl CashProtocol {
    /// Deploys every component and registers the dripper as a Rebase
    /// Manager. Assets and strategies are added afterwards through
    /// [`vault_mut`](Self::vault_mut).
    pub fn new<B>(params: ProtocolParams<B>) -> Result<Self, ProtocolError>
    where
        B: AssetBank + Clone + 'static,
    {
        let addresses = params.addresses;
        let mut vault = Vault::new(VaultParams {
            address: addresses.vault,
            unit_token: addresses.unit_token,
            governor: params.governor,
            config: params.vault_config,
            oracle: params.oracle,
            bank: Box::new(params.bank.clone()),
        })?;
        let harvester = Harvester::new(
            addresses.harvester,
            params.harvester_config,
            params.swapper,
            Box::new(params.bank.clone()),
        )?;
        let dripper = Dripper::new(addresses.dripper, Box::new(params.bank.clone()));
        vault.add_rebase_manager(&params.governor, addresses.dripper)?;
        let wrapper = WrappedCash::new(&mut vault, addresses.wrapper, Box::new(params.bank))?;

        info!(
            vault = %addresses.vault,
            harvester = %addresses.harvester,
            dripper = %addresses.dripper,
            wrapper = %addresses.wrapper,
            "protocol deployed"
        );
        Ok(Self {
            addresses,
            vault,
            harvester,
            dripper,
            wrapper,
            value_checker: VaultValueChecker::new(),
        })
    }

    // -- Accessors ----------------------------------------------------------

    pub fn addresses(&self) -> &ProtocolAddresses {
        &self.addresses
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    pub fn vault_mut(&mut self) -> &mut Vault {
        &mut self.vault
    }

    pub fn harvester(&self) -> &Harvester {
        &self.harvester
    }

    pub fn dripper(&self) -> &Dripper {
        &self.dripper
    }

    pub fn wrapper(&self) -> &WrappedCash {
        &self.wrapper
    }

    pub fn value_checker(&self) -> &VaultValueChecker {
        &self.value_checker
    }

    // -- Payout -------------------------------------------------------------

    /// Runs the scheduled payout. Governor, Strategist or Rebase Manager.
    pub fn payout(&mut self, caller: &Address, now: u64) -> Result<PayoutReport, ProtocolError> {
        let access = self.vault.access();
        if access.require_governor_or_strategist(caller).is_err() {
            access.require_rebase_caller(caller)?;
        }
        self.vault.check_payout_window(now)?;
        // Nothing is collected, paid or released unless the closing rebase
        // would go through.
        let incoming = self.harvester.preview_dripper_share(&self.vault)?;
        self.dripper
            .check_collect_and_rebase(&self.vault, now, &[incoming])?;

        let harvest = self.harvester.harvest_all(&mut self.vault, &mut self.dripper)?;
        if !harvest.failures.is_empty() {
            warn!(failed = harvest.failures.len(), "payout continued past failed harvests");
        }
        let drip = self.dripper.collect_and_rebase(&mut self.vault, now)?;
        let next_payout_time = self.vault.advance_payout_schedule(now);

        info!(
            caller = %caller,
            now,
            harvested = harvest.harvests.len(),
            to_dripper = harvest.split.dripper,
            rebased = drip.rebase.is_applied(),
            next_payout_time,
            "payout complete"
        );
        Ok(PayoutReport {
            harvest,
            drip,
            next_payout_time,
        })
    }

    // -- Harvester ----------------------------------------------------------

    pub fn harvest(&mut self, caller: &Address, strategy: &Address) -> Result<HarvestReport, ProtocolError> {
        Ok(self.harvester.harvest(&mut self.vault, caller, strategy)?)
    }

    pub fn distribute_fees(&mut self, caller: &Address) -> Result<FeeSplit, ProtocolError> {
        Ok(self
            .harvester
            .distribute_fees(&self.vault, &mut self.dripper, caller)?)
    }

    pub fn harvest_and_distribute_all(&mut self, caller: &Address) -> Result<HarvestAllReport, ProtocolError> {
        Ok(self
            .harvester
            .harvest_and_distribute_all(&mut self.vault, &mut self.dripper, caller)?)
    }

    pub fn set_harvest_fees(
        &mut self,
        caller: &Address,
        labs_bps: u16,
        team_bps: u16,
    ) -> Result<(), ProtocolError> {
        let mut labs = self.harvester.config().labs.clone();
        let mut team = self.harvester.config().team.clone();
        labs.fee_bps = labs_bps;
        team.fee_bps = team_bps;
        // Lower one fee before raising the other so the sum stays valid.
        if labs_bps <= self.harvester.config().labs.fee_bps {
            self.harvester.set_labs(&self.vault, caller, labs)?;
            self.harvester.set_team(&self.vault, caller, team)?;
        } else {
            self.harvester.set_team(&self.vault, caller, team)?;
            self.harvester.set_labs(&self.vault, caller, labs)?;
        }
        Ok(())
    }

    // -- Dripper ------------------------------------------------------------

    pub fn set_drip_duration(
        &mut self,
        caller: &Address,
        asset: &Address,
        seconds: u64,
        now: u64,
    ) -> Result<(), ProtocolError> {
        Ok(self
            .dripper
            .set_drip_duration(&mut self.vault, caller, asset, seconds, now)?)
    }

    pub fn collect(&mut self, asset: &Address, now: u64) -> Result<u128, ProtocolError> {
        Ok(self.dripper.collect(&mut self.vault, asset, now)?)
    }

    pub fn collect_and_rebase(&mut self, now: u64) -> Result<DripReport, ProtocolError> {
        Ok(self.dripper.collect_and_rebase(&mut self.vault, now)?)
    }

    // -- Wrapper ------------------------------------------------------------

    pub fn wrap(&mut self, owner: &Address, units: u128) -> Result<u128, ProtocolError> {
        Ok(self.wrapper.deposit(&mut self.vault, owner, units)?)
    }

    pub fn unwrap_shares(&mut self, owner: &Address, shares: u128) -> Result<u128, ProtocolError> {
        Ok(self.wrapper.redeem(&mut self.vault, owner, shares)?)
    }

    // -- Value Checks -------------------------------------------------------

    pub fn take_value_snapshot(&mut self, caller: &Address, now: DateTime<Utc>) -> Result<ValueSnapshot, ProtocolError> {
        Ok(self.value_checker.take_snapshot(caller, &self.vault, now)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn check_value_delta(
        &self,
        caller: &Address,
        now: DateTime<Utc>,
        expected_profit: i128,
        profit_variance: u128,
        expected_value_change: i128,
        value_variance: u128,
    ) -> Result<ValueDelta, ProtocolError> {
        Ok(self.value_checker.check_delta(
            caller,
            &self.vault,
            now,
            expected_profit,
            profit_variance,
            expected_value_change,
            value_variance,
        )?)
    }
}

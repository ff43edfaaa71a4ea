//! # Vault
//!
//! The pool behind CASH. Users deposit supported stable assets and receive
//! units; the vault routes idle funds into strategies, sources liquidity back
//! out of them for redemptions, and rebases the unit ledger toward its total
//! value.
//!
//! The implementation is split by concern:
//!
//! - `capital`: mint, redeem, valuation, rebase.
//! - `admin`: governance setters, asset and strategy registries, pauses.
//! - `allocator`: idle-fund routing, quick deposits, draining strategies,
//!   redemption liquidity.
//! - `rebalance`: the weight table and the rebalance planner.
//! - `payout`: the payout schedule.
//! - `token`: the unit token's transfer and rebase-state surface.
//!
//! ## Custody Model
//!
//! Assets held by the vault itself are tracked in `idle`. Assets held by a
//! strategy are whatever that strategy reports. External parties' balances
//! live behind the [`AssetBank`]: mint pulls from the depositor, redeem
//! pushes to the redeemer. Nothing else crosses that boundary.

mod admin;
mod allocator;
mod capital;
pub mod error;
mod payout;
mod rebalance;
mod token;

pub use capital::RedeemQuote;
pub use error::VaultError;
pub use rebalance::{PlannedMove, RebalanceClass};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use cash_protocol::access::AccessControl;
use cash_protocol::config::VaultConfig;
use cash_protocol::external::{AssetBank, PriceOracle, Strategy};
use cash_protocol::guard::ReentrancyGuard;
use cash_protocol::ledger::UnitLedger;
use cash_protocol::Address;

// ---------------------------------------------------------------------------
// Registry Types
// ---------------------------------------------------------------------------

/// A supported asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub asset: Address,
    pub decimals: u8,
    /// Where `allocate` sends this asset by default.
    pub default_strategy: Option<Address>,
}

/// Allocation bounds for one strategy, in basis points of total value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyWeight {
    pub strategy: Address,
    pub min_weight: u16,
    pub target_weight: u16,
    pub max_weight: u16,
    /// Disabled strategies are drained by the next rebalance.
    pub enabled: bool,
    /// Whether the harvester collects this strategy's rewards.
    pub enabled_reward: bool,
}

impl StrategyWeight {
    /// An enabled, reward-collecting entry.
    pub fn new(strategy: Address, min_weight: u16, target_weight: u16, max_weight: u16) -> Self {
        Self {
            strategy,
            min_weight,
            target_weight,
            max_weight,
            enabled: true,
            enabled_reward: true,
        }
    }
}

#[derive(Debug)]
struct StrategySlot {
    address: Address,
    strategy: Box<dyn Strategy>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One successful movement of funds between the vault and a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLeg {
    pub strategy: Address,
    pub asset: Address,
    /// Raw asset units.
    pub amount: u128,
}

/// One movement that a strategy refused. The funds stayed where they were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFailure {
    pub strategy: Address,
    pub asset: Address,
    pub amount: u128,
    pub reason: String,
}

/// Outcome of routing idle funds into strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub deposits: Vec<AllocationLeg>,
    pub failures: Vec<LegFailure>,
}

impl AllocationReport {
    pub fn is_empty(&self) -> bool {
        self.deposits.is_empty() && self.failures.is_empty()
    }
}

/// Outcome of draining one or more strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReport {
    pub withdrawals: Vec<AllocationLeg>,
    pub failures: Vec<LegFailure>,
}

impl WithdrawReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: WithdrawReport) {
        self.withdrawals.extend(other.withdrawals);
        self.failures.extend(other.failures);
    }
}

/// Outcome of a rebalance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceReport {
    /// The moves the planner asked for, in execution order.
    pub plan: Vec<PlannedMove>,
    pub withdrawals: Vec<AllocationLeg>,
    pub deposits: Vec<AllocationLeg>,
    pub failures: Vec<LegFailure>,
    /// Value pulled out of strategies, 18 decimals.
    pub total_withdrawn: u128,
    /// Value pushed into strategies, 18 decimals.
    pub total_deposited: u128,
    /// Deposited value that came from pre-existing idle funds.
    pub idle_used: u128,
    pub value_before: u128,
    pub value_after: u128,
    /// Value lost in transit (`value_before - value_after`, floored at zero).
    pub slippage: u128,
}

/// Result of a mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    /// Units credited to the minter.
    pub units: u128,
    /// Units withheld as the mint fee.
    pub fee: u128,
    /// Post-mint routing, if any ran.
    pub allocation: Option<AllocationReport>,
}

/// Result of a redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemReceipt {
    /// Units burned from the redeemer.
    pub burned: u128,
    /// Units withheld as the redeem fee.
    pub fee: u128,
    /// `(asset, raw amount)` paid out.
    pub outputs: Vec<(Address, u128)>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One strategy as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub address: Address,
    pub name: String,
    pub check_balance: u128,
    pub net_asset_value: u128,
    pub weight: Option<StrategyWeight>,
}

/// A read-only picture of the vault for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub total_supply: u128,
    pub total_value: u128,
    pub non_rebasing_supply: u128,
    pub rebasing_credits_per_token: u128,
    pub idle: Vec<(Address, u128)>,
    pub strategies: Vec<StrategySnapshot>,
    pub capital_paused: bool,
    pub rebase_paused: bool,
    pub next_payout_time: u64,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Collaborators and identity a vault is built from.
#[derive(Debug)]
pub struct VaultParams {
    /// The vault's own address. Strategies send withdrawals here.
    pub address: Address,
    /// Address of the unit token.
    pub unit_token: Address,
    pub governor: Address,
    pub config: VaultConfig,
    pub oracle: Box<dyn PriceOracle>,
    pub bank: Box<dyn AssetBank>,
}

#[derive(Debug)]
pub struct Vault {
    address: Address,
    unit_token: Address,
    ledger: UnitLedger,
    access: AccessControl,
    config: VaultConfig,
    assets: Vec<AssetConfig>,
    primary_stable: Option<Address>,
    /// Approved strategies, in approval order.
    strategies: Vec<StrategySlot>,
    weights: Vec<StrategyWeight>,
    quick_deposit: Vec<Address>,
    idle: BTreeMap<Address, u128>,
    capital_paused: bool,
    rebase_paused: bool,
    next_payout_time: u64,
    guard: ReentrancyGuard,
    oracle: Box<dyn PriceOracle>,
    bank: Box<dyn AssetBank>,
}

impl Vault {
    /// An empty vault. Fails if the configuration is out of range.
    pub fn new(params: VaultParams) -> Result<Self, VaultError> {
        params.config.validate()?;
        tracing::info!(vault = %params.address, governor = %params.governor, "vault created");
        Ok(Self {
            address: params.address,
            unit_token: params.unit_token,
            ledger: UnitLedger::new(),
            access: AccessControl::new(params.governor),
            config: params.config,
            assets: Vec::new(),
            primary_stable: None,
            strategies: Vec::new(),
            weights: Vec::new(),
            quick_deposit: Vec::new(),
            idle: BTreeMap::new(),
            capital_paused: false,
            rebase_paused: false,
            next_payout_time: 0,
            guard: ReentrancyGuard::new(),
            oracle: params.oracle,
            bank: params.bank,
        })
    }

    // -- Reads --------------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn unit_token(&self) -> Address {
        self.unit_token
    }

    pub fn ledger(&self) -> &UnitLedger {
        &self.ledger
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn assets(&self) -> &[AssetConfig] {
        &self.assets
    }

    pub fn asset_config(&self, asset: &Address) -> Option<&AssetConfig> {
        self.assets.iter().find(|a| a.asset == *asset)
    }

    pub fn is_supported(&self, asset: &Address) -> bool {
        self.asset_config(asset).is_some()
    }

    pub fn primary_stable(&self) -> Option<Address> {
        self.primary_stable
    }

    /// Approved strategy addresses, in approval order.
    pub fn strategy_addresses(&self) -> Vec<Address> {
        self.strategies.iter().map(|s| s.address).collect()
    }

    pub fn is_approved(&self, strategy: &Address) -> bool {
        self.strategies.iter().any(|s| s.address == *strategy)
    }

    pub fn strategy(&self, strategy: &Address) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|s| s.address == *strategy)
            .map(|s| s.strategy.as_ref())
    }

    pub(crate) fn strategy_mut(&mut self, strategy: &Address) -> Option<&mut (dyn Strategy + 'static)> {
        self.strategies
            .iter_mut()
            .find(|s| s.address == *strategy)
            .map(|s| s.strategy.as_mut())
    }

    pub fn weights(&self) -> &[StrategyWeight] {
        &self.weights
    }

    pub fn weight_of(&self, strategy: &Address) -> Option<&StrategyWeight> {
        self.weights.iter().find(|w| w.strategy == *strategy)
    }

    pub fn quick_deposit_strategies(&self) -> &[Address] {
        &self.quick_deposit
    }

    /// Raw units of `asset` held by the vault itself.
    pub fn idle_balance(&self, asset: &Address) -> u128 {
        self.idle.get(asset).copied().unwrap_or(0)
    }

    pub fn capital_paused(&self) -> bool {
        self.capital_paused
    }

    pub fn rebase_paused(&self) -> bool {
        self.rebase_paused
    }

    pub fn next_payout_time(&self) -> u64 {
        self.next_payout_time
    }

    /// A serializable picture of the vault.
    pub fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        let strategies = self
            .strategies
            .iter()
            .map(|slot| StrategySnapshot {
                address: slot.address,
                name: slot.strategy.name().to_string(),
                check_balance: slot.strategy.check_balance(),
                net_asset_value: slot.strategy.net_asset_value(),
                weight: self.weight_of(&slot.address).copied(),
            })
            .collect();
        Ok(VaultSnapshot {
            total_supply: self.ledger.total_supply(),
            total_value: self.total_value()?,
            non_rebasing_supply: self.ledger.non_rebasing_supply(),
            rebasing_credits_per_token: self.ledger.rebasing_credits_per_token(),
            idle: self
                .assets
                .iter()
                .map(|a| (a.asset, self.idle_balance(&a.asset)))
                .collect(),
            strategies,
            capital_paused: self.capital_paused,
            rebase_paused: self.rebase_paused,
            next_payout_time: self.next_payout_time,
        })
    }

    // -- Internals ----------------------------------------------------------

    /// Runs `f` under the reentrancy guard.
    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, VaultError>,
    ) -> Result<T, VaultError> {
        self.guard.enter()?;
        let result = f(self);
        self.guard.exit();
        result
    }

    fn require_asset(&self, asset: &Address) -> Result<&AssetConfig, VaultError> {
        self.asset_config(asset)
            .ok_or(VaultError::AssetNotSupported(*asset))
    }

    fn require_strategy(&self, strategy: &Address) -> Result<(), VaultError> {
        if self.is_approved(strategy) {
            Ok(())
        } else {
            Err(VaultError::StrategyNotApproved(*strategy))
        }
    }

    fn credit_idle(&mut self, asset: &Address, amount: u128) -> Result<(), VaultError> {
        let entry = self.idle.entry(*asset).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(cash_protocol::math::MathError::Overflow)?;
        Ok(())
    }

    fn debit_idle(&mut self, asset: &Address, amount: u128) -> Result<(), VaultError> {
        let available = self.idle_balance(asset);
        if available < amount {
            return Err(VaultError::InsufficientLiquidity {
                asset: *asset,
                available,
                requested: amount,
            });
        }
        self.idle.insert(*asset, available - amount);
        Ok(())
    }

    /// Position of a strategy in approval order.
    fn registration_index(&self, strategy: &Address) -> usize {
        self.strategies
            .iter()
            .position(|s| s.address == *strategy)
            .unwrap_or(usize::MAX)
    }
}

// ---------------------------------------------------------------------------
// Test Fixtures
// ---------------------------------------------------------------------------

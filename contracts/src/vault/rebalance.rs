//! The weight table and rebalancing toward it.
//!
//! A rebalance is planned in full before any funds move. Strategies are
//! classified by where they sit relative to their bounds and handled in
//! class order: everything over its maximum is withdrawn first, then
//! everything over target, then strategies under their minimum are filled,
//! then those under target. Withdrawals always run before deposits so
//! deposits can use what was freed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use cash_protocol::config::{TieBreak, BPS_DENOMINATOR};
use cash_protocol::external::Strategy;
use cash_protocol::math;
use cash_protocol::Address;

use super::{RebalanceReport, StrategyWeight, Vault, VaultError, WithdrawReport};

/// Priority class of a planned move. Lower classes run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceClass {
    OverMax,
    OverTarget,
    UnderMin,
    UnderTarget,
}

impl RebalanceClass {
    pub fn is_withdrawal(self) -> bool {
        matches!(self, RebalanceClass::OverMax | RebalanceClass::OverTarget)
    }
}

/// One step of a rebalance plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub strategy: Address,
    pub class: RebalanceClass,
    /// Strategy value before the move, 18 decimals.
    pub current: u128,
    /// Target value, 18 decimals.
    pub target: u128,
    /// Value to move toward target, 18 decimals.
    pub amount: u128,
}

impl Vault {
    /// Replaces the weight table and rebalances toward it.
    ///
    /// Strategies missing from the new table are drained but stay approved.
    pub fn set_strategy_with_weights(
        &mut self,
        caller: &Address,
        weights: Vec<StrategyWeight>,
    ) -> Result<RebalanceReport, VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.validate_weights(&weights)?;
        self.guarded(|vault| {
            let value_before = vault.total_value()?;
            let keep: BTreeSet<Address> = weights.iter().map(|w| w.strategy).collect();
            let dropped: Vec<Address> = vault
                .weights
                .iter()
                .map(|w| w.strategy)
                .filter(|s| !keep.contains(s))
                .collect();
            vault.weights = weights;
            info!(strategies = vault.weights.len(), dropped = dropped.len(), "weight table updated");

            let mut drained = WithdrawReport::default();
            for strategy in &dropped {
                drained.merge(vault.drain_strategy(strategy)?);
            }
            vault.rebalance_with(value_before, drained)
        })
    }

    /// Rebalances toward the current weight table.
    pub fn balance(&mut self, caller: &Address) -> Result<RebalanceReport, VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.guarded(|vault| {
            let value_before = vault.total_value()?;
            vault.rebalance_with(value_before, WithdrawReport::default())
        })
    }

    fn validate_weights(&self, weights: &[StrategyWeight]) -> Result<(), VaultError> {
        let mut seen = BTreeSet::new();
        let mut total = 0u128;
        for weight in weights {
            self.require_strategy(&weight.strategy)?;
            if !seen.insert(weight.strategy) {
                return Err(VaultError::DuplicateWeight(weight.strategy));
            }
            let ordered = weight.min_weight <= weight.target_weight
                && weight.target_weight <= weight.max_weight
                && weight.max_weight as u128 <= BPS_DENOMINATOR;
            if !ordered {
                return Err(VaultError::InvalidWeightBounds {
                    strategy: weight.strategy,
                });
            }
            if weight.enabled {
                total += weight.target_weight as u128;
            }
        }
        if total > BPS_DENOMINATOR {
            return Err(VaultError::WeightSumExceeded { total });
        }
        Ok(())
    }

    /// The moves a rebalance would make right now, in execution order.
    pub fn plan_rebalance(&self) -> Result<Vec<PlannedMove>, VaultError> {
        if self.weights.is_empty() {
            return Ok(Vec::new());
        }
        let total_value = self.total_value()?;
        let share = |bps: u16| math::mul_div(total_value, bps as u128, BPS_DENOMINATOR);

        let mut plan = Vec::new();
        for slot in &self.strategies {
            let current = slot.strategy.check_balance();
            let (min, target, max) = match self.weight_of(&slot.address) {
                Some(w) if w.enabled => (share(w.min_weight)?, share(w.target_weight)?, share(w.max_weight)?),
                _ => (0, 0, 0),
            };
            let class = if current > max {
                RebalanceClass::OverMax
            } else if current > target {
                RebalanceClass::OverTarget
            } else if current < min {
                RebalanceClass::UnderMin
            } else if current < target {
                RebalanceClass::UnderTarget
            } else {
                continue;
            };
            plan.push(PlannedMove {
                strategy: slot.address,
                class,
                current,
                target,
                amount: current.abs_diff(target),
            });
        }

        // Stable sorts keep approval order among equals.
        match self.config.tie_break {
            TieBreak::RegistrationOrder => plan.sort_by_key(|m| m.class),
            TieBreak::LargestDeviationFirst => {
                plan.sort_by(|a, b| a.class.cmp(&b.class).then(b.amount.cmp(&a.amount)))
            }
        }
        Ok(plan)
    }

    fn rebalance_with(
        &mut self,
        value_before: u128,
        drained: WithdrawReport,
    ) -> Result<RebalanceReport, VaultError> {
        let plan = self.plan_rebalance()?;
        let mut report = RebalanceReport {
            value_before,
            ..RebalanceReport::default()
        };
        for leg in &drained.withdrawals {
            let value = self.leg_value(&leg.asset, leg.amount)?;
            report.total_withdrawn = report.total_withdrawn.saturating_add(value);
        }
        report.withdrawals = drained.withdrawals;
        report.failures = drained.failures;

        for planned in plan.iter().filter(|m| m.class.is_withdrawal()) {
            let withdrawn = self.withdraw_value(&planned.strategy, planned.amount, &mut report)?;
            report.total_withdrawn = report.total_withdrawn.saturating_add(withdrawn);
        }

        let total_value = self.total_value()?;
        let reserve = math::wad_mul(total_value, self.config.vault_buffer)?;
        let mut usable = self.idle_value()?.saturating_sub(reserve);
        for planned in plan.iter().filter(|m| !m.class.is_withdrawal()) {
            if usable == 0 {
                debug!(strategy = %planned.strategy, "no idle value left for rebalance deposit");
                break;
            }
            let wanted = planned.amount.min(usable);
            let deposited = self.deposit_value(&planned.strategy, wanted, &mut report)?;
            usable = usable.saturating_sub(deposited);
            report.total_deposited = report.total_deposited.saturating_add(deposited);
        }

        report.idle_used = report.total_deposited.saturating_sub(report.total_withdrawn);
        report.value_after = self.total_value()?;
        report.slippage = report.value_before.saturating_sub(report.value_after);
        report.plan = plan;
        info!(
            moves = report.plan.len(),
            withdrawn = report.total_withdrawn,
            deposited = report.total_deposited,
            failures = report.failures.len(),
            slippage = report.slippage,
            "rebalance complete"
        );
        Ok(report)
    }

    /// Withdraws up to `value` from a strategy, asset by asset in vault
    /// order. Returns the value actually withdrawn.
    fn withdraw_value(
        &mut self,
        strategy: &Address,
        value: u128,
        report: &mut RebalanceReport,
    ) -> Result<u128, VaultError> {
        let mut remaining = value;
        let assets: Vec<(Address, u8)> = self.assets.iter().map(|a| (a.asset, a.decimals)).collect();
        for (asset, decimals) in assets {
            if remaining == 0 {
                break;
            }
            let held = self.strategy(strategy).map_or(0, |s| s.asset_balance(&asset));
            let held_value = math::to_units(held, decimals)?;
            if held_value == 0 {
                continue;
            }
            let amount = if held_value <= remaining {
                held
            } else {
                math::from_units(remaining, decimals)?
            };
            if amount == 0 {
                continue;
            }
            match self.withdraw_leg(strategy, &asset, amount)? {
                Ok(leg) => {
                    remaining = remaining.saturating_sub(math::to_units(leg.amount, decimals)?);
                    report.withdrawals.push(leg);
                }
                Err(failure) => report.failures.push(failure),
            }
        }
        Ok(value - remaining)
    }

    /// Deposits up to `value` of idle funds the strategy accepts. Returns
    /// the value actually deposited.
    fn deposit_value(
        &mut self,
        strategy: &Address,
        value: u128,
        report: &mut RebalanceReport,
    ) -> Result<u128, VaultError> {
        let mut remaining = value;
        let assets: Vec<(Address, u8)> = self
            .assets
            .iter()
            .filter(|a| {
                self.strategy(strategy)
                    .is_some_and(|s| s.supports_asset(&a.asset))
            })
            .map(|a| (a.asset, a.decimals))
            .collect();
        for (asset, decimals) in assets {
            if remaining == 0 {
                break;
            }
            let idle = self.idle_balance(&asset);
            let idle_value = math::to_units(idle, decimals)?;
            if idle_value == 0 {
                continue;
            }
            let amount = if idle_value <= remaining {
                idle
            } else {
                math::from_units(remaining, decimals)?
            };
            if amount == 0 {
                continue;
            }
            match self.deposit_leg(strategy, &asset, amount)? {
                Ok(leg) => {
                    remaining = remaining.saturating_sub(math::to_units(leg.amount, decimals)?);
                    report.deposits.push(leg);
                }
                Err(failure) => report.failures.push(failure),
            }
        }
        Ok(value - remaining)
    }

    /// Value of a leg. Assets the vault does not support count as zero.
    fn leg_value(&self, asset: &Address, amount: u128) -> Result<u128, VaultError> {
        match self.asset_config(asset) {
            Some(config) => Ok(math::to_units(amount, config.decimals)?),
            None => Ok(0),
        }
    }
}

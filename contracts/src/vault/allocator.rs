//! Moving funds between the vault and its strategies.
//!
//! Every leg here is value-neutral: funds change custody, the pool's total
//! value does not. A strategy that refuses a leg leaves the funds where
//! they were and the batch carries on with the next leg.

use tracing::{debug, info, warn};

use cash_protocol::config::{BPS_DENOMINATOR, WAD};
use cash_protocol::external::{Strategy, StrategyError};
use cash_protocol::math::{self, MathError};
use cash_protocol::Address;

use super::{AllocationLeg, AllocationReport, LegFailure, Vault, VaultError, WithdrawReport};

impl Vault {
    // -- Allocate -----------------------------------------------------------

    /// Routes idle funds above the vault buffer into strategies.
    pub fn allocate(&mut self) -> Result<AllocationReport, VaultError> {
        self.guarded(|vault| {
            if vault.capital_paused {
                return Err(VaultError::CapitalPaused);
            }
            vault.allocate_idle()
        })
    }

    pub(super) fn allocate_idle(&mut self) -> Result<AllocationReport, VaultError> {
        let mut report = AllocationReport::default();
        let vault_value = self.idle_value()?;
        if vault_value == 0 {
            return Ok(report);
        }
        let strategies_value = self.strategies_value()?;
        let total_value = vault_value
            .checked_add(strategies_value)
            .ok_or(MathError::Overflow)?;

        // Fraction of each idle balance that may leave the vault.
        let buffer = self.config.vault_buffer;
        let movable = if strategies_value == 0 {
            WAD - buffer
        } else {
            let reserved = math::mul_div(buffer, total_value, vault_value)?;
            if reserved >= WAD {
                debug!(vault_value, total_value, "vault buffer not yet filled");
                return Ok(report);
            }
            WAD - reserved
        };
        if movable == 0 {
            return Ok(report);
        }

        let assets: Vec<(Address, u8)> = self.assets.iter().map(|a| (a.asset, a.decimals)).collect();
        for (asset, decimals) in assets {
            let amount = math::wad_mul(self.idle_balance(&asset), movable)?;
            if amount == 0 {
                continue;
            }
            match self.allocation_target(&asset, decimals, amount, total_value)? {
                Some((strategy, capped)) => {
                    match self.deposit_leg(&strategy, &asset, capped)? {
                        Ok(leg) => report.deposits.push(leg),
                        Err(failure) => report.failures.push(failure),
                    }
                }
                None => debug!(asset = %asset, amount, "no strategy can take asset"),
            }
        }
        Ok(report)
    }

    /// Where `amount` of `asset` should go, capped by weight headroom.
    ///
    /// The asset's default strategy wins when it can take the whole amount.
    /// Otherwise the enabled strategy with the most headroom takes what fits.
    fn allocation_target(
        &self,
        asset: &Address,
        decimals: u8,
        amount: u128,
        total_value: u128,
    ) -> Result<Option<(Address, u128)>, VaultError> {
        let value = math::to_units(amount, decimals)?;

        if let Some(default) = self.asset_config(asset).and_then(|a| a.default_strategy) {
            match self.headroom(&default, total_value)? {
                None => return Ok(Some((default, amount))),
                Some(room) if room >= value => return Ok(Some((default, amount))),
                Some(_) => {}
            }
        }

        let mut best: Option<(Address, u128)> = None;
        for slot in &self.strategies {
            if !slot.strategy.supports_asset(asset) {
                continue;
            }
            let Some(room) = self.headroom(&slot.address, total_value)? else {
                continue;
            };
            if best.map_or(true, |(_, best_room)| room > best_room) {
                best = Some((slot.address, room));
            }
        }

        match best {
            Some((strategy, room)) if room > 0 => {
                let capped = if room >= value {
                    amount
                } else {
                    math::from_units(room, decimals)?
                };
                Ok((capped > 0).then_some((strategy, capped)))
            }
            _ => Ok(None),
        }
    }

    /// Value a strategy can still take before reaching its max weight.
    /// `None` means no weight table is configured and there is no cap.
    fn headroom(&self, strategy: &Address, total_value: u128) -> Result<Option<u128>, VaultError> {
        if self.weights.is_empty() {
            return Ok(None);
        }
        let Some(weight) = self.weight_of(strategy).filter(|w| w.enabled) else {
            return Ok(Some(0));
        };
        let current = self.strategy(strategy).map_or(0, |s| s.check_balance());
        let cap = math::mul_div(total_value, weight.max_weight as u128, BPS_DENOMINATOR)?;
        Ok(Some(cap.saturating_sub(current)))
    }

    // -- Quick Deposit ------------------------------------------------------

    /// Sends `amount` of idle `asset` straight to the quick-deposit strategy
    /// furthest below its target weight.
    pub fn quick_allocate(
        &mut self,
        caller: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<AllocationReport, VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.guarded(|vault| {
            if vault.capital_paused {
                return Err(VaultError::CapitalPaused);
            }
            vault.quick_allocate_inner(asset, amount)
        })
    }

    pub(super) fn quick_allocate_inner(
        &mut self,
        asset: &Address,
        amount: u128,
    ) -> Result<AllocationReport, VaultError> {
        let mut report = AllocationReport::default();
        self.require_asset(asset)?;
        let amount = amount.min(self.idle_balance(asset));
        if amount == 0 {
            return Ok(report);
        }
        let total_value = self.total_value()?;

        let mut chosen: Option<(Address, u128)> = None;
        for slot in &self.strategies {
            if !self.quick_deposit.contains(&slot.address) || !slot.strategy.supports_asset(asset) {
                continue;
            }
            let target_bps = self
                .weight_of(&slot.address)
                .filter(|w| w.enabled)
                .map_or(0, |w| w.target_weight as u128);
            let target = math::mul_div(total_value, target_bps, BPS_DENOMINATOR)?;
            let deficit = target.saturating_sub(slot.strategy.check_balance());
            if chosen.map_or(true, |(_, best)| deficit > best) {
                chosen = Some((slot.address, deficit));
            }
        }

        let Some((strategy, _)) = chosen else {
            debug!(asset = %asset, "no quick deposit strategy supports asset");
            return Ok(report);
        };
        match self.deposit_leg(&strategy, asset, amount)? {
            Ok(leg) => report.deposits.push(leg),
            Err(failure) => report.failures.push(failure),
        }
        Ok(report)
    }

    // -- Draining -----------------------------------------------------------

    /// Pulls everything out of one strategy.
    pub fn withdraw_all_from_strategy(
        &mut self,
        caller: &Address,
        strategy: &Address,
    ) -> Result<WithdrawReport, VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.require_strategy(strategy)?;
        self.guarded(|vault| vault.drain_strategy(strategy))
    }

    /// Pulls everything out of every strategy.
    pub fn withdraw_all_from_strategies(
        &mut self,
        caller: &Address,
    ) -> Result<WithdrawReport, VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.guarded(|vault| {
            let mut report = WithdrawReport::default();
            for strategy in vault.strategy_addresses() {
                report.merge(vault.drain_strategy(&strategy)?);
            }
            Ok(report)
        })
    }

    pub(super) fn drain_strategy(&mut self, strategy: &Address) -> Result<WithdrawReport, VaultError> {
        let recipient = self.address;
        let slot = self
            .strategy_mut(strategy)
            .ok_or(VaultError::StrategyNotApproved(*strategy))?;
        let drained = slot.withdraw_all(&recipient);

        let mut report = WithdrawReport::default();
        for (asset, amount) in drained.withdrawn {
            self.credit_idle(&asset, amount)?;
            report.withdrawals.push(AllocationLeg {
                strategy: *strategy,
                asset,
                amount,
            });
        }
        for (asset, err) in drained.failed {
            let stranded = self.strategy(strategy).map_or(0, |s| s.asset_balance(&asset));
            warn!(strategy = %strategy, asset = %asset, amount = stranded, error = %err, "strategy withdrawal failed");
            report.failures.push(LegFailure {
                strategy: *strategy,
                asset,
                amount: stranded,
                reason: err.to_string(),
            });
        }
        info!(
            strategy = %strategy,
            withdrawn = report.withdrawals.len(),
            failed = report.failures.len(),
            "strategy drained"
        );
        Ok(report)
    }

    // -- Liquidity ----------------------------------------------------------

    /// Makes sure at least `amount` of `asset` sits idle, pulling the
    /// shortfall from the strategies holding the most of it first.
    pub(super) fn source_liquidity(&mut self, asset: &Address, amount: u128) -> Result<(), VaultError> {
        let idle = self.idle_balance(asset);
        if idle >= amount {
            return Ok(());
        }
        let mut shortfall = amount - idle;

        let mut holders: Vec<(usize, Address, u128)> = self
            .strategies
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.strategy.supports_asset(asset))
            .map(|(index, slot)| (index, slot.address, slot.strategy.asset_balance(asset)))
            .filter(|(_, _, held)| *held > 0)
            .collect();
        holders.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        let recipient = self.address;
        for (_, strategy, held) in holders {
            if shortfall == 0 {
                break;
            }
            let take = held.min(shortfall);
            let result = match self.strategy_mut(&strategy) {
                Some(slot) => slot.withdraw(&recipient, asset, take),
                None => continue,
            };
            match result {
                Ok(delivered) => {
                    self.credit_idle(asset, delivered)?;
                    shortfall = shortfall.saturating_sub(delivered);
                    debug!(strategy = %strategy, asset = %asset, delivered, "sourced redemption liquidity");
                }
                Err(err) => {
                    warn!(strategy = %strategy, asset = %asset, take, error = %err, "strategy could not release liquidity");
                }
            }
        }

        if shortfall > 0 {
            return Err(VaultError::InsufficientLiquidity {
                asset: *asset,
                available: self.idle_balance(asset),
                requested: amount,
            });
        }
        Ok(())
    }

    // -- Legs ---------------------------------------------------------------

    /// Moves `amount` of idle `asset` into `strategy`. A strategy refusal is
    /// returned as the inner error with the funds back in idle.
    pub(super) fn deposit_leg(
        &mut self,
        strategy: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<Result<AllocationLeg, LegFailure>, VaultError> {
        self.debit_idle(asset, amount)?;
        let result = match self.strategy_mut(strategy) {
            Some(slot) => slot.deposit(asset, amount),
            None => Err(StrategyError::Unavailable {
                asset: *asset,
                reason: "strategy is not approved".into(),
            }),
        };
        match result {
            Ok(()) => {
                info!(strategy = %strategy, asset = %asset, amount, "allocated to strategy");
                Ok(Ok(AllocationLeg {
                    strategy: *strategy,
                    asset: *asset,
                    amount,
                }))
            }
            Err(err) => {
                self.credit_idle(asset, amount)?;
                warn!(strategy = %strategy, asset = %asset, amount, error = %err, "strategy deposit failed");
                Ok(Err(LegFailure {
                    strategy: *strategy,
                    asset: *asset,
                    amount,
                    reason: err.to_string(),
                }))
            }
        }
    }

    /// Pulls `amount` of `asset` from `strategy` into idle.
    pub(super) fn withdraw_leg(
        &mut self,
        strategy: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<Result<AllocationLeg, LegFailure>, VaultError> {
        let recipient = self.address;
        let result = match self.strategy_mut(strategy) {
            Some(slot) => slot.withdraw(&recipient, asset, amount),
            None => Err(StrategyError::Unavailable {
                asset: *asset,
                reason: "strategy is not approved".into(),
            }),
        };
        match result {
            Ok(delivered) => {
                self.credit_idle(asset, delivered)?;
                info!(strategy = %strategy, asset = %asset, delivered, "withdrew from strategy");
                Ok(Ok(AllocationLeg {
                    strategy: *strategy,
                    asset: *asset,
                    amount: delivered,
                }))
            }
            Err(err) => {
                warn!(strategy = %strategy, asset = %asset, amount, error = %err, "strategy withdrawal failed");
                Ok(Err(LegFailure {
                    strategy: *strategy,
                    asset: *asset,
                    amount,
                    reason: err.to_string(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::StrategyWeight;
    use super::*;
    use cash_protocol::config::{VaultConfig, UNIT};
    use cash_protocol::external::AssetBank;

    #[test]
    fn allocate_keeps_the_buffer_idle() {
        let mut h = harness(VaultConfig {
            vault_buffer: WAD / 10,
            ..VaultConfig::default()
        });
        let (s1, hold) = add_strategy(&mut h.vault, "s1");
        h.vault
            .set_asset_default_strategy(&governor(), usdc(), Some(s1))
            .unwrap();
        mint(&mut h, &addr("anna"), usdc(), 100 * USDC);

        let report = h.vault.allocate().unwrap();
        assert_eq!(report.deposits.len(), 1);
        assert_eq!(hold.asset_balance(&usdc()), 90 * USDC);
        assert_eq!(h.vault.idle_balance(&usdc()), 10 * USDC);
        assert_eq!(h.vault.total_value().unwrap(), 100 * UNIT);

        // Buffer exactly filled: nothing more moves.
        let again = h.vault.allocate().unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn allocation_respects_max_weight() {
        let mut h = harness(VaultConfig::default());
        let (s1, hold1) = add_strategy(&mut h.vault, "s1");
        let (s2, hold2) = add_strategy(&mut h.vault, "s2");
        h.vault
            .set_strategy_with_weights(
                &governor(),
                vec![
                    StrategyWeight::new(s1, 0, 5_000, 6_000),
                    StrategyWeight::new(s2, 0, 4_000, 4_000),
                ],
            )
            .unwrap();
        h.vault
            .set_asset_default_strategy(&governor(), usdc(), Some(s1))
            .unwrap();
        mint(&mut h, &addr("anna"), usdc(), 100 * USDC);

        h.vault.allocate().unwrap();
        // Default cannot take it all, so the strategy with most room takes its cap.
        assert_eq!(hold1.asset_balance(&usdc()), 60 * USDC);
        assert_eq!(hold2.asset_balance(&usdc()), 0);
        h.vault.allocate().unwrap();
        assert_eq!(hold2.asset_balance(&usdc()), 40 * USDC);
        assert_eq!(h.vault.idle_balance(&usdc()), 0);
    }

    #[test]
    fn failed_deposit_leaves_funds_idle() {
        let mut h = harness(VaultConfig::default());
        let (s1, hold) = add_strategy(&mut h.vault, "s1");
        h.vault
            .set_asset_default_strategy(&governor(), usdc(), Some(s1))
            .unwrap();
        mint(&mut h, &addr("anna"), usdc(), 50 * USDC);
        hold.set_failing(usdc(), true);

        let report = h.vault.allocate().unwrap();
        assert!(report.deposits.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(h.vault.idle_balance(&usdc()), 50 * USDC);
    }

    #[test]
    fn mint_triggers_auto_allocation_at_threshold() {
        let mut h = harness(VaultConfig {
            auto_allocate_threshold: 25 * UNIT,
            ..VaultConfig::default()
        });
        let (s1, hold) = add_strategy(&mut h.vault, "s1");
        h.vault
            .set_asset_default_strategy(&governor(), dai(), Some(s1))
            .unwrap();

        let small = mint(&mut h, &addr("anna"), dai(), 10 * DAI);
        assert!(small.allocation.is_none());
        let large = mint(&mut h, &addr("anna"), dai(), 20 * DAI);
        assert_eq!(large.allocation.map(|r| r.deposits.len()), Some(1));
        assert_eq!(hold.asset_balance(&dai()), 30 * DAI);
    }

    #[test]
    fn quick_deposit_picks_the_largest_deficit() {
        let mut h = harness(VaultConfig::default());
        let (s1, hold1) = add_strategy(&mut h.vault, "s1");
        let (s2, hold2) = add_strategy(&mut h.vault, "s2");
        h.vault
            .set_strategy_with_weights(
                &governor(),
                vec![
                    StrategyWeight::new(s1, 0, 3_000, 10_000),
                    StrategyWeight::new(s2, 0, 7_000, 10_000),
                ],
            )
            .unwrap();
        h.vault
            .set_quick_deposit_strategies(&governor(), vec![s1, s2])
            .unwrap();

        mint(&mut h, &addr("anna"), usdc(), 100 * USDC);
        assert_eq!(hold2.asset_balance(&usdc()), 100 * USDC);
        assert_eq!(hold1.asset_balance(&usdc()), 0);

        // s2 is now over target, s1 has the deficit.
        mint(&mut h, &addr("anna"), usdc(), 10 * USDC);
        assert_eq!(hold1.asset_balance(&usdc()), 10 * USDC);
    }

    #[test]
    fn draining_reports_stuck_assets() {
        let mut h = harness(VaultConfig::default());
        let (s1, hold) = add_strategy(&mut h.vault, "s1");
        h.vault
            .set_asset_default_strategy(&governor(), usdc(), Some(s1))
            .unwrap();
        h.vault
            .set_asset_default_strategy(&governor(), dai(), Some(s1))
            .unwrap();
        mint(&mut h, &addr("anna"), usdc(), 10 * USDC);
        mint(&mut h, &addr("anna"), dai(), 10 * DAI);
        h.vault.allocate().unwrap();
        hold.set_failing(dai(), true);

        let report = h.vault.withdraw_all_from_strategy(&strategist(), &s1).unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.withdrawals.len(), 1);
        assert_eq!(report.failures[0].asset, dai());
        assert_eq!(report.failures[0].amount, 10 * DAI);
        assert_eq!(h.vault.idle_balance(&usdc()), 10 * USDC);
        assert_eq!(h.vault.total_value().unwrap(), 20 * UNIT);
    }

    #[test]
    fn draining_requires_a_role() {
        let mut h = harness(VaultConfig::default());
        let err = h.vault.withdraw_all_from_strategies(&addr("anna")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AccessDenied);
    }

    #[test]
    fn redemption_liquidity_comes_from_the_largest_holder() {
        let mut h = harness(VaultConfig::default());
        let (s1, hold1) = add_strategy(&mut h.vault, "s1");
        let (s2, hold2) = add_strategy(&mut h.vault, "s2");
        let anna = addr("anna");
        mint(&mut h, &anna, usdc(), 100 * USDC);
        h.vault
            .set_asset_default_strategy(&governor(), usdc(), Some(s1))
            .unwrap();
        h.vault.allocate().unwrap();
        h.vault.withdraw_leg(&s1, &usdc(), 30 * USDC).unwrap().unwrap();
        h.vault.deposit_leg(&s2, &usdc(), 30 * USDC).unwrap().unwrap();

        h.vault.redeem(&anna, 50 * UNIT, 0).unwrap();
        assert_eq!(hold1.asset_balance(&usdc()), 20 * USDC);
        assert_eq!(hold2.asset_balance(&usdc()), 30 * USDC);
        assert_eq!(h.bank.balance_of(&anna, &usdc()), 50 * USDC);
    }

    #[test]
    fn unsourceable_redemption_is_refused_intact() {
        let mut h = harness(VaultConfig::default());
        let (s1, hold) = add_strategy(&mut h.vault, "s1");
        let anna = addr("anna");
        mint(&mut h, &anna, usdc(), 100 * USDC);
        h.vault
            .set_asset_default_strategy(&governor(), usdc(), Some(s1))
            .unwrap();
        h.vault.allocate().unwrap();
        hold.set_failing(usdc(), true);

        let err = h.vault.redeem(&anna, 10 * UNIT, 0).unwrap_err();
        assert!(matches!(err, VaultError::InsufficientLiquidity { .. }));
        assert_eq!(h.vault.ledger().balance_of(&anna), 100 * UNIT);
    }
}

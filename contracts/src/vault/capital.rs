//! Mint, redeem, valuation and rebase.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cash_protocol::config::{RedeemMode, MAX_SUPPLY, PRICE_ONE};
use cash_protocol::external::{AssetBank, PriceOracle, Strategy};
use cash_protocol::ledger::{LedgerError, RebaseOutcome};
use cash_protocol::math::{self, MathError};
use cash_protocol::Address;

use super::{MintReceipt, RedeemReceipt, Vault, VaultError};

/// What a redemption of `units` would pay, computed without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemQuote {
    pub units: u128,
    /// Units withheld as the redeem fee.
    pub fee: u128,
    /// Total supply at the time of the quote.
    pub total_supply: u128,
    /// `(asset, raw amount)` per paying asset.
    pub outputs: Vec<(Address, u128)>,
    /// Sum of the outputs normalized to 18 decimals.
    pub output_value: u128,
}

impl Vault {
    // -- Valuation ----------------------------------------------------------

    /// Idle balances plus every strategy's reported balance, at par, in
    /// 18-decimal units. Never mutates.
    pub fn total_value(&self) -> Result<u128, VaultError> {
        Ok(self
            .idle_value()?
            .checked_add(self.strategies_value()?)
            .ok_or(MathError::Overflow)?)
    }

    /// Alias of [`total_value`](Self::total_value).
    pub fn check_balance(&self) -> Result<u128, VaultError> {
        self.total_value()
    }

    /// Raw units of `asset` held by the vault and all strategies.
    pub fn check_balance_of(&self, asset: &Address) -> Result<u128, VaultError> {
        self.require_asset(asset)?;
        let mut total = self.idle_balance(asset);
        for slot in &self.strategies {
            if slot.strategy.supports_asset(asset) {
                total = total
                    .checked_add(slot.strategy.asset_balance(asset))
                    .ok_or(MathError::Overflow)?;
            }
        }
        Ok(total)
    }

    pub(super) fn idle_value(&self) -> Result<u128, VaultError> {
        self.idle_value_with(&[])
    }

    /// Idle value as if `incoming` `(asset, raw amount)` had already landed.
    fn idle_value_with(&self, incoming: &[(Address, u128)]) -> Result<u128, VaultError> {
        let mut total = 0u128;
        for asset in &self.assets {
            let mut balance = self.idle_balance(&asset.asset);
            for (_, amount) in incoming.iter().filter(|(a, _)| *a == asset.asset) {
                balance = balance.checked_add(*amount).ok_or(MathError::Overflow)?;
            }
            let normalized = math::to_units(balance, asset.decimals)?;
            total = total.checked_add(normalized).ok_or(MathError::Overflow)?;
        }
        Ok(total)
    }

    pub(super) fn strategies_value(&self) -> Result<u128, VaultError> {
        let mut total = 0u128;
        for slot in &self.strategies {
            total = total
                .checked_add(slot.strategy.check_balance())
                .ok_or(MathError::Overflow)?;
        }
        Ok(total)
    }

    /// Price used to value a deposit: refused below the peg floor, capped
    /// at 1.00 above it.
    fn mint_price(&self, asset: &Address) -> Result<u128, VaultError> {
        let price = self.oracle.price(asset)?;
        let floor = self.config.peg_floor();
        if price < floor {
            return Err(VaultError::BelowPeg {
                asset: *asset,
                price,
                floor,
            });
        }
        Ok(price.min(PRICE_ONE))
    }

    /// Price used to value a primary-stable payout: never below 1.00.
    fn redeem_price(&self, asset: &Address) -> Result<u128, VaultError> {
        Ok(self.oracle.price(asset)?.max(PRICE_ONE))
    }

    // -- Mint ---------------------------------------------------------------

    /// Deposits `amount` of `asset` from `caller` and credits them units.
    ///
    /// The mint fee stays in the vault as surplus for the next rebase. If
    /// the token transfer fails, nothing changes.
    pub fn mint(
        &mut self,
        caller: &Address,
        asset: &Address,
        amount: u128,
        min_units_out: u128,
    ) -> Result<MintReceipt, VaultError> {
        self.guarded(|vault| vault.mint_inner(caller, asset, amount, min_units_out))
    }

    fn mint_inner(
        &mut self,
        caller: &Address,
        asset: &Address,
        amount: u128,
        min_units_out: u128,
    ) -> Result<MintReceipt, VaultError> {
        if self.capital_paused {
            return Err(VaultError::CapitalPaused);
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if caller.is_zero() {
            return Err(LedgerError::ZeroAddress.into());
        }
        let decimals = self.require_asset(asset)?.decimals;
        let price = self.mint_price(asset)?;

        let usd_value = math::mul_div(math::to_units(amount, decimals)?, price, PRICE_ONE)?;
        let fee = math::bps_of(usd_value, self.config.mint_fee_bps)?;
        let units = usd_value - fee;
        if units == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if units < min_units_out {
            return Err(VaultError::MintBelowMinimum {
                units,
                minimum: min_units_out,
            });
        }
        let fits = self
            .ledger
            .total_supply()
            .checked_add(units)
            .is_some_and(|total| total <= MAX_SUPPLY);
        if !fits {
            return Err(LedgerError::SupplyCapExceeded { requested: units }.into());
        }

        self.bank.pull(caller, asset, amount)?;
        self.credit_idle(asset, amount)?;
        self.ledger.mint(caller, units)?;
        info!(minter = %caller, asset = %asset, amount, units, fee, "minted");

        let allocation = self.route_after_mint(asset, amount);
        Ok(MintReceipt {
            units,
            fee,
            allocation,
        })
    }

    /// Sends fresh deposits on to strategies. Failures here never undo the
    /// mint.
    fn route_after_mint(&mut self, asset: &Address, amount: u128) -> Option<super::AllocationReport> {
        if !self.quick_deposit.is_empty() {
            return match self.quick_allocate_inner(asset, amount) {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(asset = %asset, error = %err, "quick allocation failed");
                    None
                }
            };
        }
        let threshold = self.config.auto_allocate_threshold;
        if threshold == 0 {
            return None;
        }
        match self.idle_value() {
            Ok(idle) if idle >= threshold => match self.allocate_idle() {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(error = %err, "auto allocation failed");
                    None
                }
            },
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "could not value idle funds");
                None
            }
        }
    }

    /// Accepts a supported asset from anyone. The value is surplus until
    /// the next rebase distributes it.
    pub fn donate(&mut self, from: &Address, asset: &Address, amount: u128) -> Result<(), VaultError> {
        self.guarded(|vault| {
            if amount == 0 {
                return Err(VaultError::ZeroAmount);
            }
            vault.require_asset(asset)?;
            vault.bank.pull(from, asset, amount)?;
            vault.credit_idle(asset, amount)?;
            info!(from = %from, asset = %asset, amount, "donation received");
            Ok(())
        })
    }

    /// Credits yield released by the dripper.
    pub(crate) fn receive_yield(&mut self, asset: &Address, amount: u128) -> Result<(), VaultError> {
        self.require_asset(asset)?;
        self.credit_idle(asset, amount)
    }

    // -- Redeem -------------------------------------------------------------

    /// The quote a redemption of `units` would execute at.
    pub fn preview_redeem(&self, units: u128) -> Result<RedeemQuote, VaultError> {
        let total_supply = self.ledger.total_supply();
        let fee = math::bps_of(units, self.config.redeem_fee_bps)?;
        let net = units - fee;

        let mut outputs = Vec::new();
        let mut output_value = 0u128;
        match self.config.redeem_mode {
            RedeemMode::PrimaryStable => {
                let primary = self.primary_stable.ok_or(VaultError::PrimaryStableNotSet)?;
                let decimals = self.require_asset(&primary)?.decimals;
                let price = self.redeem_price(&primary)?;
                let value = math::mul_div(net, PRICE_ONE, price)?;
                let amount = math::from_units(value, decimals)?;
                output_value = math::to_units(amount, decimals)?;
                outputs.push((primary, amount));
            }
            RedeemMode::Proportional => {
                let total_value = self.total_value()?;
                if total_value > 0 {
                    for asset in &self.assets {
                        let holdings = self.check_balance_of(&asset.asset)?;
                        let amount = math::mul_div(net, holdings, total_value)?;
                        output_value = output_value
                            .checked_add(math::to_units(amount, asset.decimals)?)
                            .ok_or(MathError::Overflow)?;
                        outputs.push((asset.asset, amount));
                    }
                }
            }
        }

        Ok(RedeemQuote {
            units,
            fee,
            total_supply,
            outputs,
            output_value,
        })
    }

    /// `(primary stable out, total supply, fee)` for redeeming `units`.
    pub fn redeem_outputs(&self, units: u128) -> Result<(u128, u128, u128), VaultError> {
        let quote = self.preview_redeem(units)?;
        let primary_out = self
            .primary_stable
            .and_then(|p| quote.outputs.iter().find(|(a, _)| *a == p))
            .map_or(0, |(_, amount)| *amount);
        Ok((primary_out, quote.total_supply, quote.fee))
    }

    /// Burns `units` from `caller` and pays out per the redeem mode.
    ///
    /// Liquidity pulled from strategies stays idle if a later step fails;
    /// moving funds between the vault and a strategy does not change value.
    pub fn redeem(
        &mut self,
        caller: &Address,
        units: u128,
        min_out: u128,
    ) -> Result<RedeemReceipt, VaultError> {
        self.guarded(|vault| vault.redeem_inner(caller, units, min_out))
    }

    fn redeem_inner(
        &mut self,
        caller: &Address,
        units: u128,
        min_out: u128,
    ) -> Result<RedeemReceipt, VaultError> {
        if self.capital_paused {
            return Err(VaultError::CapitalPaused);
        }
        if units == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let balance = self.ledger.balance_of(caller);
        if balance < units {
            return Err(LedgerError::InsufficientBalance {
                account: *caller,
                balance,
                requested: units,
            }
            .into());
        }
        self.check_backing()?;

        let quote = self.preview_redeem(units)?;
        if quote.output_value < min_out {
            return Err(VaultError::RedeemBelowMinimum {
                output: quote.output_value,
                minimum: min_out,
            });
        }

        for (asset, amount) in &quote.outputs {
            self.source_liquidity(asset, *amount)?;
        }

        let mut paid: Vec<(Address, u128)> = Vec::new();
        for (asset, amount) in &quote.outputs {
            if *amount == 0 {
                continue;
            }
            self.debit_idle(asset, *amount)?;
            if let Err(err) = self.bank.push(caller, asset, *amount) {
                self.credit_idle(asset, *amount)?;
                self.reclaim(caller, &paid);
                return Err(err.into());
            }
            paid.push((*asset, *amount));
        }

        self.ledger.burn(caller, units)?;
        info!(redeemer = %caller, units, fee = quote.fee, legs = paid.len(), "redeemed");
        Ok(RedeemReceipt {
            burned: units,
            fee: quote.fee,
            outputs: paid,
        })
    }

    /// Pulls back legs already paid to a redeemer whose redemption failed.
    fn reclaim(&mut self, redeemer: &Address, paid: &[(Address, u128)]) {
        for (asset, amount) in paid {
            match self.bank.pull(redeemer, asset, *amount) {
                Ok(()) => {
                    if let Err(err) = self.credit_idle(asset, *amount) {
                        warn!(asset = %asset, error = %err, "reclaimed funds not credited");
                    }
                }
                Err(err) => {
                    warn!(redeemer = %redeemer, asset = %asset, amount, error = %err, "could not reclaim redeemed funds");
                }
            }
        }
    }

    /// Refuses redemptions while value and supply are too far apart.
    fn check_backing(&self) -> Result<(), VaultError> {
        let max = self.config.max_supply_diff;
        let total_supply = self.ledger.total_supply();
        if max == 0 || total_supply == 0 {
            return Ok(());
        }
        let total_value = self.total_value()?;
        let deviation = math::relative_deviation(total_value, total_supply)?;
        if deviation > max {
            return Err(VaultError::BackingDeviation {
                total_value,
                total_supply,
                deviation,
                max,
            });
        }
        Ok(())
    }

    // -- Rebase -------------------------------------------------------------

    /// Rebases the ledger toward the vault's total value. Governor or
    /// Rebase Manager only.
    pub fn rebase(&mut self, caller: &Address) -> Result<RebaseOutcome, VaultError> {
        self.access.require_rebase_caller(caller)?;
        if self.rebase_paused {
            return Err(VaultError::RebasingPaused);
        }
        self.guarded(|vault| {
            let total_value = vault.total_value()?;
            let outcome = vault
                .ledger
                .rebase(total_value, &vault.config.rebase_policy())?;
            if !outcome.is_applied() {
                tracing::debug!(?outcome, total_value, "rebase skipped");
            }
            Ok(outcome)
        })
    }

    /// The rebase that would follow crediting `incoming` as yield, run on
    /// a copy of the ledger. Nothing is moved or written.
    pub fn preview_rebase(&self, incoming: &[(Address, u128)]) -> Result<RebaseOutcome, VaultError> {
        if self.rebase_paused {
            return Err(VaultError::RebasingPaused);
        }
        for (asset, _) in incoming {
            self.require_asset(asset)?;
        }
        let total_value = self
            .idle_value_with(incoming)?
            .checked_add(self.strategies_value()?)
            .ok_or(MathError::Overflow)?;
        let mut ledger = self.ledger.clone();
        Ok(ledger.rebase(total_value, &self.config.rebase_policy())?)
    }
}

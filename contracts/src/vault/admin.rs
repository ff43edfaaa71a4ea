//! Governance surface: roles, asset and strategy registries, configuration
//! setters and pauses.

use tracing::info;

use cash_protocol::config::{RedeemMode, TieBreak, VaultConfig};
use cash_protocol::external::{AssetBank, Strategy};
use cash_protocol::Address;

use super::{AssetConfig, StrategySlot, Vault, VaultError};

impl Vault {
    // -- Roles --------------------------------------------------------------

    pub fn set_strategist(&mut self, caller: &Address, strategist: Option<Address>) -> Result<(), VaultError> {
        self.access.set_strategist(caller, strategist)?;
        info!(strategist = ?strategist, "strategist set");
        Ok(())
    }

    pub fn transfer_governance(&mut self, caller: &Address, new_governor: Address) -> Result<(), VaultError> {
        Ok(self.access.transfer_governance(caller, new_governor)?)
    }

    pub fn claim_governance(&mut self, caller: &Address) -> Result<(), VaultError> {
        Ok(self.access.claim_governance(caller)?)
    }

    pub fn add_rebase_manager(&mut self, caller: &Address, manager: Address) -> Result<(), VaultError> {
        self.access.add_rebase_manager(caller, manager)?;
        info!(manager = %manager, "rebase manager added");
        Ok(())
    }

    pub fn remove_rebase_manager(&mut self, caller: &Address, manager: &Address) -> Result<bool, VaultError> {
        Ok(self.access.remove_rebase_manager(caller, manager)?)
    }

    // -- Assets -------------------------------------------------------------

    /// Accepts a new asset for mint. The first asset supported becomes the
    /// primary stable.
    pub fn support_asset(&mut self, caller: &Address, asset: Address, decimals: u8) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        if self.is_supported(&asset) {
            return Err(VaultError::AssetAlreadySupported(asset));
        }
        self.assets.push(AssetConfig {
            asset,
            decimals,
            default_strategy: None,
        });
        if self.primary_stable.is_none() {
            self.primary_stable = Some(asset);
        }
        info!(asset = %asset, decimals, "asset supported");
        Ok(())
    }

    pub fn set_primary_stable(&mut self, caller: &Address, asset: Address) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.require_asset(&asset)?;
        self.primary_stable = Some(asset);
        info!(asset = %asset, "primary stable set");
        Ok(())
    }

    /// Sets or clears where `allocate` sends `asset` by default.
    pub fn set_asset_default_strategy(
        &mut self,
        caller: &Address,
        asset: Address,
        strategy: Option<Address>,
    ) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.require_asset(&asset)?;
        if let Some(address) = strategy {
            let supported = self
                .strategy(&address)
                .ok_or(VaultError::StrategyNotApproved(address))?
                .supports_asset(&asset);
            if !supported {
                return Err(VaultError::StrategyUnsupportedAsset {
                    strategy: address,
                    asset,
                });
            }
        }
        if let Some(config) = self.assets.iter_mut().find(|a| a.asset == asset) {
            config.default_strategy = strategy;
        }
        info!(asset = %asset, strategy = ?strategy, "default strategy set");
        Ok(())
    }

    /// Sends a stray, unsupported token held by the vault to the governor.
    pub fn transfer_token(&mut self, caller: &Address, asset: Address, amount: u128) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        if self.is_supported(&asset) {
            return Err(VaultError::CannotTransferSupportedAsset(asset));
        }
        let governor = self.access.governor();
        self.guarded(|vault| {
            vault.debit_idle(&asset, amount)?;
            if let Err(err) = vault.bank.push(&governor, &asset, amount) {
                vault.credit_idle(&asset, amount)?;
                return Err(err.into());
            }
            info!(asset = %asset, amount, "stray token recovered");
            Ok(())
        })
    }

    // -- Strategies ---------------------------------------------------------

    pub fn approve_strategy(
        &mut self,
        caller: &Address,
        address: Address,
        strategy: Box<dyn Strategy>,
    ) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        if self.is_approved(&address) {
            return Err(VaultError::StrategyAlreadyApproved(address));
        }
        info!(strategy = %address, name = strategy.name(), "strategy approved");
        self.strategies.push(StrategySlot { address, strategy });
        Ok(())
    }

    /// Drains a strategy and forgets it. Refused while the strategy is an
    /// asset's default or cannot be fully drained.
    pub fn remove_strategy(&mut self, caller: &Address, address: &Address) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.require_strategy(address)?;
        if let Some(config) = self.assets.iter().find(|a| a.default_strategy == Some(*address)) {
            return Err(VaultError::StrategyInUse {
                strategy: *address,
                asset: config.asset,
            });
        }
        self.guarded(|vault| {
            let report = vault.drain_strategy(address)?;
            if !report.is_complete() {
                return Err(VaultError::StrategyNotEmpty {
                    strategy: *address,
                    failed: report.failures.len(),
                });
            }
            vault.strategies.retain(|s| s.address != *address);
            vault.weights.retain(|w| w.strategy != *address);
            vault.quick_deposit.retain(|s| s != address);
            info!(strategy = %address, "strategy removed");
            Ok(())
        })
    }

    pub fn set_quick_deposit_strategies(
        &mut self,
        caller: &Address,
        strategies: Vec<Address>,
    ) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        for strategy in &strategies {
            self.require_strategy(strategy)?;
        }
        info!(count = strategies.len(), "quick deposit strategies set");
        self.quick_deposit = strategies;
        Ok(())
    }

    // -- Configuration ------------------------------------------------------

    /// Applies `change` to a copy of the config and keeps it only if the
    /// result validates.
    fn update_config(&mut self, change: impl FnOnce(&mut VaultConfig)) -> Result<(), VaultError> {
        let mut next = self.config.clone();
        change(&mut next);
        next.validate()?;
        self.config = next;
        Ok(())
    }

    pub fn set_mint_fee_bps(&mut self, caller: &Address, bps: u16) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| c.mint_fee_bps = bps)?;
        info!(bps, "mint fee set");
        Ok(())
    }

    pub fn set_redeem_fee_bps(&mut self, caller: &Address, bps: u16) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| c.redeem_fee_bps = bps)?;
        info!(bps, "redeem fee set");
        Ok(())
    }

    pub fn set_peg_tolerance_bps(&mut self, caller: &Address, bps: u16) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| c.peg_tolerance_bps = bps)?;
        info!(bps, floor = self.config.peg_floor(), "peg tolerance set");
        Ok(())
    }

    /// Share of total value (WAD) kept idle.
    pub fn set_vault_buffer(&mut self, caller: &Address, buffer: u128) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.update_config(|c| c.vault_buffer = buffer)?;
        info!(buffer, "vault buffer set");
        Ok(())
    }

    pub fn set_auto_allocate_threshold(&mut self, caller: &Address, threshold: u128) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.update_config(|c| c.auto_allocate_threshold = threshold)?;
        info!(threshold, "auto allocate threshold set");
        Ok(())
    }

    pub fn set_rebase_threshold(&mut self, caller: &Address, threshold: u128) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| c.rebase_threshold = threshold)?;
        info!(threshold, "rebase threshold set");
        Ok(())
    }

    pub fn set_max_supply_diff(&mut self, caller: &Address, max: u128) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| c.max_supply_diff = max)?;
        info!(max, "max supply diff set");
        Ok(())
    }

    pub fn set_redeem_mode(&mut self, caller: &Address, mode: RedeemMode) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| c.redeem_mode = mode)?;
        info!(?mode, "redeem mode set");
        Ok(())
    }

    pub fn set_tie_break(&mut self, caller: &Address, tie_break: TieBreak) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.update_config(|c| c.tie_break = tie_break)?;
        info!(?tie_break, "rebalance tie break set");
        Ok(())
    }

    pub fn set_payout_intervals(&mut self, caller: &Address, period: u64, range: u64) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.update_config(|c| {
            c.payout_period = period;
            c.payout_time_range = range;
        })?;
        info!(period, range, "payout intervals set");
        Ok(())
    }

    // -- Pauses -------------------------------------------------------------

    pub fn pause_capital(&mut self, caller: &Address) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.capital_paused = true;
        info!("capital paused");
        Ok(())
    }

    pub fn unpause_capital(&mut self, caller: &Address) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.capital_paused = false;
        info!("capital unpaused");
        Ok(())
    }

    pub fn pause_rebase(&mut self, caller: &Address) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.rebase_paused = true;
        info!("rebase paused");
        Ok(())
    }

    pub fn unpause_rebase(&mut self, caller: &Address) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.rebase_paused = false;
        info!("rebase unpaused");
        Ok(())
    }
}

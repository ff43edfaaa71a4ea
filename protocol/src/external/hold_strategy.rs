//! A strategy that simply holds what it is given.
//!
//! Useful wherever a real yield venue would be: simulations, the node's
//! scenario runner and tests. Yield and rewards are injected by hand, and
//! individual assets can be told to fail so partial-failure paths can be
//! exercised.
//!
//! `HoldStrategy` is a cheap handle: clones share the same state. Hand one
//! clone to the vault and keep another to drive the simulation.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::strategy::{Reward, Strategy, StrategyError, WithdrawAllReport};
use crate::address::Address;
use crate::config::BPS_DENOMINATOR;
use crate::math;

#[derive(Debug, Clone)]
struct Holding {
    asset: Address,
    decimals: u8,
    balance: u128,
}

#[derive(Debug, Default)]
struct HoldState {
    holdings: Vec<Holding>,
    rewards: BTreeMap<Address, u128>,
    failing: BTreeSet<Address>,
    nav_haircut_bps: u16,
}

impl HoldState {
    fn holding_mut(&mut self, asset: &Address) -> Result<&mut Holding, StrategyError> {
        self.holdings
            .iter_mut()
            .find(|h| h.asset == *asset)
            .ok_or(StrategyError::UnsupportedAsset(*asset))
    }

    fn check_available(&self, asset: &Address) -> Result<(), StrategyError> {
        if self.failing.contains(asset) {
            return Err(StrategyError::Unavailable {
                asset: *asset,
                reason: "venue rejected the call".into(),
            });
        }
        Ok(())
    }

    fn par_value(&self) -> u128 {
        self.holdings
            .iter()
            .map(|h| math::to_units(h.balance, h.decimals).unwrap_or(u128::MAX))
            .fold(0u128, |acc, v| acc.saturating_add(v))
    }
}

#[derive(Debug, Clone)]
pub struct HoldStrategy {
    name: String,
    state: Arc<Mutex<HoldState>>,
}

impl HoldStrategy {
    /// A strategy accepting the given `(asset, decimals)` pairs.
    pub fn new(name: impl Into<String>, assets: &[(Address, u8)]) -> Self {
        let holdings = assets
            .iter()
            .map(|(asset, decimals)| Holding {
                asset: *asset,
                decimals: *decimals,
                balance: 0,
            })
            .collect();
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(HoldState {
                holdings,
                ..HoldState::default()
            })),
        }
    }

    /// Simulates yield: the holding grows without a deposit.
    pub fn accrue(&self, asset: &Address, amount: u128) -> Result<(), StrategyError> {
        let mut state = self.state.lock();
        let holding = state.holding_mut(asset)?;
        holding.balance = holding.balance.saturating_add(amount);
        Ok(())
    }

    /// Simulates a loss.
    pub fn slash(&self, asset: &Address, amount: u128) -> Result<(), StrategyError> {
        let mut state = self.state.lock();
        let holding = state.holding_mut(asset)?;
        holding.balance = holding.balance.saturating_sub(amount);
        Ok(())
    }

    /// Queues reward tokens for the next `collect_rewards`.
    pub fn add_reward(&self, token: Address, amount: u128) {
        let mut state = self.state.lock();
        let entry = state.rewards.entry(token).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Makes every deposit and withdrawal of `asset` fail (or succeed again).
    pub fn set_failing(&self, asset: Address, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(asset);
        } else {
            state.failing.remove(&asset);
        }
    }

    /// Discount applied by `net_asset_value`, simulating pool imbalance.
    pub fn set_nav_haircut_bps(&self, bps: u16) {
        self.state.lock().nav_haircut_bps = bps.min(BPS_DENOMINATOR as u16);
    }
}

impl Strategy for HoldStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn assets(&self) -> Vec<Address> {
        self.state.lock().holdings.iter().map(|h| h.asset).collect()
    }

    fn deposit(&mut self, asset: &Address, amount: u128) -> Result<(), StrategyError> {
        let mut state = self.state.lock();
        state.check_available(asset)?;
        let holding = state.holding_mut(asset)?;
        holding.balance = holding.balance.saturating_add(amount);
        tracing::debug!(strategy = %self.name, asset = %asset, amount, "hold strategy deposit");
        Ok(())
    }

    fn withdraw(
        &mut self,
        recipient: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<u128, StrategyError> {
        let mut state = self.state.lock();
        state.check_available(asset)?;
        let holding = state.holding_mut(asset)?;
        if holding.balance < amount {
            return Err(StrategyError::InsufficientBalance {
                asset: *asset,
                available: holding.balance,
                requested: amount,
            });
        }
        holding.balance -= amount;
        tracing::debug!(strategy = %self.name, recipient = %recipient, asset = %asset, amount, "hold strategy withdrawal");
        Ok(amount)
    }

    fn withdraw_all(&mut self, recipient: &Address) -> WithdrawAllReport {
        let mut report = WithdrawAllReport::default();
        let assets: Vec<Address> = self.assets();
        for asset in assets {
            let balance = self.asset_balance(&asset);
            if balance == 0 {
                continue;
            }
            match self.withdraw(recipient, &asset, balance) {
                Ok(amount) => report.withdrawn.push((asset, amount)),
                Err(err) => report.failed.push((asset, err)),
            }
        }
        report
    }

    fn check_balance(&self) -> u128 {
        self.state.lock().par_value()
    }

    fn net_asset_value(&self) -> u128 {
        let state = self.state.lock();
        let par = state.par_value();
        let haircut = math::bps_of(par, state.nav_haircut_bps).unwrap_or(0);
        par - haircut
    }

    fn asset_balance(&self, asset: &Address) -> u128 {
        self.state
            .lock()
            .holdings
            .iter()
            .find(|h| h.asset == *asset)
            .map_or(0, |h| h.balance)
    }

    fn collect_rewards(&mut self) -> Result<Vec<Reward>, StrategyError> {
        let mut state = self.state.lock();
        let rewards = std::mem::take(&mut state.rewards)
            .into_iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|(token, amount)| Reward { token, amount })
            .collect();
        Ok(rewards)
    }

    fn pending_rewards(&self) -> Result<Vec<Reward>, StrategyError> {
        let state = self.state.lock();
        Ok(state
            .rewards
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(token, amount)| Reward {
                token: *token,
                amount: *amount,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> Address {
        Address::from_label("USDC")
    }

    fn dai() -> Address {
        Address::from_label("DAI")
    }

    fn strategy() -> HoldStrategy {
        HoldStrategy::new("hold", &[(usdc(), 6), (dai(), 18)])
    }

    #[test]
    fn check_balance_normalizes_decimals() {
        let mut s = strategy();
        s.deposit(&usdc(), 5_000_000).unwrap();
        s.deposit(&dai(), 3 * 10u128.pow(18)).unwrap();
        assert_eq!(s.check_balance(), 8 * 10u128.pow(18));
    }

    #[test]
    fn clones_share_state() {
        let mut owned = strategy();
        let handle = owned.clone();
        owned.deposit(&usdc(), 1_000_000).unwrap();
        handle.accrue(&usdc(), 500_000).unwrap();
        assert_eq!(owned.asset_balance(&usdc()), 1_500_000);
    }

    #[test]
    fn withdraw_all_reports_failing_assets() {
        let mut s = strategy();
        s.deposit(&usdc(), 1_000_000).unwrap();
        s.deposit(&dai(), 10u128.pow(18)).unwrap();
        s.set_failing(dai(), true);

        let report = s.withdraw_all(&Address::from_label("vault"));
        assert_eq!(report.withdrawn, vec![(usdc(), 1_000_000)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, dai());
        assert_eq!(s.asset_balance(&dai()), 10u128.pow(18));
    }

    #[test]
    fn rewards_are_handed_over_once() {
        let mut s = strategy();
        let comp = Address::from_label("COMP");
        s.add_reward(comp, 42);
        assert_eq!(s.pending_rewards().unwrap().len(), 1);
        assert_eq!(
            s.collect_rewards().unwrap(),
            vec![Reward {
                token: comp,
                amount: 42
            }]
        );
        assert!(s.collect_rewards().unwrap().is_empty());
        assert!(s.pending_rewards().unwrap().is_empty());
    }

    #[test]
    fn nav_haircut_only_affects_nav() {
        let mut s = strategy();
        s.deposit(&dai(), 100 * 10u128.pow(18)).unwrap();
        s.set_nav_haircut_bps(100);
        assert_eq!(s.check_balance(), 100 * 10u128.pow(18));
        assert_eq!(s.net_asset_value(), 99 * 10u128.pow(18));
    }

    #[test]
    fn unsupported_asset_is_rejected() {
        let mut s = strategy();
        let other = Address::from_label("USDT");
        assert_eq!(
            s.deposit(&other, 1),
            Err(StrategyError::UnsupportedAsset(other))
        );
    }
}

//! The CASH unit ledger.
//!
//! Balances are never stored. Each account holds *credits*, and its balance
//! is derived on read as `credits * 1e18 / credits_per_token`. Rebasing
//! accounts share one global `rebasing_credits_per_token`; lowering that
//! rate raises every rebasing balance at once. Non-rebasing accounts carry
//! their own frozen rate and are untouched by rebases.
//!
//! Two global aggregates keep the books closed:
//!
//! ```text
//! total_supply - non_rebasing_supply == rebasing_credits * 1e18 / rebasing_credits_per_token
//! ```
//!
//! Converting a balance into credits rounds up and converting back rounds
//! down. As long as the rate stays above 1e18 (it starts at 1e27) that pair
//! recovers every balance exactly, so transfers never drift.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::account::{Account, RebaseState};
use super::error::LedgerError;
use super::registry::ContractRegistry;
use crate::address::Address;
use crate::config::{RebasePolicy, INITIAL_CREDITS_PER_TOKEN, MAX_SUPPLY, UNIT};
use crate::math::{self, MathError};

// ---------------------------------------------------------------------------
// Rebase Outcome
// ---------------------------------------------------------------------------

/// Why a rebase request did not change the supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// There is no supply to scale.
    EmptySupply,
    /// The proposed supply equals the current one.
    Unchanged,
    /// Every holder is non-rebasing; there is nobody to distribute to.
    NoRebasingSupply,
    /// The change is smaller than the configured threshold.
    BelowThreshold {
        /// Relative deviation, WAD.
        deviation: u128,
    },
}

/// Result of [`UnitLedger::rebase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebaseOutcome {
    Applied {
        previous: u128,
        current: u128,
        credits_per_token: u128,
    },
    Skipped(SkipReason),
}

impl RebaseOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RebaseOutcome::Applied { .. })
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum BalanceChange {
    Credit(u128),
    Debit(u128),
}

/// Change to the global aggregates caused by one account adjustment.
#[derive(Debug, Clone, Copy, Default)]
struct GlobalDelta {
    rebasing_credits: i128,
    non_rebasing_supply: i128,
}

fn add_signed(value: u128, delta: i128) -> Result<u128, MathError> {
    if delta >= 0 {
        value
            .checked_add(delta.unsigned_abs())
            .ok_or(MathError::Overflow)
    } else {
        value
            .checked_sub(delta.unsigned_abs())
            .ok_or(MathError::Underflow)
    }
}

fn signed_diff(new: u128, old: u128) -> Result<i128, MathError> {
    let magnitude = i128::try_from(new.abs_diff(old)).map_err(|_| MathError::Overflow)?;
    Ok(if new >= old { magnitude } else { -magnitude })
}

/// Balance for `credits` at `credits_per_token`. Per-account balances are
/// bounded by total supply, which is bounded by `MAX_SUPPLY`, so the
/// division result always fits.
fn credits_to_balance(credits: u128, credits_per_token: u128) -> u128 {
    math::mul_div(credits, UNIT, credits_per_token).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// UnitLedger
// ---------------------------------------------------------------------------

/// The rebasing token ledger. Owned by the vault; every mutation goes
/// through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLedger {
    total_supply: u128,
    rebasing_credits: u128,
    rebasing_credits_per_token: u128,
    non_rebasing_supply: u128,
    accounts: BTreeMap<Address, Account>,
    /// owner -> spender -> amount
    allowances: BTreeMap<Address, BTreeMap<Address, u128>>,
    contracts: ContractRegistry,
}

impl UnitLedger {
    /// An empty ledger at the initial credits-per-token rate.
    pub fn new() -> Self {
        Self {
            total_supply: 0,
            rebasing_credits: 0,
            rebasing_credits_per_token: INITIAL_CREDITS_PER_TOKEN,
            non_rebasing_supply: 0,
            accounts: BTreeMap::new(),
            allowances: BTreeMap::new(),
            contracts: ContractRegistry::new(),
        }
    }

    // -- Reads --------------------------------------------------------------

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn non_rebasing_supply(&self) -> u128 {
        self.non_rebasing_supply
    }

    pub fn rebasing_credits(&self) -> u128 {
        self.rebasing_credits
    }

    pub fn rebasing_credits_per_token(&self) -> u128 {
        self.rebasing_credits_per_token
    }

    /// Supply held by rebasing accounts (including delegated yield).
    pub fn rebasing_supply(&self) -> u128 {
        self.total_supply.saturating_sub(self.non_rebasing_supply)
    }

    pub fn account(&self, account: &Address) -> Option<&Account> {
        self.accounts.get(account)
    }

    /// Every ledger entry, in address order.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts.iter()
    }

    pub fn rebase_state(&self, account: &Address) -> RebaseState {
        self.accounts
            .get(account)
            .map(|a| a.state)
            .unwrap_or_default()
    }

    /// Observable balance, derived from credits on every call.
    pub fn balance_of(&self, account: &Address) -> u128 {
        let Some(entry) = self.accounts.get(account) else {
            return 0;
        };
        match entry.state {
            RebaseState::YieldDelegationTarget => {
                let gross = credits_to_balance(entry.credits, self.rebasing_credits_per_token);
                let source = entry.yield_from.map_or(0, |s| self.balance_of(&s));
                gross.saturating_sub(source)
            }
            _ => credits_to_balance(
                entry.credits,
                entry
                    .frozen_credits_per_token
                    .unwrap_or(self.rebasing_credits_per_token),
            ),
        }
    }

    /// `(credits, credits_per_token)` for an account.
    pub fn credits_balance_of(&self, account: &Address) -> (u128, u128) {
        match self.accounts.get(account) {
            Some(entry) => (
                entry.credits,
                entry
                    .frozen_credits_per_token
                    .unwrap_or(self.rebasing_credits_per_token),
            ),
            None => (0, self.rebasing_credits_per_token),
        }
    }

    /// Sum of every observable balance. Equals `total_supply` up to
    /// per-account rounding after a rebase.
    pub fn sum_of_balances(&self) -> u128 {
        self.accounts
            .keys()
            .map(|a| self.balance_of(a))
            .fold(0u128, |acc, b| acc.saturating_add(b))
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> u128 {
        self.allowances
            .get(owner)
            .and_then(|m| m.get(spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_contract(&self, account: &Address) -> bool {
        self.contracts.has_code(account)
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    // -- Contract lifecycle -------------------------------------------------

    /// Records contract code at `address`. Redeploying over a destroyed
    /// contract resumes the existing ledger entry.
    pub fn deploy_contract(&mut self, address: Address) -> Result<(), LedgerError> {
        if address.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        self.contracts.deploy(address);
        debug!(contract = %address, "contract registered");
        Ok(())
    }

    /// Marks the code at `address` destroyed. Its balance stays put.
    pub fn destroy_contract(&mut self, address: &Address) -> Result<(), LedgerError> {
        if !self.contracts.destroy(address) {
            return Err(LedgerError::ContractNotActive(*address));
        }
        debug!(contract = %address, "contract destroyed");
        Ok(())
    }

    // -- Supply -------------------------------------------------------------

    /// Creates `amount` new tokens for `account` at its effective rate.
    pub fn mint(&mut self, account: &Address, amount: u128) -> Result<(), LedgerError> {
        if account.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        let new_total = self
            .total_supply
            .checked_add(amount)
            .filter(|total| *total <= MAX_SUPPLY)
            .ok_or(LedgerError::SupplyCapExceeded { requested: amount })?;

        let delta = self.adjust_account(account, BalanceChange::Credit(amount))?;
        self.apply_delta(delta)?;
        self.total_supply = new_total;
        debug!(account = %account, amount, total_supply = new_total, "minted");
        Ok(())
    }

    /// Destroys `amount` tokens held by `account`.
    pub fn burn(&mut self, account: &Address, amount: u128) -> Result<(), LedgerError> {
        if account.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        let new_total = self
            .total_supply
            .checked_sub(amount)
            .ok_or(MathError::Underflow)?;

        let delta = self.adjust_account(account, BalanceChange::Debit(amount))?;
        self.apply_delta(delta)?;
        self.total_supply = new_total;
        debug!(account = %account, amount, total_supply = new_total, "burned");
        Ok(())
    }

    /// Moves the supply to `new_total` by rescaling the rebasing rate.
    ///
    /// Non-rebasing balances are unaffected; rebasing balances absorb the
    /// whole change. The resulting total is re-derived from the new rate and
    /// returned. A change that would push the rate below `1e18` credits per
    /// token is refused.
    pub fn change_supply(&mut self, new_total: u128) -> Result<u128, LedgerError> {
        if self.total_supply == 0 {
            return Err(LedgerError::ZeroSupply);
        }
        if new_total == self.total_supply {
            return Ok(self.total_supply);
        }

        let target = new_total.min(MAX_SUPPLY);
        if target <= self.non_rebasing_supply {
            return Err(LedgerError::InvalidSupplyChange {
                new_total: target,
                non_rebasing_supply: self.non_rebasing_supply,
            });
        }
        let rebasing_supply = target - self.non_rebasing_supply;
        let credits_per_token = math::mul_div(self.rebasing_credits, UNIT, rebasing_supply)?;
        // Below one credit per token, balance round trips stop being exact.
        if credits_per_token < UNIT {
            return Err(LedgerError::InvalidSupplyChange {
                new_total: target,
                non_rebasing_supply: self.non_rebasing_supply,
            });
        }
        if target < self.total_supply {
            self.check_delegations_covered(target, credits_per_token)?;
        }
        let derived = math::mul_div(self.rebasing_credits, UNIT, credits_per_token)?
            .checked_add(self.non_rebasing_supply)
            .ok_or(MathError::Overflow)?;

        self.rebasing_credits_per_token = credits_per_token;
        self.total_supply = derived;
        Ok(derived)
    }

    /// Every delegation target must still back its source's frozen balance
    /// at `credits_per_token`.
    fn check_delegations_covered(
        &self,
        new_total: u128,
        credits_per_token: u128,
    ) -> Result<(), LedgerError> {
        for (address, entry) in &self.accounts {
            if entry.state != RebaseState::YieldDelegationTarget {
                continue;
            }
            let Some(source) = entry.yield_from else {
                continue;
            };
            let required = self.balance_of(&source);
            let available = credits_to_balance(entry.credits, credits_per_token);
            if available < required {
                return Err(LedgerError::DelegationShortfall {
                    new_total,
                    target: *address,
                    required,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Rebases toward an externally computed pool value, subject to policy.
    pub fn rebase(
        &mut self,
        new_total: u128,
        policy: &RebasePolicy,
    ) -> Result<RebaseOutcome, LedgerError> {
        let previous = self.total_supply;
        if previous == 0 {
            return Ok(RebaseOutcome::Skipped(SkipReason::EmptySupply));
        }
        if new_total == previous {
            return Ok(RebaseOutcome::Skipped(SkipReason::Unchanged));
        }
        if self.rebasing_credits == 0 {
            return Ok(RebaseOutcome::Skipped(SkipReason::NoRebasingSupply));
        }

        let deviation = math::relative_deviation(new_total, previous)?;
        if policy.max_supply_diff > 0 && deviation > policy.max_supply_diff {
            return Err(LedgerError::SupplyDeviation {
                current: previous,
                proposed: new_total,
                deviation,
                max: policy.max_supply_diff,
            });
        }
        if deviation < policy.rebase_threshold {
            debug!(deviation, threshold = policy.rebase_threshold, "rebase skipped below threshold");
            return Ok(RebaseOutcome::Skipped(SkipReason::BelowThreshold { deviation }));
        }

        let current = self.change_supply(new_total)?;
        info!(
            previous,
            current,
            credits_per_token = self.rebasing_credits_per_token,
            "supply rebased"
        );
        Ok(RebaseOutcome::Applied {
            previous,
            current,
            credits_per_token: self.rebasing_credits_per_token,
        })
    }

    // -- Transfers ----------------------------------------------------------

    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), LedgerError> {
        if from.is_zero() || to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: *from,
                balance,
                requested: amount,
            });
        }
        if amount == 0 {
            return Ok(());
        }

        let debit = self.adjust_account(from, BalanceChange::Debit(amount))?;
        self.apply_delta(debit)?;
        let credit = self.adjust_account(to, BalanceChange::Credit(amount))?;
        self.apply_delta(credit)?;
        debug!(from = %from, to = %to, amount, "transfer");
        Ok(())
    }

    /// Transfers on behalf of `from`, spending `spender`'s allowance.
    /// An allowance of `u128::MAX` is never decremented.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), LedgerError> {
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(LedgerError::InsufficientAllowance {
                owner: *from,
                spender: *spender,
                allowance,
                requested: amount,
            });
        }
        self.transfer(from, to, amount)?;
        if allowance != u128::MAX {
            self.set_allowance(from, spender, allowance - amount);
        }
        Ok(())
    }

    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: u128,
    ) -> Result<(), LedgerError> {
        if owner.is_zero() || spender.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        self.set_allowance(owner, spender, amount);
        Ok(())
    }

    /// Returns the new allowance.
    pub fn increase_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        added: u128,
    ) -> Result<u128, LedgerError> {
        let updated = self
            .allowance(owner, spender)
            .checked_add(added)
            .ok_or(MathError::Overflow)?;
        self.approve(owner, spender, updated)?;
        Ok(updated)
    }

    /// Returns the new allowance. Decreasing past zero leaves zero.
    pub fn decrease_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        subtracted: u128,
    ) -> Result<u128, LedgerError> {
        let updated = self.allowance(owner, spender).saturating_sub(subtracted);
        self.approve(owner, spender, updated)?;
        Ok(updated)
    }

    fn set_allowance(&mut self, owner: &Address, spender: &Address, amount: u128) {
        self.allowances
            .entry(*owner)
            .or_default()
            .insert(*spender, amount);
    }

    // -- Rebase state -------------------------------------------------------

    /// Freezes `account`'s balance against future rebases.
    pub fn rebase_opt_out(&mut self, account: &Address) -> Result<(), LedgerError> {
        self.ensure_not_delegating(account)?;
        if self.is_frozen(account) || self.needs_migration(account) {
            return Err(LedgerError::AlreadyNonRebasing { account: *account });
        }
        self.freeze(account)?;
        info!(account = %account, balance = self.balance_of(account), "rebase opt-out");
        Ok(())
    }

    /// Makes `account` follow the global rate again.
    pub fn rebase_opt_in(&mut self, account: &Address) -> Result<(), LedgerError> {
        self.auto_migrate(account)?;
        self.ensure_not_delegating(account)?;
        if !self.is_frozen(account) {
            return Err(LedgerError::AlreadyRebasing { account: *account });
        }
        self.unfreeze(account)?;
        info!(account = %account, balance = self.balance_of(account), "rebase opt-in");
        Ok(())
    }

    /// Moves `account` into a standard rebase state. Delegation states are
    /// reached through [`delegate_yield`](Self::delegate_yield) instead.
    pub fn change_rebase_state(
        &mut self,
        account: &Address,
        target: RebaseState,
    ) -> Result<(), LedgerError> {
        match target {
            RebaseState::StdNonRebasing => self.rebase_opt_out(account),
            RebaseState::StdRebasing => self.rebase_opt_in(account),
            other => Err(LedgerError::InvalidTransition {
                account: *account,
                from: self.rebase_state(account),
                to: other,
            }),
        }
    }

    /// Redirects the yield on `from`'s balance to `to`.
    ///
    /// `from` ends up frozen; `to` ends up holding rebasing credits for both
    /// balances, and its observable balance is its own share only.
    pub fn delegate_yield(&mut self, from: &Address, to: &Address) -> Result<(), LedgerError> {
        if from.is_zero() || to.is_zero() {
            return Err(LedgerError::ZeroAddress);
        }
        if from == to {
            return Err(LedgerError::SelfDelegation);
        }
        self.ensure_not_delegating(from)?;
        self.ensure_not_delegating(to)?;

        self.auto_migrate(from)?;
        self.auto_migrate(to)?;
        if !self.is_frozen(from) {
            self.freeze(from)?;
        }
        if self.is_frozen(to) {
            self.unfreeze(to)?;
        }

        let from_balance = self.balance_of(from);
        let to_balance = self.balance_of(to);
        let old_to_credits = self.accounts.get(to).map_or(0, |a| a.credits);
        let new_to_credits = self.to_rebasing_credits(
            from_balance
                .checked_add(to_balance)
                .ok_or(MathError::Overflow)?,
        )?;
        let from_state = self.rebase_state(from);
        let to_state = self.rebase_state(to);
        let source_state = from_state
            .delegate_source()
            .ok_or(LedgerError::InvalidTransition {
                account: *from,
                from: from_state,
                to: RebaseState::YieldDelegationSource,
            })?;
        let target_state = to_state
            .delegate_target()
            .ok_or(LedgerError::InvalidTransition {
                account: *to,
                from: to_state,
                to: RebaseState::YieldDelegationTarget,
            })?;
        let rebasing_credits = add_signed(
            self.rebasing_credits,
            signed_diff(new_to_credits, old_to_credits)?,
        )?;
        let non_rebasing_supply = self
            .non_rebasing_supply
            .checked_sub(from_balance)
            .ok_or(MathError::Underflow)?;

        let source = self.account_mut(from);
        source.state = source_state;
        source.yield_to = Some(*to);
        let target = self.account_mut(to);
        target.state = target_state;
        target.yield_from = Some(*from);
        target.credits = new_to_credits;
        self.rebasing_credits = rebasing_credits;
        self.non_rebasing_supply = non_rebasing_supply;

        info!(from = %from, to = %to, "yield delegated");
        Ok(())
    }

    /// Dissolves the delegation started by `from`.
    pub fn undelegate_yield(&mut self, from: &Address) -> Result<(), LedgerError> {
        let entry = self
            .accounts
            .get(from)
            .filter(|a| a.state == RebaseState::YieldDelegationSource)
            .ok_or(LedgerError::NotDelegating { account: *from })?;
        let to = entry
            .yield_to
            .ok_or(LedgerError::NotDelegating { account: *from })?;

        let from_balance = self.balance_of(from);
        let to_balance = self.balance_of(&to);
        let old_to_credits = self.accounts.get(&to).map_or(0, |a| a.credits);
        let new_to_credits = self.to_rebasing_credits(to_balance)?;
        let rebasing_credits = add_signed(
            self.rebasing_credits,
            signed_diff(new_to_credits, old_to_credits)?,
        )?;
        let non_rebasing_supply = self
            .non_rebasing_supply
            .checked_add(from_balance)
            .ok_or(MathError::Overflow)?;

        let source = self.account_mut(from);
        source.state = RebaseState::StdNonRebasing;
        source.yield_to = None;
        let target = self.account_mut(&to);
        target.state = RebaseState::StdRebasing;
        target.yield_from = None;
        target.credits = new_to_credits;
        self.rebasing_credits = rebasing_credits;
        self.non_rebasing_supply = non_rebasing_supply;

        info!(from = %from, to = %to, "yield delegation removed");
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    fn account_mut(&mut self, account: &Address) -> &mut Account {
        self.accounts.entry(*account).or_default()
    }

    fn is_frozen(&self, account: &Address) -> bool {
        self.accounts.get(account).is_some_and(Account::is_frozen)
    }

    fn ensure_not_delegating(&self, account: &Address) -> Result<(), LedgerError> {
        match self.accounts.get(account) {
            Some(entry)
                if entry.state.is_delegating()
                    || entry.yield_to.is_some()
                    || entry.yield_from.is_some() =>
            {
                Err(LedgerError::AccountDelegating { account: *account })
            }
            _ => Ok(()),
        }
    }

    fn to_rebasing_credits(&self, balance: u128) -> Result<u128, LedgerError> {
        Ok(math::mul_div_up(
            balance,
            self.rebasing_credits_per_token,
            UNIT,
        )?)
    }

    /// Contracts that were never classified stop rebasing the first time
    /// they are touched.
    fn auto_migrate(&mut self, account: &Address) -> Result<(), LedgerError> {
        if self.needs_migration(account) {
            self.freeze(account)?;
            debug!(account = %account, "contract account migrated to non-rebasing");
        }
        Ok(())
    }

    fn needs_migration(&self, account: &Address) -> bool {
        let unclassified = self
            .accounts
            .get(account)
            .map_or(true, |a| a.state == RebaseState::Unknown && !a.is_frozen());
        unclassified && self.contracts.has_code(account)
    }

    fn freeze(&mut self, account: &Address) -> Result<(), LedgerError> {
        let balance = self.balance_of(account);
        let state = self.rebase_state(account);
        let next = state.opt_out().ok_or(LedgerError::InvalidTransition {
            account: *account,
            from: state,
            to: RebaseState::StdNonRebasing,
        })?;
        let credits = self.accounts.get(account).map_or(0, |a| a.credits);
        let rebasing_credits = self
            .rebasing_credits
            .checked_sub(credits)
            .ok_or(MathError::Underflow)?;
        let non_rebasing_supply = self
            .non_rebasing_supply
            .checked_add(balance)
            .ok_or(MathError::Overflow)?;

        let rate = self.rebasing_credits_per_token;
        let entry = self.account_mut(account);
        entry.state = next;
        entry.frozen_credits_per_token = Some(rate);
        self.rebasing_credits = rebasing_credits;
        self.non_rebasing_supply = non_rebasing_supply;
        Ok(())
    }

    fn unfreeze(&mut self, account: &Address) -> Result<(), LedgerError> {
        let balance = self.balance_of(account);
        let state = self.rebase_state(account);
        let next = state.opt_in().ok_or(LedgerError::InvalidTransition {
            account: *account,
            from: state,
            to: RebaseState::StdRebasing,
        })?;
        let credits = self.to_rebasing_credits(balance)?;
        let rebasing_credits = self
            .rebasing_credits
            .checked_add(credits)
            .ok_or(MathError::Overflow)?;
        let non_rebasing_supply = self
            .non_rebasing_supply
            .checked_sub(balance)
            .ok_or(MathError::Underflow)?;

        let entry = self.account_mut(account);
        entry.state = next;
        entry.frozen_credits_per_token = None;
        entry.credits = credits;
        self.rebasing_credits = rebasing_credits;
        self.non_rebasing_supply = non_rebasing_supply;
        Ok(())
    }

    /// Rewrites one account's credits for a balance change and reports how
    /// the global aggregates must move.
    fn adjust_account(
        &mut self,
        account: &Address,
        change: BalanceChange,
    ) -> Result<GlobalDelta, LedgerError> {
        let current = self.balance_of(account);
        let new_balance = match change {
            BalanceChange::Credit(amount) => {
                current.checked_add(amount).ok_or(MathError::Overflow)?
            }
            BalanceChange::Debit(amount) => {
                current
                    .checked_sub(amount)
                    .ok_or(LedgerError::InsufficientBalance {
                        account: *account,
                        balance: current,
                        requested: amount,
                    })?
            }
        };

        self.auto_migrate(account)?;
        let entry = self.accounts.get(account).cloned().unwrap_or_default();

        match entry.state {
            RebaseState::YieldDelegationSource => {
                let target = entry
                    .yield_to
                    .ok_or(LedgerError::NotDelegating { account: *account })?;
                let target_balance = self.balance_of(&target);
                let snapshot = entry
                    .frozen_credits_per_token
                    .unwrap_or(self.rebasing_credits_per_token);
                let source_credits = math::mul_div_up(new_balance, snapshot, UNIT)?;
                let target_credits = self.to_rebasing_credits(
                    new_balance
                        .checked_add(target_balance)
                        .ok_or(MathError::Overflow)?,
                )?;
                let old_target_credits = self.accounts.get(&target).map_or(0, |a| a.credits);

                self.account_mut(account).credits = source_credits;
                self.account_mut(&target).credits = target_credits;
                Ok(GlobalDelta {
                    rebasing_credits: signed_diff(target_credits, old_target_credits)?,
                    non_rebasing_supply: 0,
                })
            }
            RebaseState::YieldDelegationTarget => {
                let source = entry
                    .yield_from
                    .ok_or(LedgerError::NotDelegating { account: *account })?;
                let source_balance = self.balance_of(&source);
                let credits = self.to_rebasing_credits(
                    new_balance
                        .checked_add(source_balance)
                        .ok_or(MathError::Overflow)?,
                )?;

                self.account_mut(account).credits = credits;
                Ok(GlobalDelta {
                    rebasing_credits: signed_diff(credits, entry.credits)?,
                    non_rebasing_supply: 0,
                })
            }
            _ => match entry.frozen_credits_per_token {
                Some(snapshot) => {
                    let credits = math::mul_div_up(new_balance, snapshot, UNIT)?;
                    self.account_mut(account).credits = credits;
                    Ok(GlobalDelta {
                        rebasing_credits: 0,
                        non_rebasing_supply: signed_diff(new_balance, current)?,
                    })
                }
                None => {
                    let credits = self.to_rebasing_credits(new_balance)?;
                    self.account_mut(account).credits = credits;
                    Ok(GlobalDelta {
                        rebasing_credits: signed_diff(credits, entry.credits)?,
                        non_rebasing_supply: 0,
                    })
                }
            },
        }
    }

    fn apply_delta(&mut self, delta: GlobalDelta) -> Result<(), LedgerError> {
        let rebasing_credits = add_signed(self.rebasing_credits, delta.rebasing_credits)?;
        let non_rebasing_supply =
            add_signed(self.non_rebasing_supply, delta.non_rebasing_supply)?;
        self.rebasing_credits = rebasing_credits;
        self.non_rebasing_supply = non_rebasing_supply;
        Ok(())
    }
}

impl Default for UnitLedger {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WAD;

    fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    fn units(n: u128) -> u128 {
        n * WAD
    }

    #[test]
    fn fresh_ledger_starts_at_high_resolution_rate() {
        let ledger = UnitLedger::new();
        assert_eq!(ledger.total_supply(), 0);
        assert_eq!(
            ledger.rebasing_credits_per_token(),
            INITIAL_CREDITS_PER_TOKEN
        );
        assert_eq!(ledger.balance_of(&addr("nobody")), 0);
    }

    #[test]
    fn mint_credits_at_the_global_rate() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(100)).unwrap();

        assert_eq!(ledger.balance_of(&addr("matt")), units(100));
        assert_eq!(ledger.total_supply(), units(100));
        let (credits, rate) = ledger.credits_balance_of(&addr("matt"));
        assert_eq!(rate, INITIAL_CREDITS_PER_TOKEN);
        assert_eq!(credits, units(100) * 1_000_000_000);
        assert_eq!(ledger.rebasing_credits(), credits);
    }

    #[test]
    fn burn_more_than_balance_fails_without_effect() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(10)).unwrap();
        let before = ledger.clone();

        let err = ledger.burn(&addr("matt"), units(11)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: addr("matt"),
                balance: units(10),
                requested: units(11),
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn transfer_to_zero_address_is_rejected() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(1)).unwrap();
        assert_eq!(
            ledger.transfer(&addr("matt"), &Address::ZERO, 1),
            Err(LedgerError::ZeroAddress)
        );
    }

    #[test]
    fn change_supply_on_empty_ledger_fails() {
        let mut ledger = UnitLedger::new();
        assert_eq!(ledger.change_supply(units(1)), Err(LedgerError::ZeroSupply));
    }

    #[test]
    fn change_supply_cannot_undercut_non_rebasing_holders() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(100)).unwrap();
        ledger.mint(&addr("pool"), units(50)).unwrap();
        ledger.rebase_opt_out(&addr("pool")).unwrap();

        assert!(matches!(
            ledger.change_supply(units(50)),
            Err(LedgerError::InvalidSupplyChange { .. })
        ));
    }

    #[test]
    fn negative_rebase_shrinks_rebasing_balances() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(100)).unwrap();
        ledger.mint(&addr("josh"), units(100)).unwrap();

        ledger.change_supply(units(180)).unwrap();
        assert_eq!(ledger.total_supply(), units(180));
        assert_eq!(ledger.balance_of(&addr("matt")), units(90));
    }

    #[test]
    fn rebase_skips_noise_below_threshold() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(100)).unwrap();
        let policy = RebasePolicy {
            rebase_threshold: WAD / 100, // 1%
            max_supply_diff: 0,
        };

        let outcome = ledger.rebase(units(100) + units(1) / 2, &policy).unwrap();
        assert_eq!(
            outcome,
            RebaseOutcome::Skipped(SkipReason::BelowThreshold {
                deviation: WAD / 200
            })
        );
        assert_eq!(ledger.total_supply(), units(100));

        let outcome = ledger.rebase(units(102), &policy).unwrap();
        assert!(outcome.is_applied());
        assert_eq!(ledger.total_supply(), units(102));
    }

    #[test]
    fn rebase_refuses_excessive_deviation() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("matt"), units(100)).unwrap();
        let policy = RebasePolicy {
            rebase_threshold: 0,
            max_supply_diff: WAD / 20, // 5%
        };

        let err = ledger.rebase(units(110), &policy).unwrap_err();
        assert!(matches!(err, LedgerError::SupplyDeviation { .. }));
        assert_eq!(ledger.total_supply(), units(100));
    }

    #[test]
    fn rebase_with_only_non_rebasing_holders_is_skipped() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("pool"), units(10)).unwrap();
        ledger.rebase_opt_out(&addr("pool")).unwrap();

        let outcome = ledger
            .rebase(units(20), &RebasePolicy::default())
            .unwrap();
        assert_eq!(
            outcome,
            RebaseOutcome::Skipped(SkipReason::NoRebasingSupply)
        );
    }

    #[test]
    fn opt_out_twice_is_an_error() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("anna"), units(5)).unwrap();
        ledger.rebase_opt_out(&addr("anna")).unwrap();
        assert_eq!(
            ledger.rebase_opt_out(&addr("anna")),
            Err(LedgerError::AlreadyNonRebasing {
                account: addr("anna")
            })
        );
    }

    #[test]
    fn opt_in_of_a_rebasing_account_is_an_error() {
        let mut ledger = UnitLedger::new();
        ledger.mint(&addr("anna"), units(5)).unwrap();
        assert_eq!(
            ledger.rebase_opt_in(&addr("anna")),
            Err(LedgerError::AlreadyRebasing {
                account: addr("anna")
            })
        );
    }

    #[test]
    fn change_rebase_state_rejects_delegation_targets() {
        let mut ledger = UnitLedger::new();
        assert!(matches!(
            ledger.change_rebase_state(&addr("anna"), RebaseState::YieldDelegationTarget),
            Err(LedgerError::InvalidTransition { .. })
        ));
        ledger
            .change_rebase_state(&addr("anna"), RebaseState::StdNonRebasing)
            .unwrap();
        assert_eq!(
            ledger.rebase_state(&addr("anna")),
            RebaseState::StdNonRebasing
        );
    }

    #[test]
    fn allowances_gate_transfer_from() {
        let mut ledger = UnitLedger::new();
        let (matt, anna, josh) = (addr("matt"), addr("anna"), addr("josh"));
        ledger.mint(&matt, units(100)).unwrap();
        ledger.approve(&matt, &anna, units(30)).unwrap();

        ledger.transfer_from(&anna, &matt, &josh, units(20)).unwrap();
        assert_eq!(ledger.allowance(&matt, &anna), units(10));
        assert_eq!(ledger.balance_of(&josh), units(20));

        let err = ledger
            .transfer_from(&anna, &matt, &josh, units(11))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAllowance { .. }));
    }

    #[test]
    fn allowance_adjustments_saturate_at_zero() {
        let mut ledger = UnitLedger::new();
        let (matt, anna) = (addr("matt"), addr("anna"));
        assert_eq!(ledger.increase_allowance(&matt, &anna, 50).unwrap(), 50);
        assert_eq!(ledger.decrease_allowance(&matt, &anna, 20).unwrap(), 30);
        assert_eq!(ledger.decrease_allowance(&matt, &anna, 100).unwrap(), 0);
    }

    #[test]
    fn infinite_allowance_is_not_consumed() {
        let mut ledger = UnitLedger::new();
        let (matt, anna) = (addr("matt"), addr("anna"));
        ledger.mint(&matt, units(10)).unwrap();
        ledger.approve(&matt, &anna, u128::MAX).unwrap();
        ledger.transfer_from(&anna, &matt, &anna, units(4)).unwrap();
        assert_eq!(ledger.allowance(&matt, &anna), u128::MAX);
    }

    #[test]
    fn supply_cut_cannot_strip_a_delegation_target() {
        let mut ledger = UnitLedger::new();
        let (source, target, other) = (addr("source"), addr("target"), addr("other"));
        ledger.mint(&source, units(100)).unwrap();
        ledger.mint(&other, units(100)).unwrap();
        ledger.delegate_yield(&source, &target).unwrap();
        let before = ledger.clone();

        let err = ledger.change_supply(units(180)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DelegationShortfall { target: t, required, .. }
                if t == target && required == units(100)
        ));
        assert_eq!(ledger, before);
    }

    #[test]
    fn supply_cut_absorbed_by_the_target_keeps_the_books_closed() {
        let mut ledger = UnitLedger::new();
        let (source, target, other) = (addr("source"), addr("target"), addr("other"));
        ledger.mint(&source, units(100)).unwrap();
        ledger.mint(&target, units(100)).unwrap();
        ledger.mint(&other, units(100)).unwrap();
        ledger.delegate_yield(&source, &target).unwrap();

        ledger.change_supply(units(270)).unwrap();
        assert_eq!(ledger.balance_of(&source), units(100));
        assert_eq!(ledger.balance_of(&target), units(80));
        assert_eq!(ledger.balance_of(&other), units(90));
        assert!(ledger.sum_of_balances() <= ledger.total_supply());
    }

    #[test]
    fn destroying_a_non_contract_fails() {
        let mut ledger = UnitLedger::new();
        assert_eq!(
            ledger.destroy_contract(&addr("eoa")),
            Err(LedgerError::ContractNotActive(addr("eoa")))
        );
    }
}

//! The unit token's public surface, served by the vault's ledger.
//!
//! Holder calls run under the same reentrancy guard as mint and redeem.

use cash_protocol::ledger::RebaseState;
use cash_protocol::Address;

use super::{Vault, VaultError};

impl Vault {
    pub fn balance_of(&self, account: &Address) -> u128 {
        self.ledger.balance_of(account)
    }

    pub fn total_supply(&self) -> u128 {
        self.ledger.total_supply()
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> Result<(), VaultError> {
        self.guarded(|vault| Ok(vault.ledger.transfer(from, to, amount)?))
    }

    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: u128,
    ) -> Result<(), VaultError> {
        self.guarded(|vault| Ok(vault.ledger.transfer_from(spender, from, to, amount)?))
    }

    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: u128) -> Result<(), VaultError> {
        Ok(self.ledger.approve(owner, spender, amount)?)
    }

    pub fn increase_allowance(&mut self, owner: &Address, spender: &Address, added: u128) -> Result<u128, VaultError> {
        Ok(self.ledger.increase_allowance(owner, spender, added)?)
    }

    pub fn decrease_allowance(
        &mut self,
        owner: &Address,
        spender: &Address,
        subtracted: u128,
    ) -> Result<u128, VaultError> {
        Ok(self.ledger.decrease_allowance(owner, spender, subtracted)?)
    }

    pub fn rebase_opt_in(&mut self, account: &Address) -> Result<(), VaultError> {
        self.guarded(|vault| Ok(vault.ledger.rebase_opt_in(account)?))
    }

    pub fn rebase_opt_out(&mut self, account: &Address) -> Result<(), VaultError> {
        self.guarded(|vault| Ok(vault.ledger.rebase_opt_out(account)?))
    }

    /// Moves a contract account to `target` on its behalf.
    pub fn governance_rebase_state(
        &mut self,
        caller: &Address,
        account: &Address,
        target: RebaseState,
    ) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.guarded(|vault| Ok(vault.ledger.change_rebase_state(account, target)?))
    }

    /// Sends `from`'s yield to `to`.
    pub fn delegate_yield(&mut self, caller: &Address, from: &Address, to: &Address) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.guarded(|vault| Ok(vault.ledger.delegate_yield(from, to)?))
    }

    pub fn undelegate_yield(&mut self, caller: &Address, from: &Address) -> Result<(), VaultError> {
        self.access.require_governor_or_strategist(caller)?;
        self.guarded(|vault| Ok(vault.ledger.undelegate_yield(from)?))
    }

    /// Records that code now lives at `address`.
    pub fn register_contract(&mut self, address: Address) -> Result<(), VaultError> {
        Ok(self.ledger.deploy_contract(address)?)
    }

    /// Records that the code at `address` self-destructed.
    pub fn destroy_contract(&mut self, address: &Address) -> Result<(), VaultError> {
        Ok(self.ledger.destroy_contract(address)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use cash_protocol::config::{VaultConfig, UNIT};

    #[test]
    fn transfers_follow_rebases() {
        let mut h = harness(VaultConfig::default());
        let (anna, ben) = (addr("anna"), addr("ben"));
        mint(&mut h, &anna, usdc(), 100 * USDC);
        h.vault.transfer(&anna, &ben, 50 * UNIT).unwrap();

        h.bank.credit(addr("friend"), usdc(), 10 * USDC);
        h.vault.donate(&addr("friend"), &usdc(), 10 * USDC).unwrap();
        h.vault.rebase(&governor()).unwrap();
        assert_eq!(h.vault.balance_of(&anna), 55 * UNIT);
        assert_eq!(h.vault.balance_of(&ben), 55 * UNIT);
    }

    #[test]
    fn contract_holders_are_frozen_on_first_touch() {
        let mut h = harness(VaultConfig::default());
        let anna = addr("anna");
        let pool = addr("pool");
        h.vault.register_contract(pool).unwrap();
        mint(&mut h, &anna, usdc(), 100 * USDC);
        h.vault.transfer(&anna, &pool, 40 * UNIT).unwrap();
        assert_eq!(h.vault.ledger().rebase_state(&pool), RebaseState::StdNonRebasing);

        h.bank.credit(addr("friend"), usdc(), 60 * USDC);
        h.vault.donate(&addr("friend"), &usdc(), 60 * USDC).unwrap();
        h.vault.rebase(&governor()).unwrap();
        assert_eq!(h.vault.balance_of(&pool), 40 * UNIT);
        assert_eq!(h.vault.balance_of(&anna), 120 * UNIT);
    }

    #[test]
    fn governor_opts_a_contract_back_into_rebasing() {
        let mut h = harness(VaultConfig::default());
        let (anna, pool) = (addr("anna"), addr("pool"));
        h.vault.register_contract(pool).unwrap();
        mint(&mut h, &anna, usdc(), 100 * USDC);
        h.vault.transfer(&anna, &pool, 40 * UNIT).unwrap();

        let err = h
            .vault
            .governance_rebase_state(&anna, &pool, RebaseState::StdRebasing)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AccessDenied);
        h.vault
            .governance_rebase_state(&governor(), &pool, RebaseState::StdRebasing)
            .unwrap();
        assert_eq!(h.vault.ledger().rebase_state(&pool), RebaseState::StdRebasing);

        h.bank.credit(addr("friend"), usdc(), 60 * USDC);
        h.vault.donate(&addr("friend"), &usdc(), 60 * USDC).unwrap();
        h.vault.rebase(&governor()).unwrap();
        assert_eq!(h.vault.balance_of(&pool), 64 * UNIT);
        assert_eq!(h.vault.balance_of(&anna), 96 * UNIT);
    }

    #[test]
    fn allowances_gate_transfer_from() {
        let mut h = harness(VaultConfig::default());
        let (anna, ben, dex) = (addr("anna"), addr("ben"), addr("dex"));
        mint(&mut h, &anna, usdc(), 10 * USDC);
        h.vault.approve(&anna, &dex, 4 * UNIT).unwrap();

        assert!(h.vault.transfer_from(&dex, &anna, &ben, 5 * UNIT).is_err());
        h.vault.transfer_from(&dex, &anna, &ben, 4 * UNIT).unwrap();
        assert_eq!(h.vault.balance_of(&ben), 4 * UNIT);
        assert_eq!(h.vault.ledger().allowance(&anna, &dex), 0);
    }

    #[test]
    fn delegation_needs_a_role() {
        let mut h = harness(VaultConfig::default());
        let err = h
            .vault
            .delegate_yield(&addr("anna"), &addr("a"), &addr("b"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AccessDenied);
    }

    #[test]
    fn delegated_yield_accrues_to_the_target() {
        let mut h = harness(VaultConfig::default());
        let (source, target) = (addr("source"), addr("target"));
        mint(&mut h, &source, usdc(), 100 * USDC);
        mint(&mut h, &target, usdc(), 100 * USDC);
        h.vault.delegate_yield(&governor(), &source, &target).unwrap();

        h.bank.credit(addr("friend"), usdc(), 20 * USDC);
        h.vault.donate(&addr("friend"), &usdc(), 20 * USDC).unwrap();
        h.vault.rebase(&governor()).unwrap();
        assert_eq!(h.vault.balance_of(&source), 100 * UNIT);
        assert_eq!(h.vault.balance_of(&target), 120 * UNIT);
    }
}

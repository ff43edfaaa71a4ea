//! Integration tests for the CASH unit ledger.
//!
//! These walk the ledger through the sequences that matter in production:
//! a mixed population of rebasing holders and contract pools, a contract
//! destroyed and redeployed at the same address, and yield delegation
//! between accounts. Every test finishes by checking that the books close.

use cash_protocol::config::{RebasePolicy, UNIT};
use cash_protocol::ledger::{LedgerError, RebaseOutcome, RebaseState, UnitLedger};
use cash_protocol::Address;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn addr(label: &str) -> Address {
    Address::from_label(label)
}

fn units(n: u128) -> u128 {
    n * UNIT
}

/// Asserts that observable balances add up to the recorded supply.
fn assert_books_close(ledger: &UnitLedger) {
    assert_eq!(
        ledger.sum_of_balances(),
        ledger.total_supply(),
        "sum of balances diverged from total supply"
    );
}

/// Two rebasing holders with 100 each: the 200-unit vault.
fn seeded() -> UnitLedger {
    let mut ledger = UnitLedger::new();
    ledger.mint(&addr("matt"), units(100)).unwrap();
    ledger.mint(&addr("josh"), units(100)).unwrap();
    ledger
}

// ---------------------------------------------------------------------------
// Mixed Population
// ---------------------------------------------------------------------------

#[test]
fn rebase_scales_rebasing_holders_and_spares_the_pool() {
    let mut ledger = seeded();
    let (anna, pool) = (addr("anna"), addr("pool"));
    ledger.deploy_contract(pool).unwrap();

    ledger.mint(&anna, units(100)).unwrap();
    assert_eq!(ledger.total_supply(), units(300));

    ledger.transfer(&anna, &pool, units(50)).unwrap();
    assert_eq!(ledger.rebase_state(&pool), RebaseState::StdNonRebasing);
    assert_eq!(ledger.non_rebasing_supply(), units(50));

    let outcome = ledger.rebase(units(330), &RebasePolicy::default()).unwrap();
    assert!(matches!(
        outcome,
        RebaseOutcome::Applied { previous, current, .. }
            if previous == units(300) && current == units(330)
    ));

    assert_eq!(ledger.balance_of(&addr("matt")), units(112));
    assert_eq!(ledger.balance_of(&addr("josh")), units(112));
    assert_eq!(ledger.balance_of(&anna), units(56));
    assert_eq!(ledger.balance_of(&pool), units(50));
    assert_eq!(ledger.total_supply(), units(330));
    assert_books_close(&ledger);
}

#[test]
fn transfers_across_rebase_states_keep_supply_exact() {
    let mut ledger = seeded();
    let pool = addr("pool");
    ledger.deploy_contract(pool).unwrap();
    ledger.change_supply(units(237)).unwrap();

    ledger.transfer(&addr("matt"), &pool, units(33)).unwrap();
    ledger.transfer(&pool, &addr("josh"), units(7)).unwrap();
    ledger.rebase_opt_out(&addr("josh")).unwrap();
    ledger.transfer(&addr("josh"), &addr("matt"), units(1)).unwrap();
    ledger.change_supply(units(250)).unwrap();

    assert_eq!(ledger.balance_of(&pool), units(26));
    assert_books_close(&ledger);
    let rebasing = ledger.total_supply() - ledger.non_rebasing_supply();
    assert_eq!(
        rebasing,
        ledger.rebasing_credits() * UNIT / ledger.rebasing_credits_per_token()
    );
}

#[test]
fn opting_back_in_preserves_balance_at_the_instant() {
    let mut ledger = seeded();
    let matt = addr("matt");
    ledger.rebase_opt_out(&matt).unwrap();
    ledger.change_supply(units(250)).unwrap();
    assert_eq!(ledger.balance_of(&matt), units(100));

    ledger.rebase_opt_in(&matt).unwrap();
    assert_eq!(ledger.balance_of(&matt), units(100));
    assert_eq!(ledger.non_rebasing_supply(), 0);
    assert_books_close(&ledger);
}

// ---------------------------------------------------------------------------
// Destroy and Recreate
// ---------------------------------------------------------------------------

#[test]
fn recreated_contract_resumes_its_entry() {
    let mut ledger = seeded();
    let reborn = addr("reborn");

    ledger.deploy_contract(reborn).unwrap();
    ledger.mint(&reborn, units(1)).unwrap();
    assert_eq!(ledger.balance_of(&reborn), units(1));

    ledger.destroy_contract(&reborn).unwrap();
    assert!(!ledger.is_contract(&reborn));
    assert_eq!(ledger.balance_of(&reborn), units(1));

    ledger.deploy_contract(reborn).unwrap();
    ledger.mint(&reborn, units(1)).unwrap();

    assert_eq!(ledger.balance_of(&reborn), units(2));
    assert_eq!(ledger.non_rebasing_supply(), units(2));
    assert_eq!(ledger.contracts().record(&reborn).unwrap().deployments, 2);
    assert_books_close(&ledger);
}

#[test]
fn destroyed_contract_balance_survives_a_rebase() {
    let mut ledger = seeded();
    let reborn = addr("reborn");
    ledger.deploy_contract(reborn).unwrap();
    ledger.transfer(&addr("matt"), &reborn, units(40)).unwrap();
    ledger.destroy_contract(&reborn).unwrap();

    ledger.change_supply(units(320)).unwrap();
    ledger.deploy_contract(reborn).unwrap();
    ledger.transfer(&reborn, &addr("josh"), units(10)).unwrap();

    assert_eq!(ledger.balance_of(&reborn), units(30));
    assert_books_close(&ledger);
}

// ---------------------------------------------------------------------------
// Yield Delegation
// ---------------------------------------------------------------------------

#[test]
fn delegated_yield_accrues_to_the_target() {
    let mut ledger = seeded();
    let (matt, josh) = (addr("matt"), addr("josh"));

    ledger.delegate_yield(&matt, &josh).unwrap();
    assert_eq!(ledger.rebase_state(&matt), RebaseState::YieldDelegationSource);
    assert_eq!(ledger.rebase_state(&josh), RebaseState::YieldDelegationTarget);
    assert_eq!(ledger.balance_of(&matt), units(100));
    assert_eq!(ledger.balance_of(&josh), units(100));
    assert_eq!(ledger.non_rebasing_supply(), 0);

    ledger.change_supply(units(220)).unwrap();
    assert_eq!(ledger.balance_of(&matt), units(100));
    assert_eq!(ledger.balance_of(&josh), units(120));
    assert_books_close(&ledger);

    ledger.undelegate_yield(&matt).unwrap();
    assert_eq!(ledger.rebase_state(&matt), RebaseState::StdNonRebasing);
    assert_eq!(ledger.rebase_state(&josh), RebaseState::StdRebasing);
    assert_eq!(ledger.balance_of(&josh), units(120));
    assert_eq!(ledger.non_rebasing_supply(), units(100));
    assert_books_close(&ledger);
}

#[test]
fn transfers_out_of_a_delegation_source_move_the_backing() {
    let mut ledger = seeded();
    let (matt, josh, anna) = (addr("matt"), addr("josh"), addr("anna"));
    ledger.delegate_yield(&matt, &josh).unwrap();

    ledger.transfer(&matt, &anna, units(25)).unwrap();
    assert_eq!(ledger.balance_of(&matt), units(75));
    assert_eq!(ledger.balance_of(&josh), units(100));
    assert_eq!(ledger.balance_of(&anna), units(25));
    assert_books_close(&ledger);
}

#[test]
fn delegation_chains_are_rejected() {
    let mut ledger = seeded();
    let (matt, josh, anna) = (addr("matt"), addr("josh"), addr("anna"));
    ledger.delegate_yield(&matt, &josh).unwrap();

    assert_eq!(
        ledger.delegate_yield(&josh, &anna),
        Err(LedgerError::AccountDelegating { account: josh })
    );
    assert_eq!(
        ledger.rebase_opt_out(&matt),
        Err(LedgerError::AccountDelegating { account: matt })
    );
    assert_eq!(
        ledger.delegate_yield(&anna, &anna),
        Err(LedgerError::SelfDelegation)
    );
}

#[test]
fn losses_that_would_strand_a_delegation_are_refused() {
    let mut ledger = UnitLedger::new();
    let (dana, anna) = (addr("dana"), addr("anna"));
    ledger.mint(&dana, 2).unwrap();
    ledger.delegate_yield(&dana, &anna).unwrap();

    let err = ledger.change_supply(1).unwrap_err();
    assert!(matches!(err, LedgerError::DelegationShortfall { target, .. } if target == anna));
    assert_eq!(ledger.total_supply(), 2);
    assert_eq!(ledger.balance_of(&dana), 2);
    assert_books_close(&ledger);

    let err = ledger.rebase(1, &RebasePolicy::default()).unwrap_err();
    assert!(matches!(err, LedgerError::DelegationShortfall { .. }));
}

//! Integration tests for allocation, rebalancing and draining.
//!
//! Strategies are in-memory hold strategies; the test keeps a handle to each
//! one so it can inspect holdings and inject failures from outside.

use cash_contracts::vault::{RebalanceClass, StrategyWeight, Vault, VaultError, VaultParams};
use cash_contracts::ErrorKind;
use cash_protocol::config::{TieBreak, VaultConfig, PRICE_ONE, UNIT, WAD};
use cash_protocol::external::{FixedPriceOracle, HoldStrategy, InMemoryBank, Strategy};
use cash_protocol::Address;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const USDC: u128 = 1_000_000;

fn addr(label: &str) -> Address {
    Address::from_label(label)
}

fn governor() -> Address {
    addr("governor")
}

fn strategist() -> Address {
    addr("strategist")
}

fn usdc() -> Address {
    addr("USDC")
}

fn dai() -> Address {
    addr("DAI")
}

/// A vault holding 1000 USDC idle with strategies `a` and `b` approved.
fn setup(config: VaultConfig) -> (Vault, HoldStrategy, HoldStrategy) {
    let oracle = FixedPriceOracle::new();
    oracle.set_price(usdc(), PRICE_ONE);
    oracle.set_price(dai(), PRICE_ONE);
    let bank = InMemoryBank::new();
    let mut vault = Vault::new(VaultParams {
        address: addr("vault"),
        unit_token: addr("CASH"),
        governor: governor(),
        config,
        oracle: Box::new(oracle),
        bank: Box::new(bank.clone()),
    })
    .unwrap();
    vault.support_asset(&governor(), usdc(), 6).unwrap();
    vault.support_asset(&governor(), dai(), 18).unwrap();
    vault.set_strategist(&governor(), Some(strategist())).unwrap();

    let a = HoldStrategy::new("a", &[(usdc(), 6), (dai(), 18)]);
    let b = HoldStrategy::new("b", &[(usdc(), 6)]);
    vault.approve_strategy(&governor(), addr("a"), Box::new(a.clone())).unwrap();
    vault.approve_strategy(&governor(), addr("b"), Box::new(b.clone())).unwrap();

    bank.credit(addr("anna"), usdc(), 1_000 * USDC);
    vault.mint(&addr("anna"), &usdc(), 1_000 * USDC, 0).unwrap();
    (vault, a, b)
}

// ---------------------------------------------------------------------------
// Rebalance
// ---------------------------------------------------------------------------

#[test]
fn weights_route_idle_funds_to_their_targets() {
    let (mut vault, a, b) = setup(VaultConfig::default());
    let report = vault
        .set_strategy_with_weights(
            &strategist(),
            vec![
                StrategyWeight::new(addr("a"), 0, 6_000, 10_000),
                StrategyWeight::new(addr("b"), 0, 4_000, 10_000),
            ],
        )
        .unwrap();

    assert_eq!(a.check_balance(), 600 * UNIT);
    assert_eq!(b.check_balance(), 400 * UNIT);
    assert_eq!(report.total_deposited, 1_000 * UNIT);
    assert_eq!(report.idle_used, 1_000 * UNIT);
    assert_eq!(report.slippage, 0);
    assert_eq!(vault.total_value().unwrap(), 1_000 * UNIT);
}

#[test]
fn shifting_weights_moves_value_without_creating_any() {
    let (mut vault, a, b) = setup(VaultConfig::default());
    vault
        .set_strategy_with_weights(
            &governor(),
            vec![
                StrategyWeight::new(addr("a"), 0, 6_000, 10_000),
                StrategyWeight::new(addr("b"), 0, 4_000, 10_000),
            ],
        )
        .unwrap();

    let report = vault
        .set_strategy_with_weights(
            &governor(),
            vec![
                StrategyWeight::new(addr("a"), 0, 2_000, 10_000),
                StrategyWeight::new(addr("b"), 0, 8_000, 10_000),
            ],
        )
        .unwrap();

    assert_eq!(report.plan[0].class, RebalanceClass::OverTarget);
    assert_eq!(report.total_withdrawn, 400 * UNIT);
    assert_eq!(report.total_deposited, 400 * UNIT);
    assert_eq!(report.idle_used, 0);
    assert_eq!(report.value_before, report.value_after);
    assert_eq!(a.check_balance(), 200 * UNIT);
    assert_eq!(b.check_balance(), 800 * UNIT);
}

#[test]
fn over_max_strategies_are_drawn_down_first() {
    let (mut vault, a, b) = setup(VaultConfig {
        tie_break: TieBreak::LargestDeviationFirst,
        ..VaultConfig::default()
    });
    vault
        .set_strategy_with_weights(&governor(), vec![StrategyWeight::new(addr("a"), 0, 10_000, 10_000)])
        .unwrap();
    assert_eq!(a.check_balance(), 1_000 * UNIT);

    let report = vault
        .set_strategy_with_weights(
            &governor(),
            vec![
                StrategyWeight::new(addr("a"), 0, 3_000, 5_000),
                StrategyWeight::new(addr("b"), 5_000, 7_000, 10_000),
            ],
        )
        .unwrap();
    let classes: Vec<RebalanceClass> = report.plan.iter().map(|m| m.class).collect();
    assert_eq!(classes, vec![RebalanceClass::OverMax, RebalanceClass::UnderMin]);
    assert_eq!(a.check_balance(), 300 * UNIT);
    assert_eq!(b.check_balance(), 700 * UNIT);
}

#[test]
fn target_weights_above_full_allocation_are_rejected() {
    let (mut vault, _, _) = setup(VaultConfig::default());
    let err = vault
        .set_strategy_with_weights(
            &governor(),
            vec![
                StrategyWeight::new(addr("a"), 0, 6_000, 10_000),
                StrategyWeight::new(addr("b"), 0, 4_001, 10_000),
            ],
        )
        .unwrap_err();
    assert_eq!(err, VaultError::WeightSumExceeded { total: 10_001 });
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(vault.weights().is_empty());
}

#[test]
fn a_failing_strategy_is_skipped_and_reported() {
    let (mut vault, a, b) = setup(VaultConfig::default());
    b.set_failing(usdc(), true);
    let report = vault
        .set_strategy_with_weights(
            &governor(),
            vec![
                StrategyWeight::new(addr("a"), 0, 5_000, 10_000),
                StrategyWeight::new(addr("b"), 0, 5_000, 10_000),
            ],
        )
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].strategy, addr("b"));
    assert_eq!(a.check_balance(), 500 * UNIT);
    assert_eq!(vault.idle_balance(&usdc()), 500 * USDC);
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[test]
fn allocate_keeps_the_vault_buffer() {
    let (mut vault, a, _) = setup(VaultConfig {
        vault_buffer: WAD / 10,
        ..VaultConfig::default()
    });
    vault
        .set_asset_default_strategy(&governor(), usdc(), Some(addr("a")))
        .unwrap();
    vault.allocate().unwrap();
    assert_eq!(a.check_balance(), 900 * UNIT);
    assert_eq!(vault.idle_balance(&usdc()), 100 * USDC);
}

#[test]
fn quick_allocation_uses_only_the_listed_strategies() {
    let (mut vault, a, b) = setup(VaultConfig::default());
    vault
        .set_quick_deposit_strategies(&governor(), vec![addr("b")])
        .unwrap();
    let report = vault.quick_allocate(&strategist(), &usdc(), 250 * USDC).unwrap();
    assert_eq!(report.deposits.len(), 1);
    assert_eq!(b.asset_balance(&usdc()), 250 * USDC);
    assert_eq!(a.check_balance(), 0);
}

// ---------------------------------------------------------------------------
// Draining
// ---------------------------------------------------------------------------

#[test]
fn draining_every_strategy_tolerates_a_stuck_asset() {
    let (mut vault, a, b) = setup(VaultConfig::default());
    vault
        .set_strategy_with_weights(
            &governor(),
            vec![
                StrategyWeight::new(addr("a"), 0, 5_000, 10_000),
                StrategyWeight::new(addr("b"), 0, 5_000, 10_000),
            ],
        )
        .unwrap();
    a.set_failing(usdc(), true);

    let report = vault.withdraw_all_from_strategies(&strategist()).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].strategy, addr("a"));
    assert_eq!(b.check_balance(), 0);
    assert_eq!(a.check_balance(), 500 * UNIT);
    assert_eq!(vault.idle_balance(&usdc()), 500 * USDC);
    assert_eq!(vault.total_value().unwrap(), 1_000 * UNIT);
}

#[test]
fn strangers_cannot_move_funds() {
    let (mut vault, _, _) = setup(VaultConfig::default());
    let err = vault.withdraw_all_from_strategies(&addr("anna")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    assert!(vault.balance(&addr("anna")).is_err());
}

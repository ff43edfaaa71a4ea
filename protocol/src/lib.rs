// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CASH Protocol Core Library
//!
//! Primitives for a multi-asset, yield-bearing stablecoin. Users deposit
//! supported stable assets into a pooled vault and receive CASH, a rebasing
//! token whose balances grow as the pool earns yield.
//!
//! This crate holds the parts that every other layer leans on:
//!
//! - **ledger**: The rebasing token. Credits, credits-per-token, opt-outs,
//!   yield delegation, and the self-destruct/recreate resistant registry.
//! - **math**: Fixed-point helpers over a 256-bit intermediate.
//! - **address**: 20-byte account identities.
//! - **access**: Governor / Strategist / Rebase Manager roles.
//! - **guard**: Reentrancy guard for balance-mutating entry points.
//! - **external**: Interfaces for the collaborators the protocol consumes
//!   but does not own (strategies, price oracles, token custody, swaps),
//!   plus in-memory implementations for simulation and tests.
//! - **config**: Protocol constants and tunable configuration.
//!
//! ## Design Philosophy
//!
//! 1. Derived quantities (balances, total value) are computed on read and
//!    never cached.
//! 2. Every amount is a `u128` in the smallest denomination, and every
//!    operation on one is checked.
//! 3. State transitions are enums with explicit transition functions, not
//!    boolean flags.
//! 4. If it touches money, it has tests. Plural.

pub mod access;
pub mod address;
pub mod config;
pub mod external;
pub mod guard;
pub mod ledger;
pub mod math;

pub use address::Address;

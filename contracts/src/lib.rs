// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CASH Protocol Contracts
//!
//! The stateful components of the CASH stablecoin, built on the primitives
//! in `cash-protocol`:
//!
//! - **Vault**: mint and redeem against supported stables, valuation,
//!   allocation into strategies, weight-based rebalancing, rebases, and the
//!   governance surface.
//! - **Harvester**: collects strategy rewards, swaps them into the primary
//!   stable and splits off the Labs and Team fees.
//! - **Dripper**: releases harvested yield into the vault linearly over
//!   time.
//! - **CashProtocol**: wires the above together and runs the scheduled
//!   payout.
//! - **VaultValueChecker**: bounds the value effect of strategist
//!   operations.
//! - **WrappedCash**: a non-rebasing share wrapper over the unit token.
//!
//! ## Calling Convention
//!
//! Every privileged entry point takes the caller's address first and checks
//! its role before touching state. Time is always passed in explicitly,
//! as Unix seconds or a `DateTime<Utc>`, and nothing here reads a clock.
//!
//! ## Errors
//!
//! Each component has its own error enum. All of them classify into
//! [`ErrorKind`] through `kind()`.

pub mod dripper;
pub mod error;
pub mod harvester;
pub mod system;
pub mod value_checker;
pub mod vault;
pub mod wrapped;

pub use dripper::{DripError, DripReport, DripState, Dripper};
pub use error::ErrorKind;
pub use harvester::{FeeSplit, HarvestAllReport, HarvestError, HarvestReport, Harvester};
pub use system::{CashProtocol, PayoutReport, ProtocolAddresses, ProtocolError, ProtocolParams};
pub use value_checker::{ValueCheckError, VaultValueChecker};
pub use vault::{StrategyWeight, Vault, VaultError, VaultParams, VaultSnapshot};
pub use wrapped::{WrapError, WrappedCash};

//! # Rebasing Unit Ledger
//!
//! The CASH token. Holders' balances grow when the vault earns yield,
//! without anyone sending them tokens: a rebase lowers the global
//! credits-per-token rate and every rebasing balance rises with it.
//!
//! ## Components
//!
//! - [`UnitLedger`]: accounts, credits, global aggregates, supply changes,
//!   transfers and allowances.
//! - [`RebaseState`]: the per-account state machine (rebasing, opted out,
//!   delegating yield).
//! - [`ContractRegistry`]: which addresses carry code. Contracts stop
//!   rebasing the first time they are touched, and a contract destroyed
//!   and recreated at the same address resumes its old ledger entry.
//!
//! ## Invariants
//!
//! 1. `total_supply == Σ balance_of(account)`, up to one unit of rounding
//!    per rebasing account after a rebase.
//! 2. `total_supply - non_rebasing_supply == rebasing_credits / rebasing_credits_per_token`.
//! 3. A rebase leaves every non-rebasing balance exactly unchanged.
//! 4. Entries are never deleted.

pub mod account;
pub mod error;
pub mod registry;
pub mod token;

pub use account::{Account, RebaseState};
pub use error::LedgerError;
pub use registry::{CodeStatus, ContractRegistry};
pub use token::{RebaseOutcome, SkipReason, UnitLedger};

//! # External Collaborators
//!
//! The protocol consumes four kinds of outside service and owns none of
//! them. Each sits behind a trait so the vault, harvester and dripper can be
//! wired to real integrations or to the in-memory implementations here.
//!
//! | Trait          | In-memory implementation | Used by                |
//! |----------------|--------------------------|------------------------|
//! | [`Strategy`]   | [`HoldStrategy`]         | vault allocator        |
//! | [`PriceOracle`]| [`FixedPriceOracle`]     | vault mint / redeem    |
//! | [`AssetBank`]  | [`InMemoryBank`]         | vault, harvester       |
//! | [`Swapper`]    | [`FixedRateSwapper`]     | harvester              |

pub mod bank;
pub mod hold_strategy;
pub mod oracle;
pub mod strategy;
pub mod swapper;

pub use bank::{AssetBank, BankError, InMemoryBank};
pub use hold_strategy::HoldStrategy;
pub use oracle::{FixedPriceOracle, OracleError, PriceOracle};
pub use strategy::{Reward, Strategy, StrategyError, WithdrawAllReport};
pub use swapper::{FixedRateSwapper, SwapError, Swapper};

//! The yield-strategy interface the vault allocates into.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;

/// Failures reported by a strategy. The vault treats each as a failed leg
/// of whatever batch it was running.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StrategyError {
    #[error("asset {0} is not supported by this strategy")]
    UnsupportedAsset(Address),

    #[error("strategy holds {available} of {asset}, {requested} requested")]
    InsufficientBalance {
        asset: Address,
        available: u128,
        requested: u128,
    },

    /// The underlying venue refused or failed the operation.
    #[error("{asset} is unavailable: {reason}")]
    Unavailable { asset: Address, reason: String },
}

/// A reward token balance handed over by `collect_rewards`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub token: Address,
    pub amount: u128,
}

/// Outcome of draining a strategy, one entry per underlying asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawAllReport {
    /// `(asset, amount)` legs that reached the recipient.
    pub withdrawn: Vec<(Address, u128)>,
    /// `(asset, error)` legs that stayed behind.
    pub failed: Vec<(Address, StrategyError)>,
}

impl WithdrawAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A yield source behind a uniform deposit/withdraw/value interface.
///
/// Values reported by [`check_balance`](Strategy::check_balance) and
/// [`net_asset_value`](Strategy::net_asset_value) are USD amounts with 18
/// decimals. Asset amounts are in the asset's own decimals.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    /// Human-readable label for logs.
    fn name(&self) -> &str;

    /// Underlying assets, in a stable order.
    fn assets(&self) -> Vec<Address>;

    fn supports_asset(&self, asset: &Address) -> bool {
        self.assets().contains(asset)
    }

    /// Takes custody of `amount` of `asset`, already sent by the vault.
    fn deposit(&mut self, asset: &Address, amount: u128) -> Result<(), StrategyError>;

    /// Sends `amount` of `asset` to `recipient`. Returns the amount delivered.
    fn withdraw(
        &mut self,
        recipient: &Address,
        asset: &Address,
        amount: u128,
    ) -> Result<u128, StrategyError>;

    /// Sends everything back to `recipient`, asset by asset. A failing asset
    /// is reported and does not stop the others.
    fn withdraw_all(&mut self, recipient: &Address) -> WithdrawAllReport;

    /// Total holdings valued at par.
    fn check_balance(&self) -> u128;

    /// Holdings valued at market. May differ from `check_balance` while an
    /// LP position is imbalanced.
    fn net_asset_value(&self) -> u128;

    /// Raw holdings of one asset.
    fn asset_balance(&self, asset: &Address) -> u128;

    /// Hands over accrued reward tokens.
    fn collect_rewards(&mut self) -> Result<Vec<Reward>, StrategyError>;

    /// What the next `collect_rewards` would hand over, without handing it.
    fn pending_rewards(&self) -> Result<Vec<Reward>, StrategyError> {
        Ok(Vec::new())
    }
}

use thiserror::Error;

use cash_protocol::access::AccessError;
use cash_protocol::config::ConfigError;
use cash_protocol::external::{BankError, OracleError, StrategyError};
use cash_protocol::guard::GuardError;
use cash_protocol::ledger::LedgerError;
use cash_protocol::math::MathError;
use cash_protocol::Address;

use crate::error::{ledger_kind, ErrorKind};

/// Errors raised by [`Vault`](super::Vault) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Reentrant(#[from] GuardError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// A token transfer in or out of the vault failed. Nothing was applied.
    #[error("token transfer failed: {0}")]
    Transfer(#[from] BankError),

    #[error("strategy call failed: {0}")]
    Strategy(#[from] StrategyError),

    #[error("capital is paused")]
    CapitalPaused,

    #[error("rebasing is paused")]
    RebasingPaused,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("asset {0} is not supported")]
    AssetNotSupported(Address),

    #[error("asset {0} is already supported")]
    AssetAlreadySupported(Address),

    #[error("strategy {0} is not approved")]
    StrategyNotApproved(Address),

    #[error("strategy {0} is already approved")]
    StrategyAlreadyApproved(Address),

    #[error("strategy {strategy} does not support asset {asset}")]
    StrategyUnsupportedAsset { strategy: Address, asset: Address },

    /// The strategy is still the default for an asset.
    #[error("strategy {strategy} is the default strategy for {asset}")]
    StrategyInUse { strategy: Address, asset: Address },

    /// Draining the strategy left funds behind.
    #[error("strategy {strategy} could not be fully drained ({failed} asset legs failed)")]
    StrategyNotEmpty { strategy: Address, failed: usize },

    #[error("no primary stable asset is configured")]
    PrimaryStableNotSet,

    /// Supported assets can only leave through redeem.
    #[error("asset {0} is supported and cannot be transferred out")]
    CannotTransferSupportedAsset(Address),

    /// Oracle price below the configured peg floor.
    #[error("asset {asset} price {price} is below the peg floor {floor}")]
    BelowPeg {
        asset: Address,
        /// Oracle price, 8 decimals.
        price: u128,
        /// Lowest acceptable price, 8 decimals.
        floor: u128,
    },

    #[error("mint would produce {units} units, below the minimum {minimum}")]
    MintBelowMinimum { units: u128, minimum: u128 },

    #[error("redeem would pay {output} units of value, below the minimum {minimum}")]
    RedeemBelowMinimum { output: u128, minimum: u128 },

    /// Total value and total supply are too far apart for redemptions.
    #[error("backing deviation {deviation} exceeds maximum {max} (value {total_value}, supply {total_supply})")]
    BackingDeviation {
        total_value: u128,
        total_supply: u128,
        /// Relative deviation, WAD.
        deviation: u128,
        /// Permitted deviation, WAD.
        max: u128,
    },

    /// Idle funds plus what strategies released do not cover a payout.
    #[error("insufficient liquidity for {asset}: {available} available, {requested} requested")]
    InsufficientLiquidity {
        asset: Address,
        available: u128,
        requested: u128,
    },

    #[error("strategy {0} appears more than once in the weight table")]
    DuplicateWeight(Address),

    #[error("weights for {strategy} must satisfy min <= target <= max <= 10000")]
    InvalidWeightBounds { strategy: Address },

    #[error("target weights sum to {total} bps, above 10000")]
    WeightSumExceeded { total: u128 },

    #[error("payout not due: next payout at {next_payout_time}, now {now}")]
    PayoutTooEarly { now: u64, next_payout_time: u64 },
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Access(_) => ErrorKind::AccessDenied,
            VaultError::Ledger(err) => ledger_kind(err),
            VaultError::Math(_) => ErrorKind::Arithmetic,
            VaultError::Config(_) | VaultError::ZeroAmount | VaultError::PrimaryStableNotSet => {
                ErrorKind::InvalidInput
            }
            VaultError::WeightSumExceeded { .. } | VaultError::InvalidWeightBounds { .. } => {
                ErrorKind::InvalidInput
            }
            VaultError::Reentrant(_)
            | VaultError::CapitalPaused
            | VaultError::RebasingPaused
            | VaultError::BelowPeg { .. }
            | VaultError::MintBelowMinimum { .. }
            | VaultError::RedeemBelowMinimum { .. }
            | VaultError::BackingDeviation { .. }
            | VaultError::PayoutTooEarly { .. } => ErrorKind::PolicyViolation,
            VaultError::Oracle(_)
            | VaultError::AssetNotSupported(_)
            | VaultError::AssetAlreadySupported(_)
            | VaultError::StrategyNotApproved(_)
            | VaultError::StrategyAlreadyApproved(_)
            | VaultError::StrategyUnsupportedAsset { .. }
            | VaultError::StrategyInUse { .. }
            | VaultError::CannotTransferSupportedAsset(_)
            | VaultError::DuplicateWeight(_) => ErrorKind::InvalidReference,
            VaultError::Transfer(_)
            | VaultError::Strategy(_)
            | VaultError::StrategyNotEmpty { .. }
            | VaultError::InsufficientLiquidity { .. } => ErrorKind::PartialExternalFailure,
        }
    }
}

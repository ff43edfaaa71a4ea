use thiserror::Error;

use super::account::RebaseState;
use crate::address::Address;
use crate::math::MathError;

/// Errors raised by [`UnitLedger`](super::UnitLedger) operations.
///
/// Every error leaves the ledger untouched: validation happens before the
/// first write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The account cannot cover the debit.
    #[error("insufficient balance: {account} has {balance}, needs {requested}")]
    InsufficientBalance {
        account: Address,
        balance: u128,
        requested: u128,
    },

    /// The spender's allowance cannot cover the transfer.
    #[error("insufficient allowance: {spender} may move {allowance} of {owner}'s balance, needs {requested}")]
    InsufficientAllowance {
        owner: Address,
        spender: Address,
        allowance: u128,
        requested: u128,
    },

    /// The zero address was used as a participant.
    #[error("the zero address cannot hold a balance")]
    ZeroAddress,

    /// A mint would push total supply past the ceiling.
    #[error("minting {requested} would exceed the maximum supply")]
    SupplyCapExceeded { requested: u128 },

    /// Supply changes need an existing supply to scale.
    #[error("cannot change the supply of an empty ledger")]
    ZeroSupply,

    /// The requested supply leaves nothing (or less than nothing) for
    /// rebasing holders.
    #[error("invalid change in supply: {new_total} does not exceed non-rebasing supply {non_rebasing_supply}")]
    InvalidSupplyChange {
        new_total: u128,
        non_rebasing_supply: u128,
    },

    /// The proposed supply is further from the current one than policy allows.
    #[error("supply deviation {deviation} exceeds maximum {max} (current {current}, proposed {proposed})")]
    SupplyDeviation {
        current: u128,
        proposed: u128,
        /// Relative deviation, WAD.
        deviation: u128,
        /// Permitted deviation, WAD.
        max: u128,
    },

    /// A supply decrease would leave a delegation target holding less
    /// than the frozen balance of the source it backs.
    #[error("supply {new_total} would leave delegation target {target} short: backs {required}, holds {available}")]
    DelegationShortfall {
        new_total: u128,
        target: Address,
        required: u128,
        available: u128,
    },

    #[error("account {account} is already rebasing")]
    AlreadyRebasing { account: Address },

    #[error("account {account} is already non-rebasing")]
    AlreadyNonRebasing { account: Address },

    /// Opt-in/out is not available while yield delegation is in place.
    #[error("account {account} is part of a yield delegation")]
    AccountDelegating { account: Address },

    #[error("account {account} is not delegating its yield")]
    NotDelegating { account: Address },

    #[error("an account cannot delegate yield to itself")]
    SelfDelegation,

    #[error("account {account} cannot move from {from} to {to}")]
    InvalidTransition {
        account: Address,
        from: RebaseState,
        to: RebaseState,
    },

    /// `destroy_contract` on an address with no live code.
    #[error("no active contract at {0}")]
    ContractNotActive(Address),

    #[error(transparent)]
    Math(#[from] MathError),
}

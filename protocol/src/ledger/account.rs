//! Per-account ledger entries and the rebase-state machine.

use serde::{Deserialize, Serialize};

use crate::address::Address;

// ---------------------------------------------------------------------------
// RebaseState
// ---------------------------------------------------------------------------

/// How an account's balance responds to rebases.
///
/// ```text
///             opt_out                 delegate_source
///  Unknown ──────────► StdNonRebasing ◄──────────────► YieldDelegationSource
///     │                  ▲      │        undelegate
///     │ opt_in   opt_out │      │ opt_in
///     ▼                  │      ▼        delegate_target
///     └────────────────► StdRebasing  ◄──────────────► YieldDelegationTarget
///                                          undelegate
/// ```
///
/// `Unknown` is the state of an account the ledger has never been told
/// about. It rebases, unless the account is a contract, in which case the
/// first balance change moves it to `StdNonRebasing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RebaseState {
    #[default]
    Unknown,
    StdNonRebasing,
    StdRebasing,
    /// Balance is frozen; the yield it would earn goes to the target.
    YieldDelegationSource,
    /// Earns yield on its own balance plus its source's.
    YieldDelegationTarget,
}

impl RebaseState {
    /// True for either side of a yield delegation.
    pub fn is_delegating(self) -> bool {
        matches!(
            self,
            RebaseState::YieldDelegationSource | RebaseState::YieldDelegationTarget
        )
    }

    /// The state after opting out of rebasing.
    pub fn opt_out(self) -> Option<RebaseState> {
        match self {
            RebaseState::Unknown | RebaseState::StdRebasing => Some(RebaseState::StdNonRebasing),
            _ => None,
        }
    }

    /// The state after opting into rebasing.
    pub fn opt_in(self) -> Option<RebaseState> {
        match self {
            RebaseState::Unknown | RebaseState::StdNonRebasing => Some(RebaseState::StdRebasing),
            _ => None,
        }
    }

    /// The state of an account that starts delegating its yield away.
    pub fn delegate_source(self) -> Option<RebaseState> {
        if self.is_delegating() {
            None
        } else {
            Some(RebaseState::YieldDelegationSource)
        }
    }

    /// The state of an account that starts receiving delegated yield.
    pub fn delegate_target(self) -> Option<RebaseState> {
        if self.is_delegating() {
            None
        } else {
            Some(RebaseState::YieldDelegationTarget)
        }
    }

    /// The state once a delegation is dissolved. Sources stay frozen,
    /// targets keep rebasing.
    pub fn undelegate(self) -> Option<RebaseState> {
        match self {
            RebaseState::YieldDelegationSource => Some(RebaseState::StdNonRebasing),
            RebaseState::YieldDelegationTarget => Some(RebaseState::StdRebasing),
            _ => None,
        }
    }
}

impl std::fmt::Display for RebaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebaseState::Unknown => write!(f, "Unknown"),
            RebaseState::StdNonRebasing => write!(f, "StdNonRebasing"),
            RebaseState::StdRebasing => write!(f, "StdRebasing"),
            RebaseState::YieldDelegationSource => write!(f, "YieldDelegationSource"),
            RebaseState::YieldDelegationTarget => write!(f, "YieldDelegationTarget"),
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One ledger entry. Created on first credit, never deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Internal units. Balance is `credits * 1e18 / credits_per_token`.
    pub credits: u128,
    /// Snapshot of the credits-per-token rate taken when the account
    /// stopped rebasing. `None` means the account follows the global rate.
    pub frozen_credits_per_token: Option<u128>,
    pub state: RebaseState,
    /// Set on a delegation source: who earns its yield.
    pub yield_to: Option<Address>,
    /// Set on a delegation target: whose yield it earns.
    pub yield_from: Option<Address>,
}

impl Account {
    /// True when the balance is frozen against rebases.
    pub fn is_frozen(&self) -> bool {
        self.frozen_credits_per_token.is_some()
    }
}

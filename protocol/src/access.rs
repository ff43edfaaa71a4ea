//! # Roles & Access Control
//!
//! Three roles gate who may initiate state transitions:
//!
//! - **Governor**: full administrative control. Handed off in two steps
//!   (`transfer_governance` then `claim_governance`) so a typo in the new
//!   address cannot brick the protocol.
//! - **Strategist**: operational control: pausing, allocation, weights.
//! - **Rebase Manager**: may trigger rebases. The dripper is registered as
//!   one so `collect_and_rebase` can finish its job.
//!
//! Checks run before any state is read beyond the role table itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::address::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A caller lacks the role an operation requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("caller {caller} is not the Governor")]
    NotGovernor { caller: Address },

    #[error("caller {caller} is not the Governor or Strategist")]
    NotGovernorOrStrategist { caller: Address },

    #[error("caller {caller} is not the Governor or a Rebase Manager")]
    NotRebaseCaller { caller: Address },

    /// Only the address nominated by `transfer_governance` may claim.
    #[error("caller {caller} is not the pending Governor")]
    NotPendingGovernor { caller: Address },

    #[error("the zero address cannot hold a role")]
    ZeroAddress,
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The roles a caller can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Governor,
    Strategist,
    RebaseManager,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Governor => write!(f, "Governor"),
            Role::Strategist => write!(f, "Strategist"),
            Role::RebaseManager => write!(f, "RebaseManager"),
        }
    }
}

// ---------------------------------------------------------------------------
// AccessControl
// ---------------------------------------------------------------------------

/// The role table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    governor: Address,
    pending_governor: Option<Address>,
    strategist: Option<Address>,
    rebase_managers: BTreeSet<Address>,
}

impl AccessControl {
    /// A table with only a Governor.
    pub fn new(governor: Address) -> Self {
        Self {
            governor,
            pending_governor: None,
            strategist: None,
            rebase_managers: BTreeSet::new(),
        }
    }

    pub fn governor(&self) -> Address {
        self.governor
    }

    pub fn pending_governor(&self) -> Option<Address> {
        self.pending_governor
    }

    pub fn strategist(&self) -> Option<Address> {
        self.strategist
    }

    pub fn is_rebase_manager(&self, account: &Address) -> bool {
        self.rebase_managers.contains(account)
    }

    /// Every role `account` holds.
    pub fn roles_of(&self, account: &Address) -> Vec<Role> {
        let mut roles = Vec::new();
        if *account == self.governor {
            roles.push(Role::Governor);
        }
        if self.strategist == Some(*account) {
            roles.push(Role::Strategist);
        }
        if self.is_rebase_manager(account) {
            roles.push(Role::RebaseManager);
        }
        roles
    }

    // -- Checks -------------------------------------------------------------

    pub fn require_governor(&self, caller: &Address) -> Result<(), AccessError> {
        if *caller == self.governor {
            Ok(())
        } else {
            Err(AccessError::NotGovernor { caller: *caller })
        }
    }

    pub fn require_governor_or_strategist(&self, caller: &Address) -> Result<(), AccessError> {
        if *caller == self.governor || self.strategist == Some(*caller) {
            Ok(())
        } else {
            Err(AccessError::NotGovernorOrStrategist { caller: *caller })
        }
    }

    pub fn require_rebase_caller(&self, caller: &Address) -> Result<(), AccessError> {
        if *caller == self.governor || self.is_rebase_manager(caller) {
            Ok(())
        } else {
            Err(AccessError::NotRebaseCaller { caller: *caller })
        }
    }

    // -- Mutations ----------------------------------------------------------

    /// Nominates a new Governor. Takes effect once they claim.
    pub fn transfer_governance(
        &mut self,
        caller: &Address,
        new_governor: Address,
    ) -> Result<(), AccessError> {
        self.require_governor(caller)?;
        if new_governor.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        self.pending_governor = Some(new_governor);
        tracing::info!(current = %self.governor, pending = %new_governor, "governance transfer started");
        Ok(())
    }

    /// Completes a handoff started by [`transfer_governance`](Self::transfer_governance).
    pub fn claim_governance(&mut self, caller: &Address) -> Result<(), AccessError> {
        match self.pending_governor {
            Some(pending) if pending == *caller => {
                let previous = self.governor;
                self.governor = pending;
                self.pending_governor = None;
                tracing::info!(previous = %previous, governor = %pending, "governance claimed");
                Ok(())
            }
            _ => Err(AccessError::NotPendingGovernor { caller: *caller }),
        }
    }

    pub fn set_strategist(
        &mut self,
        caller: &Address,
        strategist: Option<Address>,
    ) -> Result<(), AccessError> {
        self.require_governor(caller)?;
        self.strategist = strategist;
        Ok(())
    }

    pub fn add_rebase_manager(
        &mut self,
        caller: &Address,
        manager: Address,
    ) -> Result<(), AccessError> {
        self.require_governor(caller)?;
        if manager.is_zero() {
            return Err(AccessError::ZeroAddress);
        }
        self.rebase_managers.insert(manager);
        Ok(())
    }

    /// Returns whether `manager` was registered.
    pub fn remove_rebase_manager(
        &mut self,
        caller: &Address,
        manager: &Address,
    ) -> Result<bool, AccessError> {
        self.require_governor(caller)?;
        Ok(self.rebase_managers.remove(manager))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gov() -> Address {
        Address::from_label("governor")
    }

    #[test]
    fn governance_handoff_takes_two_steps() {
        let new_gov = Address::from_label("new-governor");
        let mut access = AccessControl::new(gov());

        access.transfer_governance(&gov(), new_gov).unwrap();
        // Nothing changes until the nominee claims.
        assert_eq!(access.governor(), gov());
        assert_eq!(access.pending_governor(), Some(new_gov));

        access.claim_governance(&new_gov).unwrap();
        assert_eq!(access.governor(), new_gov);
        assert_eq!(access.pending_governor(), None);
        assert!(access.require_governor(&gov()).is_err());
    }

    #[test]
    fn only_the_nominee_can_claim() {
        let mut access = AccessControl::new(gov());
        access
            .transfer_governance(&gov(), Address::from_label("nominee"))
            .unwrap();

        let intruder = Address::from_label("intruder");
        assert_eq!(
            access.claim_governance(&intruder),
            Err(AccessError::NotPendingGovernor { caller: intruder })
        );
    }

    #[test]
    fn non_governor_cannot_start_a_transfer() {
        let mut access = AccessControl::new(gov());
        let anna = Address::from_label("anna");
        assert_eq!(
            access.transfer_governance(&anna, anna),
            Err(AccessError::NotGovernor { caller: anna })
        );
    }

    #[test]
    fn strategist_passes_operational_checks_only() {
        let strategist = Address::from_label("strategist");
        let mut access = AccessControl::new(gov());
        access.set_strategist(&gov(), Some(strategist)).unwrap();

        assert!(access.require_governor_or_strategist(&strategist).is_ok());
        assert!(access.require_governor(&strategist).is_err());
        assert!(access.require_rebase_caller(&strategist).is_err());
        assert_eq!(access.roles_of(&strategist), vec![Role::Strategist]);
    }

    #[test]
    fn rebase_managers_can_be_added_and_removed() {
        let dripper = Address::from_label("dripper");
        let mut access = AccessControl::new(gov());

        assert!(access.require_rebase_caller(&dripper).is_err());
        access.add_rebase_manager(&gov(), dripper).unwrap();
        assert!(access.require_rebase_caller(&dripper).is_ok());

        assert!(access.remove_rebase_manager(&gov(), &dripper).unwrap());
        assert!(!access.remove_rebase_manager(&gov(), &dripper).unwrap());
        assert!(access.require_rebase_caller(&dripper).is_err());
    }
}

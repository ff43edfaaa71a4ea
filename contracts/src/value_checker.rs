//! # Vault Value Checker
//!
//! A guard rail for strategist operations. Take a snapshot before a
//! rebalance, then check afterwards that profit (value minus supply) and
//! total value moved by no more than the strategist expected, within a
//! variance. Snapshots are kept per caller and expire after ten minutes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use cash_protocol::access::AccessError;
use cash_protocol::config::SNAPSHOT_EXPIRY_SECS;
use cash_protocol::math::MathError;
use cash_protocol::Address;

use crate::error::ErrorKind;
use crate::vault::{Vault, VaultError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueCheckError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error("no snapshot taken by {0}")]
    NoSnapshot(Address),

    #[error("snapshot taken at {taken_at} has expired")]
    SnapshotExpired { taken_at: DateTime<Utc> },

    #[error("profit change {actual} outside {expected} ± {variance}")]
    ProfitOutOfRange {
        actual: i128,
        expected: i128,
        variance: u128,
    },

    #[error("value change {actual} outside {expected} ± {variance}")]
    ValueChangeOutOfRange {
        actual: i128,
        expected: i128,
        variance: u128,
    },
}

impl ValueCheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValueCheckError::Access(_) => ErrorKind::AccessDenied,
            ValueCheckError::Vault(err) => err.kind(),
            ValueCheckError::Math(_) => ErrorKind::Arithmetic,
            ValueCheckError::NoSnapshot(_) | ValueCheckError::SnapshotExpired { .. } => ErrorKind::InvalidInput,
            ValueCheckError::ProfitOutOfRange { .. } | ValueCheckError::ValueChangeOutOfRange { .. } => {
                ErrorKind::PolicyViolation
            }
        }
    }
}

/// Vault totals at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSnapshot {
    pub total_value: u128,
    pub total_supply: u128,
    pub taken_at: DateTime<Utc>,
}

/// What changed between a snapshot and the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDelta {
    /// Change in `total_value - total_supply`, 18 decimals.
    pub profit: i128,
    /// Change in `total_value`, 18 decimals.
    pub value_change: i128,
}

#[derive(Debug, Default)]
pub struct VaultValueChecker {
    snapshots: BTreeMap<Address, ValueSnapshot>,
}

impl VaultValueChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, caller: &Address) -> Option<&ValueSnapshot> {
        self.snapshots.get(caller)
    }

    /// Records the vault's totals for `caller`. Governor or Strategist.
    pub fn take_snapshot(
        &mut self,
        caller: &Address,
        vault: &Vault,
        now: DateTime<Utc>,
    ) -> Result<ValueSnapshot, ValueCheckError> {
        vault.access().require_governor_or_strategist(caller)?;
        let snapshot = ValueSnapshot {
            total_value: vault.total_value()?,
            total_supply: vault.total_supply(),
            taken_at: now,
        };
        info!(
            caller = %caller,
            total_value = snapshot.total_value,
            total_supply = snapshot.total_supply,
            "value snapshot taken"
        );
        self.snapshots.insert(*caller, snapshot.clone());
        Ok(snapshot)
    }

    /// Compares the vault against `caller`'s snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn check_delta(
        &self,
        caller: &Address,
        vault: &Vault,
        now: DateTime<Utc>,
        expected_profit: i128,
        profit_variance: u128,
        expected_value_change: i128,
        value_variance: u128,
    ) -> Result<ValueDelta, ValueCheckError> {
        let snapshot = self
            .snapshots
            .get(caller)
            .ok_or(ValueCheckError::NoSnapshot(*caller))?;
        if now - snapshot.taken_at > Duration::seconds(SNAPSHOT_EXPIRY_SECS) {
            return Err(ValueCheckError::SnapshotExpired {
                taken_at: snapshot.taken_at,
            });
        }

        let value_before = signed(snapshot.total_value)?;
        let value_after = signed(vault.total_value()?)?;
        let supply_before = signed(snapshot.total_supply)?;
        let supply_after = signed(vault.total_supply())?;

        let value_change = value_after.checked_sub(value_before).ok_or(MathError::Overflow)?;
        let supply_change = supply_after.checked_sub(supply_before).ok_or(MathError::Overflow)?;
        let profit = value_change.checked_sub(supply_change).ok_or(MathError::Overflow)?;

        if !within(profit, expected_profit, profit_variance) {
            warn!(caller = %caller, profit, expected_profit, profit_variance, "profit out of range");
            return Err(ValueCheckError::ProfitOutOfRange {
                actual: profit,
                expected: expected_profit,
                variance: profit_variance,
            });
        }
        if !within(value_change, expected_value_change, value_variance) {
            warn!(caller = %caller, value_change, expected_value_change, value_variance, "value change out of range");
            return Err(ValueCheckError::ValueChangeOutOfRange {
                actual: value_change,
                expected: expected_value_change,
                variance: value_variance,
            });
        }
        Ok(ValueDelta { profit, value_change })
    }
}

fn signed(value: u128) -> Result<i128, MathError> {
    i128::try_from(value).map_err(|_| MathError::Overflow)
}

fn within(actual: i128, expected: i128, variance: u128) -> bool {
    actual.abs_diff(expected) <= variance
}

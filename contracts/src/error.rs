//! Error classification shared by every contract.
//!
//! Each contract defines its own error enum. All of them map onto one
//! [`ErrorKind`] so callers (the node, an operator dashboard) can decide
//! what to do without matching every variant.

use serde::{Deserialize, Serialize};

use cash_protocol::ledger::LedgerError;

/// What kind of failure an error represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A protocol rule refused the call: price below peg, output below the
    /// caller's minimum, supply deviation above the configured maximum,
    /// paused operations.
    PolicyViolation,
    /// The caller lacks the required role.
    AccessDenied,
    /// The call named an asset, strategy or account the protocol does not
    /// recognise in that position.
    InvalidReference,
    /// A collaborator outside the protocol (strategy, token, swap venue)
    /// failed.
    PartialExternalFailure,
    /// Bad parameters: zero amounts, out-of-range configuration,
    /// insufficient balance or allowance.
    InvalidInput,
    /// Overflow, underflow or division by zero.
    Arithmetic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::PolicyViolation => write!(f, "policy violation"),
            ErrorKind::AccessDenied => write!(f, "access denied"),
            ErrorKind::InvalidReference => write!(f, "invalid reference"),
            ErrorKind::PartialExternalFailure => write!(f, "external failure"),
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::Arithmetic => write!(f, "arithmetic"),
        }
    }
}

/// Classification of ledger failures as seen from a contract.
pub(crate) fn ledger_kind(err: &LedgerError) -> ErrorKind {
    match err {
        LedgerError::SupplyDeviation { .. } | LedgerError::DelegationShortfall { .. } => {
            ErrorKind::PolicyViolation
        }
        LedgerError::Math(_) => ErrorKind::Arithmetic,
        LedgerError::ContractNotActive(_) => ErrorKind::InvalidReference,
        _ => ErrorKind::InvalidInput,
    }
}

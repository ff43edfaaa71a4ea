//! Which addresses carry contract code.
//!
//! An address can host a contract, lose it to self-destruct, and host a new
//! one later. The registry remembers every address it has seen and only
//! flips its status, so the ledger entry behind that address is never reset
//! or duplicated by a destroy/recreate cycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::address::Address;

/// Whether code currently lives at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeStatus {
    Active,
    Destroyed,
}

/// History of one contract address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub status: CodeStatus,
    /// How many times code has been deployed here.
    pub deployments: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRegistry {
    records: BTreeMap<Address, ContractRecord>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks code as deployed at `address`, creating or reactivating the record.
    pub fn deploy(&mut self, address: Address) {
        let record = self.records.entry(address).or_insert(ContractRecord {
            status: CodeStatus::Destroyed,
            deployments: 0,
        });
        record.status = CodeStatus::Active;
        record.deployments = record.deployments.saturating_add(1);
    }

    /// Marks the code at `address` destroyed. Returns `false` if there was
    /// no live code to destroy.
    pub fn destroy(&mut self, address: &Address) -> bool {
        match self.records.get_mut(address) {
            Some(record) if record.status == CodeStatus::Active => {
                record.status = CodeStatus::Destroyed;
                true
            }
            _ => false,
        }
    }

    /// True while code lives at `address`.
    pub fn has_code(&self, address: &Address) -> bool {
        matches!(
            self.records.get(address),
            Some(ContractRecord {
                status: CodeStatus::Active,
                ..
            })
        )
    }

    pub fn record(&self, address: &Address) -> Option<&ContractRecord> {
        self.records.get(address)
    }
}

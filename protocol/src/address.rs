//! # Addresses
//!
//! Every participant in the protocol (users, contracts, strategies, assets,
//! fee recipients) is identified by a 20-byte [`Address`]. Ledger entries,
//! asset registries and strategy registries are all keyed by it.
//!
//! Addresses render as `0x`-prefixed lowercase hex and serialize as that
//! string, so maps keyed by `Address` come out as ordinary JSON objects.
//! [`Address::from_label`] derives a stable address from a human label,
//! which keeps fixtures and scenario files readable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// A 20-byte account identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

/// Errors from parsing an address string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AddressError {
    /// The input is not valid hex.
    #[error("invalid hex in address: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The input decodes to the wrong number of bytes.
    #[error("address must be {ADDRESS_LENGTH} bytes, got {0}")]
    InvalidLength(usize),
}

impl Address {
    /// The all-zero address. Never a valid participant.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Derives an address from a label: the first 20 bytes of
    /// `BLAKE3("cash-address" || 0x00 || label)`.
    pub fn from_label(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cash-address");
        hasher.update(&[0x00]);
        hasher.update(label.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses hex with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(AddressError::InvalidLength(bytes.len()));
        }
        let mut arr = [0u8; ADDRESS_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// True for [`Address::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}...)", &self.to_hex()[..10])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn labels_derive_stable_distinct_addresses() {
        let matt = Address::from_label("matt");
        assert_eq!(matt, Address::from_label("matt"));
        assert_ne!(matt, Address::from_label("josh"));
        assert!(!matt.is_zero());
    }

    #[test]
    fn hex_round_trip_with_and_without_prefix() {
        let addr = Address::from_label("vault");
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 42);
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex[2..]).unwrap(), addr);
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(
            Address::from_hex("0xdeadbeef"),
            Err(AddressError::InvalidLength(4))
        );
        assert!(matches!(
            Address::from_hex("0xzz"),
            Err(AddressError::InvalidHex(_))
        ));
        assert_eq!(
            Address::from_hex("0xabc"),
            Err(AddressError::InvalidHex(hex::FromHexError::OddLength))
        );
    }

    #[test]
    fn maps_keyed_by_address_serialize_as_objects() {
        let mut balances = BTreeMap::new();
        balances.insert(Address::from_label("a"), 7u64);
        let json = serde_json::to_string(&balances).unwrap();
        assert!(json.starts_with("{\"0x"));
        let back: BTreeMap<Address, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, balances);
    }
}

//! # Protocol Configuration & Constants
//!
//! Every magic number in CASH lives here, along with the tunable
//! configuration structs the vault and harvester are built from.
//!
//! Fractions come in two flavours and mixing them up is the classic way to
//! lose a decimal point: fees and weights are basis points (`10_000` = 100%),
//! buffers and thresholds are WAD fractions (`1e18` = 100%).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Unit Token
// ---------------------------------------------------------------------------

/// Decimal places of the CASH unit token.
pub const UNIT_DECIMALS: u8 = 18;

/// One whole CASH in its smallest denomination.
pub const UNIT: u128 = 1_000_000_000_000_000_000;

/// Credits per token a fresh ledger starts at. Nine extra digits of
/// resolution over the token itself keep per-account rounding below the
/// smallest denomination for a very long run of positive rebases.
pub const INITIAL_CREDITS_PER_TOKEN: u128 = 1_000_000_000_000_000_000_000_000_000;

/// Hard ceiling on total supply. Rebases clamp to it.
pub const MAX_SUPPLY: u128 = u128::MAX / 1_000_000_000_000;

// ---------------------------------------------------------------------------
// Fixed-Point Scales
// ---------------------------------------------------------------------------

/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// WAD fixed-point one. 1e18 = 100%.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Oracle prices carry eight decimal places.
pub const PRICE_DECIMALS: u8 = 8;

/// A price of exactly 1.00 USD in oracle precision.
pub const PRICE_ONE: u128 = 100_000_000;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Mint is blocked when an asset trades more than 2% below the peg.
pub const DEFAULT_PEG_TOLERANCE_BPS: u16 = 200;

/// Payouts run once a day...
pub const DEFAULT_PAYOUT_PERIOD_SECS: u64 = 24 * 60 * 60;

/// ...and may be triggered up to fifteen minutes early.
pub const DEFAULT_PAYOUT_TIME_RANGE_SECS: u64 = 15 * 60;

/// Value-checker snapshots older than this are stale.
pub const SNAPSHOT_EXPIRY_SECS: i64 = 10 * 60;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A configuration value outside its permitted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A basis-point value above 100%.
    #[error("{field} must be at most 10000 bps, got {value}")]
    BpsOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u128,
    },

    /// A WAD fraction above 1e18.
    #[error("{field} must be at most 1e18, got {value}")]
    FractionOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u128,
    },

    /// The early-payout window must be shorter than the payout period.
    #[error("payout time range ({range}s) must be shorter than the payout period ({period}s)")]
    InvalidPayoutIntervals {
        /// Payout period in seconds.
        period: u64,
        /// Early window in seconds.
        range: u64,
    },

    /// Labs and Team fees together exceed 100%.
    #[error("combined fee of {total} bps exceeds 10000")]
    FeeSumExceeded {
        /// Labs plus Team basis points.
        total: u128,
    },
}

// ---------------------------------------------------------------------------
// Policy Enums
// ---------------------------------------------------------------------------

/// How redemptions pay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeemMode {
    /// Everything is paid in the primary stable asset.
    #[default]
    PrimaryStable,
    /// Each supported asset pays its share of pool value.
    Proportional,
}

/// Ordering of strategies that land in the same rebalance priority class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The order strategies were approved in.
    #[default]
    RegistrationOrder,
    /// Largest absolute distance from target first; registration order
    /// among equals.
    LargestDeviationFirst,
}

// ---------------------------------------------------------------------------
// RebasePolicy
// ---------------------------------------------------------------------------

/// The two knobs the ledger consults when asked to rebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RebasePolicy {
    /// Relative supply change (WAD) below which a rebase is skipped as noise.
    pub rebase_threshold: u128,
    /// Relative supply change (WAD) above which a rebase is refused.
    /// Zero disables the check.
    pub max_supply_diff: u128,
}

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Tunable vault parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Fee withheld from minted units, in bps.
    pub mint_fee_bps: u16,
    /// Fee withheld from redemptions, in bps.
    pub redeem_fee_bps: u16,
    /// Maximum relative gap (WAD) between total supply and pool value before
    /// rebase and redeem are blocked. Zero disables the check.
    pub max_supply_diff: u128,
    /// Share of total value (WAD) kept liquid in the vault.
    pub vault_buffer: u128,
    /// Idle value (18 decimals) at which a mint triggers allocation.
    /// Zero disables auto-allocation.
    pub auto_allocate_threshold: u128,
    /// Relative supply change (WAD) below which rebases are skipped.
    pub rebase_threshold: u128,
    /// How far below 1.00 an asset may trade before mint is refused.
    pub peg_tolerance_bps: u16,
    /// Redemption payout shape.
    pub redeem_mode: RedeemMode,
    /// Rebalance ordering within a priority class.
    pub tie_break: TieBreak,
    /// Seconds between scheduled payouts.
    pub payout_period: u64,
    /// Seconds before the scheduled time a payout may already run.
    pub payout_time_range: u64,
}

impl VaultConfig {
    /// Checks every field against its permitted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bps("mint_fee_bps", self.mint_fee_bps as u128)?;
        check_bps("redeem_fee_bps", self.redeem_fee_bps as u128)?;
        check_bps("peg_tolerance_bps", self.peg_tolerance_bps as u128)?;
        check_fraction("vault_buffer", self.vault_buffer)?;
        check_fraction("rebase_threshold", self.rebase_threshold)?;
        if self.payout_time_range >= self.payout_period {
            return Err(ConfigError::InvalidPayoutIntervals {
                period: self.payout_period,
                range: self.payout_time_range,
            });
        }
        Ok(())
    }

    /// The ledger-facing subset of this config.
    pub fn rebase_policy(&self) -> RebasePolicy {
        RebasePolicy {
            rebase_threshold: self.rebase_threshold,
            max_supply_diff: self.max_supply_diff,
        }
    }

    /// Lowest oracle price (8 decimals) at which minting is allowed.
    pub fn peg_floor(&self) -> u128 {
        PRICE_ONE * (BPS_DENOMINATOR - self.peg_tolerance_bps as u128) / BPS_DENOMINATOR
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            mint_fee_bps: 0,
            redeem_fee_bps: 0,
            max_supply_diff: 0,
            vault_buffer: 0,
            auto_allocate_threshold: 0,
            rebase_threshold: 0,
            peg_tolerance_bps: DEFAULT_PEG_TOLERANCE_BPS,
            redeem_mode: RedeemMode::default(),
            tie_break: TieBreak::default(),
            payout_period: DEFAULT_PAYOUT_PERIOD_SECS,
            payout_time_range: DEFAULT_PAYOUT_TIME_RANGE_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// HarvesterConfig
// ---------------------------------------------------------------------------

/// A party that takes a cut of harvested rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecipient {
    /// Where the fee is sent.
    pub address: Address,
    /// Share of harvested proceeds, in bps.
    pub fee_bps: u16,
}

/// Fee split applied to harvested proceeds before they reach the dripper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    pub labs: FeeRecipient,
    pub team: FeeRecipient,
}

impl HarvesterConfig {
    /// Both recipients with a zero fee.
    pub fn new(labs: Address, team: Address) -> Self {
        Self {
            labs: FeeRecipient {
                address: labs,
                fee_bps: 0,
            },
            team: FeeRecipient {
                address: team,
                fee_bps: 0,
            },
        }
    }

    /// Rejects a combined fee above 100%.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let total = self.labs.fee_bps as u128 + self.team.fee_bps as u128;
        if total > BPS_DENOMINATOR {
            return Err(ConfigError::FeeSumExceeded { total });
        }
        Ok(())
    }
}

fn check_bps(field: &'static str, value: u128) -> Result<(), ConfigError> {
    if value > BPS_DENOMINATOR {
        return Err(ConfigError::BpsOutOfRange { field, value });
    }
    Ok(())
}

fn check_fraction(field: &'static str, value: u128) -> Result<(), ConfigError> {
    if value > WAD {
        return Err(ConfigError::FractionOutOfRange { field, value });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(VaultConfig::default().validate().is_ok());
    }

    #[test]
    fn vault_buffer_above_one_is_rejected() {
        let config = VaultConfig {
            vault_buffer: WAD + 1,
            ..VaultConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FractionOutOfRange {
                field: "vault_buffer",
                value: WAD + 1
            })
        );
    }

    #[test]
    fn payout_window_must_fit_in_period() {
        let config = VaultConfig {
            payout_period: 60,
            payout_time_range: 60,
            ..VaultConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPayoutIntervals { .. })
        ));
    }

    #[test]
    fn peg_floor_tracks_tolerance() {
        let config = VaultConfig::default();
        assert_eq!(config.peg_floor(), 98_000_000);

        let strict = VaultConfig {
            peg_tolerance_bps: 0,
            ..VaultConfig::default()
        };
        assert_eq!(strict.peg_floor(), PRICE_ONE);
    }

    #[test]
    fn harvester_fee_sum_is_bounded() {
        let mut config = HarvesterConfig::new(Address::from_label("labs"), Address::from_label("team"));
        config.labs.fee_bps = 6_000;
        config.team.fee_bps = 4_000;
        assert!(config.validate().is_ok());

        config.team.fee_bps = 4_001;
        assert_eq!(
            config.validate(),
            Err(ConfigError::FeeSumExceeded { total: 10_001 })
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: VaultConfig =
            serde_json::from_str(r#"{ "redeem_fee_bps": 25, "redeem_mode": "proportional" }"#)
                .unwrap();
        assert_eq!(config.redeem_fee_bps, 25);
        assert_eq!(config.redeem_mode, RedeemMode::Proportional);
        assert_eq!(config.peg_tolerance_bps, DEFAULT_PEG_TOLERANCE_BPS);
    }
}

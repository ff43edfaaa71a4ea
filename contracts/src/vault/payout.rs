//! The payout schedule.
//!
//! Payouts are due every `payout_period` seconds and may run up to
//! `payout_time_range` seconds early. The schedule only ever advances by
//! whole periods, so an early or late payout never shifts later ones.

use tracing::info;

use cash_protocol::Address;

use super::{Vault, VaultError};

impl Vault {
    /// Fails unless a payout may run at `now`.
    pub fn check_payout_window(&self, now: u64) -> Result<(), VaultError> {
        if now.saturating_add(self.config.payout_time_range) > self.next_payout_time {
            Ok(())
        } else {
            Err(VaultError::PayoutTooEarly {
                now,
                next_payout_time: self.next_payout_time,
            })
        }
    }

    /// Moves the next payout past `now + payout_time_range`. Returns the new
    /// scheduled time.
    pub(crate) fn advance_payout_schedule(&mut self, now: u64) -> u64 {
        let horizon = now.saturating_add(self.config.payout_time_range);
        if self.next_payout_time <= horizon {
            let period = self.config.payout_period.max(1);
            let periods = (horizon - self.next_payout_time) / period + 1;
            self.next_payout_time = self
                .next_payout_time
                .saturating_add(periods.saturating_mul(period));
        }
        info!(now, next_payout_time = self.next_payout_time, "payout schedule advanced");
        self.next_payout_time
    }

    pub fn set_next_payout_time(&mut self, caller: &Address, next_payout_time: u64) -> Result<(), VaultError> {
        self.access.require_governor(caller)?;
        self.next_payout_time = next_payout_time;
        info!(next_payout_time, "next payout time set");
        Ok(())
    }
}

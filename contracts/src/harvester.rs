//! # Harvester
//!
//! Collects strategy rewards, converts them into the vault's primary stable
//! asset, takes the Labs and Team fees, and forwards the rest to the
//! [`Dripper`].
//!
//! ## Inventory
//!
//! Everything the harvester holds is tracked per token. Rewards that cannot
//! be swapped stay as inventory and are offered to the swapper again on the
//! next harvest. Fee legs that fail to transfer stay here too, as retained
//! primary stable, and are included in the next distribution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use cash_protocol::access::AccessError;
use cash_protocol::config::{ConfigError, FeeRecipient, HarvesterConfig};
use cash_protocol::external::{AssetBank, Reward, StrategyError, Swapper};
use cash_protocol::guard::{GuardError, ReentrancyGuard};
use cash_protocol::math::{self, MathError};
use cash_protocol::Address;

use crate::dripper::{DripError, Dripper};
use crate::error::ErrorKind;
use crate::vault::Vault;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Reentrant(#[from] GuardError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error(transparent)]
    Drip(#[from] DripError),

    /// The address is not an approved strategy of the vault.
    #[error("invalid strategy {0}")]
    InvalidStrategy(Address),

    #[error("reward collection from {strategy} failed: {source}")]
    Collect {
        strategy: Address,
        source: StrategyError,
    },

    #[error("the vault has no primary stable asset")]
    NoPrimaryStable,
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Access(_) => ErrorKind::AccessDenied,
            HarvestError::Reentrant(_) => ErrorKind::PolicyViolation,
            HarvestError::Config(_) | HarvestError::NoPrimaryStable => ErrorKind::InvalidInput,
            HarvestError::Math(_) => ErrorKind::Arithmetic,
            HarvestError::Drip(err) => err.kind(),
            HarvestError::InvalidStrategy(_) => ErrorKind::InvalidReference,
            HarvestError::Collect { .. } => ErrorKind::PartialExternalFailure,
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A reward conversion that went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    pub from: Address,
    pub amount_in: u128,
    pub amount_out: u128,
}

/// A reward conversion that failed. The tokens stay as inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnswappedReward {
    pub token: Address,
    pub amount: u128,
    pub reason: String,
}

/// Outcome of harvesting one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestReport {
    pub strategy: Address,
    pub collected: Vec<Reward>,
    pub swaps: Vec<SwapLeg>,
    pub unswapped: Vec<UnswappedReward>,
    /// Primary stable gained by this harvest, raw units.
    pub primary_received: u128,
}

/// A fee transfer that failed. The amount stays in the harvester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLegFailure {
    pub recipient: Address,
    pub amount: u128,
    pub reason: String,
}

/// How one distribution split the harvester's primary stable balance.
///
/// `labs + team + dripper + retained == base`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub asset: Option<Address>,
    pub base: u128,
    pub labs: u128,
    pub team: u128,
    pub dripper: u128,
    pub retained: u128,
    pub failures: Vec<FeeLegFailure>,
}

/// Outcome of harvesting every reward-enabled strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestAllReport {
    pub harvests: Vec<HarvestReport>,
    /// `(strategy, reason)` for harvests that failed and were skipped.
    pub failures: Vec<(Address, String)>,
    pub split: FeeSplit,
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Harvester {
    address: Address,
    config: HarvesterConfig,
    held: BTreeMap<Address, u128>,
    swapper: Box<dyn Swapper>,
    bank: Box<dyn AssetBank>,
    guard: ReentrancyGuard,
}

impl Harvester {
    pub fn new(
        address: Address,
        config: HarvesterConfig,
        swapper: Box<dyn Swapper>,
        bank: Box<dyn AssetBank>,
    ) -> Result<Self, HarvestError> {
        config.validate()?;
        Ok(Self {
            address,
            config,
            held: BTreeMap::new(),
            swapper,
            bank,
            guard: ReentrancyGuard::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &HarvesterConfig {
        &self.config
    }

    /// Raw units of `token` held.
    pub fn held(&self, token: &Address) -> u128 {
        self.held.get(token).copied().unwrap_or(0)
    }

    /// Every non-zero holding.
    pub fn inventory(&self) -> Vec<(Address, u128)> {
        self.held
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(token, amount)| (*token, *amount))
            .collect()
    }

    // -- Governance ---------------------------------------------------------

    pub fn set_labs(&mut self, vault: &Vault, caller: &Address, labs: FeeRecipient) -> Result<(), HarvestError> {
        vault.access().require_governor(caller)?;
        let mut next = self.config.clone();
        next.labs = labs;
        self.apply_config(next)
    }

    pub fn set_team(&mut self, vault: &Vault, caller: &Address, team: FeeRecipient) -> Result<(), HarvestError> {
        vault.access().require_governor(caller)?;
        let mut next = self.config.clone();
        next.team = team;
        self.apply_config(next)
    }

    fn apply_config(&mut self, next: HarvesterConfig) -> Result<(), HarvestError> {
        next.validate()?;
        info!(
            labs = %next.labs.address,
            labs_bps = next.labs.fee_bps,
            team = %next.team.address,
            team_bps = next.team.fee_bps,
            "harvester fees set"
        );
        self.config = next;
        Ok(())
    }

    // -- Harvest ------------------------------------------------------------

    /// Collects and converts one strategy's rewards. Governor or Strategist.
    pub fn harvest(
        &mut self,
        vault: &mut Vault,
        caller: &Address,
        strategy: &Address,
    ) -> Result<HarvestReport, HarvestError> {
        vault.access().require_governor_or_strategist(caller)?;
        self.guard.enter()?;
        let result = self.harvest_strategy(vault, strategy);
        self.guard.exit();
        result
    }

    /// Splits the primary stable balance into fees and the dripper share.
    pub fn distribute_fees(
        &mut self,
        vault: &Vault,
        dripper: &mut Dripper,
        caller: &Address,
    ) -> Result<FeeSplit, HarvestError> {
        vault.access().require_governor_or_strategist(caller)?;
        self.guard.enter()?;
        let result = self.split_fees(vault, dripper);
        self.guard.exit();
        result
    }

    /// Harvests one strategy and distributes in the same call.
    pub fn harvest_and_distribute(
        &mut self,
        vault: &mut Vault,
        dripper: &mut Dripper,
        caller: &Address,
        strategy: &Address,
    ) -> Result<(HarvestReport, FeeSplit), HarvestError> {
        vault.access().require_governor_or_strategist(caller)?;
        self.guard.enter()?;
        let result = self
            .harvest_strategy(vault, strategy)
            .and_then(|report| Ok((report, self.split_fees(vault, dripper)?)));
        self.guard.exit();
        result
    }

    /// Harvests every reward-enabled strategy, then distributes once.
    pub fn harvest_and_distribute_all(
        &mut self,
        vault: &mut Vault,
        dripper: &mut Dripper,
        caller: &Address,
    ) -> Result<HarvestAllReport, HarvestError> {
        vault.access().require_governor_or_strategist(caller)?;
        self.guard.enter()?;
        let result = self.harvest_all(vault, dripper);
        self.guard.exit();
        result
    }

    /// Role-free sweep used by the payout, which has already checked its
    /// caller.
    pub(crate) fn harvest_all(
        &mut self,
        vault: &mut Vault,
        dripper: &mut Dripper,
    ) -> Result<HarvestAllReport, HarvestError> {
        let mut report = HarvestAllReport::default();
        let targets: Vec<Address> = vault
            .weights()
            .iter()
            .filter(|w| w.enabled_reward)
            .map(|w| w.strategy)
            .collect();
        for strategy in targets {
            match self.harvest_strategy(vault, &strategy) {
                Ok(harvest) => report.harvests.push(harvest),
                Err(err) => {
                    warn!(strategy = %strategy, error = %err, "harvest skipped");
                    report.failures.push((strategy, err.to_string()));
                }
            }
        }
        report.split = self.split_fees(vault, dripper)?;
        Ok(report)
    }

    /// Primary stable the next [`harvest_all`](Self::harvest_all) would hand
    /// to the dripper, worked out from pending rewards and swap quotes.
    /// Nothing is collected, swapped or paid.
    pub fn preview_dripper_share(&self, vault: &Vault) -> Result<(Address, u128), HarvestError> {
        let primary = vault.primary_stable().ok_or(HarvestError::NoPrimaryStable)?;
        let mut held = self.held.clone();
        for weight in vault.weights().iter().filter(|w| w.enabled_reward) {
            let Some(strategy) = vault.strategy(&weight.strategy) else {
                continue;
            };
            let Ok(rewards) = strategy.pending_rewards() else {
                continue;
            };
            for reward in rewards {
                let entry = held.entry(reward.token).or_insert(0);
                *entry = entry.checked_add(reward.amount).ok_or(MathError::Overflow)?;
            }
            let pending: Vec<(Address, u128)> = held
                .iter()
                .filter(|(token, amount)| **token != primary && **amount > 0)
                .map(|(token, amount)| (*token, *amount))
                .collect();
            for (token, amount) in pending {
                if let Ok(amount_out) = self.swapper.quote(&token, &primary, amount) {
                    held.insert(token, 0);
                    let entry = held.entry(primary).or_insert(0);
                    *entry = entry.checked_add(amount_out).ok_or(MathError::Overflow)?;
                }
            }
        }

        let base = held.get(&primary).copied().unwrap_or(0);
        let labs = math::bps_of(base, self.config.labs.fee_bps)?;
        let team = math::bps_of(base, self.config.team.fee_bps)?;
        Ok((primary, base - labs - team))
    }

    fn harvest_strategy(&mut self, vault: &mut Vault, strategy: &Address) -> Result<HarvestReport, HarvestError> {
        let primary = vault.primary_stable().ok_or(HarvestError::NoPrimaryStable)?;
        let collected = vault
            .strategy_mut(strategy)
            .ok_or(HarvestError::InvalidStrategy(*strategy))?
            .collect_rewards()
            .map_err(|source| HarvestError::Collect {
                strategy: *strategy,
                source,
            })?;

        let primary_before = self.held(&primary);
        for reward in &collected {
            self.credit(&reward.token, reward.amount)?;
        }

        let mut swaps = Vec::new();
        let mut unswapped = Vec::new();
        let pending: Vec<(Address, u128)> = self
            .inventory()
            .into_iter()
            .filter(|(token, _)| *token != primary)
            .collect();
        for (token, amount) in pending {
            match self.swapper.swap(&token, &primary, amount) {
                Ok(amount_out) => {
                    self.held.insert(token, 0);
                    self.credit(&primary, amount_out)?;
                    swaps.push(SwapLeg {
                        from: token,
                        amount_in: amount,
                        amount_out,
                    });
                }
                Err(err) => {
                    warn!(token = %token, amount, error = %err, "reward swap failed, keeping inventory");
                    unswapped.push(UnswappedReward {
                        token,
                        amount,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let primary_received = self.held(&primary).saturating_sub(primary_before);
        info!(
            strategy = %strategy,
            rewards = collected.len(),
            swaps = swaps.len(),
            unswapped = unswapped.len(),
            primary_received,
            "harvested"
        );
        Ok(HarvestReport {
            strategy: *strategy,
            collected,
            swaps,
            unswapped,
            primary_received,
        })
    }

    fn split_fees(&mut self, vault: &Vault, dripper: &mut Dripper) -> Result<FeeSplit, HarvestError> {
        let primary = vault.primary_stable().ok_or(HarvestError::NoPrimaryStable)?;
        let base = self.held(&primary);
        let mut split = FeeSplit {
            asset: Some(primary),
            base,
            ..FeeSplit::default()
        };
        if base == 0 {
            return Ok(split);
        }

        let labs_amount = math::bps_of(base, self.config.labs.fee_bps)?;
        let team_amount = math::bps_of(base, self.config.team.fee_bps)?;
        let recipients = [
            (self.config.labs.address, labs_amount),
            (self.config.team.address, team_amount),
        ];
        let mut paid = [0u128; 2];
        for (slot, (recipient, amount)) in recipients.iter().enumerate() {
            if *amount == 0 {
                continue;
            }
            match self.bank.push(recipient, &primary, *amount) {
                Ok(()) => paid[slot] = *amount,
                Err(err) => {
                    warn!(recipient = %recipient, amount, error = %err, "fee transfer failed");
                    split.failures.push(FeeLegFailure {
                        recipient: *recipient,
                        amount: *amount,
                        reason: err.to_string(),
                    });
                }
            }
        }
        split.labs = paid[0];
        split.team = paid[1];

        let to_dripper = base - labs_amount - team_amount;
        dripper.receive(&primary, to_dripper)?;
        split.dripper = to_dripper;
        split.retained = base - split.labs - split.team - to_dripper;
        self.held.insert(primary, split.retained);

        info!(
            base,
            labs = split.labs,
            team = split.team,
            dripper = split.dripper,
            retained = split.retained,
            "fees distributed"
        );
        Ok(split)
    }

    fn credit(&mut self, token: &Address, amount: u128) -> Result<(), HarvestError> {
        let entry = self.held.entry(*token).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(MathError::Overflow)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::fixtures::*;
    use crate::vault::StrategyWeight;
    use cash_protocol::config::{VaultConfig, WAD};
    use cash_protocol::external::{FixedRateSwapper, HoldStrategy, Strategy};

    struct Rig {
        h: Harness,
        harvester: Harvester,
        dripper: Dripper,
        swapper: FixedRateSwapper,
        strategy: (Address, HoldStrategy),
    }

    fn comp() -> Address {
        addr("COMP")
    }

    fn rig(labs_bps: u16, team_bps: u16) -> Rig {
        let mut h = harness(VaultConfig::default());
        let strategy = add_strategy(&mut h.vault, "s1");
        h.vault
            .set_strategy_with_weights(&governor(), vec![StrategyWeight::new(strategy.0, 0, 10_000, 10_000)])
            .unwrap();
        let swapper = FixedRateSwapper::new();
        swapper.set_rate(comp(), usdc(), 50 * WAD / 1_000_000_000_000);
        let mut config = HarvesterConfig::new(addr("labs"), addr("team"));
        config.labs.fee_bps = labs_bps;
        config.team.fee_bps = team_bps;
        let harvester = Harvester::new(
            addr("harvester"),
            config,
            Box::new(swapper.clone()),
            Box::new(h.bank.clone()),
        )
        .unwrap();
        let dripper = Dripper::new(addr("dripper"), Box::new(h.bank.clone()));
        Rig {
            h,
            harvester,
            dripper,
            swapper,
            strategy,
        }
    }

    #[test]
    fn rewards_are_swapped_into_the_primary_stable() {
        let mut r = rig(0, 0);
        r.strategy.1.add_reward(comp(), 2 * WAD);
        r.strategy.1.add_reward(usdc(), 5 * USDC);

        let report = r
            .harvester
            .harvest(&mut r.h.vault, &governor(), &r.strategy.0)
            .unwrap();
        assert_eq!(report.primary_received, 105 * USDC);
        assert_eq!(report.swaps.len(), 1);
        assert_eq!(r.harvester.held(&usdc()), 105 * USDC);
        assert_eq!(r.harvester.held(&comp()), 0);
    }

    #[test]
    fn failed_swaps_stay_as_inventory_until_the_next_harvest() {
        let mut r = rig(0, 0);
        r.strategy.1.add_reward(comp(), WAD);
        r.swapper.set_rejecting(comp(), true);

        let report = r
            .harvester
            .harvest(&mut r.h.vault, &governor(), &r.strategy.0)
            .unwrap();
        assert_eq!(report.unswapped.len(), 1);
        assert_eq!(r.harvester.held(&comp()), WAD);

        r.swapper.set_rejecting(comp(), false);
        let report = r
            .harvester
            .harvest(&mut r.h.vault, &governor(), &r.strategy.0)
            .unwrap();
        assert_eq!(report.primary_received, 50 * USDC);
        assert_eq!(r.harvester.held(&comp()), 0);
    }

    #[test]
    fn preview_matches_the_distribution_without_touching_anything() {
        let mut r = rig(1_000, 500);
        r.strategy.1.add_reward(comp(), 2 * WAD);
        r.strategy.1.add_reward(usdc(), 5 * USDC);

        let (asset, share) = r.harvester.preview_dripper_share(&r.h.vault).unwrap();
        assert_eq!(asset, usdc());
        assert_eq!(r.strategy.1.pending_rewards().unwrap().len(), 2);
        assert_eq!(r.harvester.held(&usdc()), 0);

        let report = r
            .harvester
            .harvest_and_distribute_all(&mut r.h.vault, &mut r.dripper, &governor())
            .unwrap();
        assert_eq!(report.split.dripper, share);
        assert_eq!(share, 105 * USDC - 10_500_000 - 5_250_000);
    }

    #[test]
    fn preview_leaves_unswappable_rewards_out() {
        let mut r = rig(0, 0);
        r.strategy.1.add_reward(comp(), WAD);
        r.swapper.set_rejecting(comp(), true);
        assert_eq!(r.harvester.preview_dripper_share(&r.h.vault).unwrap(), (usdc(), 0));
    }

    #[test]
    fn unknown_strategy_is_invalid() {
        let mut r = rig(0, 0);
        let err = r
            .harvester
            .harvest(&mut r.h.vault, &governor(), &addr("nope"))
            .unwrap_err();
        assert_eq!(err, HarvestError::InvalidStrategy(addr("nope")));
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
    }

    #[test]
    fn fees_are_split_and_the_rest_drips() {
        let mut r = rig(1_000, 1_000);
        r.strategy.1.add_reward(usdc(), 100 * USDC);
        let (_, split) = r
            .harvester
            .harvest_and_distribute(&mut r.h.vault, &mut r.dripper, &governor(), &r.strategy.0)
            .unwrap();

        assert_eq!(split.labs, 10 * USDC);
        assert_eq!(split.team, 10 * USDC);
        assert_eq!(split.dripper, 80 * USDC);
        assert_eq!(split.retained, 0);
        assert_eq!(r.h.bank.balance_of(&addr("labs"), &usdc()), 10 * USDC);
        assert_eq!(r.dripper.balance(&usdc()), 80 * USDC);
        assert_eq!(r.harvester.held(&usdc()), 0);
    }

    #[test]
    fn a_failed_fee_leg_is_retained() {
        let mut r = rig(1_000, 500);
        r.strategy.1.add_reward(usdc(), 100 * USDC);
        r.harvester
            .harvest(&mut r.h.vault, &governor(), &r.strategy.0)
            .unwrap();
        r.h.bank.set_rejecting(usdc(), true);

        let split = r
            .harvester
            .distribute_fees(&r.h.vault, &mut r.dripper, &strategist())
            .unwrap();
        assert_eq!(split.failures.len(), 2);
        assert_eq!(split.dripper, 85 * USDC);
        assert_eq!(split.retained, 15 * USDC);
        assert_eq!(split.labs + split.team + split.dripper + split.retained, split.base);
        assert_eq!(r.harvester.held(&usdc()), 15 * USDC);
    }

    #[test]
    fn fee_sum_above_full_is_rejected() {
        let mut r = rig(0, 0);
        let err = r
            .harvester
            .set_labs(
                &r.h.vault,
                &governor(),
                FeeRecipient {
                    address: addr("labs"),
                    fee_bps: 10_001,
                },
            )
            .unwrap_err();
        assert!(matches!(err, HarvestError::Config(ConfigError::FeeSumExceeded { .. })));
    }

    #[test]
    fn fee_setters_are_governor_only() {
        let mut r = rig(0, 0);
        let err = r
            .harvester
            .set_team(
                &r.h.vault,
                &strategist(),
                FeeRecipient {
                    address: addr("team"),
                    fee_bps: 10,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn sweep_only_visits_reward_enabled_strategies() {
        let mut r = rig(0, 0);
        let quiet = add_strategy(&mut r.h.vault, "quiet");
        r.h.vault
            .set_strategy_with_weights(
                &governor(),
                vec![
                    StrategyWeight::new(r.strategy.0, 0, 5_000, 10_000),
                    StrategyWeight {
                        enabled_reward: false,
                        ..StrategyWeight::new(quiet.0, 0, 5_000, 10_000)
                    },
                ],
            )
            .unwrap();
        r.strategy.1.add_reward(usdc(), 7 * USDC);
        quiet.1.add_reward(usdc(), 3 * USDC);

        let report = r
            .harvester
            .harvest_and_distribute_all(&mut r.h.vault, &mut r.dripper, &governor())
            .unwrap();
        assert_eq!(report.harvests.len(), 1);
        assert!(report.failures.is_empty());
        assert_eq!(report.split.dripper, 7 * USDC);
    }
}

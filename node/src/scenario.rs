//! # Scenario Runner
//!
//! A scenario is a JSON document in two parts: a genesis that deploys the
//! protocol (assets, prices, strategies, weights, fees, opening holders)
//! and a list of scripted steps. Asset amounts are decimal strings in the
//! asset's own precision (`"100.5"` USDC); unit amounts use 18 decimals.
//!
//! Names stand in for addresses. `"anna"` becomes
//! `Address::from_label("anna")`, and a `0x`-prefixed string is parsed as
//! hex. Wallets are funded on demand: a `mint` step credits the minter
//! with the deposit before the vault pulls it.
//!
//! A failing step is recorded with its error and the run continues, so a
//! scenario can script refusals (a mint below the peg, a payout that is
//! too early) next to the happy path.
//!
//! ```json
//! {
//!   "assets": [{ "symbol": "USDC", "decimals": 6, "drip_duration_secs": 3600 }],
//!   "strategies": [{ "name": "hold", "assets": ["USDC"], "daily_yield_bps": 2 }],
//!   "weights": [{ "strategy": "hold", "target": 10000 }],
//!   "holders": [{ "account": "anna", "asset": "USDC", "amount": "1000" }],
//!   "steps": [{ "action": "advance_time", "seconds": 86400 }, { "action": "payout" }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cash_contracts::harvester::FeeSplit;
use cash_contracts::vault::{MintReceipt, RebalanceReport, StrategyWeight, VaultError};
use cash_contracts::{CashProtocol, ErrorKind, PayoutReport, ProtocolAddresses, ProtocolError, ProtocolParams};
use cash_protocol::config::{HarvesterConfig, VaultConfig, BPS_DENOMINATOR, PRICE_DECIMALS, UNIT_DECIMALS};
use cash_protocol::external::{AssetBank, FixedPriceOracle, FixedRateSwapper, HoldStrategy, InMemoryBank, Strategy};
use cash_protocol::ledger::{RebaseOutcome, RebaseState};
use cash_protocol::math::{self, format_units, parse_units};
use cash_protocol::Address;

const SECONDS_PER_DAY: u128 = 86_400;

// ---------------------------------------------------------------------------
// Scenario File
// ---------------------------------------------------------------------------

/// Genesis plus scripted steps.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default = "default_governor")]
    pub governor: String,
    #[serde(default)]
    pub strategist: Option<String>,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub fees: FeeSpec,
    pub assets: Vec<AssetSpec>,
    /// Defaults to the first listed asset.
    #[serde(default)]
    pub primary_stable: Option<String>,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
    #[serde(default)]
    pub weights: Vec<WeightSpec>,
    #[serde(default)]
    pub rewards: Vec<RewardSpec>,
    #[serde(default)]
    pub holders: Vec<HolderSpec>,
    /// Simulated Unix time at genesis.
    #[serde(default)]
    pub start_time: u64,
    /// Defaults to one payout period after `start_time`.
    #[serde(default)]
    pub first_payout_time: Option<u64>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("malformed scenario")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }
}

fn default_governor() -> String {
    "governor".to_string()
}

fn default_price() -> String {
    "1".to_string()
}

fn default_max_weight() -> u16 {
    BPS_DENOMINATOR as u16
}

fn enabled() -> bool {
    true
}

/// Labs and Team fee recipients.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeSpec {
    pub labs: String,
    pub team: String,
    pub labs_bps: u16,
    pub team_bps: u16,
}

impl Default for FeeSpec {
    fn default() -> Self {
        Self {
            labs: "labs".to_string(),
            team: "team".to_string(),
            labs_bps: 0,
            team_bps: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetSpec {
    pub symbol: String,
    pub decimals: u8,
    /// Oracle price in USD.
    #[serde(default = "default_price")]
    pub price: String,
    /// Zero leaves the dripper holding this asset.
    #[serde(default)]
    pub drip_duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub assets: Vec<String>,
    /// Assets this strategy is the `allocate` default for.
    #[serde(default)]
    pub default_for: Vec<String>,
    /// Growth applied to every holding as simulated time passes.
    #[serde(default)]
    pub daily_yield_bps: u16,
    #[serde(default)]
    pub quick_deposit: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightSpec {
    pub strategy: String,
    #[serde(default)]
    pub min: u16,
    pub target: u16,
    #[serde(default = "default_max_weight")]
    pub max: u16,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "enabled")]
    pub enabled_reward: bool,
}

impl WeightSpec {
    fn to_weight(&self) -> StrategyWeight {
        StrategyWeight {
            strategy: resolve(&self.strategy),
            min_weight: self.min,
            target_weight: self.target,
            max_weight: self.max,
            enabled: self.enabled,
            enabled_reward: self.enabled_reward,
        }
    }
}

/// A reward token and what one whole token swaps for in the primary stable.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardSpec {
    pub token: String,
    pub decimals: u8,
    pub price: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HolderSpec {
    pub account: String,
    pub asset: String,
    pub amount: String,
}

/// One scripted action. Operator actions run as the governor.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Mint {
        account: String,
        asset: String,
        amount: String,
        #[serde(default)]
        min_units_out: Option<String>,
    },
    Redeem {
        account: String,
        units: String,
        #[serde(default)]
        min_out: Option<String>,
    },
    Transfer {
        from: String,
        to: String,
        units: String,
    },
    OptOut {
        account: String,
    },
    OptIn {
        account: String,
    },
    RegisterContract {
        account: String,
    },
    AccrueYield {
        strategy: String,
        asset: String,
        amount: String,
    },
    AddReward {
        strategy: String,
        token: String,
        amount: String,
    },
    SetPrice {
        asset: String,
        price: String,
    },
    AdvanceTime {
        seconds: u64,
    },
    Allocate,
    /// Replaces the weight table when `weights` is given, otherwise
    /// rebalances against the current one.
    Rebalance {
        #[serde(default)]
        weights: Option<Vec<WeightSpec>>,
    },
    /// One strategy and a fee distribution, or every reward strategy.
    Harvest {
        #[serde(default)]
        strategy: Option<String>,
    },
    Payout,
    Rebase,
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Mint { .. } => "mint",
            Step::Redeem { .. } => "redeem",
            Step::Transfer { .. } => "transfer",
            Step::OptOut { .. } => "opt_out",
            Step::OptIn { .. } => "opt_in",
            Step::RegisterContract { .. } => "register_contract",
            Step::AccrueYield { .. } => "accrue_yield",
            Step::AddReward { .. } => "add_reward",
            Step::SetPrice { .. } => "set_price",
            Step::AdvanceTime { .. } => "advance_time",
            Step::Allocate => "allocate",
            Step::Rebalance { .. } => "rebalance",
            Step::Harvest { .. } => "harvest",
            Step::Payout => "payout",
            Step::Rebase => "rebase",
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What one step did.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    /// Simulated time after the step.
    pub time: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub address: Address,
    pub balance: String,
    pub rebase_state: RebaseState,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategySummary {
    pub name: String,
    pub address: Address,
    /// Holdings at par, in units.
    pub value: String,
    pub weight: Option<StrategyWeight>,
}

/// End-of-run picture printed by `cash-node simulate`.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub time: u64,
    pub total_supply: String,
    pub total_value: String,
    pub non_rebasing_supply: String,
    pub rebasing_credits_per_token: String,
    pub next_payout_time: u64,
    pub accounts: BTreeMap<String, AccountSummary>,
    pub strategies: Vec<StrategySummary>,
    pub idle: BTreeMap<String, String>,
    pub dripper: BTreeMap<String, String>,
    pub steps: Vec<StepRecord>,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Maps a scenario name to an address.
pub fn resolve(name: &str) -> Address {
    if name.starts_with("0x") {
        if let Ok(address) = Address::from_hex(name) {
            return address;
        }
    }
    Address::from_label(name)
}

fn parse_amount(text: &str, decimals: u8) -> Result<u128> {
    parse_units(text, decimals).ok_or_else(|| anyhow!("invalid amount {text:?} for {decimals} decimals"))
}

fn units(amount: u128) -> String {
    format_units(amount, UNIT_DECIMALS)
}

/// Error classification for a failed step, when the failure came from the
/// protocol rather than from the scenario itself.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    if let Some(err) = err.downcast_ref::<ProtocolError>() {
        return Some(err.kind());
    }
    err.downcast_ref::<VaultError>().map(VaultError::kind)
}

fn rebase_detail(outcome: &RebaseOutcome) -> Value {
    match outcome {
        RebaseOutcome::Applied { previous, current, .. } => json!({
            "applied": true,
            "previous_supply": units(*previous),
            "new_supply": units(*current),
        }),
        RebaseOutcome::Skipped(reason) => json!({ "applied": false, "reason": format!("{reason:?}") }),
    }
}

#[derive(Debug, Clone, Copy)]
struct Token {
    address: Address,
    decimals: u8,
}

#[derive(Debug, Clone)]
struct StrategyHandle {
    address: Address,
    handle: HoldStrategy,
    daily_yield_bps: u16,
}

/// A deployed protocol plus the simulated world around it.
#[derive(Debug)]
pub struct Simulation {
    protocol: CashProtocol,
    bank: InMemoryBank,
    oracle: FixedPriceOracle,
    governor: Address,
    tokens: BTreeMap<String, Token>,
    strategies: BTreeMap<String, StrategyHandle>,
    accounts: BTreeSet<String>,
    now: u64,
    records: Vec<StepRecord>,
}

impl Simulation {
    /// Deploys the protocol described by the scenario's genesis. Steps are
    /// not run.
    pub fn genesis(scenario: &Scenario) -> Result<Self> {
        if scenario.assets.is_empty() {
            bail!("scenario lists no assets");
        }
        scenario.vault.validate().context("invalid vault config")?;

        let oracle = FixedPriceOracle::new();
        let mut tokens = BTreeMap::new();
        for spec in &scenario.assets {
            let address = resolve(&spec.symbol);
            oracle.set_price(address, parse_amount(&spec.price, PRICE_DECIMALS)?);
            tokens.insert(
                spec.symbol.clone(),
                Token {
                    address,
                    decimals: spec.decimals,
                },
            );
        }
        let primary_symbol = scenario
            .primary_stable
            .clone()
            .unwrap_or_else(|| scenario.assets[0].symbol.clone());
        let primary = *tokens
            .get(&primary_symbol)
            .ok_or_else(|| anyhow!("primary stable {primary_symbol} is not a listed asset"))?;

        let swapper = FixedRateSwapper::new();
        for reward in &scenario.rewards {
            let address = resolve(&reward.token);
            let price = parse_amount(&reward.price, UNIT_DECIMALS)?;
            // Raw primary per raw reward token, scaled by 1e18.
            let rate = math::scale_decimals(price, reward.decimals, primary.decimals)?;
            swapper.set_rate(address, primary.address, rate);
            tokens.entry(reward.token.clone()).or_insert(Token {
                address,
                decimals: reward.decimals,
            });
        }

        let governor = resolve(&scenario.governor);
        let mut harvester_config = HarvesterConfig::new(resolve(&scenario.fees.labs), resolve(&scenario.fees.team));
        harvester_config.labs.fee_bps = scenario.fees.labs_bps;
        harvester_config.team.fee_bps = scenario.fees.team_bps;

        let bank = InMemoryBank::new();
        let protocol = CashProtocol::new(ProtocolParams {
            addresses: ProtocolAddresses::default(),
            governor,
            vault_config: scenario.vault.clone(),
            harvester_config,
            oracle: Box::new(oracle.clone()),
            swapper: Box::new(swapper),
            bank: bank.clone(),
        })
        .context("failed to deploy protocol")?;

        let mut simulation = Self {
            protocol,
            bank,
            oracle,
            governor,
            tokens,
            strategies: BTreeMap::new(),
            accounts: BTreeSet::new(),
            now: scenario.start_time,
            records: Vec::new(),
        };
        simulation.configure(scenario, primary.address)?;
        info!(
            assets = scenario.assets.len(),
            strategies = scenario.strategies.len(),
            holders = scenario.holders.len(),
            total_supply = %units(simulation.protocol.vault().total_supply()),
            "genesis complete"
        );
        Ok(simulation)
    }

    fn configure(&mut self, scenario: &Scenario, primary: Address) -> Result<()> {
        let governor = self.governor;
        {
            let vault = self.protocol.vault_mut();
            for spec in &scenario.assets {
                vault
                    .support_asset(&governor, resolve(&spec.symbol), spec.decimals)
                    .with_context(|| format!("failed to support {}", spec.symbol))?;
            }
            vault.set_primary_stable(&governor, primary)?;
            if let Some(strategist) = &scenario.strategist {
                vault.set_strategist(&governor, Some(resolve(strategist)))?;
            }
        }

        let mut quick = Vec::new();
        for spec in &scenario.strategies {
            let assets = spec
                .assets
                .iter()
                .map(|symbol| self.token(symbol).map(|t| (t.address, t.decimals)))
                .collect::<Result<Vec<_>>>()?;
            let defaults = spec
                .default_for
                .iter()
                .map(|symbol| self.token(symbol).map(|t| t.address))
                .collect::<Result<Vec<_>>>()?;
            let address = resolve(&spec.name);
            let handle = HoldStrategy::new(spec.name.clone(), &assets);

            let vault = self.protocol.vault_mut();
            vault
                .approve_strategy(&governor, address, Box::new(handle.clone()))
                .with_context(|| format!("failed to approve strategy {}", spec.name))?;
            for asset in defaults {
                vault.set_asset_default_strategy(&governor, asset, Some(address))?;
            }
            if spec.quick_deposit {
                quick.push(address);
            }
            self.strategies.insert(
                spec.name.clone(),
                StrategyHandle {
                    address,
                    handle,
                    daily_yield_bps: spec.daily_yield_bps,
                },
            );
        }
        if !quick.is_empty() {
            self.protocol
                .vault_mut()
                .set_quick_deposit_strategies(&governor, quick)?;
        }

        for holder in &scenario.holders {
            self.fund_and_mint(&holder.account, &holder.asset, &holder.amount, None)
                .with_context(|| format!("opening mint for {} failed", holder.account))?;
        }

        if !scenario.weights.is_empty() {
            let weights = scenario.weights.iter().map(WeightSpec::to_weight).collect();
            self.protocol
                .vault_mut()
                .set_strategy_with_weights(&governor, weights)
                .context("failed to apply genesis weights")?;
        }

        for spec in scenario.assets.iter().filter(|s| s.drip_duration_secs > 0) {
            let asset = resolve(&spec.symbol);
            self.protocol
                .set_drip_duration(&governor, &asset, spec.drip_duration_secs, self.now)?;
        }

        let period = self.protocol.vault().config().payout_period;
        let first_payout = scenario
            .first_payout_time
            .unwrap_or_else(|| self.now.saturating_add(period));
        self.protocol
            .vault_mut()
            .set_next_payout_time(&governor, first_payout)?;
        Ok(())
    }

    // -- Accessors ----------------------------------------------------------

    pub fn protocol(&self) -> &CashProtocol {
        &self.protocol
    }

    pub fn governor(&self) -> Address {
        self.governor
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// External wallet balance of `holder`.
    pub fn wallet_balance(&self, holder: &Address, asset: &Address) -> u128 {
        self.bank.balance_of(holder, asset)
    }

    fn token(&self, symbol: &str) -> Result<Token> {
        self.tokens
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("unknown token {symbol}"))
    }

    fn strategy(&self, name: &str) -> Result<&StrategyHandle> {
        self.strategies
            .get(name)
            .ok_or_else(|| anyhow!("unknown strategy {name}"))
    }

    fn account(&mut self, name: &str) -> Address {
        self.accounts.insert(name.to_string());
        resolve(name)
    }

    /// Scenario symbol for an asset address, or its hex.
    pub fn symbol(&self, asset: &Address) -> String {
        self.tokens
            .iter()
            .find(|(_, t)| t.address == *asset)
            .map_or_else(|| asset.to_hex(), |(symbol, _)| symbol.clone())
    }

    /// Formats a raw amount in the asset's decimals.
    pub fn format_amount(&self, asset: &Address, amount: u128) -> String {
        let decimals = self
            .tokens
            .values()
            .find(|t| t.address == *asset)
            .map_or(UNIT_DECIMALS, |t| t.decimals);
        format_units(amount, decimals)
    }

    // -- Steps --------------------------------------------------------------

    /// Runs every step in order and returns their records.
    pub fn run(&mut self, steps: &[Step]) -> &[StepRecord] {
        for step in steps {
            self.step(step);
        }
        &self.records
    }

    /// Applies one step and records the outcome.
    pub fn step(&mut self, step: &Step) -> &StepRecord {
        let index = self.records.len();
        let action = step.action();
        let record = match self.apply(step) {
            Ok(detail) => {
                debug!(index, action, now = self.now, "step applied");
                StepRecord {
                    index,
                    action,
                    time: self.now,
                    ok: true,
                    kind: None,
                    error: None,
                    detail,
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(index, action, error = %message, "step failed");
                StepRecord {
                    index,
                    action,
                    time: self.now,
                    ok: false,
                    kind: error_kind(&err),
                    error: Some(message),
                    detail: Value::Null,
                }
            }
        };
        self.records.push(record);
        &self.records[index]
    }

    fn apply(&mut self, step: &Step) -> Result<Value> {
        let governor = self.governor;
        match step {
            Step::Mint {
                account,
                asset,
                amount,
                min_units_out,
            } => {
                let receipt = self.fund_and_mint(account, asset, amount, min_units_out.as_deref())?;
                Ok(json!({ "units": units(receipt.units), "fee": units(receipt.fee) }))
            }
            Step::Redeem { account, units: amount, min_out } => {
                let redeemer = self.account(account);
                let amount = parse_amount(amount, UNIT_DECIMALS)?;
                let min_out = match min_out {
                    Some(text) => parse_amount(text, UNIT_DECIMALS)?,
                    None => 0,
                };
                let receipt = self.protocol.vault_mut().redeem(&redeemer, amount, min_out)?;
                let outputs: BTreeMap<String, String> = receipt
                    .outputs
                    .iter()
                    .map(|(asset, paid)| (self.symbol(asset), self.format_amount(asset, *paid)))
                    .collect();
                Ok(json!({ "burned": units(receipt.burned), "fee": units(receipt.fee), "outputs": outputs }))
            }
            Step::Transfer { from, to, units: amount } => {
                let (from, to) = (self.account(from), self.account(to));
                let amount = parse_amount(amount, UNIT_DECIMALS)?;
                self.protocol.vault_mut().transfer(&from, &to, amount)?;
                Ok(Value::Null)
            }
            Step::OptOut { account } => {
                let account = self.account(account);
                self.protocol.vault_mut().rebase_opt_out(&account)?;
                Ok(json!({ "state": self.protocol.vault().ledger().rebase_state(&account) }))
            }
            Step::OptIn { account } => {
                let account = self.account(account);
                self.protocol.vault_mut().rebase_opt_in(&account)?;
                Ok(json!({ "state": self.protocol.vault().ledger().rebase_state(&account) }))
            }
            Step::RegisterContract { account } => {
                let account = self.account(account);
                self.protocol.vault_mut().register_contract(account)?;
                Ok(Value::Null)
            }
            Step::AccrueYield { strategy, asset, amount } => {
                let token = self.token(asset)?;
                let amount = parse_amount(amount, token.decimals)?;
                let strategy = self.strategy(strategy)?;
                strategy.handle.accrue(&token.address, amount)?;
                Ok(json!({ "strategy_value": units(strategy.handle.check_balance()) }))
            }
            Step::AddReward { strategy, token, amount } => {
                let token = self.token(token)?;
                let amount = parse_amount(amount, token.decimals)?;
                self.strategy(strategy)?.handle.add_reward(token.address, amount);
                Ok(Value::Null)
            }
            Step::SetPrice { asset, price } => {
                let token = self.token(asset)?;
                self.oracle
                    .set_price(token.address, parse_amount(price, PRICE_DECIMALS)?);
                Ok(Value::Null)
            }
            Step::AdvanceTime { seconds } => {
                let accrued = self.advance_time(*seconds)?;
                Ok(json!({ "now": self.now, "accrued": units(accrued) }))
            }
            Step::Allocate => {
                let report = self.protocol.vault_mut().allocate()?;
                Ok(json!({ "deposits": report.deposits.len(), "failures": report.failures.len() }))
            }
            Step::Rebalance { weights } => {
                let report = match weights {
                    Some(weights) => {
                        let weights = weights.iter().map(WeightSpec::to_weight).collect();
                        self.protocol
                            .vault_mut()
                            .set_strategy_with_weights(&governor, weights)?
                    }
                    None => self.protocol.vault_mut().balance(&governor)?,
                };
                Ok(rebalance_detail(&report))
            }
            Step::Harvest { strategy: Some(name) } => {
                let address = self.strategy(name)?.address;
                let harvest = self.protocol.harvest(&governor, &address)?;
                let split = self.protocol.distribute_fees(&governor)?;
                Ok(json!({
                    "rewards": harvest.collected.len(),
                    "unswapped": harvest.unswapped.len(),
                    "split": self.split_detail(&split),
                }))
            }
            Step::Harvest { strategy: None } => {
                let report = self.protocol.harvest_and_distribute_all(&governor)?;
                Ok(json!({
                    "harvested": report.harvests.len(),
                    "failed": report.failures.len(),
                    "split": self.split_detail(&report.split),
                }))
            }
            Step::Payout => {
                let report = self.protocol.payout(&governor, self.now)?;
                Ok(self.payout_detail(&report))
            }
            Step::Rebase => {
                let outcome = self.protocol.vault_mut().rebase(&governor)?;
                Ok(rebase_detail(&outcome))
            }
        }
    }

    fn fund_and_mint(
        &mut self,
        account: &str,
        asset: &str,
        amount: &str,
        min_units_out: Option<&str>,
    ) -> Result<MintReceipt> {
        let minter = self.account(account);
        let token = self.token(asset)?;
        let amount = parse_amount(amount, token.decimals)?;
        let min_units_out = match min_units_out {
            Some(text) => parse_amount(text, UNIT_DECIMALS)?,
            None => 0,
        };
        self.bank.credit(minter, token.address, amount);
        Ok(self
            .protocol
            .vault_mut()
            .mint(&minter, &token.address, amount, min_units_out)?)
    }

    /// Moves the clock forward, growing every strategy by its daily yield
    /// pro rata. Returns the value accrued, in units.
    pub fn advance_time(&mut self, seconds: u64) -> Result<u128> {
        let mut accrued = 0u128;
        for strategy in self.strategies.values().filter(|s| s.daily_yield_bps > 0) {
            let before = strategy.handle.check_balance();
            for asset in strategy.handle.assets() {
                let balance = strategy.handle.asset_balance(&asset);
                let growth = math::mul_div(
                    balance,
                    strategy.daily_yield_bps as u128 * seconds as u128,
                    BPS_DENOMINATOR * SECONDS_PER_DAY,
                )?;
                if growth > 0 {
                    strategy.handle.accrue(&asset, growth)?;
                }
            }
            accrued = accrued.saturating_add(strategy.handle.check_balance().saturating_sub(before));
        }
        self.now = self
            .now
            .checked_add(seconds)
            .ok_or_else(|| anyhow!("simulated clock overflow"))?;
        Ok(accrued)
    }

    /// Fast-forwards to the next scheduled payout and runs it.
    pub fn run_scheduled_payout(&mut self) -> Result<PayoutReport> {
        let due = self.protocol.vault().next_payout_time();
        if due > self.now {
            self.advance_time(due - self.now)?;
        }
        Ok(self.protocol.payout(&self.governor, self.now)?)
    }

    fn split_detail(&self, split: &FeeSplit) -> Value {
        let format = |amount: u128| match &split.asset {
            Some(asset) => self.format_amount(asset, amount),
            None => amount.to_string(),
        };
        json!({
            "base": format(split.base),
            "labs": format(split.labs),
            "team": format(split.team),
            "dripper": format(split.dripper),
            "retained": format(split.retained),
        })
    }

    fn payout_detail(&self, report: &PayoutReport) -> Value {
        let collected: BTreeMap<String, String> = report
            .drip
            .collected
            .iter()
            .map(|(asset, amount)| (self.symbol(asset), self.format_amount(asset, *amount)))
            .collect();
        json!({
            "harvested": report.harvest.harvests.len(),
            "split": self.split_detail(&report.harvest.split),
            "collected": collected,
            "rebase": rebase_detail(&report.drip.rebase),
            "next_payout_time": report.next_payout_time,
        })
    }

    // -- Reporting ----------------------------------------------------------

    pub fn strategy_summaries(&self) -> Vec<StrategySummary> {
        let vault = self.protocol.vault();
        self.strategies
            .iter()
            .map(|(name, s)| StrategySummary {
                name: name.clone(),
                address: s.address,
                value: units(s.handle.check_balance()),
                weight: vault.weight_of(&s.address).copied(),
            })
            .collect()
    }

    pub fn summary(&self) -> Result<SimulationSummary> {
        let vault = self.protocol.vault();
        let ledger = vault.ledger();
        let accounts = self
            .accounts
            .iter()
            .map(|name| {
                let address = resolve(name);
                let summary = AccountSummary {
                    address,
                    balance: units(vault.balance_of(&address)),
                    rebase_state: ledger.rebase_state(&address),
                };
                (name.clone(), summary)
            })
            .collect();
        let idle = vault
            .assets()
            .iter()
            .map(|a| (self.symbol(&a.asset), format_units(vault.idle_balance(&a.asset), a.decimals)))
            .collect();
        let dripper = vault
            .assets()
            .iter()
            .map(|a| {
                let held = self.protocol.dripper().balance(&a.asset);
                (self.symbol(&a.asset), format_units(held, a.decimals))
            })
            .collect();

        Ok(SimulationSummary {
            time: self.now,
            total_supply: units(vault.total_supply()),
            total_value: units(vault.total_value()?),
            non_rebasing_supply: units(ledger.non_rebasing_supply()),
            rebasing_credits_per_token: ledger.rebasing_credits_per_token().to_string(),
            next_payout_time: vault.next_payout_time(),
            accounts,
            strategies: self.strategy_summaries(),
            idle,
            dripper,
            steps: self.records.clone(),
        })
    }
}

fn rebalance_detail(report: &RebalanceReport) -> Value {
    json!({
        "moves": report.plan.len(),
        "withdrawn": units(report.total_withdrawn),
        "deposited": units(report.total_deposited),
        "slippage": units(report.slippage),
        "failures": report.failures.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"{
        "fees": { "labs_bps": 1000, "team_bps": 500 },
        "assets": [
            { "symbol": "USDC", "decimals": 6, "drip_duration_secs": 3600 },
            { "symbol": "DAI", "decimals": 18 }
        ],
        "strategies": [
            { "name": "hold", "assets": ["USDC", "DAI"] }
        ],
        "weights": [{ "strategy": "hold", "target": 10000 }],
        "rewards": [{ "token": "COMP", "decimals": 18, "price": "50" }],
        "holders": [{ "account": "anna", "asset": "USDC", "amount": "1000" }]
    }"#;

    fn base_with_steps(steps: &str) -> Scenario {
        let mut value: Value = serde_json::from_str(BASE).unwrap();
        value["steps"] = serde_json::from_str(steps).unwrap();
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn genesis_mints_and_routes_opening_deposits() {
        let scenario = Scenario::from_json(BASE).unwrap();
        let sim = Simulation::genesis(&scenario).unwrap();
        let summary = sim.summary().unwrap();

        assert_eq!(summary.total_supply, "1000");
        assert_eq!(summary.accounts["anna"].balance, "1000");
        assert_eq!(summary.strategies[0].value, "1000");
        assert_eq!(summary.idle["USDC"], "0");
        assert_eq!(summary.next_payout_time, 86_400);
    }

    #[test]
    fn a_payout_turns_rewards_into_balance_growth() {
        let scenario = base_with_steps(
            r#"[
                { "action": "add_reward", "strategy": "hold", "token": "COMP", "amount": "2" },
                { "action": "advance_time", "seconds": 86400 },
                { "action": "payout" }
            ]"#,
        );
        let mut sim = Simulation::genesis(&scenario).unwrap();
        let records = sim.run(&scenario.steps);
        assert!(records.iter().all(|r| r.ok), "{records:?}");
        assert_eq!(records[2].detail["split"]["dripper"], "85");

        let summary = sim.summary().unwrap();
        assert_eq!(summary.accounts["anna"].balance, "1085");
        assert_eq!(summary.next_payout_time, 2 * 86_400);
        assert_eq!(sim.wallet_balance(&resolve("labs"), &resolve("USDC")), 10_000_000);
    }

    #[test]
    fn failed_steps_are_recorded_and_the_run_continues() {
        let scenario = base_with_steps(
            r#"[
                { "action": "set_price", "asset": "USDC", "price": "0.97" },
                { "action": "mint", "account": "ben", "asset": "USDC", "amount": "10" },
                { "action": "payout" },
                { "action": "mint", "account": "ben", "asset": "DAI", "amount": "10" }
            ]"#,
        );
        let mut sim = Simulation::genesis(&scenario).unwrap();
        let records = sim.run(&scenario.steps).to_vec();

        assert!(!records[1].ok);
        assert_eq!(records[1].kind, Some(ErrorKind::PolicyViolation));
        assert!(!records[2].ok);
        assert!(records[3].ok);
        assert_eq!(sim.summary().unwrap().accounts["ben"].balance, "10");
    }

    #[test]
    fn advancing_time_accrues_daily_yield() {
        let text = BASE.replace(r#""name": "hold","#, r#""name": "hold", "daily_yield_bps": 100,"#);
        let mut scenario = Scenario::from_json(&text).unwrap();
        scenario.steps = vec![Step::AdvanceTime { seconds: 86_400 }, Step::Rebase];
        let mut sim = Simulation::genesis(&scenario).unwrap();
        let records = sim.run(&scenario.steps).to_vec();

        assert_eq!(records[0].detail["accrued"], "10");
        assert!(records[1].ok);
        assert_eq!(sim.summary().unwrap().accounts["anna"].balance, "1010");
    }

    #[test]
    fn opted_out_accounts_keep_a_fixed_balance() {
        let text = BASE.replace(r#""name": "hold","#, r#""name": "hold", "daily_yield_bps": 100,"#);
        let mut scenario = Scenario::from_json(&text).unwrap();
        scenario.steps = vec![
            Step::Transfer {
                from: "anna".into(),
                to: "ben".into(),
                units: "500".into(),
            },
            Step::OptOut { account: "ben".into() },
            Step::AdvanceTime { seconds: 86_400 },
            Step::Rebase,
        ];
        let mut sim = Simulation::genesis(&scenario).unwrap();
        sim.run(&scenario.steps);
        let summary = sim.summary().unwrap();

        assert_eq!(summary.accounts["ben"].balance, "500");
        assert_eq!(summary.accounts["ben"].rebase_state, RebaseState::StdNonRebasing);
        assert_eq!(summary.accounts["anna"].balance, "510");
        assert_eq!(summary.non_rebasing_supply, "500");
    }

    #[test]
    fn scheduled_payouts_fast_forward_the_clock() {
        let scenario = Scenario::from_json(BASE).unwrap();
        let mut sim = Simulation::genesis(&scenario).unwrap();
        let report = sim.run_scheduled_payout().unwrap();
        assert_eq!(sim.now(), 86_400);
        assert_eq!(report.next_payout_time, 2 * 86_400);
    }

    #[test]
    fn unknown_references_fail_genesis() {
        let text = BASE.replace(r#""assets": ["USDC", "DAI"]"#, r#""assets": ["USDT"]"#);
        let scenario = Scenario::from_json(&text).unwrap();
        let err = Simulation::genesis(&scenario).unwrap_err();
        assert!(format!("{err:#}").contains("unknown token USDT"));
    }

    #[test]
    fn scenarios_load_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BASE.as_bytes()).unwrap();
        let scenario = Scenario::from_file(file.path()).unwrap();
        assert_eq!(scenario.assets.len(), 2);
        assert_eq!(scenario.governor, "governor");

        let missing = file.path().with_extension("missing");
        let err = Scenario::from_file(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read scenario"));
    }

    #[test]
    fn bundled_demo_runs_clean() {
        let scenario = Scenario::from_json(include_str!("../../demos/basic.json")).unwrap();
        let mut sim = Simulation::genesis(&scenario).unwrap();
        let records = sim.run(&scenario.steps);
        assert_eq!(records.len(), scenario.steps.len());
        assert!(records.iter().all(|r| r.ok), "{records:?}");

        let summary = sim.summary().unwrap();
        assert_eq!(summary.accounts["dora"].balance, "100");
        assert_eq!(summary.accounts["dora"].rebase_state, RebaseState::StdNonRebasing);
    }

    #[test]
    fn unknown_actions_are_rejected_at_parse_time() {
        let mut value: Value = serde_json::from_str(BASE).unwrap();
        value["steps"] = json!([{ "action": "teleport" }]);
        assert!(serde_json::from_value::<Scenario>(value).is_err());
    }

    #[test]
    fn names_and_hex_both_resolve() {
        let anna = Address::from_label("anna");
        assert_eq!(resolve("anna"), anna);
        assert_eq!(resolve(&anna.to_hex()), anna);
    }
}

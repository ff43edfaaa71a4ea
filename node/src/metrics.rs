//! # Prometheus Metrics
//!
//! Protocol gauges and operation counters, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated [`prometheus::Registry`]
//! prefixed `cash_`.
//!
//! Unit-denominated gauges are reported in whole units (a float), since
//! raw 18-decimal amounts overflow an integer gauge.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

use cash_contracts::CashProtocol;
use cash_protocol::config::{UNIT, UNIT_DECIMALS};
use cash_protocol::math;

use crate::scenario::StepRecord;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub total_supply: Gauge,
    pub total_value: Gauge,
    pub rebasing_credits_per_token: Gauge,
    pub non_rebasing_supply: Gauge,
    /// Yield waiting in the dripper, all assets, in units.
    pub dripper_balance: Gauge,
    pub mints_total: IntCounter,
    pub redeems_total: IntCounter,
    /// Rebases that changed supply.
    pub rebases_total: IntCounter,
    pub harvests_total: IntCounter,
    pub payouts_total: IntCounter,
    pub payout_failures_total: IntCounter,
    /// Wall-clock time spent in one payout.
    pub payout_duration_seconds: Histogram,
}

fn register<M>(registry: &Registry, metric: M) -> prometheus::Result<M>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn as_units(amount: u128) -> f64 {
    amount as f64 / UNIT as f64
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("cash".into()), None)?;

        let total_supply = register(
            &registry,
            Gauge::new("total_supply", "Outstanding unit tokens")?,
        )?;
        let total_value = register(
            &registry,
            Gauge::new("total_value", "Vault value in USD: idle assets plus strategy holdings")?,
        )?;
        let rebasing_credits_per_token = register(
            &registry,
            Gauge::new("rebasing_credits_per_token", "Credits backing one unit of a rebasing balance")?,
        )?;
        let non_rebasing_supply = register(
            &registry,
            Gauge::new("non_rebasing_supply", "Units held by accounts that do not rebase")?,
        )?;
        let dripper_balance = register(
            &registry,
            Gauge::new("dripper_balance", "Harvested yield not yet released to the vault")?,
        )?;
        let mints_total = register(&registry, IntCounter::new("mints_total", "Successful mints")?)?;
        let redeems_total = register(&registry, IntCounter::new("redeems_total", "Successful redemptions")?)?;
        let rebases_total = register(&registry, IntCounter::new("rebases_total", "Rebases that changed supply")?)?;
        let harvests_total = register(&registry, IntCounter::new("harvests_total", "Harvest runs")?)?;
        let payouts_total = register(&registry, IntCounter::new("payouts_total", "Completed payouts")?)?;
        let payout_failures_total = register(
            &registry,
            IntCounter::new("payout_failures_total", "Payouts that were refused or failed")?,
        )?;
        let payout_duration_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("payout_duration_seconds", "Time spent running one payout")
                    .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            )?,
        )?;

        Ok(Self {
            registry,
            total_supply,
            total_value,
            rebasing_credits_per_token,
            non_rebasing_supply,
            dripper_balance,
            mints_total,
            redeems_total,
            rebases_total,
            harvests_total,
            payouts_total,
            payout_failures_total,
            payout_duration_seconds,
        })
    }

    /// Refreshes every gauge from the protocol's current state.
    pub fn observe(&self, protocol: &CashProtocol) {
        let vault = protocol.vault();
        let ledger = vault.ledger();
        self.total_supply.set(as_units(vault.total_supply()));
        self.non_rebasing_supply.set(as_units(ledger.non_rebasing_supply()));
        self.rebasing_credits_per_token
            .set(ledger.rebasing_credits_per_token() as f64);
        match vault.total_value() {
            Ok(value) => self.total_value.set(as_units(value)),
            Err(err) => tracing::warn!(error = %err, "total value unavailable"),
        }

        let dripping: u128 = vault
            .assets()
            .iter()
            .filter_map(|a| {
                let held = protocol.dripper().balance(&a.asset);
                math::scale_decimals(held, a.decimals, UNIT_DECIMALS).ok()
            })
            .fold(0, u128::saturating_add);
        self.dripper_balance.set(as_units(dripping));
    }

    /// Counts a successful scenario step.
    pub fn record_step(&self, record: &StepRecord) {
        if !record.ok {
            return;
        }
        match record.action {
            "mint" => self.mints_total.inc(),
            "redeem" => self.redeems_total.inc(),
            "harvest" => self.harvests_total.inc(),
            "rebase" if record.detail["applied"] == true => self.rebases_total.inc(),
            "payout" => {
                self.payouts_total.inc();
                self.harvests_total.inc();
                if record.detail["rebase"]["applied"] == true {
                    self.rebases_total.inc();
                }
            }
            _ => {}
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Scenario, Simulation};

    fn simulation() -> Simulation {
        let scenario = Scenario::from_json(
            r#"{
                "assets": [{ "symbol": "USDC", "decimals": 6 }],
                "holders": [{ "account": "anna", "asset": "USDC", "amount": "250" }]
            }"#,
        )
        .unwrap();
        Simulation::genesis(&scenario).unwrap()
    }

    #[test]
    fn gauges_follow_the_protocol() {
        let metrics = NodeMetrics::new().unwrap();
        let sim = simulation();
        metrics.observe(sim.protocol());

        assert_eq!(metrics.total_supply.get(), 250.0);
        assert_eq!(metrics.total_value.get(), 250.0);
        assert_eq!(metrics.non_rebasing_supply.get(), 0.0);
        assert_eq!(metrics.dripper_balance.get(), 0.0);
    }

    #[test]
    fn only_successful_steps_are_counted() {
        let metrics = NodeMetrics::new().unwrap();
        let mut sim = simulation();
        let steps = Scenario::from_json(
            r#"{
                "assets": [{ "symbol": "USDC", "decimals": 6 }],
                "steps": [
                    { "action": "mint", "account": "ben", "asset": "USDC", "amount": "5" },
                    { "action": "redeem", "account": "ben", "units": "50" }
                ]
            }"#,
        )
        .unwrap()
        .steps;
        for record in sim.run(&steps) {
            metrics.record_step(record);
        }
        assert_eq!(metrics.mints_total.get(), 1);
        assert_eq!(metrics.redeems_total.get(), 0);
    }

    #[test]
    fn encoding_uses_the_cash_prefix() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.payouts_total.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("cash_payouts_total 1"));
        assert!(text.contains("cash_total_supply"));
    }
}

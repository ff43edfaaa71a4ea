//! # REST API
//!
//! The operator node's HTTP interface. Reads take the simulation's read
//! lock; `POST /payout` takes the write lock for the duration of one
//! payout.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                                  |
//! |--------|------------------------|----------------------------------------------|
//! | GET    | `/health`              | Liveness probe                               |
//! | GET    | `/status`              | Supply, value and payout schedule            |
//! | GET    | `/accounts/:address`   | Balance and rebase state (name or hex)       |
//! | GET    | `/strategies`          | Approved strategies with holdings and weight |
//! | GET    | `/redeem-quote/:units` | What redeeming `units` would pay right now   |
//! | POST   | `/payout`              | Fast-forward to the next payout and run it   |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use cash_contracts::ErrorKind;
use cash_protocol::config::UNIT_DECIMALS;
use cash_protocol::ledger::RebaseState;
use cash_protocol::math::{format_units, parse_units};
use cash_protocol::Address;

use crate::metrics::{NodeMetrics, SharedMetrics};
use crate::scenario::{self, Simulation, StrategySummary};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub simulation: Arc<RwLock<Simulation>>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the API router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/strategies", get(strategies_handler))
        .route("/redeem-quote/:units", get(redeem_quote_handler))
        .route("/payout", post(payout_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Amounts are decimal strings in units (18 decimals) unless noted.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    /// Simulated protocol time, Unix seconds.
    pub simulated_time: u64,
    pub total_supply: String,
    pub total_value: String,
    pub non_rebasing_supply: String,
    pub rebasing_credits_per_token: String,
    pub next_payout_time: u64,
    pub capital_paused: bool,
    pub rebase_paused: bool,
    /// Wall-clock time of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: Address,
    pub balance: String,
    pub rebase_state: RebaseState,
    pub is_contract: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemQuoteResponse {
    pub units: String,
    pub fee: String,
    /// Asset symbol to amount, in the asset's decimals.
    pub outputs: BTreeMap<String, String>,
    pub output_value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub time: u64,
    pub next_payout_time: u64,
    pub harvested: usize,
    /// Primary stable sent to the dripper, in its decimals.
    pub to_dripper: String,
    pub collected: BTreeMap<String, String>,
    pub rebased: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn units(amount: u128) -> String {
    format_units(amount, UNIT_DECIMALS)
}

fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn status_for(kind: Option<ErrorKind>) -> StatusCode {
    match kind {
        Some(ErrorKind::AccessDenied) => StatusCode::FORBIDDEN,
        Some(ErrorKind::InvalidReference) => StatusCode::NOT_FOUND,
        Some(ErrorKind::InvalidInput) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::PolicyViolation) => StatusCode::CONFLICT,
        Some(ErrorKind::PartialExternalFailure) => StatusCode::BAD_GATEWAY,
        Some(ErrorKind::Arithmetic) | None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Payout
// ---------------------------------------------------------------------------

/// Runs the next scheduled payout and updates metrics. Shared by
/// `POST /payout` and the node's payout loop.
pub fn run_payout(sim: &mut Simulation, metrics: &NodeMetrics) -> anyhow::Result<PayoutResponse> {
    let timer = metrics.payout_duration_seconds.start_timer();
    let result = sim.run_scheduled_payout();
    timer.observe_duration();

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            metrics.payout_failures_total.inc();
            return Err(err);
        }
    };
    metrics.payouts_total.inc();
    metrics.harvests_total.inc();
    if report.drip.rebase.is_applied() {
        metrics.rebases_total.inc();
    }
    metrics.observe(sim.protocol());

    let split = &report.harvest.split;
    let to_dripper = match &split.asset {
        Some(asset) => sim.format_amount(asset, split.dripper),
        None => "0".to_string(),
    };
    let collected = report
        .drip
        .collected
        .iter()
        .map(|(asset, amount)| (sim.symbol(asset), sim.format_amount(asset, *amount)))
        .collect();

    Ok(PayoutResponse {
        time: sim.now(),
        next_payout_time: report.next_payout_time,
        harvested: report.harvest.harvests.len(),
        to_dripper,
        collected,
        rebased: report.drip.rebase.is_applied(),
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let sim = state.simulation.read().await;
    let vault = sim.protocol().vault();
    let total_value = match vault.total_value() {
        Ok(value) => value,
        Err(err) => return error_response(status_for(Some(err.kind())), err),
    };
    let ledger = vault.ledger();

    Json(StatusResponse {
        version: state.version.clone(),
        simulated_time: sim.now(),
        total_supply: units(vault.total_supply()),
        total_value: units(total_value),
        non_rebasing_supply: units(ledger.non_rebasing_supply()),
        rebasing_credits_per_token: ledger.rebasing_credits_per_token().to_string(),
        next_payout_time: vault.next_payout_time(),
        capital_paused: vault.capital_paused(),
        rebase_paused: vault.rebase_paused(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

/// `GET /accounts/:address`: accepts a scenario name or hex. Unknown
/// accounts read as an empty rebasing balance.
async fn account_handler(Path(address): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    let address = scenario::resolve(&address);
    let sim = state.simulation.read().await;
    let vault = sim.protocol().vault();

    Json(AccountResponse {
        address,
        balance: units(vault.balance_of(&address)),
        rebase_state: vault.ledger().rebase_state(&address),
        is_contract: vault.ledger().is_contract(&address),
    })
}

async fn strategies_handler(State(state): State<AppState>) -> Json<Vec<StrategySummary>> {
    let sim = state.simulation.read().await;
    Json(sim.strategy_summaries())
}

/// `GET /redeem-quote/:units`: `units` is a decimal string, e.g. `12.5`.
async fn redeem_quote_handler(Path(units_text): Path<String>, State(state): State<AppState>) -> Response {
    let Some(amount) = parse_units(&units_text, UNIT_DECIMALS) else {
        return error_response(StatusCode::BAD_REQUEST, format!("invalid unit amount {units_text:?}"));
    };
    let sim = state.simulation.read().await;
    let quote = match sim.protocol().vault().preview_redeem(amount) {
        Ok(quote) => quote,
        Err(err) => return error_response(status_for(Some(err.kind())), err),
    };

    Json(RedeemQuoteResponse {
        units: units(quote.units),
        fee: units(quote.fee),
        outputs: quote
            .outputs
            .iter()
            .map(|(asset, amount)| (sim.symbol(asset), sim.format_amount(asset, *amount)))
            .collect(),
        output_value: units(quote.output_value),
    })
    .into_response()
}

async fn payout_handler(State(state): State<AppState>) -> Response {
    let mut sim = state.simulation.write().await;
    match run_payout(&mut sim, &state.metrics) {
        Ok(payout) => {
            tracing::info!(time = payout.time, next = payout.next_payout_time, "payout via api");
            Json(payout).into_response()
        }
        Err(err) => error_response(status_for(scenario::error_kind(&err)), format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::scenario::Scenario;

    const SCENARIO: &str = r#"{
        "fees": { "labs_bps": 1000, "team_bps": 500 },
        "assets": [
            { "symbol": "USDC", "decimals": 6, "drip_duration_secs": 3600 },
            { "symbol": "DAI", "decimals": 18 }
        ],
        "strategies": [{ "name": "hold", "assets": ["USDC", "DAI"] }],
        "weights": [{ "strategy": "hold", "target": 10000 }],
        "rewards": [{ "token": "COMP", "decimals": 18, "price": "50" }],
        "holders": [{ "account": "anna", "asset": "USDC", "amount": "1000" }],
        "steps": [
            { "action": "add_reward", "strategy": "hold", "token": "COMP", "amount": "2" }
        ]
    }"#;

    fn test_app_state() -> AppState {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let mut simulation = Simulation::genesis(&scenario).unwrap();
        simulation.run(&scenario.steps);
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        metrics.observe(simulation.protocol());

        AppState {
            version: "0.1.0-test".into(),
            simulation: Arc::new(RwLock::new(simulation)),
            metrics,
        }
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        send(router, req).await
    }

    async fn post(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        send(router, req).await
    }

    async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_supply_and_schedule() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.total_supply, "1000");
        assert_eq!(resp.total_value, "1000");
        assert_eq!(resp.next_payout_time, 86_400);
        assert!(!resp.capital_paused);
    }

    #[tokio::test]
    async fn accounts_resolve_by_name_and_by_hex() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/accounts/anna").await;
        assert_eq!(status, StatusCode::OK);
        let by_name: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(by_name.balance, "1000");
        assert_eq!(by_name.rebase_state, RebaseState::Unknown);

        let path = format!("/accounts/{}", Address::from_label("anna").to_hex());
        let (_, body) = get(&router, &path).await;
        let by_hex: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(by_hex.address, by_name.address);

        let (_, body) = get(&router, "/accounts/nobody").await;
        let unknown: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(unknown.balance, "0");
    }

    #[tokio::test]
    async fn strategies_list_holdings_and_weights() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/strategies").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["name"], "hold");
        assert_eq!(json[0]["value"], "1000");
        assert_eq!(json[0]["weight"]["target_weight"], 10_000);
    }

    #[tokio::test]
    async fn redeem_quote_pays_the_primary_stable() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/redeem-quote/10").await;

        assert_eq!(status, StatusCode::OK);
        let quote: RedeemQuoteResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(quote.outputs["USDC"], "10");
        assert_eq!(quote.fee, "0");
    }

    #[tokio::test]
    async fn malformed_quote_amount_is_a_bad_request() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/redeem-quote/ten").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("ten"));
    }

    #[tokio::test]
    async fn payout_distributes_rewards_and_advances_the_schedule() {
        let state = test_app_state();
        let metrics = Arc::clone(&state.metrics);
        let router = create_router(state);

        let (status, body) = post(&router, "/payout").await;
        assert_eq!(status, StatusCode::OK);
        let payout: PayoutResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payout.time, 86_400);
        assert_eq!(payout.to_dripper, "85");
        assert_eq!(payout.collected["USDC"], "85");
        assert!(payout.rebased);
        assert_eq!(payout.next_payout_time, 2 * 86_400);

        let (_, body) = get(&router, "/accounts/anna").await;
        let anna: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(anna.balance, "1085");
        assert_eq!(metrics.payouts_total.get(), 1);
        assert_eq!(metrics.total_supply.get(), 1085.0);
    }
}

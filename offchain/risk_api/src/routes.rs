use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use margin_engine::{
    AccountBalances, ActionForecaster, EngineConfig, FixedDecimal, Forecast, LeverageMode,
    LiquidationWindow, MakerSimulation, MaxTradeAmounts, OrderSide, PoolAction, PoolSnapshot,
    PricedPosition, RateProjection, RiskClassifier, RiskLevel, RiskState, TakerSimulation,
    TermMarket, UserAction, Valuation,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/valuation", post(valuation))
        .route("/risk", post(risk))
        .route("/forecast/pool", post(forecast_pool))
        .route("/forecast/term", post(forecast_term))
        .route("/max-amounts", post(max_amounts))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ValuationReq {
    pub positions: Vec<PricedPosition>,
    pub now: u64,
}

#[derive(Debug, Serialize)]
pub struct ValuationResp {
    pub valuation: Valuation,
    pub risk_indicator: FixedDecimal,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Deserialize)]
pub struct RiskReq {
    pub positions: Vec<PricedPosition>,
    pub now: u64,
    #[serde(default)]
    pub liquidation: Option<LiquidationWindow>,
}

#[derive(Debug, Serialize)]
pub struct RiskResp {
    pub risk_indicator: FixedDecimal,
    pub level: RiskLevel,
    pub state: RiskState,
    pub remaining_liquidation_secs: Option<i64>,
    pub can_end_liquidation: bool,
    pub fresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct PoolForecastReq {
    pub positions: Vec<PricedPosition>,
    pub now: u64,
    #[serde(default)]
    pub mode: LeverageMode,
    pub pool: PoolSnapshot,
    pub action: PoolAction,
    #[serde(default)]
    pub allow_stale: bool,
    #[serde(default)]
    pub liquidation: Option<LiquidationWindow>,
}

#[derive(Debug, Serialize)]
pub struct PoolForecastResp {
    pub forecast: Forecast,
    pub rates: RateProjection,
    /// Why the action would be refused, if it would be.
    pub refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TermOrder {
    Taker { simulation: TakerSimulation },
    Maker { simulation: MakerSimulation },
}

#[derive(Debug, Deserialize)]
pub struct TermForecastReq {
    pub positions: Vec<PricedPosition>,
    pub now: u64,
    #[serde(default)]
    pub mode: LeverageMode,
    pub market: TermMarket,
    pub side: OrderSide,
    pub order: TermOrder,
    #[serde(default)]
    pub allow_stale: bool,
    #[serde(default)]
    pub liquidation: Option<LiquidationWindow>,
}

#[derive(Debug, Serialize)]
pub struct TermForecastResp {
    pub forecast: Forecast,
    pub refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MaxAmountsReq {
    pub positions: Vec<PricedPosition>,
    pub now: u64,
    pub pool: PoolSnapshot,
    #[serde(default)]
    pub balances: AccountBalances,
    #[serde(default)]
    pub allow_stale: bool,
}

fn unix_seconds(now: u64) -> Result<i64, ApiError> {
    i64::try_from(now).map_err(|_| ApiError::BadRequest(format!("timestamp {now} out of range")))
}

fn value_positions(
    config: &EngineConfig,
    positions: &[PricedPosition],
    now: u64,
    allow_stale: bool,
) -> Result<Valuation, ApiError> {
    let valuation = Valuation::from_positions(positions, now, config.setup_leverage_fraction)?;
    if !allow_stale {
        valuation.require_fresh()?;
    }
    Ok(valuation)
}

fn refusal(
    config: &EngineConfig,
    valuation: &Valuation,
    liquidation: Option<LiquidationWindow>,
    action: UserAction,
    forecast: &Forecast,
    now: u64,
) -> Result<Option<String>, ApiError> {
    let classifier = RiskClassifier::from_config(config);
    let risk = classifier.assess(valuation.risk_indicator()?, liquidation);
    let checked = classifier.check_action(&risk, action, Some(forecast.risk_indicator), unix_seconds(now)?);
    Ok(checked.err().map(|err| {
        debug!(target: "risk_api", ?action, %err, "action would be refused");
        err.to_string()
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config": state.config.as_ref(),
    }))
}

pub async fn valuation(
    State(state): State<AppState>,
    Json(req): Json<ValuationReq>,
) -> Result<Json<ValuationResp>, ApiError> {
    let valuation = value_positions(&state.config, &req.positions, req.now, true)?;
    let risk_indicator = valuation.risk_indicator()?;
    let risk_level = RiskClassifier::from_config(&state.config).classify(risk_indicator);
    Ok(Json(ValuationResp {
        valuation,
        risk_indicator,
        risk_level,
    }))
}

pub async fn risk(
    State(state): State<AppState>,
    Json(req): Json<RiskReq>,
) -> Result<Json<RiskResp>, ApiError> {
    let valuation = value_positions(&state.config, &req.positions, req.now, true)?;
    let now = unix_seconds(req.now)?;
    let classifier = RiskClassifier::from_config(&state.config);
    let remaining_liquidation_secs = req
        .liquidation
        .as_ref()
        .map(|window| classifier.remaining_liquidation_time(window, now));
    let risk = classifier.assess(valuation.risk_indicator()?, req.liquidation);
    debug!(target: "risk_api", indicator = risk.indicator.as_f64(), level = ?risk.level, "assessed account risk");
    Ok(Json(RiskResp {
        risk_indicator: risk.indicator,
        level: risk.level,
        state: risk.state(),
        remaining_liquidation_secs,
        can_end_liquidation: classifier.can_owner_end_liquidation(&risk, now),
        fresh: valuation.is_fresh(),
    }))
}

pub async fn forecast_pool(
    State(state): State<AppState>,
    Json(req): Json<PoolForecastReq>,
) -> Result<Json<PoolForecastResp>, ApiError> {
    req.pool.curve.validate()?;
    let valuation = value_positions(&state.config, &req.positions, req.now, req.allow_stale)?;
    let forecaster = ActionForecaster::new(&valuation, req.mode, &state.config);
    let projected = forecaster.forecast_pool(&req.pool, req.action)?;
    let forecast = forecaster.apply(&projected.delta)?;
    let refusal = refusal(
        &state.config,
        &valuation,
        req.liquidation,
        req.action.kind.user_action(),
        &forecast,
        req.now,
    )?;
    Ok(Json(PoolForecastResp {
        forecast,
        rates: projected.rates,
        refusal,
    }))
}

pub async fn forecast_term(
    State(state): State<AppState>,
    Json(req): Json<TermForecastReq>,
) -> Result<Json<TermForecastResp>, ApiError> {
    let valuation = value_positions(&state.config, &req.positions, req.now, req.allow_stale)?;
    let forecaster = ActionForecaster::new(&valuation, req.mode, &state.config);
    let (delta, action) = match &req.order {
        TermOrder::Taker { simulation } => {
            let action = match req.side {
                OrderSide::Lend => UserAction::LendNow,
                OrderSide::Borrow => UserAction::BorrowNow,
            };
            (forecaster.forecast_taker(req.side, simulation, &req.market)?, action)
        }
        TermOrder::Maker { simulation } => {
            let action = match req.side {
                OrderSide::Lend => UserAction::OfferLoan,
                OrderSide::Borrow => UserAction::RequestLoan,
            };
            (forecaster.forecast_maker(req.side, simulation, &req.market)?, action)
        }
    };
    let forecast = forecaster.apply(&delta)?;
    let refusal = refusal(&state.config, &valuation, req.liquidation, action, &forecast, req.now)?;
    Ok(Json(TermForecastResp { forecast, refusal }))
}

pub async fn max_amounts(
    State(state): State<AppState>,
    Json(req): Json<MaxAmountsReq>,
) -> Result<Json<MaxTradeAmounts>, ApiError> {
    let valuation = value_positions(&state.config, &req.positions, req.now, req.allow_stale)?;
    let forecaster = ActionForecaster::new(&valuation, LeverageMode::Setup, &state.config);
    Ok(Json(forecaster.max_amounts(&req.pool, &req.balances)?))
}

//! Margin account valuation and risk forecasting.

pub mod config;
pub mod forecast;
pub mod number;
pub mod orderbook;
pub mod position;
pub mod rates;
pub mod risk;
pub mod types;
pub mod valuation;

pub use config::{ConfigError, EngineConfig};
pub use forecast::{
    AccountBalances, ActionForecaster, Forecast, ForecastDelta, ForecastError, MaxTradeAmounts,
    PoolAction, PoolActionKind, PoolForecast, PoolSnapshot, TermMarket,
};
pub use number::{FixedDecimal, NumberError};
pub use orderbook::{MakerSimulation, OrderSide, OrderbookSimulator, SimulationError, TakerSimulation};
pub use rates::{PoolRateCurve, RateCurveError, RateProjection};
pub use risk::{AccountRisk, LiquidationWindow, RiskClassifier, RiskError, RiskLevel, RiskState, UserAction};
pub use types::{PositionKind, PricedPosition, PriceInfo, RequiredCollateral};
pub use valuation::{LeverageMode, Valuation, ValuationError};

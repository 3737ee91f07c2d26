//! What-if forecasts: an action becomes a [`ForecastDelta`], which
//! [`ActionForecaster::apply`] projects onto the current [`Valuation`].

use std::ops::Add;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::config::EngineConfig;
use crate::number::{FixedDecimal, NumberError};
use crate::orderbook::{
    MakerSimulation, OrderSide, OrderbookSimulator, SimulationError, TakerSimulation,
};
use crate::position::required_collateral;
use crate::rates::{PoolRateCurve, RateProjection};
use crate::risk::{RiskClassifier, RiskLevel, UserAction};
use crate::types::RequiredCollateral;
use crate::valuation::{risk_indicator, LeverageMode, Valuation, ValuationError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForecastError {
    #[error("order would match against the account's own resting order")]
    SelfMatch,
    #[error(transparent)]
    Valuation(#[from] ValuationError),
    #[error(transparent)]
    Number(#[from] NumberError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("invalid forecast input: {0}")]
    InvalidInput(String),
}

/// Change in account aggregates caused by one hypothetical action.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForecastDelta {
    pub liabilities: FixedDecimal,
    pub required_collateral: FixedDecimal,
    pub weighted_collateral: FixedDecimal,
    pub assets: FixedDecimal,
}

impl Add for ForecastDelta {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            liabilities: self.liabilities.signed_add(rhs.liabilities),
            required_collateral: self.required_collateral.signed_add(rhs.required_collateral),
            weighted_collateral: self.weighted_collateral.signed_add(rhs.weighted_collateral),
            assets: self.assets.signed_add(rhs.assets),
        }
    }
}

fn negate(value: FixedDecimal) -> FixedDecimal {
    FixedDecimal::ZERO.signed_sub(value)
}

fn token_value(qty: u64, exponent: i32, price: FixedDecimal) -> Result<FixedDecimal, NumberError> {
    FixedDecimal::from_decimal(qty, exponent)?.checked_mul(price)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermMarket {
    pub token_exponent: i32,
    pub price: FixedDecimal,
    pub collateral_weight: FixedDecimal,
    pub loan_value_modifier: FixedDecimal,
}

impl TermMarket {
    pub fn value_of(&self, qty: u64) -> Result<FixedDecimal, NumberError> {
        token_value(qty, self.token_exponent, self.price)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PoolActionKind {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
    RepayFromWallet,
}

impl PoolActionKind {
    pub fn user_action(self) -> UserAction {
        match self {
            PoolActionKind::Deposit => UserAction::PoolDeposit,
            PoolActionKind::Withdraw => UserAction::PoolWithdraw,
            PoolActionKind::Borrow => UserAction::PoolBorrow,
            PoolActionKind::Repay => UserAction::PoolRepay,
            PoolActionKind::RepayFromWallet => UserAction::RepayFromWallet,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolAction {
    pub kind: PoolActionKind,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub token_exponent: i32,
    pub price: FixedDecimal,
    pub deposit_weight: FixedDecimal,
    pub loan_value_modifier: FixedDecimal,
    pub vault_tokens: u64,
    pub borrowed_tokens: u64,
    pub curve: PoolRateCurve,
}

impl PoolSnapshot {
    pub fn value_of(&self, qty: u64) -> Result<FixedDecimal, NumberError> {
        token_value(qty, self.token_exponent, self.price)
    }

    /// Whole tokens worth at most `value`; saturates at `u64::MAX`.
    fn tokens_for(&self, value: FixedDecimal) -> Result<u64, ForecastError> {
        if self.price <= FixedDecimal::ZERO {
            return Err(ForecastError::InvalidInput(format!(
                "pool price must be positive, got {}",
                self.price
            )));
        }
        match value
            .checked_div(self.price)
            .and_then(|units| units.as_u64(self.token_exponent))
        {
            Ok(tokens) => Ok(tokens),
            Err(NumberError::Overflow) => Ok(u64::MAX),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolForecast {
    pub delta: ForecastDelta,
    pub rates: RateProjection,
}

/// Token balances the account holds for one pool, in base units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccountBalances {
    pub deposit: u64,
    pub loan: u64,
    pub wallet: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaxTradeAmounts {
    pub deposit: u64,
    pub withdraw: u64,
    pub borrow: u64,
    pub repay: u64,
    pub repay_from_wallet: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Forecast {
    pub mode: LeverageMode,
    pub liabilities: FixedDecimal,
    pub required_collateral: FixedDecimal,
    pub weighted_collateral: FixedDecimal,
    pub assets: FixedDecimal,
    pub equity: FixedDecimal,
    pub available_collateral: FixedDecimal,
    pub risk_indicator: FixedDecimal,
    pub risk_level: RiskLevel,
}

pub struct ActionForecaster<'a> {
    valuation: &'a Valuation,
    mode: LeverageMode,
    setup_leverage_fraction: FixedDecimal,
    classifier: RiskClassifier,
}

impl<'a> ActionForecaster<'a> {
    pub fn new(valuation: &'a Valuation, mode: LeverageMode, config: &EngineConfig) -> Self {
        Self {
            valuation,
            mode,
            setup_leverage_fraction: config.setup_leverage_fraction,
            classifier: RiskClassifier::from_config(config),
        }
    }

    fn claim_factor(&self, value_modifier: FixedDecimal) -> Result<FixedDecimal, NumberError> {
        match self.mode {
            LeverageMode::Setup => value_modifier.checked_mul(self.setup_leverage_fraction),
            LeverageMode::Maintenance => Ok(value_modifier),
        }
    }

    /// Undelivered term deposits are not credited as collateral: the
    /// repayment side carries zero weight whatever the caller passes.
    pub fn term_deposit(
        &self,
        principal: FixedDecimal,
        repayment: FixedDecimal,
        principal_weight: FixedDecimal,
        _repayment_weight: FixedDecimal,
    ) -> Result<ForecastDelta, ForecastError> {
        let repayment_weight = FixedDecimal::ZERO;
        let weighted_collateral = repayment
            .checked_mul(repayment_weight)?
            .checked_sub(principal.checked_mul(principal_weight)?)?;
        Ok(ForecastDelta {
            liabilities: FixedDecimal::ZERO,
            required_collateral: FixedDecimal::ZERO,
            weighted_collateral,
            assets: repayment.checked_sub(principal)?,
        })
    }

    pub fn term_loan(
        &self,
        received: FixedDecimal,
        repayment: FixedDecimal,
        received_weight: FixedDecimal,
        repayment_factor: FixedDecimal,
    ) -> Result<ForecastDelta, ForecastError> {
        let factor = self.claim_factor(repayment_factor)?;
        Ok(ForecastDelta {
            liabilities: repayment,
            required_collateral: required_collateral(repayment, factor)?.saturating_value(),
            weighted_collateral: received.checked_mul(received_weight)?,
            assets: received,
        })
    }

    pub fn forecast_taker(
        &self,
        side: OrderSide,
        fill: &TakerSimulation,
        market: &TermMarket,
    ) -> Result<ForecastDelta, ForecastError> {
        let quote = market.value_of(fill.filled_quote_qty)?;
        let base = market.value_of(fill.filled_base_qty)?;
        match side {
            OrderSide::Lend => self.term_deposit(
                quote,
                base,
                market.collateral_weight,
                market.collateral_weight,
            ),
            OrderSide::Borrow => self.term_loan(
                quote,
                base,
                market.collateral_weight,
                market.loan_value_modifier,
            ),
        }
    }

    pub fn forecast_maker(
        &self,
        side: OrderSide,
        simulation: &MakerSimulation,
        market: &TermMarket,
    ) -> Result<ForecastDelta, ForecastError> {
        if simulation.self_match {
            warn!(target: "margin_engine::forecast", ?side, "refusing maker forecast that matches own resting order");
            return Err(ForecastError::SelfMatch);
        }
        let filled = self.forecast_taker(side, &simulation.filled(), market)?;

        let quote = market.value_of(simulation.posted_quote_qty)?;
        let base = market.value_of(simulation.posted_base_qty)?;
        let posted = match side {
            OrderSide::Lend => self.term_deposit(
                quote,
                base,
                market.collateral_weight,
                market.collateral_weight,
            )?,
            // a resting borrow order owes its repayment now but delivers nothing until filled
            OrderSide::Borrow => ForecastDelta {
                assets: FixedDecimal::ZERO,
                ..self.term_loan(quote, base, FixedDecimal::ZERO, market.loan_value_modifier)?
            },
        };
        Ok(filled + posted)
    }

    pub fn forecast_taker_with<S: OrderbookSimulator + ?Sized>(
        &self,
        simulator: &S,
        side: OrderSide,
        amount: u64,
        limit_price: Option<u64>,
        market: &TermMarket,
    ) -> Result<(TakerSimulation, ForecastDelta), ForecastError> {
        let fill = simulator.simulate_taker(side, amount, limit_price)?;
        let delta = self.forecast_taker(side, &fill, market)?;
        Ok((fill, delta))
    }

    pub fn forecast_maker_with<S: OrderbookSimulator + ?Sized>(
        &self,
        simulator: &S,
        side: OrderSide,
        amount: u64,
        limit_price: u64,
        account_id: &str,
        market: &TermMarket,
    ) -> Result<(MakerSimulation, ForecastDelta), ForecastError> {
        let simulation = simulator.simulate_maker(side, amount, limit_price, account_id)?;
        let delta = self.forecast_maker(side, &simulation, market)?;
        Ok((simulation, delta))
    }

    // borrowed proceeds stay deposited in the pool
    pub fn forecast_pool(
        &self,
        pool: &PoolSnapshot,
        action: PoolAction,
    ) -> Result<PoolForecast, ForecastError> {
        let amount = action.amount;
        let value = pool.value_of(amount)?;
        let weighted = value.checked_mul(pool.deposit_weight)?;
        let required = required_collateral(value, self.claim_factor(pool.loan_value_modifier)?)?;
        let released = match required {
            RequiredCollateral::Value(v) => negate(v),
            // an unbounded requirement cannot be partially released
            RequiredCollateral::Unbounded => FixedDecimal::ZERO,
        };
        let exceeds = |what: &str, available: u64| {
            ForecastError::InvalidInput(format!(
                "{:?} of {amount} exceeds {what} of {available}",
                action.kind
            ))
        };

        let mut vault = pool.vault_tokens;
        let mut borrowed = pool.borrowed_tokens;
        let delta = match action.kind {
            PoolActionKind::Deposit => {
                vault = vault.checked_add(amount).ok_or(NumberError::Overflow)?;
                ForecastDelta {
                    weighted_collateral: weighted,
                    assets: value,
                    ..Default::default()
                }
            }
            PoolActionKind::Withdraw => {
                vault = vault
                    .checked_sub(amount)
                    .ok_or_else(|| exceeds("vault liquidity", pool.vault_tokens))?;
                ForecastDelta {
                    weighted_collateral: negate(weighted),
                    assets: negate(value),
                    ..Default::default()
                }
            }
            PoolActionKind::Borrow => {
                if amount > vault {
                    return Err(exceeds("vault liquidity", vault));
                }
                borrowed = borrowed.checked_add(amount).ok_or(NumberError::Overflow)?;
                ForecastDelta {
                    liabilities: value,
                    required_collateral: required.saturating_value(),
                    weighted_collateral: weighted,
                    assets: value,
                }
            }
            PoolActionKind::Repay => {
                borrowed = borrowed
                    .checked_sub(amount)
                    .ok_or_else(|| exceeds("outstanding borrows", pool.borrowed_tokens))?;
                ForecastDelta {
                    liabilities: negate(value),
                    required_collateral: released,
                    weighted_collateral: negate(weighted),
                    assets: negate(value),
                }
            }
            PoolActionKind::RepayFromWallet => {
                borrowed = borrowed
                    .checked_sub(amount)
                    .ok_or_else(|| exceeds("outstanding borrows", pool.borrowed_tokens))?;
                vault = vault.checked_add(amount).ok_or(NumberError::Overflow)?;
                ForecastDelta {
                    liabilities: negate(value),
                    required_collateral: released,
                    ..Default::default()
                }
            }
        };

        Ok(PoolForecast {
            delta,
            rates: pool.curve.project(vault, borrowed)?,
        })
    }

    /// Largest amount of each pool action the account can take. Withdrawals
    /// and borrows are bounded by the setup requirement whatever the mode.
    pub fn max_amounts(
        &self,
        pool: &PoolSnapshot,
        balances: &AccountBalances,
    ) -> Result<MaxTradeAmounts, ForecastError> {
        let headroom = self.valuation.available_setup_collateral.max(FixedDecimal::ZERO);

        let withdraw = if pool.deposit_weight.is_zero() {
            balances.deposit
        } else {
            pool.tokens_for(headroom.checked_div(pool.deposit_weight)?)?
                .min(balances.deposit)
        }
        .min(pool.vault_tokens);

        let factor = pool.loan_value_modifier.checked_mul(self.setup_leverage_fraction)?;
        let borrow = if factor.is_zero() {
            0
        } else {
            // headroom consumed per unit of value borrowed
            let cost = FixedDecimal::ONE
                .checked_add(FixedDecimal::ONE.checked_div(factor)?)?
                .checked_sub(pool.deposit_weight)?;
            if cost <= FixedDecimal::ZERO {
                pool.vault_tokens
            } else {
                pool.tokens_for(headroom.checked_div(cost)?)?.min(pool.vault_tokens)
            }
        };

        Ok(MaxTradeAmounts {
            deposit: balances.wallet,
            withdraw,
            borrow,
            repay: balances.loan.min(balances.deposit),
            repay_from_wallet: balances.loan.min(balances.wallet),
        })
    }

    pub fn apply(&self, delta: &ForecastDelta) -> Result<Forecast, ForecastError> {
        let current = self.valuation;
        let liabilities = current.liabilities.signed_add(delta.liabilities);
        let required_collateral = current
            .required_collateral_for(self.mode)
            .signed_add(delta.required_collateral);
        let weighted_collateral = current.weighted_collateral.signed_add(delta.weighted_collateral);
        let assets = current.assets.signed_add(delta.assets);

        for (aggregate, value) in [
            ("liabilities", liabilities),
            ("required_collateral", required_collateral),
            ("weighted_collateral", weighted_collateral),
            ("assets", assets),
        ] {
            if value.is_negative() {
                error!(target: "margin_engine::forecast", aggregate, %value, "unexpected state in forecast accounting");
                return Err(ValuationError::NegativeAggregate { aggregate, value }.into());
            }
        }

        let risk_indicator = risk_indicator(required_collateral, weighted_collateral, liabilities)?;
        Ok(Forecast {
            mode: self.mode,
            liabilities,
            required_collateral,
            weighted_collateral,
            assets,
            equity: assets.signed_sub(liabilities),
            available_collateral: weighted_collateral
                .signed_sub(liabilities)
                .signed_sub(required_collateral),
            risk_indicator,
            risk_level: self.classifier.classify(risk_indicator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::tests::position;
    use crate::rates::utilization_ratio;
    use crate::types::PositionKind;

    fn d(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn usdc(amount: u64) -> u64 {
        amount * 1_000_000
    }

    fn valuation_with_deposit(amount: u64) -> Valuation {
        let positions = vec![position(PositionKind::Deposit, usdc(amount), 1, "1")];
        Valuation::from_positions(&positions, 1_000, FixedDecimal::from_bps(5_000)).unwrap()
    }

    fn market(collateral_weight: &str) -> TermMarket {
        TermMarket {
            token_exponent: -6,
            price: FixedDecimal::ONE,
            collateral_weight: d(collateral_weight),
            loan_value_modifier: d("0.5"),
        }
    }

    fn pool() -> PoolSnapshot {
        PoolSnapshot {
            token_exponent: -6,
            price: FixedDecimal::ONE,
            deposit_weight: FixedDecimal::ONE,
            loan_value_modifier: d("0.5"),
            vault_tokens: usdc(5_000),
            borrowed_tokens: usdc(5_000),
            curve: PoolRateCurve {
                utilization_rate_1: 7_000,
                utilization_rate_2: 9_000,
                borrow_rate_0: 100,
                borrow_rate_1: 800,
                borrow_rate_2: 3_000,
                borrow_rate_3: 15_000,
                management_fee_rate: 1_000,
            },
        }
    }

    struct StubBook {
        taker: TakerSimulation,
        maker: MakerSimulation,
    }

    impl OrderbookSimulator for StubBook {
        fn simulate_taker(
            &self,
            _side: OrderSide,
            amount: u64,
            _limit_price: Option<u64>,
        ) -> Result<TakerSimulation, SimulationError> {
            if amount == 0 {
                return Err(SimulationError("empty order".into()));
            }
            Ok(self.taker)
        }

        fn simulate_maker(
            &self,
            _side: OrderSide,
            _amount: u64,
            _limit_price: u64,
            _account_id: &str,
        ) -> Result<MakerSimulation, SimulationError> {
            Ok(self.maker)
        }
    }

    fn book(self_match: bool) -> StubBook {
        StubBook {
            taker: TakerSimulation {
                filled_base_qty: usdc(1_100),
                filled_quote_qty: usdc(1_000),
                volume_weighted_average_rate: 0.1,
            },
            maker: MakerSimulation {
                filled_base_qty: usdc(1_100),
                filled_quote_qty: usdc(1_000),
                filled_vwar: 0.1,
                posted_base_qty: usdc(110),
                posted_quote_qty: usdc(100),
                self_match,
            },
        }
    }

    #[test]
    fn test_term_loan_maintenance() {
        let valuation = Valuation::default();
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let delta = forecaster.term_loan(d("1000"), d("1100"), d("0.9"), d("0.5")).unwrap();
        assert_eq!(delta.liabilities, d("1100"));
        assert_eq!(delta.required_collateral, d("2200"));
        assert_eq!(delta.weighted_collateral, d("900"));
        assert_eq!(delta.assets, d("1000"));
    }

    #[test]
    fn test_term_loan_setup_is_stricter() {
        let valuation = Valuation::default();
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Setup, &EngineConfig::default());
        let delta = forecaster.term_loan(d("1000"), d("1100"), d("0.9"), d("0.5")).unwrap();
        assert_eq!(delta.required_collateral, d("4400"));
    }

    #[test]
    fn test_term_loan_without_leverage_is_unbounded() {
        let valuation = Valuation::default();
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let delta = forecaster.term_loan(d("1000"), d("1100"), d("0.9"), FixedDecimal::ZERO).unwrap();
        assert_eq!(delta.required_collateral, FixedDecimal::MAX);
    }

    #[test]
    fn test_term_deposit_ignores_repayment_weight() {
        let valuation = Valuation::default();
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        for repayment_weight in ["0", "0.9", "1"] {
            let delta = forecaster
                .term_deposit(d("500"), d("550"), d("0.95"), d(repayment_weight))
                .unwrap();
            assert_eq!(delta.liabilities, FixedDecimal::ZERO);
            assert_eq!(delta.required_collateral, FixedDecimal::ZERO);
            assert_eq!(delta.weighted_collateral, d("-475"));
            assert_eq!(delta.assets, d("50"));
        }
    }

    #[test]
    fn test_delta_addition_is_pairwise() {
        let a = ForecastDelta {
            liabilities: d("1"),
            required_collateral: d("2"),
            weighted_collateral: d("-3"),
            assets: d("4"),
        };
        let sum = a + a;
        assert_eq!(sum.liabilities, d("2"));
        assert_eq!(sum.required_collateral, d("4"));
        assert_eq!(sum.weighted_collateral, d("-6"));
        assert_eq!(sum.assets, d("8"));
        assert_eq!(a + ForecastDelta::default(), a);
    }

    #[test]
    fn test_taker_borrow_from_simulator() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let (fill, delta) = forecaster
            .forecast_taker_with(&book(false), OrderSide::Borrow, usdc(1_000), None, &market("0.9"))
            .unwrap();
        assert_eq!(fill.filled_quote_qty, usdc(1_000));
        assert_eq!(delta.liabilities, d("1100"));
        assert_eq!(delta.required_collateral, d("2200"));
        assert_eq!(delta.weighted_collateral, d("900"));

        let err = forecaster
            .forecast_taker_with(&book(false), OrderSide::Borrow, 0, None, &market("0.9"))
            .unwrap_err();
        assert!(matches!(err, ForecastError::Simulation(_)));
    }

    #[test]
    fn test_maker_self_match_is_refused() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Setup, &EngineConfig::default());
        let result = forecaster.forecast_maker_with(
            &book(true),
            OrderSide::Lend,
            usdc(1_100),
            1,
            "account",
            &market("0.95"),
        );
        assert_eq!(result, Err(ForecastError::SelfMatch));
    }

    #[test]
    fn test_maker_lend_combines_fill_and_post() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let simulation = MakerSimulation {
            filled_base_qty: usdc(550),
            filled_quote_qty: usdc(500),
            filled_vwar: 0.1,
            posted_base_qty: usdc(220),
            posted_quote_qty: usdc(200),
            self_match: false,
        };
        let delta = forecaster
            .forecast_maker(OrderSide::Lend, &simulation, &market("0.95"))
            .unwrap();
        assert_eq!(delta.weighted_collateral, d("-665"));
        assert_eq!(delta.assets, d("70"));
        assert_eq!(delta.liabilities, FixedDecimal::ZERO);
    }

    #[test]
    fn test_maker_borrow_posts_claim_without_proceeds() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let delta = forecaster
            .forecast_maker(OrderSide::Borrow, &book(false).maker, &market("0.9"))
            .unwrap();
        assert_eq!(delta.liabilities, d("1210"));
        assert_eq!(delta.required_collateral, d("2420"));
        assert_eq!(delta.weighted_collateral, d("900"));
        assert_eq!(delta.assets, d("1000"));
    }

    #[test]
    fn test_apply_projects_risk() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let delta = forecaster.term_loan(d("1000"), d("1100"), d("0.9"), d("0.5")).unwrap();
        let forecast = forecaster.apply(&delta).unwrap();

        assert_eq!(forecast.liabilities, d("1100"));
        assert_eq!(forecast.required_collateral, d("2200"));
        assert_eq!(forecast.weighted_collateral, d("10900"));
        assert_eq!(forecast.assets, d("11000"));
        assert_eq!(forecast.equity, d("9900"));
        assert_eq!(forecast.available_collateral, d("7600"));
        assert_eq!(
            forecast.risk_indicator,
            risk_indicator(d("2200"), d("10900"), d("1100")).unwrap()
        );
        assert_eq!(forecast.risk_level, RiskLevel::Healthy);
    }

    #[test]
    fn test_apply_reaches_liquidation_boundary() {
        let valuation = valuation_with_deposit(1_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        // borrow 1000 against 1000 at modifier 0.5: (2000 + 1000) / 2000 > 1
        let forecast = forecaster
            .apply(&forecaster.term_loan(d("1000"), d("1000"), FixedDecimal::ONE, d("0.5")).unwrap())
            .unwrap();
        assert_eq!(forecast.risk_level, RiskLevel::Liquidatable);
        assert!(forecast.available_collateral.is_negative());
    }

    #[test]
    fn test_apply_fails_closed_on_negative_aggregate() {
        let valuation = valuation_with_deposit(100);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let forecast = forecaster
            .forecast_pool(&pool(), PoolAction { kind: PoolActionKind::Withdraw, amount: usdc(200) })
            .unwrap();
        let err = forecaster.apply(&forecast.delta).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::Valuation(ValuationError::NegativeAggregate { aggregate: "weighted_collateral", .. })
        ));
    }

    #[test]
    fn test_pool_borrow_and_projected_rates() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let forecast = forecaster
            .forecast_pool(&pool(), PoolAction { kind: PoolActionKind::Borrow, amount: usdc(1_000) })
            .unwrap();
        assert_eq!(forecast.delta.liabilities, d("1000"));
        assert_eq!(forecast.delta.required_collateral, d("2000"));
        assert_eq!(forecast.delta.weighted_collateral, d("1000"));
        assert_eq!(
            forecast.rates.utilization,
            utilization_ratio(usdc(6_000), usdc(5_000))
        );
        assert_eq!(
            forecast.rates.borrow_apr,
            pool().curve.borrow_apr(forecast.rates.utilization).unwrap()
        );
    }

    #[test]
    fn test_pool_repay_from_wallet() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Setup, &EngineConfig::default());
        let forecast = forecaster
            .forecast_pool(&pool(), PoolAction { kind: PoolActionKind::RepayFromWallet, amount: usdc(1_000) })
            .unwrap();
        assert_eq!(forecast.delta.liabilities, d("-1000"));
        assert_eq!(forecast.delta.required_collateral, d("-4000"));
        assert_eq!(forecast.delta.weighted_collateral, FixedDecimal::ZERO);
        assert_eq!(forecast.rates.utilization, d("0.4"));
    }

    #[test]
    fn test_pool_deposit_and_limits() {
        let valuation = valuation_with_deposit(10_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let forecast = forecaster
            .forecast_pool(&pool(), PoolAction { kind: PoolActionKind::Deposit, amount: usdc(5_000) })
            .unwrap();
        assert_eq!(forecast.delta.weighted_collateral, d("5000"));
        assert_eq!(
            forecast.rates.utilization,
            utilization_ratio(usdc(5_000), usdc(10_000))
        );

        for kind in [PoolActionKind::Withdraw, PoolActionKind::Borrow, PoolActionKind::Repay] {
            let result = forecaster.forecast_pool(&pool(), PoolAction { kind, amount: usdc(6_000) });
            assert!(matches!(result, Err(ForecastError::InvalidInput(_))), "{kind:?}");
        }
    }

    #[test]
    fn test_max_amounts_from_setup_headroom() {
        let valuation = valuation_with_deposit(1_000);
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Maintenance, &EngineConfig::default());
        let balances = AccountBalances {
            deposit: usdc(1_000),
            loan: usdc(300),
            wallet: usdc(50),
        };
        let max = forecaster.max_amounts(&pool(), &balances).unwrap();
        // setup factor 0.25: each unit borrowed costs 1 + 4 - 1 = 4 of headroom
        assert_eq!(max.borrow, usdc(250));
        assert_eq!(max.withdraw, usdc(1_000));
        assert_eq!(max.deposit, usdc(50));
        assert_eq!(max.repay, usdc(300));
        assert_eq!(max.repay_from_wallet, usdc(50));

        let setup = ActionForecaster::new(&valuation, LeverageMode::Setup, &EngineConfig::default());
        let borrow = setup
            .forecast_pool(&pool(), PoolAction { kind: PoolActionKind::Borrow, amount: max.borrow })
            .unwrap();
        assert_eq!(setup.apply(&borrow.delta).unwrap().available_collateral, FixedDecimal::ZERO);
    }

    #[test]
    fn test_max_withdraw_keeps_setup_requirement() {
        let positions = vec![
            position(PositionKind::Deposit, usdc(1_000), 1, "0.8"),
            position(PositionKind::Claim, usdc(100), 1, "0.5"),
        ];
        let valuation = Valuation::from_positions(&positions, 1_000, FixedDecimal::from_bps(5_000)).unwrap();
        // 800 - 100 - 400 = 300 headroom at weight 0.8
        assert_eq!(valuation.available_setup_collateral, d("300"));
        let forecaster = ActionForecaster::new(&valuation, LeverageMode::Setup, &EngineConfig::default());
        let snapshot = PoolSnapshot { deposit_weight: d("0.8"), ..pool() };
        let max = forecaster
            .max_amounts(&snapshot, &AccountBalances { deposit: usdc(1_000), ..Default::default() })
            .unwrap();
        assert_eq!(max.withdraw, usdc(375));
    }
}

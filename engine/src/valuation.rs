//! Aggregate valuation of a margin account. Stale prices are listed, not fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::number::{FixedDecimal, NumberError};
use crate::types::{PositionKind, PricedPosition, StalePosition};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValuationError {
    #[error(transparent)]
    Number(#[from] NumberError),
    #[error("expected a {expected:?} position, found {found:?}")]
    KindMismatch {
        expected: PositionKind,
        found: PositionKind,
    },
    #[error("{count} position(s) have stale or invalid prices")]
    StalePositions { count: usize },
    #[error("{aggregate} is negative ({value})")]
    NegativeAggregate {
        aggregate: &'static str,
        value: FixedDecimal,
    },
}

/// Which collateral requirement applies: the stricter setup requirement for
/// opening new exposure, or the maintenance requirement for open positions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LeverageMode {
    Setup,
    #[default]
    Maintenance,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Valuation {
    pub assets: FixedDecimal,
    pub liabilities: FixedDecimal,
    pub required_collateral: FixedDecimal,
    pub required_setup_collateral: FixedDecimal,
    pub weighted_collateral: FixedDecimal,
    pub effective_collateral: FixedDecimal,
    pub available_collateral: FixedDecimal,
    pub available_setup_collateral: FixedDecimal,
    pub past_due: bool,
    pub stale_collateral: Vec<StalePosition>,
    pub claim_errors: Vec<StalePosition>,
    pub total_positions: usize,
}

impl Valuation {
    pub fn from_positions(
        positions: &[PricedPosition],
        now: u64,
        setup_leverage_fraction: FixedDecimal,
    ) -> Result<Self, ValuationError> {
        let mut valuation = Valuation {
            total_positions: positions.len(),
            ..Default::default()
        };

        for position in positions {
            let staleness = position.price_staleness(now);
            match position.kind {
                PositionKind::NoValue => continue,
                PositionKind::Deposit => {
                    if let Some(reason) = staleness {
                        debug!(target: "margin_engine::valuation", token = %position.token, ?reason, "stale collateral price");
                        valuation.stale_collateral.push(StalePosition {
                            token: position.token.clone(),
                            reason,
                        });
                    }
                    valuation.assets = valuation.assets.saturating_add(position.value()?);
                    valuation.weighted_collateral = valuation
                        .weighted_collateral
                        .saturating_add(position.collateral_value()?);
                }
                PositionKind::Claim => {
                    if let Some(reason) = staleness {
                        debug!(target: "margin_engine::valuation", token = %position.token, ?reason, "stale claim price");
                        valuation.claim_errors.push(StalePosition {
                            token: position.token.clone(),
                            reason,
                        });
                    }
                    valuation.liabilities = valuation.liabilities.saturating_add(position.value()?);
                    valuation.required_collateral = valuation.required_collateral.saturating_add(
                        position
                            .required_collateral_value(FixedDecimal::ONE)?
                            .saturating_value(),
                    );
                    valuation.required_setup_collateral =
                        valuation.required_setup_collateral.saturating_add(
                            position
                                .required_collateral_value(setup_leverage_fraction)?
                                .saturating_value(),
                        );
                    if position.flags.past_due && position.balance > 0 {
                        valuation.past_due = true;
                    }
                }
            }
        }

        valuation.effective_collateral = valuation
            .weighted_collateral
            .signed_sub(valuation.liabilities);
        valuation.available_collateral = valuation
            .effective_collateral
            .signed_sub(valuation.required_collateral);
        valuation.available_setup_collateral = valuation
            .effective_collateral
            .signed_sub(valuation.required_setup_collateral);
        Ok(valuation)
    }

    pub fn is_fresh(&self) -> bool {
        self.stale_collateral.is_empty() && self.claim_errors.is_empty()
    }

    pub fn require_fresh(&self) -> Result<(), ValuationError> {
        if self.is_fresh() {
            Ok(())
        } else {
            Err(ValuationError::StalePositions {
                count: self.stale_collateral.len() + self.claim_errors.len(),
            })
        }
    }

    pub fn required_collateral_for(&self, mode: LeverageMode) -> FixedDecimal {
        match mode {
            LeverageMode::Setup => self.required_setup_collateral,
            LeverageMode::Maintenance => self.required_collateral,
        }
    }

    pub fn equity(&self) -> FixedDecimal {
        self.assets.signed_sub(self.liabilities)
    }

    pub fn risk_indicator(&self) -> Result<FixedDecimal, ValuationError> {
        self.risk_indicator_for(LeverageMode::Maintenance)
    }

    pub fn risk_indicator_for(&self, mode: LeverageMode) -> Result<FixedDecimal, ValuationError> {
        risk_indicator(
            self.required_collateral_for(mode),
            self.weighted_collateral,
            self.liabilities,
        )
    }
}

/// Leverage indicator: `(required + liabilities) / weighted`.
///
/// Zero without any collateral requirement, `MAX` when the requirement is
/// unbounded or nothing backs it. For a non-zero requirement the result is at least
/// one exactly when `weighted - liabilities - required <= 0`.
pub fn risk_indicator(
    required_collateral: FixedDecimal,
    weighted_collateral: FixedDecimal,
    liabilities: FixedDecimal,
) -> Result<FixedDecimal, ValuationError> {
    for (aggregate, value) in [
        ("required_collateral", required_collateral),
        ("weighted_collateral", weighted_collateral),
        ("liabilities", liabilities),
    ] {
        if value.is_negative() {
            return Err(ValuationError::NegativeAggregate { aggregate, value });
        }
    }
    if required_collateral.is_zero() {
        return Ok(FixedDecimal::ZERO);
    }
    if weighted_collateral.is_zero() {
        return Ok(FixedDecimal::MAX);
    }
    let exposure = required_collateral.saturating_add(liabilities);
    if exposure == FixedDecimal::MAX {
        return Ok(FixedDecimal::MAX);
    }
    match exposure.checked_div(weighted_collateral) {
        Ok(indicator) => Ok(indicator),
        // only when the quotient itself is out of range
        Err(NumberError::Overflow) => Ok(FixedDecimal::MAX),
        Err(e) => Err(e.into()),
    }
}

//! Valuation of a single priced position.

use crate::number::{FixedDecimal, NumberError};
use crate::types::{PositionKind, PricedPosition, RequiredCollateral, StaleReason};
use crate::valuation::ValuationError;

/// Collateral needed to back a claim worth `value` at the given leverage factor.
pub fn required_collateral(
    value: FixedDecimal,
    factor: FixedDecimal,
) -> Result<RequiredCollateral, NumberError> {
    if value.is_zero() {
        return Ok(RequiredCollateral::Value(FixedDecimal::ZERO));
    }
    if factor.is_zero() {
        return Ok(RequiredCollateral::Unbounded);
    }
    value.checked_div(factor).map(RequiredCollateral::Value)
}

impl PricedPosition {
    /// USD value: `balance * 10^exponent * price.value * 10^price.exponent`.
    pub fn value(&self) -> Result<FixedDecimal, NumberError> {
        // u64 * i64 always fits in i128.
        let units = i128::from(self.balance) * i128::from(self.price.value);
        let exponent = self
            .exponent
            .checked_add(self.price.exponent)
            .ok_or(NumberError::Overflow)?;
        FixedDecimal::from_decimal(units, exponent)
    }

    pub fn collateral_value(&self) -> Result<FixedDecimal, ValuationError> {
        self.expect_kind(PositionKind::Deposit)?;
        Ok(self.value()?.checked_mul(self.value_modifier)?)
    }

    /// Pass [`FixedDecimal::ONE`] for the maintenance requirement, or the
    /// setup leverage fraction for the stricter requirement on new exposure.
    pub fn required_collateral_value(
        &self,
        setup_leverage_fraction: FixedDecimal,
    ) -> Result<RequiredCollateral, ValuationError> {
        self.expect_kind(PositionKind::Claim)?;
        let factor = self.value_modifier.checked_mul(setup_leverage_fraction)?;
        Ok(required_collateral(self.value()?, factor)?)
    }

    pub fn price_staleness(&self, now: u64) -> Option<StaleReason> {
        if !self.price.is_valid {
            return Some(StaleReason::InvalidPrice);
        }
        let age = now.saturating_sub(self.price.timestamp);
        (age > self.max_staleness).then_some(StaleReason::Outdated { age })
    }

    fn expect_kind(&self, expected: PositionKind) -> Result<(), ValuationError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ValuationError::KindMismatch {
                expected,
                found: self.kind,
            })
        }
    }
}

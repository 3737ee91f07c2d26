use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::number::{FixedDecimal, NumberError};

const MAX_BPS: u16 = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateCurveError {
    #[error("utilization breakpoints out of order: {first} > {second}")]
    UnorderedBreakpoints { first: u16, second: u16 },
    #[error("utilization breakpoint {0} bps exceeds 100%")]
    BreakpointOutOfRange(u16),
    #[error("management fee {0} bps exceeds 100%")]
    FeeOutOfRange(u16),
}

// basis points; the curve runs through (0, r0), (u1, r1), (u2, r2), (1, r3)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolRateCurve {
    pub utilization_rate_1: u16,
    pub utilization_rate_2: u16,
    pub borrow_rate_0: u16,
    pub borrow_rate_1: u16,
    pub borrow_rate_2: u16,
    pub borrow_rate_3: u16,
    pub management_fee_rate: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateProjection {
    pub utilization: FixedDecimal,
    pub borrow_apr: FixedDecimal,
    pub deposit_apy: FixedDecimal,
}

/// Share of the pool's tokens currently lent out.
pub fn utilization_ratio(borrowed_tokens: u64, vault_tokens: u64) -> FixedDecimal {
    let total = u128::from(borrowed_tokens) + u128::from(vault_tokens);
    if total == 0 {
        return FixedDecimal::ZERO;
    }
    // borrowed <= total, so the ratio never exceeds ONE and fits in i128.
    let scaled = u128::from(borrowed_tokens) * FixedDecimal::ONE.raw() as u128 / total;
    FixedDecimal::from_raw(scaled as i128)
}

fn interpolate(
    u: FixedDecimal,
    (u_lo, r_lo): (FixedDecimal, FixedDecimal),
    (u_hi, r_hi): (FixedDecimal, FixedDecimal),
) -> Result<FixedDecimal, NumberError> {
    let progress = u.checked_sub(u_lo)?.checked_div(u_hi.checked_sub(u_lo)?)?;
    r_lo.checked_add(r_hi.checked_sub(r_lo)?.checked_mul(progress)?)
}

impl PoolRateCurve {
    pub fn validate(&self) -> Result<(), RateCurveError> {
        for breakpoint in [self.utilization_rate_1, self.utilization_rate_2] {
            if breakpoint > MAX_BPS {
                return Err(RateCurveError::BreakpointOutOfRange(breakpoint));
            }
        }
        if self.utilization_rate_1 > self.utilization_rate_2 {
            return Err(RateCurveError::UnorderedBreakpoints {
                first: self.utilization_rate_1,
                second: self.utilization_rate_2,
            });
        }
        if self.management_fee_rate > MAX_BPS {
            return Err(RateCurveError::FeeOutOfRange(self.management_fee_rate));
        }
        Ok(())
    }

    /// Borrow APR at `utilization`, clamped to `[0, 1]`.
    pub fn borrow_apr(&self, utilization: FixedDecimal) -> Result<FixedDecimal, NumberError> {
        let u = utilization.clamp(FixedDecimal::ZERO, FixedDecimal::ONE);
        let u1 = FixedDecimal::from_bps(self.utilization_rate_1);
        let u2 = FixedDecimal::from_bps(self.utilization_rate_2);
        let r0 = FixedDecimal::from_bps(self.borrow_rate_0);
        let r1 = FixedDecimal::from_bps(self.borrow_rate_1);
        let r2 = FixedDecimal::from_bps(self.borrow_rate_2);
        let r3 = FixedDecimal::from_bps(self.borrow_rate_3);

        if u >= FixedDecimal::ONE {
            Ok(r3)
        } else if u < u1 {
            interpolate(u, (FixedDecimal::ZERO, r0), (u1, r1))
        } else if u < u2 {
            interpolate(u, (u1, r1), (u2, r2))
        } else {
            interpolate(u, (u2, r2), (FixedDecimal::ONE, r3))
        }
    }

    /// `borrow_apr * utilization * (1 - management_fee)`.
    pub fn deposit_apy(&self, utilization: FixedDecimal) -> Result<FixedDecimal, NumberError> {
        let u = utilization.clamp(FixedDecimal::ZERO, FixedDecimal::ONE);
        let fee_haircut = FixedDecimal::ONE.checked_sub(FixedDecimal::from_bps(self.management_fee_rate))?;
        self.borrow_apr(u)?.checked_mul(u)?.checked_mul(fee_haircut)
    }

    pub fn project(&self, vault_tokens: u64, borrowed_tokens: u64) -> Result<RateProjection, NumberError> {
        let utilization = utilization_ratio(borrowed_tokens, vault_tokens);
        Ok(RateProjection {
            utilization,
            borrow_apr: self.borrow_apr(utilization)?,
            deposit_apy: self.deposit_apy(utilization)?,
        })
    }
}

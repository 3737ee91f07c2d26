//! Fixed-point decimal used for every USD figure. `MAX` doubles as the
//! "unbounded" sentinel.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Number of fractional decimal digits carried by [`FixedDecimal`].
pub const PRECISION: i32 = 10;

const ONE_RAW: i128 = 10_000_000_000;
const BPS_RAW: i128 = ONE_RAW / 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NumberError {
    #[error("fixed-point overflow")]
    Overflow,
    #[error("negative value {0} where a non-negative amount is required")]
    Negative(FixedDecimal),
    #[error("division by zero")]
    DivideByZero,
    #[error("invalid decimal literal: {0:?}")]
    Parse(String),
}

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedDecimal(i128);

fn pow10(exponent: u32) -> Option<i128> {
    10i128.checked_pow(exponent)
}

/// Full product of two `u128` values as `(high, low)` halves.
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);
    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let mid = (ll >> 64) + (lh & MASK) + (hl & MASK);
    let lo = (ll & MASK) | (mid << 64);
    let hi = a_hi * b_hi + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

/// `(hi, lo) / d` by binary long division; `None` when the quotient
/// does not fit in a `u128`.
fn div_wide(hi: u128, lo: u128, d: u128) -> Option<u128> {
    if d == 0 || hi >= d {
        return None;
    }
    let mut rem = hi;
    let mut quotient = 0u128;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> bit) & 1);
        quotient <<= 1;
        // rem < d before the shift, so one subtraction always suffices
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quotient |= 1;
        }
    }
    Some(quotient)
}

/// `a * b / d` truncated toward zero. Exact whenever the result fits in
/// an `i128`, whatever the size of the intermediate product.
fn mul_div(a: i128, b: i128, d: i128) -> Result<i128, NumberError> {
    if d == 0 {
        return Err(NumberError::DivideByZero);
    }
    if let Some(product) = a.checked_mul(b) {
        return product.checked_div(d).ok_or(NumberError::Overflow);
    }
    let (hi, lo) = widening_mul(a.unsigned_abs(), b.unsigned_abs());
    let magnitude = div_wide(hi, lo, d.unsigned_abs()).ok_or(NumberError::Overflow)?;
    if (a < 0) ^ (b < 0) ^ (d < 0) {
        0i128.checked_sub_unsigned(magnitude).ok_or(NumberError::Overflow)
    } else {
        i128::try_from(magnitude).map_err(|_| NumberError::Overflow)
    }
}

fn shift_for(exponent: i32) -> Result<i32, NumberError> {
    exponent.checked_add(PRECISION).ok_or(NumberError::Overflow)
}

impl FixedDecimal {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(ONE_RAW);
    pub const MAX: Self = Self(i128::MAX);

    pub const fn from_raw(raw: i128) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i128 {
        self.0
    }

    /// Builds `value * 10^exponent`. Digits below the internal precision are
    /// truncated toward zero.
    pub fn from_decimal(value: impl Into<i128>, exponent: i32) -> Result<Self, NumberError> {
        let value = value.into();
        let shift = shift_for(exponent)?;
        if shift >= 0 {
            let scale = pow10(shift.unsigned_abs()).ok_or(NumberError::Overflow)?;
            value.checked_mul(scale).map(Self).ok_or(NumberError::Overflow)
        } else {
            // 10^39 and above exceed i128, so the quotient is zero anyway.
            Ok(pow10(shift.unsigned_abs()).map_or(Self::ZERO, |divisor| Self(value / divisor)))
        }
    }

    pub const fn from_bps(bps: u16) -> Self {
        Self(bps as i128 * BPS_RAW)
    }

    pub const fn from_integer(value: i64) -> Self {
        Self(value as i128 * ONE_RAW)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, NumberError> {
        self.0.checked_add(rhs.0).map(Self).ok_or(NumberError::Overflow)
    }

    pub fn checked_sub(self, rhs: Self) -> Result<Self, NumberError> {
        self.0.checked_sub(rhs.0).map(Self).ok_or(NumberError::Overflow)
    }

    pub fn checked_mul(self, rhs: Self) -> Result<Self, NumberError> {
        mul_div(self.0, rhs.0, ONE_RAW).map(Self)
    }

    pub fn checked_div(self, rhs: Self) -> Result<Self, NumberError> {
        if rhs.is_zero() {
            return Err(NumberError::DivideByZero);
        }
        mul_div(self.0, ONE_RAW, rhs.0).map(Self)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0).max(0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0).max(0))
    }

    pub fn saturating_mul(self, rhs: Self) -> Self {
        match self.checked_mul(rhs) {
            Ok(product) => product.max(Self::ZERO),
            Err(_) if self.is_negative() == rhs.is_negative() => Self::MAX,
            Err(_) => Self::ZERO,
        }
    }

    /// Signed sum that saturates at the `i128` bounds instead of wrapping.
    pub fn signed_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Signed difference that saturates at the `i128` bounds instead of wrapping.
    pub fn signed_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Converts to an integer count of `10^exponent` units, truncating toward zero.
    pub fn to_integer(self, exponent: i32) -> Result<i128, NumberError> {
        if self == Self::MAX {
            return Err(NumberError::Overflow);
        }
        let shift = shift_for(exponent)?;
        if shift >= 0 {
            Ok(pow10(shift.unsigned_abs()).map_or(0, |divisor| self.0 / divisor))
        } else {
            let scale = pow10(shift.unsigned_abs()).ok_or(NumberError::Overflow)?;
            self.0.checked_mul(scale).ok_or(NumberError::Overflow)
        }
    }

    /// Token amount in `10^exponent` units, rounded down.
    pub fn as_u64(self, exponent: i32) -> Result<u64, NumberError> {
        if self.is_negative() {
            return Err(NumberError::Negative(self));
        }
        u64::try_from(self.to_integer(exponent)?).map_err(|_| NumberError::Overflow)
    }

    /// Token amount in `10^exponent` units, rounded up.
    pub fn as_u64_ceil(self, exponent: i32) -> Result<u64, NumberError> {
        if self.is_negative() {
            return Err(NumberError::Negative(self));
        }
        let floor = self.to_integer(exponent)?;
        let shift = shift_for(exponent)?;
        let has_remainder = shift > 0
            && pow10(shift.unsigned_abs()).map_or(self.0 != 0, |divisor| self.0 % divisor != 0);
        let rounded = if has_remainder { floor + 1 } else { floor };
        u64::try_from(rounded).map_err(|_| NumberError::Overflow)
    }

    /// Lossy conversion for display only.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / ONE_RAW as f64
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let one = ONE_RAW as u128;
        write!(
            f,
            "{sign}{}.{:0width$}",
            magnitude / one,
            magnitude % one,
            width = PRECISION as usize
        )
    }
}

impl fmt::Debug for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedDecimal({self})")
    }
}

impl FromStr for FixedDecimal {
    type Err = NumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NumberError::Parse(s.to_string());
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || !all_digits(frac_part) {
            return Err(invalid());
        }

        let whole: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| NumberError::Overflow)?
        };
        let mut fraction: i128 = 0;
        let mut digits = 0;
        for b in frac_part.bytes().take(PRECISION as usize) {
            fraction = fraction * 10 + i128::from(b - b'0');
            digits += 1;
        }
        fraction *= 10i128.pow((PRECISION - digits) as u32);

        let raw = whole
            .checked_mul(ONE_RAW)
            .and_then(|v| v.checked_add(fraction))
            .ok_or(NumberError::Overflow)?;
        Ok(Self(if negative { -raw } else { raw }))
    }
}

impl Serialize for FixedDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FixedDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = FixedDecimal;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(FixedDecimal::from_integer(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                FixedDecimal::from_decimal(v, 0).map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if !v.is_finite() {
                    return Err(E::custom("non-finite decimal"));
                }
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

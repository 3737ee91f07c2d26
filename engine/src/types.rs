use serde::{Deserialize, Serialize};

use crate::number::FixedDecimal;

/// Oracle price as recorded on the position: `value * 10^exponent` USD.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceInfo {
    pub value: i64,
    pub exponent: i32,
    pub timestamp: u64, // unix seconds
    pub is_valid: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    /// Tracked but never valued, e.g. fixed-term tickets awaiting settlement.
    NoValue,
    /// Collateral held by the account, including adapter-held collateral.
    Deposit,
    /// A liability owed by the account.
    Claim,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionFlags {
    /// The claim has passed its repayment deadline.
    #[serde(default)]
    pub past_due: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricedPosition {
    pub token: String,
    pub balance: u64,
    pub exponent: i32,
    pub price: PriceInfo,
    pub kind: PositionKind,
    /// Collateral weight for deposits, maximum-leverage divisor for claims.
    pub value_modifier: FixedDecimal,
    pub max_staleness: u64,
    #[serde(default)]
    pub flags: PositionFlags,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    InvalidPrice,
    Outdated { age: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StalePosition {
    pub token: String,
    #[serde(flatten)]
    pub reason: StaleReason,
}

/// Collateral demanded by a claim. A claim whose token has no leverage
/// configured can never be covered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RequiredCollateral {
    Value(FixedDecimal),
    Unbounded,
}

impl RequiredCollateral {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, RequiredCollateral::Unbounded)
    }

    /// The amount to add into an aggregate, with `Unbounded` as [`FixedDecimal::MAX`].
    pub fn saturating_value(&self) -> FixedDecimal {
        match self {
            RequiredCollateral::Value(v) => *v,
            RequiredCollateral::Unbounded => FixedDecimal::MAX,
        }
    }
}

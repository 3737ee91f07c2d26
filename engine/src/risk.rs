use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;
use crate::number::FixedDecimal;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error("account is being liquidated")]
    BeingLiquidated,
    #[error("account is liquidatable (risk indicator {indicator})")]
    Liquidatable { indicator: FixedDecimal },
    #[error("action would make the account liquidatable (risk indicator {indicator})")]
    ProjectedLiquidatable { indicator: FixedDecimal },
    #[error("liquidation cannot be ended yet: {remaining_secs}s remaining and account unhealthy")]
    LiquidationInProgress { remaining_secs: i64 },
    #[error("account is not being liquidated")]
    NotBeingLiquidated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Healthy,
    Warning,
    Critical,
    Liquidatable,
}

/// Health as shown to the account owner. `BeingLiquidated` comes from an
/// open liquidation window, not from the indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskState {
    Healthy,
    Warning,
    Critical,
    Liquidatable,
    BeingLiquidated,
}

impl From<RiskLevel> for RiskState {
    fn from(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Healthy => RiskState::Healthy,
            RiskLevel::Warning => RiskState::Warning,
            RiskLevel::Critical => RiskState::Critical,
            RiskLevel::Liquidatable => RiskState::Liquidatable,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidationWindow {
    pub liquidator: String,
    pub start_time: i64, // unix seconds
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    PoolDeposit,
    PoolWithdraw,
    PoolBorrow,
    PoolRepay,
    RepayFromWallet,
    LendNow,
    BorrowNow,
    OfferLoan,
    RequestLoan,
    EndLiquidation,
}

impl UserAction {
    pub fn adds_risk(self) -> bool {
        !matches!(
            self,
            UserAction::PoolDeposit
                | UserAction::PoolRepay
                | UserAction::RepayFromWallet
                | UserAction::EndLiquidation
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRisk {
    pub indicator: FixedDecimal,
    pub level: RiskLevel,
    pub liquidation: Option<LiquidationWindow>,
}

impl AccountRisk {
    pub fn state(&self) -> RiskState {
        match self.liquidation {
            Some(_) => RiskState::BeingLiquidated,
            None => self.level.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskClassifier {
    warning: FixedDecimal,
    critical: FixedDecimal,
    liquidation_timeout_secs: i64,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl RiskClassifier {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            warning: config.warning_threshold,
            critical: config.critical_threshold,
            liquidation_timeout_secs: config.liquidation_timeout_secs,
        }
    }

    pub fn classify(&self, indicator: FixedDecimal) -> RiskLevel {
        if indicator >= FixedDecimal::ONE {
            RiskLevel::Liquidatable
        } else if indicator >= self.critical {
            RiskLevel::Critical
        } else if indicator >= self.warning {
            RiskLevel::Warning
        } else {
            RiskLevel::Healthy
        }
    }

    pub fn assess(&self, indicator: FixedDecimal, liquidation: Option<LiquidationWindow>) -> AccountRisk {
        AccountRisk {
            indicator,
            level: self.classify(indicator),
            liquidation,
        }
    }

    /// Signed seconds until the liquidation times out; negative once elapsed.
    pub fn remaining_liquidation_time(&self, window: &LiquidationWindow, now: i64) -> i64 {
        window
            .start_time
            .saturating_add(self.liquidation_timeout_secs)
            .saturating_sub(now)
    }

    pub fn can_owner_end_liquidation(&self, risk: &AccountRisk, now: i64) -> bool {
        match &risk.liquidation {
            Some(window) => {
                risk.indicator < FixedDecimal::ONE || self.remaining_liquidation_time(window, now) < 0
            }
            None => false,
        }
    }

    /// Gates a user action on current health and, for actions that add risk,
    /// on the projected indicator after the action.
    pub fn check_action(
        &self,
        risk: &AccountRisk,
        action: UserAction,
        projected: Option<FixedDecimal>,
        now: i64,
    ) -> Result<(), RiskError> {
        if let Some(window) = &risk.liquidation {
            return match action {
                UserAction::PoolDeposit | UserAction::PoolRepay | UserAction::RepayFromWallet => Ok(()),
                UserAction::EndLiquidation if self.can_owner_end_liquidation(risk, now) => Ok(()),
                UserAction::EndLiquidation => Err(RiskError::LiquidationInProgress {
                    remaining_secs: self.remaining_liquidation_time(window, now),
                }),
                _ => Err(RiskError::BeingLiquidated),
            };
        }
        if action == UserAction::EndLiquidation {
            return Err(RiskError::NotBeingLiquidated);
        }
        if !action.adds_risk() {
            return Ok(());
        }
        if risk.level == RiskLevel::Liquidatable {
            return Err(RiskError::Liquidatable {
                indicator: risk.indicator,
            });
        }
        match projected {
            Some(indicator) if indicator >= FixedDecimal::ONE => {
                Err(RiskError::ProjectedLiquidatable { indicator })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn window(start_time: i64) -> LiquidationWindow {
        LiquidationWindow {
            liquidator: "liquidator".into(),
            start_time,
        }
    }

    #[test]
    fn test_classify_boundaries() {
        let c = RiskClassifier::default();
        assert_eq!(c.classify(FixedDecimal::ZERO), RiskLevel::Healthy);
        assert_eq!(c.classify(d("0.7999999999")), RiskLevel::Healthy);
        assert_eq!(c.classify(d("0.8")), RiskLevel::Warning);
        assert_eq!(c.classify(d("0.8999999999")), RiskLevel::Warning);
        assert_eq!(c.classify(d("0.9")), RiskLevel::Critical);
        assert_eq!(c.classify(d("0.9999999999")), RiskLevel::Critical);
        assert_eq!(c.classify(FixedDecimal::ONE), RiskLevel::Liquidatable);
        assert_eq!(c.classify(FixedDecimal::MAX), RiskLevel::Liquidatable);
    }

    #[test]
    fn test_state_prefers_liquidation_window() {
        let c = RiskClassifier::default();
        assert_eq!(c.assess(d("0.5"), None).state(), RiskState::Healthy);
        assert_eq!(c.assess(d("0.5"), Some(window(0))).state(), RiskState::BeingLiquidated);
    }

    #[test]
    fn test_remaining_liquidation_time() {
        let c = RiskClassifier::default();
        assert_eq!(c.remaining_liquidation_time(&window(1_000), 1_010), 50);
        assert_eq!(c.remaining_liquidation_time(&window(1_000), 1_060), 0);
        assert_eq!(c.remaining_liquidation_time(&window(1_000), 1_075), -15);
    }

    #[test]
    fn test_owner_can_end_liquidation() {
        let c = RiskClassifier::default();
        let unhealthy = c.assess(d("1.2"), Some(window(1_000)));
        assert!(!c.can_owner_end_liquidation(&unhealthy, 1_030));
        assert!(!c.can_owner_end_liquidation(&unhealthy, 1_060));
        assert!(c.can_owner_end_liquidation(&unhealthy, 1_061));

        let recovered = c.assess(d("0.95"), Some(window(1_000)));
        assert!(c.can_owner_end_liquidation(&recovered, 1_001));
        assert!(!c.can_owner_end_liquidation(&c.assess(d("0.1"), None), 1_001));
    }

    #[test]
    fn test_liquidation_blocks_most_actions() {
        let c = RiskClassifier::default();
        let risk = c.assess(d("1.1"), Some(window(1_000)));
        assert_eq!(c.check_action(&risk, UserAction::PoolBorrow, None, 1_010), Err(RiskError::BeingLiquidated));
        assert_eq!(c.check_action(&risk, UserAction::LendNow, None, 1_010), Err(RiskError::BeingLiquidated));
        assert_eq!(c.check_action(&risk, UserAction::PoolDeposit, None, 1_010), Ok(()));
        assert_eq!(c.check_action(&risk, UserAction::RepayFromWallet, None, 1_010), Ok(()));
        assert_eq!(
            c.check_action(&risk, UserAction::EndLiquidation, None, 1_010),
            Err(RiskError::LiquidationInProgress { remaining_secs: 50 })
        );
        assert_eq!(c.check_action(&risk, UserAction::EndLiquidation, None, 1_100), Ok(()));
    }

    #[test]
    fn test_projected_indicator_gates_risky_actions() {
        let c = RiskClassifier::default();
        let healthy = c.assess(d("0.5"), None);
        assert_eq!(c.check_action(&healthy, UserAction::PoolBorrow, Some(d("0.95")), 0), Ok(()));
        assert_eq!(
            c.check_action(&healthy, UserAction::PoolBorrow, Some(FixedDecimal::ONE), 0),
            Err(RiskError::ProjectedLiquidatable { indicator: FixedDecimal::ONE })
        );
        assert_eq!(c.check_action(&healthy, UserAction::EndLiquidation, None, 0), Err(RiskError::NotBeingLiquidated));

        let liquidatable = c.assess(d("1.01"), None);
        assert!(matches!(
            c.check_action(&liquidatable, UserAction::PoolWithdraw, Some(d("0.5")), 0),
            Err(RiskError::Liquidatable { .. })
        ));
        assert_eq!(c.check_action(&liquidatable, UserAction::PoolRepay, None, 0), Ok(()));
    }
}

//! AuditListener (component L): classifies why a liquidation event for a
//! tracked user did or didn't result in our own execution.
//!
//! Grounded on [`crate::risk_set::RiskSet`] and
//! [`crate::attempt_history::AttemptHistory`] as the two sources of
//! truth this component reads but never mutates.

use crate::attempt_history::{AttemptHistory, AttemptStatus};
use crate::risk_set::RiskSet;
use alloy::primitives::{Address, B256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditReason {
    NotInActiveSet,
    DebtBelowMin,
    PricedOut,
    /// Sub-reason carried alongside `AttemptFailedOrLate` when our own
    /// transaction was still in flight (`Sent`/`Pending`) at the time a
    /// competitor's inclusion was observed.
    AttemptFailedOrLate { pending_late_inclusion: bool },
    HfNeverCrossedExecute,
}

impl AuditReason {
    pub fn label(&self) -> &'static str {
        match self {
            AuditReason::NotInActiveSet => "not_in_active_set",
            AuditReason::DebtBelowMin => "debt_below_min",
            AuditReason::PricedOut => "priced_out",
            AuditReason::AttemptFailedOrLate { .. } => "attempt_failed_or_late",
            AuditReason::HfNeverCrossedExecute => "hf_never_crossed_execute",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditNotification {
    pub user: Address,
    pub collateral_asset: Address,
    pub debt_asset: Address,
    pub last_hf: Option<f64>,
    pub last_debt_usd_1e18: Option<u128>,
    pub reason: AuditReason,
    pub competitor_tx_hash: B256,
}

/// A liquidation event observed on-chain, attributed to a user we may or
/// may not have been tracking.
#[derive(Debug, Clone, Copy)]
pub struct OnChainLiquidationEvent {
    pub user: Address,
    pub collateral_asset: Address,
    pub debt_asset: Address,
    pub tx_hash: B256,
}

pub struct AuditListener {
    risk_set: std::sync::Arc<RiskSet>,
    attempt_history: std::sync::Arc<AttemptHistory>,
    min_debt_usd_1e18: u128,
}

impl AuditListener {
    pub fn new(
        risk_set: std::sync::Arc<RiskSet>,
        attempt_history: std::sync::Arc<AttemptHistory>,
        min_debt_usd_1e18: u128,
    ) -> Self {
        Self {
            risk_set,
            attempt_history,
            min_debt_usd_1e18,
        }
    }

    /// Classify one on-chain liquidation event per spec §4.L.
    pub fn classify(&self, event: OnChainLiquidationEvent) -> AuditNotification {
        let Some(tracked) = self.risk_set.get(&event.user) else {
            return AuditNotification {
                user: event.user,
                collateral_asset: event.collateral_asset,
                debt_asset: event.debt_asset,
                last_hf: None,
                last_debt_usd_1e18: None,
                reason: AuditReason::NotInActiveSet,
                competitor_tx_hash: event.tx_hash,
            };
        };

        let last_attempt = self.attempt_history.last(&event.user);

        let reason = if tracked.last_debt_usd_1e18 < self.min_debt_usd_1e18 {
            AuditReason::DebtBelowMin
        } else if let Some(attempt) = &last_attempt {
            match attempt.status {
                AttemptStatus::Error
                    if attempt
                        .error
                        .as_deref()
                        .map(|e| e.contains("Safety check failed"))
                        .unwrap_or(false) =>
                {
                    AuditReason::PricedOut
                }
                AttemptStatus::Sent | AttemptStatus::Pending => AuditReason::AttemptFailedOrLate {
                    pending_late_inclusion: true,
                },
                AttemptStatus::Reverted | AttemptStatus::Error => AuditReason::AttemptFailedOrLate {
                    pending_late_inclusion: false,
                },
                _ => AuditReason::HfNeverCrossedExecute,
            }
        } else {
            AuditReason::HfNeverCrossedExecute
        };

        AuditNotification {
            user: event.user,
            collateral_asset: event.collateral_asset,
            debt_asset: event.debt_asset,
            last_hf: Some(tracked.health_factor),
            last_debt_usd_1e18: Some(tracked.last_debt_usd_1e18),
            reason,
            competitor_tx_hash: event.tx_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt_history::AttemptRecord;

    fn addr(n: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        Address::from(bytes)
    }

    fn event(user: Address) -> OnChainLiquidationEvent {
        OnChainLiquidationEvent {
            user,
            collateral_asset: addr(200),
            debt_asset: addr(201),
            tx_hash: B256::repeat_byte(0xab),
        }
    }

    #[test]
    fn test_not_in_active_set() {
        let risk_set = std::sync::Arc::new(RiskSet::new());
        let history = std::sync::Arc::new(AttemptHistory::new());
        let listener = AuditListener::new(risk_set, history, 10 * 10u128.pow(18));

        let notification = listener.classify(event(addr(1)));
        assert_eq!(notification.reason, AuditReason::NotInActiveSet);
    }

    #[test]
    fn test_debt_below_min_takes_priority() {
        let risk_set = std::sync::Arc::new(RiskSet::new());
        let u = addr(2);
        risk_set.upsert(u);
        risk_set.update_hf(u, 0.9, 5 * 10u128.pow(18), 1, 1.0, 20);

        let history = std::sync::Arc::new(AttemptHistory::new());
        let listener = AuditListener::new(risk_set, history, 10 * 10u128.pow(18));

        let notification = listener.classify(event(u));
        assert_eq!(notification.reason, AuditReason::DebtBelowMin);
    }

    #[test]
    fn test_priced_out_from_safety_check_error() {
        let risk_set = std::sync::Arc::new(RiskSet::new());
        let u = addr(3);
        risk_set.upsert(u);
        risk_set.update_hf(u, 0.9, 100 * 10u128.pow(18), 1, 1.0, 20);

        let history = std::sync::Arc::new(AttemptHistory::new());
        let mut record = AttemptRecord::new(u, 1, AttemptStatus::Error);
        record.error = Some("Safety check failed: slippage".to_string());
        history.record(record);

        let listener = AuditListener::new(risk_set, history, 10 * 10u128.pow(18));
        let notification = listener.classify(event(u));
        assert_eq!(notification.reason, AuditReason::PricedOut);
    }

    #[test]
    fn test_pending_attempt_flags_late_inclusion() {
        let risk_set = std::sync::Arc::new(RiskSet::new());
        let u = addr(4);
        risk_set.upsert(u);
        risk_set.update_hf(u, 0.9, 100 * 10u128.pow(18), 1, 1.0, 20);

        let history = std::sync::Arc::new(AttemptHistory::new());
        history.record(AttemptRecord::new(u, 1, AttemptStatus::Pending));

        let listener = AuditListener::new(risk_set, history, 10 * 10u128.pow(18));
        let notification = listener.classify(event(u));
        assert_eq!(
            notification.reason,
            AuditReason::AttemptFailedOrLate {
                pending_late_inclusion: true
            }
        );
    }

    #[test]
    fn test_no_attempt_means_hf_never_crossed_execute() {
        let risk_set = std::sync::Arc::new(RiskSet::new());
        let u = addr(5);
        risk_set.upsert(u);
        risk_set.update_hf(u, 0.999, 100 * 10u128.pow(18), 1, 1.0, 20);

        let history = std::sync::Arc::new(AttemptHistory::new());
        let listener = AuditListener::new(risk_set, history, 10 * 10u128.pow(18));
        let notification = listener.classify(event(u));
        assert_eq!(notification.reason, AuditReason::HfNeverCrossedExecute);
    }
}

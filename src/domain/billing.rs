//! Billing saga state, nested in the incident record.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Saga status. Exactly one of `Paid` or `RolledBack` is reached on any
/// finite, eventually-responding sequence of verify/charge outcomes; `Failed`
/// is the pre-charge terminal (nothing committed, nothing to compensate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    Pending,
    Verifying,
    Verified,
    Charging,
    Paid,
    Failed,
    Compensating,
    RolledBack,
}

impl BillingStatus {
    /// Terminal statuses: the saga record is archived, not deleted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BillingStatus::Paid | BillingStatus::Failed | BillingStatus::RolledBack
        )
    }
}

/// Financial saga state for one incident.
///
/// Created when the workflow reaches the billing stage. The idempotency token
/// pins charge requests to the incident version that issued them, so a
/// retried charge after a crash cannot double-charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSaga {
    pub status: BillingStatus,
    pub amount: Decimal,
    pub insurance_verified: Option<bool>,
    pub payment_reference: Option<String>,
    pub last_error: Option<String>,
    /// Incident version in effect when the charge command was issued.
    pub charge_token: Option<u64>,
}

impl BillingSaga {
    pub fn new(amount: Decimal) -> Self {
        Self {
            status: BillingStatus::Pending,
            amount,
            insurance_verified: None,
            payment_reference: None,
            last_error: None,
            charge_token: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_saga_starts_pending() {
        let saga = BillingSaga::new(dec!(100));
        assert_eq!(saga.status, BillingStatus::Pending);
        assert!(!saga.is_terminal());
        assert!(saga.payment_reference.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(BillingStatus::Paid.is_terminal());
        assert!(BillingStatus::Failed.is_terminal());
        assert!(BillingStatus::RolledBack.is_terminal());
        assert!(!BillingStatus::Compensating.is_terminal());
        assert!(!BillingStatus::Charging.is_terminal());
    }
}

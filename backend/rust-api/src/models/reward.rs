use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage months credited to one account, across every reward source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRewardRecord {
    pub user_id: String,
    #[serde(default)]
    pub storage_months: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Grant keys already credited; written by the repositories only.
    #[serde(default, skip_serializing)]
    pub applied_grants: Vec<String>,
}

impl StorageRewardRecord {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

/// Result of an increment clamped at a cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CappedCredit {
    pub granted: u32,
    pub total: u32,
    pub discarded: u32,
}

impl CappedCredit {
    /// A grant that was already applied: nothing credited, balance unchanged.
    pub fn unchanged(total: u32) -> Self {
        Self {
            granted: 0,
            total,
            discarded: 0,
        }
    }

    pub fn was_capped(&self) -> bool {
        self.discarded > 0
    }
}

/// `total = max(current, min(current + grant, cap))`.
///
/// A balance already above the cap (the cap was lowered) is left untouched;
/// the excess of a grant is discarded rather than carried over.
pub fn capped_credit(current: u32, grant: u32, cap: u32) -> CappedCredit {
    let target = current.saturating_add(grant).min(cap);
    let total = current.max(target);
    let granted = total - current;
    CappedCredit {
        granted,
        total,
        discarded: grant - granted,
    }
}

/// Idempotency key of the credit a referee's first payment grants to `party`.
pub fn first_payment_grant(referee_user_id: &str, party: &str) -> String {
    format!("first_payment:{}:{}", referee_user_id, party)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStage {
    /// Attribution could not be read after the payment was claimed; every
    /// reward step is replayed.
    FirstPayment,
    /// Credit the referral ledger and mirror it on the referrer's storage.
    ReferrerLedger,
    /// Mirror an already applied ledger credit on the referrer's storage.
    ReferrerStorage,
    RefereeStorage,
    StatusFlip,
}

impl ReconciliationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStage::FirstPayment => "first_payment",
            ReconciliationStage::ReferrerLedger => "referrer_ledger",
            ReconciliationStage::ReferrerStorage => "referrer_storage",
            ReconciliationStage::RefereeStorage => "referee_storage",
            ReconciliationStage::StatusFlip => "status_flip",
        }
    }
}

/// A reward step that failed during payment processing and must be replayed
/// out of band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationJob {
    pub id: String,
    /// The paying (referred) account.
    pub user_id: String,
    pub referral_code: String,
    pub stage: ReconciliationStage,
    pub months: u32,
    pub error: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set once the job ran out of attempts; parked jobs are no longer replayed.
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
}

impl ReconciliationJob {
    pub fn new(
        user_id: &str,
        referral_code: &str,
        stage: ReconciliationStage,
        months: u32,
        error: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            referral_code: referral_code.to_string(),
            stage,
            months,
            error,
            created_at: Utc::now(),
            attempts: 0,
            resolved_at: None,
            failed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_below_cap_is_applied_in_full() {
        let credit = capped_credit(0, 12, 36);
        assert_eq!(
            credit,
            CappedCredit {
                granted: 12,
                total: 12,
                discarded: 0
            }
        );
        assert!(!credit.was_capped());
    }

    #[test]
    fn credit_is_clamped_at_cap() {
        let credit = capped_credit(30, 12, 36);
        assert_eq!(credit.total, 36);
        assert_eq!(credit.granted, 6);
        assert_eq!(credit.discarded, 6);
        assert!(credit.was_capped());
    }

    #[test]
    fn credit_at_cap_grants_nothing() {
        let credit = capped_credit(36, 12, 36);
        assert_eq!(credit.granted, 0);
        assert_eq!(credit.total, 36);
    }

    #[test]
    fn balance_above_lowered_cap_is_not_reduced() {
        let credit = capped_credit(40, 3, 36);
        assert_eq!(credit.total, 40);
        assert_eq!(credit.granted, 0);
        assert_eq!(credit.discarded, 3);
    }

    #[test]
    fn repeated_credits_never_exceed_cap() {
        let mut total = 0;
        for _ in 0..10 {
            total = capped_credit(total, 12, 36).total;
            assert!(total <= 36);
        }
        assert_eq!(total, 36);
    }
}

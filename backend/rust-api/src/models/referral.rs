use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::reward::StorageRewardRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferredFamilyStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferredFamily {
    pub family_id: String,
    pub family_name: String,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    pub status: ReferredFamilyStatus,
}

impl ReferredFamily {
    pub fn pending(family_id: &str, family_name: &str, joined_at: DateTime<Utc>) -> Self {
        Self {
            family_id: family_id.to_string(),
            family_name: family_name.to_string(),
            joined_at,
            paid_at: None,
            status: ReferredFamilyStatus::Pending,
        }
    }
}

/// Referral ledger row owned by the referring account.
/// Stored in MongoDB "referrals", unique on both `referralCode` and `ownerUserId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralRecord {
    pub referral_code: String,
    pub owner_user_id: String,
    pub family_name: String,
    #[serde(default)]
    pub total_referred: u32,
    #[serde(default)]
    pub total_storage_earned_months: u32,
    #[serde(default)]
    pub referred_families: Vec<ReferredFamily>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Grant keys already credited to the ledger; written by the repositories only.
    #[serde(default, skip_serializing)]
    pub applied_grants: Vec<String>,
}

impl ReferralRecord {
    pub fn new(
        referral_code: String,
        owner_user_id: &str,
        family_name: &str,
        now: DateTime<Utc>,
        ttl_days: Option<i64>,
    ) -> Self {
        Self {
            referral_code,
            owner_user_id: owner_user_id.to_string(),
            family_name: family_name.to_string(),
            total_referred: 0,
            total_storage_earned_months: 0,
            referred_families: Vec::new(),
            created_at: now,
            expires_at: ttl_days.map(|days| now + chrono::Duration::days(days)),
            applied_grants: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn family(&self, family_id: &str) -> Option<&ReferredFamily> {
        self.referred_families
            .iter()
            .find(|f| f.family_id == family_id)
    }
}

/// Per-account referral flags: who referred this account and whether its
/// first qualifying payment has already been consumed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralAccount {
    pub user_id: String,
    #[serde(default)]
    pub referred_by_code: Option<String>,
    #[serde(default)]
    pub first_payment_processed: bool,
    #[serde(default)]
    pub first_payment_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralRequest {
    #[validate(length(min = 1, max = 120, message = "familyName must be 1-120 characters"))]
    pub family_name: String,
}

#[derive(Debug, Serialize)]
pub struct CreateReferralResponse {
    pub referral: ReferralRecord,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSignupRequest {
    #[validate(length(min = 4, max = 32, message = "referralCode must be 4-32 characters"))]
    pub referral_code: String,
    #[validate(length(min = 1, max = 128, message = "newFamilyId must be 1-128 characters"))]
    pub new_family_id: String,
    #[validate(length(min = 1, max = 120, message = "newFamilyName must be 1-120 characters"))]
    pub new_family_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSignupResponse {
    pub registered: bool,
    pub referral_code: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    #[validate(range(min = 0.0, message = "paymentAmount must be non-negative"))]
    pub payment_amount: f64,
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentResponse {
    pub referee_bonus: bool,
    pub total_months_granted: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStatsResponse {
    pub referral: Option<ReferralRecord>,
    pub storage_reward: StorageRewardRecord,
    /// Percentage of `referral.cap_months` already earned through referrals.
    pub progress_to_max: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCodeResponse {
    pub family_name: String,
    pub bonus_months: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_ttl_never_expires() {
        let now = Utc::now();
        let record = ReferralRecord::new("ABCD1234".into(), "u1", "Martin", now, None);
        assert!(!record.is_expired(now + chrono::Duration::days(3650)));
    }

    #[test]
    fn record_with_ttl_expires() {
        let now = Utc::now();
        let record = ReferralRecord::new("ABCD1234".into(), "u1", "Martin", now, Some(30));
        assert!(!record.is_expired(now + chrono::Duration::days(29)));
        assert!(record.is_expired(now + chrono::Duration::days(30)));
    }

    #[test]
    fn family_status_serializes_lowercase() {
        let family = ReferredFamily::pending("f1", "Durand", Utc::now());
        let json = serde_json::to_value(&family).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["familyId"], "f1");
    }
}

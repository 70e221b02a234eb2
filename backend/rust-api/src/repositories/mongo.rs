use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{
        FindOneAndUpdateOptions, FindOptions, IndexOptions, ReplaceOptions, ReturnDocument,
        UpdateOptions,
    },
    Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};

use super::{
    AccountRepository, BadgeUnlockRepository, QuizStatsRepository, ReconciliationQueue,
    ReferralInsert, ReferralRepository, StorageRewardRepository,
};
use crate::metrics::track_db_operation;
use crate::models::{
    quiz::{BadgeUnlockEvent, UserQuizStats},
    referral::{ReferralAccount, ReferralRecord, ReferredFamily},
    reward::{capped_credit, CappedCredit, ReconciliationJob, StorageRewardRecord},
};

const QUIZ_STATS: &str = "quiz_stats";
const BADGE_UNLOCKS: &str = "badge_unlocks";
const REFERRALS: &str = "referrals";
const REFERRAL_ACCOUNTS: &str = "referral_accounts";
const STORAGE_REWARDS: &str = "storage_rewards";
const RECONCILIATION: &str = "reward_reconciliation";

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Serialize, Deserialize)]
struct StatsDocument {
    #[serde(rename = "_id")]
    user_id: String,
    stats: UserQuizStats,
    #[serde(rename = "updatedAt")]
    updated_at: DateTime<Utc>,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY,
        ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// `max(field, min(field + months, cap))`, evaluated server-side so
/// concurrent credits cannot lose updates or overshoot the cap.
fn capped_increment(field: &str, months: u32, cap: u32) -> Document {
    let current = doc! { "$ifNull": [format!("${}", field), 0] };
    doc! {
        "$max": [
            current.clone(),
            { "$min": [ { "$add": [current, months as i64] }, cap as i64 ] }
        ]
    }
}

/// Appends `grant_key` to `appliedGrants` inside an update pipeline.
fn append_grant(grant_key: &str) -> Document {
    doc! {
        "$concatArrays": [
            { "$ifNull": ["$appliedGrants", []] },
            [ { "$literal": grant_key } ]
        ]
    }
}

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    /// Unique constraints the ledger relies on for idempotency.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        let referrals = self.collection::<Document>(REFERRALS);
        referrals
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "referralCode": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create referralCode index")?;
        referrals
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "ownerUserId": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create ownerUserId index")?;

        self.collection::<Document>(STORAGE_REWARDS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "userId": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create storage_rewards index")?;

        self.collection::<Document>(BADGE_UNLOCKS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "userId": 1, "badgeId": 1 })
                    .options(unique())
                    .build(),
            )
            .await
            .context("Failed to create badge_unlocks index")?;

        self.collection::<Document>(RECONCILIATION)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "resolvedAt": 1, "failedAt": 1, "createdAt": 1 })
                    .build(),
            )
            .await
            .context("Failed to create reward_reconciliation index")?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }
}

#[async_trait]
impl QuizStatsRepository for MongoStore {
    async fn get_stats(&self, user_id: &str) -> Result<Option<UserQuizStats>> {
        track_db_operation("find_one", QUIZ_STATS, async {
            let found = self
                .collection::<StatsDocument>(QUIZ_STATS)
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to query quiz stats")?;
            Ok(found.map(|d| d.stats))
        })
        .await
    }

    async fn save_stats(&self, user_id: &str, stats: &UserQuizStats) -> Result<()> {
        track_db_operation("replace_one", QUIZ_STATS, async {
            let document = StatsDocument {
                user_id: user_id.to_string(),
                stats: stats.clone(),
                updated_at: Utc::now(),
            };
            self.collection::<StatsDocument>(QUIZ_STATS)
                .replace_one(doc! { "_id": user_id }, &document)
                .with_options(ReplaceOptions::builder().upsert(true).build())
                .await
                .context("Failed to save quiz stats")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BadgeUnlockRepository for MongoStore {
    async fn record_unlock(&self, event: &BadgeUnlockEvent) -> Result<bool> {
        track_db_operation("insert_one", BADGE_UNLOCKS, async {
            match self
                .collection::<BadgeUnlockEvent>(BADGE_UNLOCKS)
                .insert_one(event)
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to record badge unlock")),
            }
        })
        .await
    }

    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<BadgeUnlockEvent>> {
        track_db_operation("find", BADGE_UNLOCKS, async {
            let cursor = self
                .collection::<BadgeUnlockEvent>(BADGE_UNLOCKS)
                .find(doc! { "userId": user_id })
                .await
                .context("Failed to query badge unlocks")?;
            Ok(cursor.try_collect().await?)
        })
        .await
    }
}

#[async_trait]
impl ReferralRepository for MongoStore {
    async fn insert_referral(&self, record: &ReferralRecord) -> Result<ReferralInsert> {
        if let Some(existing) = self.find_by_owner(&record.owner_user_id).await? {
            return Ok(ReferralInsert::OwnerExists(existing));
        }

        let inserted = track_db_operation("insert_one", REFERRALS, async {
            match self
                .collection::<ReferralRecord>(REFERRALS)
                .insert_one(record)
                .await
            {
                Ok(_) => Ok(true),
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to insert referral")),
            }
        })
        .await?;

        if inserted {
            return Ok(ReferralInsert::Created(record.clone()));
        }

        // Either a concurrent create for the same owner won, or the code collided.
        match self.find_by_owner(&record.owner_user_id).await? {
            Some(existing) => Ok(ReferralInsert::OwnerExists(existing)),
            None => Ok(ReferralInsert::CodeTaken),
        }
    }

    async fn find_by_owner(&self, owner_user_id: &str) -> Result<Option<ReferralRecord>> {
        track_db_operation("find_one", REFERRALS, async {
            self.collection::<ReferralRecord>(REFERRALS)
                .find_one(doc! { "ownerUserId": owner_user_id })
                .await
                .context("Failed to query referral by owner")
        })
        .await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ReferralRecord>> {
        track_db_operation("find_one", REFERRALS, async {
            self.collection::<ReferralRecord>(REFERRALS)
                .find_one(doc! { "referralCode": code })
                .await
                .context("Failed to query referral by code")
        })
        .await
    }

    async fn add_referred_family(&self, code: &str, family: &ReferredFamily) -> Result<bool> {
        track_db_operation("update_one", REFERRALS, async {
            let result = self
                .collection::<Document>(REFERRALS)
                .update_one(
                    doc! {
                        "referralCode": code,
                        "referredFamilies.familyId": { "$ne": family.family_id.as_str() },
                    },
                    doc! {
                        "$push": { "referredFamilies": to_bson(family)? },
                        "$inc": { "totalReferred": 1 },
                    },
                )
                .await
                .context("Failed to append referred family")?;
            Ok(result.matched_count == 1)
        })
        .await
    }

    async fn credit_months(
        &self,
        code: &str,
        grant_key: &str,
        months: u32,
        cap: u32,
    ) -> Result<Option<CappedCredit>> {
        let before = track_db_operation("find_one_and_update", REFERRALS, async {
            self.collection::<ReferralRecord>(REFERRALS)
                .find_one_and_update(
                    doc! { "referralCode": code, "appliedGrants": { "$ne": grant_key } },
                    vec![doc! {
                        "$set": {
                            "totalStorageEarnedMonths":
                                capped_increment("totalStorageEarnedMonths", months, cap),
                            "appliedGrants": append_grant(grant_key),
                        }
                    }],
                )
                .with_options(
                    FindOneAndUpdateOptions::builder()
                        .return_document(ReturnDocument::Before)
                        .build(),
                )
                .await
                .context("Failed to credit referral months")
        })
        .await?;

        match before {
            Some(record) => Ok(Some(capped_credit(
                record.total_storage_earned_months,
                months,
                cap,
            ))),
            // Unknown code, or this grant was already applied.
            None => Ok(self
                .find_by_code(code)
                .await?
                .map(|record| CappedCredit::unchanged(record.total_storage_earned_months))),
        }
    }

    async fn mark_family_paid(
        &self,
        code: &str,
        family_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool> {
        track_db_operation("update_one", REFERRALS, async {
            let result = self
                .collection::<Document>(REFERRALS)
                .update_one(
                    doc! {
                        "referralCode": code,
                        "referredFamilies": {
                            "$elemMatch": { "familyId": family_id, "status": "pending" }
                        },
                    },
                    doc! {
                        "$set": {
                            "referredFamilies.$.status": "paid",
                            "referredFamilies.$.paidAt": to_bson(&paid_at)?,
                        }
                    },
                )
                .await
                .context("Failed to mark referred family as paid")?;
            Ok(result.modified_count == 1)
        })
        .await
    }
}

#[async_trait]
impl AccountRepository for MongoStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<ReferralAccount>> {
        track_db_operation("find_one", REFERRAL_ACCOUNTS, async {
            self.collection::<ReferralAccount>(REFERRAL_ACCOUNTS)
                .find_one(doc! { "_id": user_id })
                .await
                .context("Failed to query referral account")
        })
        .await
    }

    async fn attach_referral_code(&self, user_id: &str, code: &str) -> Result<bool> {
        track_db_operation("update_one", REFERRAL_ACCOUNTS, async {
            // A missing account is created by the upsert; an account that already
            // has a code fails the filter and the upsert hits the _id index.
            let result = self
                .collection::<Document>(REFERRAL_ACCOUNTS)
                .update_one(
                    doc! { "_id": user_id, "referredByCode": null },
                    doc! { "$set": { "userId": user_id, "referredByCode": code } },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .await;

            match result {
                Ok(r) => Ok(r.modified_count == 1 || r.upserted_id.is_some()),
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to attach referral code")),
            }
        })
        .await
    }

    async fn claim_first_payment(&self, user_id: &str, at: DateTime<Utc>) -> Result<bool> {
        track_db_operation("update_one", REFERRAL_ACCOUNTS, async {
            let result = self
                .collection::<Document>(REFERRAL_ACCOUNTS)
                .update_one(
                    doc! { "_id": user_id, "firstPaymentProcessed": { "$ne": true } },
                    doc! {
                        "$set": {
                            "userId": user_id,
                            "firstPaymentProcessed": true,
                            "firstPaymentAt": to_bson(&at)?,
                        }
                    },
                )
                .with_options(UpdateOptions::builder().upsert(true).build())
                .await;

            match result {
                Ok(r) => Ok(r.modified_count == 1 || r.upserted_id.is_some()),
                Err(e) if is_duplicate_key(&e) => Ok(false),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to claim first payment")),
            }
        })
        .await
    }
}

#[async_trait]
impl StorageRewardRepository for MongoStore {
    async fn get_reward(&self, user_id: &str) -> Result<Option<StorageRewardRecord>> {
        track_db_operation("find_one", STORAGE_REWARDS, async {
            self.collection::<StorageRewardRecord>(STORAGE_REWARDS)
                .find_one(doc! { "userId": user_id })
                .await
                .context("Failed to query storage reward")
        })
        .await
    }

    async fn credit_reward(
        &self,
        user_id: &str,
        grant_key: &str,
        months: u32,
        cap: u32,
    ) -> Result<CappedCredit> {
        // The upsert collides on the userId index either when the grant was
        // already applied or when a concurrent credit created the record first.
        for _ in 0..2 {
            let result = track_db_operation("find_one_and_update", STORAGE_REWARDS, async {
                match self
                    .collection::<StorageRewardRecord>(STORAGE_REWARDS)
                    .find_one_and_update(
                        doc! { "userId": user_id, "appliedGrants": { "$ne": grant_key } },
                        vec![doc! {
                            "$set": {
                                "userId": user_id,
                                "storageMonths": capped_increment("storageMonths", months, cap),
                                "appliedGrants": append_grant(grant_key),
                            }
                        }],
                    )
                    .with_options(
                        FindOneAndUpdateOptions::builder()
                            .upsert(true)
                            .return_document(ReturnDocument::Before)
                            .build(),
                    )
                    .await
                {
                    Ok(before) => Ok(Some(before)),
                    Err(e) if is_duplicate_key(&e) => Ok(None),
                    Err(e) => {
                        Err(anyhow::Error::new(e).context("Failed to credit storage reward"))
                    }
                }
            })
            .await?;

            match result {
                Some(before) => {
                    let current = before.map(|r| r.storage_months).unwrap_or(0);
                    return Ok(capped_credit(current, months, cap));
                }
                None => {
                    if let Some(record) = self.get_reward(user_id).await? {
                        if record.applied_grants.iter().any(|key| key == grant_key) {
                            return Ok(CappedCredit::unchanged(record.storage_months));
                        }
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Storage reward for user {} kept colliding on upsert",
            user_id
        ))
    }
}

#[async_trait]
impl ReconciliationQueue for MongoStore {
    async fn enqueue(&self, job: &ReconciliationJob) -> Result<()> {
        track_db_operation("insert_one", RECONCILIATION, async {
            self.collection::<ReconciliationJob>(RECONCILIATION)
                .insert_one(job)
                .await
                .context("Failed to enqueue reconciliation job")?;
            Ok(())
        })
        .await
    }

    async fn pending(&self, limit: usize) -> Result<Vec<ReconciliationJob>> {
        track_db_operation("find", RECONCILIATION, async {
            let cursor = self
                .collection::<ReconciliationJob>(RECONCILIATION)
                .find(doc! { "resolvedAt": null, "failedAt": null })
                .with_options(
                    FindOptions::builder()
                        .sort(doc! { "createdAt": 1 })
                        .limit(limit as i64)
                        .build(),
                )
                .await
                .context("Failed to query reconciliation jobs")?;
            Ok(cursor.try_collect().await?)
        })
        .await
    }

    async fn mark_resolved(&self, job_id: &str, at: DateTime<Utc>) -> Result<()> {
        track_db_operation("update_one", RECONCILIATION, async {
            self.collection::<Document>(RECONCILIATION)
                .update_one(
                    doc! { "id": job_id },
                    doc! { "$set": { "resolvedAt": to_bson(&at)? } },
                )
                .await
                .context("Failed to resolve reconciliation job")?;
            Ok(())
        })
        .await
    }

    async fn record_attempt(
        &self,
        job_id: &str,
        error: &str,
        failed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        track_db_operation("update_one", RECONCILIATION, async {
            let mut set = doc! { "error": error };
            if let Some(at) = failed_at {
                set.insert("failedAt", to_bson(&at)?);
            }
            self.collection::<Document>(RECONCILIATION)
                .update_one(
                    doc! { "id": job_id },
                    doc! { "$inc": { "attempts": 1 }, "$set": set },
                )
                .await
                .context("Failed to update reconciliation job")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_is_appended_as_a_literal() {
        let expr = append_grant("first_payment:f1:referee");
        let parts = expr.get_array("$concatArrays").unwrap();
        let appended = parts[1].as_array().unwrap()[0].as_document().unwrap();
        assert_eq!(
            appended.get_str("$literal").unwrap(),
            "first_payment:f1:referee"
        );
    }

    #[test]
    fn capped_increment_builds_clamped_expression() {
        let expr = capped_increment("storageMonths", 12, 36);
        let max = expr.get_array("$max").unwrap();
        assert_eq!(max.len(), 2);

        let min = max[1].as_document().unwrap().get_array("$min").unwrap();
        assert_eq!(min[1].as_i64(), Some(36));

        let add = min[0].as_document().unwrap().get_array("$add").unwrap();
        assert_eq!(add[1].as_i64(), Some(12));
        assert_eq!(
            add[0].as_document().unwrap().get_array("$ifNull").unwrap()[0].as_str(),
            Some("$storageMonths")
        );
    }
}

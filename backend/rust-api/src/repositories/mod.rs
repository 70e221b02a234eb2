//! Persistence seams. Services only see these traits; production wires the
//! MongoDB/Redis implementations, tests use [`memory::MemoryStore`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};

use crate::models::{
    quiz::{BadgeUnlockEvent, QuizSession, UserQuizStats},
    referral::{ReferralAccount, ReferralRecord, ReferredFamily},
    reward::{CappedCredit, ReconciliationJob, StorageRewardRecord},
};

pub mod memory;
pub mod mongo;
pub mod redis_store;

#[async_trait]
pub trait QuizStatsRepository: Send + Sync {
    async fn get_stats(&self, user_id: &str) -> Result<Option<UserQuizStats>>;
    async fn save_stats(&self, user_id: &str, stats: &UserQuizStats) -> Result<()>;
}

#[async_trait]
pub trait BadgeUnlockRepository: Send + Sync {
    /// Returns false when the badge was already unlocked for this user.
    async fn record_unlock(&self, event: &BadgeUnlockEvent) -> Result<bool>;
    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<BadgeUnlockEvent>>;
}

#[async_trait]
pub trait QuizSessionStore: Send + Sync {
    async fn put_session(&self, session: &QuizSession, ttl: Duration) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<Option<QuizSession>>;
}

#[derive(Debug)]
pub enum ReferralInsert {
    Created(ReferralRecord),
    /// The owner already has a record; it is returned unchanged.
    OwnerExists(ReferralRecord),
    CodeTaken,
}

#[async_trait]
pub trait ReferralRepository: Send + Sync {
    async fn insert_referral(&self, record: &ReferralRecord) -> Result<ReferralInsert>;
    async fn find_by_owner(&self, owner_user_id: &str) -> Result<Option<ReferralRecord>>;
    async fn find_by_code(&self, code: &str) -> Result<Option<ReferralRecord>>;
    /// Appends a pending family and bumps `totalReferred`. False if the code
    /// does not exist or the family is already listed.
    async fn add_referred_family(&self, code: &str, family: &ReferredFamily) -> Result<bool>;
    /// Atomic capped increment of `totalStorageEarnedMonths`, applied at most
    /// once per `grant_key`. None if the code does not exist.
    async fn credit_months(
        &self,
        code: &str,
        grant_key: &str,
        months: u32,
        cap: u32,
    ) -> Result<Option<CappedCredit>>;
    /// Flips a pending family to paid. False if there was no pending entry.
    async fn mark_family_paid(
        &self,
        code: &str,
        family_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_account(&self, user_id: &str) -> Result<Option<ReferralAccount>>;
    /// Sets the referring code once. False if the account already has one.
    async fn attach_referral_code(&self, user_id: &str, code: &str) -> Result<bool>;
    /// Atomic check-and-set of `firstPaymentProcessed`. False if it was
    /// already set.
    async fn claim_first_payment(&self, user_id: &str, at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait StorageRewardRepository: Send + Sync {
    async fn get_reward(&self, user_id: &str) -> Result<Option<StorageRewardRecord>>;
    /// Atomic capped increment of `storageMonths`, applied at most once per
    /// `grant_key`, creating the record if needed.
    async fn credit_reward(
        &self,
        user_id: &str,
        grant_key: &str,
        months: u32,
        cap: u32,
    ) -> Result<CappedCredit>;
}

#[async_trait]
pub trait ReconciliationQueue: Send + Sync {
    async fn enqueue(&self, job: &ReconciliationJob) -> Result<()>;
    /// Jobs neither resolved nor parked, oldest first.
    async fn pending(&self, limit: usize) -> Result<Vec<ReconciliationJob>>;
    async fn mark_resolved(&self, job_id: &str, at: DateTime<Utc>) -> Result<()>;
    /// Bumps `attempts`. A `failed_at` parks the job.
    async fn record_attempt(
        &self,
        job_id: &str,
        error: &str,
        failed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct Repositories {
    pub quiz_stats: Arc<dyn QuizStatsRepository>,
    pub badge_unlocks: Arc<dyn BadgeUnlockRepository>,
    pub quiz_sessions: Arc<dyn QuizSessionStore>,
    pub referrals: Arc<dyn ReferralRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub storage_rewards: Arc<dyn StorageRewardRepository>,
    pub reconciliation: Arc<dyn ReconciliationQueue>,
}

impl Repositories {
    pub fn mongo(db: mongodb::Database, redis: ::redis::aio::ConnectionManager) -> Self {
        let store = Arc::new(mongo::MongoStore::new(db));
        Self {
            quiz_stats: store.clone(),
            badge_unlocks: store.clone(),
            quiz_sessions: Arc::new(redis_store::RedisSessionStore::new(redis)),
            referrals: store.clone(),
            accounts: store.clone(),
            storage_rewards: store.clone(),
            reconciliation: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(memory::MemoryStore::default()))
    }

    pub fn from_memory(store: Arc<memory::MemoryStore>) -> Self {
        Self {
            quiz_stats: store.clone(),
            badge_unlocks: store.clone(),
            quiz_sessions: store.clone(),
            referrals: store.clone(),
            accounts: store.clone(),
            storage_rewards: store.clone(),
            reconciliation: store,
        }
    }
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use super::{
    AccountRepository, BadgeUnlockRepository, QuizSessionStore, QuizStatsRepository,
    ReconciliationQueue, ReferralInsert, ReferralRepository, StorageRewardRepository,
};
use crate::models::{
    quiz::{BadgeUnlockEvent, QuizSession, UserQuizStats},
    referral::{ReferralAccount, ReferralRecord, ReferredFamily, ReferredFamilyStatus},
    reward::{capped_credit, CappedCredit, ReconciliationJob, StorageRewardRecord},
};

#[derive(Default)]
struct Inner {
    stats: HashMap<String, UserQuizStats>,
    unlocks: Vec<BadgeUnlockEvent>,
    sessions: HashMap<String, (QuizSession, DateTime<Utc>)>,
    referrals: Vec<ReferralRecord>,
    accounts: HashMap<String, ReferralAccount>,
    rewards: HashMap<String, StorageRewardRecord>,
    jobs: Vec<ReconciliationJob>,
}

/// Process-local store backing every repository trait. A single mutex makes
/// each operation atomic, which is what the capped increments rely on.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("in-memory store mutex poisoned"))
    }
}

#[async_trait]
impl QuizStatsRepository for MemoryStore {
    async fn get_stats(&self, user_id: &str) -> Result<Option<UserQuizStats>> {
        Ok(self.lock()?.stats.get(user_id).cloned())
    }

    async fn save_stats(&self, user_id: &str, stats: &UserQuizStats) -> Result<()> {
        self.lock()?
            .stats
            .insert(user_id.to_string(), stats.clone());
        Ok(())
    }
}

#[async_trait]
impl BadgeUnlockRepository for MemoryStore {
    async fn record_unlock(&self, event: &BadgeUnlockEvent) -> Result<bool> {
        let mut inner = self.lock()?;
        let exists = inner
            .unlocks
            .iter()
            .any(|e| e.user_id == event.user_id && e.badge_id == event.badge_id);
        if exists {
            return Ok(false);
        }
        inner.unlocks.push(event.clone());
        Ok(true)
    }

    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<BadgeUnlockEvent>> {
        Ok(self
            .lock()?
            .unlocks
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QuizSessionStore for MemoryStore {
    async fn put_session(&self, session: &QuizSession, ttl: Duration) -> Result<()> {
        let evict_at = Utc::now() + chrono::Duration::from_std(ttl)?;
        self.lock()?
            .sessions
            .insert(session.id.clone(), (session.clone(), evict_at));
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<QuizSession>> {
        let mut inner = self.lock()?;
        match inner.sessions.get(session_id) {
            Some((_, evict_at)) if *evict_at <= Utc::now() => {
                inner.sessions.remove(session_id);
                Ok(None)
            }
            Some((session, _)) => Ok(Some(session.clone())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ReferralRepository for MemoryStore {
    async fn insert_referral(&self, record: &ReferralRecord) -> Result<ReferralInsert> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .referrals
            .iter()
            .find(|r| r.owner_user_id == record.owner_user_id)
        {
            return Ok(ReferralInsert::OwnerExists(existing.clone()));
        }
        if inner
            .referrals
            .iter()
            .any(|r| r.referral_code == record.referral_code)
        {
            return Ok(ReferralInsert::CodeTaken);
        }
        inner.referrals.push(record.clone());
        Ok(ReferralInsert::Created(record.clone()))
    }

    async fn find_by_owner(&self, owner_user_id: &str) -> Result<Option<ReferralRecord>> {
        Ok(self
            .lock()?
            .referrals
            .iter()
            .find(|r| r.owner_user_id == owner_user_id)
            .cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<ReferralRecord>> {
        Ok(self
            .lock()?
            .referrals
            .iter()
            .find(|r| r.referral_code == code)
            .cloned())
    }

    async fn add_referred_family(&self, code: &str, family: &ReferredFamily) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(record) = inner.referrals.iter_mut().find(|r| r.referral_code == code) else {
            return Ok(false);
        };
        if record.family(&family.family_id).is_some() {
            return Ok(false);
        }
        record.referred_families.push(family.clone());
        record.total_referred += 1;
        Ok(true)
    }

    async fn credit_months(
        &self,
        code: &str,
        grant_key: &str,
        months: u32,
        cap: u32,
    ) -> Result<Option<CappedCredit>> {
        let mut inner = self.lock()?;
        let Some(record) = inner.referrals.iter_mut().find(|r| r.referral_code == code) else {
            return Ok(None);
        };
        if record.applied_grants.iter().any(|key| key == grant_key) {
            return Ok(Some(CappedCredit::unchanged(
                record.total_storage_earned_months,
            )));
        }
        let credit = capped_credit(record.total_storage_earned_months, months, cap);
        record.total_storage_earned_months = credit.total;
        record.applied_grants.push(grant_key.to_string());
        Ok(Some(credit))
    }

    async fn mark_family_paid(
        &self,
        code: &str,
        family_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let family = inner
            .referrals
            .iter_mut()
            .find(|r| r.referral_code == code)
            .and_then(|r| {
                r.referred_families.iter_mut().find(|f| {
                    f.family_id == family_id && f.status == ReferredFamilyStatus::Pending
                })
            });
        match family {
            Some(family) => {
                family.status = ReferredFamilyStatus::Paid;
                family.paid_at = Some(paid_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<ReferralAccount>> {
        Ok(self.lock()?.accounts.get(user_id).cloned())
    }

    async fn attach_referral_code(&self, user_id: &str, code: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| ReferralAccount {
                user_id: user_id.to_string(),
                ..Default::default()
            });
        if account.referred_by_code.is_some() {
            return Ok(false);
        }
        account.referred_by_code = Some(code.to_string());
        Ok(true)
    }

    async fn claim_first_payment(&self, user_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.lock()?;
        let account = inner
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| ReferralAccount {
                user_id: user_id.to_string(),
                ..Default::default()
            });
        if account.first_payment_processed {
            return Ok(false);
        }
        account.first_payment_processed = true;
        account.first_payment_at = Some(at);
        Ok(true)
    }
}

#[async_trait]
impl StorageRewardRepository for MemoryStore {
    async fn get_reward(&self, user_id: &str) -> Result<Option<StorageRewardRecord>> {
        Ok(self.lock()?.rewards.get(user_id).cloned())
    }

    async fn credit_reward(
        &self,
        user_id: &str,
        grant_key: &str,
        months: u32,
        cap: u32,
    ) -> Result<CappedCredit> {
        let mut inner = self.lock()?;
        let record = inner
            .rewards
            .entry(user_id.to_string())
            .or_insert_with(|| StorageRewardRecord::empty(user_id));
        if record.applied_grants.iter().any(|key| key == grant_key) {
            return Ok(CappedCredit::unchanged(record.storage_months));
        }
        let credit = capped_credit(record.storage_months, months, cap);
        record.storage_months = credit.total;
        record.applied_grants.push(grant_key.to_string());
        Ok(credit)
    }
}

#[async_trait]
impl ReconciliationQueue for MemoryStore {
    async fn enqueue(&self, job: &ReconciliationJob) -> Result<()> {
        self.lock()?.jobs.push(job.clone());
        Ok(())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<ReconciliationJob>> {
        Ok(self
            .lock()?
            .jobs
            .iter()
            .filter(|j| j.resolved_at.is_none() && j.failed_at.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_resolved(&self, job_id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(job) = self.lock()?.jobs.iter_mut().find(|j| j.id == job_id) {
            job.resolved_at = Some(at);
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        job_id: &str,
        error: &str,
        failed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(job) = self.lock()?.jobs.iter_mut().find(|j| j.id == job_id) {
            job.attempts += 1;
            job.error = error.to_string();
            if failed_at.is_some() {
                job.failed_at = failed_at;
            }
        }
        Ok(())
    }
}

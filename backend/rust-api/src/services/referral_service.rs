//! Referral reward ledger.
//!
//! A referring account owns one [`ReferralRecord`] with a shareable code.
//! Signups through the code are attached as pending families; the referred
//! account's first qualifying payment credits both sides with storage months,
//! clamped at `referral.cap_months`. Reward steps that keep failing after the
//! in-process retries are queued for the reconciliation worker instead of
//! failing the payment.

use anyhow::anyhow;
use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};

use crate::config::ReferralConfig;
use crate::metrics::{self, REFERRAL_EVENTS_TOTAL, REFERRAL_REWARD_FAILURES_TOTAL};
use crate::models::referral::{
    ProcessPaymentResponse, ReferralCodeResponse, ReferralRecord, ReferralStatsResponse,
    ReferredFamily, RegisterSignupResponse,
};
use crate::models::reward::{
    first_payment_grant, CappedCredit, ReconciliationJob, ReconciliationStage,
    StorageRewardRecord,
};
use crate::repositories::{ReferralInsert, Repositories};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const CODE_LENGTH: usize = 8;
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum ReferralError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid referral link")]
    NotFound,
    #[error("First payment already processed")]
    AlreadyProcessed,
    #[error("Storage reward capped at {cap} months, {discarded} months discarded")]
    CapExceeded { cap: u32, discarded: u32 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ReferralResult<T> = Result<T, ReferralError>;

pub struct ReferralService {
    repos: Repositories,
    config: ReferralConfig,
    retry: RetryConfig,
}

impl ReferralService {
    pub fn new(repos: Repositories, config: ReferralConfig) -> Self {
        Self {
            repos,
            config,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the owner's record and whether it was created by this call.
    pub async fn create_referral(
        &self,
        user_id: &str,
        family_name: &str,
    ) -> ReferralResult<(ReferralRecord, bool)> {
        let family_name = family_name.trim();
        if family_name.is_empty() {
            return Err(ReferralError::Validation(
                "familyName must not be empty".to_string(),
            ));
        }

        if let Some(existing) = self.repos.referrals.find_by_owner(user_id).await? {
            return Ok((existing, false));
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let record = ReferralRecord::new(
                generate_code(),
                user_id,
                family_name,
                Utc::now(),
                self.config.code_ttl_days,
            );

            match self.repos.referrals.insert_referral(&record).await? {
                ReferralInsert::Created(record) => {
                    REFERRAL_EVENTS_TOTAL.with_label_values(&["created"]).inc();
                    tracing::info!(
                        "Referral code {} created for user {}",
                        record.referral_code,
                        user_id
                    );
                    return Ok((record, true));
                }
                ReferralInsert::OwnerExists(existing) => return Ok((existing, false)),
                ReferralInsert::CodeTaken => {
                    tracing::warn!(
                        "Referral code collision on attempt {}/{}",
                        attempt,
                        MAX_CODE_ATTEMPTS
                    );
                }
            }
        }

        Err(anyhow!(
            "Could not allocate a unique referral code after {} attempts",
            MAX_CODE_ATTEMPTS
        )
        .into())
    }

    /// Attributes a new account to `code`. No reward is granted until its
    /// first qualifying payment.
    pub async fn register_referral_signup(
        &self,
        code: &str,
        new_family_id: &str,
        new_family_name: &str,
    ) -> ReferralResult<RegisterSignupResponse> {
        let code = normalize_code(code);
        let record = self.find_active_code(&code).await?;

        if record.owner_user_id == new_family_id {
            return Err(ReferralError::Validation(
                "An account cannot use its own referral code".to_string(),
            ));
        }

        if !self
            .repos
            .accounts
            .attach_referral_code(new_family_id, &code)
            .await?
        {
            let account = self.repos.accounts.get_account(new_family_id).await?;
            let attached = account.and_then(|a| a.referred_by_code);
            if attached.as_deref() != Some(code.as_str()) {
                return Err(ReferralError::Validation(
                    "Account is already linked to another referral code".to_string(),
                ));
            }
        }

        let family = ReferredFamily::pending(new_family_id, new_family_name, Utc::now());
        let registered = self
            .repos
            .referrals
            .add_referred_family(&code, &family)
            .await?;

        if registered {
            REFERRAL_EVENTS_TOTAL.with_label_values(&["signup"]).inc();
            tracing::info!("Family {} registered through code {}", new_family_id, code);
        } else {
            tracing::debug!(
                "Family {} already registered through code {}",
                new_family_id,
                code
            );
        }

        Ok(RegisterSignupResponse {
            registered,
            referral_code: code,
        })
    }

    /// Grants referral rewards on the account's first qualifying payment.
    ///
    /// Payments below the plan minimum leave the first-payment flag untouched.
    /// Every later call is a no-op returning zero months.
    pub async fn process_first_payment(
        &self,
        user_id: &str,
        payment_amount: f64,
        plan: Option<&str>,
    ) -> ReferralResult<ProcessPaymentResponse> {
        match self.grant_first_payment(user_id, payment_amount, plan).await {
            Err(ReferralError::AlreadyProcessed) => {
                tracing::info!(
                    "Ignoring payment for user {}: {}",
                    user_id,
                    ReferralError::AlreadyProcessed
                );
                Ok(ProcessPaymentResponse::default())
            }
            other => other,
        }
    }

    async fn grant_first_payment(
        &self,
        user_id: &str,
        payment_amount: f64,
        plan: Option<&str>,
    ) -> ReferralResult<ProcessPaymentResponse> {
        if !payment_amount.is_finite() || payment_amount < 0.0 {
            return Err(ReferralError::Validation(
                "paymentAmount must be a non-negative number".to_string(),
            ));
        }

        let minimum = self.config.minimum_payment(plan);
        if payment_amount < minimum {
            tracing::info!(
                "Payment of {} by user {} is below the {} minimum",
                payment_amount,
                user_id,
                minimum
            );
            return Ok(ProcessPaymentResponse::default());
        }

        let now = Utc::now();
        if !self.repos.accounts.claim_first_payment(user_id, now).await? {
            return Err(ReferralError::AlreadyProcessed);
        }

        // The flag is claimed: from here on failures are deferred, never returned.
        let attribution =
            retry_async_with_config(self.retry.clone(), || self.attribution_of(user_id)).await;
        let record = match attribution {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(ProcessPaymentResponse::default()),
            Err(e) => {
                self.defer(ReconciliationStage::FirstPayment, user_id, "", 0, e)
                    .await;
                return Ok(ProcessPaymentResponse::default());
            }
        };
        let code = record.referral_code.as_str();

        let cap = self.config.cap_months;
        let referrer_months = self.config.reward_referrer_months;
        let referred_months = self.config.reward_referred_months;
        let referrer_grant = first_payment_grant(user_id, "referrer");
        let referee_grant = first_payment_grant(user_id, "referee");
        let mut response = ProcessPaymentResponse::default();

        // 1. referrer ledger, mirrored on the referrer's storage
        let ledger = retry_async_with_config(self.retry.clone(), || {
            self.repos
                .referrals
                .credit_months(code, &referrer_grant, referrer_months, cap)
        })
        .await
        .and_then(|credit| credit.ok_or_else(|| anyhow!("referral code {} disappeared", code)));

        match ledger {
            Ok(credit) => {
                self.note_credit("referrer", &credit);
                response.total_months_granted += credit.granted;

                let mirror = retry_async_with_config(self.retry.clone(), || {
                    self.repos.storage_rewards.credit_reward(
                        &record.owner_user_id,
                        &referrer_grant,
                        referrer_months,
                        cap,
                    )
                })
                .await;
                if let Err(e) = mirror {
                    self.defer(
                        ReconciliationStage::ReferrerStorage,
                        user_id,
                        code,
                        referrer_months,
                        e,
                    )
                    .await;
                }
            }
            Err(e) => {
                self.defer(
                    ReconciliationStage::ReferrerLedger,
                    user_id,
                    code,
                    referrer_months,
                    e,
                )
                .await;
            }
        }

        // 2. referee storage
        let referee = retry_async_with_config(self.retry.clone(), || {
            self.repos
                .storage_rewards
                .credit_reward(user_id, &referee_grant, referred_months, cap)
        })
        .await;
        match referee {
            Ok(credit) => {
                self.note_credit("referee", &credit);
                response.referee_bonus = true;
                response.total_months_granted += credit.granted;
            }
            Err(e) => {
                self.defer(
                    ReconciliationStage::RefereeStorage,
                    user_id,
                    code,
                    referred_months,
                    e,
                )
                .await;
            }
        }

        // 3. pending -> paid
        let flipped = retry_async_with_config(self.retry.clone(), || {
            self.repos.referrals.mark_family_paid(code, user_id, now)
        })
        .await;
        match flipped {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "No pending family {} under referral code {}",
                user_id,
                code
            ),
            Err(e) => {
                self.defer(ReconciliationStage::StatusFlip, user_id, code, 0, e)
                    .await;
            }
        }

        REFERRAL_EVENTS_TOTAL
            .with_label_values(&["first_payment"])
            .inc();
        tracing::info!(
            "First payment of user {} rewarded through code {}: {} months granted",
            user_id,
            code,
            response.total_months_granted
        );

        Ok(response)
    }

    pub async fn referral_stats(&self, user_id: &str) -> ReferralResult<ReferralStatsResponse> {
        let referral = self.repos.referrals.find_by_owner(user_id).await?;
        let storage_reward = self
            .repos
            .storage_rewards
            .get_reward(user_id)
            .await?
            .unwrap_or_else(|| StorageRewardRecord::empty(user_id));

        let earned = referral
            .as_ref()
            .map(|r| r.total_storage_earned_months)
            .unwrap_or(0);
        let progress_to_max = if self.config.cap_months == 0 {
            0.0
        } else {
            (earned as f64 * 100.0 / self.config.cap_months as f64).min(100.0)
        };

        Ok(ReferralStatsResponse {
            referral,
            storage_reward,
            progress_to_max,
        })
    }

    /// Public landing-page lookup for a shared link.
    pub async fn lookup_code(&self, code: &str) -> ReferralResult<ReferralCodeResponse> {
        let record = self.find_active_code(&normalize_code(code)).await?;
        Ok(ReferralCodeResponse {
            family_name: record.family_name,
            bonus_months: self.config.reward_referred_months,
        })
    }

    /// Replays one reward step. Used by the reconciliation worker.
    ///
    /// Every credit carries the grant key of the original payment, so a step
    /// that already went through is not applied a second time.
    pub async fn replay(&self, job: &ReconciliationJob) -> anyhow::Result<()> {
        let cap = self.config.cap_months;
        let referrer_grant = first_payment_grant(&job.user_id, "referrer");
        let referee_grant = first_payment_grant(&job.user_id, "referee");

        match job.stage {
            ReconciliationStage::FirstPayment => {
                let Some(record) = self.attribution_of(&job.user_id).await? else {
                    return Ok(());
                };
                self.replay_referrer_ledger(
                    &record,
                    &referrer_grant,
                    self.config.reward_referrer_months,
                )
                .await?;
                let credit = self
                    .repos
                    .storage_rewards
                    .credit_reward(
                        &job.user_id,
                        &referee_grant,
                        self.config.reward_referred_months,
                        cap,
                    )
                    .await?;
                self.note_credit("referee", &credit);
                self.repos
                    .referrals
                    .mark_family_paid(&record.referral_code, &job.user_id, Utc::now())
                    .await?;
            }
            ReconciliationStage::ReferrerLedger => {
                let record = self.referral_by_code(&job.referral_code).await?;
                self.replay_referrer_ledger(&record, &referrer_grant, job.months)
                    .await?;
            }
            ReconciliationStage::ReferrerStorage => {
                let record = self.referral_by_code(&job.referral_code).await?;
                self.repos
                    .storage_rewards
                    .credit_reward(&record.owner_user_id, &referrer_grant, job.months, cap)
                    .await?;
            }
            ReconciliationStage::RefereeStorage => {
                let credit = self
                    .repos
                    .storage_rewards
                    .credit_reward(&job.user_id, &referee_grant, job.months, cap)
                    .await?;
                self.note_credit("referee", &credit);
            }
            ReconciliationStage::StatusFlip => {
                self.repos
                    .referrals
                    .mark_family_paid(&job.referral_code, &job.user_id, Utc::now())
                    .await?;
            }
        }
        Ok(())
    }

    async fn replay_referrer_ledger(
        &self,
        record: &ReferralRecord,
        grant_key: &str,
        months: u32,
    ) -> anyhow::Result<()> {
        let cap = self.config.cap_months;
        let credit = self
            .repos
            .referrals
            .credit_months(&record.referral_code, grant_key, months, cap)
            .await?
            .ok_or_else(|| anyhow!("unknown referral code {}", record.referral_code))?;
        self.note_credit("referrer", &credit);
        self.repos
            .storage_rewards
            .credit_reward(&record.owner_user_id, grant_key, months, cap)
            .await?;
        Ok(())
    }

    /// The referral record the paying account signed up through, if any.
    async fn attribution_of(&self, user_id: &str) -> anyhow::Result<Option<ReferralRecord>> {
        let Some(code) = self
            .repos
            .accounts
            .get_account(user_id)
            .await?
            .and_then(|account| account.referred_by_code)
        else {
            tracing::debug!("User {} has no referral attribution", user_id);
            return Ok(None);
        };

        let record = self.repos.referrals.find_by_code(&code).await?;
        if record.is_none() {
            tracing::warn!(
                "User {} is attributed to unknown referral code {}",
                user_id,
                code
            );
        }
        Ok(record)
    }

    async fn referral_by_code(&self, code: &str) -> anyhow::Result<ReferralRecord> {
        self.repos
            .referrals
            .find_by_code(code)
            .await?
            .ok_or_else(|| anyhow!("unknown referral code {}", code))
    }

    async fn find_active_code(&self, code: &str) -> ReferralResult<ReferralRecord> {
        match self.repos.referrals.find_by_code(code).await? {
            Some(record) if !record.is_expired(Utc::now()) => Ok(record),
            Some(_) => {
                tracing::debug!("Referral code {} has expired", code);
                Err(ReferralError::NotFound)
            }
            None => Err(ReferralError::NotFound),
        }
    }

    fn note_credit(&self, party: &str, credit: &CappedCredit) {
        if credit.was_capped() {
            tracing::info!(
                "{} credit: {}",
                party,
                ReferralError::CapExceeded {
                    cap: self.config.cap_months,
                    discarded: credit.discarded,
                }
            );
        }
        metrics::record_reward(party, credit.granted, credit.was_capped());
    }

    async fn defer(
        &self,
        stage: ReconciliationStage,
        user_id: &str,
        code: &str,
        months: u32,
        error: anyhow::Error,
    ) {
        tracing::error!(
            "Reward step {} failed for user {} (code {}): {:#}",
            stage.as_str(),
            user_id,
            code,
            error
        );
        REFERRAL_REWARD_FAILURES_TOTAL
            .with_label_values(&[stage.as_str()])
            .inc();

        let job = ReconciliationJob::new(user_id, code, stage, months, format!("{:#}", error));
        if let Err(e) = self.repos.reconciliation.enqueue(&job).await {
            tracing::error!(
                "Could not enqueue reconciliation job {} for user {}: {:#}",
                job.id,
                user_id,
                e
            );
        }
    }
}

fn generate_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CODE_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    config::ReferralConfig,
    metrics::{RECONCILIATION_JOBS_TOTAL, RECONCILIATION_WORKER_TICKS_TOTAL},
    models::reward::ReconciliationJob,
    repositories::Repositories,
    services::referral_service::ReferralService,
};

const BATCH_SIZE: usize = 50;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub resolved: usize,
    pub failed: usize,
    /// Jobs that ran out of attempts this tick.
    pub parked: usize,
}

/// Replays reward steps that failed during payment processing.
pub struct ReconciliationWorker {
    repos: Repositories,
    referral_service: ReferralService,
    interval: Duration,
    max_attempts: u32,
}

impl ReconciliationWorker {
    pub fn new(repos: Repositories, config: ReferralConfig) -> Self {
        let interval = Duration::from_secs(config.reconciliation_interval_secs.max(1));
        let max_attempts = config.reconciliation_max_attempts.max(1);
        Self {
            referral_service: ReferralService::new(repos.clone(), config),
            repos,
            interval,
            max_attempts,
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting reconciliation worker (interval={}s, max_attempts={})",
            self.interval.as_secs(),
            self.max_attempts
        );

        loop {
            match self.run_once().await {
                Ok(report) => {
                    RECONCILIATION_WORKER_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    if report.resolved + report.failed + report.parked > 0 {
                        info!(
                            resolved = report.resolved,
                            failed = report.failed,
                            parked = report.parked,
                            "Reconciliation tick completed"
                        );
                    }
                }
                Err(err) => {
                    RECONCILIATION_WORKER_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "reconciliation tick failed");
                }
            }

            sleep(self.interval).await;
        }
    }

    pub async fn run_once(&self) -> Result<TickReport> {
        let pending = self.repos.reconciliation.pending(BATCH_SIZE).await?;
        let mut report = TickReport::default();

        for job in pending {
            match self.referral_service.replay(&job).await {
                Ok(()) => {
                    // A job left unresolved here is replayed again; the grant
                    // keys keep that replay from crediting twice.
                    if let Err(err) = self
                        .repos
                        .reconciliation
                        .mark_resolved(&job.id, Utc::now())
                        .await
                    {
                        warn!(error = %err, job = %job.id, "could not mark job resolved");
                    }
                    RECONCILIATION_JOBS_TOTAL
                        .with_label_values(&["resolved"])
                        .inc();
                    info!(
                        job = %job.id,
                        stage = job.stage.as_str(),
                        "reconciliation job resolved"
                    );
                    report.resolved += 1;
                }
                Err(err) => {
                    if self.record_failure(&job, &err).await {
                        report.parked += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Returns true when the job was parked.
    async fn record_failure(&self, job: &ReconciliationJob, err: &anyhow::Error) -> bool {
        let attempts = job.attempts + 1;
        let parked = attempts >= self.max_attempts;
        let failed_at = parked.then(Utc::now);

        if let Err(update_err) = self
            .repos
            .reconciliation
            .record_attempt(&job.id, &format!("{:#}", err), failed_at)
            .await
        {
            warn!(error = %update_err, job = %job.id, "could not record job attempt");
        }

        if parked {
            RECONCILIATION_JOBS_TOTAL
                .with_label_values(&["parked"])
                .inc();
            error!(
                error = %err,
                job = %job.id,
                stage = job.stage.as_str(),
                user = %job.user_id,
                attempts,
                "reconciliation job parked"
            );
        } else {
            RECONCILIATION_JOBS_TOTAL
                .with_label_values(&["retry"])
                .inc();
            warn!(
                error = %err,
                job = %job.id,
                attempts,
                "reconciliation job failed"
            );
        }
        parked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::referral::ReferralRecord;
    use crate::models::reward::ReconciliationStage;
    use crate::repositories::{
        memory::MemoryStore, ReconciliationQueue, ReferralInsert, ReferralRepository,
        StorageRewardRepository,
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    async fn store_with_referral() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        let record = ReferralRecord::new(
            "ABCD1234".to_string(),
            "referrer",
            "Martin",
            Utc::now(),
            None,
        );
        assert!(matches!(
            store.insert_referral(&record).await.unwrap(),
            ReferralInsert::Created(_)
        ));
        store
    }

    fn job(code: &str, stage: ReconciliationStage) -> ReconciliationJob {
        ReconciliationJob::new("referee", code, stage, 12, "timeout".to_string())
    }

    fn worker(store: &Arc<MemoryStore>, config: ReferralConfig) -> ReconciliationWorker {
        ReconciliationWorker::new(Repositories::from_memory(store.clone()), config)
    }

    /// Queue whose first `mark_resolved` fails.
    struct ResolveOutage {
        inner: Arc<MemoryStore>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ReconciliationQueue for ResolveOutage {
        async fn enqueue(&self, job: &ReconciliationJob) -> Result<()> {
            self.inner.enqueue(job).await
        }

        async fn pending(&self, limit: usize) -> Result<Vec<ReconciliationJob>> {
            self.inner.pending(limit).await
        }

        async fn mark_resolved(&self, job_id: &str, at: DateTime<Utc>) -> Result<()> {
            if self.failing.swap(false, Ordering::SeqCst) {
                return Err(anyhow::anyhow!("queue unavailable"));
            }
            self.inner.mark_resolved(job_id, at).await
        }

        async fn record_attempt(
            &self,
            job_id: &str,
            error: &str,
            failed_at: Option<DateTime<Utc>>,
        ) -> Result<()> {
            self.inner.record_attempt(job_id, error, failed_at).await
        }
    }

    #[tokio::test]
    async fn resolves_replayable_jobs_and_retries_the_rest() {
        let store = store_with_referral().await;
        let ledger = job("ABCD1234", ReconciliationStage::ReferrerLedger);
        let orphan = job("GONE0000", ReconciliationStage::ReferrerStorage);
        store.enqueue(&ledger).await.unwrap();
        store.enqueue(&orphan).await.unwrap();

        let report = worker(&store, ReferralConfig::default())
            .run_once()
            .await
            .unwrap();
        assert_eq!(
            report,
            TickReport {
                resolved: 1,
                failed: 1,
                parked: 0
            }
        );

        let referral = store.find_by_code("ABCD1234").await.unwrap().unwrap();
        assert_eq!(referral.total_storage_earned_months, 12);
        let reward = store.get_reward("referrer").await.unwrap().unwrap();
        assert_eq!(reward.storage_months, 12);

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, orphan.id);
        assert_eq!(pending[0].attempts, 1);
    }

    #[tokio::test]
    async fn exhausted_jobs_are_parked_and_stop_blocking_the_queue() {
        let store = store_with_referral().await;
        for i in 0..BATCH_SIZE {
            let orphan = job(&format!("GONE{:04}", i), ReconciliationStage::ReferrerStorage);
            store.enqueue(&orphan).await.unwrap();
        }
        let replayable = job("ABCD1234", ReconciliationStage::ReferrerLedger);
        store.enqueue(&replayable).await.unwrap();

        let worker = worker(
            &store,
            ReferralConfig {
                reconciliation_max_attempts: 1,
                ..ReferralConfig::default()
            },
        );

        let first = worker.run_once().await.unwrap();
        assert_eq!(
            first,
            TickReport {
                resolved: 0,
                failed: 0,
                parked: BATCH_SIZE
            }
        );

        let pending = store.pending(100).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, replayable.id);

        let second = worker.run_once().await.unwrap();
        assert_eq!(second.resolved, 1);
        assert!(store.pending(100).await.unwrap().is_empty());
        let referral = store.find_by_code("ABCD1234").await.unwrap().unwrap();
        assert_eq!(referral.total_storage_earned_months, 12);
    }

    #[tokio::test]
    async fn unresolved_bookkeeping_does_not_double_credit() {
        let store = store_with_referral().await;
        let ledger = job("ABCD1234", ReconciliationStage::ReferrerLedger);
        let referee = ReconciliationJob::new(
            "referee",
            "ABCD1234",
            ReconciliationStage::RefereeStorage,
            3,
            "timeout".to_string(),
        );
        store.enqueue(&ledger).await.unwrap();
        store.enqueue(&referee).await.unwrap();

        let mut repos = Repositories::from_memory(store.clone());
        repos.reconciliation = Arc::new(ResolveOutage {
            inner: store.clone(),
            failing: AtomicBool::new(true),
        });
        let worker = ReconciliationWorker::new(repos, ReferralConfig::default());

        // The failed bookkeeping on the first job does not stop the batch.
        let first = worker.run_once().await.unwrap();
        assert_eq!(first.resolved, 2);
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ledger.id);

        let second = worker.run_once().await.unwrap();
        assert_eq!(second.resolved, 1);
        assert!(store.pending(10).await.unwrap().is_empty());

        let referral = store.find_by_code("ABCD1234").await.unwrap().unwrap();
        assert_eq!(referral.total_storage_earned_months, 12);
        let reward = store.get_reward("referrer").await.unwrap().unwrap();
        assert_eq!(reward.storage_months, 12);
        let reward = store.get_reward("referee").await.unwrap().unwrap();
        assert_eq!(reward.storage_months, 3);
    }
}

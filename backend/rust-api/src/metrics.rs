use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter_vec, CounterVec, Encoder,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Cache Metrics (Redis)
    pub static ref CACHE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cache_operations_total",
        "Total number of cache operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref CACHE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "cache_operation_duration_seconds",
        "Cache operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1]
    )
    .unwrap();

    // Quiz Metrics
    pub static ref QUIZ_ANSWERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_answers_total",
        "Total number of scored quiz answers",
        &["correct"]
    )
    .unwrap();

    pub static ref QUIZ_POINTS_AWARDED: HistogramVec = register_histogram_vec!(
        "quiz_points_awarded",
        "Points awarded per quiz answer",
        &["correct"],
        vec![0.0, 10.0, 13.0, 15.0, 17.0, 20.0]
    )
    .unwrap();

    pub static ref QUIZ_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sessions_total",
        "Total number of quiz sessions by lifecycle event",
        &["status"]
    )
    .unwrap();

    pub static ref BADGE_UNLOCKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "badge_unlocks_total",
        "Total number of first-time badge unlocks",
        &["badge"]
    )
    .unwrap();

    pub static ref BADGE_REQUIREMENT_UNKNOWN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "badge_requirement_unknown_total",
        "Badge checks that hit an unknown requirement key",
        &["badge"]
    )
    .unwrap();

    // Referral Metrics
    pub static ref REFERRAL_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "referral_events_total",
        "Referral ledger events",
        &["event"]
    )
    .unwrap();

    pub static ref REFERRAL_REWARD_MONTHS: CounterVec = register_counter_vec!(
        "referral_reward_months_total",
        "Storage months credited through referrals",
        &["party"]
    )
    .unwrap();

    pub static ref REFERRAL_CREDITS_CAPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "referral_credits_capped_total",
        "Referral credits clamped at the configured cap",
        &["party"]
    )
    .unwrap();

    pub static ref REFERRAL_REWARD_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "referral_reward_failures_total",
        "Reward grant steps deferred to reconciliation",
        &["stage"]
    )
    .unwrap();

    pub static ref RECONCILIATION_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reconciliation_jobs_total",
        "Reconciliation job replays by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref RECONCILIATION_WORKER_TICKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reconciliation_worker_ticks_total",
        "Total number of reconciliation worker ticks",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

/// Helper: track cache operation with metrics
pub async fn track_cache_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    CACHE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    CACHE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

pub fn record_answer(is_correct: bool, points: u32) {
    let label = if is_correct { "true" } else { "false" };
    QUIZ_ANSWERS_TOTAL.with_label_values(&[label]).inc();
    QUIZ_POINTS_AWARDED
        .with_label_values(&[label])
        .observe(points as f64);
}

pub fn record_reward(party: &str, months: u32, capped: bool) {
    REFERRAL_REWARD_MONTHS
        .with_label_values(&[party])
        .inc_by(months as f64);
    if capped {
        REFERRAL_CREDITS_CAPPED_TOTAL
            .with_label_values(&[party])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        record_answer(true, 20);
        record_reward("referrer", 12, false);

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("quiz_answers_total"));
        assert!(output.contains("referral_reward_months_total"));
    }

    #[tokio::test]
    async fn track_db_operation_passes_result_through() {
        let ok = track_db_operation("find_one", "test", async { Ok::<_, anyhow::Error>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<(), _> =
            track_db_operation("find_one", "test", async { Err(anyhow::anyhow!("boom")) }).await;
        assert!(err.is_err());
    }
}

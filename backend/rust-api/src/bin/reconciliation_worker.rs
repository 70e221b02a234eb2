use tracing_subscriber::{fmt, EnvFilter};

use rootslegacy_api::{
    config::Config,
    services::{reconciliation::ReconciliationWorker, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rootslegacy_api=info".into()),
        )
        .init();

    let config = Config::load()?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
    let redis_client = redis::Client::open(config.redis_uri.clone())?;

    let app_state = AppState::new(config.clone(), mongo_client, redis_client).await?;

    let worker = ReconciliationWorker::new(app_state.repos.clone(), config.referral);
    worker.run().await?;

    Ok(())
}

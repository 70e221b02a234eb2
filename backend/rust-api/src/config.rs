use serde::Deserialize;
use std::{collections::HashMap, env};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub jwt_audience: String,
    /// `username:password` expected by the /metrics Basic Auth guard.
    pub metrics_auth: String,
    pub quiz: QuizConfig,
    pub referral: ReferralConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    pub session_ttl_seconds: u64,
    pub max_questions_per_session: usize,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 3600,
            max_questions_per_session: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferralConfig {
    pub cap_months: u32,
    pub reward_referrer_months: u32,
    pub reward_referred_months: u32,
    pub default_plan: String,
    /// Minimum qualifying first payment per plan.
    pub minimum_payments: HashMap<String, f64>,
    pub code_ttl_days: Option<i64>,
    pub reconciliation_interval_secs: u64,
    /// Failed replays before a reconciliation job is parked.
    pub reconciliation_max_attempts: u32,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            cap_months: 36,
            reward_referrer_months: 12,
            reward_referred_months: 3,
            default_plan: "family".to_string(),
            minimum_payments: HashMap::from([("family".to_string(), 29.0)]),
            code_ttl_days: None,
            reconciliation_interval_secs: 300,
            reconciliation_max_attempts: 10,
        }
    }
}

impl ReferralConfig {
    /// Minimum amount for `plan`, falling back to the default plan when the
    /// plan is missing or unknown.
    pub fn minimum_payment(&self, plan: Option<&str>) -> f64 {
        let requested = plan.unwrap_or(&self.default_plan);
        match self.minimum_payments.get(requested) {
            Some(amount) => *amount,
            None => {
                if plan.is_some() {
                    tracing::warn!(
                        "Unknown plan '{}', using default plan '{}' minimum",
                        requested,
                        self.default_plan
                    );
                }
                self.minimum_payments
                    .get(&self.default_plan)
                    .copied()
                    .unwrap_or(0.0)
            }
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables (prefix: APP__)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let mongo_uri = match settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
        {
            Ok(uri) => uri,
            Err(_) => {
                let user = required_env("MONGO_USER")?;
                let password = required_env("MONGO_PASSWORD")?;
                let db = env::var("MONGO_DB").unwrap_or_else(|_| "rootslegacy".to_string());
                tracing::warn!("Building MongoDB URI from MONGO_USER/MONGO_PASSWORD env vars");
                format!(
                    "mongodb://{}:{}@localhost:27017/{}?authSource=admin",
                    user, password, db
                )
            }
        };

        let redis_uri = match settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
        {
            Ok(uri) => uri,
            Err(_) => {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                let password = required_env("REDIS_PASSWORD")?;
                tracing::warn!("Building Redis URI from REDIS_PASSWORD env var");
                format!("redis://:{}@{}:{}/0", password, host, port)
            }
        };

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "rootslegacy".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                tracing::warn!("Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let jwt_audience = settings
            .get_string("auth.jwt_audience")
            .unwrap_or_else(|_| "authenticated".to_string());

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or_else(|_| "admin:changeme".to_string());

        let quiz_defaults = QuizConfig::default();
        let quiz = QuizConfig {
            session_ttl_seconds: settings
                .get::<u64>("quiz.session_ttl_seconds")
                .unwrap_or(quiz_defaults.session_ttl_seconds),
            max_questions_per_session: settings
                .get::<usize>("quiz.max_questions_per_session")
                .unwrap_or(quiz_defaults.max_questions_per_session),
        };

        let referral_defaults = ReferralConfig::default();
        let referral = ReferralConfig {
            cap_months: settings
                .get::<u32>("referral.cap_months")
                .unwrap_or(referral_defaults.cap_months),
            reward_referrer_months: settings
                .get::<u32>("referral.reward_referrer_months")
                .unwrap_or(referral_defaults.reward_referrer_months),
            reward_referred_months: settings
                .get::<u32>("referral.reward_referred_months")
                .unwrap_or(referral_defaults.reward_referred_months),
            default_plan: settings
                .get_string("referral.default_plan")
                .unwrap_or(referral_defaults.default_plan),
            minimum_payments: settings
                .get::<HashMap<String, f64>>("referral.minimum_payments")
                .unwrap_or(referral_defaults.minimum_payments),
            code_ttl_days: settings.get::<i64>("referral.code_ttl_days").ok(),
            reconciliation_interval_secs: settings
                .get::<u64>("referral.reconciliation_interval_secs")
                .unwrap_or(referral_defaults.reconciliation_interval_secs),
            reconciliation_max_attempts: settings
                .get::<u32>("referral.reconciliation_max_attempts")
                .unwrap_or(referral_defaults.reconciliation_max_attempts),
        };

        if referral.reward_referrer_months > referral.cap_months {
            tracing::warn!(
                "referral.reward_referrer_months ({}) exceeds referral.cap_months ({}); credits will be clamped",
                referral.reward_referrer_months,
                referral.cap_months
            );
        }

        Ok(Config {
            bind_addr,
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            jwt_audience,
            metrics_auth,
            quiz,
            referral,
        })
    }
}

fn required_env(name: &str) -> Result<String, config::ConfigError> {
    env::var(name).map_err(|_| config::ConfigError::NotFound(name.to_string()))
}

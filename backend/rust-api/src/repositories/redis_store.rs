use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::QuizSessionStore;
use crate::metrics::track_cache_operation;
use crate::models::quiz::QuizSession;

/// Quiz sessions live in Redis only for their TTL; the lasting outcome of a
/// session is the stats record written on completion.
pub struct RedisSessionStore {
    redis: ConnectionManager,
}

impl RedisSessionStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(session_id: &str) -> String {
        format!("quiz:session:{}", session_id)
    }
}

#[async_trait]
impl QuizSessionStore for RedisSessionStore {
    async fn put_session(&self, session: &QuizSession, ttl: Duration) -> Result<()> {
        track_cache_operation("set", async {
            let mut conn = self.redis.clone();
            let json = serde_json::to_string(session).context("Failed to serialize session")?;

            redis::cmd("SETEX")
                .arg(Self::key(&session.id))
                .arg(ttl.as_secs().max(1))
                .arg(&json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to store quiz session")?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<QuizSession>> {
        track_cache_operation("get", async {
            let mut conn = self.redis.clone();
            let json: Option<String> = redis::cmd("GET")
                .arg(Self::key(session_id))
                .query_async(&mut conn)
                .await
                .context("Failed to get quiz session from Redis")?;

            match json {
                Some(json) => Ok(Some(
                    serde_json::from_str(&json).context("Failed to deserialize session")?,
                )),
                None => Ok(None),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_keys_are_namespaced() {
        assert_eq!(RedisSessionStore::key("abc"), "quiz:session:abc");
    }
}

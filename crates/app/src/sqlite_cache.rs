//! SQLite-backed [`CacheStore`] implementation.
//!
//! Expiry is lazy: a `get`/`rate_limit` call filters out rows whose
//! `expires_at` has passed rather than a background sweep, so there is
//! no reaper task to run or forget to run.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use ragctl_core::store::{CacheStore, RateLimitResult};

pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query(
            "SELECT value_json FROM cache_entries WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Self::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => {
                let raw: String = r.get("value_json");
                Some(serde_json::from_str(&raw)?)
            }
            None => None,
        })
    }

    async fn put(&self, key: &str, value: serde_json::Value, ttl: std::time::Duration) -> Result<()> {
        let expires_at = Self::now() + ttl.as_secs() as i64;
        let raw = serde_json::to_string(&value)?;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value_json, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(&raw)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rate_limit(
        &self,
        identifier: &str,
        limit: i64,
        window: std::time::Duration,
    ) -> Result<RateLimitResult> {
        let window_seconds = window.as_secs() as i64;
        let now = Self::now();
        let row = sqlx::query("SELECT count, expires_at FROM rate_limits WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        let (count, expires_at) = match row {
            Some(r) => {
                let expires_at: i64 = r.get("expires_at");
                if expires_at <= now {
                    (0, now + window_seconds)
                } else {
                    (r.get::<i64, _>("count"), expires_at)
                }
            }
            None => (0, now + window_seconds),
        };

        let allowed = count < limit;
        let new_count = if allowed { count + 1 } else { count };

        sqlx::query(
            r#"
            INSERT INTO rate_limits (identifier, count, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                count = excluded.count,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(identifier)
        .bind(new_count)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(RateLimitResult {
            allowed,
            remaining: (limit - new_count).max(0),
        })
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries").execute(&self.pool).await?;
        sqlx::query("DELETE FROM rate_limits").execute(&self.pool).await?;
        Ok(())
    }

    async fn total_keys(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cache_entries WHERE expires_at > ?")
            .bind(Self::now())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use serde_json::json;

    async fn memory_store() -> SqliteCacheStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::migrate(&pool).await.unwrap();
        SqliteCacheStore::new(pool)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_value() {
        let store = memory_store().await;
        store
            .put("k", json!({"a": 1}), std::time::Duration::from_secs(60))
            .await
            .unwrap();
        let value = store.get("k").await.unwrap().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn get_returns_none_for_expired_entry() {
        let store = memory_store().await;
        store.put("k", json!("v"), std::time::Duration::ZERO).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limit_allows_up_to_limit_then_blocks() {
        let store = memory_store().await;
        let window = std::time::Duration::from_secs(60);
        for _ in 0..3 {
            let result = store.rate_limit("user-1", 3, window).await.unwrap();
            assert!(result.allowed);
        }
        let blocked = store.rate_limit("user-1", 3, window).await.unwrap();
        assert!(!blocked.allowed);
        assert_eq!(blocked.remaining, 0);
    }
}

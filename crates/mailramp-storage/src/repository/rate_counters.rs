//! Hourly and daily send counters

use crate::db::{db_error, DatabasePool};
use crate::models::{RateScope, RateWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailramp_common::Result;
use uuid::Uuid;

#[async_trait]
pub trait RateCounterRepository: Send + Sync {
    /// Add one send to the window, returning the new count
    async fn increment(
        &self,
        scope: RateScope,
        scope_id: Uuid,
        window: RateWindow,
        window_start: DateTime<Utc>,
    ) -> Result<i64>;

    async fn get(
        &self,
        scope: RateScope,
        scope_id: Uuid,
        window: RateWindow,
        window_start: DateTime<Utc>,
    ) -> Result<i64>;

    /// Drop windows that started before `cutoff`
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct DbRateCounterRepository {
    pool: DatabasePool,
}

impl DbRateCounterRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateCounterRepository for DbRateCounterRepository {
    async fn increment(
        &self,
        scope: RateScope,
        scope_id: Uuid,
        window: RateWindow,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limit_counters (scope, scope_id, window_type, window_start, count, updated_at)
            VALUES ($1, $2, $3, $4, 1, NOW())
            ON CONFLICT (scope, scope_id, window_type, window_start)
            DO UPDATE SET count = rate_limit_counters.count + 1, updated_at = NOW()
            RETURNING count
            "#,
        )
        .bind(scope.as_str())
        .bind(scope_id)
        .bind(window.as_str())
        .bind(window_start)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(count as i64)
    }

    async fn get(
        &self,
        scope: RateScope,
        scope_id: Uuid,
        window: RateWindow,
        window_start: DateTime<Utc>,
    ) -> Result<i64> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT count FROM rate_limit_counters
            WHERE scope = $1 AND scope_id = $2 AND window_type = $3 AND window_start = $4
            "#,
        )
        .bind(scope.as_str())
        .bind(scope_id)
        .bind(window.as_str())
        .bind(window_start)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(count.unwrap_or(0) as i64)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < $1")
            .bind(cutoff)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

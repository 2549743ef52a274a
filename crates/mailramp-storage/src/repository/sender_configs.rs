//! Per-tenant sender configuration

use crate::db::{db_error, DatabasePool};
use crate::models::SenderConfiguration;
use async_trait::async_trait;
use mailramp_common::types::TenantId;
use mailramp_common::Result;

#[async_trait]
pub trait SenderConfigRepository: Send + Sync {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<SenderConfiguration>>;

    async fn upsert(&self, config: SenderConfiguration) -> Result<SenderConfiguration>;
}

pub struct DbSenderConfigRepository {
    pool: DatabasePool,
}

impl DbSenderConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SenderConfigRepository for DbSenderConfigRepository {
    async fn get(&self, tenant_id: TenantId) -> Result<Option<SenderConfiguration>> {
        sqlx::query_as::<_, SenderConfiguration>(
            "SELECT * FROM sender_configurations WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn upsert(&self, config: SenderConfiguration) -> Result<SenderConfiguration> {
        sqlx::query_as::<_, SenderConfiguration>(
            r#"
            INSERT INTO sender_configurations (
                tenant_id, smtp_host, smtp_port, smtp_username, smtp_password, smtp_use_tls,
                from_email, from_name, reply_to, max_per_day, max_per_hour, dedicated_ip,
                tracking_enabled, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (tenant_id) DO UPDATE SET
                smtp_host = EXCLUDED.smtp_host,
                smtp_port = EXCLUDED.smtp_port,
                smtp_username = EXCLUDED.smtp_username,
                smtp_password = EXCLUDED.smtp_password,
                smtp_use_tls = EXCLUDED.smtp_use_tls,
                from_email = EXCLUDED.from_email,
                from_name = EXCLUDED.from_name,
                reply_to = EXCLUDED.reply_to,
                max_per_day = EXCLUDED.max_per_day,
                max_per_hour = EXCLUDED.max_per_hour,
                dedicated_ip = EXCLUDED.dedicated_ip,
                tracking_enabled = EXCLUDED.tracking_enabled,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(config.tenant_id)
        .bind(&config.smtp_host)
        .bind(config.smtp_port)
        .bind(&config.smtp_username)
        .bind(&config.smtp_password)
        .bind(config.smtp_use_tls)
        .bind(&config.from_email)
        .bind(&config.from_name)
        .bind(&config.reply_to)
        .bind(config.max_per_day)
        .bind(config.max_per_hour)
        .bind(&config.dedicated_ip)
        .bind(config.tracking_enabled)
        .bind(config.created_at)
        .bind(config.updated_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }
}

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::db::enums::{CampaignStatus, MessageStatus};
use crate::db::models::Campaign;

#[derive(Error, Debug)]
pub enum CampaignServiceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("campaign not found: {0}")]
    NotFound(Uuid),
    #[error("campaign is not in a state that allows this operation: {0}")]
    InvalidState(String),
}

/// Per-status message aggregates for one campaign.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    pub sent: i64,
    pub delivered: i64,
    pub read: i64,
    pub failed: i64,
}

/// Persistence seam used by the worker. The worker is the single writer of
/// message logs and campaign counters while a campaign is processing, so
/// none of these operations need cross-writer coordination beyond their own
/// transactions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn fetch(&self, id: Uuid) -> Result<Campaign, CampaignServiceError>;

    /// Flips the campaign to `processing`. Fails on terminal campaigns.
    async fn mark_processing(&self, id: Uuid) -> Result<Campaign, CampaignServiceError>;

    /// Current status only; polled at every contact boundary for the
    /// cooperative pause check.
    async fn current_status(&self, id: Uuid) -> Result<CampaignStatus, CampaignServiceError>;

    /// Number of message logs already written for this campaign: the resume
    /// watermark after a partial attempt.
    async fn logged_contact_count(&self, id: Uuid) -> Result<i64, CampaignServiceError>;

    /// Persists a successful send and bumps `sent_count` atomically.
    async fn record_sent(
        &self,
        campaign_id: Uuid,
        phone: &str,
        message_sid: &str,
    ) -> Result<(), CampaignServiceError>;

    /// Persists a failed send and bumps `error_count` atomically. Per-message
    /// failures are terminal; the campaign keeps going.
    async fn record_failed(
        &self,
        campaign_id: Uuid,
        phone: &str,
        error: &str,
    ) -> Result<(), CampaignServiceError>;

    /// Moves a campaign to its terminal status, stamps `sent_at` and charges
    /// the owner's quota by the final `sent_count`. Guarded against terminal
    /// statuses so a retried job can never double-charge.
    async fn finalize(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<Campaign, CampaignServiceError>;

    /// Terminal failure after the job exhausted its attempts.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), CampaignServiceError>;
}

#[derive(Clone)]
pub struct CampaignService {
    pool: PgPool,
}

impl CampaignService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        user_id: Uuid,
        template_id: Uuid,
        total_contacts: i32,
    ) -> Result<Campaign, CampaignServiceError> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (id, name, user_id, template_id, status, total_contacts, created_at)
            VALUES ($1, $2, $3, $4, 'queued', $5, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(user_id)
        .bind(template_id)
        .bind(total_contacts)
        .fetch_one(&self.pool)
        .await?;

        info!(campaign_id = %campaign.id, total_contacts, "campaign created");
        Ok(campaign)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Campaign>, CampaignServiceError> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(campaigns)
    }

    pub async fn get_for_user(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Campaign, CampaignServiceError> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CampaignServiceError::NotFound(id))
    }

    pub async fn message_stats(&self, id: Uuid) -> Result<MessageStats, CampaignServiceError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM message_logs WHERE campaign_id = $1 GROUP BY status",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = MessageStats::default();
        for (status, count) in rows {
            match status.as_str() {
                "sent" => stats.sent = count,
                "delivered" => stats.delivered = count,
                "read" => stats.read = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Delivery rate is delivered-or-read over `sent_count`. `total_contacts`
    /// deliberately does not appear here: rows that never produced a message
    /// log cannot be delivered.
    pub async fn delivery_rate(&self, campaign: &Campaign) -> Result<f64, CampaignServiceError> {
        if campaign.sent_count == 0 {
            return Ok(0.0);
        }
        let stats = self.message_stats(campaign.id).await?;
        Ok((stats.delivered + stats.read) as f64 / f64::from(campaign.sent_count))
    }

    /// Operator pause. Takes effect at the worker's next contact boundary.
    pub async fn pause(&self, id: Uuid, user_id: Uuid) -> Result<Campaign, CampaignServiceError> {
        let updated = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET status = 'paused'
            WHERE id = $1 AND user_id = $2 AND status IN ('queued', 'processing')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(campaign) => Ok(campaign),
            None => {
                let current = self.get_for_user(id, user_id).await?;
                Err(CampaignServiceError::InvalidState(current.status))
            }
        }
    }

    /// Operator resume: back to `queued`; the caller re-releases the parked
    /// job so a consumer can pick the campaign up again.
    pub async fn resume(&self, id: Uuid, user_id: Uuid) -> Result<Campaign, CampaignServiceError> {
        let updated = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET status = 'queued'
            WHERE id = $1 AND user_id = $2 AND status = 'paused'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(campaign) => Ok(campaign),
            None => {
                let current = self.get_for_user(id, user_id).await?;
                Err(CampaignServiceError::InvalidState(current.status))
            }
        }
    }

    /// Applies an asynchronous delivery receipt from the gateway, correlated
    /// by message sid. Touches only the status and timestamp fields
    /// (last-write-wins); campaign counters reflect send attempts and are
    /// never changed here. Returns the owning campaign id when a log matched.
    pub async fn record_delivery_receipt(
        &self,
        message_sid: &str,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<Option<Uuid>, CampaignServiceError> {
        let campaign_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE message_logs
            SET status = $2,
                delivered_at = CASE WHEN $2 IN ('delivered', 'read') THEN NOW() ELSE delivered_at END,
                error_message = COALESCE($3, error_message)
            WHERE message_sid = $1
            RETURNING campaign_id
            "#,
        )
        .bind(message_sid)
        .bind(status.as_str())
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        Ok(campaign_id)
    }
}

#[async_trait]
impl CampaignStore for CampaignService {
    async fn fetch(&self, id: Uuid) -> Result<Campaign, CampaignServiceError> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CampaignServiceError::NotFound(id))
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Campaign, CampaignServiceError> {
        let updated = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET status = 'processing'
            WHERE id = $1 AND status IN ('queued', 'paused', 'processing')
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(campaign) => Ok(campaign),
            None => {
                let current = self.fetch(id).await?;
                Err(CampaignServiceError::InvalidState(current.status))
            }
        }
    }

    async fn current_status(&self, id: Uuid) -> Result<CampaignStatus, CampaignServiceError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM campaigns WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        status
            .ok_or(CampaignServiceError::NotFound(id))?
            .parse()
            .map_err(CampaignServiceError::InvalidState)
    }

    async fn logged_contact_count(&self, id: Uuid) -> Result<i64, CampaignServiceError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM message_logs WHERE campaign_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn record_sent(
        &self,
        campaign_id: Uuid,
        phone: &str,
        message_sid: &str,
    ) -> Result<(), CampaignServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO message_logs (id, campaign_id, phone, status, message_sid, sent_at)
            VALUES ($1, $2, $3, 'sent', $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(phone)
        .bind(message_sid)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE campaigns SET sent_count = sent_count + 1 WHERE id = $1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_failed(
        &self,
        campaign_id: Uuid,
        phone: &str,
        error: &str,
    ) -> Result<(), CampaignServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO message_logs (id, campaign_id, phone, status, error_message, sent_at)
            VALUES ($1, $2, $3, 'failed', $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(phone)
        .bind(error)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE campaigns SET error_count = error_count + 1 WHERE id = $1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn finalize(
        &self,
        id: Uuid,
        status: CampaignStatus,
    ) -> Result<Campaign, CampaignServiceError> {
        let mut tx = self.pool.begin().await?;

        // A pause request landing after the last contact was already
        // processed still finalizes; only terminal statuses are protected.
        let finalized = sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET status = $2, sent_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'completed_with_errors', 'failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(campaign) = finalized else {
            tx.rollback().await?;
            // Already finalized by an earlier attempt; quota was charged then.
            return self.fetch(id).await;
        };

        // Quota consumption reflects actual sends, not the requested count.
        sqlx::query("UPDATE users SET messages_used = messages_used + $2, updated_at = NOW() WHERE id = $1")
            .bind(campaign.user_id)
            .bind(campaign.sent_count)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            campaign_id = %campaign.id,
            status = %campaign.status,
            sent = campaign.sent_count,
            errors = campaign.error_count,
            "campaign finalized"
        );
        Ok(campaign)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<(), CampaignServiceError> {
        sqlx::query(
            r#"
            UPDATE campaigns SET status = 'failed', failure_reason = $2
            WHERE id = $1 AND status NOT IN ('completed', 'completed_with_errors', 'failed')
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::enums::JobStatus;
use crate::db::models::{CampaignJob, JobPayload};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job not found: {0}")]
    NotFound(Uuid),
}

/// Enqueue-time options. Defaults mirror the operational tuning in
/// `ServerConfig`; callers override per campaign (priority comes from the
/// owner's plan tier).
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub priority: i32,
    pub max_attempts: i32,
    pub backoff_base: Duration,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: Uuid,
}

/// What `fail` decided to do with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queued with exponential backoff; attempt count shown.
    Retrying { attempt: i32 },
    /// Attempts exhausted; the job is dead and the campaign must be failed.
    Dead,
}

/// Retry delay for the given attempt number (1-based): the base doubles per
/// attempt already burned.
pub fn backoff_delay(base: Duration, attempt: i32) -> Duration {
    let exponent = attempt.max(1) as u32 - 1;
    base.saturating_mul(2u32.saturating_pow(exponent))
}

/// Durable, priority-ordered campaign work queue backed by the
/// `campaign_jobs` table. One job per campaign; survives process restarts.
/// Consumers race on `lock_next`, which relies on `FOR UPDATE SKIP LOCKED`
/// so concurrent workers never double-claim a job.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts the job for a campaign. The payload embeds the CSV bytes:
    /// from this point the upload exists only inside the queue row.
    pub async fn enqueue(
        &self,
        payload: &JobPayload,
        options: &JobOptions,
    ) -> Result<JobHandle, QueueError> {
        let id = Uuid::new_v4();
        let run_at = Utc::now()
            + chrono::Duration::from_std(options.delay).unwrap_or(chrono::Duration::zero());

        sqlx::query(
            r#"
            INSERT INTO campaign_jobs
                (id, campaign_id, payload, priority, status, attempts, max_attempts, backoff_base_ms, run_at, created_at)
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6, $7, NOW())
            "#,
        )
        .bind(id)
        .bind(payload.campaign_id)
        .bind(sqlx::types::Json(payload))
        .bind(options.priority)
        .bind(options.max_attempts)
        .bind(options.backoff_base.as_millis() as i64)
        .bind(run_at)
        .execute(&self.pool)
        .await?;

        info!(job_id = %id, campaign_id = %payload.campaign_id, priority = options.priority, "campaign job enqueued");
        Ok(JobHandle { id })
    }

    /// Claims the next runnable job: lowest priority number first, oldest
    /// `run_at` among equals. Claiming burns one attempt.
    pub async fn lock_next(&self, consumer: &str) -> Result<Option<CampaignJob>, QueueError> {
        let mut tx = self.pool.begin().await?;

        let candidate = sqlx::query_as::<_, CampaignJob>(
            r#"
            SELECT * FROM campaign_jobs
            WHERE status = 'queued' AND run_at <= NOW()
            ORDER BY priority ASC, run_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = candidate else {
            tx.commit().await?;
            return Ok(None);
        };

        let job = sqlx::query_as::<_, CampaignJob>(
            r#"
            UPDATE campaign_jobs
            SET status = 'running', attempts = attempts + 1, locked_at = NOW(), locked_by = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(consumer)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(job))
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.finish(job_id, JobStatus::Completed, None).await
    }

    /// Records a failed attempt. Re-queues with exponential backoff while
    /// attempts remain, otherwise marks the job dead.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<RetryDecision, QueueError> {
        let job = sqlx::query_as::<_, CampaignJob>("SELECT * FROM campaign_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;

        if job.attempts < job.max_attempts {
            let base = Duration::from_millis(job.backoff_base_ms.max(0) as u64);
            let delay = backoff_delay(base, job.attempts);
            let run_at =
                Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            sqlx::query(
                r#"
                UPDATE campaign_jobs
                SET status = 'queued', run_at = $2, last_error = $3, locked_at = NULL, locked_by = NULL
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(run_at)
            .bind(error)
            .execute(&self.pool)
            .await?;

            warn!(job_id = %job_id, attempt = job.attempts, delay_ms = delay.as_millis() as u64, error, "job attempt failed, retrying");
            Ok(RetryDecision::Retrying {
                attempt: job.attempts,
            })
        } else {
            self.finish(job_id, JobStatus::Failed, Some(error)).await?;
            warn!(job_id = %job_id, attempts = job.attempts, error, "job exhausted its attempts");
            Ok(RetryDecision::Dead)
        }
    }

    /// Parks the job of a paused campaign. Parked jobs are invisible to
    /// `lock_next` and are never retried until explicitly released.
    pub async fn hold(&self, job_id: Uuid) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET status = 'paused', locked_at = NULL, locked_by = NULL
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-queues the parked job of a resumed campaign for immediate pickup.
    /// Returns false when there was nothing to release.
    pub async fn release(&self, campaign_id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET status = 'queued', run_at = NOW(), finished_at = NULL
            WHERE campaign_id = $1 AND status = 'paused'
            "#,
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of queued jobs that would be served before a new job at the
    /// given priority. Feeds the `estimatedStartTime` hint only.
    pub async fn queued_ahead(&self, priority: i32) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM campaign_jobs WHERE status = 'queued' AND priority <= $1",
        )
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Deletes terminal jobs older than the retention window. Bounded
    /// history is an operational knob, not a correctness requirement.
    pub async fn prune_finished(&self, retention: Duration) -> Result<u64, QueueError> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        let result = sqlx::query(
            r#"
            DELETE FROM campaign_jobs
            WHERE status IN ('completed', 'failed') AND finished_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET status = $2, last_error = COALESCE($3, last_error),
                locked_at = NULL, locked_by = NULL, finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(5_000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(5_000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(20_000));
    }

    #[test]
    fn backoff_clamps_attempt_floor() {
        let base = Duration::from_millis(1_000);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, -3), base);
    }
}

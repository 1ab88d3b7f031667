use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::db::enums::{CampaignStatus, PlanTier};

/// Quota-relevant slice of a user account.
/// Corresponds to the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub plan_type: String, // "free", "standard", "pro"
    pub messages_used: i32,
    pub messages_limit: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn tier(&self) -> PlanTier {
        self.plan_type.parse().unwrap_or(PlanTier::Free)
    }
}

/// A WhatsApp message template. `variables` is the ordered list of variable
/// names as they appear positionally in the approved message body.
/// Corresponds to the `templates` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub variables: Json<Vec<String>>,
    pub content_sid: Option<String>,
    pub whatsapp_sid: Option<String>,
    pub legacy_sid: Option<String>,
    pub is_public: bool,
    pub user_id: Option<Uuid>, // None means system-owned
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// The identifier handed to the gateway, in priority order: explicit
    /// content sid, then the generic gateway sid, then the legacy id.
    pub fn gateway_content_id(&self) -> Option<&str> {
        self.content_sid
            .as_deref()
            .or(self.whatsapp_sid.as_deref())
            .or(self.legacy_sid.as_deref())
    }
}

/// A campaign run against one uploaded contact list.
/// Corresponds to the `campaigns` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub status: String,
    pub total_contacts: i32, // fixed at creation
    pub sent_count: i32,
    pub error_count: i32,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn status_enum(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Failed)
    }
}

/// One outbound message attempt within a campaign. Created by the worker at
/// send time; only the delivery-status ingester mutates it afterwards.
/// Corresponds to the `message_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MessageLog {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub phone: String,
    pub status: String,
    pub message_sid: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A queued unit of campaign work. One row per campaign.
/// Corresponds to the `campaign_jobs` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CampaignJob {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub payload: Json<JobPayload>,
    pub priority: i32,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Everything the worker needs to run a campaign, embedded in the job row so
/// a crash between enqueue and pickup cannot lose the upload. The CSV lives
/// only here; the multipart upload is never written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub user_id: Uuid,
    pub user_name: String,
    pub csv_data: String,
    pub template: TemplateSnapshot,
    /// Sanitized JSON text, parsed by the worker.
    pub variable_mappings: String,
    pub default_values: String,
}

/// Immutable template snapshot taken at enqueue time, so a template edit
/// mid-run cannot change what a campaign sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSnapshot {
    pub id: Uuid,
    pub name: String,
    pub content_sid: String,
    pub variables: Vec<String>,
}

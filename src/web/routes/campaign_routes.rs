use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
};
use chrono::{Duration as ChronoDuration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::campaigns::contacts::parse_contacts;
use crate::campaigns::quota::check_quota;
use crate::campaigns::sanitizer::sanitize;
use crate::db::models::{JobPayload, TemplateSnapshot};
use crate::db::services::user_service::get_user_by_id;
use crate::queue::JobOptions;
use crate::server::broadcaster::CampaignEvent;
use crate::web::error::AppError;
use crate::web::models::{
    AuthenticatedUser, CampaignDetailResponse, CampaignListResponse, CreateCampaignResponse,
    CreatedCampaign, DeliveryReportResponse,
};
use crate::web::AppState;

/// Average seconds one already-queued campaign is assumed to occupy a
/// consumer. Feeds the start-time hint only.
const QUEUE_SLOT_ESTIMATE_SECS: i64 = 30;

#[derive(Default)]
struct CreateCampaignForm {
    name: Option<String>,
    template_sid: Option<String>,
    csv_data: Option<String>,
    variable_mappings: Option<String>,
    default_values: Option<String>,
}

async fn read_form(multipart: &mut Multipart) -> Result<CreateCampaignForm, AppError> {
    let mut form = CreateCampaignForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Formulario inválido: {e}")))?
    {
        let Some(name) = field.name().map(|n| n.to_string()) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| AppError::Validation(format!("Formulario inválido: {e}")))?;
        match name.as_str() {
            "name" => form.name = Some(value),
            "templateSid" => form.template_sid = Some(value),
            "csvFile" => form.csv_data = Some(value),
            "variableMappings" => form.variable_mappings = Some(value),
            "defaultValues" => form.default_values = Some(value),
            _ => {}
        }
    }
    Ok(form)
}

/// `POST /api/campaigns/create`: validates the upload, checks the plan
/// quota, creates the campaign row and enqueues its job. The CSV is read
/// straight out of the multipart body into the job payload; nothing touches
/// disk. Quota runs before any row exists, so a rejection leaves no trace.
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    mut multipart: Multipart,
) -> Result<Json<CreateCampaignResponse>, AppError> {
    let form = read_form(&mut multipart).await?;

    let template_sid = form
        .template_sid
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("El identificador de plantilla es requerido".to_string()))?;
    let csv_data = form
        .csv_data
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Archivo CSV requerido".to_string()))?;

    // Known client bug: mapping fields may arrive as corrupted JSON. Repair
    // or default, never reject.
    let variable_mappings = sanitize(form.variable_mappings.as_deref());
    let default_values = sanitize(form.default_values.as_deref());

    let contacts = parse_contacts(&csv_data)?;
    if contacts.is_empty() {
        return Err(AppError::Validation(
            "El archivo CSV no contiene contactos válidos".to_string(),
        ));
    }

    let owner = get_user_by_id(&state.pool, user.id)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let template = state
        .templates
        .find_for_user(&template_sid, user.id)
        .await?
        .ok_or(AppError::TemplateNotFound)?;
    let content_sid = template
        .gateway_content_id()
        .ok_or_else(|| {
            AppError::Validation("La plantilla no tiene un identificador de contenido aprobado".to_string())
        })?
        .to_string();

    check_quota(&owner, contacts.len() as i64).map_err(AppError::QuotaExceeded)?;

    let campaign_name = form
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("Campaña {}", Utc::now().format("%Y-%m-%d %H:%M")));

    let campaign = state
        .campaigns
        .create(&campaign_name, owner.id, template.id, contacts.len() as i32)
        .await?;

    let priority = owner.tier().queue_priority();
    let payload = JobPayload {
        campaign_id: campaign.id,
        campaign_name: campaign.name.clone(),
        user_id: owner.id,
        user_name: owner.name.clone(),
        csv_data,
        template: TemplateSnapshot {
            id: template.id,
            name: template.name.clone(),
            content_sid,
            variables: template.variables.0.clone(),
        },
        variable_mappings,
        default_values,
    };
    let options = JobOptions {
        priority,
        max_attempts: state.config.worker.max_attempts,
        backoff_base: state.config.worker.backoff_base,
        delay: state.config.worker.enqueue_delay,
    };
    let job = state.queue.enqueue(&payload, &options).await?;

    // Start-time hint: jobs already queued at our priority or better, minus
    // the one we just inserted.
    let ahead = (state.queue.queued_ahead(priority).await? - 1).max(0);
    let estimated_start_time = Utc::now()
        + ChronoDuration::from_std(state.config.worker.enqueue_delay)
            .unwrap_or_else(|_| ChronoDuration::zero())
        + ChronoDuration::seconds(ahead * QUEUE_SLOT_ESTIMATE_SECS);

    info!(
        campaign_id = %campaign.id,
        user = %owner.name,
        contacts = campaign.total_contacts,
        priority,
        "campaign accepted and enqueued"
    );

    Ok(Json(CreateCampaignResponse {
        success: true,
        message: format!(
            "Campaña creada y encolada con {} contactos",
            campaign.total_contacts
        ),
        campaign: CreatedCampaign {
            id: campaign.id,
            name: campaign.name,
            status: campaign.status,
            total_contacts: campaign.total_contacts,
            template: template.name,
            job_id: job.id,
            estimated_start_time,
            priority,
        },
    }))
}

pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<CampaignListResponse>, AppError> {
    let campaigns = state.campaigns.list_for_user(user.id).await?;
    Ok(Json(CampaignListResponse {
        success: true,
        campaigns,
    }))
}

pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignDetailResponse>, AppError> {
    let campaign = state.campaigns.get_for_user(id, user.id).await?;
    let messages = state.campaigns.message_stats(id).await?;
    Ok(Json(CampaignDetailResponse {
        success: true,
        campaign,
        messages,
    }))
}

pub async fn delivery_report(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryReportResponse>, AppError> {
    let campaign = state.campaigns.get_for_user(id, user.id).await?;
    let messages = state.campaigns.message_stats(id).await?;
    let delivery_rate = state.campaigns.delivery_rate(&campaign).await?;
    Ok(Json(DeliveryReportResponse {
        success: true,
        campaign_id: campaign.id,
        sent_count: campaign.sent_count,
        messages,
        delivery_rate,
    }))
}

/// Cooperative pause: the worker notices at its next contact boundary and
/// parks the job.
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let campaign = state.campaigns.pause(id, user.id).await?;
    state.broadcaster.emit(
        campaign.id,
        CampaignEvent::status(&campaign, "Pausa solicitada"),
    );
    info!(campaign_id = %campaign.id, "campaign pause requested");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Campaña pausada",
        "status": campaign.status,
    })))
}

pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let campaign = state.campaigns.resume(id, user.id).await?;
    // Re-queue the parked job; false means the worker never got to park it,
    // in which case the still-queued job will simply be picked up again.
    let released = state.queue.release(campaign.id).await?;
    state.broadcaster.emit(
        campaign.id,
        CampaignEvent::status(&campaign, "Campaña reanudada"),
    );
    info!(campaign_id = %campaign.id, released, "campaign resumed");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Campaña reanudada",
        "status": campaign.status,
    })))
}

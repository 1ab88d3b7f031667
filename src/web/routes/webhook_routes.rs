use std::sync::Arc;

use axum::{Form, extract::State, http::StatusCode};
use tracing::{debug, error};

use crate::db::enums::MessageStatus;
use crate::db::services::CampaignStore;
use crate::server::broadcaster::CampaignEvent;
use crate::web::AppState;
use crate::web::models::TwilioStatusCallback;

/// `POST /api/webhooks/twilio/status`: asynchronous delivery receipts from
/// the gateway, correlated by message sid. Always answers 200: the gateway
/// retries on anything else, and correlation by unique sid makes those
/// retries an update, never a duplicate row. Campaign counters are untouched
/// here; they track send attempts, not delivery outcomes.
pub async fn twilio_status_callback(
    State(state): State<Arc<AppState>>,
    Form(callback): Form<TwilioStatusCallback>,
) -> StatusCode {
    let Some(status) = MessageStatus::from_gateway_status(&callback.message_status) else {
        debug!(
            sid = %callback.message_sid,
            status = %callback.message_status,
            "ignoring interim gateway status"
        );
        return StatusCode::OK;
    };

    let error = callback
        .error_code
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(|c| format!("gateway error code {c}"));

    match state
        .campaigns
        .record_delivery_receipt(&callback.message_sid, status, error.as_deref())
        .await
    {
        Ok(Some(campaign_id)) => {
            debug!(sid = %callback.message_sid, status = %status, %campaign_id, "delivery receipt applied");
            // Refresh watchers with a full snapshot; per-message deltas are
            // not part of the room protocol.
            match state.campaigns.fetch(campaign_id).await {
                Ok(campaign) => {
                    state
                        .broadcaster
                        .emit(campaign_id, CampaignEvent::current_status(&campaign));
                }
                Err(e) => error!(%campaign_id, error = %e, "snapshot after receipt failed"),
            }
        }
        Ok(None) => {
            debug!(sid = %callback.message_sid, "receipt for unknown message sid");
        }
        Err(e) => {
            // Swallowed on purpose; a 5xx would only trigger gateway retries.
            error!(sid = %callback.message_sid, error = %e, "failed to apply delivery receipt");
        }
    }
    StatusCode::OK
}

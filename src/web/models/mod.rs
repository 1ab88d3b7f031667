use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::Campaign;
use crate::db::services::MessageStats;

/// JWT claims issued by the auth tier (external to this service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    pub user_id: Uuid,
    pub email: String,
    pub exp: usize,
}

/// Identity injected by the auth middleware into request extensions.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedCampaign {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub total_contacts: i32,
    pub template: String,
    pub job_id: Uuid,
    pub estimated_start_time: DateTime<Utc>,
    pub priority: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub success: bool,
    pub message: String,
    pub campaign: CreatedCampaign,
}

#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub success: bool,
    pub campaigns: Vec<Campaign>,
}

#[derive(Debug, Serialize)]
pub struct CampaignDetailResponse {
    pub success: bool,
    pub campaign: Campaign,
    pub messages: MessageStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReportResponse {
    pub success: bool,
    pub campaign_id: Uuid,
    pub sent_count: i32,
    pub messages: MessageStats,
    /// Delivered-or-read over sent_count. Contacts that never produced a
    /// message log are not part of the denominator.
    pub delivery_rate: f64,
}

/// Twilio status callback body (form-encoded).
#[derive(Debug, Deserialize)]
pub struct TwilioStatusCallback {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "MessageStatus")]
    pub message_status: String,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SystemMessageRequest {
    pub message: String,
}

/// Client -> server events on the campaign WebSocket.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsClientEvent {
    pub event: String,
    pub campaign_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twilio_callback_uses_gateway_field_names() {
        let callback: TwilioStatusCallback = serde_json::from_str(
            r#"{"MessageSid":"SM123","MessageStatus":"delivered","ErrorCode":null}"#,
        )
        .unwrap();
        assert_eq!(callback.message_sid, "SM123");
        assert_eq!(callback.message_status, "delivered");
        assert_eq!(callback.error_code, None);
    }

    #[test]
    fn ws_client_event_parses_join() {
        let event: WsClientEvent = serde_json::from_str(
            r#"{"event":"join_campaign","campaignId":"00000000-0000-0000-0000-000000000000"}"#,
        )
        .unwrap();
        assert_eq!(event.event, "join_campaign");
        assert_eq!(event.campaign_id, Some(Uuid::nil()));
    }

    #[test]
    fn ws_client_event_tolerates_missing_campaign() {
        let event: WsClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(event.event, "ping");
        assert_eq!(event.campaign_id, None);
    }
}

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::db::models::Campaign;

const ROOM_CAPACITY: usize = 256;

/// Server -> client events for the realtime campaign channel. Scoped to a
/// campaign room except for the system/connection variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum CampaignEvent {
    #[serde(rename = "campaign_status")]
    Status {
        campaign_id: Uuid,
        status: String,
        message: String,
        total_contacts: i32,
        sent_count: i32,
        error_count: i32,
        timestamp: String,
    },
    #[serde(rename = "campaign_progress")]
    Progress {
        campaign_id: Uuid,
        sent: i32,
        total: i32,
        errors: i32,
        progress: i32,
        timestamp: String,
    },
    #[serde(rename = "campaign_error")]
    Error {
        campaign_id: Uuid,
        error: String,
        error_type: String,
        timestamp: String,
    },
    /// Sent once, immediately on room join (and after delivery receipts), so
    /// a late-joining client sees current state without waiting for the next
    /// increment.
    #[serde(rename = "campaign_current_status")]
    CurrentStatus {
        campaign_id: Uuid,
        status: String,
        total_contacts: i32,
        sent_count: i32,
        error_count: i32,
        timestamp: String,
    },
    #[serde(rename = "system_message")]
    SystemMessage { message: String, timestamp: String },
    #[serde(rename = "connection_status")]
    ConnectionStatus { status: String, timestamp: String },
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

pub fn progress_percent(sent: i32, errors: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((f64::from(sent + errors) / f64::from(total)) * 100.0).round() as i32
}

impl CampaignEvent {
    pub fn status(campaign: &Campaign, message: impl Into<String>) -> Self {
        CampaignEvent::Status {
            campaign_id: campaign.id,
            status: campaign.status.clone(),
            message: message.into(),
            total_contacts: campaign.total_contacts,
            sent_count: campaign.sent_count,
            error_count: campaign.error_count,
            timestamp: now(),
        }
    }

    pub fn progress(campaign_id: Uuid, sent: i32, total: i32, errors: i32) -> Self {
        CampaignEvent::Progress {
            campaign_id,
            sent,
            total,
            errors,
            progress: progress_percent(sent, errors, total),
            timestamp: now(),
        }
    }

    pub fn error(campaign_id: Uuid, error: impl Into<String>, error_type: impl Into<String>) -> Self {
        CampaignEvent::Error {
            campaign_id,
            error: error.into(),
            error_type: error_type.into(),
            timestamp: now(),
        }
    }

    pub fn current_status(campaign: &Campaign) -> Self {
        CampaignEvent::CurrentStatus {
            campaign_id: campaign.id,
            status: campaign.status.clone(),
            total_contacts: campaign.total_contacts,
            sent_count: campaign.sent_count,
            error_count: campaign.error_count,
            timestamp: now(),
        }
    }

    pub fn connection(status: impl Into<String>) -> Self {
        CampaignEvent::ConnectionStatus {
            status: status.into(),
            timestamp: now(),
        }
    }
}

/// Room-per-campaign fan-out on top of `tokio::sync::broadcast`. Emission is
/// fire-and-forget: a room without subscribers drops the event, and a slow
/// client lags on its own receiver without ever stalling the worker.
pub struct ProgressBroadcaster {
    rooms: DashMap<Uuid, broadcast::Sender<CampaignEvent>>,
    system_tx: broadcast::Sender<CampaignEvent>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        let (system_tx, _) = broadcast::channel(ROOM_CAPACITY);
        Self {
            rooms: DashMap::new(),
            system_tx,
        }
    }

    /// Emits an event into a campaign room. Never blocks, never fails.
    pub fn emit(&self, campaign_id: Uuid, event: CampaignEvent) {
        let sender = self
            .rooms
            .entry(campaign_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone();

        if sender.send(event).is_err() {
            // Nobody is watching; drop the empty room so finished campaigns
            // do not accumulate channels.
            self.rooms
                .remove_if(&campaign_id, |_, tx| tx.receiver_count() == 0);
            debug!(%campaign_id, "dropped event for room without subscribers");
        }
    }

    /// Subscribes to one campaign room, creating it on demand.
    pub fn subscribe(&self, campaign_id: Uuid) -> broadcast::Receiver<CampaignEvent> {
        self.rooms
            .entry(campaign_id)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_system(&self) -> broadcast::Receiver<CampaignEvent> {
        self.system_tx.subscribe()
    }

    /// Operational broadcast to every connected client.
    pub fn broadcast_system(&self, message: impl Into<String>) {
        let _ = self.system_tx.send(CampaignEvent::SystemMessage {
            message: message.into(),
            timestamp: now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn campaign(sent: i32, errors: i32) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "Prueba".to_string(),
            user_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            status: "processing".to_string(),
            total_contacts: 10,
            sent_count: sent,
            error_count: errors,
            failure_reason: None,
            created_at: Utc::now(),
            sent_at: None,
        }
    }

    #[test]
    fn progress_percent_rounds_and_caps() {
        assert_eq!(progress_percent(1, 0, 3), 33);
        assert_eq!(progress_percent(2, 0, 3), 67);
        assert_eq!(progress_percent(3, 0, 3), 100);
        assert_eq!(progress_percent(0, 0, 0), 0);
    }

    #[test]
    fn events_serialize_with_type_tag_and_camel_case() {
        let event = CampaignEvent::progress(Uuid::nil(), 2, 10, 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "campaign_progress");
        assert_eq!(json["campaignId"], Uuid::nil().to_string());
        assert_eq!(json["sent"], 2);
        assert_eq!(json["errors"], 1);
        assert_eq!(json["progress"], 30);
        assert!(json["timestamp"].is_string());

        let status = CampaignEvent::current_status(&campaign(4, 1));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "campaign_current_status");
        assert_eq!(json["totalContacts"], 10);
        assert_eq!(json["sentCount"], 4);
        assert_eq!(json["errorCount"], 1);
    }

    #[tokio::test]
    async fn room_delivers_events_in_emission_order() {
        let broadcaster = ProgressBroadcaster::new();
        let id = Uuid::new_v4();
        let mut rx = broadcaster.subscribe(id);

        for sent in 1..=5 {
            broadcaster.emit(id, CampaignEvent::progress(id, sent, 5, 0));
        }

        let mut last = -1;
        for _ in 0..5 {
            match rx.recv().await.unwrap() {
                CampaignEvent::Progress { sent, progress, .. } => {
                    assert!(sent > last);
                    assert!(progress >= 0 && progress <= 100);
                    last = sent;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let broadcaster = ProgressBroadcaster::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = broadcaster.subscribe(a);
        let mut rx_b = broadcaster.subscribe(b);

        broadcaster.emit(a, CampaignEvent::progress(a, 1, 1, 0));

        match rx_a.recv().await.unwrap() {
            CampaignEvent::Progress { campaign_id, .. } => assert_eq!(campaign_id, a),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx_b.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let broadcaster = ProgressBroadcaster::new();
        let id = Uuid::new_v4();
        broadcaster.emit(id, CampaignEvent::progress(id, 1, 1, 0));
        // Room was pruned again; a later subscribe starts clean.
        assert!(broadcaster.rooms.get(&id).is_none());
    }

    #[tokio::test]
    async fn system_channel_reaches_all_subscribers() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx1 = broadcaster.subscribe_system();
        let mut rx2 = broadcaster.subscribe_system();

        broadcaster.broadcast_system("mantenimiento programado");

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                CampaignEvent::SystemMessage { message, .. } => {
                    assert_eq!(message, "mantenimiento programado");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}

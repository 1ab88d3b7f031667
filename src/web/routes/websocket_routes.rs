use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, Utf8Bytes, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::Deserialize;
use tokio_stream::{StreamMap, wrappers::BroadcastStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::broadcaster::CampaignEvent;
use crate::web::AppState;
use crate::web::error::AppError;
use crate::web::middleware::auth::decode_user;
use crate::web::models::{AuthenticatedUser, WsClientEvent};

#[derive(Deserialize, Debug)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// `GET /ws/campaigns?token=...`: realtime campaign channel. The handshake
/// authenticates with the same JWT the HTTP tier uses, carried in a query
/// parameter because browsers cannot set headers on WebSocket upgrades.
pub async fn campaign_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
) -> Response {
    let Some(token) = query.token else {
        warn!("websocket handshake without token");
        return AppError::InvalidCredentials.into_response();
    };
    let user = match decode_user(&token, &state.config.jwt_secret) {
        Ok(user) => user,
        Err(e) => {
            warn!(error = ?e, "websocket handshake with invalid token");
            return AppError::InvalidCredentials.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_event(sender: &mut WsSender, event: &CampaignEvent) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sender
        .send(Message::Text(Utf8Bytes::from(json)))
        .await
        .map_err(|_| ())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: AuthenticatedUser) {
    info!(user = %user.name, user_id = %user.id, "campaign websocket connected");

    let (mut sender, mut receiver) = socket.split();

    if send_event(&mut sender, &CampaignEvent::connection("connected"))
        .await
        .is_err()
    {
        return;
    }

    // One subscribed stream per joined campaign room, keyed by campaign id.
    let mut rooms: StreamMap<Uuid, BroadcastStream<CampaignEvent>> = StreamMap::new();
    let mut system_events = BroadcastStream::new(state.broadcaster.subscribe_system());

    loop {
        tokio::select! {
            Some((_, event)) = rooms.next(), if !rooms.is_empty() => {
                // A lagged receiver skips ahead; the next snapshot event
                // catches the client up.
                if let Ok(event) = event {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
            }
            Some(event) = system_events.next() => {
                if let Ok(event) = event {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
            }
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(client_event) = serde_json::from_str::<WsClientEvent>(&text) else {
                            debug!(user = %user.name, "unparseable client event ignored");
                            continue;
                        };
                        if handle_client_event(&state, &user, &client_event, &mut rooms, &mut sender)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Ping/pong is answered by the transport.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(user = %user.name, "campaign websocket closed");
}

/// Handles `join_campaign` / `leave_campaign`. Joining subscribes the room
/// and immediately answers with a `campaign_current_status` snapshot, so a
/// late joiner sees current state without waiting for the next increment.
async fn handle_client_event(
    state: &Arc<AppState>,
    user: &AuthenticatedUser,
    event: &WsClientEvent,
    rooms: &mut StreamMap<Uuid, BroadcastStream<CampaignEvent>>,
    sender: &mut WsSender,
) -> Result<(), ()> {
    match event.event.as_str() {
        "join_campaign" => {
            let Some(campaign_id) = event.campaign_id else {
                debug!(user = %user.name, "join_campaign without campaignId");
                return Ok(());
            };
            // Room membership follows campaign ownership.
            let campaign = match state.campaigns.get_for_user(campaign_id, user.id).await {
                Ok(campaign) => campaign,
                Err(e) => {
                    warn!(user = %user.name, %campaign_id, error = %e, "join_campaign rejected");
                    return Ok(());
                }
            };
            rooms.insert(
                campaign_id,
                BroadcastStream::new(state.broadcaster.subscribe(campaign_id)),
            );
            debug!(user = %user.name, %campaign_id, "joined campaign room");
            send_event(sender, &CampaignEvent::current_status(&campaign)).await
        }
        "leave_campaign" => {
            if let Some(campaign_id) = event.campaign_id {
                rooms.remove(&campaign_id);
                debug!(user = %user.name, %campaign_id, "left campaign room");
            }
            Ok(())
        }
        other => {
            debug!(user = %user.name, event = other, "unknown client event ignored");
            Ok(())
        }
    }
}

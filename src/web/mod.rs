use std::sync::Arc;

use axum::{
    Router,
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerConfig;
use crate::db::services::{CampaignService, TemplateService};
use crate::queue::JobQueue;
use crate::server::broadcaster::ProgressBroadcaster;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

/// Shared handler state. Every service receives its pool/config handle here,
/// at construction; nothing reaches for ambient singletons.
pub struct AppState {
    pub config: ServerConfig,
    pub pool: PgPool,
    pub campaigns: CampaignService,
    pub templates: TemplateService,
    pub queue: JobQueue,
    pub broadcaster: Arc<ProgressBroadcaster>,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let protected = Router::new()
        .route(
            "/api/campaigns/create",
            post(routes::campaign_routes::create_campaign),
        )
        .route("/api/campaigns", get(routes::campaign_routes::list_campaigns))
        .route(
            "/api/campaigns/{id}",
            get(routes::campaign_routes::get_campaign),
        )
        .route(
            "/api/campaigns/{id}/report",
            get(routes::campaign_routes::delivery_report),
        )
        .route(
            "/api/campaigns/{id}/pause",
            post(routes::campaign_routes::pause_campaign),
        )
        .route(
            "/api/campaigns/{id}/resume",
            post(routes::campaign_routes::resume_campaign),
        )
        .route(
            "/api/admin/system-message",
            post(routes::admin_routes::broadcast_system_message),
        )
        .route_layer(from_fn_with_state(state.clone(), middleware::auth::auth));

    Router::new()
        .route("/api/health", get(health_check_handler))
        // The gateway signs its callbacks; no bearer auth on this path.
        .route(
            "/api/webhooks/twilio/status",
            post(routes::webhook_routes::twilio_status_callback),
        )
        .route("/ws/campaigns", get(routes::websocket_routes::campaign_ws_handler))
        .merge(protected)
        .with_state(state)
        .layer(cors)
}

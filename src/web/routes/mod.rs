pub mod admin_routes;
pub mod campaign_routes;
pub mod webhook_routes;
pub mod websocket_routes;

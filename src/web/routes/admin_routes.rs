use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use tracing::info;

use crate::web::AppState;
use crate::web::error::AppError;
use crate::web::models::{AuthenticatedUser, SystemMessageRequest};

/// `POST /api/admin/system-message`: operational broadcast to every
/// connected realtime client.
pub async fn broadcast_system_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SystemMessageRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::Validation("El mensaje es requerido".to_string()));
    }
    info!(sender = %user.name, "broadcasting system message");
    state.broadcaster.broadcast_system(request.message);
    Ok(Json(serde_json::json!({ "success": true })))
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::campaigns::contacts::CsvError;
use crate::campaigns::quota::QuotaExceeded;
use crate::db::services::CampaignServiceError;
use crate::queue::QueueError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Límite de mensajes excedido")]
    QuotaExceeded(QuotaExceeded),
    #[error("Plantilla no encontrada")]
    TemplateNotFound,
    #[error("{0}")]
    NotFound(String),
    #[error("Credenciales inválidas")]
    InvalidCredentials,
    #[error("Operación no permitida: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            AppError::QuotaExceeded(details) => (
                StatusCode::FORBIDDEN,
                serde_json::json!({
                    "success": false,
                    "error": "Límite de mensajes excedido",
                    "details": details,
                }),
            ),
            AppError::TemplateNotFound => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "success": false, "error": "Plantilla no encontrada" }),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            AppError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "success": false, "error": "Credenciales inválidas" }),
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                serde_json::json!({ "success": false, "error": msg }),
            ),
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "database error in request handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "error": "Error interno del servidor" }),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "unexpected error in request handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "success": false, "error": "Error interno del servidor" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<CampaignServiceError> for AppError {
    fn from(err: CampaignServiceError) -> Self {
        match err {
            CampaignServiceError::NotFound(_) => {
                AppError::NotFound("Campaña no encontrada".to_string())
            }
            CampaignServiceError::InvalidState(state) => AppError::Conflict(format!(
                "La campaña no permite esta operación en estado '{state}'"
            )),
            CampaignServiceError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<CsvError> for AppError {
    fn from(err: CsvError) -> Self {
        AppError::Validation(err.to_string())
    }
}

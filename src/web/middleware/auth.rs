use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{DecodingKey, Validation, decode};
use std::sync::Arc;
use tracing::warn;

use crate::web::models::{AuthenticatedUser, Claims};
use crate::web::{AppState, error::AppError};

pub async fn auth(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let jwt_secret = &state.config.jwt_secret;

    // Authorization header first, cookie as fallback.
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(|s| s.to_string())
        .or_else(|| jar.get("token").map(|c| c.value().to_string()))
        .ok_or(AppError::InvalidCredentials)?;

    let user = decode_user(&token, jwt_secret).map_err(|e| {
        warn!(error = ?e, "JWT decoding error during auth middleware");
        AppError::InvalidCredentials
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Shared with the WebSocket handshake, which carries the token in a query
/// parameter instead of a header.
pub fn decode_user(token: &str, jwt_secret: &str) -> Result<AuthenticatedUser, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_ref()),
        &Validation::default(),
    )?;

    Ok(AuthenticatedUser {
        id: token_data.claims.user_id,
        name: token_data.claims.sub,
        email: token_data.claims.email,
    })
}

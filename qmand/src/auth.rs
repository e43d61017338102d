//! HTTP Basic Auth middleware guarding every `/remote-api/*` route.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

use crate::state::AppState;

pub async fn require_basic_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(decoded) = STANDARD.decode(encoded) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    if user != common::constants::HTTP_BASIC_AUTH_USER
        || !common::security::verify_shared_secret(pass, &state.api_shared_secret, Some("remote-api"))
    {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(req).await)
}

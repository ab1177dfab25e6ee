// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token endpoints: login, refresh and logout.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::{
    auth::{middleware::bearer_token, Auth},
    error::ApiError,
    models::{LoginRequest, RefreshRequest, TokenResponse},
    state::AppState,
};

/// Exchange identifier and password for a token pair.
#[utoipa::path(
    post,
    path = "/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = TokenResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "Authentication failed"),
    )
)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(request) = payload?;
    let tokens = state
        .engine
        .login(&request.identifier, &request.password)
        .await?;
    Ok(Json(tokens.into()))
}

/// Trade a refresh token for a new token pair.
///
/// The presented refresh token is consumed. Presenting it a second time
/// revokes the session it belongs to.
#[utoipa::path(
    post,
    path = "/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Tokens rotated", body = TokenResponse),
        (status = 400, description = "Malformed request body"),
        (status = 401, description = "Refresh token invalid"),
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(request) = payload?;
    let tokens = state.engine.refresh(&request.refresh_token).await?;
    Ok(Json(tokens.into()))
}

/// End the session of the presented access token.
///
/// Always answers 204: a token that does not verify has nothing to end.
#[utoipa::path(
    post,
    path = "/logout",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Logged out"),
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let account =
        bearer_token(&headers).and_then(|token| state.engine.verify_access_token(token).ok());
    if let Some(account) = account {
        state.engine.logout(&account.session_id)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// End every session of the caller.
#[utoipa::path(
    post,
    path = "/logout/all",
    tag = "Auth",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "All sessions ended"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn logout_all(
    State(state): State<AppState>,
    Auth(account): Auth,
) -> Result<StatusCode, ApiError> {
    state.engine.logout_all(&account.account_id)?;
    Ok(StatusCode::NO_CONTENT)
}

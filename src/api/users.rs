// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Endpoints about the calling account.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::Auth,
    error::ApiError,
    models::{MeResponse, SessionListResponse, SessionSummary},
    state::AppState,
};

/// Get the identity behind the access token.
#[utoipa::path(
    get,
    path = "/me",
    tag = "Account",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Account information", body = MeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn get_me(Auth(account): Auth) -> Json<MeResponse> {
    Json(account.into())
}

/// List the caller's live sessions, newest first.
#[utoipa::path(
    get,
    path = "/me/sessions",
    tag = "Account",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Live sessions", body = SessionListResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    Auth(account): Auth,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = state
        .engine
        .list_sessions(&account.account_id)?
        .into_iter()
        .map(|session| SessionSummary::new(session, &account.session_id))
        .collect();
    Ok(Json(SessionListResponse { sessions }))
}

/// Revoke one of the caller's sessions.
#[utoipa::path(
    delete,
    path = "/me/sessions/{session_id}",
    tag = "Account",
    security(("bearer" = [])),
    params(
        ("session_id" = String, Path, description = "Session to revoke")
    ),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 404, description = "No such session for this account"),
    )
)]
pub async fn revoke_session(
    State(state): State<AppState>,
    Auth(account): Auth,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state
        .engine
        .revoke_session(&account.account_id, &session_id)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Session {session_id} not found")))
    }
}

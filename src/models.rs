// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive
//! `ToSchema` for the OpenAPI document; wire names are camelCase.
//!
//! ## Model Categories
//!
//! - **Tokens**: login and refresh requests, token pair responses
//! - **Account**: current identity and its sessions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{AuthenticatedAccount, IssuedTokens, Session};

// =============================================================================
// Tokens
// =============================================================================

/// Credentials for `POST /login`.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Account identifier (case and width insensitive)
    pub identifier: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /refresh`.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair returned by login and refresh.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Bearer token for protected endpoints
    pub access_token: String,
    /// Single-use token for `POST /refresh`
    pub refresh_token: String,
    /// Access token expiry
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: tokens.expires_at,
            token_type: "Bearer".to_string(),
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// Response for `GET /me`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub account_id: String,
    pub session_id: String,
    /// Access token expiry (Unix timestamp)
    pub expires_at: i64,
}

impl From<AuthenticatedAccount> for MeResponse {
    fn from(account: AuthenticatedAccount) -> Self {
        Self {
            account_id: account.account_id,
            session_id: account.session_id,
            expires_at: account.expires_at,
        }
    }
}

/// One live session of the caller.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rotated_at: Option<DateTime<Utc>>,
    /// Whether this is the session of the calling access token
    pub current: bool,
}

impl SessionSummary {
    pub fn new(session: Session, current_session_id: &str) -> Self {
        Self {
            current: session.session_id == current_session_id,
            session_id: session.session_id,
            issued_at: session.issued_at,
            expires_at: session.expires_at,
            last_rotated_at: session.last_rotated_at,
        }
    }
}

/// Response for `GET /me/sessions`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

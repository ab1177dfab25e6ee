// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Internally every failure keeps its own variant so logs can tell them
//! apart. Externally all authentication failures collapse to one response,
//! and infrastructure faults to another.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::storage::StoreError;

/// Authentication error type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown identifier or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Account is locked (policy or failed-attempt lockout)
    #[error("account is locked")]
    AccountLocked,
    /// Account is disabled
    #[error("account is disabled")]
    AccountDisabled,
    /// Token has expired
    #[error("token has expired")]
    TokenExpired,
    /// Token is malformed, forged, unknown or its session is gone
    #[error("token is invalid")]
    TokenInvalid,
    /// A rotated refresh token was presented again
    #[error("refresh token was replayed")]
    TokenReplayed,
    /// Stored credential record cannot be interpreted
    #[error("stored credential is corrupt: {0}")]
    CorruptCredential(String),
    /// Backing store failed
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),
    /// Key material, RNG or worker pool failure
    #[error("internal authentication error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: &'static str,
}

impl AuthError {
    /// Stable code for logs. Never sent to the caller.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountLocked => "account_locked",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::TokenExpired => "token_expired",
            AuthError::TokenInvalid => "token_invalid",
            AuthError::TokenReplayed => "token_replayed",
            AuthError::CorruptCredential(_) => "corrupt_credential",
            AuthError::StoreUnavailable(_) => "store_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }

    /// True for failures that mean "the caller is not authenticated".
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::AccountLocked
                | AuthError::AccountDisabled
                | AuthError::TokenExpired
                | AuthError::TokenInvalid
                | AuthError::TokenReplayed
        )
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        if self.is_authentication_failure() {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serde(e) => AuthError::CorruptCredential(e.to_string()),
            other => AuthError::StoreUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::UNAUTHORIZED {
            let mut response =
                (status, Json(AuthErrorBody { error: "unauthenticated" })).into_response();
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            response
        } else {
            tracing::error!(
                error_code = self.error_code(),
                error = %self,
                "authentication infrastructure fault"
            );
            (status, Json(AuthErrorBody { error: "internal error" })).into_response()
        }
    }
}

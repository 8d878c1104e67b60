//! Non-committing credential check.
//!
//! Runs `authenticate_user` and reports a precise, machine-readable
//! reason on failure. No session is created; the client follows a
//! successful preflight with the real sign-in call.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::dto::{PreflightResponse, SignInInput};
use crate::rpc::{Backend, RejectionKind, RpcError};
use crate::state::AppState;

const DEFAULT_INVALID: &str = "Invalid email/username or password";
const DEFAULT_UNVERIFIED: &str = "Please verify your email before signing in";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("Identifier and password are required")]
    InvalidInput,
    #[error("{0}")]
    VerificationRequired(String),
    #[error("{0}")]
    InvalidCredentials(String),
    #[error("{0}")]
    AuthFailed(String),
    #[error("Authentication service error")]
    Database,
    #[error("Internal server error")]
    Internal,
}

impl PreflightError {
    pub fn code(&self) -> &'static str {
        match self {
            PreflightError::InvalidInput => "INVALID_INPUT",
            PreflightError::VerificationRequired(_) => "VERIFICATION_REQUIRED",
            PreflightError::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            PreflightError::AuthFailed(_) => "AUTH_FAILED",
            PreflightError::Database => "DATABASE_ERROR",
            PreflightError::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PreflightError::InvalidInput => StatusCode::BAD_REQUEST,
            PreflightError::VerificationRequired(_)
            | PreflightError::InvalidCredentials(_)
            | PreflightError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            PreflightError::Database | PreflightError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<RpcError> for PreflightError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Rejected(rejection) => {
                let message = rejection.message;
                match (rejection.kind, message) {
                    (RejectionKind::VerificationRequired, m) => PreflightError::VerificationRequired(
                        m.unwrap_or_else(|| DEFAULT_UNVERIFIED.to_string()),
                    ),
                    (RejectionKind::InvalidCredentials, m) => PreflightError::InvalidCredentials(
                        m.unwrap_or_else(|| DEFAULT_INVALID.to_string()),
                    ),
                    // silent refusal reads as the default bad-login text
                    (_, None) => PreflightError::InvalidCredentials(DEFAULT_INVALID.to_string()),
                    (_, Some(m)) => PreflightError::AuthFailed(m),
                }
            }
            RpcError::Transport { .. } => PreflightError::Database,
            RpcError::Decode { .. } => PreflightError::Internal,
        }
    }
}

impl IntoResponse for PreflightError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = PreflightResponse {
            success: false,
            code: Some(self.code().to_string()),
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Presence check, then `authenticate_user`.
pub async fn check_credentials(backend: &Backend, input: &SignInInput) -> Result<(), PreflightError> {
    let identifier = input
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let password = input.password.as_deref().filter(|v| !v.is_empty());
    let (Some(identifier), Some(password)) = (identifier, password) else {
        return Err(PreflightError::InvalidInput);
    };

    backend.authenticate_user(identifier, password).await?;
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn preflight(
    State(state): State<AppState>,
    payload: Result<Json<SignInInput>, JsonRejection>,
) -> Result<Json<PreflightResponse>, PreflightError> {
    let Json(input) = payload.map_err(|e| {
        warn!(error = %e, "preflight body unreadable");
        PreflightError::Internal
    })?;

    match check_credentials(&state.backend, &input).await {
        Ok(()) => {
            info!("preflight passed");
            Ok(Json(PreflightResponse {
                success: true,
                code: None,
                message: None,
            }))
        }
        Err(e) => {
            if e.status().is_server_error() {
                error!(code = e.code(), "preflight failed");
            } else {
                warn!(code = e.code(), "preflight refused");
            }
            Err(e)
        }
    }
}

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tracing::{info, instrument, warn};

use super::services;
use crate::{
    auth::{
        dto::{
            CodeQuery, IdentifierInput, ResetPasswordInput, SendVerificationEmailInput, SignUpData,
            SignUpInput, ValidateTokenInput, VerifyEmailInput,
        },
        validation::{
            is_well_formed_code, normalize_code, parse_reset_token, IdentifierForm,
            ResetPasswordForm, SendVerificationEmailForm, SignUpForm, VerifyEmailForm,
        },
    },
    error::{ActionError, ActionResult},
    rpc::RpcError,
    state::AppState,
};

pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/verify-email", post(verify_email))
        .route("/api/auth/resend-code", post(resend_code))
        .route("/api/auth/send-verification-email", post(send_verification_email))
        .route(
            "/authentication/verify-email/:username",
            get(verify_from_link),
        )
}

pub fn password_reset_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/password-reset/initiate", post(initiate_password_reset))
        .route("/api/auth/password-reset/validate", post(validate_reset_token))
        .route("/api/auth/password-reset", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpInput>, JsonRejection>,
) -> ActionResult<SignUpData> {
    let Json(payload) = payload?;
    let form = SignUpForm::parse(&payload)?;
    services::sign_up(&state.backend, &state.mailer, &form)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    payload: Result<Json<VerifyEmailInput>, JsonRejection>,
) -> ActionResult<Value> {
    let Json(payload) = payload?;
    let form = VerifyEmailForm::parse(&payload)?;
    services::verify_email(&state.backend, &form).await.map(Json)
}

#[instrument(skip(state, payload))]
pub async fn resend_code(
    State(state): State<AppState>,
    payload: Result<Json<IdentifierInput>, JsonRejection>,
) -> ActionResult<Value> {
    let Json(payload) = payload?;
    let form = IdentifierForm::parse(&payload)?;
    services::resend_code(&state.backend, &state.mailer, &form)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn send_verification_email(
    State(state): State<AppState>,
    payload: Result<Json<SendVerificationEmailInput>, JsonRejection>,
) -> ActionResult<Value> {
    let Json(payload) = payload?;
    let form = SendVerificationEmailForm::parse(&payload)?;
    services::send_verification_email(&state.mailer, &form)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn initiate_password_reset(
    State(state): State<AppState>,
    payload: Result<Json<IdentifierInput>, JsonRejection>,
) -> ActionResult<Value> {
    let Json(payload) = payload?;
    let form = IdentifierForm::parse(&payload)?;
    services::initiate_password_reset(&state.backend, &state.mailer, &form)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn validate_reset_token(
    State(state): State<AppState>,
    payload: Result<Json<ValidateTokenInput>, JsonRejection>,
) -> ActionResult<Value> {
    let Json(payload) = payload?;
    let token = parse_reset_token(payload.token.as_deref())
        .map_err(|_| ActionError::Rejected("Invalid token format".into()))?;
    services::validate_reset_token(&state.backend, &token)
        .await
        .map(Json)
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordInput>, JsonRejection>,
) -> ActionResult<Value> {
    let Json(payload) = payload?;
    let form = ResetPasswordForm::parse(&payload)?;
    services::reset_password(&state.backend, &form)
        .await
        .map(Json)
}

fn sign_in_redirect(params: &[(&str, &str)]) -> Redirect {
    let mut all = vec![("mode", "signin")];
    all.extend_from_slice(params);
    let query = serde_urlencoded::to_string(&all).unwrap_or_else(|_| "mode=signin".into());
    Redirect::to(&format!("/authentication?{query}"))
}

/// Target of the emailed one-click link: redeems a well-formed code and
/// sends the user to sign-in.
#[instrument(skip(state, query))]
pub async fn verify_from_link(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<CodeQuery>,
) -> Redirect {
    let code = query.code.as_deref().map(normalize_code).unwrap_or_default();
    if !is_well_formed_code(&code) {
        warn!("verification link without a usable code");
        return sign_in_redirect(&[("error", "Invalid verification code")]);
    }

    match state.backend.verify_user_email(&username, &code).await {
        Ok(_) => {
            info!("email verified from link");
            sign_in_redirect(&[("verified", "1")])
        }
        Err(RpcError::Rejected(r)) => {
            let message = r
                .message
                .unwrap_or_else(|| "Invalid verification code".to_string());
            sign_in_redirect(&[("error", message.as_str())])
        }
        Err(e) => {
            warn!(error = %e, "verification link failed");
            sign_in_redirect(&[("error", "Verification failed due to a technical error")])
        }
    }
}

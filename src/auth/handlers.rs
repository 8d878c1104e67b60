use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{
        AuthErrorQuery, IssuedSession, OneClickLoginInput, OneClickLoginResponse, SessionView,
        SignInInput, UsernameQuery,
    },
    extractors::AuthSession,
    preflight::preflight,
    providers::{merge_record, ProviderId, SignInAttempt, SignInError},
    repo_types::SessionUser,
    sign_in_errors::resolve_sign_in_error,
    validation::{username_error, FieldErrors, SignInForm},
};
use crate::{
    error::{ActionError, ActionResponse, ActionResult},
    rpc::RpcError,
    state::AppState,
};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/credentials/preflight", post(preflight))
        .route("/api/auth/signin/credentials", post(sign_in_credentials))
        .route("/api/auth/callback/:provider", post(provider_callback))
        .route("/api/auth/session", get(session))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/error", get(auth_error))
        .route("/api/one-click-login", post(one_click_login))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/check-username", get(check_username))
        .route("/api/users/:username", get(user_profile))
}

/// Generic sign-in failure. Carries an error code, never a reason.
pub struct SignInRejected {
    status: StatusCode,
    code: &'static str,
}

impl SignInRejected {
    fn new(err: &SignInError, provider: ProviderId) -> Self {
        let status = match err {
            SignInError::UnknownProvider => StatusCode::NOT_FOUND,
            SignInError::Refused => StatusCode::UNAUTHORIZED,
            SignInError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: err.code(provider),
        }
    }
}

impl IntoResponse for SignInRejected {
    fn into_response(self) -> Response {
        let body = ActionResponse {
            success: false,
            message: resolve_sign_in_error(Some(self.code), None).message.to_string(),
            data: Some(json!({ "error": self.code })),
        };
        (self.status, Json(body)).into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn sign_in_credentials(
    State(state): State<AppState>,
    payload: Result<Json<SignInInput>, JsonRejection>,
) -> Result<Json<IssuedSession>, Response> {
    let Json(payload) = payload.map_err(|e| ActionError::from(e).into_response())?;
    let form = SignInForm::parse(&payload)
        .map_err(|errors| ActionError::from(errors).into_response())?;

    let attempt = SignInAttempt::Credentials {
        identifier: form.identifier.as_str().to_string(),
        password: form.password,
    };
    match state.issuer.sign_in(ProviderId::Credentials, &attempt).await {
        Ok(session) => Ok(Json(session)),
        Err(e) => {
            warn!(error = %e, "credentials sign-in failed");
            Err(SignInRejected::new(&e, ProviderId::Credentials).into_response())
        }
    }
}

#[instrument(skip(state, profile))]
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    profile: Result<Json<Value>, JsonRejection>,
) -> Result<Json<IssuedSession>, Response> {
    let Some(id) = ProviderId::parse(&provider).filter(|id| *id != ProviderId::Credentials) else {
        warn!(%provider, "callback for unknown provider");
        return Err(
            SignInRejected::new(&SignInError::UnknownProvider, ProviderId::Google).into_response(),
        );
    };
    let Json(profile) = profile.map_err(|e| ActionError::from(e).into_response())?;
    state
        .issuer
        .sign_in(id, &SignInAttempt::Profile(profile))
        .await
        .map(Json)
        .map_err(|e| {
            warn!(provider = id.as_str(), error = %e, "provider sign-in failed");
            SignInRejected::new(&e, id).into_response()
        })
}

/// Current session; re-issues the token (with a fresh profile) once it
/// is older than the update age.
#[instrument(skip_all)]
pub async fn session(
    State(state): State<AppState>,
    AuthSession(claims): AuthSession,
) -> ActionResult<SessionView> {
    let keys = state.issuer.keys();
    let now = OffsetDateTime::now_utc();
    let mut user: SessionUser = claims.user.clone();

    if keys.needs_refresh(&claims, now) {
        match state.backend.get_user_by_id(&user.id).await {
            Ok(Some(record)) => merge_record(&mut user, record),
            Ok(None) => warn!(user_id = %user.id, "session user no longer exists"),
            Err(e) => warn!(error = %e, "profile reload failed; keeping session claims"),
        }
    }

    let token = keys.refresh(&claims, &user, now).map_err(|e| {
        error!(error = %e, "session re-issue failed");
        ActionError::Technical("Failed to refresh session".into())
    })?;
    if token.is_some() {
        info!(user_id = %user.id, "session re-issued");
    }
    Ok(Json(ActionResponse::ok("Session active", SessionView { user, token })))
}

#[instrument(skip_all)]
pub async fn sign_out(session: Option<AuthSession>) -> Json<ActionResponse> {
    if let Some(AuthSession(claims)) = session {
        info!(user_id = %claims.user.id, "signed out");
    }
    Json(ActionResponse::done("Signed out"))
}

/// Bounce identity-layer errors to the sign-in page.
#[instrument]
pub async fn auth_error(Query(q): Query<AuthErrorQuery>) -> Redirect {
    let error = q
        .error
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "OAuthError".to_string());
    let mut params = vec![("mode", "signin".to_string()), ("error", error)];
    if let Some(provider) = q.provider.filter(|p| !p.is_empty()) {
        params.push(("provider", provider));
    }
    let query = serde_urlencoded::to_string(&params).unwrap_or_else(|_| "mode=signin".into());
    Redirect::temporary(&format!("/authentication?{query}"))
}

fn one_click(status: StatusCode, message: &str) -> (StatusCode, Json<OneClickLoginResponse>) {
    (
        status,
        Json(OneClickLoginResponse {
            success: false,
            user: None,
            is_new_user: None,
            message: message.to_string(),
        }),
    )
}

#[instrument(skip(state, payload))]
pub async fn one_click_login(
    State(state): State<AppState>,
    payload: Result<Json<OneClickLoginInput>, JsonRejection>,
) -> (StatusCode, Json<OneClickLoginResponse>) {
    let Ok(Json(input)) = payload else {
        return one_click(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
    };
    let email = input.email.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let name = input.name.as_deref().map(str::trim).filter(|v| !v.is_empty());
    let (Some(email), Some(name)) = (email, name) else {
        return one_click(StatusCode::BAD_REQUEST, "Email and name are required");
    };

    match state
        .backend
        .create_or_update_social_user(email, name, input.image.as_deref())
        .await
    {
        Ok(account) => {
            info!(new_user = account.is_new_user.unwrap_or(false), "one-click login upsert");
            (
                StatusCode::OK,
                Json(OneClickLoginResponse {
                    success: true,
                    user: account.user,
                    is_new_user: account.is_new_user,
                    message: "User created/updated successfully".into(),
                }),
            )
        }
        Err(RpcError::Rejected(r)) => {
            warn!(kind = ?r.kind, "one-click login rejected");
            let message = r
                .message
                .unwrap_or_else(|| "Failed to create/update user".to_string());
            one_click(StatusCode::BAD_REQUEST, &message)
        }
        Err(e) => {
            error!(error = %e, "one-click login backend failure");
            one_click(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create/update user")
        }
    }
}

#[instrument(skip(state))]
pub async fn check_username(
    State(state): State<AppState>,
    Query(q): Query<UsernameQuery>,
) -> ActionResult<Value> {
    let username = q.username.unwrap_or_default();
    let username = username.trim();
    if let Some(message) = username_error(username) {
        let mut errors = FieldErrors::default();
        errors.push("username", message);
        return Err(errors.into());
    }

    match state.backend.check_username_unique(username).await {
        Ok(check) => Ok(Json(ActionResponse::ok(
            check.message.unwrap_or_else(|| "Username is available".into()),
            json!({ "available": true }),
        ))),
        Err(RpcError::Rejected(r)) => Ok(Json(ActionResponse::ok(
            r.message.unwrap_or_else(|| "Username is already taken".into()),
            json!({ "available": false }),
        ))),
        Err(e) => {
            error!(error = %e, "username check failed");
            Err(ActionError::Technical(
                "Failed to check username due to technical error".into(),
            ))
        }
    }
}

#[instrument(skip(state))]
pub async fn user_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ActionResult<SessionUser> {
    match state.backend.get_user_by_username(&username).await {
        Ok(Some(record)) => Ok(Json(ActionResponse::ok(
            "User found",
            SessionUser::from_record(record),
        ))),
        Ok(None) => Err(ActionError::NotFound("User not found".into())),
        Err(e) => {
            error!(error = %e, "profile lookup failed");
            Err(ActionError::Technical(
                "Failed to load user profile due to technical error".into(),
            ))
        }
    }
}

//! HTTP client for this service, as used by a front end.
//!
//! Every form is validated locally before any request goes out, and a
//! credentials sign-in always runs the preflight before the committing
//! call. Successful sign-in and sign-out drive the [`UserContext`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::dto::{
    IdentifierInput, IssuedSession, PreflightResponse, ResetPasswordInput, SessionView, SignInInput,
    SignUpData, SignUpInput, ValidateTokenInput, VerifyEmailInput,
};
use crate::auth::repo_types::SessionUser;
use crate::auth::sign_in_errors::resolve_sign_in_error;
use crate::auth::validation::{
    is_well_formed_code, normalize_code, parse_reset_token, username_error, FieldErrors,
    IdentifierForm, ResetPasswordForm, SignInForm, SignUpForm, VerifyEmailForm,
};
use crate::context::{ProfileSource, SessionStatus, UserContext};
use crate::error::ActionResponse;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{}", .0.first_message())]
    Validation(FieldErrors),

    /// Precise sign-in failure reported by the preflight.
    #[error("{message}")]
    Preflight { code: String, message: String },

    /// Generic failure of the committing sign-in call.
    #[error("{message}")]
    SignIn { code: String, message: String },

    #[error("{message}")]
    Action {
        status: StatusCode,
        message: String,
        data: Option<Value>,
    },

    #[error("not signed in")]
    NoSession,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<FieldErrors> for ClientError {
    fn from(errors: FieldErrors) -> Self {
        ClientError::Validation(errors)
    }
}

/// User-facing text for a sign-in error code (and optional detail code).
pub fn sign_in_error_message(code: Option<&str>, detail: Option<&str>) -> &'static str {
    resolve_sign_in_error(code, detail).message
}

/// Lets a code arriving in a URL be submitted once per page load.
#[derive(Debug, Default)]
pub struct AutoRedeem {
    fired: AtomicBool,
}

impl AutoRedeem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The normalized code the first time a well-formed one is offered.
    pub fn take(&self, raw: Option<&str>) -> Option<String> {
        let code = normalize_code(raw?);
        if !is_well_formed_code(&code) {
            return None;
        }
        self.fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| code)
    }
}

pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn action<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ActionResponse<T>, ClientError> {
        let res = self.http.post(self.url(path)).json(body).send().await?;
        decode_action(res).await
    }

    pub async fn sign_up(&self, input: &SignUpInput) -> Result<ActionResponse<SignUpData>, ClientError> {
        let form = SignUpForm::parse(input)?;
        self.action(
            "/api/auth/signup",
            &SignUpInput {
                username: Some(form.username),
                email: Some(form.email),
                password: Some(form.password),
            },
        )
        .await
    }

    /// Validate, preflight, commit, then update the user context.
    pub async fn sign_in(
        &self,
        context: &UserContext,
        input: &SignInInput,
    ) -> Result<IssuedSession, ClientError> {
        let form = SignInForm::parse(input)?;
        let body = SignInInput {
            identifier: Some(form.identifier.as_str().to_string()),
            password: Some(form.password),
        };

        let res = self
            .http
            .post(self.url("/api/auth/credentials/preflight"))
            .json(&body)
            .send()
            .await?;
        let preflight: PreflightResponse = res.json().await?;
        if !preflight.success {
            let code = preflight.code.unwrap_or_else(|| "AUTH_FAILED".into());
            let message = preflight.message.unwrap_or_else(|| {
                sign_in_error_message(Some("CredentialsSignin"), Some(code.as_str())).to_string()
            });
            debug!(%code, "preflight refused sign-in");
            return Err(ClientError::Preflight { code, message });
        }

        let res = self
            .http
            .post(self.url("/api/auth/signin/credentials"))
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let failure: ActionResponse<Value> = res.json().await?;
            let code = failure
                .data
                .as_ref()
                .and_then(|d| d.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("CredentialsSignin")
                .to_string();
            return Err(ClientError::SignIn {
                message: sign_in_error_message(Some(code.as_str()), None).to_string(),
                code,
            });
        }
        let session: IssuedSession = res.json().await?;
        *self.token.write().await = Some(session.token.clone());
        context
            .session_changed(SessionStatus::Authenticated(session.user.clone()))
            .await;
        Ok(session)
    }

    /// Current session; adopts a re-issued token. A missing or rejected
    /// session clears the user context.
    pub async fn session(&self, context: &UserContext) -> Result<SessionView, ClientError> {
        let Some(token) = self.token().await else {
            context.session_changed(SessionStatus::Unauthenticated).await;
            return Err(ClientError::NoSession);
        };
        let res = self
            .http
            .get(self.url("/api/auth/session"))
            .bearer_auth(token)
            .send()
            .await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            debug!("session rejected by server");
            *self.token.write().await = None;
            context.session_changed(SessionStatus::Unauthenticated).await;
            return Err(ClientError::NoSession);
        }
        let view: ActionResponse<SessionView> = decode_action(res).await?;
        let Some(view) = view.data else {
            *self.token.write().await = None;
            context.session_changed(SessionStatus::Unauthenticated).await;
            return Err(ClientError::NoSession);
        };
        if let Some(renewed) = &view.token {
            *self.token.write().await = Some(renewed.clone());
        }
        Ok(view)
    }

    pub async fn sign_out(&self, context: &UserContext) -> Result<(), ClientError> {
        let token = self.token.write().await.take();
        let mut req = self.http.post(self.url("/api/auth/signout"));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        // local state is cleared whatever the server says
        context.logout().await;
        if let Err(e) = req.send().await {
            warn!(error = %e, "sign-out request failed");
        }
        Ok(())
    }

    pub async fn verify_email(&self, input: &VerifyEmailInput) -> Result<ActionResponse, ClientError> {
        let form = VerifyEmailForm::parse(input)?;
        self.action(
            "/api/auth/verify-email",
            &json!({
                "identifier": form.identifier.as_str(),
                "verificationCode": form.code,
            }),
        )
        .await
    }

    /// Submit a code that arrived in a URL, at most once per guard.
    pub async fn auto_verify(
        &self,
        guard: &AutoRedeem,
        identifier: &str,
        code_param: Option<&str>,
    ) -> Option<Result<ActionResponse, ClientError>> {
        let code = guard.take(code_param)?;
        Some(
            self.verify_email(&VerifyEmailInput {
                identifier: Some(identifier.to_string()),
                verification_code: Some(code),
            })
            .await,
        )
    }

    pub async fn resend_code(&self, identifier: &str) -> Result<ActionResponse, ClientError> {
        let form = IdentifierForm::parse(&IdentifierInput {
            identifier: Some(identifier.to_string()),
        })?;
        self.action(
            "/api/auth/resend-code",
            &json!({ "identifier": form.identifier.as_str() }),
        )
        .await
    }

    pub async fn initiate_password_reset(&self, identifier: &str) -> Result<ActionResponse, ClientError> {
        let form = IdentifierForm::parse(&IdentifierInput {
            identifier: Some(identifier.to_string()),
        })?;
        self.action(
            "/api/auth/password-reset/initiate",
            &json!({ "identifier": form.identifier.as_str() }),
        )
        .await
    }

    /// Advisory only; `reset_password` can still fail afterwards.
    pub async fn validate_reset_token(&self, token: &str) -> Result<ActionResponse, ClientError> {
        let token = parse_reset_token(Some(token))?;
        self.action(
            "/api/auth/password-reset/validate",
            &ValidateTokenInput { token: Some(token) },
        )
        .await
    }

    pub async fn reset_password(&self, input: &ResetPasswordInput) -> Result<ActionResponse, ClientError> {
        let form = ResetPasswordForm::parse(input)?;
        self.action(
            "/api/auth/password-reset",
            &ResetPasswordInput {
                identifier: form.identifier.map(|i| i.as_str().to_string()),
                new_password: Some(form.new_password),
                token: Some(form.token),
            },
        )
        .await
    }

    /// Public profile; `None` when no such user exists.
    pub async fn user_profile(&self, username: &str) -> Result<Option<SessionUser>, ClientError> {
        if let Some(message) = username_error(username) {
            let mut errors = FieldErrors::default();
            errors.push("username", message);
            return Err(errors.into());
        }
        let res = self
            .http
            .get(self.url(&format!("/api/users/{username}")))
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let found: ActionResponse<SessionUser> = decode_action(res).await?;
        Ok(found.data)
    }
}

async fn decode_action<T: DeserializeOwned>(
    res: reqwest::Response,
) -> Result<ActionResponse<T>, ClientError> {
    let status = res.status();
    let body: Value = res.json().await?;
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !status.is_success() || !success {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("An unexpected error occurred")
            .to_string();
        return Err(ClientError::Action {
            status,
            message,
            data: body.get("data").cloned(),
        });
    }
    serde_json::from_value(body).map_err(|e| ClientError::Action {
        status,
        message: format!("unexpected response shape: {e}"),
        data: None,
    })
}

#[async_trait]
impl ProfileSource for AuthClient {
    async fn fetch_profile(&self, username: &str) -> anyhow::Result<Option<SessionUser>> {
        Ok(self.user_profile(username).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn auto_redeem_fires_once_for_well_formed_codes() {
        let guard = AutoRedeem::new();
        assert_eq!(guard.take(None), None);
        assert_eq!(guard.take(Some("abc")), None);
        assert_eq!(guard.take(Some(" ab12cd ")), Some("AB12CD".to_string()));
        assert_eq!(guard.take(Some("AB12CD")), None);
    }

    #[test]
    fn error_messages_follow_codes() {
        assert_eq!(
            sign_in_error_message(Some("CredentialsSignin"), Some("VERIFICATION_REQUIRED")),
            "Please verify your email before signing in"
        );
        assert_eq!(
            sign_in_error_message(Some("OAuthError"), None),
            "Authentication service error. Please try again."
        );
    }

    #[tokio::test]
    async fn invalid_forms_never_reach_the_network() {
        // nothing listens on this port; validation must fail first
        let client = AuthClient::new("http://127.0.0.1:9");
        let err = client
            .sign_up(&SignUpInput {
                username: Some("a".into()),
                email: Some("a@example.com".into()),
                password: Some("longenough".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(err.to_string(), "Username must be at least 2 characters");

        let err = client.validate_reset_token("short").await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));

        for name in ["../session", "bob?x=1", "a#b", "x"] {
            let err = client.user_profile(name).await.unwrap_err();
            assert!(matches!(err, ClientError::Validation(_)), "{name}");
        }
    }

    #[tokio::test]
    async fn session_without_token_clears_context() {
        use crate::auth::repo_types::UserRecord;
        use crate::context::{MemoryUserStore, UserStore};

        let store = Arc::new(MemoryUserStore::new());
        let client = Arc::new(AuthClient::new("http://127.0.0.1:9"));
        let ctx = UserContext::new(store.clone(), client.clone());
        ctx.set_user(Some(SessionUser::from_record(UserRecord {
            id: Some("id-bob".into()),
            username: Some("bob".into()),
            email: Some("bob@example.com".into()),
            ..Default::default()
        })))
        .await;

        let err = client.session(&ctx).await.unwrap_err();
        assert!(matches!(err, ClientError::NoSession));
        assert!(ctx.current().await.is_none());
        assert!(store.load().await.unwrap().is_none());
    }
}

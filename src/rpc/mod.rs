//! Boundary to the Postgres backend.
//!
//! The backend exposes stored procedures that answer with loosely shaped
//! JSON documents (`{success, error?, ...}`). Everything is decoded here,
//! once, into `Result<T, RpcError>`: a business refusal becomes a
//! [`Rejection`] with a classified [`RejectionKind`], and anything that
//! went wrong on the way (connection, SQL, malformed JSON) becomes a
//! technical error that callers never show verbatim.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod memory;
pub mod postgres;
pub mod types;

pub use memory::MemoryBackend;
pub use postgres::PgTransport;
pub use types::*;

use crate::auth::repo_types::UserRecord;

/// Stored procedures consumed by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    CreateUserAccount,
    AuthenticateUser,
    VerifyUserEmail,
    ResendVerificationCode,
    InitiatePasswordReset,
    ValidateResetToken,
    ResetPassword,
    CreateOrUpdateSocialUser,
    CheckUsernameUnique,
    GetUserByUsername,
    GetUserById,
}

impl Procedure {
    pub fn name(self) -> &'static str {
        match self {
            Procedure::CreateUserAccount => "create_user_account",
            Procedure::AuthenticateUser => "authenticate_user",
            Procedure::VerifyUserEmail => "verify_user_email",
            Procedure::ResendVerificationCode => "resend_verification_code",
            Procedure::InitiatePasswordReset => "initiate_password_reset",
            Procedure::ValidateResetToken => "validate_reset_token",
            Procedure::ResetPassword => "reset_password",
            Procedure::CreateOrUpdateSocialUser => "create_or_update_social_user",
            Procedure::CheckUsernameUnique => "check_username_unique",
            Procedure::GetUserByUsername => "get_user_by_username",
            Procedure::GetUserById => "get_user_by_id",
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SQL type of a procedure argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Text,
    Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcArg {
    pub name: &'static str,
    pub value: Option<String>,
    pub ty: ArgType,
}

/// One stored-procedure invocation with named arguments.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub procedure: Procedure,
    pub args: Vec<RpcArg>,
}

impl RpcCall {
    pub fn new(procedure: Procedure) -> Self {
        Self {
            procedure,
            args: Vec::new(),
        }
    }

    pub fn text(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.args.push(RpcArg {
            name,
            value: Some(value.into()),
            ty: ArgType::Text,
        });
        self
    }

    pub fn opt_text(mut self, name: &'static str, value: Option<&str>) -> Self {
        self.args.push(RpcArg {
            name,
            value: value.map(str::to_string),
            ty: ArgType::Text,
        });
        self
    }

    pub fn uuid(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.args.push(RpcArg {
            name,
            value: Some(value.into()),
            ty: ArgType::Uuid,
        });
        self
    }

    /// Value of a named argument, if present and non-null.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.value.as_deref())
    }
}

/// Generic "call stored procedure by name" transport.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, call: &RpcCall) -> anyhow::Result<Value>;
}

/// What a business refusal from the backend means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    VerificationRequired,
    InvalidCredentials,
    Cooldown,
    EmailTaken,
    UsernameTaken,
    InvalidCode,
    InvalidToken,
    NotFound,
    Other,
}

impl RejectionKind {
    fn from_code(code: &str) -> Option<Self> {
        let kind = match code.to_ascii_uppercase().as_str() {
            "VERIFICATION_REQUIRED" => RejectionKind::VerificationRequired,
            "INVALID_CREDENTIALS" => RejectionKind::InvalidCredentials,
            "COOLDOWN" | "RATE_LIMITED" => RejectionKind::Cooldown,
            "EMAIL_TAKEN" => RejectionKind::EmailTaken,
            "USERNAME_TAKEN" => RejectionKind::UsernameTaken,
            "INVALID_CODE" | "CODE_EXPIRED" => RejectionKind::InvalidCode,
            "INVALID_TOKEN" | "TOKEN_EXPIRED" => RejectionKind::InvalidToken,
            "NOT_FOUND" => RejectionKind::NotFound,
            _ => return None,
        };
        Some(kind)
    }
}

/// A structured `{success: false}` answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: RejectionKind,
    /// Backend text, if it sent any.
    pub message: Option<String>,
    pub minutes_remaining: Option<f64>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(m) => write!(f, "{m}"),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DebugInfo {
    #[serde(default)]
    minutes_remaining: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    requires_verification: Option<bool>,
    #[serde(default)]
    debug: Option<DebugInfo>,
}

impl Rejection {
    /// Classify a refusal. A machine-readable `code` wins; otherwise the
    /// free-text message is matched against the keywords each procedure
    /// is known to use.
    fn classify(procedure: Procedure, envelope: Envelope) -> Self {
        let minutes_remaining = envelope.debug.and_then(|d| d.minutes_remaining);
        let message = envelope
            .error
            .or(envelope.message)
            .filter(|m| !m.trim().is_empty());
        let text = message.as_deref().unwrap_or_default().to_lowercase();

        let kind = envelope
            .code
            .as_deref()
            .and_then(RejectionKind::from_code)
            .unwrap_or_else(|| {
                if envelope.requires_verification == Some(true) {
                    return RejectionKind::VerificationRequired;
                }
                match procedure {
                    Procedure::CreateUserAccount if text.contains("email") => {
                        RejectionKind::EmailTaken
                    }
                    Procedure::CreateUserAccount
                        if text.contains("username") || text.contains("user_name") =>
                    {
                        RejectionKind::UsernameTaken
                    }
                    Procedure::AuthenticateUser
                        if text.contains("password") || text.contains("user") =>
                    {
                        RejectionKind::InvalidCredentials
                    }
                    Procedure::ResendVerificationCode | Procedure::InitiatePasswordReset
                        if text.contains("15 minutes") || minutes_remaining.is_some() =>
                    {
                        RejectionKind::Cooldown
                    }
                    Procedure::VerifyUserEmail => RejectionKind::InvalidCode,
                    Procedure::ValidateResetToken | Procedure::ResetPassword => {
                        RejectionKind::InvalidToken
                    }
                    Procedure::CheckUsernameUnique => RejectionKind::UsernameTaken,
                    Procedure::GetUserByUsername | Procedure::GetUserById => {
                        RejectionKind::NotFound
                    }
                    _ => RejectionKind::Other,
                }
            });

        Self {
            kind,
            message,
            minutes_remaining,
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rejected: {0}")]
    Rejected(Rejection),

    #[error("backend call {procedure} failed: {source}")]
    Transport {
        procedure: Procedure,
        #[source]
        source: anyhow::Error,
    },

    #[error("malformed response from {procedure}: {source}")]
    Decode {
        procedure: Procedure,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            RpcError::Rejected(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_technical(&self) -> bool {
        !matches!(self, RpcError::Rejected(_))
    }
}

/// Decode a procedure answer into its typed success payload.
pub fn decode<T: DeserializeOwned>(procedure: Procedure, value: Value) -> Result<T, RpcError> {
    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|source| RpcError::Decode { procedure, source })?;
    if !envelope.success {
        let rejection = Rejection::classify(procedure, envelope);
        debug!(%procedure, kind = ?rejection.kind, "backend rejected call");
        return Err(RpcError::Rejected(rejection));
    }
    serde_json::from_value(value).map_err(|source| RpcError::Decode { procedure, source })
}

/// Typed facade over the stored procedures.
#[derive(Clone)]
pub struct Backend {
    transport: Arc<dyn RpcTransport>,
}

impl Backend {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    async fn invoke<T: DeserializeOwned>(&self, call: RpcCall) -> Result<T, RpcError> {
        let procedure = call.procedure;
        let value = self.transport.call(&call).await.map_err(|source| {
            warn!(%procedure, error = %source, "backend call failed");
            RpcError::Transport { procedure, source }
        })?;
        decode(procedure, value)
    }

    pub async fn create_user_account(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<CreatedAccount, RpcError> {
        self.invoke(
            RpcCall::new(Procedure::CreateUserAccount)
                .text("p_email", email)
                .text("p_password", password)
                .text("p_username", username),
        )
        .await
    }

    pub async fn authenticate_user(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Authenticated, RpcError> {
        self.invoke(
            RpcCall::new(Procedure::AuthenticateUser)
                .text("p_identifier", identifier)
                .text("p_password", password),
        )
        .await
    }

    pub async fn verify_user_email(&self, identifier: &str, code: &str) -> Result<Ack, RpcError> {
        self.invoke(
            RpcCall::new(Procedure::VerifyUserEmail)
                .text("p_identifier", identifier)
                .text("p_verification_code", code),
        )
        .await
    }

    pub async fn resend_verification_code(&self, identifier: &str) -> Result<IssuedCode, RpcError> {
        self.invoke(
            RpcCall::new(Procedure::ResendVerificationCode).text("p_identifier", identifier),
        )
        .await
    }

    pub async fn initiate_password_reset(
        &self,
        identifier: &str,
    ) -> Result<IssuedResetToken, RpcError> {
        self.invoke(RpcCall::new(Procedure::InitiatePasswordReset).text("p_identifier", identifier))
            .await
    }

    pub async fn validate_reset_token(&self, token: &str) -> Result<TokenOwner, RpcError> {
        self.invoke(RpcCall::new(Procedure::ValidateResetToken).text("p_reset_token", token))
            .await
    }

    pub async fn reset_password(
        &self,
        identifier: Option<&str>,
        new_password: &str,
        token: &str,
    ) -> Result<Ack, RpcError> {
        self.invoke(
            RpcCall::new(Procedure::ResetPassword)
                .opt_text("p_identifier", identifier)
                .text("p_new_password", new_password)
                .text("p_reset_token", token),
        )
        .await
    }

    pub async fn create_or_update_social_user(
        &self,
        email: &str,
        name: &str,
        image: Option<&str>,
    ) -> Result<SocialAccount, RpcError> {
        self.invoke(
            RpcCall::new(Procedure::CreateOrUpdateSocialUser)
                .text("p_email", email)
                .text("p_name", name)
                .opt_text("p_image", image),
        )
        .await
    }

    pub async fn check_username_unique(&self, username: &str) -> Result<UsernameCheck, RpcError> {
        self.invoke(RpcCall::new(Procedure::CheckUsernameUnique).text("p_username", username))
            .await
    }

    /// `Ok(None)` when the backend has no such user.
    pub async fn get_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, RpcError> {
        let found: Result<UserLookup, _> = self
            .invoke(RpcCall::new(Procedure::GetUserByUsername).text("p_username", username))
            .await;
        lookup_result(found)
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>, RpcError> {
        let found: Result<UserLookup, _> = self
            .invoke(RpcCall::new(Procedure::GetUserById).uuid("p_user_id", id))
            .await;
        lookup_result(found)
    }
}

fn lookup_result(found: Result<UserLookup, RpcError>) -> Result<Option<UserRecord>, RpcError> {
    match found {
        Ok(lookup) => Ok(lookup.user),
        Err(RpcError::Rejected(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

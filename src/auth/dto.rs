use serde::{Deserialize, Serialize};

use super::repo_types::{SessionUser, UserRecord};
use super::validation::EmailKind;

/// Raw sign-up form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignUpInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Raw sign-in form, also the preflight body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignInInput {
    pub identifier: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailInput {
    pub identifier: Option<String>,
    pub verification_code: Option<String>,
}

/// Resend-code and initiate-reset body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifierInput {
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordInput {
    pub identifier: Option<String>,
    pub new_password: Option<String>,
    #[serde(alias = "verificationCode")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateTokenInput {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendVerificationEmailInput {
    pub email: Option<String>,
    pub username: Option<String>,
    pub verification_code: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<EmailKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OneClickLoginInput {
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthErrorQuery {
    pub error: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsernameQuery {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeQuery {
    pub code: Option<String>,
}

/// Preflight answer: `{success, code?, message?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A freshly issued session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedSession {
    pub token: String,
    pub user: SessionUser,
}

/// Current session as seen by `GET /api/auth/session`. `token` is set
/// when the sliding policy re-issued it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub user: SessionUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpData {
    pub user: UserRecord,
    pub verification_code: String,
    pub redirect: String,
    pub email_sent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneClickLoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_new_user: Option<bool>,
    pub message: String,
}

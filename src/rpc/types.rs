use serde::Deserialize;

use crate::auth::repo_types::UserRecord;

/// `create_user_account` success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedAccount {
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default)]
    pub verification_code: Option<String>,
}

/// `authenticate_user` success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Authenticated {
    #[serde(default)]
    pub user: Option<UserRecord>,
}

/// Success payload of procedures that return nothing but `success`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {}

/// `resend_verification_code` success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedCode {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub verification_code: Option<String>,
}

/// `initiate_password_reset` success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuedResetToken {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub reset_token: Option<String>,
}

/// `validate_reset_token` success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenOwner {
    #[serde(default)]
    pub user: Option<UserRecord>,
}

/// `create_or_update_social_user` success payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SocialAccount {
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default)]
    pub is_new_user: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsernameCheck {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserLookup {
    #[serde(default)]
    pub user: Option<UserRecord>,
}

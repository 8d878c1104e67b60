//! Verification-code and password-reset actions.
//!
//! Each action takes an already validated form, performs the backend
//! call, sends mail where the workflow requires it, and answers with the
//! uniform action body. Business refusals, cooldowns, delivery failures
//! and technical failures stay distinct.

use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::machine::wait_minutes;
use crate::auth::dto::SignUpData;
use crate::auth::validation::{
    EmailKind, IdentifierForm, ResetPasswordForm, SendVerificationEmailForm, SignUpForm,
    VerifyEmailForm,
};
use crate::email::Mailer;
use crate::error::{ActionError, ActionResponse};
use crate::rpc::{Backend, Rejection, RejectionKind, RpcError};

type ActionOutcome<T = Value> = Result<ActionResponse<T>, ActionError>;

/// Page the client opens after a successful sign-up.
pub fn verify_page(username: &str) -> String {
    format!("/authentication/verify-email/{username}")
}

fn rejected(rejection: Rejection, fallback: &str) -> ActionError {
    ActionError::Rejected(rejection.message.unwrap_or_else(|| fallback.to_string()))
}

fn technical(err: &RpcError, message: &str) -> ActionError {
    error!(error = %err, "backend failure");
    ActionError::Technical(message.to_string())
}

pub async fn sign_up(backend: &Backend, mailer: &Mailer, form: &SignUpForm) -> ActionOutcome<SignUpData> {
    let created = match backend
        .create_user_account(&form.email, &form.password, &form.username)
        .await
    {
        Ok(created) => created,
        Err(RpcError::Rejected(r)) => {
            warn!(kind = ?r.kind, "sign-up rejected");
            let message = match r.kind {
                RejectionKind::EmailTaken => "A user with this email already exists",
                RejectionKind::UsernameTaken => "This username is already taken",
                _ => "Account creation failed. Please try again.",
            };
            return Err(ActionError::Rejected(message.into()));
        }
        Err(e) => return Err(technical(&e, "An unexpected error occurred during sign up")),
    };

    let (Some(user), Some(code)) = (created.user, created.verification_code) else {
        warn!("sign-up answered without user or code");
        return Err(ActionError::Technical(
            "Account creation incomplete. Please try again.".into(),
        ));
    };
    let username = user.username.clone().unwrap_or_else(|| form.username.clone());
    let email = user.email.clone().unwrap_or_else(|| form.email.clone());
    info!(user_id = ?user.id, "account created");

    let email_sent = mailer.send_verification(&email, &username, &code).await.is_ok();
    let message = if email_sent {
        "Account created successfully! Please verify your email."
    } else {
        "Account created but failed to send verification email"
    };
    Ok(ActionResponse::ok(
        message,
        SignUpData {
            redirect: verify_page(&username),
            user,
            verification_code: code,
            email_sent,
        },
    ))
}

pub async fn verify_email(backend: &Backend, form: &VerifyEmailForm) -> ActionOutcome {
    match backend
        .verify_user_email(form.identifier.as_str(), &form.code)
        .await
    {
        Ok(_) => {
            info!("email verified");
            Ok(ActionResponse::done(
                "Email verified successfully! You can now sign in.",
            ))
        }
        Err(RpcError::Rejected(r)) => Err(rejected(r, "Invalid verification code")),
        Err(e) => Err(technical(&e, "Verification failed due to a technical error")),
    }
}

pub async fn resend_code(backend: &Backend, mailer: &Mailer, form: &IdentifierForm) -> ActionOutcome {
    let issued = match backend
        .resend_verification_code(form.identifier.as_str())
        .await
    {
        Ok(issued) => issued,
        Err(RpcError::Rejected(r)) if r.kind == RejectionKind::Cooldown => {
            let minutes = wait_minutes(r.minutes_remaining);
            return Err(ActionError::Cooldown {
                message: format!(
                    "Please wait {minutes} minutes before requesting a new verification code."
                ),
                minutes,
            });
        }
        Err(RpcError::Rejected(r)) => return Err(rejected(r, "Failed to resend verification code")),
        Err(e) => {
            return Err(technical(
                &e,
                "Failed to resend verification code due to technical error",
            ))
        }
    };

    let (Some(email), Some(username), Some(code)) =
        (issued.email, issued.username, issued.verification_code)
    else {
        return Err(ActionError::Technical(
            "Failed to resend verification code".into(),
        ));
    };
    let data = json!({ "verification_code": code });
    if mailer.send_verification(&email, &username, &code).await.is_err() {
        return Err(ActionError::Delivery {
            message: "Verification code generated but failed to send email".into(),
            data,
        });
    }
    info!("verification code re-sent");
    Ok(ActionResponse::ok("New verification code sent to your email.", data))
}

pub async fn initiate_password_reset(
    backend: &Backend,
    mailer: &Mailer,
    form: &IdentifierForm,
) -> ActionOutcome {
    let issued = match backend
        .initiate_password_reset(form.identifier.as_str())
        .await
    {
        Ok(issued) => issued,
        Err(RpcError::Rejected(r)) if r.kind == RejectionKind::Cooldown => {
            let minutes = wait_minutes(r.minutes_remaining);
            return Err(ActionError::Cooldown {
                message: format!(
                    "Please wait {minutes} minutes before requesting another password reset."
                ),
                minutes,
            });
        }
        Err(RpcError::Rejected(r)) => return Err(rejected(r, "Failed to initiate password reset")),
        Err(e) => {
            return Err(technical(
                &e,
                "Failed to initiate password reset due to technical error",
            ))
        }
    };

    let (Some(email), Some(username), Some(token)) =
        (issued.email, issued.username, issued.reset_token)
    else {
        return Err(ActionError::Technical(
            "Failed to initiate password reset".into(),
        ));
    };
    let data = json!({ "reset_token": token });
    if mailer
        .send_password_reset(&email, &username, &token)
        .await
        .is_err()
    {
        return Err(ActionError::Delivery {
            message: "Password reset initiated but failed to send email".into(),
            data,
        });
    }
    info!("password reset link sent");
    Ok(ActionResponse::ok("Password reset link sent to your email.", data))
}

/// Advisory check; never consumes the token.
pub async fn validate_reset_token(backend: &Backend, token: &str) -> ActionOutcome {
    match backend.validate_reset_token(token).await {
        Ok(owner) => Ok(ActionResponse {
            success: true,
            message: "Valid reset token".into(),
            data: owner.user.map(|u| json!(u)),
        }),
        Err(RpcError::Rejected(r)) => Err(rejected(r, "Invalid or expired reset token")),
        Err(e) => Err(technical(&e, "Failed to validate token due to technical error")),
    }
}

/// Consumes the token. Runs the backend check again even if the client
/// validated the token earlier.
pub async fn reset_password(backend: &Backend, form: &ResetPasswordForm) -> ActionOutcome {
    let identifier = form.identifier.as_ref().map(|i| i.as_str());
    match backend
        .reset_password(identifier, &form.new_password, &form.token)
        .await
    {
        Ok(_) => {
            info!("password reset");
            Ok(ActionResponse::done(
                "Password reset successfully! You can now sign in with your new password.",
            ))
        }
        Err(RpcError::Rejected(r)) => Err(rejected(r, "Failed to reset password")),
        Err(e) => Err(technical(&e, "Failed to reset password due to technical error")),
    }
}

/// Mail an already issued code or token again, by template.
pub async fn send_verification_email(mailer: &Mailer, form: &SendVerificationEmailForm) -> ActionOutcome {
    let sent = match form.kind {
        EmailKind::PasswordReset => {
            mailer
                .send_password_reset(&form.email, &form.username, &form.code)
                .await
        }
        EmailKind::Verification | EmailKind::Resend => {
            mailer
                .send_verification(&form.email, &form.username, &form.code)
                .await
        }
    };
    match sent {
        Ok(()) => Ok(ActionResponse::done("Verification email sent successfully")),
        Err(_) => Err(ActionError::Delivery {
            message: "Failed to send verification email".into(),
            data: json!({ "type": form.kind }),
        }),
    }
}

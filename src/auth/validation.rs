//! Form validation. Pure functions over raw input: each form either
//! parses into a normalized value or yields field-level errors.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::dto::{
    IdentifierInput, ResetPasswordInput, SendVerificationEmailInput, SignInInput, SignUpInput,
    VerifyEmailInput,
};

pub const USERNAME_MIN: usize = 2;
pub const USERNAME_MAX: usize = 20;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 50;
pub const CODE_LEN: usize = 6;
pub const RESET_TOKEN_LEN: usize = 64;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_CHARS_RE: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
    static ref RESET_TOKEN_RE: Regex = Regex::new(r"^[A-Fa-f0-9]{64}$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn first_message(&self) -> &str {
        self.0
            .first()
            .map(|e| e.message.as_str())
            .unwrap_or("Invalid input")
    }

    pub fn for_field(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, FieldErrors> {
        if self.0.is_empty() {
            Ok(value())
        } else {
            Err(self)
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn username_error(username: &str) -> Option<&'static str> {
    let len = username.chars().count();
    if len < USERNAME_MIN {
        Some("Username must be at least 2 characters")
    } else if len > USERNAME_MAX {
        Some("Username must be no more than 20 characters")
    } else if !USERNAME_CHARS_RE.is_match(username) {
        Some("Username must only contain letters, digits, and underscores")
    } else {
        None
    }
}

pub fn is_valid_username(username: &str) -> bool {
    username_error(username).is_none()
}

pub fn password_error(password: &str) -> Option<&'static str> {
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        Some("Password must be at least 8 characters")
    } else if len > PASSWORD_MAX {
        Some("Password must be no more than 50 characters")
    } else {
        None
    }
}

/// Trim and uppercase a verification code as typed by a user.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

pub fn is_well_formed_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn is_well_formed_reset_token(token: &str) -> bool {
    RESET_TOKEN_RE.is_match(token)
}

/// Email address or username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Email(String),
    Username(String),
}

impl Identifier {
    /// Email schema first, then username; the first match wins.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if is_valid_email(raw) {
            Some(Identifier::Email(raw.to_lowercase()))
        } else if is_valid_username(raw) {
            Some(Identifier::Username(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identifier::Email(v) | Identifier::Username(v) => v,
        }
    }
}

const IDENTIFIER_MESSAGE: &str = "Please enter a valid email or username";

fn required<'a>(errors: &mut FieldErrors, field: &str, label: &str, value: &'a Option<String>) -> Option<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Some(v),
        _ => {
            errors.push(field, format!("{label} is required"));
            None
        }
    }
}

fn identifier(errors: &mut FieldErrors, value: &Option<String>) -> Option<Identifier> {
    let raw = required(errors, "identifier", "Email or username", value)?;
    let parsed = Identifier::parse(raw);
    if parsed.is_none() {
        errors.push("identifier", IDENTIFIER_MESSAGE);
    }
    parsed
}

fn password(errors: &mut FieldErrors, field: &str, value: &Option<String>) -> Option<String> {
    let raw = required(errors, field, "Password", value)?;
    if let Some(message) = password_error(raw) {
        errors.push(field, message);
        return None;
    }
    Some(raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpForm {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl SignUpForm {
    pub fn parse(input: &SignUpInput) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();

        let username = required(&mut errors, "username", "Username", &input.username)
            .map(str::trim)
            .and_then(|u| match username_error(u) {
                Some(message) => {
                    errors.push("username", message);
                    None
                }
                None => Some(u.to_string()),
            });
        let email = required(&mut errors, "email", "Email", &input.email)
            .map(|e| e.trim().to_lowercase())
            .and_then(|e| {
                if is_valid_email(&e) {
                    Some(e)
                } else {
                    errors.push("email", "Invalid email address");
                    None
                }
            });
        let password = password(&mut errors, "password", &input.password);

        match (username, email, password) {
            (Some(username), Some(email), Some(password)) => errors.finish(|| Self {
                username,
                email,
                password,
            }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInForm {
    pub identifier: Identifier,
    pub password: String,
}

impl SignInForm {
    pub fn parse(input: &SignInInput) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        let identifier = identifier(&mut errors, &input.identifier);
        let password = password(&mut errors, "password", &input.password);
        match (identifier, password) {
            (Some(identifier), Some(password)) => errors.finish(|| Self {
                identifier,
                password,
            }),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyEmailForm {
    pub identifier: Identifier,
    /// Normalized (trimmed, uppercase).
    pub code: String,
}

impl VerifyEmailForm {
    pub fn parse(input: &VerifyEmailInput) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        let identifier = identifier(&mut errors, &input.identifier);
        let code = required(
            &mut errors,
            "verificationCode",
            "Verification code",
            &input.verification_code,
        )
        .map(normalize_code)
        .and_then(|code| {
            if is_well_formed_code(&code) {
                Some(code)
            } else {
                errors.push(
                    "verificationCode",
                    "Verification code must be 6 letters or digits",
                );
                None
            }
        });
        match (identifier, code) {
            (Some(identifier), Some(code)) => errors.finish(|| Self { identifier, code }),
            _ => Err(errors),
        }
    }
}

/// Resend and reset-initiation forms carry only an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierForm {
    pub identifier: Identifier,
}

impl IdentifierForm {
    pub fn parse(input: &IdentifierInput) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        match identifier(&mut errors, &input.identifier) {
            Some(identifier) => errors.finish(|| Self { identifier }),
            None => Err(errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPasswordForm {
    pub identifier: Option<Identifier>,
    pub new_password: String,
    pub token: String,
}

impl ResetPasswordForm {
    pub fn parse(input: &ResetPasswordInput) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        let identifier = match input.identifier.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let parsed = Identifier::parse(raw);
                if parsed.is_none() {
                    errors.push("identifier", IDENTIFIER_MESSAGE);
                }
                parsed
            }
        };
        let new_password = password(&mut errors, "newPassword", &input.new_password);
        let token = reset_token(&mut errors, &input.token);
        match (new_password, token) {
            (Some(new_password), Some(token)) => errors.finish(|| Self {
                identifier,
                new_password,
                token,
            }),
            _ => Err(errors),
        }
    }
}

fn reset_token(errors: &mut FieldErrors, value: &Option<String>) -> Option<String> {
    let raw = required(errors, "token", "Reset token", value)?.trim();
    if is_well_formed_reset_token(raw) {
        Some(raw.to_string())
    } else {
        errors.push("token", "Invalid or malformed reset token");
        None
    }
}

/// Validate a bare reset token (eager validation on page load).
pub fn parse_reset_token(raw: Option<&str>) -> Result<String, FieldErrors> {
    let mut errors = FieldErrors::default();
    let value = raw.map(str::to_string);
    match reset_token(&mut errors, &value) {
        Some(token) => Ok(token),
        None => Err(errors),
    }
}

/// Template selection for an explicit send-email request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailKind {
    #[default]
    Verification,
    Resend,
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendVerificationEmailForm {
    pub email: String,
    pub username: String,
    pub code: String,
    pub kind: EmailKind,
}

impl SendVerificationEmailForm {
    pub fn parse(input: &SendVerificationEmailInput) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::default();
        let kind = input.kind.unwrap_or_default();
        let email = required(&mut errors, "email", "Email", &input.email)
            .map(|e| e.trim().to_lowercase())
            .and_then(|e| {
                if is_valid_email(&e) {
                    Some(e)
                } else {
                    errors.push("email", "Invalid email address");
                    None
                }
            });
        let username =
            required(&mut errors, "username", "Username", &input.username).map(|u| u.trim().to_string());
        let code = match kind {
            EmailKind::PasswordReset => reset_token(&mut errors, &input.verification_code),
            _ => required(
                &mut errors,
                "verificationCode",
                "Verification code",
                &input.verification_code,
            )
            .map(normalize_code)
            .and_then(|code| {
                if is_well_formed_code(&code) {
                    Some(code)
                } else {
                    errors.push(
                        "verificationCode",
                        "Verification code must be 6 letters or digits",
                    );
                    None
                }
            }),
        };
        match (email, username, code) {
            (Some(email), Some(username), Some(code)) => errors.finish(|| Self {
                email,
                username,
                code,
                kind,
            }),
            _ => Err(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn signup_accepts_valid_input() {
        let form = SignUpForm::parse(&SignUpInput {
            username: s("alice1"),
            email: s(" A@Example.com "),
            password: s("longenough"),
        })
        .unwrap();
        assert_eq!(form.username, "alice1");
        assert_eq!(form.email, "a@example.com");
    }

    #[test]
    fn signup_reports_every_bad_field() {
        let errors = SignUpForm::parse(&SignUpInput {
            username: s("a"),
            email: s("not-an-email"),
            password: s("short"),
        })
        .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(
            errors.for_field("username"),
            Some("Username must be at least 2 characters")
        );
        assert_eq!(errors.for_field("email"), Some("Invalid email address"));
        assert_eq!(errors.first_message(), "Username must be at least 2 characters");
    }

    #[test]
    fn usernames_outside_the_pattern_fail() {
        for bad in ["a", "has space", "dash-name", "émile", "x".repeat(21).as_str(), "a.b"] {
            assert!(!is_valid_username(bad), "{bad} should be rejected");
        }
        for good in ["ab", "alice_1", "A".repeat(20).as_str()] {
            assert!(is_valid_username(good), "{good} should be accepted");
        }
    }

    #[test]
    fn password_bounds() {
        assert!(password_error(&"x".repeat(7)).is_some());
        assert!(password_error(&"x".repeat(8)).is_none());
        assert!(password_error(&"x".repeat(50)).is_none());
        assert!(password_error(&"x".repeat(51)).is_some());
    }

    #[test]
    fn identifier_is_email_or_username() {
        assert_eq!(
            Identifier::parse("Bob@Example.com"),
            Some(Identifier::Email("bob@example.com".into()))
        );
        assert_eq!(
            Identifier::parse("bob_99"),
            Some(Identifier::Username("bob_99".into()))
        );
        assert_eq!(Identifier::parse("bob@"), None);

        let errors = SignInForm::parse(&SignInInput {
            identifier: s("no way!"),
            password: s("longenough"),
        })
        .unwrap_err();
        assert_eq!(
            errors.for_field("identifier"),
            Some("Please enter a valid email or username")
        );
    }

    #[test]
    fn missing_fields_are_required() {
        let errors = SignInForm::parse(&SignInInput::default()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.for_field("password"), Some("Password is required"));
    }

    #[test]
    fn verification_code_is_normalized() {
        let form = VerifyEmailForm::parse(&VerifyEmailInput {
            identifier: s("alice1"),
            verification_code: s("  ab12cd "),
        })
        .unwrap();
        assert_eq!(form.code, "AB12CD");

        let errors = VerifyEmailForm::parse(&VerifyEmailInput {
            identifier: s("alice1"),
            verification_code: s("ab12c"),
        })
        .unwrap_err();
        assert!(errors.for_field("verificationCode").is_some());
    }

    #[test]
    fn reset_form_token_and_optional_identifier() {
        let token = "a1".repeat(32);
        let form = ResetPasswordForm::parse(&ResetPasswordInput {
            identifier: s("  "),
            new_password: s("longenough"),
            token: Some(token.clone()),
        })
        .unwrap();
        assert_eq!(form.identifier, None);
        assert_eq!(form.token, token);

        let errors = ResetPasswordForm::parse(&ResetPasswordInput {
            identifier: None,
            new_password: s("longenough"),
            token: s(&"g".repeat(64)),
        })
        .unwrap_err();
        assert_eq!(errors.for_field("token"), Some("Invalid or malformed reset token"));
        assert!(parse_reset_token(Some("abc")).is_err());
    }

    #[test]
    fn send_email_form_picks_token_rules_for_password_reset() {
        let form = SendVerificationEmailForm::parse(&SendVerificationEmailInput {
            email: s("a@example.com"),
            username: s("alice1"),
            verification_code: Some("ff".repeat(32)),
            kind: Some(EmailKind::PasswordReset),
        })
        .unwrap();
        assert_eq!(form.kind, EmailKind::PasswordReset);

        let form = SendVerificationEmailForm::parse(&SendVerificationEmailInput {
            email: s("a@example.com"),
            username: s("alice1"),
            verification_code: s("abc123"),
            kind: None,
        })
        .unwrap();
        assert_eq!(form.kind, EmailKind::Verification);
        assert_eq!(form.code, "ABC123");
    }
}

//! In-process stand-in for the Postgres procedures.
//!
//! Answers every [`Procedure`] with the same JSON shapes and free-text
//! errors the real backend produces, which makes it usable both for
//! `BACKEND=memory` development runs and for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Procedure, RpcCall, RpcTransport};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo_types::Role;
use crate::verification::machine::{IssueError, TokenFault, TokenLedger};

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone)]
struct Account {
    id: Uuid,
    email: String,
    username: String,
    display_name: String,
    role: Role,
    avatar: Option<String>,
    email_verified: bool,
    bio: Option<String>,
    skills: Vec<String>,
    badges: Vec<String>,
    created_at: OffsetDateTime,
    last_active_at: OffsetDateTime,
    password_hash: Option<String>,
    verification: TokenLedger,
    reset: TokenLedger,
}

fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_default()
}

impl Account {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "email": self.email,
            "username": self.username,
            "displayName": self.display_name,
            "role": self.role,
            "avatar": self.avatar,
            "emailVerified": self.email_verified,
            "bio": self.bio,
            "skills": self.skills,
            "badges": self.badges,
            "createdAt": rfc3339(self.created_at),
            "lastActiveAt": rfc3339(self.last_active_at),
        })
    }

    fn matches(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        if identifier.contains('@') {
            self.email.eq_ignore_ascii_case(identifier)
        } else {
            self.username.eq_ignore_ascii_case(identifier)
        }
    }
}

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    /// reset token (lowercase) -> account id
    reset_index: HashMap<String, Uuid>,
}

impl Tables {
    fn find(&self, identifier: &str) -> Option<usize> {
        self.accounts.iter().position(|a| a.matches(identifier))
    }

    fn find_by_id(&self, id: Uuid) -> Option<usize> {
        self.accounts.iter().position(|a| a.id == id)
    }

    fn email_taken(&self, email: &str) -> bool {
        self.accounts.iter().any(|a| a.email.eq_ignore_ascii_case(email))
    }

    fn username_taken(&self, username: &str) -> bool {
        self.accounts
            .iter()
            .any(|a| a.username.eq_ignore_ascii_case(username))
    }

    /// Username for a social account, derived from the email local part.
    fn derive_username(&self, email: &str) -> String {
        let local = email.split('@').next().unwrap_or_default();
        let mut base: String = local
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(16)
            .collect();
        if base.len() < 2 {
            base = format!("user{base}");
        }
        if !self.username_taken(&base) {
            return base;
        }
        (1..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !self.username_taken(candidate))
            .unwrap_or(base)
    }
}

/// In-memory implementation of the backend procedures.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    clock_offset: Mutex<Duration>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn failure(message: &str) -> Value {
    json!({ "success": false, "error": message })
}

fn required<'a>(call: &'a RpcCall, name: &str) -> anyhow::Result<&'a str> {
    call.arg(name)
        .ok_or_else(|| anyhow!("{}: missing argument {}", call.procedure, name))
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

fn random_reset_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

fn cooldown_failure(message: &str, err: IssueError) -> Value {
    let IssueError::Cooldown { minutes_remaining } = err;
    json!({
        "success": false,
        "error": message,
        "debug": { "minutes_remaining": minutes_remaining },
    })
}

fn code_fault_message(fault: TokenFault) -> &'static str {
    match fault {
        TokenFault::NoCode => "No verification code found for this account",
        TokenFault::Mismatch => "Invalid verification code",
        TokenFault::Expired => "Verification code has expired",
        TokenFault::AlreadyRedeemed => "Verification code has already been used",
        TokenFault::Superseded => "This code has been replaced by a newer one",
    }
}

fn token_fault_message(fault: TokenFault) -> &'static str {
    match fault {
        TokenFault::Expired => "Reset token has expired",
        TokenFault::AlreadyRedeemed => "Reset token has already been used",
        _ => "Invalid or expired reset token",
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock_offset: Mutex::new(Duration::ZERO),
        }
    }

    fn now(&self) -> OffsetDateTime {
        let offset = self
            .clock_offset
            .lock()
            .map(|o| *o)
            .unwrap_or(Duration::ZERO);
        OffsetDateTime::now_utc() + offset
    }

    /// Move this backend's clock forward; expiry and cooldowns follow it.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.clock_offset.lock() {
            *offset += by;
        }
    }

    fn tables(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory backend state poisoned"))
    }

    fn create_user_account(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let email = required(call, "p_email")?.trim().to_lowercase();
        let username = required(call, "p_username")?.trim().to_string();
        let password_hash = hash_password(required(call, "p_password")?)?;
        let now = self.now();

        let mut tables = self.tables()?;
        if tables.email_taken(&email) {
            return Ok(failure("A user with this email already exists"));
        }
        if tables.username_taken(&username) {
            return Ok(failure("This username is already taken"));
        }

        let code = random_code();
        let mut verification = TokenLedger::verification_code();
        verification
            .issue(now, code.clone())
            .map_err(|e| anyhow!("fresh ledger refused issue: {e}"))?;
        let account = Account {
            id: Uuid::new_v4(),
            display_name: username.clone(),
            email,
            username,
            role: Role::Member,
            avatar: None,
            email_verified: false,
            bio: None,
            skills: Vec::new(),
            badges: Vec::new(),
            created_at: now,
            last_active_at: now,
            password_hash: Some(password_hash),
            verification,
            reset: TokenLedger::reset_token(),
        };
        info!(user_id = %account.id, "memory backend: account created");
        let user = account.to_json();
        tables.accounts.push(account);
        Ok(json!({ "success": true, "user": user, "verification_code": code }))
    }

    fn authenticate_user(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let identifier = required(call, "p_identifier")?;
        let password = required(call, "p_password")?;
        const BAD_LOGIN: &str = "Invalid email/username or password";

        let (id, hash) = {
            let tables = self.tables()?;
            match tables.find(identifier) {
                Some(i) => {
                    let account = &tables.accounts[i];
                    (account.id, account.password_hash.clone())
                }
                None => return Ok(failure(BAD_LOGIN)),
            }
        };
        let Some(hash) = hash else {
            return Ok(failure(BAD_LOGIN));
        };
        if !verify_password(password, &hash)? {
            return Ok(failure(BAD_LOGIN));
        }

        let now = self.now();
        let mut tables = self.tables()?;
        let Some(i) = tables.find_by_id(id) else {
            return Ok(failure(BAD_LOGIN));
        };
        let account = &mut tables.accounts[i];
        if !account.email_verified {
            return Ok(json!({
                "success": false,
                "requires_verification": true,
                "error": "Please verify your email before signing in",
            }));
        }
        account.last_active_at = now;
        Ok(json!({ "success": true, "user": account.to_json() }))
    }

    fn verify_user_email(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let identifier = required(call, "p_identifier")?;
        let code = required(call, "p_verification_code")?.trim().to_uppercase();
        let now = self.now();

        let mut tables = self.tables()?;
        let Some(i) = tables.find(identifier) else {
            return Ok(failure("User not found"));
        };
        let account = &mut tables.accounts[i];
        match account.verification.redeem(now, &code) {
            Ok(()) => {
                account.email_verified = true;
                debug!(user_id = %account.id, "memory backend: email verified");
                Ok(json!({ "success": true }))
            }
            Err(fault) => Ok(failure(code_fault_message(fault))),
        }
    }

    fn resend_verification_code(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let identifier = required(call, "p_identifier")?;
        let now = self.now();

        let mut tables = self.tables()?;
        let Some(i) = tables.find(identifier) else {
            return Ok(failure("User not found"));
        };
        let account = &mut tables.accounts[i];
        if account.email_verified {
            return Ok(failure("Email is already verified"));
        }
        let code = random_code();
        if let Err(err) = account.verification.issue(now, code.clone()) {
            return Ok(cooldown_failure(
                "Please wait 15 minutes before requesting a new verification code",
                err,
            ));
        }
        Ok(json!({
            "success": true,
            "email": account.email,
            "username": account.username,
            "verification_code": code,
        }))
    }

    fn initiate_password_reset(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let identifier = required(call, "p_identifier")?;
        let now = self.now();

        let mut tables = self.tables()?;
        let Some(i) = tables.find(identifier) else {
            return Ok(failure("No account found with that email or username"));
        };
        let token = random_reset_token();
        let account = &mut tables.accounts[i];
        let previous = account.reset.current_secret().map(str::to_string);
        if let Err(err) = account.reset.issue(now, token.clone()) {
            return Ok(cooldown_failure(
                "Please wait 15 minutes before requesting another password reset",
                err,
            ));
        }
        let (id, email, username) = (account.id, account.email.clone(), account.username.clone());
        if let Some(previous) = previous {
            tables.reset_index.remove(&previous);
        }
        tables.reset_index.insert(token.clone(), id);
        Ok(json!({
            "success": true,
            "email": email,
            "username": username,
            "reset_token": token,
        }))
    }

    fn validate_reset_token(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let token = required(call, "p_reset_token")?.trim().to_lowercase();
        let now = self.now();

        let tables = self.tables()?;
        let Some(i) = tables
            .reset_index
            .get(&token)
            .and_then(|id| tables.find_by_id(*id))
        else {
            return Ok(failure("Invalid or expired reset token"));
        };
        let account = &tables.accounts[i];
        match account.reset.check(now, &token) {
            Ok(()) => Ok(json!({
                "success": true,
                "user": {
                    "id": account.id.to_string(),
                    "email": account.email,
                    "username": account.username,
                },
            })),
            Err(fault) => Ok(failure(token_fault_message(fault))),
        }
    }

    fn reset_password(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let identifier = call.arg("p_identifier").filter(|i| !i.trim().is_empty());
        let token = required(call, "p_reset_token")?.trim().to_lowercase();
        let password_hash = hash_password(required(call, "p_new_password")?)?;
        let now = self.now();

        let mut tables = self.tables()?;
        let Some(i) = tables
            .reset_index
            .get(&token)
            .and_then(|id| tables.find_by_id(*id))
        else {
            return Ok(failure("Invalid or expired reset token"));
        };
        let account = &mut tables.accounts[i];
        if let Some(identifier) = identifier {
            if !account.matches(identifier) {
                return Ok(failure("Reset token does not belong to this account"));
            }
        }
        if let Err(fault) = account.reset.redeem(now, &token) {
            return Ok(failure(token_fault_message(fault)));
        }
        account.password_hash = Some(password_hash);
        info!(user_id = %account.id, "memory backend: password reset");
        Ok(json!({ "success": true }))
    }

    fn create_or_update_social_user(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let email = required(call, "p_email")?.trim().to_lowercase();
        let name = required(call, "p_name")?.trim().to_string();
        let image = call.arg("p_image").filter(|i| !i.trim().is_empty());
        let now = self.now();

        let mut tables = self.tables()?;
        if let Some(i) = tables.find(&email) {
            let account = &mut tables.accounts[i];
            if let Some(image) = image {
                account.avatar = Some(image.to_string());
            }
            if account.display_name.is_empty() && !name.is_empty() {
                account.display_name = name;
            }
            // the provider vouches for the address
            account.email_verified = true;
            account.last_active_at = now;
            return Ok(json!({ "success": true, "user": account.to_json(), "is_new_user": false }));
        }

        let username = tables.derive_username(&email);
        let account = Account {
            id: Uuid::new_v4(),
            display_name: if name.is_empty() { username.clone() } else { name },
            email,
            username,
            role: Role::Member,
            avatar: image.map(str::to_string),
            email_verified: true,
            bio: None,
            skills: Vec::new(),
            badges: Vec::new(),
            created_at: now,
            last_active_at: now,
            password_hash: None,
            verification: TokenLedger::verification_code(),
            reset: TokenLedger::reset_token(),
        };
        info!(user_id = %account.id, "memory backend: social account created");
        let user = account.to_json();
        tables.accounts.push(account);
        Ok(json!({ "success": true, "user": user, "is_new_user": true }))
    }

    fn check_username_unique(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let username = required(call, "p_username")?;
        let tables = self.tables()?;
        if tables.username_taken(username.trim()) {
            return Ok(json!({ "success": false, "message": "Username is already taken" }));
        }
        Ok(json!({ "success": true, "message": "Username is available" }))
    }

    fn get_user_by_username(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let username = required(call, "p_username")?;
        let tables = self.tables()?;
        let found = tables
            .accounts
            .iter()
            .find(|a| a.username.eq_ignore_ascii_case(username.trim()));
        Ok(match found {
            Some(account) => json!({ "success": true, "user": account.to_json() }),
            None => failure("User not found"),
        })
    }

    fn get_user_by_id(&self, call: &RpcCall) -> anyhow::Result<Value> {
        let id: Uuid = required(call, "p_user_id")?
            .parse()
            .context("p_user_id is not a uuid")?;
        let tables = self.tables()?;
        Ok(match tables.find_by_id(id) {
            Some(i) => json!({ "success": true, "user": tables.accounts[i].to_json() }),
            None => failure("User not found"),
        })
    }
}

#[async_trait]
impl RpcTransport for MemoryBackend {
    async fn call(&self, call: &RpcCall) -> anyhow::Result<Value> {
        match call.procedure {
            Procedure::CreateUserAccount => self.create_user_account(call),
            Procedure::AuthenticateUser => self.authenticate_user(call),
            Procedure::VerifyUserEmail => self.verify_user_email(call),
            Procedure::ResendVerificationCode => self.resend_verification_code(call),
            Procedure::InitiatePasswordReset => self.initiate_password_reset(call),
            Procedure::ValidateResetToken => self.validate_reset_token(call),
            Procedure::ResetPassword => self.reset_password(call),
            Procedure::CreateOrUpdateSocialUser => self.create_or_update_social_user(call),
            Procedure::CheckUsernameUnique => self.check_username_unique(call),
            Procedure::GetUserByUsername => self.get_user_by_username(call),
            Procedure::GetUserById => self.get_user_by_id(call),
        }
    }
}

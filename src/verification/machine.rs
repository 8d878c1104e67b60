//! Lifecycle of single-use secrets (email verification codes and
//! password-reset tokens) bound to one identifier.
//!
//! ```text
//! NO_CODE --issue--> CODE_ISSUED --redeem--> REDEEMED
//!                         |  \--expiry-----> EXPIRED
//!                         \----issue-------> SUPERSEDED (old secret)
//! ```
//!
//! `issue` is guarded by the resend cooldown, `redeem` by expiry, match
//! and single use. `check` applies the same guards as `redeem` without
//! consuming anything.

use thiserror::Error;
use time::{Duration, OffsetDateTime};

/// Minimum spacing between two issuances for the same identifier.
pub const RESEND_COOLDOWN: Duration = Duration::minutes(15);
/// Lifetime of an email verification code.
pub const CODE_LIFETIME: Duration = Duration::hours(24);
/// Lifetime of a password-reset token.
pub const RESET_TOKEN_LIFETIME: Duration = Duration::hours(1);

const SUPERSEDED_HISTORY: usize = 5;

/// Observable state of a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeState {
    NoCode,
    CodeIssued,
    Redeemed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IssueError {
    #[error("please wait {minutes_remaining:.1} more minutes before requesting a new code")]
    Cooldown { minutes_remaining: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenFault {
    #[error("no code has been issued")]
    NoCode,
    #[error("code does not match")]
    Mismatch,
    #[error("code has expired")]
    Expired,
    #[error("code has already been used")]
    AlreadyRedeemed,
    #[error("code was replaced by a newer one")]
    Superseded,
}

#[derive(Debug, Clone)]
struct Issuance {
    secret: String,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    redeemed: bool,
}

/// One identifier's secret slot.
#[derive(Debug, Clone)]
pub struct TokenLedger {
    lifetime: Duration,
    cooldown: Duration,
    current: Option<Issuance>,
    superseded: Vec<String>,
}

impl TokenLedger {
    pub fn new(lifetime: Duration, cooldown: Duration) -> Self {
        Self {
            lifetime,
            cooldown,
            current: None,
            superseded: Vec::new(),
        }
    }

    pub fn verification_code() -> Self {
        Self::new(CODE_LIFETIME, RESEND_COOLDOWN)
    }

    pub fn reset_token() -> Self {
        Self::new(RESET_TOKEN_LIFETIME, RESEND_COOLDOWN)
    }

    pub fn state(&self, now: OffsetDateTime) -> CodeState {
        match &self.current {
            None => CodeState::NoCode,
            Some(i) if i.redeemed => CodeState::Redeemed,
            Some(i) if now >= i.expires_at => CodeState::Expired,
            Some(_) => CodeState::CodeIssued,
        }
    }

    /// Time left before another issuance is allowed, if any.
    pub fn cooldown_remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        let issued_at = self.current.as_ref()?.issued_at;
        let remaining = issued_at + self.cooldown - now;
        (remaining > Duration::ZERO).then_some(remaining)
    }

    /// Mint a new secret, superseding the previous one.
    pub fn issue(&mut self, now: OffsetDateTime, secret: String) -> Result<(), IssueError> {
        if let Some(remaining) = self.cooldown_remaining(now) {
            return Err(IssueError::Cooldown {
                minutes_remaining: remaining.as_seconds_f64() / 60.0,
            });
        }
        if let Some(previous) = self.current.take() {
            if !previous.redeemed {
                self.superseded.push(previous.secret);
                if self.superseded.len() > SUPERSEDED_HISTORY {
                    self.superseded.remove(0);
                }
            }
        }
        self.current = Some(Issuance {
            secret,
            issued_at: now,
            expires_at: now + self.lifetime,
            redeemed: false,
        });
        Ok(())
    }

    /// Non-consuming validation.
    pub fn check(&self, now: OffsetDateTime, presented: &str) -> Result<(), TokenFault> {
        let current = self.current.as_ref().ok_or(TokenFault::NoCode)?;
        if !current.secret.eq_ignore_ascii_case(presented) {
            if self
                .superseded
                .iter()
                .any(|old| old.eq_ignore_ascii_case(presented))
            {
                return Err(TokenFault::Superseded);
            }
            return Err(TokenFault::Mismatch);
        }
        if current.redeemed {
            return Err(TokenFault::AlreadyRedeemed);
        }
        if now >= current.expires_at {
            return Err(TokenFault::Expired);
        }
        Ok(())
    }

    /// Consume the secret. A failed attempt leaves the slot untouched.
    pub fn redeem(&mut self, now: OffsetDateTime, presented: &str) -> Result<(), TokenFault> {
        self.check(now, presented)?;
        if let Some(current) = self.current.as_mut() {
            current.redeemed = true;
        }
        Ok(())
    }

    pub fn current_secret(&self) -> Option<&str> {
        self.current.as_ref().map(|i| i.secret.as_str())
    }
}

/// Whole minutes to show in a "please wait" message. Unknown or
/// non-positive values fall back to the full cooldown.
pub fn wait_minutes(minutes_remaining: Option<f64>) -> u32 {
    let full = RESEND_COOLDOWN.whole_minutes() as u32;
    match minutes_remaining {
        Some(m) if m.is_finite() && m > 0.0 => (m.ceil() as u32).min(full),
        _ => full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    #[test]
    fn fresh_ledger_has_no_code() {
        let ledger = TokenLedger::verification_code();
        assert_eq!(ledger.state(T0), CodeState::NoCode);
        assert_eq!(ledger.check(T0, "ABC123"), Err(TokenFault::NoCode));
    }

    #[test]
    fn redeem_once_only() {
        let mut ledger = TokenLedger::verification_code();
        ledger.issue(T0, "ABC123".into()).unwrap();
        assert_eq!(ledger.state(T0), CodeState::CodeIssued);
        ledger.redeem(T0, "abc123").unwrap();
        assert_eq!(ledger.state(T0), CodeState::Redeemed);
        assert_eq!(ledger.redeem(T0, "ABC123"), Err(TokenFault::AlreadyRedeemed));
    }

    #[test]
    fn wrong_code_keeps_slot_valid() {
        let mut ledger = TokenLedger::verification_code();
        ledger.issue(T0, "ABC123".into()).unwrap();
        assert_eq!(ledger.redeem(T0, "ZZZ999"), Err(TokenFault::Mismatch));
        assert!(ledger.redeem(T0, "ABC123").is_ok());
    }

    #[test]
    fn cooldown_blocks_second_issue() {
        let mut ledger = TokenLedger::verification_code();
        ledger.issue(T0, "ABC123".into()).unwrap();
        let err = ledger
            .issue(T0 + Duration::minutes(3), "DEF456".into())
            .unwrap_err();
        let IssueError::Cooldown { minutes_remaining } = err;
        assert!((minutes_remaining - 12.0).abs() < 1e-9);
        assert_eq!(ledger.current_secret(), Some("ABC123"));
    }

    #[test]
    fn reissue_supersedes_old_code() {
        let mut ledger = TokenLedger::verification_code();
        ledger.issue(T0, "ABC123".into()).unwrap();
        ledger
            .issue(T0 + RESEND_COOLDOWN, "DEF456".into())
            .unwrap();
        let later = T0 + RESEND_COOLDOWN;
        assert_eq!(ledger.check(later, "ABC123"), Err(TokenFault::Superseded));
        assert!(ledger.check(later, "DEF456").is_ok());
    }

    #[test]
    fn expiry() {
        let mut ledger = TokenLedger::reset_token();
        ledger.issue(T0, "ab".repeat(32)).unwrap();
        let later = T0 + RESET_TOKEN_LIFETIME;
        assert_eq!(ledger.state(later), CodeState::Expired);
        assert_eq!(ledger.redeem(later, &"ab".repeat(32)), Err(TokenFault::Expired));
    }

    #[test]
    fn check_does_not_consume() {
        let mut ledger = TokenLedger::reset_token();
        let token = "0f".repeat(32);
        ledger.issue(T0, token.clone()).unwrap();
        assert!(ledger.check(T0, &token).is_ok());
        assert!(ledger.check(T0, &token).is_ok());
        assert!(ledger.redeem(T0, &token).is_ok());
        assert_eq!(ledger.redeem(T0, &token), Err(TokenFault::AlreadyRedeemed));
    }

    #[test]
    fn wait_minutes_rounds_up_and_clamps() {
        assert_eq!(wait_minutes(Some(12.1)), 13);
        assert_eq!(wait_minutes(Some(0.2)), 1);
        assert_eq!(wait_minutes(Some(15.0)), 15);
        assert_eq!(wait_minutes(Some(40.0)), 15);
        assert_eq!(wait_minutes(None), 15);
        assert_eq!(wait_minutes(Some(0.0)), 15);
    }
}

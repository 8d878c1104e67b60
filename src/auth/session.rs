use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use super::repo_types::SessionUser;
use crate::{config::SessionConfig, state::AppState};

/// Signed session payload: the normalized user plus registered claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(flatten)]
    pub user: SessionUser,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// Session signing and verification keys with the renewal policy.
#[derive(Clone)]
pub struct SessionKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    /// Absolute lifetime of a token from its issue time.
    pub max_age: Duration,
    /// Token age after which reading the session re-issues it.
    pub update_age: Duration,
}

impl SessionKeys {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            max_age: Duration::from_secs((config.max_age_days.max(0) as u64) * 24 * 60 * 60),
            update_age: Duration::from_secs((config.update_age_minutes.max(0) as u64) * 60),
        }
    }

    pub(crate) fn issue_at(&self, user: &SessionUser, now: OffsetDateTime) -> anyhow::Result<String> {
        let exp = now + TimeDuration::seconds(self.max_age.as_secs() as i64);
        let claims = SessionClaims {
            user: user.clone(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, "session signed");
        Ok(token)
    }

    pub fn issue(&self, user: &SessionUser) -> anyhow::Result<String> {
        self.issue_at(user, OffsetDateTime::now_utc())
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.user.id, "session verified");
        Ok(data.claims)
    }

    /// True once a token is older than the update age.
    pub fn needs_refresh(&self, claims: &SessionClaims, now: OffsetDateTime) -> bool {
        now.unix_timestamp() - claims.iat >= self.update_age.as_secs() as i64
    }

    /// Re-issue for `user` if the presented session is due for renewal.
    pub fn refresh(
        &self,
        claims: &SessionClaims,
        user: &SessionUser,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<String>> {
        if !self.needs_refresh(claims, now) {
            return Ok(None);
        }
        self.issue_at(user, now).map(Some)
    }
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        state.issuer.keys().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::{Role, UserRecord};
    use crate::config::AppConfig;

    fn keys() -> SessionKeys {
        SessionKeys::from_config(&AppConfig::for_tests().session)
    }

    fn user() -> SessionUser {
        SessionUser::from_record(UserRecord {
            id: Some("u-1".into()),
            username: Some("bob".into()),
            email: Some("bob@example.com".into()),
            role: Some("member".into()),
            email_verified: Some(true),
            skills: Some(vec!["rust".into()]),
            ..Default::default()
        })
    }

    #[test]
    fn claims_mirror_the_session_user() {
        let keys = keys();
        let token = keys.issue(&user()).expect("sign session");
        let claims = keys.verify(&token).expect("verify session");
        assert_eq!(claims.user.username, "bob");
        assert_eq!(claims.user.role, Role::Member);
        assert_eq!(claims.user.skills, vec!["rust".to_string()]);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 30 * 24 * 60 * 60);
    }

    #[test]
    fn rejects_foreign_audience() {
        let good = keys();
        let mut config = AppConfig::for_tests().session;
        config.audience = "someone-else".into();
        let other = SessionKeys::from_config(&config);
        let token = good.issue(&user()).unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn rejects_tampered_secret() {
        let good = keys();
        let mut config = AppConfig::for_tests().session;
        config.secret = "another-secret".into();
        let other = SessionKeys::from_config(&config);
        let token = good.issue(&user()).unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn expired_after_max_age() {
        let keys = keys();
        let issued = OffsetDateTime::now_utc() - TimeDuration::days(31);
        let token = keys.issue_at(&user(), issued).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn no_grace_period_past_expiry() {
        let mut config = AppConfig::for_tests().session;
        config.max_age_days = 0;
        let keys = SessionKeys::from_config(&config);
        let token = keys
            .issue_at(&user(), OffsetDateTime::now_utc() - TimeDuration::seconds(5))
            .unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn sliding_refresh_after_update_age() {
        let keys = keys();
        let now = OffsetDateTime::now_utc();
        let fresh = keys.verify(&keys.issue(&user()).unwrap()).unwrap();
        assert!(keys.refresh(&fresh, &fresh.user, now).unwrap().is_none());

        let two_hours_ago = now - TimeDuration::hours(2);
        let old = keys
            .verify(&keys.issue_at(&user(), two_hours_ago).unwrap())
            .unwrap();
        let renewed = keys
            .refresh(&old, &old.user, now)
            .unwrap()
            .expect("token re-issued");
        let claims = keys.verify(&renewed).unwrap();
        assert!(claims.iat > old.iat);
        assert_eq!(claims.user, old.user);
    }
}

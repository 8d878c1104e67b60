//! Identity providers and the session issuer that fronts them.
//!
//! Every provider answers the same question: given a sign-in attempt,
//! which normalized [`SessionUser`] (if any) does it vouch for? A `None`
//! never carries a reason. Callers that need a precise failure use the
//! credentials preflight instead.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use super::dto::IssuedSession;
use super::repo_types::{Role, SessionUser, UserRecord};
use super::session::SessionKeys;
use crate::config::AppConfig;
use crate::rpc::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Credentials,
    Google,
    Github,
}

impl ProviderId {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "credentials" => Some(ProviderId::Credentials),
            "google" => Some(ProviderId::Google),
            "github" => Some(ProviderId::Github),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::Credentials => "credentials",
            ProviderId::Google => "google",
            ProviderId::Github => "github",
        }
    }
}

/// Input handed to a provider.
#[derive(Debug, Clone)]
pub enum SignInAttempt {
    Credentials { identifier: String, password: String },
    /// Raw profile document returned by the external provider.
    Profile(Value),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn authorize(&self, attempt: &SignInAttempt) -> Option<SessionUser>;
}

/// Identifier + password, checked by `authenticate_user`.
pub struct CredentialsProvider {
    backend: Backend,
}

impl CredentialsProvider {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl IdentityProvider for CredentialsProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Credentials
    }

    async fn authorize(&self, attempt: &SignInAttempt) -> Option<SessionUser> {
        let SignInAttempt::Credentials {
            identifier,
            password,
        } = attempt
        else {
            return None;
        };
        if identifier.trim().is_empty() || password.is_empty() {
            return None;
        }
        match self.backend.authenticate_user(identifier, password).await {
            Ok(found) => found.user.map(SessionUser::from_record),
            Err(e) => {
                warn!(error = %e, "credentials authorize refused");
                None
            }
        }
    }
}

/// Profile fields every social provider reduces to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocialProfile {
    pub email: String,
    pub name: String,
    pub image: Option<String>,
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Overwrite a session user with the backend's account record.
pub fn merge_record(user: &mut SessionUser, record: UserRecord) {
    let merged = SessionUser::from_record(record);
    if !merged.id.is_empty() {
        user.id = merged.id;
    }
    if !merged.email.is_empty() {
        user.email = merged.email;
    }
    user.username = merged.username;
    user.display_name = merged.display_name;
    user.role = merged.role;
    user.avatar = merged.avatar;
    user.email_verified = merged.email_verified;
    user.last_active_at = merged.last_active_at;
    user.bio = merged.bio;
    user.skills = merged.skills;
    user.badges = merged.badges;
}

async fn upsert_social(backend: &Backend, provider: ProviderId, profile: SocialProfile) -> Option<SessionUser> {
    let mut user = SessionUser {
        id: String::new(),
        email: profile.email.clone(),
        username: String::new(),
        display_name: profile.name.clone(),
        role: Role::Guest,
        avatar: profile.image.clone(),
        email_verified: false,
        last_active_at: OffsetDateTime::now_utc(),
        bio: None,
        skills: Vec::new(),
        badges: Vec::new(),
    };
    match backend
        .create_or_update_social_user(&profile.email, &profile.name, profile.image.as_deref())
        .await
    {
        Ok(account) => {
            let record = account.user?;
            merge_record(&mut user, record);
            info!(
                provider = provider.as_str(),
                user_id = %user.id,
                new_user = account.is_new_user.unwrap_or(false),
                "social sign-in"
            );
            Some(user)
        }
        Err(e) => {
            warn!(provider = provider.as_str(), error = %e, "social upsert failed");
            None
        }
    }
}

/// Google OpenID profile: `email`, `name`, `picture`.
pub struct GoogleProvider {
    backend: Backend,
    pub client_id: String,
}

impl GoogleProvider {
    pub fn new(backend: Backend, client_id: String) -> Self {
        Self { backend, client_id }
    }

    pub fn profile(raw: &Value) -> Option<SocialProfile> {
        let email = str_field(raw, "email")?;
        let name = str_field(raw, "name").unwrap_or_else(|| email.clone());
        Some(SocialProfile {
            email,
            name,
            image: str_field(raw, "picture").or_else(|| str_field(raw, "image")),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    async fn authorize(&self, attempt: &SignInAttempt) -> Option<SessionUser> {
        let SignInAttempt::Profile(raw) = attempt else {
            return None;
        };
        let profile = Self::profile(raw)?;
        upsert_social(&self.backend, self.id(), profile).await
    }
}

/// GitHub user profile: `email`, `name` (nullable), `login`, `avatar_url`.
pub struct GitHubProvider {
    backend: Backend,
    pub client_id: String,
}

impl GitHubProvider {
    pub fn new(backend: Backend, client_id: String) -> Self {
        Self { backend, client_id }
    }

    pub fn profile(raw: &Value) -> Option<SocialProfile> {
        let email = str_field(raw, "email")?;
        let name = str_field(raw, "name")
            .or_else(|| str_field(raw, "login"))
            .unwrap_or_else(|| email.clone());
        Some(SocialProfile {
            email,
            name,
            image: str_field(raw, "avatar_url").or_else(|| str_field(raw, "image")),
        })
    }
}

#[async_trait]
impl IdentityProvider for GitHubProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Github
    }

    async fn authorize(&self, attempt: &SignInAttempt) -> Option<SessionUser> {
        let SignInAttempt::Profile(raw) = attempt else {
            return None;
        };
        let profile = Self::profile(raw)?;
        upsert_social(&self.backend, self.id(), profile).await
    }
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("unknown or disabled provider")]
    UnknownProvider,
    /// Generic refusal; deliberately carries no reason.
    #[error("sign-in refused")]
    Refused,
    #[error("failed to sign session: {0}")]
    Signing(#[from] anyhow::Error),
}

impl SignInError {
    /// Error code surfaced to the sign-in page.
    pub fn code(&self, provider: ProviderId) -> &'static str {
        match (self, provider) {
            (SignInError::Refused, ProviderId::Credentials) => "CredentialsSignin",
            (SignInError::Refused, _) => "AccessDenied",
            _ => "OAuthSignin",
        }
    }
}

/// Routes attempts to providers and signs the resulting session.
pub struct SessionIssuer {
    providers: Vec<Arc<dyn IdentityProvider>>,
    keys: SessionKeys,
}

impl SessionIssuer {
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>, keys: SessionKeys) -> Self {
        Self { providers, keys }
    }

    /// Credentials always; social providers when their client id is set.
    pub fn from_config(backend: &Backend, config: &AppConfig) -> Self {
        let mut providers: Vec<Arc<dyn IdentityProvider>> =
            vec![Arc::new(CredentialsProvider::new(backend.clone()))];
        if let Some(client_id) = &config.providers.google_client_id {
            providers.push(Arc::new(GoogleProvider::new(backend.clone(), client_id.clone())));
        }
        if let Some(client_id) = &config.providers.github_client_id {
            providers.push(Arc::new(GitHubProvider::new(backend.clone(), client_id.clone())));
        }
        Self::new(providers, SessionKeys::from_config(&config.session))
    }

    pub fn provider(&self, id: ProviderId) -> Option<&Arc<dyn IdentityProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub async fn sign_in(
        &self,
        id: ProviderId,
        attempt: &SignInAttempt,
    ) -> Result<IssuedSession, SignInError> {
        let provider = self.provider(id).ok_or(SignInError::UnknownProvider)?;
        let user = provider
            .authorize(attempt)
            .await
            .ok_or(SignInError::Refused)?;
        let token = self.keys.issue(&user)?;
        info!(provider = id.as_str(), user_id = %user.id, "session issued");
        Ok(IssuedSession { token, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MemoryBackend;
    use serde_json::json;

    fn issuer() -> (Backend, SessionIssuer) {
        let backend = Backend::new(Arc::new(MemoryBackend::new()));
        let issuer = SessionIssuer::from_config(&backend, &AppConfig::for_tests());
        (backend, issuer)
    }

    async fn verified_user(backend: &Backend) {
        let created = backend
            .create_user_account("a@example.com", "longenough", "alice1")
            .await
            .unwrap();
        backend
            .verify_user_email("alice1", &created.verification_code.unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn github_profile_falls_back_to_login() {
        let profile = GitHubProvider::profile(&json!({
            "email": "gh@example.com", "name": null, "login": "octo", "avatar_url": "https://a/x.png"
        }))
        .unwrap();
        assert_eq!(profile.name, "octo");
        assert_eq!(profile.image.as_deref(), Some("https://a/x.png"));
        assert!(GitHubProvider::profile(&json!({"login": "octo"})).is_none());
    }

    #[test]
    fn google_profile_uses_picture() {
        let profile = GoogleProvider::profile(&json!({
            "email": "g@example.com", "picture": "https://g/p.png"
        }))
        .unwrap();
        assert_eq!(profile.name, "g@example.com");
        assert_eq!(profile.image.as_deref(), Some("https://g/p.png"));
    }

    #[tokio::test]
    async fn credentials_sign_in_issues_session() {
        let (backend, issuer) = issuer();
        verified_user(&backend).await;
        let session = issuer
            .sign_in(
                ProviderId::Credentials,
                &SignInAttempt::Credentials {
                    identifier: "a@example.com".into(),
                    password: "longenough".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(session.user.username, "alice1");
        assert!(session.user.email_verified);
        let claims = issuer.keys().verify(&session.token).unwrap();
        assert_eq!(claims.user.id, session.user.id);
    }

    #[tokio::test]
    async fn refusals_carry_no_reason() {
        let (backend, issuer) = issuer();
        backend
            .create_user_account("a@example.com", "longenough", "alice1")
            .await
            .unwrap();
        // unverified and wrong password look the same here
        for password in ["longenough", "wrong-password"] {
            let err = issuer
                .sign_in(
                    ProviderId::Credentials,
                    &SignInAttempt::Credentials {
                        identifier: "alice1".into(),
                        password: password.into(),
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, SignInError::Refused));
            assert_eq!(err.code(ProviderId::Credentials), "CredentialsSignin");
        }
    }

    #[tokio::test]
    async fn social_sign_in_merges_backend_record() {
        let (_, issuer) = issuer();
        let session = issuer
            .sign_in(
                ProviderId::Github,
                &SignInAttempt::Profile(json!({"email": "octo@example.com", "login": "octo"})),
            )
            .await
            .unwrap();
        assert_eq!(session.user.username, "octo");
        assert_eq!(session.user.display_name, "octo");
        assert_eq!(session.user.role, Role::Member);
        assert!(session.user.email_verified);
        assert!(!session.user.id.is_empty());
    }

    #[tokio::test]
    async fn providers_reject_mismatched_attempts() {
        let (_, issuer) = issuer();
        let err = issuer
            .sign_in(
                ProviderId::Google,
                &SignInAttempt::Credentials {
                    identifier: "x".into(),
                    password: "y".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignInError::Refused));
        assert_eq!(err.code(ProviderId::Google), "AccessDenied");
    }

    #[test]
    fn disabled_provider_is_absent() {
        let backend = Backend::new(Arc::new(MemoryBackend::new()));
        let mut config = AppConfig::for_tests();
        config.providers.github_client_id = None;
        let issuer = SessionIssuer::from_config(&backend, &config);
        assert!(issuer.provider(ProviderId::Github).is_none());
        assert!(issuer.provider(ProviderId::Google).is_some());
    }
}

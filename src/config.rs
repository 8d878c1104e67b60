use anyhow::Context;
use serde::Deserialize;

/// Which RPC backend the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub max_age_days: i64,
    pub update_age_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub public_base_url: String,
    pub company_name: String,
    pub from: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    pub google_client_id: Option<String>,
    pub github_client_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendKind,
    pub database_url: Option<String>,
    pub session: SessionConfig,
    pub email: EmailConfig,
    pub providers: ProviderConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match env_or("BACKEND", "postgres").to_lowercase().as_str() {
            "memory" => BackendKind::Memory,
            "postgres" => BackendKind::Postgres,
            other => anyhow::bail!("unknown BACKEND value: {other}"),
        };
        let database_url = env_opt("DATABASE_URL");
        if backend == BackendKind::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when BACKEND=postgres");
        }

        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET").context("SESSION_SECRET is not set")?,
            issuer: env_or("SESSION_ISSUER", "eit-auth"),
            audience: env_or("SESSION_AUDIENCE", "eit-users"),
            max_age_days: env_i64("SESSION_MAX_AGE_DAYS", 30),
            update_age_minutes: env_i64("SESSION_UPDATE_AGE_MINUTES", 60),
        };
        let email = EmailConfig {
            public_base_url: env_or("PUBLIC_BASE_URL", "https://eit.neploom.com")
                .trim_end_matches('/')
                .to_string(),
            company_name: env_or("COMPANY_NAME", "EIT Hack Club"),
            from: env_or("EMAIL_FROM", "support@eit.neploom.com"),
        };
        let providers = ProviderConfig {
            google_client_id: env_opt("GOOGLE_CLIENT_ID"),
            github_client_id: env_opt("GITHUB_CLIENT_ID"),
        };

        Ok(Self {
            backend,
            database_url,
            session,
            email,
            providers,
        })
    }

    /// Configuration used by tests and local demos.
    pub fn for_tests() -> Self {
        Self {
            backend: BackendKind::Memory,
            database_url: None,
            session: SessionConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                max_age_days: 30,
                update_age_minutes: 60,
            },
            email: EmailConfig {
                public_base_url: "https://eit.test".into(),
                company_name: "EIT Test".into(),
                from: "support@eit.test".into(),
            },
            providers: ProviderConfig {
                google_client_id: Some("google-test".into()),
                github_client_id: Some("github-test".into()),
            },
        }
    }
}

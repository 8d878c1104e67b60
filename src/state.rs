use std::sync::Arc;

use crate::auth::providers::SessionIssuer;
use crate::config::{AppConfig, BackendKind};
use crate::email::{EmailSender, LogEmailSender, Mailer};
use crate::rpc::{Backend, MemoryBackend, PgTransport, RpcTransport};

#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub config: Arc<AppConfig>,
    pub mailer: Mailer,
    pub issuer: Arc<SessionIssuer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let transport: Arc<dyn RpcTransport> = match config.backend {
            BackendKind::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
                Arc::new(PgTransport::connect(url).await?)
            }
            BackendKind::Memory => {
                tracing::warn!("using in-memory backend; data is lost on restart");
                Arc::new(MemoryBackend::new())
            }
        };

        Ok(Self::from_parts(
            transport,
            Arc::new(config),
            Arc::new(LogEmailSender),
        ))
    }

    pub fn from_parts(
        transport: Arc<dyn RpcTransport>,
        config: Arc<AppConfig>,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        let backend = Backend::new(transport);
        let mailer = Mailer::new(sender, config.email.clone());
        let issuer = Arc::new(SessionIssuer::from_config(&backend, &config));
        Self {
            backend,
            config,
            mailer,
            issuer,
        }
    }

    /// Memory backend with a logging mailer.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::from_parts(
            Arc::new(MemoryBackend::new()),
            Arc::new(config),
            Arc::new(LogEmailSender),
        )
    }
}

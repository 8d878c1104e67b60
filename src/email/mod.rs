//! Outbound email for the verification workflow.
//!
//! Handlers hand a rendered [`EmailMessage`] to an [`EmailSender`]. The
//! bundled [`LogEmailSender`] only logs; a real transport implements the
//! same trait. Delivery failure is reported to the caller and never
//! undoes the code or token that was already minted.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

pub mod templates;

use crate::config::EmailConfig;
use templates::{EmailTemplate, RenderedEmail};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: String,
    pub to_email: String,
    pub subject: String,
    pub html: String,
}

/// Delivery abstraction.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to report it as unsent.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the envelope instead of sending mail.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        // body holds the code, keep it out of the logs
        info!(
            to_email = %message.to_email,
            subject = %message.subject,
            bytes = message.html.len(),
            "email send stub"
        );
        Ok(())
    }
}

/// Renders templates with the configured branding and base URL, then
/// delivers them through the sender.
#[derive(Clone)]
pub struct Mailer {
    sender: Arc<dyn EmailSender>,
    config: EmailConfig,
}

impl Mailer {
    pub fn new(sender: Arc<dyn EmailSender>, config: EmailConfig) -> Self {
        Self { sender, config }
    }

    fn base(&self) -> &str {
        self.config.public_base_url.trim_end_matches('/')
    }

    /// One-click link that pre-fills the verify page.
    pub fn verification_link(&self, username: &str, code: &str) -> String {
        format!(
            "{}/authentication/verify-email/{}?code={}",
            self.base(),
            username,
            code
        )
    }

    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/authentication/reset-password?token={}", self.base(), token)
    }

    async fn deliver(&self, to_email: &str, rendered: RenderedEmail) -> Result<()> {
        let message = EmailMessage {
            from: format!("\"{} Support\" <{}>", self.config.company_name, self.config.from),
            to_email: to_email.to_string(),
            subject: rendered.subject,
            html: rendered.html,
        };
        self.sender.send(&message).await.map_err(|e| {
            warn!(to_email = %to_email, error = %e, "email delivery failed");
            e
        })
    }

    pub async fn send_verification(&self, email: &str, username: &str, code: &str) -> Result<()> {
        let rendered = EmailTemplate::VerifyEmail {
            username,
            code,
            url: &self.verification_link(username, code),
        }
        .render(&self.config.company_name);
        self.deliver(email, rendered).await
    }

    pub async fn send_password_reset(&self, email: &str, username: &str, token: &str) -> Result<()> {
        let rendered = EmailTemplate::ResetPassword {
            username,
            url: &self.reset_link(token),
        }
        .render(&self.config.company_name);
        self.deliver(email, rendered).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use anyhow::anyhow;

    use super::*;

    /// Records messages; optionally fails every delivery.
    #[derive(Default)]
    pub struct RecordingSender {
        pub fail: bool,
        pub sent: Mutex<Vec<EmailMessage>>,
    }

    impl RecordingSender {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<EmailMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send(&self, message: &EmailMessage) -> Result<()> {
            if self.fail {
                return Err(anyhow!("smtp unavailable"));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSender;
    use super::*;
    use crate::config::AppConfig;

    fn mailer(sender: Arc<RecordingSender>) -> Mailer {
        Mailer::new(sender, AppConfig::for_tests().email)
    }

    #[test]
    fn links_use_public_base_url() {
        let m = mailer(Arc::new(RecordingSender::default()));
        assert_eq!(
            m.verification_link("alice1", "AB12CD"),
            "https://eit.test/authentication/verify-email/alice1?code=AB12CD"
        );
        assert_eq!(
            m.reset_link("ff00"),
            "https://eit.test/authentication/reset-password?token=ff00"
        );
    }

    #[tokio::test]
    async fn verification_mail_carries_code_and_link() {
        let sender = Arc::new(RecordingSender::default());
        mailer(sender.clone())
            .send_verification("a@example.com", "alice1", "AB12CD")
            .await
            .unwrap();
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "a@example.com");
        assert_eq!(sent[0].subject, "Verify Your Email");
        assert!(sent[0].html.contains("AB12CD"));
        assert!(sent[0].html.contains("/authentication/verify-email/alice1?code=AB12CD"));
        assert_eq!(sent[0].from, "\"EIT Test Support\" <support@eit.test>");
    }

    #[tokio::test]
    async fn failure_is_reported() {
        let sender = Arc::new(RecordingSender::failing());
        let err = mailer(sender)
            .send_password_reset("a@example.com", "alice1", &"ab".repeat(32))
            .await;
        assert!(err.is_err());
    }
}

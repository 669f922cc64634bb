//! Email Service
//!
//! SMTP delivery for verification and recovery codes. Bodies are written in
//! markdown and sent as multipart/alternative: the markdown as plain text
//! plus its HTML rendering.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use crate::auth::AuthError;
use crate::config::Config;

/// Mail delivery failure.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid recipient address: {0}")]
    Recipient(String),

    #[error("Mail transport failed: {0}")]
    Transport(String),

    #[error("Outgoing mail is not configured")]
    Unconfigured,
}

impl From<MailError> for AuthError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::Recipient(_) => Self::Validation(err.to_string()),
            MailError::Transport(_) | MailError::Unconfigured => Self::Transport(err.to_string()),
        }
    }
}

/// Outbound mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body_markdown: &str) -> Result<(), MailError>;
}

/// Render a markdown body to HTML.
#[must_use]
pub fn render_html(markdown: &str) -> String {
    let parser = pulldown_cmark::Parser::new(markdown);
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, parser);
    html
}

/// Email service for sending transactional emails via SMTP.
#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: Mailbox,
}

impl EmailService {
    /// Create a new email service from server configuration.
    ///
    /// Requires SMTP to be fully configured (`config.has_smtp()` must be true).
    pub fn new(config: &Config) -> Result<Self> {
        let host = config.smtp_host.as_ref().context("SMTP_HOST is required")?;
        let username = config
            .smtp_username
            .as_ref()
            .context("SMTP_USERNAME is required")?;
        let password = config
            .smtp_password
            .as_ref()
            .context("SMTP_PASSWORD is required")?;
        let from = config.smtp_from.as_ref().context("SMTP_FROM is required")?;

        let from_address: Mailbox = from
            .parse()
            .context("SMTP_FROM is not a valid email address")?;

        let creds = Credentials::new(username.clone(), password.clone());

        let mailer = match config.smtp_tls.as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .context("Failed to create SMTP TLS transport")?
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
            _ => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .context("Failed to create SMTP STARTTLS transport")?
                .port(config.smtp_port)
                .credentials(creds)
                .build(),
        };

        Ok(Self {
            mailer,
            from_address,
        })
    }

    fn build(&self, to: &str, subject: &str, body_markdown: &str) -> Result<Message, MailError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|_| MailError::Recipient(to.to_string()))?;

        Message::builder()
            .from(self.from_address.clone())
            .to(to_mailbox)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                body_markdown.to_string(),
                render_html(body_markdown),
            ))
            .map_err(|e| MailError::Transport(format!("Failed to build email message: {e}")))
    }
}

#[async_trait]
impl Mailer for EmailService {
    async fn send(&self, to: &str, subject: &str, body_markdown: &str) -> Result<(), MailError> {
        let message = self.build(to, subject, body_markdown)?;
        self.mailer.send(message).await.map_err(|e| {
            tracing::error!(error = %e, subject, "Failed to send email via SMTP");
            MailError::Transport(e.to_string())
        })?;
        tracing::info!(subject, "Email sent");
        Ok(())
    }
}

/// Stand-in when SMTP is not configured; every send fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, to: &str, subject: &str, _body_markdown: &str) -> Result<(), MailError> {
        tracing::warn!(to, subject, "Dropping email, SMTP is not configured");
        Err(MailError::Unconfigured)
    }
}

/// Pick the mailer for `config`.
pub fn from_config(config: &Config) -> Result<std::sync::Arc<dyn Mailer>> {
    if config.has_smtp() {
        Ok(std::sync::Arc::new(EmailService::new(config)?))
    } else {
        tracing::warn!("SMTP not configured, verification and recovery emails will fail");
        Ok(std::sync::Arc::new(UnconfiguredMailer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Config with every SMTP field set; `none` avoids DNS and TLS in tests.
    fn smtp_test_config() -> Config {
        let mut config = Config::default_for_test();
        config.smtp_host = Some("localhost".into());
        config.smtp_username = Some("testuser".into());
        config.smtp_password = Some("testpass".into());
        config.smtp_from = Some("noreply@example.com".into());
        config.smtp_tls = "none".into();
        config
    }

    fn expect_err(result: Result<EmailService>) -> anyhow::Error {
        match result {
            Err(e) => e,
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[test]
    fn test_new_success() {
        assert!(EmailService::new(&smtp_test_config()).is_ok());
    }

    #[test]
    fn test_new_missing_host() {
        let mut config = smtp_test_config();
        config.smtp_host = None;
        let err = expect_err(EmailService::new(&config));
        assert!(err.to_string().contains("SMTP_HOST"), "{err}");
    }

    #[test]
    fn test_new_invalid_from() {
        let mut config = smtp_test_config();
        config.smtp_from = Some("not an address".into());
        let err = expect_err(EmailService::new(&config));
        assert!(err.to_string().contains("SMTP_FROM"), "{err}");
    }

    #[test]
    fn test_message_is_multipart_alternative() {
        let service = EmailService::new(&smtp_test_config()).unwrap();
        let message = service
            .build("alice@example.com", "Verify Email", "**abc123**")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("<strong>abc123</strong>"));
        assert!(raw.contains("Subject: Verify Email"));
    }

    #[test]
    fn test_bad_recipient() {
        let service = EmailService::new(&smtp_test_config()).unwrap();
        assert!(matches!(
            service.build("nope", "Subject", "body"),
            Err(MailError::Recipient(_))
        ));
    }

    #[test]
    fn test_render_html() {
        assert_eq!(render_html("**bold**"), "<p><strong>bold</strong></p>\n");
    }

    #[tokio::test]
    async fn test_unconfigured_mailer_fails() {
        let err = UnconfiguredMailer
            .send("alice@example.com", "Subject", "body")
            .await
            .unwrap_err();
        assert!(matches!(AuthError::from(err), AuthError::Transport(_)));
        assert!(from_config(&Config::default_for_test()).is_ok());
    }
}

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
    Tokio1Executor,
};
use rem1nd_core::SmtpCredentials;
use tracing::{debug, info};

use crate::{
    error::{MailError, Result},
    message::OutboundMessage,
};

/// Anything that can push a message out using a given credential set.
///
/// Implementations must be `Send + Sync` so the engine can share one behind
/// an `Arc` across ticks.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver `message`, authenticating with `credentials`.
    async fn send(&self, credentials: &SmtpCredentials, message: &OutboundMessage) -> Result<()>;
}

/// SMTP delivery via `lettre`.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    /// Socket-level timeout handed to the transport.
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Port 465 gets an implicit-TLS relay, anything else a STARTTLS relay.
    fn transport(&self, credentials: &SmtpCredentials) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = if credentials.implicit_tls() {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&credentials.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&credentials.server)
        }
        .map_err(|e| MailError::Smtp(e.to_string()))?;

        Ok(builder
            .port(credentials.port)
            .credentials(Credentials::new(
                credentials.sender_email.clone(),
                credentials.password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build())
    }
}

impl Default for SmtpMailer {
    fn default() -> Self {
        Self::new(Duration::from_secs(
            rem1nd_core::config::DEFAULT_DELIVERY_TIMEOUT_SECS,
        ))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, credentials: &SmtpCredentials, message: &OutboundMessage) -> Result<()> {
        let email = message.to_lettre(credentials)?;
        debug!(
            server = %credentials.server,
            port = credentials.port,
            implicit_tls = credentials.implicit_tls(),
            "connecting to SMTP server"
        );
        let transport = self.transport(credentials)?;
        transport
            .send(email)
            .await
            .map_err(|e| MailError::Smtp(e.to_string()))?;

        info!(
            channel = "email",
            to = %message.to,
            subject = %message.subject,
            "message delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(port: u16) -> SmtpCredentials {
        SmtpCredentials {
            server: "smtp.example.com".into(),
            port,
            sender_email: "bot@example.com".into(),
            password: "secret".into(),
            sender_name: "Bot".into(),
        }
    }

    #[tokio::test]
    async fn transport_builds_for_both_tls_modes() {
        let mailer = SmtpMailer::new(Duration::from_secs(5));
        assert!(mailer.transport(&creds(465)).is_ok());
        assert!(mailer.transport(&creds(587)).is_ok());
    }

    #[tokio::test]
    async fn invalid_sender_fails_before_connecting() {
        let mailer = SmtpMailer::default();
        let mut bad = creds(587);
        bad.sender_email = "nope".into();
        let msg = OutboundMessage {
            to: "alice@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        let err = mailer.send(&bad, &msg).await.unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress(_)));
    }
}

//! Authenticated SMTP delivery (STARTTLS relay).

use super::{Notification, Notifier, NotifyError};
use crate::config::EmailConfig;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: Mailbox,
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let sender = mailbox(config.sender.as_deref().unwrap_or_default())?;
        let recipient = mailbox(config.recipient.as_deref().unwrap_or_default())?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
            recipient,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(notification.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        info!(
            recipient = %self.recipient,
            subject = notification.subject.as_str(),
            "Email sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(sender: &str) -> EmailConfig {
        EmailConfig {
            enabled: true,
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: Some("watcher".into()),
            password: Some("hunter2".into()),
            sender: Some(sender.into()),
            recipient: Some("me@example.com".into()),
        }
    }

    #[tokio::test]
    async fn builds_transport_without_connecting() {
        assert!(SmtpNotifier::new(&email("watcher@example.com")).is_ok());
    }

    #[tokio::test]
    async fn rejects_bad_sender() {
        assert!(matches!(
            SmtpNotifier::new(&email("not an address")),
            Err(NotifyError::Address { .. })
        ));
    }
}

use lettre::{
    message::{header::ContentType, Mailbox},
    Address, Message,
};
use rem1nd_core::{Reminder, SmtpCredentials};

use crate::error::{MailError, Result};

/// Transport-independent description of one outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl OutboundMessage {
    /// The email a fired reminder turns into: `"{prefix}{title}"` with the
    /// content verbatim as body.
    pub fn for_reminder(subject_prefix: &str, reminder: &Reminder) -> Self {
        Self {
            to: reminder.recipient_email.clone(),
            subject: format!("{subject_prefix}{}", reminder.title),
            body: reminder.content.clone(),
        }
    }

    /// Sender mailbox: `sender_name <sender_email>`, bare address when the name is blank.
    pub(crate) fn sender(credentials: &SmtpCredentials) -> Result<Mailbox> {
        let address: Address = credentials
            .sender_email
            .trim()
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                MailError::InvalidAddress(format!("{}: {e}", credentials.sender_email))
            })?;
        let name = credentials.sender_name.trim();
        let name = (!name.is_empty()).then(|| name.to_string());
        Ok(Mailbox::new(name, address))
    }

    /// Render into a `lettre` message sent as `credentials`.
    pub fn to_lettre(&self, credentials: &SmtpCredentials) -> Result<Message> {
        let from = Self::sender(credentials)?;
        let to: Mailbox = self
            .to
            .trim()
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                MailError::InvalidAddress(format!("{}: {e}", self.to))
            })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&self.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

//! `rem1nd-mail` — outbound delivery for fired reminders.
//!
//! The scheduler only sees the [`Mailer`] trait: hand it the credential set
//! that is active right now plus a message, get back success or a
//! [`MailError`]. [`SmtpMailer`] is the production implementation on top of
//! `lettre`; it builds a fresh transport per attempt so credential changes
//! take effect on the very next delivery.

pub mod error;
pub mod mailer;
pub mod message;

pub use error::{MailError, Result};
pub use mailer::{Mailer, SmtpMailer};
pub use message::OutboundMessage;

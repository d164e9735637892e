//! `rem1nd-core` — types shared by the scheduler engine, the mailer and the CLI.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use error::{Rem1ndError, Result};
pub use time::{Clock, ManualClock, SystemClock};
pub use types::{NewReminder, Reminder, RepeatType, SmtpCredentials};

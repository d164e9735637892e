use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No reminder with the given ID exists in the store.
    #[error("Reminder not found: {id}")]
    ReminderNotFound { id: i64 },

    /// User input rejected before it reached the database.
    #[error("Invalid reminder: {0}")]
    InvalidReminder(#[from] rem1nd_core::Rem1ndError),

    /// A stored reminder row cannot be decoded.
    #[error("Unreadable reminder row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    /// The stored SMTP row cannot be used as-is.
    #[error("Invalid SMTP credentials: {0}")]
    InvalidCredentials(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

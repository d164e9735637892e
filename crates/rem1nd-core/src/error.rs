use thiserror::Error;

#[derive(Debug, Error)]
pub enum Rem1ndError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timestamp: {value}")]
    InvalidTimestamp { value: String },

    #[error("Invalid repeat settings: {0}")]
    InvalidRepeat(String),
}

impl Rem1ndError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Rem1ndError::Config(_) => "CONFIG_ERROR",
            Rem1ndError::InvalidTimestamp { .. } => "INVALID_TIMESTAMP",
            Rem1ndError::InvalidRepeat(_) => "INVALID_REPEAT",
        }
    }
}

pub type Result<T> = std::result::Result<T, Rem1ndError>;

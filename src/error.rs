use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Rejected query: {0}")]
    RejectedQuery(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<sqlx::Error> for BotError {
    fn from(err: sqlx::Error) -> Self {
        BotError::Database(err.to_string())
    }
}

impl BotError {
    /// True when the guard refused the statement; such SQL must never run.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BotError::RejectedQuery(_))
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
